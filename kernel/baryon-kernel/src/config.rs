//! Boot-time configuration from the Multiboot command line.
//!
//! `key=value` words separated by spaces; unknown keys are ignored so a
//! bootloader can carry its own options. Example:
//! `loglevel=debug ip=10.0.2.15/24 gw=10.0.2.2 dns=10.0.2.3 serial=off`.

use baryon_core::LogLevel;
use baryon_net::Ipv4Addr;

/// Parsed kernel options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Maximum log level.
    pub log_level: LogLevel,
    /// Serial logging enabled.
    pub serial: bool,
    /// Static address with prefix length, or `None` for DHCP.
    pub ip: Option<(Ipv4Addr, u8)>,
    /// Static gateway.
    pub gateway: Option<Ipv4Addr>,
    /// Static DNS server.
    pub dns: Option<Ipv4Addr>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            serial: true,
            ip: None,
            gateway: None,
            dns: None,
        }
    }
}

impl KernelConfig {
    /// Parses a command line, falling back to defaults per key.
    #[must_use]
    pub fn parse(cmdline: &str) -> Self {
        let mut cfg = Self::default();
        for word in cmdline.split_whitespace() {
            let Some((key, value)) = word.split_once('=') else {
                continue;
            };
            match key {
                "loglevel" => {
                    cfg.log_level = match value {
                        "fatal" => LogLevel::Fatal,
                        "error" => LogLevel::Error,
                        "warn" => LogLevel::Warn,
                        "info" => LogLevel::Info,
                        "debug" => LogLevel::Debug,
                        "trace" => LogLevel::Trace,
                        _ => cfg.log_level,
                    };
                }
                "serial" => cfg.serial = value != "off",
                "ip" => {
                    if let Some((addr, prefix)) = value.split_once('/') {
                        if let (Some(addr), Ok(prefix)) =
                            (Ipv4Addr::parse(addr), prefix.parse::<u8>())
                        {
                            if prefix <= 32 {
                                cfg.ip = Some((addr, prefix));
                            }
                        }
                    }
                }
                "gw" => cfg.gateway = Ipv4Addr::parse(value),
                "dns" => cfg.dns = Ipv4Addr::parse(value),
                _ => {}
            }
        }
        cfg
    }

    /// The netmask derived from the configured prefix length.
    #[must_use]
    pub fn netmask(&self) -> Ipv4Addr {
        match self.ip {
            Some((_, 0)) | None => Ipv4Addr::UNSPECIFIED,
            Some((_, prefix)) => Ipv4Addr::from_host_u32(u32::MAX << (32 - u32::from(prefix))),
        }
    }
}
