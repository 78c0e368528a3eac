//! The Baryon network stack.
//!
//! Ethernet framing, an ARP resolver with a per-entry state machine,
//! IPv4, ICMP echo, UDP, a full TCP state machine, a BSD-ish socket
//! table, and small DNS/DHCP/HTTP clients. Everything hangs off one
//! [`NetStack`] context; frames come and go through an injected
//! [`NetDevice`] and time is an explicit tick parameter, so the whole
//! stack runs against scripted peers in the unit tests.
//!
//! Blocking operations (ARP resolve, connect, DNS) are bounded polls:
//! they pump the device until satisfied or a tick deadline passes.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod arp;
mod checksum;
mod device;
mod dhcp;
mod dns;
mod ethernet;
mod firewall;
mod http;
mod icmp;
mod ipv4;
mod socket;
mod tcp;
mod udp;
mod wire;

#[cfg(test)]
mod testpeer;

pub use arp::{ArpEntry, ArpState, ARP_CACHE_SIZE};
pub use device::{Clock, NetDevice, TICKS_PER_SEC};
pub use dhcp::DhcpState;
pub use firewall::{FwAction, FwRule};
pub use socket::{SockType, SocketState, AF_INET, MAX_SOCKETS, SOCK_DGRAM, SOCK_STREAM};
pub use tcp::{ConnId, TcpState, TCP_MSS};
pub use wire::{Ipv4Addr, MacAddr, ETHERTYPE_ARP, ETHERTYPE_IPV4};

use core::fmt;

use arp::ArpCache;
use dhcp::DhcpClient;
use dns::DnsPending;
use firewall::Firewall;
use icmp::PendingPing;
use socket::SocketTable;
use tcp::TcpTable;

/// Network failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetError {
    /// ARP could not produce a next-hop MAC.
    NoRoute,
    /// A bounded wait expired.
    Timeout,
    /// The peer answered a SYN with RST.
    ConnectionRefused,
    /// The connection was reset.
    ConnectionReset,
    /// A ring or table is full.
    BufferFull,
    /// Invalid argument or socket state.
    Param,
    /// The device rejected a frame.
    Device,
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoRoute => f.write_str("no route to host"),
            Self::Timeout => f.write_str("timed out"),
            Self::ConnectionRefused => f.write_str("connection refused"),
            Self::ConnectionReset => f.write_str("connection reset"),
            Self::BufferFull => f.write_str("buffer full"),
            Self::Param => f.write_str("invalid parameter"),
            Self::Device => f.write_str("device error"),
        }
    }
}

/// Interface configuration shared by all protocol layers.
#[derive(Debug, Clone, Copy)]
pub struct NetConfig {
    /// Local IPv4 address.
    pub ip: Ipv4Addr,
    /// Subnet mask.
    pub netmask: Ipv4Addr,
    /// Default gateway.
    pub gateway: Ipv4Addr,
    /// DNS server.
    pub dns_server: Ipv4Addr,
}

impl NetConfig {
    /// An unconfigured interface (all zeros); DHCP fills it in.
    #[must_use]
    pub const fn unconfigured() -> Self {
        Self {
            ip: Ipv4Addr::UNSPECIFIED,
            netmask: Ipv4Addr::UNSPECIFIED,
            gateway: Ipv4Addr::UNSPECIFIED,
            dns_server: Ipv4Addr::UNSPECIFIED,
        }
    }
}

/// Per-interface packet counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetCounters {
    /// Frames received and dispatched.
    pub rx_frames: u64,
    /// Frames submitted to the device.
    pub tx_frames: u64,
    /// Frames dropped: unknown EtherType or protocol.
    pub dropped: u64,
    /// Frames dropped by the firewall.
    pub filtered: u64,
    /// Datagrams dropped for bad checksums.
    pub bad_checksum: u64,
}

/// The stack context: configuration plus every protocol table.
pub struct NetStack {
    pub(crate) config: NetConfig,
    pub(crate) arp: ArpCache,
    pub(crate) tcp: TcpTable,
    pub(crate) sockets: SocketTable,
    pub(crate) firewall: Firewall,
    pub(crate) ping: Option<PendingPing>,
    pub(crate) dns: Option<DnsPending>,
    pub(crate) dhcp: DhcpClient,
    pub(crate) counters: NetCounters,
    pub(crate) ip_ident: u16,
    pub(crate) ephemeral_port: u16,
    pub(crate) icmp_seq: u16,
}

impl NetStack {
    /// Creates a stack with a static configuration.
    #[must_use]
    pub fn new(config: NetConfig) -> Self {
        Self {
            config,
            arp: ArpCache::new(),
            tcp: TcpTable::new(),
            sockets: SocketTable::new(),
            firewall: Firewall::new(),
            ping: None,
            dns: None,
            dhcp: DhcpClient::new(),
            counters: NetCounters::default(),
            ip_ident: 1,
            ephemeral_port: 49152,
            icmp_seq: 0,
        }
    }

    /// The current interface configuration.
    #[must_use]
    pub fn config(&self) -> NetConfig {
        self.config
    }

    /// Replaces the interface configuration (static setup or DHCP).
    pub fn configure(&mut self, config: NetConfig) {
        self.config = config;
    }

    /// Packet counters.
    #[must_use]
    pub fn counters(&self) -> NetCounters {
        self.counters
    }

    /// Allocates the next ephemeral port.
    pub(crate) fn next_ephemeral(&mut self) -> u16 {
        let port = self.ephemeral_port;
        self.ephemeral_port = if port >= 65500 { 49152 } else { port + 1 };
        port
    }

    /// Drains pending frames from the device into the stack, bounded to
    /// keep interrupt-context work finite.
    pub fn poll_device(&mut self, dev: &mut dyn NetDevice, now: u64) {
        let mut frame = [0u8; 1600];
        for _ in 0..32 {
            let Some(len) = dev.poll(&mut frame) else { break };
            self.ethernet_input(dev, &frame[..len], now);
        }
    }

    /// Periodic housekeeping: ARP sweep plus TCP timers.
    ///
    /// The timer interrupt calls this roughly once a second.
    pub fn on_second(&mut self, dev: &mut dyn NetDevice, now: u64) {
        self.arp_sweep(dev, now);
        self.tcp_timer(dev, now);
    }
}
