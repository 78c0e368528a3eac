//! Packet filter consulted before socket delivery.
//!
//! A bounded ordered rule list; the first matching rule decides, the
//! default is allow. Matching is by IP protocol, destination port, and
//! source address prefix, each optional.

use crate::wire::Ipv4Addr;
use crate::{NetError, NetStack};

/// Rule capacity.
const MAX_RULES: usize = 16;

/// What a matching rule does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FwAction {
    /// Deliver the datagram.
    Allow,
    /// Drop it, counted under `filtered`.
    Deny,
}

/// One filter rule; `None` fields match anything.
#[derive(Debug, Clone, Copy)]
pub struct FwRule {
    /// Allow or deny on match.
    pub action: FwAction,
    /// IP protocol number (6 TCP, 17 UDP).
    pub proto: Option<u8>,
    /// Destination (local) port.
    pub dst_port: Option<u16>,
    /// Source prefix as `(network, prefix_len)`.
    pub src: Option<(Ipv4Addr, u8)>,
}

impl FwRule {
    fn matches(&self, proto: u8, src: Ipv4Addr, dst_port: u16) -> bool {
        if let Some(p) = self.proto {
            if p != proto {
                return false;
            }
        }
        if let Some(port) = self.dst_port {
            if port != dst_port {
                return false;
            }
        }
        if let Some((net, prefix)) = self.src {
            let mask = if prefix == 0 {
                0
            } else {
                u32::MAX << (32 - u32::from(prefix.min(32)))
            };
            if src.to_host_u32() & mask != net.to_host_u32() & mask {
                return false;
            }
        }
        true
    }
}

pub(crate) struct Firewall {
    rules: [Option<FwRule>; MAX_RULES],
}

impl Firewall {
    pub(crate) const fn new() -> Self {
        Self {
            rules: [None; MAX_RULES],
        }
    }

    /// First matching rule wins; default allow.
    pub(crate) fn check(&self, proto: u8, src: Ipv4Addr, dst_port: u16) -> FwAction {
        for rule in self.rules.iter().flatten() {
            if rule.matches(proto, src, dst_port) {
                return rule.action;
            }
        }
        FwAction::Allow
    }
}

impl NetStack {
    /// Appends a firewall rule.
    pub fn firewall_add(&mut self, rule: FwRule) -> Result<(), NetError> {
        let slot = self
            .firewall
            .rules
            .iter()
            .position(Option::is_none)
            .ok_or(NetError::BufferFull)?;
        self.firewall.rules[slot] = Some(rule);
        Ok(())
    }

    /// Removes all rules.
    pub fn firewall_clear(&mut self) {
        self.firewall.rules = [None; MAX_RULES];
    }
}
