//! DHCP client: DISCOVER -> OFFER -> REQUEST -> ACK.
//!
//! Runs over the broadcast UDP path while the interface is still
//! unconfigured; a successful ACK installs address, netmask, gateway and
//! DNS server into the stack configuration.

use baryon_core::{kdebug, kinfo};

use crate::wire::{be32, put_be16, put_be32, Ipv4Addr};
use crate::{NetDevice, NetError, NetStack};

/// BOOTP fixed part plus the magic cookie.
const BOOTP_LEN: usize = 240;
/// Option codes.
const OPT_NETMASK: u8 = 1;
const OPT_ROUTER: u8 = 3;
const OPT_DNS: u8 = 6;
const OPT_REQUESTED_IP: u8 = 50;
const OPT_MSG_TYPE: u8 = 53;
const OPT_SERVER_ID: u8 = 54;
const OPT_PARAM_LIST: u8 = 55;
const OPT_END: u8 = 255;
/// Message types.
const DISCOVER: u8 = 1;
const OFFER: u8 = 2;
const REQUEST: u8 = 3;
const ACK: u8 = 5;

/// Client progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpState {
    /// Nothing in flight.
    Idle,
    /// DISCOVER sent, waiting for an OFFER.
    Selecting,
    /// REQUEST sent, waiting for the ACK.
    Requesting,
    /// Configuration applied.
    Bound,
}

pub(crate) struct DhcpClient {
    state: DhcpState,
    xid: u32,
    offered: Ipv4Addr,
    server: Ipv4Addr,
    xid_seed: u32,
}

impl DhcpClient {
    pub(crate) const fn new() -> Self {
        Self {
            state: DhcpState::Idle,
            xid: 0,
            offered: Ipv4Addr::UNSPECIFIED,
            server: Ipv4Addr::UNSPECIFIED,
            xid_seed: 0x4452_4859,
        }
    }
}

impl NetStack {
    /// Current client state.
    #[must_use]
    pub fn dhcp_state(&self) -> DhcpState {
        self.dhcp.state
    }

    /// Broadcasts a DISCOVER and starts the exchange.
    pub fn dhcp_discover(&mut self, dev: &mut dyn NetDevice, now: u64) -> Result<(), NetError> {
        self.dhcp.xid_seed = self.dhcp.xid_seed.wrapping_mul(0x0001_9660).wrapping_add(1);
        self.dhcp.xid = self.dhcp.xid_seed;
        self.dhcp.state = DhcpState::Selecting;

        let mut msg = [0u8; 300];
        let len = build_bootp(
            &mut msg,
            self.dhcp.xid,
            dev.mac().0,
            &[
                (OPT_MSG_TYPE, &[DISCOVER]),
                (OPT_PARAM_LIST, &[OPT_NETMASK, OPT_ROUTER, OPT_DNS]),
            ],
        );
        kdebug!("dhcp: discover xid={:#x}", self.dhcp.xid);
        self.send_udp(dev, 68, Ipv4Addr::BROADCAST, 67, &msg[..len], now)
    }

    /// Server-to-client traffic (UDP port 68).
    pub(crate) fn dhcp_input(&mut self, dev: &mut dyn NetDevice, payload: &[u8], now: u64) {
        if payload.len() < BOOTP_LEN || payload[0] != 2 {
            return;
        }
        if be32(payload, 4) != self.dhcp.xid {
            return;
        }
        if be32(payload, 236) != 0x6382_5363 {
            return;
        }
        let mut yiaddr = Ipv4Addr::UNSPECIFIED;
        yiaddr.0.copy_from_slice(&payload[16..20]);

        let mut msg_type = 0u8;
        let mut netmask = Ipv4Addr::UNSPECIFIED;
        let mut router = Ipv4Addr::UNSPECIFIED;
        let mut dns = Ipv4Addr::UNSPECIFIED;
        let mut server = Ipv4Addr::UNSPECIFIED;
        let mut at = BOOTP_LEN;
        while at + 1 < payload.len() {
            let code = payload[at];
            if code == OPT_END {
                break;
            }
            if code == 0 {
                at += 1;
                continue;
            }
            let len = usize::from(payload[at + 1]);
            let Some(value) = payload.get(at + 2..at + 2 + len) else {
                break;
            };
            match (code, len) {
                (OPT_MSG_TYPE, 1) => msg_type = value[0],
                (OPT_NETMASK, 4) => netmask.0.copy_from_slice(value),
                (OPT_ROUTER, 4) => router.0.copy_from_slice(value),
                (OPT_DNS, 4) => dns.0.copy_from_slice(value),
                (OPT_SERVER_ID, 4) => server.0.copy_from_slice(value),
                _ => {}
            }
            at += 2 + len;
        }

        match (self.dhcp.state, msg_type) {
            (DhcpState::Selecting, OFFER) => {
                self.dhcp.offered = yiaddr;
                self.dhcp.server = server;
                self.dhcp.state = DhcpState::Requesting;

                let mut msg = [0u8; 300];
                let xid = self.dhcp.xid;
                let len = build_bootp(
                    &mut msg,
                    xid,
                    dev.mac().0,
                    &[
                        (OPT_MSG_TYPE, &[REQUEST]),
                        (OPT_REQUESTED_IP, &yiaddr.0),
                        (OPT_SERVER_ID, &server.0),
                    ],
                );
                let _ = self.send_udp(dev, 68, Ipv4Addr::BROADCAST, 67, &msg[..len], now);
            }
            (DhcpState::Requesting, ACK) => {
                self.config.ip = yiaddr;
                if !netmask.is_unspecified() {
                    self.config.netmask = netmask;
                }
                if !router.is_unspecified() {
                    self.config.gateway = router;
                }
                if !dns.is_unspecified() {
                    self.config.dns_server = dns;
                }
                self.dhcp.state = DhcpState::Bound;
                kinfo!(
                    "dhcp: bound {} mask {} gw {}",
                    self.config.ip,
                    self.config.netmask,
                    self.config.gateway
                );
            }
            _ => {}
        }
    }
}

/// Fills a BOOTP request frame with the given options; returns length.
fn build_bootp(buf: &mut [u8], xid: u32, mac: [u8; 6], options: &[(u8, &[u8])]) -> usize {
    buf.fill(0);
    buf[0] = 1; // BOOTREQUEST
    buf[1] = 1; // Ethernet
    buf[2] = 6;
    put_be32(buf, 4, xid);
    put_be16(buf, 10, 0x8000); // broadcast flag
    buf[28..34].copy_from_slice(&mac);
    put_be32(buf, 236, 0x6382_5363);

    let mut at = BOOTP_LEN;
    for (code, value) in options {
        buf[at] = *code;
        #[allow(clippy::cast_possible_truncation)]
        let len = value.len() as u8;
        buf[at + 1] = len;
        buf[at + 2..at + 2 + value.len()].copy_from_slice(value);
        at += 2 + value.len();
    }
    buf[at] = OPT_END;
    at + 1
}
