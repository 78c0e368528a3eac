//! Minimal DNS resolver: one in-flight single-question A query.

use baryon_core::kdebug;

use crate::device::{Clock, TICKS_PER_SEC};
use crate::wire::{be16, put_be16, Ipv4Addr};
use crate::{NetDevice, NetError, NetStack};

/// Bounded resolver wait: five seconds.
const DNS_TIMEOUT: u64 = 5 * TICKS_PER_SEC;
/// A-record query type.
const QTYPE_A: u16 = 1;
/// Internet class.
const QCLASS_IN: u16 = 1;

/// The outstanding query.
pub(crate) struct DnsPending {
    xid: u16,
    pub(crate) port: u16,
    result: Option<Ipv4Addr>,
}

impl NetStack {
    /// Resolves `name` to an IPv4 address via the configured server.
    ///
    /// Dotted-quad input short-circuits without a query. One query can
    /// be in flight at a time.
    pub fn dns_resolve(
        &mut self,
        dev: &mut dyn NetDevice,
        clock: &dyn Clock,
        name: &str,
    ) -> Result<Ipv4Addr, NetError> {
        if let Some(ip) = Ipv4Addr::parse(name) {
            return Ok(ip);
        }
        if self.dns.is_some() {
            return Err(NetError::BufferFull);
        }
        let server = self.config.dns_server;
        if server.is_unspecified() {
            return Err(NetError::NoRoute);
        }

        self.arp_resolve(dev, clock, server)?;

        let xid = {
            // Derive the transaction id from the ephemeral counter; no
            // entropy source exists at this layer.
            let p = self.next_ephemeral();
            p.rotate_left(3) ^ 0x616E
        };
        let port = self.next_ephemeral();
        let mut query = [0u8; 512];
        let len = build_query(xid, name, &mut query).ok_or(NetError::Param)?;
        let start = clock.now();
        self.dns = Some(DnsPending {
            xid,
            port,
            result: None,
        });
        self.send_udp(dev, port, server, 53, &query[..len], start)?;

        loop {
            let now = clock.now();
            if now.saturating_sub(start) > DNS_TIMEOUT {
                self.dns = None;
                return Err(NetError::Timeout);
            }
            self.poll_device(dev, now);
            if let Some(pending) = &self.dns {
                if let Some(ip) = pending.result {
                    self.dns = None;
                    kdebug!("dns: {} is {}", name, ip);
                    return Ok(ip);
                }
            }
            clock.relax();
        }
    }

    /// Response delivery from the UDP input path.
    pub(crate) fn dns_input(&mut self, payload: &[u8]) {
        let Some(pending) = &mut self.dns else { return };
        if let Some(ip) = parse_response(pending.xid, payload) {
            pending.result = Some(ip);
        }
    }
}

/// Builds a single-question A query into `buf`; returns the length.
pub(crate) fn build_query(xid: u16, name: &str, buf: &mut [u8]) -> Option<usize> {
    if name.is_empty() || name.len() > 253 {
        return None;
    }
    put_be16(buf, 0, xid);
    put_be16(buf, 2, 0x0100); // recursion desired
    put_be16(buf, 4, 1); // one question
    put_be16(buf, 6, 0);
    put_be16(buf, 8, 0);
    put_be16(buf, 10, 0);

    let mut at = 12;
    for label in name.split('.') {
        if label.is_empty() || label.len() > 63 || at + 1 + label.len() > buf.len() - 5 {
            return None;
        }
        #[allow(clippy::cast_possible_truncation)]
        let len = label.len() as u8;
        buf[at] = len;
        buf[at + 1..at + 1 + label.len()].copy_from_slice(label.as_bytes());
        at += 1 + label.len();
    }
    buf[at] = 0;
    at += 1;
    put_be16(buf, at, QTYPE_A);
    put_be16(buf, at + 2, QCLASS_IN);
    Some(at + 4)
}

/// Parses a response: matches the transaction id and returns the first
/// A answer.
pub(crate) fn parse_response(xid: u16, data: &[u8]) -> Option<Ipv4Addr> {
    if data.len() < 12 || be16(data, 0) != xid {
        return None;
    }
    if be16(data, 2) & 0x8000 == 0 {
        return None; // not a response
    }
    let qdcount = be16(data, 4);
    let ancount = be16(data, 6);
    if ancount == 0 {
        return None;
    }

    // Skip the question section.
    let mut at = 12usize;
    for _ in 0..qdcount {
        at = skip_name(data, at)?;
        at += 4; // qtype + qclass
    }

    for _ in 0..ancount {
        at = skip_name(data, at)?;
        if at + 10 > data.len() {
            return None;
        }
        let rtype = be16(data, at);
        let rclass = be16(data, at + 2);
        let rdlen = usize::from(be16(data, at + 8));
        at += 10;
        if at + rdlen > data.len() {
            return None;
        }
        if rtype == QTYPE_A && rclass == QCLASS_IN && rdlen == 4 {
            return Some(Ipv4Addr([data[at], data[at + 1], data[at + 2], data[at + 3]]));
        }
        at += rdlen;
    }
    None
}

/// Skips an encoded name (labels or a compression pointer), returning
/// the offset just past it.
fn skip_name(data: &[u8], mut at: usize) -> Option<usize> {
    loop {
        let len = *data.get(at)?;
        if len == 0 {
            return Some(at + 1);
        }
        if len & 0xC0 == 0xC0 {
            return Some(at + 2); // compression pointer ends the name
        }
        at += 1 + usize::from(len);
    }
}
