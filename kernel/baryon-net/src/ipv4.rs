//! IPv4: header build/parse, input demultiplex, output path.

use crate::checksum::checksum;
use crate::ethernet::{write_eth_header, ETH_HLEN};
use crate::firewall::FwAction;
use crate::wire::{
    be16, put_be16, Ipv4Addr, ETHERTYPE_IPV4, IP_PROTO_ICMP, IP_PROTO_TCP, IP_PROTO_UDP,
};
use crate::{NetDevice, NetError, NetStack};

/// IPv4 header length (no options).
pub(crate) const IP_HLEN: usize = 20;
/// Default time-to-live.
const TTL: u8 = 64;

/// A parsed IPv4 packet borrowed from a frame.
pub(crate) struct Ipv4Packet<'a> {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub proto: u8,
    pub payload: &'a [u8],
}

impl NetStack {
    /// Parses and demultiplexes an IPv4 frame.
    pub(crate) fn ipv4_input(&mut self, dev: &mut dyn NetDevice, frame: &[u8], now: u64) {
        let Some(pkt) = parse(frame) else {
            self.counters.bad_checksum += 1;
            return;
        };

        // Accept our unicast, broadcast, and anything while unconfigured
        // (DHCP delivers to the offered address).
        if !self.config.ip.is_unspecified()
            && pkt.dst != self.config.ip
            && pkt.dst != Ipv4Addr::BROADCAST
        {
            self.counters.dropped += 1;
            return;
        }

        // Learn the sender's mapping from on-subnet traffic so replies
        // (ACKs, echo responses) have a next hop without a resolve.
        if !pkt.src.is_unspecified()
            && self.config.ip.same_subnet(pkt.src, self.config.netmask)
        {
            let mut src_mac = crate::wire::MacAddr::ZERO;
            src_mac.0.copy_from_slice(&frame[6..12]);
            self.arp_add_static(pkt.src, src_mac, now);
        }

        // The firewall sees every TCP/UDP datagram before delivery.
        let dst_port = match pkt.proto {
            IP_PROTO_TCP | IP_PROTO_UDP if pkt.payload.len() >= 4 => be16(pkt.payload, 2),
            _ => 0,
        };
        if self.firewall.check(pkt.proto, pkt.src, dst_port) == FwAction::Deny {
            self.counters.filtered += 1;
            return;
        }

        match pkt.proto {
            IP_PROTO_ICMP => self.icmp_input(dev, &pkt, now),
            IP_PROTO_UDP => self.udp_input(dev, &pkt, now),
            IP_PROTO_TCP => self.tcp_input(dev, &pkt, now),
            _ => self.counters.dropped += 1,
        }
    }

    /// Builds and transmits one IPv4 packet.
    ///
    /// The next-hop MAC must already be in the ARP cache (callers on
    /// blocking paths warm it with [`NetStack::arp_resolve`]); otherwise
    /// the packet is dropped with [`NetError::NoRoute`].
    pub(crate) fn send_ipv4(
        &mut self,
        dev: &mut dyn NetDevice,
        dst: Ipv4Addr,
        proto: u8,
        payload: &[u8],
        now: u64,
    ) -> Result<(), NetError> {
        let dst_mac = if dst == Ipv4Addr::BROADCAST {
            crate::wire::MacAddr::BROADCAST
        } else {
            self.arp_lookup(dev, dst, now).ok_or(NetError::NoRoute)?
        };

        let total = ETH_HLEN + IP_HLEN + payload.len();
        let mut frame = [0u8; 1600];
        if total > frame.len() {
            return Err(NetError::Param);
        }
        write_eth_header(&mut frame, dst_mac, dev.mac(), ETHERTYPE_IPV4);

        let ip = &mut frame[ETH_HLEN..];
        ip[0] = 0x45; // version 4, IHL 5
        ip[1] = 0;
        #[allow(clippy::cast_possible_truncation)]
        let ip_len = (IP_HLEN + payload.len()) as u16;
        put_be16(ip, 2, ip_len);
        put_be16(ip, 4, self.ip_ident);
        self.ip_ident = self.ip_ident.wrapping_add(1);
        put_be16(ip, 6, 0x4000); // don't fragment
        ip[8] = TTL;
        ip[9] = proto;
        ip[12..16].copy_from_slice(&self.config.ip.0);
        ip[16..20].copy_from_slice(&dst.0);
        let c = checksum(&ip[..IP_HLEN]);
        put_be16(ip, 10, c);
        ip[IP_HLEN..IP_HLEN + payload.len()].copy_from_slice(payload);

        dev.send(&frame[..total]).map_err(|_| NetError::Device)?;
        self.counters.tx_frames += 1;
        Ok(())
    }
}

/// Parses an IPv4 frame, verifying the header checksum.
pub(crate) fn parse(frame: &[u8]) -> Option<Ipv4Packet<'_>> {
    if frame.len() < ETH_HLEN + IP_HLEN {
        return None;
    }
    let ip = &frame[ETH_HLEN..];
    let version = ip[0] >> 4;
    let ihl = usize::from(ip[0] & 0x0F) * 4;
    if version != 4 || ihl < IP_HLEN || frame.len() < ETH_HLEN + ihl {
        return None;
    }
    if checksum(&ip[..ihl]) != 0 {
        return None;
    }
    let total_len = usize::from(be16(ip, 2));
    if total_len < ihl || frame.len() < ETH_HLEN + total_len {
        return None;
    }
    let mut src = Ipv4Addr::UNSPECIFIED;
    src.0.copy_from_slice(&ip[12..16]);
    let mut dst = Ipv4Addr::UNSPECIFIED;
    dst.0.copy_from_slice(&ip[16..20]);
    Some(Ipv4Packet {
        src,
        dst,
        proto: ip[9],
        payload: &ip[ihl..total_len],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testpeer::{standard_config, PeerDevice, PEER_IP, PEER_MAC};

    #[test]
    fn send_requires_arp_entry() {
        let mut stack = NetStack::new(standard_config());
        let mut dev = PeerDevice::silent();
        assert!(matches!(
            stack.send_ipv4(&mut dev, PEER_IP, 17, &[1, 2, 3], 0),
            Err(NetError::NoRoute)
        ));

        stack.arp_add_static(PEER_IP, PEER_MAC, 0);
        assert!(stack.send_ipv4(&mut dev, PEER_IP, 17, &[1, 2, 3], 0).is_ok());
    }

    #[test]
    fn corrupted_header_is_silently_dropped() {
        let mut stack = NetStack::new(standard_config());
        let mut dev = PeerDevice::silent();
        stack.arp_add_static(PEER_IP, PEER_MAC, 0);
        stack.send_ipv4(&mut dev, PEER_IP, 1, &[8, 0, 0, 0, 0, 0, 0, 0], 0).unwrap();
        let mut frame = dev.last_sent().unwrap();
        frame[ETH_HLEN + 8] = frame[ETH_HLEN + 8].wrapping_add(1); // corrupt TTL

        let before = stack.counters().bad_checksum;
        stack.ethernet_input(&mut dev, &frame, 0);
        assert_eq!(stack.counters().bad_checksum, before + 1);
    }

    #[test]
    fn foreign_destination_is_dropped() {
        let mut stack = NetStack::new(standard_config());
        let mut dev = PeerDevice::silent();
        stack.arp_add_static(PEER_IP, PEER_MAC, 0);
        // Build a valid packet addressed to someone else by sending from
        // a stack configured as another host.
        let mut other = NetStack::new(crate::NetConfig {
            ip: Ipv4Addr::new(10, 0, 2, 40),
            ..standard_config()
        });
        other.arp_add_static(PEER_IP, PEER_MAC, 0);
        other.send_ipv4(&mut dev, PEER_IP, 1, &[8, 0, 0, 0, 0, 0, 0, 0], 0).unwrap();
        let frame = dev.last_sent().unwrap();

        let before = stack.counters().dropped;
        stack.ethernet_input(&mut dev, &frame, 0);
        assert_eq!(stack.counters().dropped, before + 1);
    }
}
