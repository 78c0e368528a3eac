//! UDP: datagram build, checksum, and input demultiplex.

use crate::checksum::pseudo_checksum;
use crate::ipv4::Ipv4Packet;
use crate::wire::{be16, put_be16, Ipv4Addr, IP_PROTO_UDP};
use crate::{NetDevice, NetError, NetStack};

/// UDP header length.
pub(crate) const UDP_HLEN: usize = 8;
/// DHCP client port, intercepted before socket demux.
const PORT_DHCP_CLIENT: u16 = 68;

impl NetStack {
    /// Builds and sends one UDP datagram.
    ///
    /// The next-hop MAC must be resolvable without blocking; blocking
    /// callers warm the cache first.
    pub(crate) fn send_udp(
        &mut self,
        dev: &mut dyn NetDevice,
        src_port: u16,
        dst: Ipv4Addr,
        dst_port: u16,
        payload: &[u8],
        now: u64,
    ) -> Result<(), NetError> {
        let mut datagram = [0u8; 1500];
        let total = UDP_HLEN + payload.len();
        if total > datagram.len() {
            return Err(NetError::Param);
        }
        put_be16(&mut datagram, 0, src_port);
        put_be16(&mut datagram, 2, dst_port);
        #[allow(clippy::cast_possible_truncation)]
        let len = total as u16;
        put_be16(&mut datagram, 4, len);
        datagram[UDP_HLEN..total].copy_from_slice(payload);

        let c = pseudo_checksum(self.config.ip, dst, IP_PROTO_UDP, &datagram[..total]);
        // An all-zero checksum means "none"; the computed zero is sent
        // as its one's-complement equivalent.
        put_be16(&mut datagram, 6, if c == 0 { 0xFFFF } else { c });

        self.send_ipv4(dev, dst, IP_PROTO_UDP, &datagram[..total], now)
    }

    /// Verifies and demultiplexes a received UDP datagram.
    pub(crate) fn udp_input(&mut self, dev: &mut dyn NetDevice, pkt: &Ipv4Packet<'_>, now: u64) {
        let data = pkt.payload;
        if data.len() < UDP_HLEN {
            return;
        }
        let src_port = be16(data, 0);
        let dst_port = be16(data, 2);
        let len = usize::from(be16(data, 4));
        if len < UDP_HLEN || len > data.len() {
            return;
        }
        // Checksum 0 means the sender did not compute one.
        if be16(data, 6) != 0 && pseudo_checksum(pkt.src, pkt.dst, IP_PROTO_UDP, &data[..len]) != 0
        {
            self.counters.bad_checksum += 1;
            return;
        }
        let payload = &data[UDP_HLEN..len];

        if dst_port == PORT_DHCP_CLIENT {
            self.dhcp_input(dev, payload, now);
            return;
        }
        if let Some(pending) = &self.dns {
            if dst_port == pending.port && src_port == 53 {
                self.dns_input(payload);
                return;
            }
        }
        self.deliver_udp(pkt.src, src_port, dst_port, payload);
    }
}
