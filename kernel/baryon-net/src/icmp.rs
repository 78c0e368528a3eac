//! ICMP echo: responder and blocking ping.

use crate::checksum::checksum;
use crate::device::{Clock, TICKS_PER_SEC};
use crate::ipv4::Ipv4Packet;
use crate::wire::{be16, put_be16, Ipv4Addr, IP_PROTO_ICMP};
use crate::{NetDevice, NetError, NetStack};

const ECHO_REPLY: u8 = 0;
const ECHO_REQUEST: u8 = 8;
/// Identifier stamped into outgoing echo requests.
const PING_IDENT: u16 = 0x4259;
/// Default ping wait: two seconds.
const PING_TIMEOUT: u64 = 2 * TICKS_PER_SEC;

/// An outstanding echo request.
pub(crate) struct PendingPing {
    seq: u16,
    sent_tick: u64,
    reply_tick: Option<u64>,
}

impl NetStack {
    /// Sends an echo request and waits (bounded, ~2 s) for the reply.
    ///
    /// Returns the round-trip time in ticks.
    pub fn ping(
        &mut self,
        dev: &mut dyn NetDevice,
        clock: &dyn Clock,
        dst: Ipv4Addr,
    ) -> Result<u64, NetError> {
        self.arp_resolve(dev, clock, dst)?;

        let seq = self.icmp_seq;
        self.icmp_seq = self.icmp_seq.wrapping_add(1);
        let start = clock.now();
        self.ping = Some(PendingPing {
            seq,
            sent_tick: start,
            reply_tick: None,
        });

        let mut packet = [0u8; 40];
        packet[0] = ECHO_REQUEST;
        put_be16(&mut packet, 4, PING_IDENT);
        put_be16(&mut packet, 6, seq);
        // Payload: ascending bytes, conventional filler.
        for (i, b) in packet[8..].iter_mut().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let v = i as u8;
            *b = v;
        }
        let c = checksum(&packet);
        put_be16(&mut packet, 2, c);
        self.send_ipv4(dev, dst, IP_PROTO_ICMP, &packet, start)?;

        loop {
            let now = clock.now();
            if now.saturating_sub(start) > PING_TIMEOUT {
                self.ping = None;
                return Err(NetError::Timeout);
            }
            self.poll_device(dev, now);
            if let Some(pending) = &self.ping {
                if let Some(reply) = pending.reply_tick {
                    let rtt = reply.saturating_sub(pending.sent_tick);
                    self.ping = None;
                    return Ok(rtt);
                }
            }
            clock.relax();
        }
    }

    /// Handles a received ICMP packet: answers echo requests, matches
    /// echo replies against the pending ping.
    pub(crate) fn icmp_input(&mut self, dev: &mut dyn NetDevice, pkt: &Ipv4Packet<'_>, now: u64) {
        let data = pkt.payload;
        if data.len() < 8 || checksum(data) != 0 {
            self.counters.bad_checksum += 1;
            return;
        }
        match data[0] {
            ECHO_REQUEST => {
                let mut reply = [0u8; 1500];
                if data.len() > reply.len() {
                    return;
                }
                let reply = &mut reply[..data.len()];
                reply.copy_from_slice(data);
                reply[0] = ECHO_REPLY;
                reply[2] = 0;
                reply[3] = 0;
                let c = checksum(reply);
                put_be16(reply, 2, c);
                let _ = self.send_ipv4(dev, pkt.src, IP_PROTO_ICMP, reply, now);
            }
            ECHO_REPLY => {
                let ident = be16(data, 4);
                let seq = be16(data, 6);
                if let Some(pending) = &mut self.ping {
                    if ident == PING_IDENT && seq == pending.seq {
                        pending.reply_tick = Some(now);
                    }
                }
            }
            _ => self.counters.dropped += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testpeer::{standard_config, PeerDevice, TestClock, PEER_IP};

    #[test]
    fn ping_round_trips_against_peer() {
        let mut stack = NetStack::new(standard_config());
        let mut dev = PeerDevice::new();
        let clock = TestClock::new();
        let rtt = stack.ping(&mut dev, &clock, PEER_IP).unwrap();
        assert!(rtt <= PING_TIMEOUT);
    }

    #[test]
    fn ping_times_out_when_peer_drops_icmp() {
        let mut stack = NetStack::new(standard_config());
        let mut dev = PeerDevice::new();
        dev.drop_icmp();
        let clock = TestClock::new();
        assert!(matches!(
            stack.ping(&mut dev, &clock, PEER_IP),
            Err(NetError::Timeout)
        ));
    }

    #[test]
    fn echo_request_is_answered() {
        let mut stack = NetStack::new(standard_config());
        let mut dev = PeerDevice::new();
        dev.inject_ping_request();
        stack.poll_device(&mut dev, 1);
        assert!(dev.saw_echo_reply());
    }
}
