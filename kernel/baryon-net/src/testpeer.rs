//! A scripted peer host for the stack's unit tests.
//!
//! [`PeerDevice`] plays the NIC *and* the remote end of the wire: frames
//! the stack transmits are parsed and answered according to a small
//! script (ARP responder, ICMP echo, UDP echo on port 7, DNS server,
//! DHCP server, TCP echo on port 7, HTTP server on port 80), and the
//! answers queue up for the stack's next poll. [`TestClock`] advances a
//! tick per reading so bounded waits terminate quickly.

use std::collections::VecDeque;

use crate::checksum::{checksum, pseudo_checksum};
use crate::wire::{be16, be32, put_be16, put_be32, Ipv4Addr, MacAddr};
use crate::{NetConfig, NetDevice, NetError};

/// The peer's MAC address.
pub(crate) const PEER_MAC: MacAddr = MacAddr([0x52, 0x54, 0x00, 0x12, 0x34, 0x56]);
/// The peer's IPv4 address (also gateway and DNS server in tests).
pub(crate) const PEER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 2, 2);
/// The stack's MAC address as reported by the device.
pub(crate) const STACK_MAC: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
/// The stack's IPv4 address in [`standard_config`].
pub(crate) const STACK_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 2, 15);
/// The answer the canned DNS server gives for every name.
pub(crate) const CANNED_DNS_IP: Ipv4Addr = Ipv4Addr::new(93, 184, 216, 34);

const ETH: usize = 14;
const IP: usize = 20;

/// The usual test configuration: 10.0.2.15/24 behind the peer.
pub(crate) fn standard_config() -> NetConfig {
    NetConfig {
        ip: STACK_IP,
        netmask: Ipv4Addr::new(255, 255, 255, 0),
        gateway: PEER_IP,
        dns_server: PEER_IP,
    }
}

/// Auto-advancing tick source: each reading is one tick later.
pub(crate) struct TestClock {
    ticks: core::cell::Cell<u64>,
}

impl TestClock {
    pub(crate) fn new() -> Self {
        Self {
            ticks: core::cell::Cell::new(1),
        }
    }
}

impl crate::Clock for TestClock {
    fn now(&self) -> u64 {
        let t = self.ticks.get();
        self.ticks.set(t + 1);
        t
    }
}

/// Peer-side TCP bookkeeping for the single scripted connection.
#[derive(Default)]
struct PeerTcp {
    established: bool,
    /// Next sequence number the peer will send.
    seq: u32,
    /// Next sequence number the peer expects from the stack.
    ack: u32,
    /// Stack-side port of the connection.
    stack_port: u16,
    /// Peer-side (service) port.
    service_port: u16,
    sent_fin: bool,
}

pub(crate) struct PeerDevice {
    inbox: VecDeque<Vec<u8>>,
    sent: Vec<Vec<u8>>,
    silent: bool,
    blackhole_tcp: bool,
    drop_icmp: bool,
    drop_dns: bool,
    http_mode: bool,
    mute_http: bool,
    corrupt_dhcp_xid: bool,
    tcp: PeerTcp,
    tcp_flag_log: Vec<&'static str>,
    last_ack_seen: Option<u32>,
    saw_arp_reply: bool,
    saw_echo_reply: bool,
    saw_rst: bool,
    syn_acks_sent: usize,
    http_request: Option<String>,
    http_answered: bool,
}

impl PeerDevice {
    /// Fully scripted peer: ARP + ICMP + UDP/TCP echo + DNS + DHCP.
    pub(crate) fn new() -> Self {
        Self {
            inbox: VecDeque::new(),
            sent: Vec::new(),
            silent: false,
            blackhole_tcp: false,
            drop_icmp: false,
            drop_dns: false,
            http_mode: false,
            mute_http: false,
            corrupt_dhcp_xid: false,
            tcp: PeerTcp::default(),
            tcp_flag_log: Vec::new(),
            last_ack_seen: None,
            saw_arp_reply: false,
            saw_echo_reply: false,
            saw_rst: false,
            syn_acks_sent: 0,
            http_request: None,
            http_answered: false,
        }
    }

    /// A peer that records traffic but never answers.
    pub(crate) fn silent() -> Self {
        let mut p = Self::new();
        p.silent = true;
        p
    }

    /// A peer whose TCP service is an HTTP server on port 80.
    pub(crate) fn http() -> Self {
        let mut p = Self::new();
        p.http_mode = true;
        p
    }

    pub(crate) fn blackhole_tcp(&mut self) {
        self.blackhole_tcp = true;
    }

    pub(crate) fn drop_icmp(&mut self) {
        self.drop_icmp = true;
    }

    pub(crate) fn drop_dns(&mut self) {
        self.drop_dns = true;
    }

    pub(crate) fn mute_http(&mut self) {
        self.mute_http = true;
    }

    pub(crate) fn corrupt_dhcp_xid(&mut self) {
        self.corrupt_dhcp_xid = true;
    }

    pub(crate) fn last_sent(&self) -> Option<Vec<u8>> {
        self.sent.last().cloned()
    }

    pub(crate) fn saw_arp_reply(&self) -> bool {
        self.saw_arp_reply
    }

    pub(crate) fn saw_echo_reply(&self) -> bool {
        self.saw_echo_reply
    }

    pub(crate) fn saw_rst(&self) -> bool {
        self.saw_rst
    }

    pub(crate) fn tcp_flag_log(&self) -> Vec<&'static str> {
        self.tcp_flag_log.clone()
    }

    pub(crate) fn last_ack_seen(&self) -> Option<u32> {
        self.last_ack_seen
    }

    pub(crate) fn peer_syn_acks_sent(&self) -> usize {
        self.syn_acks_sent
    }

    pub(crate) fn http_request_seen(&self) -> Option<String> {
        self.http_request.clone()
    }

    // -----------------------------------------------------------------
    // Injection helpers (frames that arrive unprompted)
    // -----------------------------------------------------------------

    /// Queues an ARP request from the peer for the stack's address.
    pub(crate) fn inject_arp_request(&mut self) {
        let mut f = vec![0u8; 42];
        f[0..6].copy_from_slice(&MacAddr::BROADCAST.0);
        f[6..12].copy_from_slice(&PEER_MAC.0);
        put_be16(&mut f, 12, crate::wire::ETHERTYPE_ARP);
        put_be16(&mut f, 14, 1);
        put_be16(&mut f, 16, 0x0800);
        f[18] = 6;
        f[19] = 4;
        put_be16(&mut f, 20, 1);
        f[22..28].copy_from_slice(&PEER_MAC.0);
        f[28..32].copy_from_slice(&PEER_IP.0);
        f[38..42].copy_from_slice(&STACK_IP.0);
        self.inbox.push_back(f);
    }

    /// Queues an ICMP echo request from the peer.
    pub(crate) fn inject_ping_request(&mut self) {
        let mut icmp = vec![0u8; 16];
        icmp[0] = 8;
        put_be16(&mut icmp, 4, 0x7777);
        put_be16(&mut icmp, 6, 1);
        let c = checksum(&icmp);
        put_be16(&mut icmp, 2, c);
        let frame = build_ip_frame(1, PEER_IP, STACK_IP, &icmp);
        self.inbox.push_back(frame);
    }

    /// Queues a UDP datagram from the peer; `corrupt` breaks the
    /// checksum.
    pub(crate) fn inject_udp(&mut self, src_port: u16, dst_port: u16, payload: &[u8], corrupt: bool) {
        let mut frame = build_udp_frame(PEER_IP, STACK_IP, src_port, dst_port, payload);
        if corrupt {
            let len = frame.len();
            frame[len - 1] ^= 0xFF;
        }
        self.inbox.push_back(frame);
    }

    /// Queues a TCP data segment from the peer's service port.
    pub(crate) fn inject_tcp_data(&mut self, ports: (u16, u16), seq: u32, payload: &[u8]) {
        let frame = build_tcp_frame(
            PEER_IP, STACK_IP, ports.0, ports.1, seq, 0, 0x18, // PSH|ACK
            payload,
        );
        self.inbox.push_back(frame);
    }

    /// The peer actively opens a connection to the stack's `port`.
    pub(crate) fn peer_connect(&mut self, port: u16, iss: u32) {
        self.tcp.stack_port = port;
        self.tcp.service_port = 3333;
        self.tcp.seq = iss.wrapping_add(1);
        let frame = build_tcp_frame(PEER_IP, STACK_IP, 3333, port, iss, 0, 0x02, &[]);
        self.inbox.push_back(frame);
    }

    /// The peer closes its half of the scripted connection.
    ///
    /// `state` is `(seq, ack)` from the stack's perspective: the peer
    /// sends FIN with `seq = stack.rcv_nxt` acking `stack.snd_nxt`.
    pub(crate) fn peer_close(&mut self, ports: (u16, u16), state: (u32, u32)) {
        let (seq, ack) = state;
        self.tcp.seq = seq.wrapping_add(1);
        self.tcp.ack = ack;
        self.tcp.sent_fin = true;
        let frame = build_tcp_frame(PEER_IP, STACK_IP, ports.0, ports.1, seq, ack, 0x11, &[]);
        self.inbox.push_back(frame);
    }

    // -----------------------------------------------------------------
    // The script: react to frames the stack transmits
    // -----------------------------------------------------------------

    fn handle(&mut self, frame: &[u8]) {
        if frame.len() < ETH {
            return;
        }
        match be16(frame, 12) {
            crate::wire::ETHERTYPE_ARP => self.handle_arp(frame),
            crate::wire::ETHERTYPE_IPV4 => self.handle_ipv4(frame),
            _ => {}
        }
    }

    fn handle_arp(&mut self, frame: &[u8]) {
        if frame.len() < 42 {
            return;
        }
        match be16(frame, 20) {
            1 if !self.silent => {
                // Answer for whatever address was asked; the peer plays
                // every host on the segment.
                let mut asked = Ipv4Addr::UNSPECIFIED;
                asked.0.copy_from_slice(&frame[38..42]);
                let mut sender_ip = Ipv4Addr::UNSPECIFIED;
                sender_ip.0.copy_from_slice(&frame[28..32]);

                let mut f = vec![0u8; 42];
                f[0..6].copy_from_slice(&STACK_MAC.0);
                f[6..12].copy_from_slice(&PEER_MAC.0);
                put_be16(&mut f, 12, crate::wire::ETHERTYPE_ARP);
                put_be16(&mut f, 14, 1);
                put_be16(&mut f, 16, 0x0800);
                f[18] = 6;
                f[19] = 4;
                put_be16(&mut f, 20, 2);
                f[22..28].copy_from_slice(&PEER_MAC.0);
                f[28..32].copy_from_slice(&asked.0);
                f[32..38].copy_from_slice(&frame[22..28]);
                f[38..42].copy_from_slice(&sender_ip.0);
                self.inbox.push_back(f);
            }
            2 => self.saw_arp_reply = true,
            _ => {}
        }
    }

    fn handle_ipv4(&mut self, frame: &[u8]) {
        let Some(pkt) = crate::ipv4::parse(frame) else {
            return;
        };
        if pkt.dst != PEER_IP && pkt.dst != Ipv4Addr::BROADCAST {
            return;
        }
        // Copy the payload so the borrow on `frame` ends here.
        let payload = pkt.payload.to_vec();
        let src = pkt.src;
        match pkt.proto {
            1 => self.script_icmp(&payload, src),
            17 => self.script_udp(&payload, src),
            6 => self.script_tcp(&payload, src),
            _ => {}
        }
    }

    fn script_icmp(&mut self, icmp: &[u8], src: Ipv4Addr) {
        if icmp.len() < 8 {
            return;
        }
        match icmp[0] {
            8 if !self.drop_icmp && !self.silent => {
                let mut reply = icmp.to_vec();
                reply[0] = 0;
                reply[2] = 0;
                reply[3] = 0;
                let c = checksum(&reply);
                put_be16(&mut reply, 2, c);
                let frame = build_ip_frame(1, PEER_IP, src, &reply);
                self.inbox.push_back(frame);
            }
            0 => self.saw_echo_reply = true,
            _ => {}
        }
    }

    fn script_udp(&mut self, udp: &[u8], src: Ipv4Addr) {
        if udp.len() < 8 || self.silent {
            return;
        }
        let src_port = be16(udp, 0);
        let dst_port = be16(udp, 2);
        let payload = &udp[8..];
        match dst_port {
            53 if !self.drop_dns => {
                // The response reuses the query's header and question,
                // so the transaction id matches automatically.
                let mut resp = payload.to_vec();
                put_be16(&mut resp, 2, 0x8180);
                put_be16(&mut resp, 6, 1);
                resp.extend_from_slice(&[0xC0, 12]);
                resp.extend_from_slice(&1u16.to_be_bytes()); // type A
                resp.extend_from_slice(&1u16.to_be_bytes()); // class IN
                resp.extend_from_slice(&[0, 0, 1, 0]); // ttl
                resp.extend_from_slice(&4u16.to_be_bytes());
                resp.extend_from_slice(&CANNED_DNS_IP.0);
                let frame = build_udp_frame(PEER_IP, src, 53, src_port, &resp);
                self.inbox.push_back(frame);
            }
            67 => self.script_dhcp(payload),
            7 => {
                let frame = build_udp_frame(PEER_IP, src, 7, src_port, payload);
                self.inbox.push_back(frame);
            }
            _ => {}
        }
    }

    fn script_dhcp(&mut self, bootp: &[u8]) {
        if bootp.len() < 240 {
            return;
        }
        let mut xid = be32(bootp, 4);
        if self.corrupt_dhcp_xid {
            xid ^= 0xFFFF;
        }
        // Find the message type option.
        let mut msg_type = 0u8;
        let mut at = 240;
        while at + 1 < bootp.len() {
            let code = bootp[at];
            if code == 255 {
                break;
            }
            if code == 0 {
                at += 1;
                continue;
            }
            let len = usize::from(bootp[at + 1]);
            if code == 53 && len == 1 {
                msg_type = bootp[at + 2];
            }
            at += 2 + len;
        }

        let reply_type = match msg_type {
            1 => 2, // DISCOVER -> OFFER
            3 => 5, // REQUEST -> ACK
            _ => return,
        };

        let mut reply = vec![0u8; 300];
        reply[0] = 2; // BOOTREPLY
        reply[1] = 1;
        reply[2] = 6;
        put_be32(&mut reply, 4, xid);
        reply[16..20].copy_from_slice(&STACK_IP.0); // yiaddr
        put_be32(&mut reply, 236, 0x6382_5363);
        let mut at = 240;
        for (code, value) in [
            (53u8, &[reply_type][..]),
            (54, &PEER_IP.0[..]),
            (1, &[255, 255, 255, 0][..]),
            (3, &PEER_IP.0[..]),
            (6, &PEER_IP.0[..]),
        ] {
            reply[at] = code;
            reply[at + 1] = value.len() as u8;
            reply[at + 2..at + 2 + value.len()].copy_from_slice(value);
            at += 2 + value.len();
        }
        reply[at] = 255;
        reply.truncate(at + 1);

        let frame = build_udp_frame(PEER_IP, Ipv4Addr::BROADCAST, 67, 68, &reply);
        self.inbox.push_back(frame);
    }

    fn script_tcp(&mut self, seg: &[u8], src: Ipv4Addr) {
        if seg.len() < 20 {
            return;
        }
        let src_port = be16(seg, 0);
        let dst_port = be16(seg, 2);
        let seq = be32(seg, 4);
        let ack = be32(seg, 8);
        let flags = seg[13];
        let offset = usize::from(seg[12] >> 4) * 4;
        let payload = &seg[offset.min(seg.len())..];

        // Bookkeeping for the tests' assertions.
        const FIN: u8 = 0x01;
        const SYN: u8 = 0x02;
        const RST: u8 = 0x04;
        const ACKF: u8 = 0x10;
        self.tcp_flag_log.push(match (flags & SYN != 0, flags & ACKF != 0) {
            _ if flags & RST != 0 => "RST",
            _ if flags & FIN != 0 => "FIN",
            (true, false) => "SYN",
            (true, true) => "SYN+ACK",
            _ if !payload.is_empty() => "DATA",
            _ => "ACK",
        });
        if flags & ACKF != 0 {
            self.last_ack_seen = Some(ack);
        }
        if flags & RST != 0 {
            self.saw_rst = true;
            return;
        }
        if self.silent || self.blackhole_tcp {
            return;
        }

        let service = if self.http_mode { 80 } else { 7 };

        if flags & SYN != 0 && flags & ACKF == 0 {
            // Active open from the stack.
            if dst_port == service {
                self.tcp = PeerTcp {
                    established: true,
                    seq: 0x1000_0001,
                    ack: seq.wrapping_add(1),
                    stack_port: src_port,
                    service_port: dst_port,
                    sent_fin: false,
                };
                let f = build_tcp_frame(
                    PEER_IP,
                    src,
                    dst_port,
                    src_port,
                    0x1000_0000,
                    seq.wrapping_add(1),
                    0x12, // SYN|ACK
                    &[],
                );
                self.syn_acks_sent += 1;
                self.inbox.push_back(f);
            } else {
                let f = build_tcp_frame(
                    PEER_IP,
                    src,
                    dst_port,
                    src_port,
                    0,
                    seq.wrapping_add(1),
                    0x14, // RST|ACK
                    &[],
                );
                self.inbox.push_back(f);
            }
            return;
        }

        if flags & SYN != 0 && flags & ACKF != 0 {
            // The stack accepted our active open: complete with an ACK.
            self.tcp.established = true;
            self.tcp.ack = seq.wrapping_add(1);
            let f = build_tcp_frame(
                PEER_IP,
                src,
                self.tcp.service_port,
                self.tcp.stack_port,
                self.tcp.seq,
                self.tcp.ack,
                0x10,
                &[],
            );
            self.inbox.push_back(f);
            return;
        }

        if !payload.is_empty() && seq == self.tcp.ack {
            #[allow(clippy::cast_possible_truncation)]
            let len = payload.len() as u32;
            self.tcp.ack = self.tcp.ack.wrapping_add(len);
            // ACK the data.
            let f = build_tcp_frame(
                PEER_IP,
                src,
                dst_port,
                src_port,
                self.tcp.seq,
                self.tcp.ack,
                0x10,
                &[],
            );
            self.inbox.push_back(f);

            if self.http_mode {
                self.http_request = Some(String::from_utf8_lossy(payload).into_owned());
                if !self.mute_http && !self.http_answered {
                    self.http_answered = true;
                    let body = b"HTTP/1.0 200 OK\r\nContent-Length: 13\r\n\r\nHello, Baryon";
                    let f = build_tcp_frame(
                        PEER_IP,
                        src,
                        dst_port,
                        src_port,
                        self.tcp.seq,
                        self.tcp.ack,
                        0x18,
                        body,
                    );
                    self.inbox.push_back(f);
                    #[allow(clippy::cast_possible_truncation)]
                    let blen = body.len() as u32;
                    self.tcp.seq = self.tcp.seq.wrapping_add(blen);
                    // Close after the response.
                    let fin = build_tcp_frame(
                        PEER_IP,
                        src,
                        dst_port,
                        src_port,
                        self.tcp.seq,
                        self.tcp.ack,
                        0x11,
                        &[],
                    );
                    self.inbox.push_back(fin);
                    self.tcp.seq = self.tcp.seq.wrapping_add(1);
                    self.tcp.sent_fin = true;
                }
            } else {
                // Echo service.
                let f = build_tcp_frame(
                    PEER_IP,
                    src,
                    dst_port,
                    src_port,
                    self.tcp.seq,
                    self.tcp.ack,
                    0x18,
                    payload,
                );
                self.inbox.push_back(f);
                self.tcp.seq = self.tcp.seq.wrapping_add(len);
            }
            return;
        }

        if flags & FIN != 0 {
            #[allow(clippy::cast_possible_truncation)]
            let advance = payload.len() as u32 + 1;
            self.tcp.ack = self.tcp.ack.wrapping_add(advance);
            let f = build_tcp_frame(
                PEER_IP,
                src,
                dst_port,
                src_port,
                self.tcp.seq,
                self.tcp.ack,
                0x10,
                &[],
            );
            self.inbox.push_back(f);
            if !self.tcp.sent_fin {
                let fin = build_tcp_frame(
                    PEER_IP,
                    src,
                    dst_port,
                    src_port,
                    self.tcp.seq,
                    self.tcp.ack,
                    0x11,
                    &[],
                );
                self.inbox.push_back(fin);
                self.tcp.seq = self.tcp.seq.wrapping_add(1);
                self.tcp.sent_fin = true;
            }
        }
    }
}

impl NetDevice for PeerDevice {
    fn mac(&self) -> MacAddr {
        STACK_MAC
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), NetError> {
        self.sent.push(frame.to_vec());
        let copy = frame.to_vec();
        self.handle(&copy);
        Ok(())
    }

    fn poll(&mut self, buf: &mut [u8]) -> Option<usize> {
        let frame = self.inbox.pop_front()?;
        let n = frame.len().min(buf.len());
        buf[..n].copy_from_slice(&frame[..n]);
        Some(n)
    }
}

// ---------------------------------------------------------------------
// Frame builders (peer -> stack direction)
// ---------------------------------------------------------------------

fn build_ip_frame(proto: u8, src: Ipv4Addr, dst: Ipv4Addr, payload: &[u8]) -> Vec<u8> {
    let mut f = vec![0u8; ETH + IP + payload.len()];
    f[0..6].copy_from_slice(&STACK_MAC.0);
    f[6..12].copy_from_slice(&PEER_MAC.0);
    put_be16(&mut f, 12, crate::wire::ETHERTYPE_IPV4);
    let ip = &mut f[ETH..];
    ip[0] = 0x45;
    #[allow(clippy::cast_possible_truncation)]
    let total = (IP + payload.len()) as u16;
    put_be16(ip, 2, total);
    put_be16(ip, 6, 0x4000);
    ip[8] = 64;
    ip[9] = proto;
    ip[12..16].copy_from_slice(&src.0);
    ip[16..20].copy_from_slice(&dst.0);
    let c = checksum(&ip[..IP]);
    put_be16(ip, 10, c);
    ip[IP..].copy_from_slice(payload);
    f
}

fn build_udp_frame(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    payload: &[u8],
) -> Vec<u8> {
    let mut udp = vec![0u8; 8 + payload.len()];
    put_be16(&mut udp, 0, src_port);
    put_be16(&mut udp, 2, dst_port);
    #[allow(clippy::cast_possible_truncation)]
    let len = udp.len() as u16;
    put_be16(&mut udp, 4, len);
    udp[8..].copy_from_slice(payload);
    let c = pseudo_checksum(src, dst, 17, &udp);
    put_be16(&mut udp, 6, if c == 0 { 0xFFFF } else { c });
    build_ip_frame(17, src, dst, &udp)
}

#[allow(clippy::too_many_arguments)]
fn build_tcp_frame(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    seq: u32,
    ack: u32,
    flags: u8,
    payload: &[u8],
) -> Vec<u8> {
    let mut seg = vec![0u8; 20 + payload.len()];
    put_be16(&mut seg, 0, src_port);
    put_be16(&mut seg, 2, dst_port);
    put_be32(&mut seg, 4, seq);
    put_be32(&mut seg, 8, ack);
    seg[12] = 5 << 4;
    seg[13] = flags;
    put_be16(&mut seg, 14, 8192);
    seg[20..].copy_from_slice(payload);
    let c = pseudo_checksum(src, dst, 6, &seg);
    put_be16(&mut seg, 16, c);
    build_ip_frame(6, src, dst, &seg)
}
