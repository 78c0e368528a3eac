//! TCP: the eleven-state machine, send/receive rings, retransmission.
//!
//! Sequence arithmetic is modular 32-bit with signed-difference
//! comparison. Out-of-order segments ahead of `rcv.nxt` are dropped (no
//! reassembly queue); a duplicate ACK prods the peer to retransmit. The
//! advertised window is the free space of the receive ring.

use alloc::vec::Vec;

use baryon_core::{kdebug, kwarn};
use bitflags::bitflags;
use planck_noalloc::ringbuf::RingBuf;

use crate::checksum::pseudo_checksum;
use crate::device::{Clock, TICKS_PER_SEC};
use crate::ipv4::Ipv4Packet;
use crate::wire::{be16, be32, put_be16, put_be32, Ipv4Addr, IP_PROTO_TCP};
use crate::{NetDevice, NetError, NetStack};

/// Maximum concurrent connections.
pub(crate) const MAX_CONNS: usize = 16;
/// Maximum listening ports.
const MAX_LISTENERS: usize = 8;
/// Default maximum segment size.
pub const TCP_MSS: usize = 1460;
/// Send/receive ring capacity (bytes).
const RING_SIZE: usize = 4096;
/// Retransmit after three seconds unacked.
const RETX_TIMEOUT: u64 = 3 * TICKS_PER_SEC;
/// Retransmissions before the connection is reset.
const RETX_MAX: u8 = 5;
/// TIME-WAIT lingers for one minute.
const TIME_WAIT_TICKS: u64 = 60 * TICKS_PER_SEC;
/// Bounded wait for the three-way handshake: five seconds.
const CONNECT_TIMEOUT: u64 = 5 * TICKS_PER_SEC;
/// TCP header length without options.
const TCP_HLEN: usize = 20;

bitflags! {
    /// TCP header flag bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct TcpFlags: u8 {
        const FIN = 1 << 0;
        const SYN = 1 << 1;
        const RST = 1 << 2;
        const PSH = 1 << 3;
        const ACK = 1 << 4;
    }
}

/// The BSD connection states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    /// No connection.
    Closed,
    /// Passive open, waiting for a SYN.
    Listen,
    /// Active open, SYN sent.
    SynSent,
    /// Passive open, SYN received and answered.
    SynReceived,
    /// Data flows.
    Established,
    /// Our FIN sent, waiting for its ACK.
    FinWait1,
    /// Our FIN acked, waiting for the peer's FIN.
    FinWait2,
    /// Peer's FIN received while we are still open.
    CloseWait,
    /// Both FINs in flight, ours unacked.
    Closing,
    /// Passive close, our FIN sent.
    LastAck,
    /// Both sides closed; linger before reuse.
    TimeWait,
}

/// Stable index of a connection slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnId(pub(crate) u8);

impl ConnId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// `a < b` in sequence space.
fn seq_lt(a: u32, b: u32) -> bool {
    #[allow(clippy::cast_possible_wrap)]
    let d = a.wrapping_sub(b) as i32;
    d < 0
}

/// `a <= b` in sequence space.
fn seq_le(a: u32, b: u32) -> bool {
    a == b || seq_lt(a, b)
}

/// One connection.
pub(crate) struct TcpConn {
    pub state: TcpState,
    pub local_port: u16,
    pub remote_ip: Ipv4Addr,
    pub remote_port: u16,
    /// Next sequence number to send.
    pub snd_nxt: u32,
    /// Oldest unacknowledged sequence number.
    pub snd_una: u32,
    /// Next sequence number expected from the peer.
    pub rcv_nxt: u32,
    /// Bytes sent but not yet acknowledged; retransmission source.
    unacked: Vec<u8>,
    /// In-order received bytes awaiting the application.
    recv: RingBuf<u8, RING_SIZE>,
    /// Tick of the last (re)transmission carrying unacked data.
    last_send_tick: u64,
    retries: u8,
    /// Peer's advertised window.
    peer_window: u16,
    /// Connection was reset by the peer.
    pub reset: bool,
    /// Peer's FIN has been consumed (no more data will arrive).
    peer_closed: bool,
    /// Created by a passive open.
    passive: bool,
}

impl TcpConn {
    fn new(local_port: u16, remote_ip: Ipv4Addr, remote_port: u16, iss: u32) -> Self {
        Self {
            state: TcpState::Closed,
            local_port,
            remote_ip,
            remote_port,
            snd_nxt: iss,
            snd_una: iss,
            rcv_nxt: 0,
            unacked: Vec::new(),
            recv: RingBuf::new(),
            last_send_tick: 0,
            retries: 0,
            peer_window: 0,
            reset: false,
            peer_closed: false,
            passive: false,
        }
    }

    /// Free space in the receive ring, advertised as our window.
    fn window(&self) -> u16 {
        #[allow(clippy::cast_possible_truncation)]
        let free = (self.recv.max_capacity() - self.recv.len()) as u16;
        free
    }
}

/// Connection table plus listening ports.
pub(crate) struct TcpTable {
    conns: [Option<TcpConn>; MAX_CONNS],
    listeners: [Option<u16>; MAX_LISTENERS],
    iss: u32,
}

impl TcpTable {
    pub(crate) const fn new() -> Self {
        Self {
            conns: [const { None }; MAX_CONNS],
            listeners: [None; MAX_LISTENERS],
            iss: 0x0001_0000,
        }
    }

    fn next_iss(&mut self) -> u32 {
        // Deterministic but spaced; there is no entropy source this
        // early and connections are single-homed.
        self.iss = self.iss.wrapping_add(0x0002_4000);
        self.iss
    }

    fn alloc(&mut self, conn: TcpConn) -> Option<ConnId> {
        let slot = self.conns.iter().position(Option::is_none)?;
        self.conns[slot] = Some(conn);
        #[allow(clippy::cast_possible_truncation)]
        let id = ConnId(slot as u8);
        Some(id)
    }

    fn find(&mut self, remote_ip: Ipv4Addr, remote_port: u16, local_port: u16) -> Option<usize> {
        self.conns.iter().position(|slot| {
            slot.as_ref().is_some_and(|c| {
                c.remote_ip == remote_ip
                    && c.remote_port == remote_port
                    && c.local_port == local_port
                    && c.state != TcpState::Closed
            })
        })
    }
}

/// A parsed incoming segment.
struct Segment<'a> {
    src_port: u16,
    dst_port: u16,
    seq: u32,
    ack: u32,
    flags: TcpFlags,
    window: u16,
    payload: &'a [u8],
}

fn parse_segment<'a>(pkt: &Ipv4Packet<'a>) -> Option<Segment<'a>> {
    let data = pkt.payload;
    if data.len() < TCP_HLEN {
        return None;
    }
    if pseudo_checksum(pkt.src, pkt.dst, IP_PROTO_TCP, data) != 0 {
        return None;
    }
    let offset = usize::from(data[12] >> 4) * 4;
    if offset < TCP_HLEN || offset > data.len() {
        return None;
    }
    Some(Segment {
        src_port: be16(data, 0),
        dst_port: be16(data, 2),
        seq: be32(data, 4),
        ack: be32(data, 8),
        flags: TcpFlags::from_bits_truncate(data[13]),
        window: be16(data, 14),
        payload: &data[offset..],
    })
}

impl NetStack {
    /// Current state of a connection slot, if any.
    #[must_use]
    pub fn tcp_state(&self, id: ConnId) -> Option<TcpState> {
        self.tcp.conns[id.index()].as_ref().map(|c| c.state)
    }

    /// Registers a listening port for passive opens.
    pub fn tcp_listen(&mut self, port: u16) -> Result<(), NetError> {
        if self.tcp.listeners.iter().any(|l| *l == Some(port)) {
            return Ok(());
        }
        let slot = self
            .tcp
            .listeners
            .iter()
            .position(Option::is_none)
            .ok_or(NetError::BufferFull)?;
        self.tcp.listeners[slot] = Some(port);
        Ok(())
    }

    /// Returns an established passive connection on `port`, if one is
    /// waiting to be claimed.
    pub fn tcp_take_accepted(&mut self, port: u16) -> Option<ConnId> {
        for (i, slot) in self.tcp.conns.iter_mut().enumerate() {
            if let Some(conn) = slot {
                if conn.passive && conn.state == TcpState::Established && conn.local_port == port {
                    conn.passive = false;
                    #[allow(clippy::cast_possible_truncation)]
                    let id = ConnId(i as u8);
                    return Some(id);
                }
            }
        }
        None
    }

    /// Active open: Closed -> SYN-SENT -> Established, bounded to about
    /// five seconds.
    pub fn tcp_connect(
        &mut self,
        dev: &mut dyn NetDevice,
        clock: &dyn Clock,
        remote_ip: Ipv4Addr,
        remote_port: u16,
    ) -> Result<ConnId, NetError> {
        self.arp_resolve(dev, clock, remote_ip)?;

        let local_port = self.next_ephemeral();
        let iss = self.tcp.next_iss();
        let mut conn = TcpConn::new(local_port, remote_ip, remote_port, iss);
        conn.state = TcpState::SynSent;
        conn.snd_nxt = iss.wrapping_add(1);
        let start = clock.now();
        conn.last_send_tick = start;
        let window = conn.window();
        let id = self.tcp.alloc(conn).ok_or(NetError::BufferFull)?;

        self.send_tcp(
            dev, remote_ip, local_port, remote_port, iss, 0, TcpFlags::SYN, window, &[], start,
        )?;

        loop {
            let now = clock.now();
            if now.saturating_sub(start) > CONNECT_TIMEOUT {
                self.tcp.conns[id.index()] = None;
                return Err(NetError::Timeout);
            }
            self.poll_device(dev, now);
            match self.tcp.conns[id.index()].as_ref() {
                None => return Err(NetError::ConnectionRefused),
                Some(c) if c.reset => {
                    self.tcp.conns[id.index()] = None;
                    return Err(NetError::ConnectionRefused);
                }
                Some(c) if c.state == TcpState::Established => return Ok(id),
                Some(_) => {}
            }
            clock.relax();
        }
    }

    /// Queues and transmits data on an established connection.
    ///
    /// Returns the number of bytes accepted, bounded by the unacked
    /// buffer and the peer's window.
    pub fn tcp_send(
        &mut self,
        dev: &mut dyn NetDevice,
        id: ConnId,
        data: &[u8],
        now: u64,
    ) -> Result<usize, NetError> {
        let (remote_ip, local_port, remote_port, mut seq, ack, window, budget) = {
            let conn = self.tcp.conns[id.index()].as_mut().ok_or(NetError::Param)?;
            if conn.reset {
                return Err(NetError::ConnectionReset);
            }
            if conn.state != TcpState::Established && conn.state != TcpState::CloseWait {
                return Err(NetError::Param);
            }
            let room = RING_SIZE.saturating_sub(conn.unacked.len());
            let budget = data.len().min(room).min(usize::from(conn.peer_window).max(TCP_MSS));
            (
                conn.remote_ip,
                conn.local_port,
                conn.remote_port,
                conn.snd_nxt,
                conn.rcv_nxt,
                conn.window(),
                budget,
            )
        };
        if budget == 0 {
            return Err(NetError::BufferFull);
        }

        let mut sent = 0usize;
        while sent < budget {
            let chunk = (budget - sent).min(TCP_MSS);
            self.send_tcp(
                dev,
                remote_ip,
                local_port,
                remote_port,
                seq,
                ack,
                TcpFlags::ACK | TcpFlags::PSH,
                window,
                &data[sent..sent + chunk],
                now,
            )?;
            #[allow(clippy::cast_possible_truncation)]
            let chunk32 = chunk as u32;
            seq = seq.wrapping_add(chunk32);
            sent += chunk;
        }

        let conn = self.tcp.conns[id.index()].as_mut().ok_or(NetError::Param)?;
        conn.unacked.extend_from_slice(&data[..sent]);
        conn.snd_nxt = seq;
        conn.last_send_tick = now;
        conn.retries = 0;
        Ok(sent)
    }

    /// Drains received bytes into `out`. Returns 0 when nothing is
    /// pending; [`NetError::ConnectionReset`] after an RST.
    pub fn tcp_recv(&mut self, id: ConnId, out: &mut [u8]) -> Result<usize, NetError> {
        let conn = self.tcp.conns[id.index()].as_mut().ok_or(NetError::Param)?;
        if conn.reset {
            return Err(NetError::ConnectionReset);
        }
        let mut n = 0;
        while n < out.len() {
            match conn.recv.pop() {
                Some(b) => {
                    out[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    /// True once the peer has closed and all its data has been drained.
    #[must_use]
    pub fn tcp_peer_closed(&self, id: ConnId) -> bool {
        self.tcp.conns[id.index()]
            .as_ref()
            .is_none_or(|c| c.peer_closed && c.recv.is_empty())
    }

    /// Initiates close. From Established this sends FIN and enters
    /// FIN-WAIT-1; from CLOSE-WAIT it sends FIN and enters LAST-ACK.
    pub fn tcp_close(&mut self, dev: &mut dyn NetDevice, id: ConnId, now: u64) {
        let Some(conn) = self.tcp.conns[id.index()].as_mut() else {
            return;
        };
        let (remote_ip, local_port, remote_port) =
            (conn.remote_ip, conn.local_port, conn.remote_port);
        let (seq, ack, window) = (conn.snd_nxt, conn.rcv_nxt, conn.window());
        match conn.state {
            TcpState::Established => {
                conn.state = TcpState::FinWait1;
                conn.snd_nxt = conn.snd_nxt.wrapping_add(1);
                conn.last_send_tick = now;
                let _ = self.send_tcp(
                    dev,
                    remote_ip,
                    local_port,
                    remote_port,
                    seq,
                    ack,
                    TcpFlags::FIN | TcpFlags::ACK,
                    window,
                    &[],
                    now,
                );
            }
            TcpState::CloseWait => {
                conn.state = TcpState::LastAck;
                conn.snd_nxt = conn.snd_nxt.wrapping_add(1);
                conn.last_send_tick = now;
                let _ = self.send_tcp(
                    dev,
                    remote_ip,
                    local_port,
                    remote_port,
                    seq,
                    ack,
                    TcpFlags::FIN | TcpFlags::ACK,
                    window,
                    &[],
                    now,
                );
            }
            TcpState::SynSent | TcpState::Listen => {
                self.tcp.conns[id.index()] = None;
            }
            _ => {}
        }
    }

    /// Handles a received segment.
    pub(crate) fn tcp_input(&mut self, dev: &mut dyn NetDevice, pkt: &Ipv4Packet<'_>, now: u64) {
        let Some(seg) = parse_segment(pkt) else {
            self.counters.bad_checksum += 1;
            return;
        };

        let Some(idx) = self.tcp.find(pkt.src, seg.src_port, seg.dst_port) else {
            self.tcp_no_connection(dev, pkt, &seg, now);
            return;
        };

        if seg.flags.contains(TcpFlags::RST) {
            kwarn!("tcp: connection reset by {}", pkt.src);
            let conn = self.tcp.conns[idx].as_mut().expect("slot checked");
            conn.reset = true;
            conn.state = TcpState::Closed;
            return;
        }

        // Split borrow: everything below works on the connection and
        // collects the replies to send after the borrow ends.
        let mut reply: Option<(TcpFlags, u32, u32)> = None; // (flags, seq, ack)
        let mut free_slot = false;
        {
            let conn = self.tcp.conns[idx].as_mut().expect("slot checked");
            conn.peer_window = seg.window;

            match conn.state {
                TcpState::SynSent => {
                    if seg.flags.contains(TcpFlags::SYN | TcpFlags::ACK)
                        && seg.ack == conn.snd_nxt
                    {
                        conn.rcv_nxt = seg.seq.wrapping_add(1);
                        conn.snd_una = seg.ack;
                        conn.state = TcpState::Established;
                        reply = Some((TcpFlags::ACK, conn.snd_nxt, conn.rcv_nxt));
                    } else if seg.flags.contains(TcpFlags::ACK) {
                        // A naked ACK for our SYN: answer with RST.
                        reply = Some((TcpFlags::RST, seg.ack, 0));
                        conn.reset = true;
                        conn.state = TcpState::Closed;
                    }
                }
                TcpState::SynReceived => {
                    if seg.flags.contains(TcpFlags::ACK) && seg.ack == conn.snd_nxt {
                        conn.snd_una = seg.ack;
                        conn.state = TcpState::Established;
                    }
                }
                TcpState::Listen | TcpState::Closed | TcpState::TimeWait => {}
                _ => {
                    // Data-bearing states share ACK, payload and FIN
                    // processing.
                    if seg.flags.contains(TcpFlags::ACK)
                        && seq_lt(conn.snd_una, seg.ack)
                        && seq_le(seg.ack, conn.snd_nxt)
                    {
                        let acked = seg.ack.wrapping_sub(conn.snd_una) as usize;
                        let drop = acked.min(conn.unacked.len());
                        conn.unacked.drain(..drop);
                        conn.snd_una = seg.ack;
                        conn.retries = 0;

                        // FIN-WAIT-1: the ACK may cover our FIN.
                        if conn.state == TcpState::FinWait1 && seg.ack == conn.snd_nxt {
                            conn.state = TcpState::FinWait2;
                        } else if conn.state == TcpState::Closing && seg.ack == conn.snd_nxt {
                            conn.state = TcpState::TimeWait;
                            conn.last_send_tick = now;
                        } else if conn.state == TcpState::LastAck && seg.ack == conn.snd_nxt {
                            free_slot = true;
                        }
                    }

                    if !seg.payload.is_empty() && !free_slot {
                        if seg.seq == conn.rcv_nxt {
                            let mut accepted = 0u32;
                            for &b in seg.payload {
                                if conn.recv.try_push(b).is_err() {
                                    break;
                                }
                                accepted += 1;
                            }
                            conn.rcv_nxt = conn.rcv_nxt.wrapping_add(accepted);
                            reply = Some((TcpFlags::ACK, conn.snd_nxt, conn.rcv_nxt));
                        } else {
                            // Out of order: dropped by design; a
                            // duplicate ACK tells the peer where we are.
                            kdebug!(
                                "tcp: out-of-order seq {} (expected {})",
                                seg.seq,
                                conn.rcv_nxt
                            );
                            reply = Some((TcpFlags::ACK, conn.snd_nxt, conn.rcv_nxt));
                        }
                    }

                    #[allow(clippy::cast_possible_truncation)]
                    let payload_len = seg.payload.len() as u32;
                    if seg.flags.contains(TcpFlags::FIN)
                        && !free_slot
                        && seg.seq.wrapping_add(payload_len) == conn.rcv_nxt
                    {
                        conn.rcv_nxt = conn.rcv_nxt.wrapping_add(1);
                        conn.peer_closed = true;
                        conn.state = match conn.state {
                            TcpState::Established => TcpState::CloseWait,
                            TcpState::FinWait1 => {
                                conn.last_send_tick = now;
                                TcpState::Closing
                            }
                            TcpState::FinWait2 => {
                                conn.last_send_tick = now;
                                TcpState::TimeWait
                            }
                            other => other,
                        };
                        reply = Some((TcpFlags::ACK, conn.snd_nxt, conn.rcv_nxt));
                    }
                }
            }
        }

        let (remote_ip, local_port, remote_port, window) = {
            let conn = self.tcp.conns[idx].as_ref().expect("slot checked");
            (
                conn.remote_ip,
                conn.local_port,
                conn.remote_port,
                conn.window(),
            )
        };
        if let Some((flags, seq, ack)) = reply {
            let _ = self.send_tcp(
                dev, remote_ip, local_port, remote_port, seq, ack, flags, window, &[], now,
            );
        }
        if free_slot {
            self.tcp.conns[idx] = None;
        }
    }

    /// Segment without a matching connection: passive open on a
    /// listening port, RST for everything else.
    fn tcp_no_connection(
        &mut self,
        dev: &mut dyn NetDevice,
        pkt: &Ipv4Packet<'_>,
        seg: &Segment<'_>,
        now: u64,
    ) {
        let is_syn = seg.flags.contains(TcpFlags::SYN) && !seg.flags.contains(TcpFlags::ACK);
        let listening = self.tcp.listeners.iter().any(|l| *l == Some(seg.dst_port));

        if is_syn && listening {
            let iss = self.tcp.next_iss();
            let mut conn = TcpConn::new(seg.dst_port, pkt.src, seg.src_port, iss);
            conn.state = TcpState::SynReceived;
            conn.rcv_nxt = seg.seq.wrapping_add(1);
            conn.snd_nxt = iss.wrapping_add(1);
            conn.peer_window = seg.window;
            conn.passive = true;
            conn.last_send_tick = now;
            let window = conn.window();
            let rcv_nxt = conn.rcv_nxt;
            if self.tcp.alloc(conn).is_some() {
                let _ = self.send_tcp(
                    dev,
                    pkt.src,
                    seg.dst_port,
                    seg.src_port,
                    iss,
                    rcv_nxt,
                    TcpFlags::SYN | TcpFlags::ACK,
                    window,
                    &[],
                    now,
                );
            }
            return;
        }

        if !seg.flags.contains(TcpFlags::RST) {
            // RST: seq from their ACK if present, else 0 with ACK of
            // their seq + len.
            let (flags, seq, ack) = if seg.flags.contains(TcpFlags::ACK) {
                (TcpFlags::RST, seg.ack, 0)
            } else {
                #[allow(clippy::cast_possible_truncation)]
                let advance = seg.payload.len() as u32 + u32::from(is_syn);
                (
                    TcpFlags::RST | TcpFlags::ACK,
                    0,
                    seg.seq.wrapping_add(advance),
                )
            };
            let _ = self.send_tcp(
                dev,
                pkt.src,
                seg.dst_port,
                seg.src_port,
                seq,
                ack,
                flags,
                0,
                &[],
                now,
            );
        }
    }

    /// Retransmission and TIME-WAIT expiry; driven about once a second.
    pub fn tcp_timer(&mut self, dev: &mut dyn NetDevice, now: u64) {
        for idx in 0..MAX_CONNS {
            let Some(conn) = self.tcp.conns[idx].as_ref() else {
                continue;
            };

            if conn.state == TcpState::TimeWait {
                if now.saturating_sub(conn.last_send_tick) > TIME_WAIT_TICKS {
                    self.tcp.conns[idx] = None;
                }
                continue;
            }

            if conn.unacked.is_empty()
                || now.saturating_sub(conn.last_send_tick) <= RETX_TIMEOUT
            {
                continue;
            }

            if conn.retries >= RETX_MAX {
                kwarn!("tcp: retransmit limit on port {}", conn.local_port);
                let (remote_ip, local_port, remote_port, seq) = (
                    conn.remote_ip,
                    conn.local_port,
                    conn.remote_port,
                    conn.snd_nxt,
                );
                let _ = self.send_tcp(
                    dev,
                    remote_ip,
                    local_port,
                    remote_port,
                    seq,
                    0,
                    TcpFlags::RST,
                    0,
                    &[],
                    now,
                );
                let conn = self.tcp.conns[idx].as_mut().expect("slot checked");
                conn.reset = true;
                conn.state = TcpState::Closed;
                continue;
            }

            // Resend the oldest unacked segment.
            let (remote_ip, local_port, remote_port, seq, ack, window, chunk) = {
                let len = conn.unacked.len().min(TCP_MSS);
                let mut chunk = [0u8; TCP_MSS];
                chunk[..len].copy_from_slice(&conn.unacked[..len]);
                (
                    conn.remote_ip,
                    conn.local_port,
                    conn.remote_port,
                    conn.snd_una,
                    conn.rcv_nxt,
                    conn.window(),
                    (chunk, len),
                )
            };
            let _ = self.send_tcp(
                dev,
                remote_ip,
                local_port,
                remote_port,
                seq,
                ack,
                TcpFlags::ACK | TcpFlags::PSH,
                window,
                &chunk.0[..chunk.1],
                now,
            );
            let conn = self.tcp.conns[idx].as_mut().expect("slot checked");
            conn.last_send_tick = now;
            conn.retries += 1;
        }
    }

    /// Builds one segment (header + payload, pseudo-header checksum) and
    /// hands it to the IPv4 layer.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn send_tcp(
        &mut self,
        dev: &mut dyn NetDevice,
        remote_ip: Ipv4Addr,
        local_port: u16,
        remote_port: u16,
        seq: u32,
        ack: u32,
        flags: TcpFlags,
        window: u16,
        payload: &[u8],
        now: u64,
    ) -> Result<(), NetError> {
        let total = TCP_HLEN + payload.len();
        let mut seg = [0u8; TCP_HLEN + TCP_MSS];
        if total > seg.len() {
            return Err(NetError::Param);
        }
        put_be16(&mut seg, 0, local_port);
        put_be16(&mut seg, 2, remote_port);
        put_be32(&mut seg, 4, seq);
        put_be32(&mut seg, 8, ack);
        seg[12] = 5 << 4;
        seg[13] = flags.bits();
        put_be16(&mut seg, 14, window);
        seg[TCP_HLEN..total].copy_from_slice(payload);
        let c = pseudo_checksum(self.config.ip, remote_ip, IP_PROTO_TCP, &seg[..total]);
        put_be16(&mut seg, 16, c);

        self.send_ipv4(dev, remote_ip, IP_PROTO_TCP, &seg[..total], now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testpeer::{standard_config, PeerDevice, TestClock, PEER_IP};

    fn connected() -> (NetStack, PeerDevice, TestClock, ConnId) {
        let mut stack = NetStack::new(standard_config());
        let mut dev = PeerDevice::new();
        let clock = TestClock::new();
        let id = stack.tcp_connect(&mut dev, &clock, PEER_IP, 7).unwrap();
        (stack, dev, clock, id)
    }

    #[test]
    fn handshake_reaches_established_with_exact_exchange() {
        let (stack, dev, _clock, id) = connected();
        assert_eq!(stack.tcp_state(id), Some(TcpState::Established));
        // Exactly one SYN out, one SYN+ACK in, one ACK out, in order.
        let log = dev.tcp_flag_log();
        assert_eq!(log, vec!["SYN", "ACK"]);
        assert_eq!(dev.peer_syn_acks_sent(), 1);
    }

    #[test]
    fn connect_to_closed_port_is_refused() {
        let mut stack = NetStack::new(standard_config());
        let mut dev = PeerDevice::new();
        let clock = TestClock::new();
        assert!(matches!(
            stack.tcp_connect(&mut dev, &clock, PEER_IP, 9999),
            Err(NetError::ConnectionRefused)
        ));
    }

    #[test]
    fn connect_times_out_against_blackhole() {
        let mut stack = NetStack::new(standard_config());
        let mut dev = PeerDevice::new();
        dev.blackhole_tcp();
        let clock = TestClock::new();
        assert!(matches!(
            stack.tcp_connect(&mut dev, &clock, PEER_IP, 7),
            Err(NetError::Timeout)
        ));
    }

    #[test]
    fn echo_send_recv_round_trip() {
        let (mut stack, mut dev, clock, id) = connected();
        let sent = stack
            .tcp_send(&mut dev, id, b"twelve bytes", clock.now())
            .unwrap();
        assert_eq!(sent, 12);

        stack.poll_device(&mut dev, clock.now());
        let mut buf = [0u8; 64];
        let n = stack.tcp_recv(id, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"twelve bytes");
        // The echo's ACK also cleared our unacked buffer.
        assert_eq!(stack.tcp.conns[id.index()].as_ref().unwrap().unacked.len(), 0);
    }

    #[test]
    fn bytes_are_delivered_in_sequence_order() {
        let (mut stack, mut dev, clock, id) = connected();
        let rcv = stack.tcp.conns[id.index()].as_ref().unwrap().rcv_nxt;

        // Deliver the second segment first: it must be dropped, and the
        // stack answers with a duplicate ACK for `rcv`.
        dev.inject_tcp_data(id_ports(&stack, id), rcv.wrapping_add(5), b"WORLD");
        stack.poll_device(&mut dev, clock.now());
        let mut buf = [0u8; 16];
        assert_eq!(stack.tcp_recv(id, &mut buf).unwrap(), 0);
        assert_eq!(dev.last_ack_seen(), Some(rcv));

        // Now the in-order bytes arrive and are delivered.
        dev.inject_tcp_data(id_ports(&stack, id), rcv, b"HELLO");
        stack.poll_device(&mut dev, clock.now());
        let n = stack.tcp_recv(id, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"HELLO");

        // The peer retransmits the dropped segment in order.
        dev.inject_tcp_data(id_ports(&stack, id), rcv.wrapping_add(5), b"WORLD");
        stack.poll_device(&mut dev, clock.now());
        let n = stack.tcp_recv(id, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"WORLD");
    }

    fn id_ports(stack: &NetStack, id: ConnId) -> (u16, u16) {
        let c = stack.tcp.conns[id.index()].as_ref().unwrap();
        (c.remote_port, c.local_port)
    }

    #[test]
    fn active_close_walks_fin_states_to_time_wait() {
        let (mut stack, mut dev, clock, id) = connected();
        stack.tcp_close(&mut dev, id, clock.now());
        assert_eq!(stack.tcp_state(id), Some(TcpState::FinWait1));
        // Peer ACKs our FIN and sends its own FIN.
        stack.poll_device(&mut dev, clock.now());
        assert_eq!(stack.tcp_state(id), Some(TcpState::TimeWait));

        // TIME-WAIT expires within the timer bound (well under 120 s).
        let expiry = clock.now() + TIME_WAIT_TICKS + 5;
        stack.tcp_timer(&mut dev, expiry);
        assert!(stack.tcp_state(id).is_none());
    }

    #[test]
    fn passive_close_via_close_wait_and_last_ack() {
        let (mut stack, mut dev, clock, id) = connected();
        dev.peer_close(id_ports(&stack, id), peer_state(&stack, id));
        stack.poll_device(&mut dev, clock.now());
        assert_eq!(stack.tcp_state(id), Some(TcpState::CloseWait));
        assert!(stack.tcp_peer_closed(id));

        stack.tcp_close(&mut dev, id, clock.now());
        assert_eq!(stack.tcp_state(id), Some(TcpState::LastAck));
        stack.poll_device(&mut dev, clock.now());
        assert!(stack.tcp_state(id).is_none());
    }

    fn peer_state(stack: &NetStack, id: ConnId) -> (u32, u32) {
        let c = stack.tcp.conns[id.index()].as_ref().unwrap();
        // (what the peer will use as seq, what it acks)
        (c.rcv_nxt, c.snd_nxt)
    }

    #[test]
    fn retransmit_then_reset_after_cap() {
        let (mut stack, mut dev, clock, id) = connected();
        dev.blackhole_tcp();
        stack.tcp_send(&mut dev, id, b"lost", clock.now()).unwrap();

        let mut now = clock.now();
        for _ in 0..RETX_MAX {
            now += RETX_TIMEOUT + 1;
            stack.tcp_timer(&mut dev, now);
            assert_eq!(stack.tcp_state(id), Some(TcpState::Established));
        }
        now += RETX_TIMEOUT + 1;
        stack.tcp_timer(&mut dev, now);
        assert_eq!(stack.tcp_state(id), Some(TcpState::Closed));
        assert!(matches!(
            stack.tcp_recv(id, &mut [0u8; 4]),
            Err(NetError::ConnectionReset)
        ));
    }

    #[test]
    fn passive_open_accepts_a_connection() {
        let mut stack = NetStack::new(standard_config());
        let mut dev = PeerDevice::new();
        stack.tcp_listen(80).unwrap();

        dev.peer_connect(80, 0x5000_0000);
        stack.poll_device(&mut dev, 1);
        // Peer's ACK completes the handshake.
        stack.poll_device(&mut dev, 2);
        let id = stack.tcp_take_accepted(80).expect("accepted connection");
        assert_eq!(stack.tcp_state(id), Some(TcpState::Established));
    }

    #[test]
    fn syn_to_closed_port_draws_rst() {
        let mut stack = NetStack::new(standard_config());
        let mut dev = PeerDevice::new();
        dev.peer_connect(81, 0x6000_0000);
        stack.poll_device(&mut dev, 1);
        assert!(dev.saw_rst());
    }

    #[test]
    fn sequence_comparison_wraps() {
        assert!(seq_lt(0xFFFF_FFF0, 0x10));
        assert!(!seq_lt(0x10, 0xFFFF_FFF0));
        assert!(seq_le(5, 5));
    }
}
