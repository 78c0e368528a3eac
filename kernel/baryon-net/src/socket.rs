//! BSD-ish sockets over UDP and TCP.
//!
//! A fixed table of socket slots. UDP sockets own a receive ring with
//! per-datagram boundaries (each datagram is stored behind a small
//! source-address header); TCP sockets delegate to their connection's
//! byte ring, so segment boundaries are lost, as TCP semantics demand.

use planck_noalloc::ringbuf::RingBuf;

use baryon_core::kdebug;

use crate::device::Clock;
use crate::tcp::{ConnId, TcpState};
use crate::wire::Ipv4Addr;
use crate::{NetDevice, NetError, NetStack};

/// Socket table capacity.
pub const MAX_SOCKETS: usize = 16;
/// AF_INET, the only supported domain.
pub const AF_INET: i32 = 2;
/// Stream (TCP) socket type.
pub const SOCK_STREAM: i32 = 1;
/// Datagram (UDP) socket type.
pub const SOCK_DGRAM: i32 = 2;
/// UDP datagram ring capacity per socket.
const RX_RING: usize = 2048;
/// Per-datagram header in the ring: src ip (4) + src port (2) + len (2).
const DGRAM_HDR: usize = 8;

/// Transport of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SockType {
    /// TCP.
    Stream,
    /// UDP.
    Dgram,
}

/// Socket lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// Fresh or bound.
    Unconnected,
    /// Connected (TCP established / UDP default destination set).
    Connected,
    /// The TCP connection died; calls fail immediately.
    Error,
}

struct Socket {
    stype: SockType,
    state: SocketState,
    local_port: u16,
    remote_ip: Ipv4Addr,
    remote_port: u16,
    rx: RingBuf<u8, RX_RING>,
    conn: Option<ConnId>,
    /// Bounded receive wait in ticks; 0 polls once.
    recv_timeout: u64,
}

pub(crate) struct SocketTable {
    slots: [Option<Socket>; MAX_SOCKETS],
}

impl SocketTable {
    pub(crate) const fn new() -> Self {
        Self {
            slots: [const { None }; MAX_SOCKETS],
        }
    }
}

impl NetStack {
    fn sock(&mut self, fd: i32) -> Result<&mut Socket, NetError> {
        usize::try_from(fd)
            .ok()
            .and_then(|i| self.sockets.slots.get_mut(i))
            .and_then(Option::as_mut)
            .ok_or(NetError::Param)
    }

    /// Allocates a socket. Only `AF_INET` with `SOCK_STREAM`/`SOCK_DGRAM`
    /// is supported; `protocol` 0 selects the type's default.
    pub fn socket(&mut self, domain: i32, stype: i32, protocol: i32) -> Result<i32, NetError> {
        if domain != AF_INET || !matches!(protocol, 0 | 6 | 17) {
            return Err(NetError::Param);
        }
        let stype = match stype {
            SOCK_STREAM => SockType::Stream,
            SOCK_DGRAM => SockType::Dgram,
            _ => return Err(NetError::Param),
        };
        let slot = self
            .sockets
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(NetError::BufferFull)?;
        self.sockets.slots[slot] = Some(Socket {
            stype,
            state: SocketState::Unconnected,
            local_port: 0,
            remote_ip: Ipv4Addr::UNSPECIFIED,
            remote_port: 0,
            rx: RingBuf::new(),
            conn: None,
            recv_timeout: 5 * crate::device::TICKS_PER_SEC,
        });
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let fd = slot as i32;
        Ok(fd)
    }

    /// Binds a socket to a local port.
    pub fn bind(&mut self, fd: i32, port: u16) -> Result<(), NetError> {
        let in_use = self
            .sockets
            .slots
            .iter()
            .flatten()
            .any(|s| s.local_port == port && port != 0);
        let sock = self.sock(fd)?;
        if in_use {
            return Err(NetError::Param);
        }
        sock.local_port = port;
        Ok(())
    }

    /// Sets the receive timeout in ticks (0 = poll once).
    pub fn set_recv_timeout(&mut self, fd: i32, ticks: u64) -> Result<(), NetError> {
        self.sock(fd)?.recv_timeout = ticks;
        Ok(())
    }

    /// Connects a socket: TCP performs the handshake, UDP just records
    /// the default destination.
    pub fn connect(
        &mut self,
        fd: i32,
        dev: &mut dyn NetDevice,
        clock: &dyn Clock,
        ip: Ipv4Addr,
        port: u16,
    ) -> Result<(), NetError> {
        let (stype, bound) = {
            let sock = self.sock(fd)?;
            (sock.stype, sock.local_port)
        };
        match stype {
            SockType::Dgram => {
                let local = if bound == 0 { self.next_ephemeral() } else { bound };
                let sock = self.sock(fd)?;
                sock.local_port = local;
                sock.remote_ip = ip;
                sock.remote_port = port;
                sock.state = SocketState::Connected;
                Ok(())
            }
            SockType::Stream => {
                let conn = self.tcp_connect(dev, clock, ip, port)?;
                let sock = self.sock(fd)?;
                sock.conn = Some(conn);
                sock.remote_ip = ip;
                sock.remote_port = port;
                sock.state = SocketState::Connected;
                Ok(())
            }
        }
    }

    /// Sends on a connected socket.
    pub fn send(
        &mut self,
        fd: i32,
        dev: &mut dyn NetDevice,
        clock: &dyn Clock,
        data: &[u8],
    ) -> Result<usize, NetError> {
        let (stype, state, conn, remote_ip, remote_port, local_port) = {
            let s = self.sock(fd)?;
            (
                s.stype,
                s.state,
                s.conn,
                s.remote_ip,
                s.remote_port,
                s.local_port,
            )
        };
        if state == SocketState::Error {
            return Err(NetError::ConnectionReset);
        }
        if state != SocketState::Connected {
            return Err(NetError::Param);
        }
        match stype {
            SockType::Stream => {
                let conn = conn.ok_or(NetError::Param)?;
                let r = self.tcp_send(dev, conn, data, clock.now());
                if matches!(r, Err(NetError::ConnectionReset)) {
                    self.sock(fd)?.state = SocketState::Error;
                }
                r
            }
            SockType::Dgram => {
                self.arp_resolve(dev, clock, remote_ip)?;
                self.send_udp(dev, local_port, remote_ip, remote_port, data, clock.now())?;
                Ok(data.len())
            }
        }
    }

    /// Sends a datagram to an explicit destination (UDP only).
    pub fn sendto(
        &mut self,
        fd: i32,
        dev: &mut dyn NetDevice,
        clock: &dyn Clock,
        data: &[u8],
        ip: Ipv4Addr,
        port: u16,
    ) -> Result<usize, NetError> {
        let (stype, mut local) = {
            let s = self.sock(fd)?;
            (s.stype, s.local_port)
        };
        if stype != SockType::Dgram {
            return Err(NetError::Param);
        }
        if local == 0 {
            local = self.next_ephemeral();
            self.sock(fd)?.local_port = local;
        }
        self.arp_resolve(dev, clock, ip)?;
        self.send_udp(dev, local, ip, port, data, clock.now())?;
        Ok(data.len())
    }

    /// Receives on a connected socket, waiting up to the socket's
    /// receive timeout.
    pub fn recv(
        &mut self,
        fd: i32,
        dev: &mut dyn NetDevice,
        clock: &dyn Clock,
        out: &mut [u8],
    ) -> Result<usize, NetError> {
        self.recvfrom(fd, dev, clock, out).map(|(n, _, _)| n)
    }

    /// Receives one datagram (UDP) or available bytes (TCP), returning
    /// the source address.
    pub fn recvfrom(
        &mut self,
        fd: i32,
        dev: &mut dyn NetDevice,
        clock: &dyn Clock,
        out: &mut [u8],
    ) -> Result<(usize, Ipv4Addr, u16), NetError> {
        let start = clock.now();
        loop {
            let now = clock.now();
            self.poll_device(dev, now);

            let (stype, state, conn, remote, timeout) = {
                let s = self.sock(fd)?;
                (s.stype, s.state, s.conn, (s.remote_ip, s.remote_port), s.recv_timeout)
            };
            if state == SocketState::Error {
                return Err(NetError::ConnectionReset);
            }

            match stype {
                SockType::Dgram => {
                    if let Some(result) = self.pop_datagram(fd, out)? {
                        return Ok(result);
                    }
                }
                SockType::Stream => {
                    let conn = conn.ok_or(NetError::Param)?;
                    match self.tcp_recv(conn, out) {
                        Ok(0) => {
                            if self.tcp_peer_closed(conn) {
                                return Ok((0, remote.0, remote.1));
                            }
                        }
                        Ok(n) => return Ok((n, remote.0, remote.1)),
                        Err(e) => {
                            self.sock(fd)?.state = SocketState::Error;
                            return Err(e);
                        }
                    }
                }
            }

            if now.saturating_sub(start) >= timeout {
                return Err(NetError::Timeout);
            }
            clock.relax();
        }
    }

    /// Closes a socket, tearing down any TCP connection (FIN from
    /// Established).
    pub fn close_socket(&mut self, fd: i32, dev: &mut dyn NetDevice, now: u64) {
        let Ok(sock) = self.sock(fd) else { return };
        let conn = sock.conn;
        let idx = usize::try_from(fd).unwrap_or(0);
        self.sockets.slots[idx] = None;
        if let Some(conn) = conn {
            self.tcp_close(dev, conn, now);
        }
    }

    /// Pops one length-delimited datagram from a UDP socket ring.
    fn pop_datagram(
        &mut self,
        fd: i32,
        out: &mut [u8],
    ) -> Result<Option<(usize, Ipv4Addr, u16)>, NetError> {
        let sock = self.sock(fd)?;
        if sock.rx.len() < DGRAM_HDR {
            return Ok(None);
        }
        let mut hdr = [0u8; DGRAM_HDR];
        for b in &mut hdr {
            *b = sock.rx.pop().unwrap_or(0);
        }
        let src_ip = Ipv4Addr([hdr[0], hdr[1], hdr[2], hdr[3]]);
        let src_port = u16::from_be_bytes([hdr[4], hdr[5]]);
        let len = usize::from(u16::from_be_bytes([hdr[6], hdr[7]]));
        let mut n = 0;
        for i in 0..len {
            let Some(b) = sock.rx.pop() else { break };
            if i < out.len() {
                out[i] = b;
                n = i + 1;
            }
            // Bytes beyond the caller's buffer are discarded; datagram
            // boundaries hold.
        }
        Ok(Some((n, src_ip, src_port)))
    }

    /// Delivery from the UDP input path: find the bound socket and queue
    /// the datagram with its boundary header.
    pub(crate) fn deliver_udp(
        &mut self,
        src_ip: Ipv4Addr,
        src_port: u16,
        dst_port: u16,
        payload: &[u8],
    ) {
        let Some(sock) = self
            .sockets
            .slots
            .iter_mut()
            .flatten()
            .find(|s| s.stype == SockType::Dgram && s.local_port == dst_port)
        else {
            self.counters.dropped += 1;
            return;
        };

        let free = sock.rx.max_capacity() - sock.rx.len();
        if payload.len() + DGRAM_HDR > free || payload.len() > u16::MAX as usize {
            kdebug!("udp: ring full, dropping datagram for port {}", dst_port);
            self.counters.dropped += 1;
            return;
        }
        for b in src_ip.0 {
            sock.rx.push(b);
        }
        for b in src_port.to_be_bytes() {
            sock.rx.push(b);
        }
        #[allow(clippy::cast_possible_truncation)]
        let len = payload.len() as u16;
        for b in len.to_be_bytes() {
            sock.rx.push(b);
        }
        for &b in payload {
            sock.rx.push(b);
        }
    }

    /// True when a TCP socket's connection is fully established.
    #[must_use]
    pub fn socket_established(&self, fd: i32) -> bool {
        usize::try_from(fd)
            .ok()
            .and_then(|i| self.sockets.slots.get(i))
            .and_then(Option::as_ref)
            .and_then(|s| s.conn)
            .and_then(|c| self.tcp_state(c))
            == Some(TcpState::Established)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testpeer::{standard_config, PeerDevice, TestClock, PEER_IP};

    #[test]
    fn socket_validates_arguments() {
        let mut stack = NetStack::new(standard_config());
        assert!(matches!(stack.socket(99, SOCK_DGRAM, 0), Err(NetError::Param)));
        assert!(matches!(stack.socket(AF_INET, 7, 0), Err(NetError::Param)));
        assert!(stack.socket(AF_INET, SOCK_DGRAM, 17).is_ok());
    }

    #[test]
    fn udp_echo_round_trip() {
        let mut stack = NetStack::new(standard_config());
        let mut dev = PeerDevice::new();
        let clock = TestClock::new();

        let fd = stack.socket(AF_INET, SOCK_DGRAM, 0).unwrap();
        stack.bind(fd, 4000).unwrap();
        stack
            .sendto(fd, &mut dev, &clock, b"marco", PEER_IP, 7)
            .unwrap();

        let mut buf = [0u8; 32];
        let (n, src_ip, src_port) = stack.recvfrom(fd, &mut dev, &clock, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"marco");
        assert_eq!(src_ip, PEER_IP);
        assert_eq!(src_port, 7);
    }

    #[test]
    fn udp_datagram_boundaries_survive() {
        let mut stack = NetStack::new(standard_config());
        let mut dev = PeerDevice::new();
        let clock = TestClock::new();
        let fd = stack.socket(AF_INET, SOCK_DGRAM, 0).unwrap();
        stack.bind(fd, 5000).unwrap();

        dev.inject_udp(7, 5000, b"first", false);
        dev.inject_udp(7, 5000, b"second!", false);
        stack.poll_device(&mut dev, 1);

        let mut buf = [0u8; 32];
        let (n, _, _) = stack.recvfrom(fd, &mut dev, &clock, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"first");
        let (n, _, _) = stack.recvfrom(fd, &mut dev, &clock, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"second!");
    }

    #[test]
    fn recv_times_out_on_silence() {
        let mut stack = NetStack::new(standard_config());
        let mut dev = PeerDevice::new();
        let clock = TestClock::new();
        let fd = stack.socket(AF_INET, SOCK_DGRAM, 0).unwrap();
        stack.bind(fd, 6000).unwrap();
        stack.set_recv_timeout(fd, 10).unwrap();
        let mut buf = [0u8; 8];
        assert!(matches!(
            stack.recv(fd, &mut dev, &clock, &mut buf),
            Err(NetError::Timeout)
        ));
    }

    #[test]
    fn tcp_socket_connect_send_recv_close() {
        let mut stack = NetStack::new(standard_config());
        let mut dev = PeerDevice::new();
        let clock = TestClock::new();

        let fd = stack.socket(AF_INET, SOCK_STREAM, 0).unwrap();
        stack.connect(fd, &mut dev, &clock, PEER_IP, 7).unwrap();
        assert!(stack.socket_established(fd));

        assert_eq!(stack.send(fd, &mut dev, &clock, b"twelve bytes").unwrap(), 12);
        let mut buf = [0u8; 64];
        let n = stack.recv(fd, &mut dev, &clock, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"twelve bytes");

        stack.close_socket(fd, &mut dev, clock.now());
        // Slot is reusable immediately.
        assert_eq!(stack.socket(AF_INET, SOCK_STREAM, 0).unwrap(), fd);
    }

    #[test]
    fn bind_rejects_duplicate_port() {
        let mut stack = NetStack::new(standard_config());
        let a = stack.socket(AF_INET, SOCK_DGRAM, 0).unwrap();
        let b = stack.socket(AF_INET, SOCK_DGRAM, 0).unwrap();
        stack.bind(a, 7777).unwrap();
        assert!(matches!(stack.bind(b, 7777), Err(NetError::Param)));
    }
}
