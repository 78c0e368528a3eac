//! HTTP/1.0 GET convenience for loaded modules.
//!
//! One request, one buffered response: connect, send the request, drain
//! until the peer closes or a deadline passes, strip the headers, hand
//! the body to the caller. Anything fancier belongs in a userspace
//! library.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Write as _;

use crate::device::{Clock, TICKS_PER_SEC};
use crate::wire::Ipv4Addr;
use crate::{NetDevice, NetError, NetStack};

/// Overall request deadline: ten seconds.
const HTTP_TIMEOUT: u64 = 10 * TICKS_PER_SEC;
/// Response cap; bodies beyond this are truncated.
const MAX_RESPONSE: usize = 64 * 1024;

impl NetStack {
    /// Fetches `http://host:port/path` and copies the body into `out`.
    ///
    /// Returns the body length (possibly truncated to `out.len()`).
    pub fn http_get(
        &mut self,
        dev: &mut dyn NetDevice,
        clock: &dyn Clock,
        ip: Ipv4Addr,
        port: u16,
        host: &str,
        path: &str,
        out: &mut [u8],
    ) -> Result<usize, NetError> {
        let conn = self.tcp_connect(dev, clock, ip, port)?;

        let mut request = String::new();
        let path = if path.is_empty() { "/" } else { path };
        let _ = write!(
            request,
            "GET {path} HTTP/1.0\r\nHost: {host}\r\nConnection: close\r\n\r\n"
        );
        self.tcp_send(dev, conn, request.as_bytes(), clock.now())?;

        let mut response: Vec<u8> = Vec::new();
        let start = clock.now();
        let mut chunk = [0u8; 1024];
        loop {
            let now = clock.now();
            if now.saturating_sub(start) > HTTP_TIMEOUT {
                self.tcp_close(dev, conn, now);
                return Err(NetError::Timeout);
            }
            self.poll_device(dev, now);
            match self.tcp_recv(conn, &mut chunk) {
                Ok(0) => {
                    if self.tcp_peer_closed(conn) {
                        break;
                    }
                }
                Ok(n) => {
                    if response.len() < MAX_RESPONSE {
                        response.extend_from_slice(&chunk[..n]);
                    }
                }
                Err(_) => break,
            }
            clock.relax();
        }
        self.tcp_close(dev, conn, clock.now());

        // Split the header block off; a missing blank line means the
        // whole response is treated as body.
        let body_start = response
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .map_or(0, |i| i + 4);
        let body = &response[body_start..];
        let n = body.len().min(out.len());
        out[..n].copy_from_slice(&body[..n]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testpeer::{standard_config, PeerDevice, TestClock, PEER_IP};

    #[test]
    fn get_strips_headers_and_returns_body() {
        let mut stack = NetStack::new(standard_config());
        let mut dev = PeerDevice::http();
        let clock = TestClock::new();
        let mut body = [0u8; 128];
        let n = stack
            .http_get(&mut dev, &clock, PEER_IP, 80, "baryon.dev", "/hello", &mut body)
            .unwrap();
        assert_eq!(&body[..n], b"Hello, Baryon");
        // The request that went out was a well-formed HTTP/1.0 GET.
        let req = dev.http_request_seen().unwrap();
        assert!(req.starts_with("GET /hello HTTP/1.0\r\n"));
        assert!(req.contains("Host: baryon.dev\r\n"));
    }

    #[test]
    fn get_times_out_against_mute_server() {
        let mut stack = NetStack::new(standard_config());
        let mut dev = PeerDevice::http();
        dev.mute_http();
        let clock = TestClock::new();
        let mut body = [0u8; 16];
        assert!(matches!(
            stack.http_get(&mut dev, &clock, PEER_IP, 80, "x", "/", &mut body),
            Err(NetError::Timeout)
        ));
    }
}
