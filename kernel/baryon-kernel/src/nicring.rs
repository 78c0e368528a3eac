//! RTL8139 receive-ring arithmetic.
//!
//! The card prefixes every DMA'd frame with a 4-byte status+length
//! header and expects the software read offset to advance dword-aligned
//! past each frame. These helpers are pure so the ring walk is pinned
//! down by host tests; the driver supplies the hardware around them.

/// Bytes of per-frame header (status word + length word).
pub const FRAME_HEADER: usize = 4;
/// Status bit: receive OK.
const RX_STATUS_OK: u16 = 1 << 0;
/// Largest valid frame: 1518 bytes plus CRC.
const MAX_FRAME_WITH_CRC: usize = 1518 + 4;

/// Parses the frame header at `offset` in the receive ring.
///
/// Returns `(payload_offset, payload_len)` with the trailing 4-byte CRC
/// stripped, or `None` for a bad or incomplete frame.
#[must_use]
pub fn parse_rx_header(ring: &[u8], offset: usize) -> Option<(usize, usize)> {
    if offset + FRAME_HEADER > ring.len() {
        return None;
    }
    let status = u16::from_le_bytes([ring[offset], ring[offset + 1]]);
    let len = usize::from(u16::from_le_bytes([ring[offset + 2], ring[offset + 3]]));
    if status & RX_STATUS_OK == 0 || len < 4 || len > MAX_FRAME_WITH_CRC {
        return None;
    }
    Some((offset + FRAME_HEADER, len - 4))
}

/// Advances a ring offset past one frame (header + frame + CRC),
/// rounded up to the dword boundary the card requires.
#[must_use]
pub fn advance_rx_offset(offset: usize, frame_len_with_crc: usize) -> usize {
    (offset + FRAME_HEADER + frame_len_with_crc + 3) & !3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_parse_strips_crc() {
        let mut ring = vec![0u8; 64];
        ring[0..2].copy_from_slice(&1u16.to_le_bytes()); // ROK
        ring[2..4].copy_from_slice(&64u16.to_le_bytes()); // 60 + CRC
        let (at, len) = parse_rx_header(&ring, 0).unwrap();
        assert_eq!(at, 4);
        assert_eq!(len, 60);
    }

    #[test]
    fn bad_status_or_length_is_rejected() {
        let mut ring = vec![0u8; 32];
        ring[2..4].copy_from_slice(&64u16.to_le_bytes());
        assert!(parse_rx_header(&ring, 0).is_none()); // status 0

        ring[0..2].copy_from_slice(&1u16.to_le_bytes());
        ring[2..4].copy_from_slice(&2u16.to_le_bytes()); // shorter than CRC
        assert!(parse_rx_header(&ring, 0).is_none());

        ring[2..4].copy_from_slice(&4000u16.to_le_bytes()); // oversized
        assert!(parse_rx_header(&ring, 0).is_none());
    }

    #[test]
    fn truncated_header_at_ring_end() {
        let ring = [1u8, 0, 8];
        assert!(parse_rx_header(&ring, 0).is_none());
        assert!(parse_rx_header(&ring, 2).is_none());
    }

    #[test]
    fn ring_advance_is_dword_aligned() {
        // 4 header + 64 frame = 68, already aligned.
        assert_eq!(advance_rx_offset(0, 64), 68);
        // 4 + 61 = 65, rounds to 68.
        assert_eq!(advance_rx_offset(0, 61), 68);
        assert_eq!(advance_rx_offset(100, 7), (100 + 4 + 7 + 3) & !3);
    }

    #[test]
    fn consecutive_frames_walk_the_ring() {
        let mut ring = vec![0u8; 256];
        // Frame 1: 10 bytes payload + CRC = 14 on the wire.
        ring[0..2].copy_from_slice(&1u16.to_le_bytes());
        ring[2..4].copy_from_slice(&14u16.to_le_bytes());
        let (_, len1) = parse_rx_header(&ring, 0).unwrap();
        assert_eq!(len1, 10);
        let next = advance_rx_offset(0, 14);
        assert_eq!(next % 4, 0);
        // Frame 2 right after.
        ring[next..next + 2].copy_from_slice(&1u16.to_le_bytes());
        ring[next + 2..next + 4].copy_from_slice(&68u16.to_le_bytes());
        let (at2, len2) = parse_rx_header(&ring, next).unwrap();
        assert_eq!(len2, 64);
        assert_eq!(at2, next + 4);
    }
}
