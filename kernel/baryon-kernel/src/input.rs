//! PS/2 input decoding: Set-1 scancodes and 3-byte mouse packets.
//!
//! The IRQ handlers feed raw bytes into these decoders; decoded events
//! land in single-producer single-consumer rings that the input task
//! drains (consumer side synchronized with the IRQ path by interrupt
//! masking). Decoding itself is pure and tested on the host.

use planck_noalloc::ringbuf::RingBuf;

/// Capacity of the keyboard event ring.
pub const KEY_RING: usize = 64;
/// Capacity of the mouse event ring.
pub const MOUSE_RING: usize = 64;

/// A decoded keyboard event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    /// Printable ASCII or 0 for non-printables.
    pub ascii: u8,
    /// Raw scancode without the release bit.
    pub scancode: u8,
    /// Key pressed (true) or released.
    pub pressed: bool,
    /// Modifier state at the time of the event.
    pub modifiers: Modifiers,
}

/// Modifier keys currently held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Modifiers {
    /// Either shift key.
    pub shift: bool,
    /// Either control key.
    pub ctrl: bool,
    /// Either alt key.
    pub alt: bool,
}

/// Set-1 scancode decoder with modifier tracking.
#[derive(Default)]
pub struct KeyboardDecoder {
    modifiers: Modifiers,
    /// An 0xE0 prefix byte was seen; the next code is extended.
    extended: bool,
}

/// Base (unshifted) map for scancodes 0x00-0x39.
const KEYMAP: [u8; 58] = [
    0, 27, b'1', b'2', b'3', b'4', b'5', b'6', b'7', b'8', b'9', b'0', b'-', b'=', 8, b'\t',
    b'q', b'w', b'e', b'r', b't', b'y', b'u', b'i', b'o', b'p', b'[', b']', b'\n', 0, b'a', b's',
    b'd', b'f', b'g', b'h', b'j', b'k', b'l', b';', b'\'', b'`', 0, b'\\', b'z', b'x', b'c', b'v',
    b'b', b'n', b'm', b',', b'.', b'/', 0, b'*', 0, b' ',
];

/// Shifted map for scancodes 0x00-0x39.
const KEYMAP_SHIFT: [u8; 58] = [
    0, 27, b'!', b'@', b'#', b'$', b'%', b'^', b'&', b'*', b'(', b')', b'_', b'+', 8, b'\t',
    b'Q', b'W', b'E', b'R', b'T', b'Y', b'U', b'I', b'O', b'P', b'{', b'}', b'\n', 0, b'A', b'S',
    b'D', b'F', b'G', b'H', b'J', b'K', b'L', b':', b'"', b'~', 0, b'|', b'Z', b'X', b'C', b'V',
    b'B', b'N', b'M', b'<', b'>', b'?', 0, b'*', 0, b' ',
];

const SC_LSHIFT: u8 = 0x2A;
const SC_RSHIFT: u8 = 0x36;
const SC_CTRL: u8 = 0x1D;
const SC_ALT: u8 = 0x38;

impl KeyboardDecoder {
    /// A fresh decoder with no modifiers held.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            modifiers: Modifiers {
                shift: false,
                ctrl: false,
                alt: false,
            },
            extended: false,
        }
    }

    /// Current modifier state (for the API table's keyboard query).
    #[must_use]
    pub const fn modifiers(&self) -> Modifiers {
        self.modifiers
    }

    /// Feeds one raw byte; returns an event for non-modifier keys.
    pub fn feed(&mut self, byte: u8) -> Option<KeyEvent> {
        if byte == 0xE0 {
            self.extended = true;
            return None;
        }
        let extended = core::mem::replace(&mut self.extended, false);
        let pressed = byte & 0x80 == 0;
        let code = byte & 0x7F;

        // Modifiers update state but produce no event.
        match code {
            SC_LSHIFT | SC_RSHIFT if !extended => {
                self.modifiers.shift = pressed;
                return None;
            }
            SC_CTRL => {
                self.modifiers.ctrl = pressed;
                return None;
            }
            SC_ALT => {
                self.modifiers.alt = pressed;
                return None;
            }
            _ => {}
        }

        let ascii = if extended {
            0
        } else {
            let map = if self.modifiers.shift {
                &KEYMAP_SHIFT
            } else {
                &KEYMAP
            };
            map.get(usize::from(code)).copied().unwrap_or(0)
        };
        Some(KeyEvent {
            ascii,
            scancode: code,
            pressed,
            modifiers: self.modifiers,
        })
    }
}

/// A decoded mouse movement/button report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseEvent {
    /// Horizontal movement, right positive.
    pub dx: i16,
    /// Vertical movement, up positive.
    pub dy: i16,
    /// Left button held.
    pub left: bool,
    /// Right button held.
    pub right: bool,
    /// Middle button held.
    pub middle: bool,
}

/// 3-byte PS/2 mouse packet assembler.
///
/// Byte 0 must have bit 3 set; bytes that do not are discarded until
/// the stream re-synchronizes.
#[derive(Default)]
pub struct MouseDecoder {
    buf: [u8; 3],
    have: usize,
}

impl MouseDecoder {
    /// A fresh, synchronized decoder.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buf: [0; 3],
            have: 0,
        }
    }

    /// Feeds one byte; returns an event when a packet completes.
    pub fn feed(&mut self, byte: u8) -> Option<MouseEvent> {
        // Synchronization: the first byte of a packet always has bit 3.
        if self.have == 0 && byte & 0x08 == 0 {
            return None;
        }
        self.buf[self.have] = byte;
        self.have += 1;
        if self.have < 3 {
            return None;
        }
        self.have = 0;

        let flags = self.buf[0];
        // Overflow packets are dropped whole.
        if flags & 0xC0 != 0 {
            return None;
        }
        let mut dx = i16::from(self.buf[1]);
        if flags & 0x10 != 0 {
            dx -= 256;
        }
        let mut dy = i16::from(self.buf[2]);
        if flags & 0x20 != 0 {
            dy -= 256;
        }
        Some(MouseEvent {
            dx,
            dy,
            left: flags & 0x01 != 0,
            right: flags & 0x02 != 0,
            middle: flags & 0x04 != 0,
        })
    }
}

/// Keyboard event ring type used between the IRQ and the input task.
pub type KeyRing = RingBuf<KeyEvent, KEY_RING>;
/// Mouse event ring type used between the IRQ and the input task.
pub type MouseRing = RingBuf<MouseEvent, MOUSE_RING>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_keypress_decodes_ascii() {
        let mut kbd = KeyboardDecoder::new();
        let ev = kbd.feed(0x1E).unwrap(); // 'a' make
        assert_eq!(ev.ascii, b'a');
        assert!(ev.pressed);
        let ev = kbd.feed(0x9E).unwrap(); // 'a' break
        assert!(!ev.pressed);
    }

    #[test]
    fn shift_produces_uppercase_and_tracks_state() {
        let mut kbd = KeyboardDecoder::new();
        assert!(kbd.feed(0x2A).is_none()); // shift make, no event
        assert!(kbd.modifiers().shift);
        let ev = kbd.feed(0x1E).unwrap();
        assert_eq!(ev.ascii, b'A');
        assert!(kbd.feed(0xAA).is_none()); // shift break
        assert!(!kbd.modifiers().shift);
        assert_eq!(kbd.feed(0x1E).unwrap().ascii, b'a');
    }

    #[test]
    fn ctrl_and_alt_are_reported_on_events() {
        let mut kbd = KeyboardDecoder::new();
        kbd.feed(0x1D); // ctrl make
        kbd.feed(0x38); // alt make
        let ev = kbd.feed(0x2E).unwrap(); // 'c'
        assert!(ev.modifiers.ctrl);
        assert!(ev.modifiers.alt);
        kbd.feed(0x9D);
        assert!(!kbd.modifiers().ctrl);
    }

    #[test]
    fn extended_prefix_yields_no_ascii() {
        let mut kbd = KeyboardDecoder::new();
        assert!(kbd.feed(0xE0).is_none());
        let ev = kbd.feed(0x48).unwrap(); // cursor up
        assert_eq!(ev.ascii, 0);
        assert_eq!(ev.scancode, 0x48);
    }

    #[test]
    fn mouse_packet_with_signs_and_buttons() {
        let mut mouse = MouseDecoder::new();
        assert!(mouse.feed(0x09).is_none()); // sync + left
        assert!(mouse.feed(10).is_none());
        let ev = mouse.feed(250).unwrap();
        assert_eq!(ev.dx, 10);
        assert_eq!(ev.dy, 250); // no Y sign bit set
        assert!(ev.left);

        // Negative movement via sign bits.
        mouse.feed(0x38); // sync + both sign bits... bit3 set
        mouse.feed(0xF6);
        let ev = mouse.feed(0xF0).unwrap();
        assert_eq!(ev.dx, -10);
        assert_eq!(ev.dy, -16);
    }

    #[test]
    fn mouse_resynchronizes_after_garbage() {
        let mut mouse = MouseDecoder::new();
        // Bytes without the sync bit are skipped.
        assert!(mouse.feed(0x44).is_none());
        assert!(mouse.feed(0x02).is_none());
        // A proper packet then decodes.
        assert!(mouse.feed(0x08).is_none());
        assert!(mouse.feed(5).is_none());
        let ev = mouse.feed(3).unwrap();
        assert_eq!((ev.dx, ev.dy), (5, 3));
    }
}
