//! i8042 PS/2 controller: keyboard on port 1, mouse on port 2.
//!
//! The IRQ handlers pull raw bytes and feed the pure decoders from
//! [`crate::input`]; decoded events land in rings behind an
//! interrupt-masking lock, where the input task (or the compositor glue)
//! drains them.

use baryon_core::sync::IrqLock;
use baryon_core::{kinfo, kwarn};

use crate::arch::x86::Port;
use crate::input::{KeyRing, KeyboardDecoder, Modifiers, MouseDecoder, MouseRing};

const DATA_PORT: u16 = 0x60;
const STATUS_CMD_PORT: u16 = 0x64;

/// Controller commands (written to 0x64).
mod cmd {
    pub const READ_CONFIG: u8 = 0x20;
    pub const WRITE_CONFIG: u8 = 0x60;
    pub const ENABLE_PORT2: u8 = 0xA8;
    pub const ENABLE_PORT1: u8 = 0xAE;
    pub const NEXT_TO_PORT2: u8 = 0xD4;
}

/// Status register: output buffer full.
const STATUS_OUTPUT_FULL: u8 = 1 << 0;
/// Status register: input buffer full (controller busy).
const STATUS_INPUT_FULL: u8 = 1 << 1;
/// Status register: data originates from the mouse.
const STATUS_MOUSE_DATA: u8 = 1 << 5;

const SPIN_LIMIT: u32 = 100_000;

struct InputState {
    keyboard: KeyboardDecoder,
    mouse: MouseDecoder,
    key_ring: KeyRing,
    mouse_ring: MouseRing,
}

static INPUT: IrqLock<InputState> = IrqLock::new(InputState {
    keyboard: KeyboardDecoder::new(),
    mouse: MouseDecoder::new(),
    key_ring: KeyRing::new(),
    mouse_ring: MouseRing::new(),
});

fn wait_input_clear() -> bool {
    let status = Port::<u8>::new(STATUS_CMD_PORT);
    for _ in 0..SPIN_LIMIT {
        // SAFETY: Status reads are side-effect free.
        if unsafe { status.read() } & STATUS_INPUT_FULL == 0 {
            return true;
        }
        core::hint::spin_loop();
    }
    false
}

fn command(byte: u8) -> bool {
    if !wait_input_clear() {
        return false;
    }
    // SAFETY: The input buffer is clear; 0x64 accepts controller
    // commands.
    unsafe { Port::<u8>::new(STATUS_CMD_PORT).write(byte) };
    true
}

/// Brings up both PS/2 ports with translation off and IRQs enabled.
pub fn init() {
    // Flush anything stale in the output buffer.
    let status = Port::<u8>::new(STATUS_CMD_PORT);
    let data = Port::<u8>::new(DATA_PORT);
    // SAFETY: Draining the output buffer is always safe.
    unsafe {
        while status.read() & STATUS_OUTPUT_FULL != 0 {
            let _ = data.read();
        }
    }

    // Read config, enable both port IRQs, write back.
    if !command(cmd::READ_CONFIG) || !wait_output() {
        kwarn!("i8042: controller not responding");
        return;
    }
    // SAFETY: READ_CONFIG put the byte into the output buffer.
    let mut config = unsafe { data.read() };
    config |= 0b0000_0011; // port 1 + port 2 interrupts
    config &= !(1 << 6); // no scancode translation; we decode Set 1
    command(cmd::WRITE_CONFIG);
    if wait_input_clear() {
        // SAFETY: WRITE_CONFIG expects its argument on port 0x60.
        unsafe { data.write(config) };
    }

    command(cmd::ENABLE_PORT1);
    command(cmd::ENABLE_PORT2);

    // Enable mouse streaming (0xF4 via the port-2 redirect).
    command(cmd::NEXT_TO_PORT2);
    if wait_input_clear() {
        // SAFETY: The next data byte goes to the mouse.
        unsafe { data.write(0xF4) };
    }
    kinfo!("i8042: keyboard and mouse online");
}

fn wait_output() -> bool {
    let status = Port::<u8>::new(STATUS_CMD_PORT);
    for _ in 0..SPIN_LIMIT {
        // SAFETY: Status reads are side-effect free.
        if unsafe { status.read() } & STATUS_OUTPUT_FULL != 0 {
            return true;
        }
        core::hint::spin_loop();
    }
    false
}

/// Keyboard IRQ (vector 33): decode and queue.
pub fn keyboard_interrupt() {
    // SAFETY: The IRQ fired, so the output buffer holds a byte.
    let byte = unsafe { Port::<u8>::new(DATA_PORT).read() };
    let mut input = INPUT.lock();
    if let Some(event) = input.keyboard.feed(byte) {
        let _ = input.key_ring.try_push(event);
    }
}

/// Mouse IRQ (vector 44): assemble packets and queue.
pub fn mouse_interrupt() {
    let status = Port::<u8>::new(STATUS_CMD_PORT);
    let data = Port::<u8>::new(DATA_PORT);
    // SAFETY: Drain while the mouse bit says the byte is ours.
    unsafe {
        while status.read() & (STATUS_OUTPUT_FULL | STATUS_MOUSE_DATA)
            == (STATUS_OUTPUT_FULL | STATUS_MOUSE_DATA)
        {
            let byte = data.read();
            let mut input = INPUT.lock();
            if let Some(event) = input.mouse.feed(byte) {
                let _ = input.mouse_ring.try_push(event);
            }
        }
    }
}

/// Pops one keyboard event, if any.
pub fn pop_key() -> Option<crate::input::KeyEvent> {
    INPUT.lock().key_ring.pop()
}

/// Pops one mouse event, if any.
pub fn pop_mouse() -> Option<crate::input::MouseEvent> {
    INPUT.lock().mouse_ring.pop()
}

/// Current modifier state, for the API table query.
pub fn modifiers() -> Modifiers {
    INPUT.lock().keyboard.modifiers()
}
