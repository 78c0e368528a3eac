//! 16550 UART on COM1: the debug log sink.
//!
//! Initialized with a loopback self-test before anything else so the
//! earliest boot messages have somewhere to go. Writes busy-wait on the
//! transmit-holding-empty bit.

use core::fmt::{self, Write};

use bitflags::bitflags;

use crate::arch::x86::Port;

/// COM1 base address.
const COM1: u16 = 0x3F8;

/// Register offsets from the base.
mod reg {
    /// Transmit holding / receive buffer (DLAB=0), divisor low (DLAB=1).
    pub const DATA: u16 = 0;
    /// Interrupt enable (DLAB=0), divisor high (DLAB=1).
    pub const IER: u16 = 1;
    /// FIFO control (write).
    pub const FCR: u16 = 2;
    /// Line control.
    pub const LCR: u16 = 3;
    /// Modem control.
    pub const MCR: u16 = 4;
    /// Line status.
    pub const LSR: u16 = 5;
}

bitflags! {
    /// Line status register bits.
    #[derive(Debug, Clone, Copy)]
    struct Lsr: u8 {
        /// Receive data ready.
        const DATA_READY = 1 << 0;
        /// Transmit holding register empty.
        const THR_EMPTY  = 1 << 5;
    }
}

/// A handle to COM1. Stateless: the hardware keeps the configuration.
#[derive(Debug, Clone, Copy)]
pub struct Serial;

impl Serial {
    /// Configures 115200 8N1 with FIFOs and runs a loopback self-test.
    ///
    /// Returns `false` when the loopback byte does not come back (no
    /// UART present); logging then stays on the null sink.
    pub fn init() -> bool {
        let p = |off| Port::<u8>::new(COM1 + off);
        // SAFETY: COM1 register programming per the 16550 datasheet.
        unsafe {
            p(reg::IER).write(0x00); // no interrupts; polled
            p(reg::LCR).write(0x80); // DLAB on
            p(reg::DATA).write(0x01); // divisor 1 = 115200
            p(reg::IER).write(0x00);
            p(reg::LCR).write(0x03); // 8N1, DLAB off
            p(reg::FCR).write(0xC7); // FIFO on, clear, 14-byte trigger
            p(reg::MCR).write(0x1E); // loopback for the self-test
            p(reg::DATA).write(0xAE);
            if p(reg::DATA).read() != 0xAE {
                return false;
            }
            p(reg::MCR).write(0x0F); // normal operation
        }
        true
    }

    fn write_byte(self, byte: u8) {
        let lsr = Port::<u8>::new(COM1 + reg::LSR);
        let data = Port::<u8>::new(COM1 + reg::DATA);
        // SAFETY: Polled transmit per the datasheet.
        unsafe {
            while !Lsr::from_bits_truncate(lsr.read()).contains(Lsr::THR_EMPTY) {
                core::hint::spin_loop();
            }
            data.write(byte);
        }
    }
}

impl Write for Serial {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
        Ok(())
    }
}

/// Log-sink adapter installed into `baryon_core::log`.
pub fn sink(args: fmt::Arguments<'_>) {
    let _ = Serial.write_fmt(args);
}
