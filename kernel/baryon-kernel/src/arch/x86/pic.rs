//! Legacy 8259 PIC: remap to vectors 32-47, then mask everything.
//!
//! The IO-APIC delivers interrupts afterwards; the remap only ensures a
//! stray legacy IRQ cannot alias a CPU exception vector.

use super::{io_wait, Port};

const PIC1_CMD: u16 = 0x20;
const PIC1_DATA: u16 = 0x21;
const PIC2_CMD: u16 = 0xA0;
const PIC2_DATA: u16 = 0xA1;

/// ICW1: initialize, expect ICW4.
const ICW1_INIT: u8 = 0x11;
/// ICW4: 8086 mode.
const ICW4_8086: u8 = 0x01;

/// Remaps both PICs to 32-47 and masks all their lines.
///
/// # Safety
///
/// Must run with interrupts disabled, once, during early boot.
pub unsafe fn remap_and_disable() {
    let pic1_cmd = Port::<u8>::new(PIC1_CMD);
    let pic1_data = Port::<u8>::new(PIC1_DATA);
    let pic2_cmd = Port::<u8>::new(PIC2_CMD);
    let pic2_data = Port::<u8>::new(PIC2_DATA);

    // SAFETY: The initialization sequence below is the documented ICW
    // protocol; each write targets a PIC register.
    unsafe {
        pic1_cmd.write(ICW1_INIT);
        io_wait();
        pic2_cmd.write(ICW1_INIT);
        io_wait();

        pic1_data.write(32); // master vector base
        io_wait();
        pic2_data.write(40); // slave vector base
        io_wait();

        pic1_data.write(4); // slave on IRQ2
        io_wait();
        pic2_data.write(2); // cascade identity
        io_wait();

        pic1_data.write(ICW4_8086);
        io_wait();
        pic2_data.write(ICW4_8086);
        io_wait();

        pic1_data.write(0xFF);
        pic2_data.write(0xFF);
    }
}
