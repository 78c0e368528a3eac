//! PCI enumeration over an abstract configuration-space accessor.
//!
//! The kernel provides the legacy port-CAM (`0xCF8`/`0xCFC`)
//! implementation of [`ConfigAccess`]; tests provide a fake bus. The
//! scan walks bus/device/function triples, captures identification,
//! class, BARs and the interrupt line, and can flip the bus-master
//! enable bit for DMA-capable devices.

#![cfg_attr(not(test), no_std)]

use baryon_core::kdebug;
use bitflags::bitflags;

/// Invalid vendor id: no device present.
const VENDOR_NONE: u16 = 0xFFFF;
/// Command register offset.
const REG_COMMAND: u8 = 0x04;
/// Header type register offset (within the 0x0C dword).
const REG_HEADER: u8 = 0x0C;
/// First BAR offset.
const REG_BAR0: u8 = 0x10;
/// Interrupt line register (within the 0x3C dword).
const REG_IRQ: u8 = 0x3C;

bitflags! {
    /// PCI command register bits the kernel cares about.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Command: u16 {
        /// Respond to I/O space accesses.
        const IO_SPACE   = 1 << 0;
        /// Respond to memory space accesses.
        const MEM_SPACE  = 1 << 1;
        /// Device may master the bus (DMA).
        const BUS_MASTER = 1 << 2;
    }
}

/// A bus/device/function triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciAddress {
    /// Bus number.
    pub bus: u8,
    /// Device number (0-31).
    pub device: u8,
    /// Function number (0-7).
    pub function: u8,
}

/// Raw access to configuration space.
///
/// Reads and writes are whole 32-bit dwords at dword-aligned offsets,
/// which is all the legacy mechanism supports.
pub trait ConfigAccess {
    /// Reads the dword at `offset` (must be 4-byte aligned).
    fn read32(&mut self, addr: PciAddress, offset: u8) -> u32;

    /// Writes the dword at `offset`.
    fn write32(&mut self, addr: PciAddress, offset: u8, value: u32);
}

/// An enumerated function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciDevice {
    /// Location on the bus.
    pub address: PciAddress,
    /// Vendor id.
    pub vendor: u16,
    /// Device id.
    pub device: u16,
    /// Class code.
    pub class: u8,
    /// Subclass code.
    pub subclass: u8,
    /// Programming interface.
    pub prog_if: u8,
    /// Base address registers, raw.
    pub bar: [u32; 6],
    /// Legacy interrupt line.
    pub irq_line: u8,
}

impl PciDevice {
    /// The I/O port base of a BAR, or `None` for memory BARs.
    #[must_use]
    pub fn io_base(&self, index: usize) -> Option<u16> {
        let bar = self.bar[index];
        if bar & 1 == 1 {
            #[allow(clippy::cast_possible_truncation)]
            let base = (bar & !0x3) as u16;
            Some(base)
        } else {
            None
        }
    }

    /// The memory base of a BAR, or `None` for I/O BARs.
    #[must_use]
    pub fn mem_base(&self, index: usize) -> Option<u32> {
        let bar = self.bar[index];
        (bar & 1 == 0).then_some(bar & !0xF)
    }
}

/// Scans buses 0-255, filling `out`; returns the number found.
///
/// Multi-function devices are followed through all eight functions;
/// absent functions read vendor `0xFFFF` and are skipped.
pub fn enumerate(access: &mut dyn ConfigAccess, out: &mut [PciDevice]) -> usize {
    let mut count = 0;
    'scan: for bus in 0..=255u8 {
        for device in 0..32u8 {
            let probe = PciAddress {
                bus,
                device,
                function: 0,
            };
            let id = access.read32(probe, 0);
            #[allow(clippy::cast_possible_truncation)]
            let vendor = id as u16;
            if vendor == VENDOR_NONE {
                continue;
            }
            let header = (access.read32(probe, REG_HEADER) >> 16) as u8;
            let functions = if header & 0x80 != 0 { 8 } else { 1 };

            for function in 0..functions {
                let addr = PciAddress {
                    bus,
                    device,
                    function,
                };
                let id = access.read32(addr, 0);
                #[allow(clippy::cast_possible_truncation)]
                let vendor = id as u16;
                if vendor == VENDOR_NONE {
                    continue;
                }
                if count == out.len() {
                    break 'scan;
                }

                let class_reg = access.read32(addr, 0x08);
                let mut bar = [0u32; 6];
                for (i, slot) in bar.iter_mut().enumerate() {
                    #[allow(clippy::cast_possible_truncation)]
                    let offset = REG_BAR0 + (i as u8) * 4;
                    *slot = access.read32(addr, offset);
                }
                #[allow(clippy::cast_possible_truncation)]
                let dev = PciDevice {
                    address: addr,
                    vendor,
                    device: (id >> 16) as u16,
                    class: (class_reg >> 24) as u8,
                    subclass: (class_reg >> 16) as u8,
                    prog_if: (class_reg >> 8) as u8,
                    bar,
                    irq_line: access.read32(addr, REG_IRQ) as u8,
                };
                kdebug!(
                    "pci: {:02x}:{:02x}.{} {:04x}:{:04x} class {:02x}.{:02x}",
                    bus,
                    device,
                    function,
                    dev.vendor,
                    dev.device,
                    dev.class,
                    dev.subclass
                );
                out[count] = dev;
                count += 1;
            }
        }
    }
    count
}

/// Sets the bus-master enable bit so the device can DMA.
pub fn enable_bus_master(access: &mut dyn ConfigAccess, addr: PciAddress) {
    let dword = access.read32(addr, REG_COMMAND);
    let command = Command::from_bits_truncate(dword as u16) | Command::BUS_MASTER;
    let updated = (dword & 0xFFFF_0000) | u32::from(command.bits());
    access.write32(addr, REG_COMMAND, updated);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// A fake configuration space holding a few devices.
    struct FakeBus {
        regs: HashMap<(u8, u8, u8, u8), u32>,
    }

    impl FakeBus {
        fn new() -> Self {
            Self {
                regs: HashMap::new(),
            }
        }

        fn add_device(
            &mut self,
            bus: u8,
            device: u8,
            vendor: u16,
            dev_id: u16,
            class: u8,
            subclass: u8,
            bar0: u32,
            irq: u8,
        ) {
            let key = |off| (bus, device, 0, off);
            self.regs
                .insert(key(0), u32::from(dev_id) << 16 | u32::from(vendor));
            self.regs
                .insert(key(8), u32::from(class) << 24 | u32::from(subclass) << 16);
            self.regs.insert(key(0x10), bar0);
            self.regs.insert(key(0x3C), u32::from(irq));
        }
    }

    impl ConfigAccess for FakeBus {
        fn read32(&mut self, addr: PciAddress, offset: u8) -> u32 {
            *self
                .regs
                .get(&(addr.bus, addr.device, addr.function, offset))
                .unwrap_or(&0xFFFF_FFFF)
        }

        fn write32(&mut self, addr: PciAddress, offset: u8, value: u32) {
            self.regs
                .insert((addr.bus, addr.device, addr.function, offset), value);
        }
    }

    #[test]
    fn scan_finds_devices_and_fields() {
        let mut bus = FakeBus::new();
        // An RTL8139 behind an IDE controller.
        bus.add_device(0, 3, 0x10EC, 0x8139, 0x02, 0x00, 0xC001, 11);
        bus.add_device(0, 1, 0x8086, 0x7010, 0x01, 0x01, 0x1F1, 14);
        // Header-type reads return 0xFFFFFFFF (single function) which is
        // fine: bit 7 set means multifunction, and absent functions are
        // vendor 0xFFFF anyway.

        let mut found = [PciDevice {
            address: PciAddress { bus: 0, device: 0, function: 0 },
            vendor: 0,
            device: 0,
            class: 0,
            subclass: 0,
            prog_if: 0,
            bar: [0; 6],
            irq_line: 0,
        }; 8];
        let n = enumerate(&mut bus, &mut found);
        assert_eq!(n, 2);

        let nic = found[..n].iter().find(|d| d.vendor == 0x10EC).unwrap();
        assert_eq!(nic.device, 0x8139);
        assert_eq!(nic.class, 0x02);
        assert_eq!(nic.irq_line, 11);
        assert_eq!(nic.io_base(0), Some(0xC000));
        assert_eq!(nic.mem_base(0), None);
    }

    #[test]
    fn empty_bus_finds_nothing() {
        let mut bus = FakeBus::new();
        let mut found = [PciDevice {
            address: PciAddress { bus: 0, device: 0, function: 0 },
            vendor: 0,
            device: 0,
            class: 0,
            subclass: 0,
            prog_if: 0,
            bar: [0; 6],
            irq_line: 0,
        }; 4];
        assert_eq!(enumerate(&mut bus, &mut found), 0);
    }

    #[test]
    fn bus_master_bit_is_set_preserving_others() {
        let mut bus = FakeBus::new();
        let addr = PciAddress { bus: 0, device: 3, function: 0 };
        bus.write32(addr, 0x04, 0x0010_0003);
        enable_bus_master(&mut bus, addr);
        assert_eq!(bus.read32(addr, 0x04), 0x0010_0007);
    }
}
