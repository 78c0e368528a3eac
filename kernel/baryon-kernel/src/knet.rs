//! Network glue: the stack singleton wired to the RTL8139.

use baryon_core::sync::IrqLock;
use baryon_core::{kinfo, kwarn};
use baryon_net::{Ipv4Addr, NetConfig, NetStack};
use baryon_pci::{ConfigAccess, PciAddress, PciDevice};

use crate::arch::x86::{apic, isr, Port};
use crate::config::KernelConfig;
use crate::drivers::rtl8139::{self, Rtl8139};
use crate::time::{ticks, KernelClock};

/// Legacy configuration-mechanism-1 ports.
const CAM_ADDRESS: u16 = 0xCF8;
const CAM_DATA: u16 = 0xCFC;

/// Port-based PCI configuration access.
pub struct PortCam;

impl ConfigAccess for PortCam {
    fn read32(&mut self, addr: PciAddress, offset: u8) -> u32 {
        let selector = 0x8000_0000
            | (u32::from(addr.bus) << 16)
            | (u32::from(addr.device) << 11)
            | (u32::from(addr.function) << 8)
            | u32::from(offset & 0xFC);
        // SAFETY: The CF8/CFC pair is the legacy config mechanism.
        unsafe {
            Port::<u32>::new(CAM_ADDRESS).write(selector);
            Port::<u32>::new(CAM_DATA).read()
        }
    }

    fn write32(&mut self, addr: PciAddress, offset: u8, value: u32) {
        let selector = 0x8000_0000
            | (u32::from(addr.bus) << 16)
            | (u32::from(addr.device) << 11)
            | (u32::from(addr.function) << 8)
            | u32::from(offset & 0xFC);
        // SAFETY: See `read32`.
        unsafe {
            Port::<u32>::new(CAM_ADDRESS).write(selector);
            Port::<u32>::new(CAM_DATA).write(value);
        }
    }
}

static STACK: IrqLock<Option<NetStack>> = IrqLock::new(None);

/// Enumerates PCI, brings up the NIC, creates the stack, and either
/// applies the static configuration or starts DHCP.
pub fn init(cfg: &KernelConfig) {
    let mut cam = PortCam;
    let mut found = [blank_device(); 24];
    let count = baryon_pci::enumerate(&mut cam, &mut found);
    kinfo!("pci: {} functions", count);

    let Some(nic) = found[..count]
        .iter()
        .find(|d| d.vendor == rtl8139::VENDOR && d.device == rtl8139::DEVICE)
    else {
        kwarn!("net: no RTL8139 present");
        return;
    };

    if rtl8139::init(&mut cam, nic).is_none() {
        return;
    }
    let vector = 32 + nic.irq_line;
    apic::route_gsi(nic.irq_line, vector);
    isr::set_nic_vector(vector);

    let mut stack = match cfg.ip {
        Some((ip, _)) => NetStack::new(NetConfig {
            ip,
            netmask: cfg.netmask(),
            gateway: cfg.gateway.unwrap_or(Ipv4Addr::UNSPECIFIED),
            dns_server: cfg.dns.unwrap_or(Ipv4Addr::UNSPECIFIED),
        }),
        None => NetStack::new(NetConfig::unconfigured()),
    };

    if cfg.ip.is_none() {
        let mut dev = Rtl8139;
        if stack.dhcp_discover(&mut dev, ticks()).is_err() {
            kwarn!("net: dhcp discover failed");
        }
    }
    *STACK.lock() = Some(stack);
}

/// Runs `f` with the stack and the device.
pub fn with_stack<R>(f: impl FnOnce(&mut NetStack, &mut Rtl8139, &KernelClock) -> R) -> Option<R> {
    let mut guard = STACK.lock();
    let stack = guard.as_mut()?;
    let mut dev = Rtl8139;
    Some(f(stack, &mut dev, &KernelClock))
}

/// NIC interrupt body: drain received frames into the stack.
pub fn nic_interrupt() {
    rtl8139::interrupt();
}

/// The reserved software vector: same drain, raised by drivers that
/// complete work outside the IRQ.
pub fn soft_interrupt() {
    drain_nic();
}

/// Pumps pending frames out of the NIC into the stack.
pub fn drain_nic() {
    let now = ticks();
    let mut guard = STACK.lock();
    if let Some(stack) = guard.as_mut() {
        let mut dev = Rtl8139;
        stack.poll_device(&mut dev, now);
    }
}

/// Once-a-second housekeeping from the timer path.
pub fn housekeeping(now: u64) {
    let mut guard = STACK.lock();
    if let Some(stack) = guard.as_mut() {
        let mut dev = Rtl8139;
        stack.on_second(&mut dev, now);
    }
}

fn blank_device() -> PciDevice {
    PciDevice {
        address: PciAddress {
            bus: 0,
            device: 0,
            function: 0,
        },
        vendor: 0,
        device: 0,
        class: 0,
        subclass: 0,
        prog_if: 0,
        bar: [0; 6],
        irq_line: 0,
    }
}
