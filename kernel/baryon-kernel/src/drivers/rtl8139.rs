//! RTL8139 network interface.
//!
//! The card DMA-writes received frames into one circular buffer, each
//! preceded by a 4-byte status+length header; transmit rotates through
//! four descriptor slots. The driver keeps a software read offset into
//! the receive ring and hands complete frames to the network stack
//! (from the IRQ handler, or synchronously via `poll` for the bounded
//! blocking paths).

use baryon_core::sync::SpinLock;
use baryon_core::{kdebug, kinfo, kwarn};
use baryon_net::{MacAddr, NetDevice, NetError};
use baryon_pci::{ConfigAccess, PciDevice};

use crate::arch::x86::Port;

/// PCI identification.
pub const VENDOR: u16 = 0x10EC;
/// PCI device id.
pub const DEVICE: u16 = 0x8139;

/// RX ring: 8 KiB plus 16-byte header slack plus one max frame of
/// wrap-around overflow (the card is configured with WRAP set).
const RX_RING_SIZE: usize = 8 * 1024;
const RX_BUF_SIZE: usize = RX_RING_SIZE + 16 + 1500;
/// Four transmit slots.
const TX_SLOTS: usize = 4;
const TX_BUF_SIZE: usize = 1792;

/// Register offsets.
mod reg {
    /// MAC address, 6 bytes.
    pub const IDR0: u16 = 0x00;
    /// Transmit status, 4 dwords.
    pub const TSD0: u16 = 0x10;
    /// Transmit start address, 4 dwords.
    pub const TSAD0: u16 = 0x20;
    /// Receive buffer start address.
    pub const RBSTART: u16 = 0x30;
    /// Command register.
    pub const CMD: u16 = 0x37;
    /// Current address of packet read (CAPR).
    pub const CAPR: u16 = 0x38;
    /// Interrupt mask.
    pub const IMR: u16 = 0x3C;
    /// Interrupt status.
    pub const ISR: u16 = 0x3E;
    /// Receive configuration.
    pub const RCR: u16 = 0x44;
}

const CMD_RESET: u8 = 0x10;
const CMD_RX_ENABLE: u8 = 0x08;
const CMD_TX_ENABLE: u8 = 0x04;
const CMD_RX_EMPTY: u8 = 0x01;

/// ISR bits: receive OK, transmit OK.
const INT_ROK: u16 = 1 << 0;
const INT_TOK: u16 = 1 << 2;

/// RCR: accept broadcast/multicast/physical-match, WRAP, unlimited DMA
/// burst.
const RCR_CONFIG: u32 = 0x0000_070A | (1 << 7);

use crate::nicring::{advance_rx_offset, parse_rx_header};

/// Driver state behind the lock.
struct State {
    io_base: u16,
    mac: MacAddr,
    /// Software read offset into the RX ring.
    rx_offset: usize,
    /// Next TX slot to use.
    tx_slot: usize,
    rx_ring: &'static mut [u8],
    tx_bufs: [&'static mut [u8]; TX_SLOTS],
}

static NIC: SpinLock<Option<State>> = SpinLock::new(None);

/// Initializes the card found during PCI enumeration.
///
/// Enables bus mastering, resets, programs the receive ring and
/// transmit slots, unmasks ROK/TOK. Returns the MAC on success.
pub fn init(access: &mut dyn ConfigAccess, dev: &PciDevice) -> Option<MacAddr> {
    let io_base = dev.io_base(0)?;
    baryon_pci::enable_bus_master(access, dev.address);

    // DMA memory: page-aligned, identity-mapped.
    let rx_ring = crate::kmm::alloc_dma(RX_BUF_SIZE)?;
    let tx_bufs = [
        crate::kmm::alloc_dma(TX_BUF_SIZE)?,
        crate::kmm::alloc_dma(TX_BUF_SIZE)?,
        crate::kmm::alloc_dma(TX_BUF_SIZE)?,
        crate::kmm::alloc_dma(TX_BUF_SIZE)?,
    ];

    let p8 = |off| Port::<u8>::new(io_base + off);
    let p16 = |off| Port::<u16>::new(io_base + off);
    let p32 = |off| Port::<u32>::new(io_base + off);

    // SAFETY: Register programming per the RTL8139 datasheet; the DMA
    // addresses point at identity-mapped kernel memory we own.
    let mac = unsafe {
        p8(reg::CMD).write(CMD_RESET);
        let mut spins = 100_000u32;
        while p8(reg::CMD).read() & CMD_RESET != 0 && spins > 0 {
            spins -= 1;
        }
        if spins == 0 {
            kwarn!("rtl8139: reset timeout");
            return None;
        }

        p32(reg::RBSTART).write(rx_ring.as_ptr() as u32);
        for (i, buf) in tx_bufs.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let off = reg::TSAD0 + (i as u16) * 4;
            p32(off).write(buf.as_ptr() as u32);
        }
        p32(reg::RCR).write(RCR_CONFIG);
        p16(reg::IMR).write(INT_ROK | INT_TOK);
        p8(reg::CMD).write(CMD_RX_ENABLE | CMD_TX_ENABLE);

        let mut mac = [0u8; 6];
        for (i, b) in mac.iter_mut().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let off = reg::IDR0 + i as u16;
            *b = p8(off).read();
        }
        MacAddr(mac)
    };

    kinfo!("rtl8139: io {:#x} irq {} mac {}", io_base, dev.irq_line, mac);
    *NIC.lock() = Some(State {
        io_base,
        mac,
        rx_offset: 0,
        tx_slot: 0,
        rx_ring,
        tx_bufs,
    });
    Some(mac)
}

/// The device handle the network stack drives.
///
/// Stateless: all state lives behind the driver lock so the IRQ path
/// and task paths share one view of the rings.
#[derive(Clone, Copy)]
pub struct Rtl8139;

impl NetDevice for Rtl8139 {
    fn mac(&self) -> MacAddr {
        NIC.lock().as_ref().map_or(MacAddr::ZERO, |s| s.mac)
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), NetError> {
        let mut guard = NIC.lock();
        let state = guard.as_mut().ok_or(NetError::Device)?;
        if frame.len() > TX_BUF_SIZE {
            return Err(NetError::Param);
        }
        let slot = state.tx_slot;
        state.tx_bufs[slot][..frame.len()].copy_from_slice(frame);

        #[allow(clippy::cast_possible_truncation)]
        let tsd = Port::<u32>::new(state.io_base + reg::TSD0 + (slot as u16) * 4);
        // SAFETY: The slot buffer was just filled; writing the length
        // (with OWN clear) starts the DMA.
        unsafe {
            // Frames shorter than the Ethernet minimum are padded by
            // the prepared zeroed tail of the slot buffer.
            let len = frame.len().max(60) as u32;
            tsd.write(len & 0x1FFF);
        }
        state.tx_slot = (slot + 1) % TX_SLOTS;
        Ok(())
    }

    fn poll(&mut self, buf: &mut [u8]) -> Option<usize> {
        let mut guard = NIC.lock();
        let state = guard.as_mut()?;

        let cmd = Port::<u8>::new(state.io_base + reg::CMD);
        // SAFETY: Reading CMD is side-effect free.
        if unsafe { cmd.read() } & CMD_RX_EMPTY != 0 {
            return None;
        }

        let (payload_at, len) = match parse_rx_header(state.rx_ring, state.rx_offset) {
            Some(parsed) => parsed,
            None => {
                // Corrupt header: resynchronize by resetting the ring
                // offset to the card's view.
                kwarn!("rtl8139: bad rx header at {:#x}", state.rx_offset);
                state.rx_offset = 0;
                return None;
            }
        };

        let n = len.min(buf.len());
        buf[..n].copy_from_slice(&state.rx_ring[payload_at..payload_at + n]);

        let mut next = advance_rx_offset(state.rx_offset, len + 4);
        if next >= RX_RING_SIZE {
            next -= RX_RING_SIZE;
        }
        state.rx_offset = next;

        // CAPR trails the read pointer by 16 bytes, per the datasheet.
        #[allow(clippy::cast_possible_truncation)]
        let capr = (next as u16).wrapping_sub(16);
        // SAFETY: Updating CAPR tells the card the frame was consumed.
        unsafe { Port::<u16>::new(state.io_base + reg::CAPR).write(capr) };

        Some(n)
    }
}

/// IRQ handler body: acknowledge and drain into the stack.
pub fn interrupt() {
    let isr_value = {
        let guard = NIC.lock();
        let Some(state) = guard.as_ref() else { return };
        let isr = Port::<u16>::new(state.io_base + reg::ISR);
        // SAFETY: Reading then writing ISR acknowledges the interrupt.
        unsafe {
            let v = isr.read();
            isr.write(v);
            v
        }
    };
    if isr_value & INT_ROK != 0 {
        crate::knet::drain_nic();
    }
    if isr_value & INT_TOK != 0 {
        kdebug!("rtl8139: tx complete");
    }
}
