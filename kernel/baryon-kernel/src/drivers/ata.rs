//! ATA PIO on the primary bus: LBA28, 512-byte sectors.
//!
//! Polled transfers only; every wait is bounded so a missing or wedged
//! drive degrades to an error instead of a hang. Writes are followed by
//! a cache flush.

use core::fmt;

use baryon_core::kwarn;

use crate::arch::x86::Port;

const ATA_DATA: u16 = 0x1F0;
const ATA_SECTOR_COUNT: u16 = 0x1F2;
const ATA_LBA_LOW: u16 = 0x1F3;
const ATA_LBA_MID: u16 = 0x1F4;
const ATA_LBA_HIGH: u16 = 0x1F5;
const ATA_DRIVE: u16 = 0x1F6;
const ATA_STATUS_CMD: u16 = 0x1F7;
const ATA_CONTROL: u16 = 0x3F6;

const CMD_READ: u8 = 0x20;
const CMD_WRITE: u8 = 0x30;
const CMD_CACHE_FLUSH: u8 = 0xE7;
const CMD_IDENTIFY: u8 = 0xEC;

const STATUS_ERR: u8 = 1 << 0;
const STATUS_DRQ: u8 = 1 << 3;
const STATUS_BSY: u8 = 1 << 7;

/// Bounded spin iterations for BSY/DRQ waits.
const SPIN_LIMIT: u32 = 100_000;

/// Disk driver failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtaError {
    /// BSY never cleared.
    BusyTimeout,
    /// DRQ never asserted.
    DrqTimeout,
    /// The device raised ERR.
    ErrorBit,
    /// No such drive.
    NoDrive,
}

impl fmt::Display for AtaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BusyTimeout => f.write_str("busy timeout"),
            Self::DrqTimeout => f.write_str("data-request timeout"),
            Self::ErrorBit => f.write_str("device error"),
            Self::NoDrive => f.write_str("no such drive"),
        }
    }
}

/// An identified drive.
#[derive(Debug, Clone, Copy)]
pub struct DriveInfo {
    /// Total addressable sectors (LBA28).
    pub sectors: u32,
    /// Model string from IDENTIFY, byte-swapped to readable order.
    pub model: [u8; 40],
}

impl DriveInfo {
    /// The model as trimmed text.
    #[must_use]
    pub fn model_str(&self) -> &str {
        core::str::from_utf8(&self.model)
            .unwrap_or("")
            .trim_end_matches([' ', '\0'])
    }
}

fn status() -> u8 {
    // SAFETY: Status reads are side-effect free (they clear IRQ state,
    // which polled operation does not use).
    unsafe { Port::<u8>::new(ATA_STATUS_CMD).read() }
}

/// 400 ns settle delay: four control-register reads.
fn settle() {
    for _ in 0..4 {
        // SAFETY: Alternate-status reads have no side effects.
        let _ = unsafe { Port::<u8>::new(ATA_CONTROL).read() };
    }
}

fn wait_not_busy() -> Result<(), AtaError> {
    for _ in 0..SPIN_LIMIT {
        if status() & STATUS_BSY == 0 {
            return Ok(());
        }
        settle();
    }
    Err(AtaError::BusyTimeout)
}

fn wait_drq() -> Result<(), AtaError> {
    for _ in 0..SPIN_LIMIT {
        let s = status();
        if s & STATUS_ERR != 0 {
            return Err(AtaError::ErrorBit);
        }
        if s & STATUS_DRQ != 0 {
            return Ok(());
        }
        settle();
    }
    Err(AtaError::DrqTimeout)
}

/// Programs drive select, LBA and a sector count of one.
///
/// # Safety
///
/// Caller must be mid-command-sequence on the primary bus.
unsafe fn select(drive: u8, lba: u32) {
    // SAFETY: Register programming per the ATA command protocol.
    unsafe {
        Port::<u8>::new(ATA_DRIVE).write(0xE0 | ((drive & 1) << 4) | (((lba >> 24) & 0x0F) as u8));
        Port::<u8>::new(ATA_SECTOR_COUNT).write(1);
        Port::<u8>::new(ATA_LBA_LOW).write(lba as u8);
        Port::<u8>::new(ATA_LBA_MID).write((lba >> 8) as u8);
        Port::<u8>::new(ATA_LBA_HIGH).write((lba >> 16) as u8);
    }
}

/// Reads one sector.
pub fn read_sector(drive: u8, lba: u32, buf: &mut [u8; 512]) -> Result<(), AtaError> {
    if drive > 1 {
        return Err(AtaError::NoDrive);
    }
    wait_not_busy()?;
    // SAFETY: Command sequence per the ATA protocol; the data loop
    // reads exactly the 256 words the device supplies.
    unsafe {
        select(drive, lba);
        Port::<u8>::new(ATA_STATUS_CMD).write(CMD_READ);
    }
    wait_drq()?;
    let data = Port::<u16>::new(ATA_DATA);
    for chunk in buf.chunks_exact_mut(2) {
        // SAFETY: DRQ is asserted; the device expects 256 word reads.
        let word = unsafe { data.read() };
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    Ok(())
}

/// Writes one sector, then flushes the device cache.
pub fn write_sector(drive: u8, lba: u32, buf: &[u8; 512]) -> Result<(), AtaError> {
    if drive > 1 {
        return Err(AtaError::NoDrive);
    }
    wait_not_busy()?;
    // SAFETY: See `read_sector`.
    unsafe {
        select(drive, lba);
        Port::<u8>::new(ATA_STATUS_CMD).write(CMD_WRITE);
    }
    wait_drq()?;
    let data = Port::<u16>::new(ATA_DATA);
    for chunk in buf.chunks_exact(2) {
        let word = u16::from_le_bytes([chunk[0], chunk[1]]);
        // SAFETY: DRQ is asserted; the device expects 256 word writes.
        unsafe { data.write(word) };
    }
    // SAFETY: Cache flush after the final word, per the write protocol.
    unsafe { Port::<u8>::new(ATA_STATUS_CMD).write(CMD_CACHE_FLUSH) };
    wait_not_busy()
}

/// Probes a drive with IDENTIFY.
pub fn identify(drive: u8) -> Result<DriveInfo, AtaError> {
    if drive > 1 {
        return Err(AtaError::NoDrive);
    }
    // SAFETY: IDENTIFY command sequence; LBA registers zeroed first.
    unsafe {
        Port::<u8>::new(ATA_DRIVE).write(if drive == 0 { 0xA0 } else { 0xB0 });
        Port::<u8>::new(ATA_SECTOR_COUNT).write(0);
        Port::<u8>::new(ATA_LBA_LOW).write(0);
        Port::<u8>::new(ATA_LBA_MID).write(0);
        Port::<u8>::new(ATA_LBA_HIGH).write(0);
        Port::<u8>::new(ATA_STATUS_CMD).write(CMD_IDENTIFY);
    }
    if status() == 0 {
        return Err(AtaError::NoDrive);
    }
    wait_not_busy()?;
    // A packet device floats the signature registers non-zero.
    // SAFETY: Reading LBA registers is side-effect free.
    let (mid, high) = unsafe {
        (
            Port::<u8>::new(ATA_LBA_MID).read(),
            Port::<u8>::new(ATA_LBA_HIGH).read(),
        )
    };
    if mid != 0 || high != 0 {
        kwarn!("ata: drive {} is not an ATA device", drive);
        return Err(AtaError::NoDrive);
    }
    wait_drq()?;

    let data = Port::<u16>::new(ATA_DATA);
    let mut words = [0u16; 256];
    for word in &mut words {
        // SAFETY: IDENTIFY supplies exactly 256 words.
        *word = unsafe { data.read() };
    }

    let sectors = u32::from(words[60]) | (u32::from(words[61]) << 16);
    let mut model = [0u8; 40];
    for i in 0..20 {
        let w = words[27 + i];
        // IDENTIFY strings are byte-swapped within each word.
        model[i * 2] = (w >> 8) as u8;
        model[i * 2 + 1] = (w & 0xFF) as u8;
    }
    Ok(DriveInfo { sectors, model })
}
