//! Filesystem glue: the mounted PFS32 volume over the ATA driver.

use baryon_core::sync::SpinLock;
use baryon_core::{kerror, kinfo};
use baryon_fs::{BlockDevice, Cred, FsError, Volume, BLOCK_SIZE};

use crate::drivers::{ata, rtc};

/// LBA where the PFS32 volume starts on drive 0.
const VOLUME_START_LBA: u32 = 2048;

/// Block device view of a drive-0 region.
pub struct AtaDisk {
    base_lba: u32,
    blocks: u32,
}

impl BlockDevice for AtaDisk {
    fn read_block(&mut self, index: u32, buf: &mut [u8; BLOCK_SIZE]) -> Result<(), FsError> {
        if index >= self.blocks {
            return Err(FsError::Io);
        }
        ata::read_sector(0, self.base_lba + index, buf).map_err(|_| FsError::Io)
    }

    fn write_block(&mut self, index: u32, buf: &[u8; BLOCK_SIZE]) -> Result<(), FsError> {
        if index >= self.blocks {
            return Err(FsError::Io);
        }
        ata::write_sector(0, self.base_lba + index, buf).map_err(|_| FsError::Io)
    }
}

static VOLUME: SpinLock<Option<Volume<AtaDisk>>> = SpinLock::new(None);

fn clock() -> u32 {
    rtc::now_unix()
}

/// Probes drive 0 and mounts (or formats) the volume.
pub fn init() {
    let info = match ata::identify(0) {
        Ok(info) => info,
        Err(e) => {
            kerror!("fs: no disk ({})", e);
            return;
        }
    };
    kinfo!("fs: drive 0 '{}', {} sectors", info.model_str(), info.sectors);
    if info.sectors <= VOLUME_START_LBA {
        kerror!("fs: disk too small for a volume");
        return;
    }
    let blocks = info.sectors - VOLUME_START_LBA;
    let disk = AtaDisk {
        base_lba: VOLUME_START_LBA,
        blocks,
    };

    let volume = match Volume::mount(disk, clock) {
        Ok(volume) => volume,
        Err(FsError::NoFs) => {
            kinfo!("fs: no filesystem, formatting {} blocks", blocks);
            let disk = AtaDisk {
                base_lba: VOLUME_START_LBA,
                blocks,
            };
            match Volume::format(disk, "BARYON", blocks, clock) {
                Ok(volume) => volume,
                Err(e) => {
                    kerror!("fs: format failed ({})", e);
                    return;
                }
            }
        }
        Err(e) => {
            kerror!("fs: mount failed ({})", e);
            return;
        }
    };
    kinfo!("fs: mounted '{}'", volume.superblock().label());
    *VOLUME.lock() = Some(volume);
}

/// Runs `f` with the mounted volume.
pub fn with_volume<R>(f: impl FnOnce(&mut Volume<AtaDisk>) -> R) -> Result<R, FsError> {
    let mut guard = VOLUME.lock();
    match guard.as_mut() {
        Some(volume) => Ok(f(volume)),
        None => Err(FsError::NoFs),
    }
}

/// The caller identity for filesystem operations.
#[must_use]
pub fn current_cred() -> Cred {
    let uid = crate::ksched::current_uid();
    Cred { uid, gid: uid }
}

/// The volume generation counter (0 when unmounted).
#[must_use]
pub fn generation() -> u32 {
    with_volume(|v| v.generation()).unwrap_or(0)
}
