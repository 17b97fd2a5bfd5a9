// src/kernel/driver/disk.rs
//! ブロックデバイス抽象
//!
//! 512 バイトセクタの同期ブロックデバイスと、ATA 流の (channel, device)
//! 番号によるデバイスレジストリを提供します。スワップディスクは慣例的に
//! (1, 1) に登録されます。

use crate::kernel::core::KernelResult;
use crate::kernel::core::result::DeviceError;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use lazy_static::lazy_static;
use spin::Mutex;

/// Bytes in one disk sector.
pub const SECTOR_SIZE: usize = 512;

/// A synchronous block device. Calls return once the transfer is complete.
pub trait BlockDevice: Send + Sync {
    /// Device capacity in sectors.
    fn sector_count(&self) -> usize;

    /// Read one sector into `buf` (must be exactly [`SECTOR_SIZE`] bytes).
    fn read_sector(&self, sector: usize, buf: &mut [u8]) -> KernelResult<()>;

    /// Write one sector from `buf` (must be exactly [`SECTOR_SIZE`] bytes).
    fn write_sector(&self, sector: usize, buf: &[u8]) -> KernelResult<()>;
}

/// RAM-backed block device.
///
/// Stands in for an ATA drive wherever a disk is needed; the swap device
/// in particular is a `RamDisk` until a real controller driver exists.
pub struct RamDisk {
    sectors: usize,
    data: Mutex<Vec<u8>>,
}

impl RamDisk {
    /// Create a zero-filled disk of `sectors` sectors.
    pub fn new(sectors: usize) -> Self {
        Self {
            sectors,
            data: Mutex::new(vec![0; sectors * SECTOR_SIZE]),
        }
    }
}

impl BlockDevice for RamDisk {
    fn sector_count(&self) -> usize {
        self.sectors
    }

    fn read_sector(&self, sector: usize, buf: &mut [u8]) -> KernelResult<()> {
        if sector >= self.sectors || buf.len() != SECTOR_SIZE {
            return Err(DeviceError::IoError.into());
        }
        let data = self.data.lock();
        buf.copy_from_slice(&data[sector * SECTOR_SIZE..(sector + 1) * SECTOR_SIZE]);
        Ok(())
    }

    fn write_sector(&self, sector: usize, buf: &[u8]) -> KernelResult<()> {
        if sector >= self.sectors || buf.len() != SECTOR_SIZE {
            return Err(DeviceError::IoError.into());
        }
        let mut data = self.data.lock();
        data[sector * SECTOR_SIZE..(sector + 1) * SECTOR_SIZE].copy_from_slice(buf);
        Ok(())
    }
}

lazy_static! {
    static ref DISKS: Mutex<BTreeMap<(u8, u8), Arc<dyn BlockDevice>>> =
        Mutex::new(BTreeMap::new());
}

/// Register `device` at the ATA-style `channel`/`devno` slot, replacing any
/// previously registered device.
pub fn register(channel: u8, devno: u8, device: Arc<dyn BlockDevice>) {
    DISKS.lock().insert((channel, devno), device);
}

/// Look up the device registered at `channel`/`devno`.
pub fn get(channel: u8, devno: u8) -> Option<Arc<dyn BlockDevice>> {
    DISKS.lock().get(&(channel, devno)).cloned()
}
