// src/kernel/vm/anon.rs
//! Anonymous pages and the swap table
//!
//! Anonymous memory has no file backing: fresh pages are zero-filled, and
//! eviction writes the contents to a slot on the swap disk. The swap table
//! is a bitmap with one bit per slot; one slot is eight consecutive disk
//! sectors. Slot reservation is a single scan-and-flip under the table
//! lock, and disk transfers run with no VM lock held.

use super::{AnonPage, VmError, VmResult};
use crate::kernel::driver::disk::{self, BlockDevice, SECTOR_SIZE};
use crate::kernel::mm::{self, PGSIZE, VirtAddr, bitmap::Bitmap};
use alloc::sync::Arc;
use lazy_static::lazy_static;
use spin::Mutex;

/// Sectors backing one page-sized swap slot.
pub const SECTORS_PER_PAGE: usize = PGSIZE / SECTOR_SIZE;

/// ATA slot the swap disk is mounted at.
const SWAP_CHANNEL: u8 = 1;
const SWAP_DEVICE: u8 = 1;

struct SwapTable {
    slots: Bitmap,
    disk: Arc<dyn BlockDevice>,
}

lazy_static! {
    static ref SWAP: Mutex<Option<SwapTable>> = Mutex::new(None);
}

/// Mount-time discovery: size the swap table from the disk at (1, 1), all
/// slots free.
pub fn init() {
    let disk = disk::get(SWAP_CHANNEL, SWAP_DEVICE).expect("no swap disk at (1, 1)");
    let slot_count = disk.sector_count() / SECTORS_PER_PAGE;
    *SWAP.lock() = Some(SwapTable {
        slots: Bitmap::new(slot_count),
        disk,
    });
}

fn swap_disk() -> Arc<dyn BlockDevice> {
    SWAP.lock()
        .as_ref()
        .expect("swap table not initialized")
        .disk
        .clone()
}

/// Number of slots currently holding an evicted page.
pub fn slots_in_use() -> usize {
    SWAP.lock().as_ref().map_or(0, |t| t.slots.count_set())
}

/// Fill the frame at `kva` with this page's contents. A page that was
/// never swapped out has nothing to read: the allocator hands out zeroed
/// frames.
pub(crate) fn swap_in(anon: &mut AnonPage, kva: VirtAddr) -> VmResult<()> {
    let Some(slot) = anon.swap_slot.take() else {
        return Ok(());
    };
    let disk = swap_disk();
    // SAFETY: kva is the kernel mapping of the frame being filled
    let buf = unsafe { mm::frame_bytes(kva) };
    for i in 0..SECTORS_PER_PAGE {
        disk.read_sector(
            slot * SECTORS_PER_PAGE + i,
            &mut buf[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE],
        )?;
    }
    free_slot(slot);
    Ok(())
}

/// Write the frame at `kva` to a fresh swap slot and record it.
pub(crate) fn swap_out(anon: &mut AnonPage, kva: VirtAddr) -> VmResult<()> {
    let (disk, slot) = {
        let mut guard = SWAP.lock();
        let table = guard.as_mut().expect("swap table not initialized");
        let slot = table.slots.scan_and_flip().ok_or(VmError::OutOfSwap)?;
        (table.disk.clone(), slot)
    };
    // SAFETY: kva is the kernel mapping of the frame being written out
    let buf = unsafe { mm::frame_bytes(kva) };
    for i in 0..SECTORS_PER_PAGE {
        disk.write_sector(
            slot * SECTORS_PER_PAGE + i,
            &buf[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE],
        )?;
    }
    anon.swap_slot = Some(slot);
    Ok(())
}

/// Return `slot` to the free pool.
pub(crate) fn free_slot(slot: usize) {
    let mut guard = SWAP.lock();
    if let Some(table) = guard.as_mut() {
        table.slots.reset(slot);
    }
}
