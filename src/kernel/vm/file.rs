// src/kernel/vm/file.rs
//! File-backed pages and memory-mapped files
//!
//! The file itself is the backing store: faulting in reads the chunk's
//! bytes (zero-filling the tail), and a page whose hardware dirty bit is
//! set writes `read_bytes` back on eviction and unmap. Zero padding never
//! reaches the file.

use super::{Page, PageFlavor, PageKind, VmError, VmResult, alloc_page_with_initializer};
use crate::kernel::fs::{FILESYS_LOCK, File};
use crate::kernel::mm::{self, PGSIZE, VirtAddr, page_table::Pml4};
use crate::kernel::task::Task;
use alloc::boxed::Box;
use alloc::sync::Arc;
use spin::Mutex;

/// Backing-store description for one page of a file mapping.
///
/// Carried as the aux of the lazy loader while the page is uninit, then as
/// the file-page state after realization. Each page owns its file handle.
pub struct FileInfo {
    pub file: File,
    /// Byte offset of this chunk in the file.
    pub offset: usize,
    /// Bytes to read from the file (<= PGSIZE).
    pub read_bytes: usize,
    /// Trailing bytes to zero-fill (= PGSIZE - read_bytes).
    pub zero_bytes: usize,
    /// User address of this chunk.
    pub upage: VirtAddr,
    pub writable: bool,
    /// Total bytes of the enclosing mmap region, carried on every page of
    /// the region for `munmap`. `None` on executable-segment pages.
    pub mmap_length: Option<usize>,
}

impl FileInfo {
    /// Duplicate for fork: same chunk, independently reopened handle.
    pub fn duplicate(&self) -> FileInfo {
        FileInfo {
            file: self.file.reopen(),
            offset: self.offset,
            read_bytes: self.read_bytes,
            zero_bytes: self.zero_bytes,
            upage: self.upage,
            writable: self.writable,
            mmap_length: self.mmap_length,
        }
    }
}

/// The lazy loader shared by executable segments and file mappings.
pub(crate) fn lazy_load(_page: &mut Page, kva: VirtAddr, info: &FileInfo) -> VmResult<()> {
    swap_in(info, kva)
}

/// Read the chunk into the frame at `kva` and zero the tail.
pub(crate) fn swap_in(info: &FileInfo, kva: VirtAddr) -> VmResult<()> {
    // SAFETY: kva is the kernel mapping of the frame being filled
    let buf = unsafe { mm::frame_bytes(kva) };
    {
        let _fs = FILESYS_LOCK.lock();
        if info.file.read_at(&mut buf[..info.read_bytes], info.offset) != info.read_bytes {
            return Err(VmError::ShortIo);
        }
    }
    buf[info.read_bytes..].fill(0);
    Ok(())
}

/// Write the chunk back if its hardware dirty bit is set, then clear the
/// bit. The frame disconnect is the caller's job; no swap slot is
/// consumed either way.
pub(crate) fn swap_out(
    info: &FileInfo,
    va: VirtAddr,
    pml4: &Arc<Mutex<Pml4>>,
    kva: VirtAddr,
) -> VmResult<()> {
    if !pml4.lock().is_dirty(va) {
        return Ok(());
    }
    // SAFETY: kva is the kernel mapping of the frame being written back
    let buf = unsafe { mm::frame_bytes(kva) };
    {
        let _fs = FILESYS_LOCK.lock();
        if info.file.write_at(&buf[..info.read_bytes], info.offset) != info.read_bytes {
            return Err(VmError::ShortIo);
        }
    }
    pml4.lock().set_dirty(va, false);
    Ok(())
}

/// Map `length` bytes of `file` starting at `offset` into `task` at
/// `addr`. Every page of the region is created lazy; nothing is read until
/// the first fault. Returns the mapped base, or `None` (the MAP_FAILED
/// sentinel) if the arguments are rejected, with no side effects.
pub fn do_mmap(
    task: &Task,
    addr: VirtAddr,
    length: usize,
    writable: bool,
    file: &File,
    offset: usize,
) -> Option<VirtAddr> {
    if addr.as_usize() == 0 || !addr.is_aligned(PGSIZE) || offset % PGSIZE != 0 {
        return None;
    }
    if length == 0 {
        return None;
    }
    let file_len = file.length();
    if file_len == 0 {
        return None;
    }

    let page_count = length.div_ceil(PGSIZE);
    {
        let spt = task.spt().lock();
        for i in 0..page_count {
            if spt.find(addr + i * PGSIZE).is_some() {
                return None;
            }
        }
    }

    let mut read_left = length.min(file_len.saturating_sub(offset));
    for i in 0..page_count {
        let upage = addr + i * PGSIZE;
        let page_read = read_left.min(PGSIZE);
        let info = FileInfo {
            file: file.reopen(),
            offset: offset + i * PGSIZE,
            read_bytes: page_read,
            zero_bytes: PGSIZE - page_read,
            upage,
            writable,
            mmap_length: Some(length),
        };
        let inserted = alloc_page_with_initializer(
            task,
            PageKind::File,
            upage,
            writable,
            Some(lazy_load),
            Some(Box::new(info)),
        );
        if inserted.is_err() {
            // roll the partial region back so a failed mmap leaves no trace
            for j in 0..i {
                let removed = task.spt().lock().remove(addr + j * PGSIZE);
                if let Some(page) = removed {
                    page.lock().destroy();
                }
            }
            return None;
        }
        read_left -= page_read;
    }
    Some(addr)
}

/// Unmap the region whose first page sits at `addr`: write dirty pages
/// back, release frames and hardware mappings, and drop the pages (and
/// with them the reopened file handles) from the SPT.
pub fn do_munmap(task: &Task, addr: VirtAddr) -> VmResult<()> {
    let length = {
        let spt = task.spt().lock();
        let page = spt.find(addr).ok_or(VmError::InvalidAccess)?;
        let p = page.lock();
        let info = match &p.flavor {
            PageFlavor::File(fp) => &fp.info,
            PageFlavor::Uninit(u) => u.aux.as_deref().ok_or(VmError::InvalidAccess)?,
            PageFlavor::Anon(_) => return Err(VmError::InvalidAccess),
        };
        info.mmap_length.ok_or(VmError::InvalidAccess)?
    };

    let page_count = length.div_ceil(PGSIZE);
    for i in 0..page_count {
        let removed = task.spt().lock().remove(addr + i * PGSIZE);
        if let Some(page) = removed {
            // destroy performs the dirty write-back and frame release
            page.lock().destroy();
        }
    }
    Ok(())
}
