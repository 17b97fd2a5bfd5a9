// src/kernel/mm/uaccess.rs
//! User-memory access
//!
//! Kernel-side reads and writes of user buffers walk the task's page table
//! the way the MMU would: a missing or read-only translation raises a page
//! fault through the VM fault handler, and the access is retried once the
//! fault is resolved. Successful accesses leave the ACCESSED (and, for
//! writes, DIRTY) bits behind.

use super::types::VirtAddr;
use super::{PGSIZE, page_offset, page_round_down};
use crate::kernel::task::Task;
use crate::kernel::vm::page_fault::{self, PageFaultInfo};
use crate::kernel::vm::{VmError, VmResult};

/// A fault is re-raised at most this many times per access: once to insert
/// a stack-growth page and once more to claim it.
const MAX_FAULTS: usize = 3;

fn resolve(task: &Task, va: VirtAddr, write: bool) -> VmResult<VirtAddr> {
    let page = page_round_down(va);
    for _ in 0..MAX_FAULTS {
        let not_present;
        {
            let pml4 = task.pml4().lock();
            match pml4.entry(page) {
                Some(entry) if !write || entry.is_writable() => {
                    return Ok(entry.kva() + page_offset(va));
                }
                Some(_) => not_present = false,
                None => not_present = true,
            }
        }
        let fault = PageFaultInfo {
            addr: va,
            user: true,
            write,
            not_present,
        };
        page_fault::try_handle_fault(task, &fault)?;
    }
    Err(VmError::InvalidAccess)
}

fn mark(task: &Task, va: VirtAddr, write: bool) {
    let page = page_round_down(va);
    let mut pml4 = task.pml4().lock();
    pml4.set_accessed(page);
    if write {
        pml4.set_dirty(page, true);
    }
}

/// Copy `buf` into `task`'s address space at `va`.
pub fn copy_to_user(task: &Task, va: VirtAddr, buf: &[u8]) -> VmResult<()> {
    let mut off = 0;
    while off < buf.len() {
        let cur = va + off;
        let chunk = (buf.len() - off).min(PGSIZE - page_offset(cur));
        let kva = resolve(task, cur, true)?;
        // SAFETY: kva is the live translation of cur; the chunk stays within
        // one frame
        unsafe {
            core::ptr::copy_nonoverlapping(buf[off..].as_ptr(), kva.as_mut_ptr::<u8>(), chunk);
        }
        mark(task, cur, true);
        off += chunk;
    }
    Ok(())
}

/// Copy from `task`'s address space at `va` into `buf`.
pub fn copy_from_user(task: &Task, va: VirtAddr, buf: &mut [u8]) -> VmResult<()> {
    let mut off = 0;
    while off < buf.len() {
        let cur = va + off;
        let chunk = (buf.len() - off).min(PGSIZE - page_offset(cur));
        let kva = resolve(task, cur, false)?;
        // SAFETY: kva is the live translation of cur; the chunk stays within
        // one frame
        unsafe {
            core::ptr::copy_nonoverlapping(kva.as_ptr::<u8>(), buf[off..].as_mut_ptr(), chunk);
        }
        mark(task, cur, false);
        off += chunk;
    }
    Ok(())
}
