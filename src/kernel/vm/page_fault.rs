// src/kernel/vm/page_fault.rs
//! User-space page fault handling
//!
//! Entry point from the CPU exception path. Sorts faults into bogus
//! accesses, copy-on-write breaks, stack growth, and ordinary claims of
//! pending or evicted pages. The handler may block on backing-store I/O,
//! so it must be entered with interrupts enabled.

use super::{PageKind, PageRef, VmError, VmResult, alloc_page, do_claim, frame_table};
use crate::debug_println;
use crate::kernel::mm::{self, PGSIZE, STACK_GROW_LIMIT, USER_STACK_TOP, VirtAddr};
use crate::kernel::task::Task;
use alloc::sync::Arc;
use alloc::vec;

/// CPU-reported state of one page fault.
#[derive(Debug, Clone, Copy)]
pub struct PageFaultInfo {
    /// Faulting address (not necessarily page-aligned).
    pub addr: VirtAddr,
    /// Fault raised from user mode.
    pub user: bool,
    /// Faulting access was a write.
    pub write: bool,
    /// Translation was missing (as opposed to a protection violation).
    pub not_present: bool,
}

/// Resolve `fault` against `task`'s supplemental page table.
///
/// An error means the access is bogus; the exception dispatcher kills the
/// task in response.
pub fn try_handle_fault(task: &Task, fault: &PageFaultInfo) -> VmResult<()> {
    let addr = fault.addr;
    if !mm::is_user_vaddr(addr) {
        return Err(VmError::InvalidAccess);
    }

    let page = task.spt().lock().find(addr);
    if let Some(page) = page {
        if !fault.not_present {
            // a live translation faulted: only writes through the
            // copy-on-write path are recoverable
            if !fault.write {
                return Err(VmError::AccessViolation);
            }
            if !page.lock().writable() {
                return Err(VmError::AccessViolation);
            }
            return handle_wp(&page);
        }
        return do_claim(&page);
    }

    // No page: the access may still be legitimate stack growth. Only the
    // page of slack below the captured user RSP qualifies, within the
    // stack region proper.
    let a = addr.as_usize();
    let rsp = task.user_rsp().as_usize();
    if a + PGSIZE > rsp
        && a < rsp
        && a >= USER_STACK_TOP - STACK_GROW_LIMIT
        && a < USER_STACK_TOP
    {
        return stack_growth(task, mm::page_round_down(addr));
    }
    Err(VmError::InvalidAccess)
}

/// Add one writable anonymous page at `addr`. The page is not claimed
/// here: the faulting instruction re-executes, refaults on the new entry,
/// and claims it through the ordinary path.
fn stack_growth(task: &Task, addr: VirtAddr) -> VmResult<()> {
    debug_println!("[vm] stack growth: new page at {}", addr);
    alloc_page(task, PageKind::Anon, addr, true)
}

/// Break copy-on-write sharing for `page`.
///
/// If the frame is no longer shared the writable translation is simply
/// restored. Otherwise the page detaches, copies the shared contents into
/// a private frame, and maps it read-write; the old frame survives with
/// the remaining sharers.
fn handle_wp(page: &PageRef) -> VmResult<()> {
    let (frame, kva, shared) = {
        let p = page.lock();
        let frame = p.frame.clone().ok_or(VmError::InvalidAccess)?;
        let (kva, r_cnt) = {
            let f = frame.lock();
            (f.kva(), f.r_cnt())
        };
        (frame, kva, r_cnt > 1)
    };

    if !shared {
        let p = page.lock();
        p.pml4().lock().set_page(p.va(), kva, true);
        return Ok(());
    }

    // Snapshot the shared contents first: once this page detaches, the old
    // frame may become evictable and recycled before the copy lands.
    let mut contents = vec![0u8; PGSIZE];
    // SAFETY: kva is the kernel mapping of the still-referenced shared frame
    contents.copy_from_slice(unsafe { mm::frame_bytes(kva) });

    {
        let mut p = page.lock();
        p.frame = None;
        frame.lock().detach(page);
    }

    let new_frame = frame_table::get_frame();
    let new_kva = new_frame.lock().kva();
    {
        let mut p = page.lock();
        new_frame.lock().link(Arc::downgrade(page));
        p.frame = Some(new_frame.clone());
        // SAFETY: new_kva is the private frame just handed to this page
        unsafe { mm::frame_bytes(new_kva) }.copy_from_slice(&contents);
        p.pml4().lock().set_page(p.va(), new_kva, true);
    }
    Ok(())
}
