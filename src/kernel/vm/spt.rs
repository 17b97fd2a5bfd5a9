// src/kernel/vm/spt.rs
//! Supplemental page table
//!
//! Per-task map from page-aligned virtual address to page. This is the
//! logical truth of the address space: the hardware table may lag behind
//! (lazy, evicted), but every hardware mapping corresponds to an entry
//! here. Interrogated on every fault; mutated by mmap/munmap, lazy
//! allocation, fork copy, and exit.

use super::{
    Page, PageFlavor, PageInitializer, PageKind, PageRef, VmResult, alloc_page,
    alloc_page_with_initializer, claim_page, file,
};
use crate::kernel::mm::{self, VirtAddr};
use crate::kernel::task::Task;
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

/// One task's page table of record.
pub struct SupplementalPageTable {
    pages: BTreeMap<VirtAddr, PageRef>,
}

impl SupplementalPageTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            pages: BTreeMap::new(),
        }
    }

    /// Look up the page covering `va` (rounded down to its page).
    pub fn find(&self, va: VirtAddr) -> Option<PageRef> {
        self.pages.get(&mm::page_round_down(va)).cloned()
    }

    /// Insert `page`; refuses (returning `false`) if an entry already
    /// covers its address.
    pub fn insert(&mut self, page: Page) -> bool {
        match self.pages.entry(page.va()) {
            alloc::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(page)));
                true
            }
            alloc::collections::btree_map::Entry::Occupied(_) => false,
        }
    }

    /// Unlink the entry at `va` without running its teardown.
    pub fn remove(&mut self, va: VirtAddr) -> Option<PageRef> {
        self.pages.remove(&mm::page_round_down(va))
    }

    /// Tear down every page (process exit). The map is detached first so
    /// teardown never mutates a table being iterated.
    pub fn kill(&mut self) {
        let pages = core::mem::take(&mut self.pages);
        for (_, page) in pages {
            page.lock().destroy();
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Snapshot of all entries (for fork copy).
    pub(crate) fn entries(&self) -> Vec<PageRef> {
        self.pages.values().cloned().collect()
    }
}

impl Default for SupplementalPageTable {
    fn default() -> Self {
        Self::new()
    }
}

/// What the fork copy does with one source page.
enum CopyPlan {
    Uninit {
        target: PageKind,
        init: Option<PageInitializer>,
        aux: Option<Box<file::FileInfo>>,
    },
    File {
        info: Box<file::FileInfo>,
    },
    AnonShare {
        frame: super::FrameRef,
    },
    AnonLazy,
}

/// Deep-duplicate `src`'s table into `dst` for fork.
///
/// - Uninit pages stay lazy in the child: the aux is duplicated (reopening
///   any file it references) and the same initializer is re-registered.
/// - File pages are re-created lazy and immediately claimed, so parent and
///   child never share a file-backed frame.
/// - Resident anonymous pages share the parent's frame copy-on-write: both
///   translations are downgraded to read-only and the frame's reference
///   count grows. An evicted parent page yields a fresh lazy child page.
///
/// Any failure is fatal to the fork; the caller tears the child down.
pub fn copy(dst: &Task, src: &Task) -> VmResult<()> {
    let entries = src.spt().lock().entries();
    for page in entries {
        let (va, writable, plan) = {
            let p = page.lock();
            let plan = match &p.flavor {
                PageFlavor::Uninit(u) => CopyPlan::Uninit {
                    target: u.target,
                    init: u.init,
                    aux: u.aux.as_ref().map(|info| Box::new(info.duplicate())),
                },
                PageFlavor::File(fp) => CopyPlan::File {
                    info: Box::new(fp.info.duplicate()),
                },
                PageFlavor::Anon(_) => match &p.frame {
                    Some(frame) => CopyPlan::AnonShare {
                        frame: frame.clone(),
                    },
                    None => CopyPlan::AnonLazy,
                },
            };
            (p.va(), p.writable(), plan)
        };

        match plan {
            CopyPlan::Uninit { target, init, aux } => {
                alloc_page_with_initializer(dst, target, va, writable, init, aux)?;
            }
            CopyPlan::File { info } => {
                alloc_page_with_initializer(
                    dst,
                    PageKind::File,
                    va,
                    writable,
                    Some(file::lazy_load),
                    Some(info),
                )?;
                claim_page(dst, va)?;
            }
            CopyPlan::AnonShare { frame } => {
                alloc_page(dst, PageKind::Anon, va, writable)?;
                let child = dst
                    .spt()
                    .lock()
                    .find(va)
                    .expect("child page just inserted");
                let kva = {
                    let mut f = frame.lock();
                    f.bump();
                    f.kva()
                };
                {
                    let mut c = child.lock();
                    c.frame = Some(frame.clone());
                    c.swap_in(kva)?; // realizes the placeholder into a plain anon page
                    c.pml4().lock().set_page(va, kva, false);
                }
                // the parent translation must trap writes from now on too
                src.pml4().lock().set_page(va, kva, false);
            }
            CopyPlan::AnonLazy => {
                alloc_page(dst, PageKind::Anon, va, writable)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::mm::page_table::Pml4;

    fn raw_page(va: usize) -> Page {
        Page {
            va: VirtAddr::new(va),
            writable: true,
            flavor: PageFlavor::Anon(super::super::AnonPage { swap_slot: None }),
            frame: None,
            pml4: Arc::new(Mutex::new(Pml4::new())),
        }
    }

    #[test]
    fn find_rounds_down() {
        let mut spt = SupplementalPageTable::new();
        assert!(spt.insert(raw_page(0x40_0000)));
        let hit = spt.find(VirtAddr::new(0x40_0123)).expect("same page");
        assert_eq!(hit.lock().va(), VirtAddr::new(0x40_0000));
        assert!(spt.find(VirtAddr::new(0x40_1000)).is_none());
    }

    #[test]
    fn insert_rejects_duplicates() {
        let mut spt = SupplementalPageTable::new();
        assert!(spt.insert(raw_page(0x40_0000)));
        assert!(!spt.insert(raw_page(0x40_0000)));
        assert_eq!(spt.len(), 1);
    }

    #[test]
    fn remove_unlinks_without_teardown() {
        let mut spt = SupplementalPageTable::new();
        spt.insert(raw_page(0x40_0000));
        let page = spt.remove(VirtAddr::new(0x40_0000)).expect("present");
        assert!(spt.is_empty());
        // the page object itself is still intact
        assert_eq!(page.lock().va(), VirtAddr::new(0x40_0000));
    }
}
