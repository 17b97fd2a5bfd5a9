// src/kernel/mm/page_table.rs
//! Hardware page table interface (PML4)
//!
//! The kernel's view of one process's top-level page table: install, look
//! up and clear user translations, and read or reset the dirty bit the MMU
//! leaves behind. The table itself is a software structure; the MMU walk is
//! modeled by [`super::uaccess`], which faults and marks entries the way
//! the hardware would.

use super::types::VirtAddr;
use super::PGSIZE;
use alloc::collections::BTreeMap;
use bitflags::bitflags;

bitflags! {
    /// Page-table entry flags (x86_64 bit positions).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u64 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
        const ACCESSED = 1 << 5;
        const DIRTY = 1 << 6;
    }
}

/// One installed translation.
#[derive(Debug, Clone, Copy)]
pub struct PageTableEntry {
    kva: VirtAddr,
    flags: PteFlags,
}

impl PageTableEntry {
    /// Kernel address of the mapped frame.
    pub fn kva(&self) -> VirtAddr {
        self.kva
    }

    /// Raw flag set.
    pub fn flags(&self) -> PteFlags {
        self.flags
    }

    /// Whether the entry permits user writes.
    pub fn is_writable(&self) -> bool {
        self.flags.contains(PteFlags::WRITABLE)
    }
}

/// One process's top-level page table.
#[derive(Debug, Default)]
pub struct Pml4 {
    entries: BTreeMap<VirtAddr, PageTableEntry>,
}

impl Pml4 {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Install (or replace) the translation `va -> kva`.
    ///
    /// Returns `false` if either address is not page-aligned.
    pub fn set_page(&mut self, va: VirtAddr, kva: VirtAddr, writable: bool) -> bool {
        if !va.is_aligned(PGSIZE) || !kva.is_aligned(PGSIZE) {
            return false;
        }
        let mut flags = PteFlags::PRESENT | PteFlags::USER;
        if writable {
            flags |= PteFlags::WRITABLE;
        }
        self.entries.insert(va, PageTableEntry { kva, flags });
        true
    }

    /// Kernel address mapped at `va`, if any.
    pub fn get_page(&self, va: VirtAddr) -> Option<VirtAddr> {
        self.entries.get(&va).map(PageTableEntry::kva)
    }

    /// The full entry at `va`, if any.
    pub fn entry(&self, va: VirtAddr) -> Option<PageTableEntry> {
        self.entries.get(&va).copied()
    }

    /// Drop the translation at `va` (no-op if absent).
    pub fn clear_page(&mut self, va: VirtAddr) {
        self.entries.remove(&va);
    }

    /// Whether the MMU marked `va` dirty since the bit was last cleared.
    pub fn is_dirty(&self, va: VirtAddr) -> bool {
        self.entries
            .get(&va)
            .is_some_and(|e| e.flags.contains(PteFlags::DIRTY))
    }

    /// Set or clear the dirty bit of `va`.
    pub fn set_dirty(&mut self, va: VirtAddr, dirty: bool) {
        if let Some(entry) = self.entries.get_mut(&va) {
            entry.flags.set(PteFlags::DIRTY, dirty);
        }
    }

    /// Mark `va` as touched.
    pub fn set_accessed(&mut self, va: VirtAddr) {
        if let Some(entry) = self.entries.get_mut(&va) {
            entry.flags |= PteFlags::ACCESSED;
        }
    }

    /// Whether the translation at `va` permits user writes.
    pub fn is_writable(&self, va: VirtAddr) -> bool {
        self.entries.get(&va).is_some_and(PageTableEntry::is_writable)
    }

    /// Number of installed translations.
    pub fn mapped_count(&self) -> usize {
        self.entries.len()
    }

    /// Page-aligned virtual addresses of all installed translations.
    pub fn mapped_pages(&self) -> impl Iterator<Item = VirtAddr> + '_ {
        self.entries.keys().copied()
    }

    /// Drop every translation.
    pub fn clear_all(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_clear() {
        let mut pml4 = Pml4::new();
        let va = VirtAddr::new(0x40_0000);
        let kva = VirtAddr::new(0x1000);

        assert!(pml4.set_page(va, kva, true));
        assert_eq!(pml4.get_page(va), Some(kva));
        assert!(pml4.is_writable(va));
        assert_eq!(pml4.mapped_count(), 1);

        pml4.clear_page(va);
        assert_eq!(pml4.get_page(va), None);
        assert!(!pml4.is_writable(va));
    }

    #[test]
    fn rejects_unaligned() {
        let mut pml4 = Pml4::new();
        assert!(!pml4.set_page(VirtAddr::new(0x40_0010), VirtAddr::new(0x1000), false));
        assert!(!pml4.set_page(VirtAddr::new(0x40_0000), VirtAddr::new(0x1010), false));
    }

    #[test]
    fn dirty_bit_roundtrip() {
        let mut pml4 = Pml4::new();
        let va = VirtAddr::new(0x40_0000);
        pml4.set_page(va, VirtAddr::new(0x2000), true);

        assert!(!pml4.is_dirty(va));
        pml4.set_dirty(va, true);
        assert!(pml4.is_dirty(va));
        pml4.set_dirty(va, false);
        assert!(!pml4.is_dirty(va));
    }

    #[test]
    fn reinstall_downgrades_write_access() {
        let mut pml4 = Pml4::new();
        let va = VirtAddr::new(0x40_0000);
        let kva = VirtAddr::new(0x3000);
        pml4.set_page(va, kva, true);
        pml4.set_dirty(va, true);

        // re-mapping read-only replaces the whole entry
        pml4.set_page(va, kva, false);
        assert!(!pml4.is_writable(va));
        assert!(!pml4.is_dirty(va));
    }
}
