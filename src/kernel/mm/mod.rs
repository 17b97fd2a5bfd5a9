// src/kernel/mm/mod.rs
//! メモリ管理モジュール

pub mod bitmap;
pub mod frame;
pub mod page_table;
pub mod types;
pub mod uaccess;

pub use types::VirtAddr;

/// Size of one page (and one physical frame) in bytes.
pub const PGSIZE: usize = 4096;

/// Top of the user stack region.
pub const USER_STACK_TOP: usize = 0x0000_7000_0000_0000;

/// The stack may grow to at most this far below [`USER_STACK_TOP`].
pub const STACK_GROW_LIMIT: usize = 1 << 20;

/// First address past the canonical user half of the address space.
pub const USER_SPACE_END: usize = 0x0000_8000_0000_0000;

/// Round `va` down to the enclosing page boundary.
#[inline]
pub fn page_round_down(va: VirtAddr) -> VirtAddr {
    va.align_down(PGSIZE)
}

/// Byte offset of `va` within its page.
#[inline]
pub fn page_offset(va: VirtAddr) -> usize {
    va.as_usize() % PGSIZE
}

/// Check whether `va` lies in the user half of the address space.
#[inline]
pub fn is_user_vaddr(va: VirtAddr) -> bool {
    va.as_usize() < USER_SPACE_END
}

/// View the kernel mapping of one frame as a byte slice.
///
/// # Safety
///
/// `kva` must be the page-aligned kernel address of a live frame, and the
/// caller must hold whatever lock makes access to that frame exclusive.
pub unsafe fn frame_bytes<'a>(kva: VirtAddr) -> &'a mut [u8] {
    debug_assert!(kva.is_aligned(PGSIZE));
    // SAFETY: caller guarantees kva covers one exclusive, live frame
    unsafe { core::slice::from_raw_parts_mut(kva.as_mut_ptr::<u8>(), PGSIZE) }
}
