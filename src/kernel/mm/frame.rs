// src/kernel/mm/frame.rs
//! 物理フレーム管理（ユーザープール）
//!
//! ユーザーページ専用の固定サイズプール。フリーリストで再利用します。
//! プールが空のときの回復（エビクション）は VM 層の仕事です。

use super::types::VirtAddr;
use super::{PGSIZE, frame_bytes};
use alloc::alloc::{Layout, alloc_zeroed, dealloc};
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use lazy_static::lazy_static;
use spin::Mutex;

/// One 4 KiB block owned by the pool.
struct PoolBlock {
    ptr: *mut u8,
}

/// The user frame pool: a fixed number of page-aligned blocks.
pub struct UserPool {
    blocks: Vec<PoolBlock>,
    free: VecDeque<VirtAddr>,
}

// SAFETY: the pool exclusively owns its blocks; access goes through the
// global mutex below.
unsafe impl Send for UserPool {}

impl UserPool {
    fn new(pages: usize) -> Self {
        let layout = Layout::from_size_align(PGSIZE, PGSIZE).expect("valid page layout");
        let mut blocks = Vec::with_capacity(pages);
        let mut free = VecDeque::with_capacity(pages);
        for _ in 0..pages {
            // SAFETY: layout is non-zero-sized
            let ptr = unsafe { alloc_zeroed(layout) };
            assert!(!ptr.is_null(), "user pool: kernel heap exhausted");
            free.push_back(VirtAddr::new(ptr as usize));
            blocks.push(PoolBlock { ptr });
        }
        Self { blocks, free }
    }
}

impl Drop for UserPool {
    fn drop(&mut self) {
        let layout = Layout::from_size_align(PGSIZE, PGSIZE).expect("valid page layout");
        for block in &self.blocks {
            // SAFETY: every block was allocated with this layout in new()
            unsafe { dealloc(block.ptr, layout) };
        }
    }
}

lazy_static! {
    static ref USER_POOL: Mutex<Option<UserPool>> = Mutex::new(None);
}

/// Set up (or replace) the user pool with `pages` frames.
pub fn init_user_pool(pages: usize) {
    *USER_POOL.lock() = Some(UserPool::new(pages));
}

/// Total frames in the pool.
pub fn user_pool_pages() -> usize {
    USER_POOL.lock().as_ref().map_or(0, |p| p.blocks.len())
}

/// Hand out one user frame, or `None` when the pool is exhausted.
pub fn alloc_user_page(zeroed: bool) -> Option<VirtAddr> {
    let mut guard = USER_POOL.lock();
    let pool = guard.as_mut().expect("user pool not initialized");
    let kva = pool.free.pop_front()?;
    if zeroed {
        // SAFETY: kva was just removed from the free list, nothing else
        // references it
        unsafe { frame_bytes(kva) }.fill(0);
    }
    Some(kva)
}

/// Return a frame to the pool.
pub fn free_user_page(kva: VirtAddr) {
    debug_assert!(kva.is_aligned(PGSIZE));
    let mut guard = USER_POOL.lock();
    let pool = guard.as_mut().expect("user pool not initialized");
    debug_assert!(
        !pool.free.contains(&kva),
        "double free of user frame {}",
        kva
    );
    pool.free.push_back(kva);
}
