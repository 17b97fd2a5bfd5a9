// src/kernel/vm/frame_table.rs
//! Frame table and eviction
//!
//! A process-global FIFO of the user frames currently in use. The eviction
//! policy pops the front (oldest resident); frames that cannot be paged
//! out right now — shared after fork, or with no resolvable owner — rotate
//! to the tail. Reference counting lives here: a frame's storage is
//! released exactly when its count reaches zero.

use super::{Page, VmError, VmResult};
use crate::kernel::mm::{self, frame as pool, VirtAddr};
use crate::sync::{InterruptController, PlatformInterrupts};
use alloc::collections::VecDeque;
use alloc::sync::{Arc, Weak};
use lazy_static::lazy_static;
use spin::Mutex;

/// One physical user frame in use.
pub struct Frame {
    kva: VirtAddr,
    /// Logical owner, used only to drive eviction write-back. Weak: the
    /// authoritative edge is `Page -> Frame`.
    page: Option<Weak<Mutex<Page>>>,
    r_cnt: usize,
}

/// Shared frame handle.
pub type FrameRef = Arc<Mutex<Frame>>;

impl Frame {
    /// Kernel address of the backing physical frame.
    pub fn kva(&self) -> VirtAddr {
        self.kva
    }

    /// Pages currently pointing at this frame.
    pub fn r_cnt(&self) -> usize {
        self.r_cnt
    }

    /// Record `page` as the logical owner and take a reference.
    pub(crate) fn link(&mut self, page: Weak<Mutex<Page>>) {
        self.page = Some(page);
        self.r_cnt += 1;
    }

    /// Take an additional reference without changing the owner (fork
    /// sharing).
    pub(crate) fn bump(&mut self) {
        self.r_cnt += 1;
    }

    /// Drop `page`'s reference. Clears the owner edge if `page` held it;
    /// the frame then stays unevictable until its remaining sharers let go.
    pub(crate) fn detach(&mut self, page: &super::PageRef) {
        assert!(self.r_cnt > 0, "frame reference count underflow");
        self.r_cnt -= 1;
        if let Some(owner) = &self.page {
            if Weak::ptr_eq(owner, &Arc::downgrade(page)) {
                self.page = None;
            }
        }
    }
}

struct FrameTable {
    fifo: VecDeque<FrameRef>,
}

lazy_static! {
    static ref FRAME_TABLE: Mutex<FrameTable> = Mutex::new(FrameTable {
        fifo: VecDeque::new(),
    });
}

/// Reset the table (kernel bring-up).
pub fn init() {
    PlatformInterrupts::without_interrupts(|| {
        FRAME_TABLE.lock().fifo.clear();
    });
}

/// Number of frames currently registered.
pub fn resident_frames() -> usize {
    FRAME_TABLE.lock().fifo.len()
}

/// Allocate a frame, evicting if the user pool is exhausted. The returned
/// frame is zero-filled, unlinked, and already queued for future eviction.
///
/// Panics if eviction itself fails (every frame shared or unresolvable, or
/// the swap space is full): at that point the kernel has no way to make
/// progress.
pub(crate) fn get_frame() -> FrameRef {
    let kva = match pool::alloc_user_page(true) {
        Some(kva) => kva,
        None => {
            let victim = match evict_frame() {
                Ok(victim) => victim,
                Err(err) => panic!("frame eviction failed: {}", err),
            };
            let kva = victim.lock().kva();
            // the victim's contents are already written out; fresh pages
            // expect a zeroed frame regardless of its provenance
            // SAFETY: the victim is detached from every page
            unsafe { mm::frame_bytes(kva) }.fill(0);
            kva
        }
    };
    let frame = Arc::new(Mutex::new(Frame {
        kva,
        page: None,
        r_cnt: 0,
    }));
    PlatformInterrupts::without_interrupts(|| {
        FRAME_TABLE.lock().fifo.push_back(frame.clone());
    });
    frame
}

/// Pick a victim, write it out, and return the detached frame.
fn evict_frame() -> VmResult<FrameRef> {
    // Victim selection: FIFO order, at most one full pass. Shared frames
    // and frames without a live owner are rotated to the tail.
    let (frame, page) = PlatformInterrupts::without_interrupts(|| {
        let mut table = FRAME_TABLE.lock();
        for _ in 0..table.fifo.len() {
            let frame = match table.fifo.pop_front() {
                Some(frame) => frame,
                None => break,
            };
            let owner = {
                let f = frame.lock();
                if f.r_cnt > 1 {
                    None
                } else {
                    f.page.as_ref().and_then(Weak::upgrade)
                }
            };
            match owner {
                Some(page) => return Ok((frame, page)),
                None => table.fifo.push_back(frame),
            }
        }
        Err(VmError::OutOfFrames)
    })?;

    // Write the victim out with the table unlocked; swap I/O may block.
    {
        let mut p = page.lock();
        p.swap_out()?;
        p.pml4().lock().clear_page(p.va());
        p.frame = None;
    }

    let mut f = frame.lock();
    debug_assert_eq!(f.r_cnt, 1, "victim frame had extra references");
    f.r_cnt = 0;
    f.page = None;
    drop(f);

    Ok(frame)
}

/// Drop one reference to `frame`; when the count reaches zero the frame
/// leaves the table and its storage returns to the user pool.
pub(crate) fn unref(frame: &FrameRef) {
    let freed = {
        let mut f = frame.lock();
        assert!(f.r_cnt > 0, "frame reference count underflow");
        f.r_cnt -= 1;
        if f.r_cnt == 0 {
            f.page = None;
            Some(f.kva)
        } else {
            None
        }
    };
    if let Some(kva) = freed {
        PlatformInterrupts::without_interrupts(|| {
            FRAME_TABLE.lock().fifo.retain(|other| !Arc::ptr_eq(other, frame));
        });
        pool::free_user_page(kva);
    }
}
