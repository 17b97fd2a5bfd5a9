// src/kernel/vm/mod.rs
//! Virtual memory subsystem
//!
//! Demand paging for user processes. Every user page starts as an
//! [`PageFlavor::Uninit`] placeholder in the owning task's supplemental
//! page table; the first fault realizes it in place into its concrete
//! flavor (anonymous or file-backed), runs the saved initializer exactly
//! once, and installs a frame. Resident pages oscillate between memory and
//! their backing store (the swap disk for anonymous pages, the file itself
//! for file-backed ones) under frame pressure, and are torn down when they
//! leave the table.
//!
//! The flavor is a tagged sum rather than a trait object: realization
//! mutates the tag while the page's address and table slot stay stable,
//! and the generic layer dispatches with a plain `match`.

pub mod anon;
pub mod file;
pub mod frame_table;
pub mod page_fault;
pub mod spt;
pub mod uninit;

#[cfg(test)]
mod tests;

use crate::kernel::core::KernelError;
use crate::kernel::mm::{self, VirtAddr};
use crate::kernel::mm::page_table::Pml4;
use crate::kernel::task::Task;
use alloc::boxed::Box;
use alloc::sync::Arc;
use core::fmt;
use self::file::FileInfo;
use self::frame_table::FrameRef;
use spin::Mutex;

/// Result type for VM operations
pub type VmResult<T> = Result<T, VmError>;

/// Error types for VM operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// Access to an address no page is responsible for
    InvalidAccess,
    /// Write to a read-only page (outside copy-on-write)
    AccessViolation,
    /// An SPT entry already covers this address
    AlreadyMapped,
    /// No evictable frame was found
    OutOfFrames,
    /// The swap bitmap is full
    OutOfSwap,
    /// A backing-store transfer moved fewer bytes than required
    ShortIo,
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAccess => write!(f, "invalid access"),
            Self::AccessViolation => write!(f, "access violation"),
            Self::AlreadyMapped => write!(f, "address already mapped"),
            Self::OutOfFrames => write!(f, "no evictable frame"),
            Self::OutOfSwap => write!(f, "swap space exhausted"),
            Self::ShortIo => write!(f, "short backing-store transfer"),
        }
    }
}

impl From<KernelError> for VmError {
    fn from(_: KernelError) -> Self {
        // device-level failures surface as short transfers for the page
        VmError::ShortIo
    }
}

/// Concrete flavor a page realizes into on first fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    /// Swap-backed, zero-filled when fresh
    Anon,
    /// Backed by a range of an open file
    File,
}

/// Initializer run exactly once when an uninit page is realized; fills the
/// freshly installed frame at `kva` from the saved backing description.
pub type PageInitializer = fn(&mut Page, VirtAddr, &FileInfo) -> VmResult<()>;

/// Placeholder state of a page that has never been faulted in.
pub struct UninitPage {
    pub(crate) target: PageKind,
    pub(crate) init: Option<PageInitializer>,
    pub(crate) aux: Option<Box<FileInfo>>,
}

/// State of an anonymous page.
pub struct AnonPage {
    /// Swap slot holding the evicted contents; `None` while resident or
    /// never written out.
    pub(crate) swap_slot: Option<usize>,
}

/// State of a file-backed page.
pub struct FilePage {
    pub(crate) info: Box<FileInfo>,
}

/// The flavor tag of a page.
pub enum PageFlavor {
    /// Not yet realized; holds the lazy-loader closure
    Uninit(UninitPage),
    /// Anonymous memory
    Anon(AnonPage),
    /// Memory-mapped file range
    File(FilePage),
}

/// Bookkeeping record for one page of one task's address space.
pub struct Page {
    va: VirtAddr,
    writable: bool,
    flavor: PageFlavor,
    frame: Option<FrameRef>,
    pml4: Arc<Mutex<Pml4>>,
}

/// Shared page handle; the SPT owns one per address.
pub type PageRef = Arc<Mutex<Page>>;

impl Page {
    /// Page-aligned user address.
    pub fn va(&self) -> VirtAddr {
        self.va
    }

    /// User-level writability. Copy-on-write may leave the hardware
    /// mapping read-only even when this is true.
    pub fn writable(&self) -> bool {
        self.writable
    }

    /// The flavor this page has, or will realize into.
    pub fn kind(&self) -> PageKind {
        match &self.flavor {
            PageFlavor::Uninit(u) => u.target,
            PageFlavor::Anon(_) => PageKind::Anon,
            PageFlavor::File(_) => PageKind::File,
        }
    }

    /// The frame currently holding this page's contents, if resident.
    pub fn frame(&self) -> Option<FrameRef> {
        self.frame.clone()
    }

    pub(crate) fn pml4(&self) -> &Arc<Mutex<Pml4>> {
        &self.pml4
    }

    /// Swap slot of an anonymous page (test introspection).
    pub fn swap_slot(&self) -> Option<usize> {
        match &self.flavor {
            PageFlavor::Anon(anon) => anon.swap_slot,
            _ => None,
        }
    }

    /// Bring this page's contents into the frame mapped at `kva`.
    ///
    /// For uninit pages this is the realization step; it is the only place
    /// in normal operation where backing-store input occurs.
    pub(crate) fn swap_in(&mut self, kva: VirtAddr) -> VmResult<()> {
        if matches!(self.flavor, PageFlavor::Uninit(_)) {
            return uninit::realize(self, kva);
        }
        match &mut self.flavor {
            PageFlavor::Anon(anon) => anon::swap_in(anon, kva),
            PageFlavor::File(fp) => file::swap_in(&fp.info, kva),
            PageFlavor::Uninit(_) => unreachable!(),
        }
    }

    /// Save this page's contents to its backing store so the frame can be
    /// reused. The generic eviction layer handles the frame unlinking.
    pub(crate) fn swap_out(&mut self) -> VmResult<()> {
        let kva = {
            let frame = self
                .frame
                .as_ref()
                .expect("swap_out of a page with no resident frame");
            frame.lock().kva()
        };
        let Page {
            va, pml4, flavor, ..
        } = self;
        match flavor {
            PageFlavor::Anon(anon) => anon::swap_out(anon, kva),
            PageFlavor::File(fp) => file::swap_out(&fp.info, *va, pml4, kva),
            PageFlavor::Uninit(_) => unreachable!("uninit pages are never resident"),
        }
    }

    /// Release everything this page owns: flavor-specific backing state,
    /// its share of the frame, and the hardware mapping. Runs when the
    /// page leaves its SPT.
    pub(crate) fn destroy(&mut self) {
        match &self.flavor {
            PageFlavor::Uninit(_) => {
                // never faulted in: the aux (and the file handle it owns)
                // is dropped with the page
            }
            PageFlavor::Anon(anon) => {
                self.pml4.lock().clear_page(self.va);
                if let Some(slot) = anon.swap_slot {
                    anon::free_slot(slot);
                }
                if let Some(frame) = self.frame.take() {
                    frame_table::unref(&frame);
                }
            }
            PageFlavor::File(fp) => {
                if let Some(frame) = self.frame.take() {
                    let kva = frame.lock().kva();
                    if let Err(err) = file::swap_out(&fp.info, self.va, &self.pml4, kva) {
                        crate::debug_println!("[vm] write-back failed for {}: {}", self.va, err);
                    }
                    frame_table::unref(&frame);
                }
                self.pml4.lock().clear_page(self.va);
            }
        }
    }
}

/// Initialize the VM subsystem: the frame table and, from the mounted swap
/// disk, the swap table. The user pool and the swap disk registration must
/// already be in place.
pub fn init() {
    frame_table::init();
    anon::init();
}

/// Create a pending page with no initializer.
pub fn alloc_page(task: &Task, kind: PageKind, va: VirtAddr, writable: bool) -> VmResult<()> {
    alloc_page_with_initializer(task, kind, va, writable, None, None)
}

/// Create a pending (uninit) page in `task`'s table. The page realizes
/// into `kind` on first fault, running `init` with `aux` exactly once.
///
/// All page creation funnels through here; pages are never built by hand.
pub fn alloc_page_with_initializer(
    task: &Task,
    kind: PageKind,
    va: VirtAddr,
    writable: bool,
    init: Option<PageInitializer>,
    aux: Option<Box<FileInfo>>,
) -> VmResult<()> {
    debug_assert!(va.is_aligned(mm::PGSIZE));
    let page = Page {
        va,
        writable,
        flavor: PageFlavor::Uninit(UninitPage { target: kind, init, aux }),
        frame: None,
        pml4: task.pml4().clone(),
    };
    if task.spt().lock().insert(page) {
        Ok(())
    } else {
        Err(VmError::AlreadyMapped)
    }
}

/// Claim the page at `va`: install a frame and bring the contents in.
pub fn claim_page(task: &Task, va: VirtAddr) -> VmResult<()> {
    let page = task
        .spt()
        .lock()
        .find(va)
        .ok_or(VmError::InvalidAccess)?;
    do_claim(&page)
}

/// Install a frame for `page`, link the two, map the translation, and pull
/// the contents in from the backing store.
pub(crate) fn do_claim(page: &PageRef) -> VmResult<()> {
    let frame = frame_table::get_frame();
    let kva = frame.lock().kva();

    let mut p = page.lock();
    frame.lock().link(Arc::downgrade(page));
    p.frame = Some(frame.clone());

    let mapped = p.pml4.lock().set_page(p.va, kva, p.writable);
    assert!(mapped, "pml4 rejected mapping for {}", p.va);

    p.swap_in(kva)
}
