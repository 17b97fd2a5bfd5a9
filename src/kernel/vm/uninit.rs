// src/kernel/vm/uninit.rs
//! Uninitialized pages
//!
//! Every page is created uninit. The first fault realizes the page in
//! place into its reserved flavor and runs the saved initializer exactly
//! once; afterwards the page is indistinguishable from one that had always
//! been of the concrete flavor. An uninit page that is never touched keeps
//! its aux until process exit, where dropping it closes any file handle it
//! owns.

use super::{AnonPage, FilePage, Page, PageFlavor, PageKind, UninitPage, VmResult};
use crate::kernel::mm::VirtAddr;

/// Realize `page` into its reserved flavor and fill the frame at `kva`.
pub(crate) fn realize(page: &mut Page, kva: VirtAddr) -> VmResult<()> {
    let placeholder = PageFlavor::Anon(AnonPage { swap_slot: None });
    let uninit = match core::mem::replace(&mut page.flavor, placeholder) {
        PageFlavor::Uninit(uninit) => uninit,
        _ => unreachable!("realize on an already-realized page"),
    };
    let UninitPage { target, init, aux } = uninit;

    match target {
        PageKind::Anon => {
            // the placeholder already is the realized anon state
            if let Some(init) = init {
                let info = aux.expect("initializer requires a backing description");
                init(page, kva, &info)?;
                // info drops here, closing the per-chunk file handle once
                // the bytes are in memory
            }
        }
        PageKind::File => {
            let info = aux.expect("file page without a backing description");
            if let Some(init) = init {
                init(page, kva, &info)?;
            }
            page.flavor = PageFlavor::File(FilePage { info });
        }
    }
    Ok(())
}
