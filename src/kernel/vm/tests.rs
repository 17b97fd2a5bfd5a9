// src/kernel/vm/tests.rs
//! End-to-end exercises of the VM subsystem.
//!
//! Each test stands up a small user pool and a RAM swap disk, then drives
//! the paging machinery through `uaccess` the way the MMU and the fault
//! path would at runtime.

use super::*;
use crate::kernel::driver::disk::{self, RamDisk};
use crate::kernel::fs;
use crate::kernel::mm::page_table::PteFlags;
use crate::kernel::mm::{PGSIZE, USER_STACK_TOP, uaccess};
use crate::kernel::process;
use crate::kernel::task;
use alloc::vec;
use alloc::vec::Vec;
use super::page_fault::PageFaultInfo;

struct TestEnv {
    _state: std::sync::MutexGuard<'static, ()>,
}

/// Stand up a fresh VM: `frames` user frames and `swap_slots` swap slots.
fn setup(frames: usize, swap_slots: usize) -> TestEnv {
    let state = crate::kernel::testing::lock();
    crate::kernel::mm::frame::init_user_pool(frames);
    disk::register(
        1,
        1,
        alloc::sync::Arc::new(RamDisk::new(swap_slots * anon::SECTORS_PER_PAGE)),
    );
    super::init();
    TestEnv { _state: state }
}

#[test]
fn lazy_anon_page_is_zero_filled_then_writable() {
    let _env = setup(4, 8);
    let task = task::create("lazy");
    let va = VirtAddr::new(0x40_0000);
    alloc_page(&task, PageKind::Anon, va, true).unwrap();

    // first touch is a read: the realized frame must come back zeroed
    let mut buf = [0xFFu8; 64];
    uaccess::copy_from_user(&task, va, &mut buf).unwrap();
    assert!(buf.iter().all(|&b| b == 0));

    // the installed mapping is writable, so the write needs no new fault
    assert!(task.pml4().lock().is_writable(va));
    uaccess::copy_to_user(&task, va + 16, b"hello").unwrap();
    let mut back = [0u8; 5];
    uaccess::copy_from_user(&task, va + 16, &mut back).unwrap();
    assert_eq!(&back, b"hello");

    // a hardware mapping implies an SPT entry with that frame linked
    let kva = task.pml4().lock().get_page(va).unwrap();
    let page = task.spt().lock().find(va).unwrap();
    assert_eq!(page.lock().frame().unwrap().lock().kva(), kva);
    assert_eq!(page.lock().frame().unwrap().lock().r_cnt(), 1);

    process::exit(&task, 0);
    assert_eq!(frame_table::resident_frames(), 0);
}

#[test]
fn alloc_rejects_overlapping_entries() {
    let _env = setup(2, 4);
    let task = task::create("overlap");
    let va = VirtAddr::new(0x40_0000);
    alloc_page(&task, PageKind::Anon, va, true).unwrap();
    assert_eq!(
        alloc_page(&task, PageKind::Anon, va, false),
        Err(VmError::AlreadyMapped)
    );
    process::exit(&task, 0);
}

#[test]
fn swap_round_trip_under_memory_pressure() {
    let frames = 4;
    let _env = setup(frames, 16);
    let task = task::create("swap");
    let base = VirtAddr::new(0x40_0000);

    // one more page than the pool holds, each with a distinct pattern
    for i in 0..=frames {
        let va = base + i * PGSIZE;
        alloc_page(&task, PageKind::Anon, va, true).unwrap();
        let pattern = vec![(0x11 * (i + 1)) as u8; PGSIZE];
        uaccess::copy_to_user(&task, va, &pattern).unwrap();
    }

    // page 0 was the FIFO victim: no translation, one slot in use
    assert_eq!(anon::slots_in_use(), 1);
    assert!(task.pml4().lock().get_page(base).is_none());
    {
        let page = task.spt().lock().find(base).unwrap();
        assert!(page.lock().swap_slot().is_some());
        assert!(page.lock().frame().is_none());
    }

    // reading page 0 brings its original bytes back (evicting another)
    let mut buf = vec![0u8; PGSIZE];
    uaccess::copy_from_user(&task, base, &mut buf).unwrap();
    assert!(buf.iter().all(|&b| b == 0x11));
    assert_eq!(anon::slots_in_use(), 1);
    {
        let page = task.spt().lock().find(base).unwrap();
        assert!(page.lock().swap_slot().is_none());
    }

    process::exit(&task, 0);
    assert_eq!(anon::slots_in_use(), 0);
    assert_eq!(frame_table::resident_frames(), 0);
}

#[test]
fn mmap_dirty_write_back() {
    let _env = setup(4, 8);
    let task = task::create("mmap");
    fs::create("vm-wb.bin", &[b'A'; 100]).unwrap();
    let file = fs::open("vm-wb.bin").unwrap();

    let addr = VirtAddr::new(0x50_0000);
    assert_eq!(file::do_mmap(&task, addr, PGSIZE, true, &file, 0), Some(addr));

    // faulting in shows the file bytes and the zeroed tail
    let mut head = [0u8; 4];
    uaccess::copy_from_user(&task, addr, &mut head).unwrap();
    assert_eq!(&head, b"AAAA");
    let mut tail = [0xFFu8; 8];
    uaccess::copy_from_user(&task, addr + 100, &mut tail).unwrap();
    assert!(tail.iter().all(|&b| b == 0));

    // dirty the first byte, then unmap
    uaccess::copy_to_user(&task, addr, b"B").unwrap();
    file::do_munmap(&task, addr).unwrap();
    assert!(task.spt().lock().is_empty());
    assert!(task.pml4().lock().get_page(addr).is_none());

    let check = fs::open("vm-wb.bin").unwrap();
    assert_eq!(check.length(), 100);
    let mut contents = [0u8; 100];
    assert_eq!(check.read_at(&mut contents, 0), 100);
    assert_eq!(contents[0], b'B');
    assert!(contents[1..].iter().all(|&b| b == b'A'));

    fs::remove("vm-wb.bin").unwrap();
    process::exit(&task, 0);
}

#[test]
fn munmap_never_writes_back_zero_padding() {
    let _env = setup(4, 8);
    let task = task::create("pad");
    fs::create("vm-pad.bin", &[b'A'; 100]).unwrap();
    let file = fs::open("vm-pad.bin").unwrap();

    let addr = VirtAddr::new(0x50_0000);
    file::do_mmap(&task, addr, PGSIZE, true, &file, 0).unwrap();

    // write into the zero padding beyond EOF; the page is dirty now
    uaccess::copy_to_user(&task, addr + (PGSIZE - 10), &[7u8; 10]).unwrap();
    file::do_munmap(&task, addr).unwrap();

    // only read_bytes went back; the file is untouched
    let check = fs::open("vm-pad.bin").unwrap();
    assert_eq!(check.length(), 100);
    let mut contents = [0u8; 100];
    check.read_at(&mut contents, 0);
    assert!(contents.iter().all(|&b| b == b'A'));

    fs::remove("vm-pad.bin").unwrap();
    process::exit(&task, 0);
}

#[test]
fn mmap_munmap_remap_restores_contents() {
    let _env = setup(4, 8);
    let task = task::create("remap");
    let data: Vec<u8> = (0..=99u8).collect();
    fs::create("vm-remap.bin", &data).unwrap();
    let file = fs::open("vm-remap.bin").unwrap();

    let addr = VirtAddr::new(0x58_0000);
    file::do_mmap(&task, addr, data.len(), true, &file, 0).unwrap();
    uaccess::copy_to_user(&task, addr + 5, b"Q").unwrap();
    file::do_munmap(&task, addr).unwrap();

    // remapping after the sync shows the written byte
    file::do_mmap(&task, addr, data.len(), true, &file, 0).unwrap();
    let mut head = [0u8; 8];
    uaccess::copy_from_user(&task, addr, &mut head).unwrap();
    assert_eq!(head, [0, 1, 2, 3, 4, b'Q', 6, 7]);
    file::do_munmap(&task, addr).unwrap();

    fs::remove("vm-remap.bin").unwrap();
    process::exit(&task, 0);
}

#[test]
fn munmap_spans_whole_region() {
    let _env = setup(4, 8);
    let task = task::create("region");
    let len = PGSIZE + 100;
    fs::create("vm-region.bin", &vec![b'R'; len]).unwrap();
    let file = fs::open("vm-region.bin").unwrap();

    let addr = VirtAddr::new(0x5c_0000);
    let map_len = 3 * PGSIZE;
    file::do_mmap(&task, addr, map_len, true, &file, 0).unwrap();
    assert_eq!(task.spt().lock().len(), 3);

    // touch only the middle page: file bytes then zero fill
    let mut buf = [0xFFu8; 128];
    uaccess::copy_from_user(&task, addr + PGSIZE + 64, &mut buf).unwrap();
    assert!(buf[..36].iter().all(|&b| b == b'R'));
    assert!(buf[36..].iter().all(|&b| b == 0));

    // unmap drops the touched page and the never-touched uninit ones alike
    file::do_munmap(&task, addr).unwrap();
    assert!(task.spt().lock().is_empty());
    assert_eq!(fs::open("vm-region.bin").unwrap().length(), len);

    fs::remove("vm-region.bin").unwrap();
    process::exit(&task, 0);
}

#[test]
fn mmap_rejects_bad_arguments() {
    let _env = setup(4, 8);
    let task = task::create("badmmap");
    fs::create("vm-args.bin", &[b'Z'; 10]).unwrap();
    let file = fs::open("vm-args.bin").unwrap();
    let addr = VirtAddr::new(0x70_0000);

    assert!(file::do_mmap(&task, VirtAddr::zero(), PGSIZE, true, &file, 0).is_none());
    assert!(file::do_mmap(&task, addr + 0x10, PGSIZE, true, &file, 0).is_none());
    assert!(file::do_mmap(&task, addr, 0, true, &file, 0).is_none());
    assert!(file::do_mmap(&task, addr, PGSIZE, true, &file, 12).is_none());

    fs::create("vm-empty.bin", &[]).unwrap();
    let empty = fs::open("vm-empty.bin").unwrap();
    assert!(file::do_mmap(&task, addr, PGSIZE, true, &empty, 0).is_none());

    // overlap with an existing entry leaves no partial region behind
    alloc_page(&task, PageKind::Anon, addr + PGSIZE, true).unwrap();
    assert!(file::do_mmap(&task, addr, 2 * PGSIZE, true, &file, 0).is_none());
    assert_eq!(task.spt().lock().len(), 1);

    fs::remove("vm-args.bin").unwrap();
    fs::remove("vm-empty.bin").unwrap();
    process::exit(&task, 0);
}

#[test]
fn stack_growth_within_one_page_of_rsp() {
    let _env = setup(4, 8);
    let task = task::create("stack");
    let addr = VirtAddr::new(USER_STACK_TOP - PGSIZE - 4);

    // with RSP more than one page away the same address is a bogus access
    task.set_user_rsp(VirtAddr::new(USER_STACK_TOP - 3 * PGSIZE));
    let fault = PageFaultInfo {
        addr,
        user: true,
        write: true,
        not_present: true,
    };
    assert_eq!(
        page_fault::try_handle_fault(&task, &fault),
        Err(VmError::InvalidAccess)
    );
    assert!(task.spt().lock().is_empty());

    // a push touching one page below RSP grows the stack and succeeds
    task.set_user_rsp(VirtAddr::new(USER_STACK_TOP - 8));
    uaccess::copy_to_user(&task, addr, &[1, 2, 3, 4]).unwrap();
    assert!(
        task.pml4()
            .lock()
            .get_page(crate::kernel::mm::page_round_down(addr))
            .is_some()
    );

    // outside the stack region entirely: rejected no matter where RSP is
    let outside = VirtAddr::new(USER_STACK_TOP - crate::kernel::mm::STACK_GROW_LIMIT - PGSIZE);
    task.set_user_rsp(outside + 8);
    let fault = PageFaultInfo {
        addr: outside,
        user: true,
        write: true,
        not_present: true,
    };
    assert_eq!(
        page_fault::try_handle_fault(&task, &fault),
        Err(VmError::InvalidAccess)
    );

    // the dispatcher kills the task with status -1
    assert!(!process::handle_page_fault(&task, &fault));
    assert_eq!(task.exit_status(), -1);
}

#[test]
fn kernel_addresses_and_protection_faults_are_bogus() {
    let _env = setup(2, 4);
    let task = task::create("bogus");

    let kernel_addr = VirtAddr::new(0xFFFF_8000_0000_0000);
    let fault = PageFaultInfo {
        addr: kernel_addr,
        user: true,
        write: false,
        not_present: true,
    };
    assert_eq!(
        page_fault::try_handle_fault(&task, &fault),
        Err(VmError::InvalidAccess)
    );

    // write to a page that is read-only at the user level
    let va = VirtAddr::new(0x44_0000);
    alloc_page(&task, PageKind::Anon, va, false).unwrap();
    claim_page(&task, va).unwrap();
    assert_eq!(
        uaccess::copy_to_user(&task, va, b"nope"),
        Err(VmError::AccessViolation)
    );

    process::exit(&task, 0);
}

#[test]
fn fork_shares_frames_copy_on_write() {
    let _env = setup(8, 8);
    let parent = task::create("parent");
    let va = VirtAddr::new(0x60_0000);
    alloc_page(&parent, PageKind::Anon, va, true).unwrap();
    uaccess::copy_to_user(&parent, va, b"X").unwrap();

    let child = process::fork(&parent, "child").unwrap();

    // one shared frame, two references, both translations read-only
    let frame = parent
        .spt()
        .lock()
        .find(va)
        .unwrap()
        .lock()
        .frame()
        .unwrap();
    assert_eq!(frame.lock().r_cnt(), 2);
    assert!(!parent.pml4().lock().is_writable(va));
    assert!(!child.pml4().lock().is_writable(va));

    // read-only access on both sides leaves the sharing intact
    let mut b = [0u8; 1];
    uaccess::copy_from_user(&child, va, &mut b).unwrap();
    assert_eq!(&b, b"X");
    uaccess::copy_from_user(&parent, va, &mut b).unwrap();
    assert_eq!(&b, b"X");
    assert_eq!(frame.lock().r_cnt(), 2);

    // a child write breaks the sharing with a private copy
    uaccess::copy_to_user(&child, va, b"Y").unwrap();
    assert_eq!(frame.lock().r_cnt(), 1);
    uaccess::copy_from_user(&parent, va, &mut b).unwrap();
    assert_eq!(&b, b"X");
    uaccess::copy_from_user(&child, va, &mut b).unwrap();
    assert_eq!(&b, b"Y");

    let child_frame = child
        .spt()
        .lock()
        .find(va)
        .unwrap()
        .lock()
        .frame()
        .unwrap();
    assert!(!alloc::sync::Arc::ptr_eq(&frame, &child_frame));

    // a later parent write just restores its writable translation
    uaccess::copy_to_user(&parent, va, b"Z").unwrap();
    assert!(parent.pml4().lock().is_writable(va));
    assert_eq!(frame.lock().r_cnt(), 1);

    process::exit(&child, 0);
    process::exit(&parent, 0);
    assert_eq!(frame_table::resident_frames(), 0);
}

#[test]
fn fork_copies_lazy_and_evicted_pages_lazily() {
    let _env = setup(4, 16);
    let parent = task::create("evicted-parent");
    let base = VirtAddr::new(0x64_0000);

    // two touched pages in the parent
    for i in 0..2 {
        let va = base + i * PGSIZE;
        alloc_page(&parent, PageKind::Anon, va, true).unwrap();
        uaccess::copy_to_user(&parent, va, &[0xAB; 8]).unwrap();
    }
    // plus one the parent never touched
    let lazy_va = base + 2 * PGSIZE;
    alloc_page(&parent, PageKind::Anon, lazy_va, true).unwrap();

    // pressure from another task pushes both parent pages to swap
    let pressure = task::create("pressure");
    for i in 0..4 {
        let va = VirtAddr::new(0x68_0000) + i * PGSIZE;
        alloc_page(&pressure, PageKind::Anon, va, true).unwrap();
        uaccess::copy_to_user(&pressure, va, &[1]).unwrap();
    }
    process::exit(&pressure, 0);
    assert_eq!(anon::slots_in_use(), 2);

    let child = process::fork(&parent, "evicted-child").unwrap();

    // the child's copies are fresh: no frame, no swap slot
    {
        let spt = child.spt().lock();
        for i in 0..3 {
            let page = spt.find(base + i * PGSIZE).unwrap();
            assert!(page.lock().frame().is_none());
            assert!(page.lock().swap_slot().is_none());
        }
    }

    // child reads zeroes; the parent still sees its swapped contents
    let mut b = [0xFFu8; 8];
    uaccess::copy_from_user(&child, base, &mut b).unwrap();
    assert!(b.iter().all(|&x| x == 0));
    uaccess::copy_from_user(&parent, base, &mut b).unwrap();
    assert!(b.iter().all(|&x| x == 0xAB));

    process::exit(&child, 0);
    process::exit(&parent, 0);
    assert_eq!(anon::slots_in_use(), 0);
}

#[test]
fn uaccess_leaves_accessed_and_dirty_bits() {
    let _env = setup(2, 4);
    let task = task::create("bits");
    let va = VirtAddr::new(0x48_0000);
    alloc_page(&task, PageKind::Anon, va, true).unwrap();

    let mut buf = [0u8; 4];
    uaccess::copy_from_user(&task, va, &mut buf).unwrap();
    {
        let pml4 = task.pml4().lock();
        let flags = pml4.entry(va).unwrap().flags();
        assert!(flags.contains(PteFlags::ACCESSED));
        assert!(!flags.contains(PteFlags::DIRTY));
    }

    uaccess::copy_to_user(&task, va, &buf).unwrap();
    assert!(task.pml4().lock().is_dirty(va));

    process::exit(&task, 0);
}
