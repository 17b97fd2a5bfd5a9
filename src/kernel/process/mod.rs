// src/kernel/process/mod.rs
//! Process management module
//!
//! Program loading (lazy ELF segments), stack setup, fork, and exit
//! teardown, all expressed through the VM subsystem: loading inserts
//! pending pages, fork deep-copies the supplemental page table, and exit
//! tears it down.

pub mod elf;

use crate::debug_println;
use crate::kernel::fs::{self, FILESYS_LOCK, File, FsError};
use crate::kernel::mm::{PGSIZE, USER_STACK_TOP, VirtAddr, page_offset, page_round_down};
use crate::kernel::task::{self, TaskRef};
use crate::kernel::vm::file::FileInfo;
use crate::kernel::vm::page_fault::PageFaultInfo;
use crate::kernel::vm::{self, PageKind, VmError, VmResult, spt};
use alloc::boxed::Box;
use alloc::vec::Vec;
use self::elf::{Elf64Header, Elf64ProgramHeader, ElfError};

/// Error types for program loading
#[derive(Debug)]
pub enum LoadError {
    /// File-system error
    Fs(FsError),
    /// Malformed or unsupported executable
    Elf(ElfError),
    /// VM error while building the address space
    Vm(VmError),
    /// Executable image is structurally unusable
    BadImage,
}

impl From<FsError> for LoadError {
    fn from(e: FsError) -> Self {
        LoadError::Fs(e)
    }
}

impl From<ElfError> for LoadError {
    fn from(e: ElfError) -> Self {
        LoadError::Elf(e)
    }
}

impl From<VmError> for LoadError {
    fn from(e: VmError) -> Self {
        LoadError::Vm(e)
    }
}

/// Result of loading a program image.
pub struct LoadedImage {
    /// Userspace entry point
    pub entry: VirtAddr,
    /// Initial user stack pointer
    pub stack_top: VirtAddr,
}

/// Load the executable at `path` into `task`'s address space.
///
/// Segments are split into page-sized chunks, each inserted as a pending
/// page whose lazy loader reads from the file on first touch; nothing is
/// read up front except the headers. The running image is protected with
/// `deny_write` until exit.
pub fn exec(task: &TaskRef, path: &str) -> Result<LoadedImage, LoadError> {
    let mut file = {
        let _fs = FILESYS_LOCK.lock();
        fs::open(path)?
    };

    let mut header_bytes = [0u8; core::mem::size_of::<Elf64Header>()];
    {
        let _fs = FILESYS_LOCK.lock();
        if file.read_at(&mut header_bytes, 0) != header_bytes.len() {
            return Err(LoadError::BadImage);
        }
    }
    let header = Elf64Header::from_bytes(&header_bytes)?;

    let phentsize = header.e_phentsize as usize;
    if phentsize != core::mem::size_of::<Elf64ProgramHeader>() || header.e_phnum > 1024 {
        return Err(LoadError::BadImage);
    }

    let mut phdrs = Vec::with_capacity(header.e_phnum as usize);
    for i in 0..header.e_phnum as usize {
        let mut phdr_bytes = [0u8; core::mem::size_of::<Elf64ProgramHeader>()];
        let offset = header.e_phoff as usize + i * phentsize;
        {
            let _fs = FILESYS_LOCK.lock();
            if file.read_at(&mut phdr_bytes, offset) != phdr_bytes.len() {
                return Err(LoadError::BadImage);
            }
        }
        phdrs.push(Elf64ProgramHeader::from_bytes(&phdr_bytes)?);
    }

    for phdr in phdrs.iter().filter(|p| p.is_load()) {
        let vaddr = VirtAddr::new(phdr.p_vaddr as usize);
        let mem_page = page_round_down(vaddr);
        let page_ofs = page_offset(vaddr);

        // file offset and virtual address must agree modulo the page size,
        // and the segment must fit its in-memory span
        if phdr.p_offset as usize % PGSIZE != page_ofs || phdr.p_filesz > phdr.p_memsz {
            return Err(LoadError::BadImage);
        }
        let file_page = phdr.p_offset as usize - page_ofs;

        let read_bytes = if phdr.p_filesz > 0 {
            page_ofs + phdr.p_filesz as usize
        } else {
            0
        };
        let span = page_ofs + phdr.p_memsz as usize;
        let zero_bytes = span.div_ceil(PGSIZE) * PGSIZE - read_bytes;

        load_segment(
            task,
            &file,
            file_page,
            mem_page,
            read_bytes,
            zero_bytes,
            phdr.writable(),
        )?;
    }

    // the running image must not change underneath its lazy loader
    file.deny_write();
    task.set_exec_file(file);

    setup_stack(task)?;

    Ok(LoadedImage {
        entry: VirtAddr::new(header.e_entry as usize),
        stack_top: VirtAddr::new(USER_STACK_TOP),
    })
}

/// Insert pending pages covering one segment: `read_bytes` from the file
/// at `ofs`, then `zero_bytes` of fill. Executable data is modifiable per
/// process, so the chunks realize as anonymous pages.
fn load_segment(
    task: &TaskRef,
    file: &File,
    mut ofs: usize,
    mut upage: VirtAddr,
    mut read_bytes: usize,
    mut zero_bytes: usize,
    writable: bool,
) -> VmResult<()> {
    debug_assert!((read_bytes + zero_bytes) % PGSIZE == 0);
    debug_assert!(upage.is_aligned(PGSIZE));
    debug_assert!(ofs % PGSIZE == 0);

    while read_bytes > 0 || zero_bytes > 0 {
        let page_read = read_bytes.min(PGSIZE);
        let page_zero = PGSIZE - page_read;

        let info = FileInfo {
            file: file.reopen(),
            offset: ofs,
            read_bytes: page_read,
            zero_bytes: page_zero,
            upage,
            writable,
            mmap_length: None,
        };
        vm::alloc_page_with_initializer(
            task,
            PageKind::Anon,
            upage,
            writable,
            Some(vm::file::lazy_load),
            Some(Box::new(info)),
        )?;

        read_bytes -= page_read;
        zero_bytes -= page_zero;
        upage = upage + PGSIZE;
        ofs += PGSIZE;
    }
    Ok(())
}

/// Map and immediately claim the first stack page, then point the user
/// stack pointer at the top.
fn setup_stack(task: &TaskRef) -> VmResult<()> {
    let stack_bottom = VirtAddr::new(USER_STACK_TOP - PGSIZE);
    vm::alloc_page(task, PageKind::Anon, stack_bottom, true)?;
    vm::claim_page(task, stack_bottom)?;
    task.set_user_rsp(VirtAddr::new(USER_STACK_TOP));
    Ok(())
}

/// Fork: a new task whose supplemental page table is a deep copy of the
/// parent's. Resident anonymous pages are shared copy-on-write. A failed
/// copy tears the child down and reports the error.
pub fn fork(parent: &TaskRef, name: &str) -> Result<TaskRef, VmError> {
    let child = task::create(name);
    if let Err(err) = spt::copy(&child, parent) {
        child.spt().lock().kill();
        child.pml4().lock().clear_all();
        task::unregister(child.id());
        return Err(err);
    }
    child.set_user_rsp(parent.user_rsp());
    Ok(child)
}

/// Terminate `task`: release every page (write-backs included), drop the
/// remaining hardware mappings, re-allow writes to the executable, and log
/// the termination line.
pub fn exit(task: &TaskRef, status: i32) {
    task.set_exit_status(status);
    debug_println!("{}: exit({})", task.name(), status);

    task.spt().lock().kill();
    task.pml4().lock().clear_all();
    if let Some(mut file) = task.take_exec_file() {
        file.allow_write();
    }
    task::unregister(task.id());
}

/// Exception-dispatcher entry point: resolve the fault, or kill the task
/// with status -1 for a bogus access.
pub fn handle_page_fault(task: &TaskRef, fault: &PageFaultInfo) -> bool {
    match vm::page_fault::try_handle_fault(task, fault) {
        Ok(()) => true,
        Err(err) => {
            debug_println!(
                "[vm] unhandled fault at {} ({}): killing {}",
                fault.addr,
                err,
                task.name()
            );
            exit(task, -1);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::driver::disk::{self, RamDisk};
    use crate::kernel::mm::uaccess;
    use alloc::sync::Arc;
    use alloc::vec;

    /// A minimal static executable: one PT_LOAD segment at 0x40_0000 whose
    /// bytes sit at file offset 0x1000, with 100 bytes of bss behind them.
    fn build_test_elf(payload: &[u8]) -> Vec<u8> {
        let mut image = vec![0u8; 0x1000 + payload.len()];
        image[0..4].copy_from_slice(&elf::ELF_MAGIC);
        image[4] = 2; // 64-bit
        image[5] = 1; // little endian
        image[0x10..0x12].copy_from_slice(&2u16.to_le_bytes()); // ET_EXEC
        image[0x12..0x14].copy_from_slice(&62u16.to_le_bytes()); // x86-64
        image[0x18..0x20].copy_from_slice(&0x40_0000u64.to_le_bytes()); // e_entry
        image[0x20..0x28].copy_from_slice(&64u64.to_le_bytes()); // e_phoff
        image[0x36..0x38].copy_from_slice(&56u16.to_le_bytes()); // e_phentsize
        image[0x38..0x3A].copy_from_slice(&1u16.to_le_bytes()); // e_phnum

        let ph = 64;
        image[ph..ph + 4].copy_from_slice(&elf::PT_LOAD.to_le_bytes());
        image[ph + 4..ph + 8]
            .copy_from_slice(&(elf::phdr_flags::PF_R | elf::phdr_flags::PF_X).to_le_bytes());
        image[ph + 8..ph + 16].copy_from_slice(&0x1000u64.to_le_bytes()); // p_offset
        image[ph + 16..ph + 24].copy_from_slice(&0x40_0000u64.to_le_bytes()); // p_vaddr
        image[ph + 32..ph + 40].copy_from_slice(&(payload.len() as u64).to_le_bytes()); // p_filesz
        image[ph + 40..ph + 48]
            .copy_from_slice(&((payload.len() + 100) as u64).to_le_bytes()); // p_memsz

        image[0x1000..].copy_from_slice(payload);
        image
    }

    #[test]
    fn exec_lazily_loads_segments_and_protects_the_image() {
        let _state = crate::kernel::testing::lock();
        crate::kernel::mm::frame::init_user_pool(8);
        disk::register(1, 1, Arc::new(RamDisk::new(64)));
        vm::init();

        let payload: [u8; 16] = core::array::from_fn(|i| 0xC0 + i as u8);
        fs::create("exec-demo.elf", &build_test_elf(&payload)).unwrap();

        let task = task::create("exec-demo");
        let image = exec(&task, "exec-demo.elf").expect("load");
        assert_eq!(image.entry, VirtAddr::new(0x40_0000));
        assert_eq!(task.user_rsp(), VirtAddr::new(USER_STACK_TOP));

        // the first stack page is claimed eagerly, the segment is not
        let stack_bottom = VirtAddr::new(USER_STACK_TOP - PGSIZE);
        assert!(task.pml4().lock().get_page(stack_bottom).is_some());
        assert!(task.pml4().lock().get_page(image.entry).is_none());

        // first touch pulls the payload in; the bss tail reads as zeroes
        let mut code = [0u8; 16];
        uaccess::copy_from_user(&task, image.entry, &mut code).unwrap();
        assert_eq!(code, payload);
        let mut bss = [0xFFu8; 8];
        uaccess::copy_from_user(&task, image.entry + 16, &mut bss).unwrap();
        assert!(bss.iter().all(|&b| b == 0));

        // the segment is read-only for the process
        assert!(uaccess::copy_to_user(&task, image.entry, b"!").is_err());

        // and the image file is write-protected while it runs
        let outside = fs::open("exec-demo.elf").unwrap();
        assert_eq!(outside.write_at(b"!", 0x1000), 0);

        exit(&task, 0);
        assert_eq!(task.exit_status(), 0);
        assert_eq!(outside.write_at(b"!", 0x1000), 1);
        fs::remove("exec-demo.elf").unwrap();
    }

    #[test]
    fn exec_rejects_garbage_images() {
        let _state = crate::kernel::testing::lock();
        crate::kernel::mm::frame::init_user_pool(4);
        disk::register(1, 1, Arc::new(RamDisk::new(64)));
        vm::init();

        fs::create("exec-bad.elf", &[0u8; 32]).unwrap();
        let task = task::create("exec-bad");
        assert!(matches!(
            exec(&task, "exec-bad.elf"),
            Err(LoadError::BadImage)
        ));
        assert!(matches!(
            exec(&task, "exec-missing.elf"),
            Err(LoadError::Fs(FsError::NotFound))
        ));

        exit(&task, 0);
        fs::remove("exec-bad.elf").unwrap();
    }
}
