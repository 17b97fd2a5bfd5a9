// src/main.rs
#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
mod boot {
    extern crate alloc;

    use alloc::sync::Arc;
    use bootloader_api::info::MemoryRegionKind;
    use bootloader_api::{BootInfo, entry_point};
    use mica_os::kernel::driver::disk::{self, RamDisk, SECTOR_SIZE};
    use mica_os::kernel::{mm, vm};
    use mica_os::{console_println, debug_println, hlt_loop};

    /// Kernel heap carved out of .bss; the user frame pool lives inside it.
    const HEAP_SIZE: usize = 2 * 1024 * 1024;

    /// Frames handed to the user pool (1 MiB of the heap).
    const USER_POOL_PAGES: usize = 256;

    /// Swap disk size in sectors (4 MiB = 2048 page slots).
    const SWAP_SECTORS: usize = 8192;

    #[repr(align(4096))]
    struct HeapRegion([u8; HEAP_SIZE]);

    static mut HEAP_REGION: HeapRegion = HeapRegion([0; HEAP_SIZE]);

    entry_point!(kernel_main);

    fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
        // SAFETY: HEAP_REGION is used only here, once, before any allocation.
        unsafe {
            mica_os::init_heap(core::ptr::addr_of_mut!(HEAP_REGION).cast(), HEAP_SIZE);
        }

        let usable: u64 = boot_info
            .memory_regions
            .iter()
            .filter(|r| r.kind == MemoryRegionKind::Usable)
            .map(|r| r.end - r.start)
            .sum();
        debug_println!("[boot] usable physical memory: {} KiB", usable / 1024);

        mm::frame::init_user_pool(USER_POOL_PAGES);

        // No ATA driver yet; a RAM disk stands in as the swap device at the
        // conventional (1, 1) slot.
        disk::register(1, 1, Arc::new(RamDisk::new(SWAP_SECTORS)));
        vm::init();

        console_println!(
            "mica_os {} ({} build): {} user frames, {} swap slots",
            env!("CARGO_PKG_VERSION"),
            env!("BUILD_PROFILE"),
            USER_POOL_PAGES,
            SWAP_SECTORS * SECTOR_SIZE / mm::PGSIZE,
        );

        hlt_loop();
    }

    #[panic_handler]
    fn panic(info: &core::panic::PanicInfo) -> ! {
        debug_println!("[panic] {}", info);
        hlt_loop();
    }
}

#[cfg(not(target_os = "none"))]
fn main() {
    // The kernel proper only runs on the bare-metal target; hosted builds
    // exist for the std test suite.
}
