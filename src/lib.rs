// src/lib.rs
//! Mica OS - 仮想メモリを中核とした教育用カーネル
//!
//! 遅延ロード・スワップ・mmap・copy-on-write を備えたデマンドページング
//! サブシステムを trait ベースの抽象化で実装しています。
//!
//! The crate builds two ways: `no_std` for the bare-metal kernel target,
//! and hosted (with `std`) for the unit-test suite, which drives the VM
//! core against the software page-table and RAM-disk backends.

#![cfg_attr(not(any(test, feature = "std-tests")), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![allow(missing_docs)]

extern crate alloc;

pub mod kernel;
pub mod sync;

// グローバルヒープアロケータ
#[cfg(target_os = "none")]
#[global_allocator]
static ALLOCATOR: linked_list_allocator::LockedHeap = linked_list_allocator::LockedHeap::empty();

/// ヒープを初期化
///
/// # Safety
///
/// この関数は、カーネルブート時に一度だけ実行されることが意図されており、
/// 呼び出し元は `[start, start + size)` が有効かつ排他的なメモリ範囲で
/// あることを保証する必要があります。
#[cfg(target_os = "none")]
pub unsafe fn init_heap(start: *mut u8, size: usize) {
    debug_assert!(!start.is_null(), "Heap start address must not be null");
    debug_assert!(size > 0, "Heap size must be greater than zero");

    // SAFETY: 呼び出し元がヒープ領域の有効性を保証している
    unsafe {
        ALLOCATOR.lock().init(start, size);
    }
}

/// console_print! マクロ - ユーザー向け出力
///
/// このマクロは抽象化されたコンソールインターフェースを使用します。
/// デバッグ出力には `debug_print!` を使用してください。
#[macro_export]
macro_rules! console_print {
    ($($arg:tt)*) => {{
        $crate::kernel::driver::write_console(format_args!($($arg)*));
    }};
}

/// console_println! マクロ - ユーザー向け出力（改行付き）
#[macro_export]
macro_rules! console_println {
    () => ($crate::console_print!("\n"));
    ($($arg:tt)*) => ($crate::console_print!("{}\n", format_args!($($arg)*)));
}

/// debug_print! マクロ - デバッグ専用（シリアルポートのみ）
#[macro_export]
macro_rules! debug_print {
    ($($arg:tt)*) => {{
        $crate::kernel::driver::write_debug(format_args!($($arg)*));
    }};
}

/// debug_println! マクロ - デバッグ専用（改行付き）
#[macro_export]
macro_rules! debug_println {
    () => ($crate::debug_print!("\n"));
    ($($arg:tt)*) => ($crate::debug_print!("{}\n", format_args!($($arg)*)));
}

/// Halt loop
#[cfg(target_os = "none")]
#[inline]
pub fn hlt_loop() -> ! {
    loop {
        x86_64::instructions::hlt();
    }
}
