// src/kernel/mod.rs
//! カーネル抽象化
//!
//! このモジュールは、カーネル全体で使用する基本的な trait、型、
//! エラーハンドリング機構と各サブシステムを提供します。
pub mod core;
pub mod driver;
pub mod fs;
pub mod mm;
pub mod process;
pub mod task;
pub mod vm;

#[cfg(test)]
pub(crate) mod testing {
    //! Serializes tests that reconfigure the global frame pool, swap table,
    //! or frame table.
    use std::sync::{Mutex, MutexGuard, PoisonError};

    static GLOBAL_STATE: Mutex<()> = Mutex::new(());

    pub fn lock() -> MutexGuard<'static, ()> {
        GLOBAL_STATE.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
