// src/kernel/core/mod.rs
//! カーネル共通基盤

pub mod result;

pub use result::{ErrorKind, KernelError, KernelResult};
