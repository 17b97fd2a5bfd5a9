// src/kernel/fs/ramfs.rs
//! RAM-backed inode store
//!
//! A flat namespace of fixed-size files. Inodes are reference-counted so
//! open handles (including the reopened handles mmap regions hold) survive
//! removal of the directory entry.

use super::{FsError, FsResult};
use alloc::borrow::ToOwned;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};
use lazy_static::lazy_static;
use spin::Mutex;

/// One file's storage.
pub struct Inode {
    data: Mutex<Vec<u8>>,
    deny_write: AtomicUsize,
}

impl Inode {
    pub(super) fn length(&self) -> usize {
        self.data.lock().len()
    }

    pub(super) fn read_at(&self, buf: &mut [u8], offset: usize) -> usize {
        let data = self.data.lock();
        if offset >= data.len() {
            return 0;
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        n
    }

    /// Write without growing the file; 0 while writes are denied.
    pub(super) fn write_at(&self, buf: &[u8], offset: usize) -> usize {
        if self.deny_write.load(Ordering::Acquire) > 0 {
            return 0;
        }
        let mut data = self.data.lock();
        if offset >= data.len() {
            return 0;
        }
        let n = buf.len().min(data.len() - offset);
        data[offset..offset + n].copy_from_slice(&buf[..n]);
        n
    }

    pub(super) fn deny_write(&self) {
        self.deny_write.fetch_add(1, Ordering::AcqRel);
    }

    pub(super) fn allow_write(&self) {
        let prev = self.deny_write.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "allow_write without matching deny_write");
    }
}

lazy_static! {
    static ref ROOT: Mutex<BTreeMap<String, Arc<Inode>>> = Mutex::new(BTreeMap::new());
}

pub(super) fn lookup(name: &str) -> Option<Arc<Inode>> {
    ROOT.lock().get(name).cloned()
}

pub(super) fn insert(name: &str, data: &[u8]) -> FsResult<()> {
    let mut root = ROOT.lock();
    if root.contains_key(name) {
        return Err(FsError::AlreadyExists);
    }
    root.insert(
        name.to_owned(),
        Arc::new(Inode {
            data: Mutex::new(data.to_owned()),
            deny_write: AtomicUsize::new(0),
        }),
    );
    Ok(())
}

pub(super) fn remove(name: &str) -> FsResult<()> {
    ROOT.lock().remove(name).map(|_| ()).ok_or(FsError::NotFound)
}
