// src/kernel/task/mod.rs
//! タスク管理
//!
//! The slice of the thread subsystem the VM needs: a per-task hardware
//! page table, a supplemental page table, the user stack pointer captured
//! on trap entry, and an exit status. Tasks live behind `Arc` in a global
//! registry keyed by id.

use crate::kernel::fs::File;
use crate::kernel::mm::VirtAddr;
use crate::kernel::mm::page_table::Pml4;
use crate::kernel::vm::spt::SupplementalPageTable;
use alloc::borrow::ToOwned;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicI32, AtomicU64, AtomicUsize, Ordering};
use lazy_static::lazy_static;
use spin::Mutex;

/// Task ID type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// A kernel task (one user process).
pub struct Task {
    id: TaskId,
    name: String,
    pml4: Arc<Mutex<Pml4>>,
    spt: Mutex<SupplementalPageTable>,
    user_rsp: AtomicUsize,
    exit_status: AtomicI32,
    exec_file: Mutex<Option<File>>,
}

/// Shared task handle.
pub type TaskRef = Arc<Task>;

impl Task {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The task's hardware page table.
    pub fn pml4(&self) -> &Arc<Mutex<Pml4>> {
        &self.pml4
    }

    /// The task's supplemental page table.
    pub fn spt(&self) -> &Mutex<SupplementalPageTable> {
        &self.spt
    }

    /// User stack pointer captured on the most recent trap entry.
    pub fn user_rsp(&self) -> VirtAddr {
        VirtAddr::new(self.user_rsp.load(Ordering::Acquire))
    }

    pub fn set_user_rsp(&self, rsp: VirtAddr) {
        self.user_rsp.store(rsp.as_usize(), Ordering::Release);
    }

    pub fn exit_status(&self) -> i32 {
        self.exit_status.load(Ordering::Acquire)
    }

    pub fn set_exit_status(&self, status: i32) {
        self.exit_status.store(status, Ordering::Release);
    }

    /// Record the running executable (held open, writes denied).
    pub(crate) fn set_exec_file(&self, file: File) {
        *self.exec_file.lock() = Some(file);
    }

    pub(crate) fn take_exec_file(&self) -> Option<File> {
        self.exec_file.lock().take()
    }
}

static NEXT_TID: AtomicU64 = AtomicU64::new(1);

lazy_static! {
    static ref TASKS: Mutex<BTreeMap<TaskId, TaskRef>> = Mutex::new(BTreeMap::new());
    static ref CURRENT: Mutex<Option<TaskRef>> = Mutex::new(None);
}

/// Create a task with an empty address space and add it to the registry.
pub fn create(name: &str) -> TaskRef {
    let task = Arc::new(Task {
        id: TaskId(NEXT_TID.fetch_add(1, Ordering::Relaxed)),
        name: name.to_owned(),
        pml4: Arc::new(Mutex::new(Pml4::new())),
        spt: Mutex::new(SupplementalPageTable::new()),
        user_rsp: AtomicUsize::new(0),
        exit_status: AtomicI32::new(0),
        exec_file: Mutex::new(None),
    });
    TASKS.lock().insert(task.id, task.clone());
    task
}

/// Look up a task by id.
pub fn get(id: TaskId) -> Option<TaskRef> {
    TASKS.lock().get(&id).cloned()
}

/// Drop a task from the registry (no-op if absent).
pub(crate) fn unregister(id: TaskId) {
    TASKS.lock().remove(&id);
}

/// The task running on the (single) CPU, if one has been installed.
pub fn current() -> Option<TaskRef> {
    CURRENT.lock().clone()
}

/// Install the running task.
pub fn set_current(task: Option<TaskRef>) {
    *CURRENT.lock() = task;
}
