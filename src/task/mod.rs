//! Tasks, threads, and the preemptive round-robin scheduler (spec §4.4).

pub mod context;
pub mod scheduler;
pub mod thread;
pub mod timer;

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};
use spin::Mutex;

use crate::error::{KernelError, KernelResult};
use crate::ipc::handle::HandleTable;
use crate::mm::paging::{self, PhysDir};
use crate::task::thread::ThreadId;

/// Monotonically increasing task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u32);

fn next_task_id() -> TaskId {
    static NEXT: AtomicU32 = AtomicU32::new(1);
    TaskId(NEXT.fetch_add(1, Ordering::Relaxed))
}

/// A task's user-heap window: `[base, currentEnd)` is reserved, of which
/// `[base, mappedEnd)` is actually backed by frames; `hardLimit` bounds how
/// far `Memory_ExpandHeap` may push `currentEnd`.
#[derive(Debug, Clone, Copy)]
pub struct UserHeap {
    pub base: u32,
    pub current_end: u32,
    pub mapped_end: u32,
    pub hard_limit: u32,
}

impl UserHeap {
    /// A heap window that has not been established yet (kernel tasks).
    #[must_use]
    pub const fn none() -> Self {
        Self {
            base: 0,
            current_end: 0,
            mapped_end: 0,
            hard_limit: 0,
        }
    }
}

/// A task: an address space plus zero or more threads (spec §3 "Task").
pub struct Task {
    pub id: TaskId,
    pub address_space: PhysDir,
    pub io_access: bool,
    pub is_coordinator: bool,
    pub user_heap: UserHeap,
    pub threads: Vec<ThreadId>,
    pub main_thread: Option<ThreadId>,
    pub exit_code: Option<u32>,
    pub handles: HandleTable,
    /// The local handle materialized by the most recently received message
    /// that carried a transferred handle, drained by `IPC_TryGetHandleMessage`.
    pub pending_handle: Option<crate::ipc::handle::HandleId>,
}

impl Task {
    /// Creates a purely in-kernel task (no user address space of its own;
    /// runs in the shared kernel directory). Used for the idle thread and
    /// any kernel-only service threads.
    #[must_use]
    pub fn new_kernel(address_space: PhysDir) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self {
            id: next_task_id(),
            address_space,
            io_access: false,
            is_coordinator: false,
            user_heap: UserHeap::none(),
            threads: Vec::new(),
            main_thread: None,
            exit_code: None,
            handles: HandleTable::new(),
            pending_handle: None,
        }))
    }

    /// Creates a task backing a freshly loaded user image.
    #[must_use]
    pub fn new_user(address_space: PhysDir, user_heap: UserHeap) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self {
            id: next_task_id(),
            address_space,
            io_access: false,
            is_coordinator: false,
            user_heap,
            threads: Vec::new(),
            main_thread: None,
            exit_code: None,
            handles: HandleTable::new(),
            pending_handle: None,
        }))
    }

    /// Reserves more of the task's heap window, mapping frames eagerly
    /// (spec §4.7 `Memory_ExpandHeap`). Returns the previous `currentEnd`,
    /// which the caller treats as the base of the newly granted range.
    /// `mm::paging::handle_page_fault`'s lazy path remains a fallback for
    /// any access the eager map here didn't already cover.
    pub fn expand_heap(&mut self, bytes: u32) -> KernelResult<u32> {
        let previous_end = self.user_heap.current_end;
        let requested_end = previous_end
            .checked_add(bytes)
            .ok_or(KernelError::InvalidOperation)?;
        if requested_end > self.user_heap.hard_limit {
            return Err(KernelError::OutOfMemory);
        }

        let mapped_end = self.user_heap.mapped_end;
        if requested_end > mapped_end {
            let mut vaddr = mapped_end & !(crate::config::PAGE_SIZE - 1);
            while vaddr < requested_end {
                let frame = crate::mm::phys::allocate_page(true);
                paging::map_page(self.address_space, vaddr, frame, true, true, false);
                vaddr += crate::config::PAGE_SIZE;
            }
            self.user_heap.mapped_end = vaddr;
        }

        self.user_heap.current_end = requested_end;
        Ok(previous_end)
    }
}
