//! Thread control block (spec §3 "Thread", §4.4).

use alloc::boxed::Box;
use alloc::sync::Arc;
use spin::Mutex;

use crate::config::KERNEL_STACK_SIZE;
use crate::task::Task;
use crate::task::context::Context;

/// Monotonically increasing thread identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u32);

/// Lifecycle state of a thread (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Ready,
    Running,
    Blocked,
    Terminated,
}

/// A kernel thread: the unit the scheduler runs.
pub struct Thread {
    pub id: ThreadId,
    pub owning_task: Arc<Mutex<Task>>,
    pub state: ThreadState,
    /// Pointer to this thread's saved [`Context`], living on its own
    /// kernel stack. `None` only while the thread is `Running`.
    pub context: *mut Context,
    kernel_stack: Box<[u8]>,
    pub kernel_stack_top: u32,
    /// Exit code recorded by `Task_Exit`, for later introspection.
    pub exit_code: Option<u32>,
}

// SAFETY: every `Thread` is only ever touched while the scheduler's global
// lock (or the owning task's lock) is held.
unsafe impl Send for Thread {}

fn next_thread_id() -> ThreadId {
    use core::sync::atomic::{AtomicU32, Ordering};
    static NEXT: AtomicU32 = AtomicU32::new(1);
    ThreadId(NEXT.fetch_add(1, Ordering::Relaxed))
}

impl Thread {
    /// Builds a new, `Ready` kernel-mode thread starting at `entry`.
    pub fn new_kernel(owning_task: Arc<Mutex<Task>>, entry: extern "C" fn() -> !) -> Self {
        let mut kernel_stack = alloc::vec![0u8; KERNEL_STACK_SIZE as usize].into_boxed_slice();
        let stack_top = kernel_stack.as_mut_ptr() as u32 + KERNEL_STACK_SIZE;
        let ctx = Context::new_kernel_thread(entry, stack_top);
        let context = Self::install_initial_context(&mut kernel_stack, ctx);
        Self {
            id: next_thread_id(),
            owning_task,
            state: ThreadState::Ready,
            context,
            kernel_stack,
            kernel_stack_top: stack_top,
            exit_code: None,
        }
    }

    /// Builds a new, `Ready` thread whose first dispatch transitions into
    /// user mode at `user_entry`/`user_stack_top` (spec §4.4 "user thread
    /// creation").
    pub fn new_user(owning_task: Arc<Mutex<Task>>, user_entry: u32, user_stack_top: u32) -> Self {
        let mut kernel_stack = alloc::vec![0u8; KERNEL_STACK_SIZE as usize].into_boxed_slice();
        let stack_top = kernel_stack.as_mut_ptr() as u32 + KERNEL_STACK_SIZE;
        let ctx = Context::new_user_thread(user_entry, user_stack_top);
        let context = Self::install_initial_context(&mut kernel_stack, ctx);
        Self {
            id: next_thread_id(),
            owning_task,
            state: ThreadState::Ready,
            context,
            kernel_stack,
            kernel_stack_top: stack_top,
            exit_code: None,
        }
    }

    fn install_initial_context(stack: &mut [u8], ctx: Context) -> *mut Context {
        let top = stack.as_mut_ptr() as usize + stack.len();
        let ctx_addr = (top - size_of::<Context>()) & !0xf;
        let ctx_ptr = ctx_addr as *mut Context;
        // SAFETY: `ctx_addr` lies within `stack`, which this `Thread`
        // exclusively owns.
        unsafe {
            ctx_ptr.write(ctx);
        }
        ctx_ptr
    }
}

use core::mem::size_of;
