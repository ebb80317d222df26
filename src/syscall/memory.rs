//! `Memory_*` (spec §4.7, §6).

use alloc::sync::Arc;
use spin::Mutex;

use crate::task::context::Context;
use crate::task::Task;

/// `Memory_ExpandHeap(bytes)`: `ebx` = byte count. Returns the previous
/// heap end in `eax` (overloads the status register, like `IPC_CreatePort`
/// and friends).
pub fn expand_heap(ctx: &mut Context, current_task: &Arc<Mutex<Task>>) -> *mut Context {
    match current_task.lock().expand_heap(ctx.ebx) {
        Ok(previous_end) => {
            ctx.eax = previous_end;
            core::ptr::from_mut(ctx)
        }
        Err(e) => super::fail(ctx, e),
    }
}
