//! `Task_*` (spec §6).

use alloc::sync::Arc;
use spin::Mutex;

use crate::error::KernelError;
use crate::task::context::Context;
use crate::task::{scheduler, timer, Task, TaskId};

/// `Task_Exit`: terminates the calling thread, surfacing `ebx` as the
/// task's exit code for later introspection (spec §6 "exit codes").
pub fn exit(ctx: &mut Context, current_task: &Arc<Mutex<Task>>) -> *mut Context {
    let _ = current_task;
    scheduler::exit_current_thread(ctx.ebx);
    scheduler::reschedule(ctx)
}

/// `Task_Yield`: cooperative reschedule.
pub fn yield_now(ctx: &mut Context) -> *mut Context {
    scheduler::reschedule(ctx)
}

/// `Task_GrantIOAccess(target)` [coord-only]: flips the I/O-port permission
/// flag on task `ebx`.
pub fn grant_io_access(ctx: &mut Context, current_task: &Arc<Mutex<Task>>) -> *mut Context {
    if super::require_coordinator(current_task).is_err() {
        return super::fail(ctx, KernelError::NotCoordinator);
    }
    let target = TaskId(ctx.ebx);
    let Some(task) = scheduler::task_by_id(target) else {
        return super::fail(ctx, KernelError::NotFound);
    };
    task.lock().io_access = true;
    super::ok(ctx)
}

/// `Task_SleepTicks(n)`: parks the caller for `ebx` ticks.
pub fn sleep_ticks(ctx: &mut Context) -> *mut Context {
    timer::sleep_current(u64::from(ctx.ebx));
    scheduler::reschedule(ctx)
}
