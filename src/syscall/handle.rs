//! `Handle_*` (spec §6): generic per-task handle table operations.

use alloc::sync::Arc;
use spin::Mutex;

use crate::ipc::handle::{HandleId, Rights};
use crate::task::context::Context;
use crate::task::Task;

/// `Handle_Close(h)`: `ebx` = handle.
pub fn close(ctx: &mut Context, current_task: &Arc<Mutex<Task>>) -> *mut Context {
    match current_task.lock().handles.close(HandleId(ctx.ebx)) {
        Ok(_) => super::ok(ctx),
        Err(e) => super::fail(ctx, e),
    }
}

/// `Handle_Dup(h,rights)`: `ebx` = handle, `ecx` = requested rights subset.
/// Returns the new handle in `eax`.
pub fn dup(ctx: &mut Context, current_task: &Arc<Mutex<Task>>) -> *mut Context {
    let rights = Rights::from_bits_truncate(ctx.ecx);
    match current_task.lock().handles.duplicate(HandleId(ctx.ebx), rights) {
        Ok(new_handle) => {
            ctx.eax = new_handle.0;
            core::ptr::from_mut(ctx)
        }
        Err(e) => super::fail(ctx, e),
    }
}

/// `Handle_Query(h,&outRights)`: `ebx` = handle, `ecx` = output pointer for
/// the handle's rights bitmask.
pub fn query(ctx: &mut Context, current_task: &Arc<Mutex<Task>>) -> *mut Context {
    let out_ptr = ctx.ecx;
    if out_ptr == 0 {
        return super::fail(ctx, crate::error::KernelError::InvalidAddress);
    }
    match current_task.lock().handles.query(HandleId(ctx.ebx)) {
        Ok((_, rights)) => {
            // SAFETY: the calling task's address space is the active one.
            unsafe {
                core::ptr::write(out_ptr as *mut u32, rights.bits());
            }
            super::ok(ctx)
        }
        Err(e) => super::fail(ctx, e),
    }
}
