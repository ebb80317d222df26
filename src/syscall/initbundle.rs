//! `InitBundle_*` (spec §6, §4.8).

use alloc::sync::Arc;
use spin::Mutex;

use crate::config::INIT_BUNDLE_NAME_LEN;
use crate::error::KernelError;
use crate::loader::initbundle;
use crate::task::context::Context;
use crate::task::Task;

/// `InitBundle_GetInfo(outInfo)`: writes `{version:u8, entryCount:u8}`
/// (padded to 8 bytes) to `ebx`.
pub fn get_info(ctx: &mut Context) -> *mut Context {
    let out_ptr = ctx.ebx;
    if out_ptr == 0 {
        return super::fail(ctx, KernelError::InvalidAddress);
    }
    let (version, count) = initbundle::info();
    let record = [version, count, 0, 0, 0, 0, 0, 0];
    // SAFETY: the calling task's address space is the active one.
    unsafe {
        core::ptr::copy_nonoverlapping(record.as_ptr(), out_ptr as *mut u8, record.len());
    }
    super::ok(ctx)
}

/// `InitBundle_SpawnTask(name)` [coord-only]: `ebx`/`ecx` are the name
/// pointer/length. Returns the new task id, or 0 on failure (spec §4.8
/// step 7).
pub fn spawn_task(ctx: &mut Context, current_task: &Arc<Mutex<Task>>) -> *mut Context {
    if super::require_coordinator(current_task).is_err() {
        ctx.eax = 0;
        return core::ptr::from_mut(ctx);
    }

    let ptr = ctx.ebx;
    let len = (ctx.ecx as usize).min(INIT_BUNDLE_NAME_LEN);
    if ptr == 0 || len == 0 {
        ctx.eax = 0;
        return core::ptr::from_mut(ctx);
    }

    // SAFETY: the calling task's address space is the active one; `len`
    // is bounded to the bundle's own name field width.
    let bytes = unsafe { core::slice::from_raw_parts(ptr as *const u8, len) };
    let Ok(name) = core::str::from_utf8(bytes) else {
        ctx.eax = 0;
        return core::ptr::from_mut(ctx);
    };

    ctx.eax = initbundle::spawn_task(name).map_or(0, |id| id.0);
    core::ptr::from_mut(ctx)
}
