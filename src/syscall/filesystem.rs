//! `FileSystem_*` (spec §6): every call but `RegisterService` is opaque
//! forwarding to whatever service [`FS_REGISTER_SERVICE`] last named (see
//! [`crate::devices::filesystem`]). `ebx`/`ecx` name the raw request bytes
//! and their length; `edx` points at a small [`ReplyArgs`] record, since a
//! request/reply/timeout triple does not fit in the remaining argument
//! registers.

use alloc::sync::Arc;
use spin::Mutex;

use crate::devices::filesystem;
use crate::error::KernelError;
use crate::ipc::port::PortId;
use crate::task::context::Context;
use crate::task::Task;

#[repr(C)]
struct ReplyArgs {
    reply_ptr: u32,
    reply_cap: u32,
    timeout_ticks: u64,
}

fn forward(ctx: &mut Context, current_task: Arc<Mutex<Task>>, opcode: u8) -> *mut Context {
    let req_ptr = ctx.ebx;
    let req_len = ctx.ecx as usize;
    let args_ptr = ctx.edx;
    if args_ptr == 0 {
        return super::fail(ctx, KernelError::InvalidAddress);
    }
    // SAFETY: the calling task's address space is the active one.
    let args = unsafe { core::ptr::read(args_ptr as *const ReplyArgs) };

    let request: &[u8] = if req_ptr == 0 || req_len == 0 {
        &[]
    } else {
        // SAFETY: `req_ptr`/`req_len` name a buffer in the calling task's
        // own address space, which is the active one.
        unsafe { core::slice::from_raw_parts(req_ptr as *const u8, req_len) }
    };

    filesystem::call(
        ctx,
        current_task,
        opcode,
        request,
        args.reply_ptr,
        args.reply_cap as usize,
        args.timeout_ticks,
    )
}

pub fn list_volumes(ctx: &mut Context, current_task: Arc<Mutex<Task>>) -> *mut Context {
    forward(ctx, current_task, 0)
}
pub fn open_volume(ctx: &mut Context, current_task: Arc<Mutex<Task>>) -> *mut Context {
    forward(ctx, current_task, 1)
}
pub fn close_volume(ctx: &mut Context, current_task: Arc<Mutex<Task>>) -> *mut Context {
    forward(ctx, current_task, 2)
}
pub fn get_volume_info(ctx: &mut Context, current_task: Arc<Mutex<Task>>) -> *mut Context {
    forward(ctx, current_task, 3)
}
pub fn open(ctx: &mut Context, current_task: Arc<Mutex<Task>>) -> *mut Context {
    forward(ctx, current_task, 4)
}
pub fn close(ctx: &mut Context, current_task: Arc<Mutex<Task>>) -> *mut Context {
    forward(ctx, current_task, 5)
}
pub fn read(ctx: &mut Context, current_task: Arc<Mutex<Task>>) -> *mut Context {
    forward(ctx, current_task, 6)
}
pub fn write(ctx: &mut Context, current_task: Arc<Mutex<Task>>) -> *mut Context {
    forward(ctx, current_task, 7)
}
pub fn seek(ctx: &mut Context, current_task: Arc<Mutex<Task>>) -> *mut Context {
    forward(ctx, current_task, 8)
}
pub fn stat(ctx: &mut Context, current_task: Arc<Mutex<Task>>) -> *mut Context {
    forward(ctx, current_task, 9)
}
pub fn read_directory(ctx: &mut Context, current_task: Arc<Mutex<Task>>) -> *mut Context {
    forward(ctx, current_task, 10)
}
pub fn create_directory(ctx: &mut Context, current_task: Arc<Mutex<Task>>) -> *mut Context {
    forward(ctx, current_task, 11)
}
pub fn create_file(ctx: &mut Context, current_task: Arc<Mutex<Task>>) -> *mut Context {
    forward(ctx, current_task, 12)
}
pub fn remove(ctx: &mut Context, current_task: Arc<Mutex<Task>>) -> *mut Context {
    forward(ctx, current_task, 13)
}
pub fn rename(ctx: &mut Context, current_task: Arc<Mutex<Task>>) -> *mut Context {
    forward(ctx, current_task, 14)
}

/// `FileSystem_RegisterService(port)` [coord-only]: `ebx` = the service's
/// own port id (it already owns it, having created it via `IPC_CreatePort`).
pub fn register_service(ctx: &mut Context, current_task: &Arc<Mutex<Task>>) -> *mut Context {
    if super::require_coordinator(current_task).is_err() {
        return super::fail(ctx, KernelError::NotCoordinator);
    }
    let owner = current_task.lock().id;
    filesystem::register_service(owner, PortId(ctx.ebx));
    super::ok(ctx)
}
