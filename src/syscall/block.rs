//! `Block_*` (spec §4.7, §6).

use alloc::sync::Arc;
use spin::Mutex;

use crate::devices::block::{self, BlockFlags, BlockInfo, BlockRequest};
use crate::devices::dma;
use crate::error::KernelError;
use crate::ipc::port::PortId;
use crate::task::context::Context;
use crate::task::Task;

/// Wire layout for a `Block_Read`/`Block_Write` request, pointed to by
/// `ecx` (too many fields to fit in the three argument registers).
#[repr(C)]
struct BlockIoArgs {
    lba: u32,
    count: u32,
    buffer_ptr: u32,
    timeout_ticks: u64,
}

/// Wire layout shared by `Block_GetInfo`'s output and `Block_Register`'s/
/// `Block_UpdateInfo`'s input.
#[repr(C)]
struct InfoWire {
    device_type: u32,
    sector_size: u32,
    sector_count: u64,
    flags: u32,
    device_index: u32,
}

fn encode_info(info: BlockInfo) -> InfoWire {
    InfoWire {
        device_type: info.device_type,
        sector_size: info.sector_size,
        sector_count: info.sector_count,
        flags: info.flags.bits(),
        device_index: info.device_index,
    }
}

fn decode_info(wire: &InfoWire) -> BlockInfo {
    BlockInfo {
        device_type: wire.device_type,
        sector_size: wire.sector_size,
        sector_count: wire.sector_count,
        flags: BlockFlags::from_bits_truncate(wire.flags),
        device_index: wire.device_index,
    }
}

/// `Block_GetCount`.
pub fn get_count(ctx: &mut Context) -> *mut Context {
    ctx.eax = block::count() as u32;
    core::ptr::from_mut(ctx)
}

/// `Block_GetInfo(id,&outInfo)`: `ebx` = device id, `ecx` = output pointer.
pub fn get_info(ctx: &mut Context, current_task: &Arc<Mutex<Task>>) -> *mut Context {
    let _ = current_task;
    let out_ptr = ctx.ecx;
    if out_ptr == 0 {
        return super::fail(ctx, KernelError::InvalidAddress);
    }
    match block::get_info(ctx.ebx) {
        Ok(info) => {
            let wire = encode_info(info);
            // SAFETY: the calling task's address space is the active one.
            unsafe {
                core::ptr::write(out_ptr as *mut InfoWire, wire);
            }
            super::ok(ctx)
        }
        Err(e) => super::fail(ctx, e),
    }
}

/// `Block_Register(&info)` [driver-only, not coordinator-gated]: `ebx` =
/// pointer to an [`InfoWire`]. Returns the new device id.
pub fn register(ctx: &mut Context, current_task: &Arc<Mutex<Task>>) -> *mut Context {
    let info_ptr = ctx.ebx;
    if info_ptr == 0 {
        return super::fail(ctx, KernelError::InvalidAddress);
    }
    // SAFETY: the calling task's address space is the active one.
    let wire = unsafe { core::ptr::read(info_ptr as *const InfoWire) };
    let owner = current_task.lock().id;
    let id = block::register(owner, decode_info(&wire));
    ctx.eax = id;
    core::ptr::from_mut(ctx)
}

/// `Block_UpdateInfo(id,&info)`: `ebx` = device id, `ecx` = pointer to an
/// [`InfoWire`].
pub fn update_info(ctx: &mut Context, current_task: &Arc<Mutex<Task>>) -> *mut Context {
    let info_ptr = ctx.ecx;
    if info_ptr == 0 {
        return super::fail(ctx, KernelError::InvalidAddress);
    }
    // SAFETY: the calling task's address space is the active one.
    let wire = unsafe { core::ptr::read(info_ptr as *const InfoWire) };
    let requester = current_task.lock().id;
    match block::update_info(ctx.ebx, requester, decode_info(&wire)) {
        Ok(()) => super::ok(ctx),
        Err(e) => super::fail(ctx, e),
    }
}

/// `Block_Open(id)`: validates the device exists and is Ready; the kernel
/// has no further per-opener state to track (spec §4.7 leaves "open" as a
/// readiness check, not a handle-granting call).
pub fn open(ctx: &mut Context) -> *mut Context {
    match block::get_info(ctx.ebx) {
        Ok(info) if info.flags.contains(BlockFlags::READY) => super::ok(ctx),
        Ok(_) => super::fail(ctx, KernelError::InvalidOperation),
        Err(e) => super::fail(ctx, e),
    }
}

fn read_args(ctx: &Context) -> Option<BlockIoArgs> {
    let ptr = ctx.ecx;
    if ptr == 0 {
        return None;
    }
    // SAFETY: the calling task's address space is the active one.
    Some(unsafe { core::ptr::read(ptr as *const BlockIoArgs) })
}

/// `Block_Read(id,&args)`: `ebx` = device id, `ecx` = pointer to a
/// [`BlockIoArgs`].
pub fn read(ctx: &mut Context, current_task: Arc<Mutex<Task>>) -> *mut Context {
    let Some(args) = read_args(ctx) else {
        return super::fail(ctx, KernelError::InvalidAddress);
    };
    let request = BlockRequest {
        device_id: ctx.ebx,
        lba: args.lba,
        count: args.count,
        buffer_ptr: args.buffer_ptr,
        timeout_ticks: args.timeout_ticks,
    };
    block::read(ctx, current_task, request)
}

/// `Block_Write(id,&args)`: same layout as `Block_Read`.
pub fn write(ctx: &mut Context, current_task: Arc<Mutex<Task>>) -> *mut Context {
    let Some(args) = read_args(ctx) else {
        return super::fail(ctx, KernelError::InvalidAddress);
    };
    let request = BlockRequest {
        device_id: ctx.ebx,
        lba: args.lba,
        count: args.count,
        buffer_ptr: args.buffer_ptr,
        timeout_ticks: args.timeout_ticks,
    };
    block::write(ctx, current_task, request)
}

/// `Block_Bind(id,port)`: `ebx` = device id, `ecx` = the driver's own port
/// id (the driver already owns it, having created it via `IPC_CreatePort`).
pub fn bind(ctx: &mut Context, current_task: &Arc<Mutex<Task>>) -> *mut Context {
    let requester = current_task.lock().id;
    match block::bind(ctx.ebx, requester, PortId(ctx.ecx)) {
        Ok(()) => super::ok(ctx),
        Err(e) => super::fail(ctx, e),
    }
}

/// `Block_AllocateDMABuffer(size)`: `ebx` = requested size. Returns the
/// window's fixed user-space address in `eax` on success (overloads the
/// status register the same way `IPC_CreatePort`/`IPC_OpenPort` do).
pub fn allocate_dma_buffer(ctx: &mut Context, current_task: &Arc<Mutex<Task>>) -> *mut Context {
    let dir = current_task.lock().address_space;
    match dma::allocate(dir, ctx.ebx) {
        Ok(buffer) => {
            ctx.eax = buffer.vaddr;
            core::ptr::from_mut(ctx)
        }
        Err(e) => super::fail(ctx, e),
    }
}
