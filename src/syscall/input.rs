//! `Input_*` (spec §4.7, §6): mirrors `Block_*`'s shape.

use alloc::sync::Arc;
use spin::Mutex;

use crate::devices::input::{self, InputFlags, InputInfo};
use crate::error::KernelError;
use crate::task::context::Context;
use crate::task::Task;

#[repr(C)]
struct InfoWire {
    device_type: u32,
    flags: u32,
    device_index: u32,
}

fn encode_info(info: InputInfo) -> InfoWire {
    InfoWire {
        device_type: info.device_type,
        flags: info.flags.bits(),
        device_index: info.device_index,
    }
}

fn decode_info(wire: &InfoWire) -> InputInfo {
    InputInfo {
        device_type: wire.device_type,
        flags: InputFlags::from_bits_truncate(wire.flags),
        device_index: wire.device_index,
    }
}

/// `Input_GetCount`.
pub fn get_count(ctx: &mut Context) -> *mut Context {
    ctx.eax = input::count() as u32;
    core::ptr::from_mut(ctx)
}

/// `Input_GetInfo(id,&outInfo)`: `ebx` = device id, `ecx` = output pointer.
pub fn get_info(ctx: &mut Context, current_task: &Arc<Mutex<Task>>) -> *mut Context {
    let _ = current_task;
    let out_ptr = ctx.ecx;
    if out_ptr == 0 {
        return super::fail(ctx, KernelError::InvalidAddress);
    }
    match input::get_info(ctx.ebx) {
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

/// `Input_Register(&info)` [driver-only]: `ebx` = pointer to an
/// [`InfoWire`]. Returns the new device id.
pub fn register(ctx: &mut Context, current_task: &Arc<Mutex<Task>>) -> *mut Context {
    let info_ptr = ctx.ebx;
    if info_ptr == 0 {
        return super::fail(ctx, KernelError::InvalidAddress);
    }
    // SAFETY: the calling task's address space is the active one.
    let wire = unsafe { core::ptr::read(info_ptr as *const InfoWire) };
    let owner = current_task.lock().id;
    let id = input::register(owner, decode_info(&wire));
    ctx.eax = id;
    core::ptr::from_mut(ctx)
}

/// `Input_UpdateInfo(id,&info)`: `ebx` = device id, `ecx` = pointer to an
/// [`InfoWire`].
pub fn update_info(ctx: &mut Context, current_task: &Arc<Mutex<Task>>) -> *mut Context {
    let info_ptr = ctx.ecx;
    if info_ptr == 0 {
        return super::fail(ctx, KernelError::InvalidAddress);
    }
    // SAFETY: the calling task's address space is the active one.
    let wire = unsafe { core::ptr::read(info_ptr as *const InfoWire) };
    let requester = current_task.lock().id;
    match input::update_info(ctx.ebx, requester, decode_info(&wire)) {
        Ok(()) => super::ok(ctx),
        Err(e) => super::fail(ctx, e),
    }
}

/// `Input_Open(id)`: marks the device Ready for reads.
pub fn open(ctx: &mut Context) -> *mut Context {
    match input::open(ctx.ebx) {
        Ok(()) => super::ok(ctx),
        Err(e) => super::fail(ctx, e),
    }
}

/// `Input_ReadEvent(id,&outEvent)`/`Input_ReadEventTimeout(id,&outEvent,ticks)`
/// share a body: `ebx` = device id, `ecx` = output pointer, `edx` = timeout
/// ticks (0 for the non-timeout form, checked by the caller).
pub fn read_event(ctx: &mut Context, current_task: Arc<Mutex<Task>>, timeout_ticks: u64) -> *mut Context {
    let device_id = ctx.ebx;
    let dest_ptr = ctx.ecx;
    input::read_event(ctx, current_task, device_id, dest_ptr, timeout_ticks)
}

/// `Input_ReadEventTimeout`: reads `edx` for the timeout then delegates to
/// [`read_event`].
pub fn read_event_timeout(ctx: &mut Context, current_task: Arc<Mutex<Task>>) -> *mut Context {
    let ticks = u64::from(ctx.edx);
    read_event(ctx, current_task, ticks)
}

/// `Input_PushEvent(id,&event)` [driver-only]: `ebx` = device id, `ecx` =
/// pointer to a 20-byte encoded [`input::Event`], the same wire shape
/// `read_event` decodes into user memory.
pub fn push_event(ctx: &mut Context) -> *mut Context {
    let event_ptr = ctx.ecx;
    if event_ptr == 0 {
        return super::fail(ctx, KernelError::InvalidAddress);
    }
    // SAFETY: the calling task's address space is the active one.
    let bytes = unsafe { core::slice::from_raw_parts(event_ptr as *const u8, 20) };
    let word = |i: usize| u32::from_le_bytes(bytes[i * 4..i * 4 + 4].try_into().unwrap());
    let packed = word(4);
    let event = input::Event {
        event_type: word(0),
        device_id: word(1),
        key_code: word(2),
        modifiers: word(3),
        ascii: (packed >> 24) as u8,
        unicode: packed & 0x00FF_FFFF,
    };
    match input::push_event(ctx.ebx, event) {
        Ok(()) => super::ok(ctx),
        Err(e) => super::fail(ctx, e),
    }
}
