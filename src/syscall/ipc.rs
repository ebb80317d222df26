//! `IPC_*` (spec §4.5, §6).

use alloc::sync::Arc;
use spin::Mutex;

use crate::config::{MAX_PAYLOAD_BYTES, MAX_QUEUE_DEPTH};
use crate::error::KernelError;
use crate::ipc::handle::{HandleId, Object, Rights};
use crate::ipc::port::{self, HandleTransfer, Message, PortId};
use crate::task::context::Context;
use crate::task::{scheduler, Task};

/// User-supplied layout for `IPC_Send`'s `msg` argument: an explicit
/// length followed by the raw payload.
#[repr(C)]
struct WireMessage {
    length: u32,
    payload: [u8; MAX_PAYLOAD_BYTES],
}

fn port_for_handle(task: &Arc<Mutex<Task>>, handle: HandleId, required: Rights) -> Result<PortId, KernelError> {
    let object = task.lock().handles.check_rights(handle, required)?;
    match object {
        Object::Port(id) => Ok(id),
        Object::Device(_) => Err(KernelError::BadHandle),
    }
}

/// `IPC_CreatePort`: owned by the caller, capacity `MaxQueueDepth`.
pub fn create_port(ctx: &mut Context, current_task: &Arc<Mutex<Task>>) -> *mut Context {
    let owner = current_task.lock().id;
    let port = port::create_port(owner, MAX_QUEUE_DEPTH);
    ctx.eax = port.id.0;
    core::ptr::from_mut(ctx)
}

/// `IPC_OpenPort(id,rights)`: `ebx` = port id, `ecx` = requested rights
/// bitmask. Receive/Manage are refused to non-owners (spec §4.5).
pub fn open_port(ctx: &mut Context, current_task: &Arc<Mutex<Task>>) -> *mut Context {
    let port_id = PortId(ctx.ebx);
    let Some(port) = port::lookup(port_id) else {
        return super::fail(ctx, KernelError::NotFound);
    };
    let rights = Rights::from_bits_truncate(ctx.ecx);

    let requester = current_task.lock().id;
    if rights.intersects(Rights::RECEIVE | Rights::MANAGE) && port.owner != requester {
        return super::fail(ctx, KernelError::PermissionDenied);
    }

    let handle = current_task.lock().handles.insert(Object::Port(port_id), rights);
    ctx.eax = handle.0;
    core::ptr::from_mut(ctx)
}

/// `IPC_DestroyPort`: `ebx` = handle, requires Manage right and owner
/// identity (checked again inside `port::destroy_port`).
pub fn destroy_port(ctx: &mut Context, current_task: &Arc<Mutex<Task>>) -> *mut Context {
    let handle = HandleId(ctx.ebx);
    let port_id = match port_for_handle(current_task, handle, Rights::MANAGE) {
        Ok(id) => id,
        Err(e) => return super::fail(ctx, e),
    };
    let requester = current_task.lock().id;
    match port::destroy_port(port_id, requester) {
        Ok(()) => super::ok(ctx),
        Err(e) => super::fail(ctx, e),
    }
}

/// `IPC_CloseHandle`: `ebx` = handle.
pub fn close_handle(ctx: &mut Context, current_task: &Arc<Mutex<Task>>) -> *mut Context {
    let handle = HandleId(ctx.ebx);
    match current_task.lock().handles.close(handle) {
        Ok(_) => super::ok(ctx),
        Err(e) => super::fail(ctx, e),
    }
}

/// `IPC_Send(h,msg)`: `ebx` = handle, `ecx` = pointer to a [`WireMessage`].
pub fn send(ctx: &mut Context, current_task: &Arc<Mutex<Task>>) -> *mut Context {
    let handle = HandleId(ctx.ebx);
    let msg_ptr = ctx.ecx;
    if msg_ptr == 0 {
        return super::fail(ctx, KernelError::InvalidAddress);
    }

    let port_id = match port_for_handle(current_task, handle, Rights::SEND) {
        Ok(id) => id,
        Err(e) => return super::fail(ctx, e),
    };
    let Some(port) = port::lookup(port_id) else {
        return super::fail(ctx, KernelError::NotFound);
    };

    // SAFETY: the calling task's address space is the active one; the
    // struct is read in full regardless of its declared `length`.
    let wire = unsafe { &*(msg_ptr as *const WireMessage) };
    let length = (wire.length as usize).min(MAX_PAYLOAD_BYTES);

    let sender = current_task.lock().id;
    let mut message = Message::empty(sender);
    message.length = length;
    message.payload[..length].copy_from_slice(&wire.payload[..length]);

    match port.send(message) {
        Ok(()) => super::ok(ctx),
        Err(e) => super::fail(ctx, e),
    }
}

/// Shared body for `Receive`/`TryReceive`/`ReceiveTimeout`: `ebx` = handle,
/// `ecx` = destination payload buffer (`MAX_PAYLOAD_BYTES` capacity).
pub fn receive(ctx: &mut Context, current_task: &Arc<Mutex<Task>>, timeout_ticks: u64) -> *mut Context {
    receive_on(ctx, current_task.clone(), timeout_ticks, true)
}

/// `IPC_TryReceive`: never blocks.
pub fn try_receive(ctx: &mut Context, current_task: &Arc<Mutex<Task>>) -> *mut Context {
    receive_on(ctx, current_task.clone(), 0, false)
}

/// `IPC_ReceiveTimeout(h,&msg,ticks)`: `edx` = timeout ticks.
pub fn receive_timeout(ctx: &mut Context, current_task: &Arc<Mutex<Task>>) -> *mut Context {
    receive_on(ctx, current_task.clone(), u64::from(ctx.edx), true)
}

fn receive_on(ctx: &mut Context, current_task: Arc<Mutex<Task>>, timeout_ticks: u64, may_block: bool) -> *mut Context {
    let handle = HandleId(ctx.ebx);
    let dest_ptr = ctx.ecx;
    if dest_ptr == 0 {
        return super::fail(ctx, KernelError::InvalidAddress);
    }

    let port_id = match port_for_handle(&current_task, handle, Rights::RECEIVE) {
        Ok(id) => id,
        Err(e) => return super::fail(ctx, e),
    };
    let Some(port) = port::lookup(port_id) else {
        return super::fail(ctx, KernelError::NotFound);
    };

    if let Ok(message) = port.try_receive() {
        port::copy_into_task(&current_task, dest_ptr, &message.payload[..message.length]);
        port::materialize_handle_transfer(&current_task, message.handle);
        return super::ok(ctx);
    }

    if !may_block {
        return super::fail(ctx, KernelError::NotFound);
    }

    let Some(thread) = scheduler::current_thread_id() else {
        return super::fail(ctx, KernelError::NotFound);
    };

    port.block_for_receive(thread, current_task, dest_ptr, MAX_PAYLOAD_BYTES);

    if timeout_ticks > 0 {
        let timeout_port = port.clone();
        crate::task::timer::schedule_timeout(
            thread,
            timeout_ticks,
            alloc::boxed::Box::new(move || {
                if timeout_port.cancel_wait(thread) {
                    scheduler::set_result(thread, KernelError::TimedOut.to_syscall_status());
                    scheduler::wake(thread);
                }
            }),
        );
    }

    scheduler::reschedule(ctx)
}

/// `IPC_SendHandle(h,target,rights)`: `ebx` = sending port handle, `ecx` =
/// handle naming the port to transfer, `edx` = rights subset granted to
/// the receiver. Carries a 1-byte marker payload, since transfer rides
/// along with a message but this call has no payload of its own.
pub fn send_handle(ctx: &mut Context, current_task: &Arc<Mutex<Task>>) -> *mut Context {
    let send_handle = HandleId(ctx.ebx);
    let target_handle = HandleId(ctx.ecx);
    let rights = Rights::from_bits_truncate(ctx.edx);

    let port_id = match port_for_handle(current_task, send_handle, Rights::SEND) {
        Ok(id) => id,
        Err(e) => return super::fail(ctx, e),
    };
    let Some(port) = port::lookup(port_id) else {
        return super::fail(ctx, KernelError::NotFound);
    };

    let (target_object, target_rights) = match current_task.lock().handles.query(target_handle) {
        Ok(v) => v,
        Err(e) => return super::fail(ctx, e),
    };
    let Object::Port(target_port) = target_object else {
        return super::fail(ctx, KernelError::BadHandle);
    };
    if !target_rights.contains(rights) {
        return super::fail(ctx, KernelError::PermissionDenied);
    }

    let sender = current_task.lock().id;
    let mut message = Message::empty(sender);
    message.length = 1;
    message.handle = Some(HandleTransfer { target_port, rights });

    match port.send(message) {
        Ok(()) => super::ok(ctx),
        Err(e) => super::fail(ctx, e),
    }
}

/// `IPC_TryGetHandleMessage`: drains the handle materialized by the most
/// recently received message that carried one, if any.
pub fn try_get_handle_message(ctx: &mut Context, current_task: &Arc<Mutex<Task>>) -> *mut Context {
    match current_task.lock().pending_handle.take() {
        Some(handle) => {
            ctx.eax = handle.0;
            core::ptr::from_mut(ctx)
        }
        None => super::fail(ctx, KernelError::NotFound),
    }
}
