//! Filesystem service forwarding (spec §6 `FileSystem_*`).
//!
//! Unlike the block/input registries, the kernel has no idea what a
//! volume, a directory entry, or a file handle actually look like — every
//! `FileSystem_*` call is opaque bytes forwarded to whichever task called
//! `FileSystem_RegisterService`, mirroring how [`crate::devices::broker`]
//! hands off device naming to a user-space broker instead of modeling it
//! itself. The wire shape reuses the block registry's header-plus-payload
//! convention: `[opcode:u8][pad:3][replyPortId:u32][raw request bytes]`.

use alloc::boxed::Box;
use alloc::sync::Arc;
use spin::Mutex;

use crate::config::MAX_PAYLOAD_BYTES;
use crate::error::{KernelError, KernelResult};
use crate::ipc::port::{self, Message, PortId};
use crate::task::context::Context;
use crate::task::scheduler;
use crate::task::timer;
use crate::task::{Task, TaskId};

static SERVICE_PORT: Mutex<Option<(TaskId, PortId)>> = Mutex::new(None);

const HEADER_LEN: usize = 8;
const STATUS_LEN: usize = 4;
/// Largest request/reply body a single `FileSystem_*` round trip can carry,
/// bounded by the fixed IPC message size.
pub const MAX_BODY_BYTES: usize = MAX_PAYLOAD_BYTES - HEADER_LEN;

/// Designates `port` (owned by `owner`) as the filesystem service
/// (`FileSystem_RegisterService`). Coordinator-only; enforced by the
/// syscall layer.
pub fn register_service(owner: TaskId, port: PortId) {
    *SERVICE_PORT.lock() = Some((owner, port));
}

fn finish(ctx: &mut Context, status: u32) -> *mut Context {
    ctx.eax = status;
    core::ptr::from_mut(ctx)
}

/// Forwards one `FileSystem_*` call: marshals `opcode` plus `request` into
/// a message to the registered service port, blocks the caller, and on
/// reply copies the service's response bytes into `reply_ptr` (capped at
/// `reply_cap`), completing with the service's own status word.
pub fn call(
    ctx: &mut Context,
    requester_task: Arc<Mutex<Task>>,
    opcode: u8,
    request: &[u8],
    reply_ptr: u32,
    reply_cap: usize,
    timeout_ticks: u64,
) -> *mut Context {
    if request.len() > MAX_BODY_BYTES {
        return finish(ctx, KernelError::MessageTooLarge.to_syscall_status());
    }

    let Some((_, service_port_id)) = *SERVICE_PORT.lock() else {
        return finish(ctx, KernelError::NotFound.to_syscall_status());
    };
    let Some(service_port) = port::lookup(service_port_id) else {
        return finish(ctx, KernelError::NotFound.to_syscall_status());
    };

    let requester_id = requester_task.lock().id;
    let reply_port = port::create_port(requester_id, 1);

    let mut message = Message::empty(requester_id);
    message.payload[0] = opcode;
    message.payload[4..8].copy_from_slice(&reply_port.id.0.to_le_bytes());
    message.payload[HEADER_LEN..HEADER_LEN + request.len()].copy_from_slice(request);
    message.length = HEADER_LEN + request.len();

    if let Err(e) = service_port.send(message) {
        let _ = port::destroy_port(reply_port.id, requester_id);
        return finish(ctx, e.to_syscall_status());
    }

    let Some(thread) = scheduler::current_thread_id() else {
        return finish(ctx, KernelError::NotFound.to_syscall_status());
    };

    let callback_task = requester_task.clone();
    reply_port.block_with_callback(
        thread,
        Box::new(move |reply: Message| {
            timer::cancel_timeout(thread);
            let status = u32::from_le_bytes(reply.payload[0..4].try_into().unwrap_or([1, 0, 0, 0]));
            if reply_ptr != 0 {
                let available = reply.length.saturating_sub(STATUS_LEN).min(reply_cap);
                port::copy_into_task(&callback_task, reply_ptr, &reply.payload[STATUS_LEN..STATUS_LEN + available]);
            }
            scheduler::set_result(thread, status);
        }),
    );

    if timeout_ticks > 0 {
        let timeout_port = reply_port.clone();
        timer::schedule_timeout(
            thread,
            timeout_ticks,
            Box::new(move || {
                if timeout_port.cancel_wait(thread) {
                    scheduler::set_result(thread, KernelError::TimedOut.to_syscall_status());
                    scheduler::wake(thread);
                }
            }),
        );
    }

    scheduler::reschedule(ctx)
}

/// Whether a filesystem service is currently registered.
#[must_use]
pub fn has_service() -> bool {
    SERVICE_PORT.lock().is_some()
}
