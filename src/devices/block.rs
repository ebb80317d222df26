//! Block device registry (spec §4.7).
//!
//! A driver calls `Register` to announce a device and `Bind` once it has a
//! port ready to receive request messages. `Read`/`Write` are kernel-side
//! syscalls: the kernel validates the request, marshals it onto the
//! driver's port, and blocks the calling thread until the driver's reply
//! arrives (or a timeout elapses) via [`crate::ipc::port::Port::block_with_callback`].

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;
use spin::Mutex;

use crate::config::{BLOCK_SECTOR_SIZE, MAX_PAYLOAD_BYTES};
use crate::error::{KernelError, KernelResult};
use crate::ipc::port::{self, Message, PortId};
use crate::task::context::Context;
use crate::task::scheduler;
use crate::task::timer;
use crate::task::{Task, TaskId};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BlockFlags: u32 {
        const READ_ONLY = 1 << 0;
        const REMOVABLE = 1 << 1;
        const READY     = 1 << 2;
    }
}

/// `Info` record a driver supplies to `Register`/`UpdateInfo` (spec §4.7).
#[derive(Debug, Clone, Copy)]
pub struct BlockInfo {
    pub device_type: u32,
    pub sector_size: u32,
    pub sector_count: u64,
    pub flags: BlockFlags,
    pub device_index: u32,
}

type RawReadFn = fn(lba: u32, count: u32, out: &mut [u8]) -> KernelResult<()>;
type RawWriteFn = fn(lba: u32, count: u32, data: &[u8]) -> KernelResult<()>;

struct BlockDevice {
    info: BlockInfo,
    owner: TaskId,
    port: Option<PortId>,
    raw_read: Option<RawReadFn>,
    raw_write: Option<RawWriteFn>,
}

static REGISTRY: Mutex<BTreeMap<u32, BlockDevice>> = Mutex::new(BTreeMap::new());

fn next_device_id() -> u32 {
    static NEXT: AtomicU32 = AtomicU32::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// Registers a new block device, Ready cleared until `bind` (or a raw
/// callback is attached via `register_raw`).
pub fn register(owner: TaskId, mut info: BlockInfo) -> u32 {
    info.flags.remove(BlockFlags::READY);
    let id = next_device_id();
    REGISTRY.lock().insert(
        id,
        BlockDevice {
            info,
            owner,
            port: None,
            raw_read: None,
            raw_write: None,
        },
    );
    id
}

/// Registers a built-in device backed by an in-kernel callback instead of a
/// driver port (spec §4.7: "e.g., a built-in ROM-served floppy stub").
/// Ready immediately, since there is no `Bind` step for these.
pub fn register_raw(owner: TaskId, mut info: BlockInfo, raw_read: RawReadFn, raw_write: RawWriteFn) -> u32 {
    info.flags.insert(BlockFlags::READY);
    let id = next_device_id();
    REGISTRY.lock().insert(
        id,
        BlockDevice {
            info,
            owner,
            port: None,
            raw_read: Some(raw_read),
            raw_write: Some(raw_write),
        },
    );
    id
}

/// Associates a driver's port with `id` and sets Ready.
pub fn bind(id: u32, requester: TaskId, port_id: PortId) -> KernelResult<()> {
    let mut registry = REGISTRY.lock();
    let device = registry.get_mut(&id).ok_or(KernelError::NotFound)?;
    if device.owner != requester {
        return Err(KernelError::PermissionDenied);
    }
    device.port = Some(port_id);
    device.info.flags.insert(BlockFlags::READY);
    Ok(())
}

/// Overwrites a device's `Info` record in place (`Block_UpdateInfo`).
pub fn update_info(id: u32, requester: TaskId, info: BlockInfo) -> KernelResult<()> {
    let mut registry = REGISTRY.lock();
    let device = registry.get_mut(&id).ok_or(KernelError::NotFound)?;
    if device.owner != requester {
        return Err(KernelError::PermissionDenied);
    }
    device.info = info;
    Ok(())
}

#[must_use]
pub fn count() -> usize {
    REGISTRY.lock().len()
}

pub fn get_info(id: u32) -> KernelResult<BlockInfo> {
    REGISTRY.lock().get(&id).map(|d| d.info).ok_or(KernelError::NotFound)
}

/// A `Block_Read`/`Block_Write` request argument (spec §4.7).
#[derive(Debug, Clone, Copy)]
pub struct BlockRequest {
    pub device_id: u32,
    pub lba: u32,
    pub count: u32,
    pub buffer_ptr: u32,
    /// Ticks to wait for the driver's reply; 0 means wait indefinitely.
    pub timeout_ticks: u64,
}

const HEADER_LEN: usize = 20;
const STATUS_LEN: usize = 4;
/// How many sectors a single request/reply round trip can carry, bounded
/// by the fixed IPC message size rather than the caller's `count` (spec
/// does not mandate batching; this kernel trades it for not needing a
/// second, unbounded bulk-transfer channel alongside ports).
const MAX_SECTORS_PER_MESSAGE: usize = (MAX_PAYLOAD_BYTES - HEADER_LEN - STATUS_LEN) / BLOCK_SECTOR_SIZE;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Op {
    Read,
    Write,
}

fn validate(device: &BlockDevice, request: &BlockRequest, op: Op) -> KernelResult<()> {
    if request.count == 0 || request.buffer_ptr == 0 {
        return Err(KernelError::InvalidAddress);
    }
    if op == Op::Write && device.info.flags.contains(BlockFlags::READ_ONLY) {
        return Err(KernelError::InvalidOperation);
    }
    if !device.info.flags.contains(BlockFlags::READY) {
        return Err(KernelError::InvalidOperation);
    }
    let end = u64::from(request.lba) + u64::from(request.count);
    if end > device.info.sector_count {
        return Err(KernelError::InvalidAddress);
    }
    if request.count as usize > MAX_SECTORS_PER_MESSAGE {
        return Err(KernelError::InvalidOperation);
    }
    Ok(())
}

fn finish(ctx: &mut Context, status: u32) -> *mut Context {
    ctx.eax = status;
    core::ptr::from_mut(ctx)
}

/// Services `Block_Read`. `requester_task` is the calling thread's owning
/// task, needed so a driver's reply (delivered by the driver's own thread)
/// can be copied into the right address space.
pub fn read(ctx: &mut Context, requester_task: Arc<Mutex<Task>>, request: BlockRequest) -> *mut Context {
    dispatch(ctx, requester_task, request, Op::Read)
}

/// Services `Block_Write`.
pub fn write(ctx: &mut Context, requester_task: Arc<Mutex<Task>>, request: BlockRequest) -> *mut Context {
    dispatch(ctx, requester_task, request, Op::Write)
}

fn dispatch(ctx: &mut Context, requester_task: Arc<Mutex<Task>>, request: BlockRequest, op: Op) -> *mut Context {
    let requester_id = requester_task.lock().id;
    let sector_size = BLOCK_SECTOR_SIZE;
    let transfer_len = request.count as usize * sector_size;

    let (driver_port, raw_read, raw_write) = {
        let registry = REGISTRY.lock();
        let Some(device) = registry.get(&request.device_id) else {
            return finish(ctx, KernelError::NotFound.to_syscall_status());
        };
        if let Err(e) = validate(device, &request, op) {
            return finish(ctx, e.to_syscall_status());
        }
        (device.port, device.raw_read, device.raw_write)
    };

    if driver_port.is_none() {
        return match op {
            Op::Read => {
                let Some(read_fn) = raw_read else {
                    return finish(ctx, KernelError::NotFound.to_syscall_status());
                };
                let mut buf = [0_u8; MAX_SECTORS_PER_MESSAGE * BLOCK_SECTOR_SIZE];
                match read_fn(request.lba, request.count, &mut buf[..transfer_len]) {
                    Ok(()) => {
                        port::copy_into_task(&requester_task, request.buffer_ptr, &buf[..transfer_len]);
                        finish(ctx, 0)
                    }
                    Err(e) => finish(ctx, e.to_syscall_status()),
                }
            }
            Op::Write => {
                let Some(write_fn) = raw_write else {
                    return finish(ctx, KernelError::NotFound.to_syscall_status());
                };
                let mut buf = [0_u8; MAX_SECTORS_PER_MESSAGE * BLOCK_SECTOR_SIZE];
                // SAFETY: `buffer_ptr` was validated non-null above; the
                // calling task's address space is the active one (it just
                // trapped into this syscall from user mode on this CPU).
                unsafe {
                    core::ptr::copy_nonoverlapping(request.buffer_ptr as *const u8, buf.as_mut_ptr(), transfer_len);
                }
                match write_fn(request.lba, request.count, &buf[..transfer_len]) {
                    Ok(()) => finish(ctx, 0),
                    Err(e) => finish(ctx, e.to_syscall_status()),
                }
            }
        };
    }

    let Some(driver_port) = driver_port.and_then(port::lookup) else {
        return finish(ctx, KernelError::NotFound.to_syscall_status());
    };

    let reply_port = port::create_port(requester_id, 1);

    let mut message = Message::empty(requester_id);
    message.payload[0] = match op {
        Op::Read => 0,
        Op::Write => 1,
    };
    message.payload[4..8].copy_from_slice(&request.device_id.to_le_bytes());
    message.payload[8..12].copy_from_slice(&request.lba.to_le_bytes());
    message.payload[12..16].copy_from_slice(&request.count.to_le_bytes());
    message.payload[16..20].copy_from_slice(&reply_port.id.0.to_le_bytes());
    if op == Op::Write {
        // SAFETY: `buffer_ptr` was validated non-null above; the calling
        // task's address space is the active one (it just trapped into
        // this syscall from user mode on this CPU).
        let src = unsafe { core::slice::from_raw_parts(request.buffer_ptr as *const u8, transfer_len) };
        message.payload[HEADER_LEN..HEADER_LEN + transfer_len].copy_from_slice(src);
    }
    message.length = HEADER_LEN + if op == Op::Write { transfer_len } else { 0 };

    if let Err(e) = driver_port.send(message) {
        let _ = port::destroy_port(reply_port.id, requester_id);
        return finish(ctx, e.to_syscall_status());
    }

    let Some(thread) = scheduler::current_thread_id() else {
        return finish(ctx, KernelError::NotFound.to_syscall_status());
    };

    let callback_task = requester_task.clone();
    let dest_ptr = request.buffer_ptr;
    reply_port.block_with_callback(
        thread,
        Box::new(move |reply: Message| {
            timer::cancel_timeout(thread);
            let status = u32::from_le_bytes(reply.payload[0..4].try_into().unwrap_or([1, 0, 0, 0]));
            if status == 0 && op == Op::Read {
                let available = reply.length.saturating_sub(STATUS_LEN).min(transfer_len);
                port::copy_into_task(&callback_task, dest_ptr, &reply.payload[STATUS_LEN..STATUS_LEN + available]);
            }
            scheduler::set_result(thread, status);
        }),
    );

    if request.timeout_ticks > 0 {
        let timeout_port = reply_port.clone();
        timer::schedule_timeout(
            thread,
            request.timeout_ticks,
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
