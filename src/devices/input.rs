//! Input device registry (spec §4.7): mirrors the block registry's shape,
//! but instead of `Read`/`Write` offers a per-device ring buffer of
//! [`Event`] plus an associated wait-queue for blocking reads.

pub mod keyboard;

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, VecDeque};
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;
use spin::Mutex;

use crate::error::{KernelError, KernelResult};
use crate::ipc::port;
use crate::task::context::Context;
use crate::task::scheduler;
use crate::task::thread::ThreadId;
use crate::task::timer;
use crate::task::{Task, TaskId};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InputFlags: u32 {
        const READY = 1 << 0;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InputInfo {
    pub device_type: u32,
    pub flags: InputFlags,
    pub device_index: u32,
}

/// One input event (spec §4.7).
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub event_type: u32,
    pub device_id: u32,
    pub key_code: u32,
    pub modifiers: u32,
    pub ascii: u8,
    pub unicode: u32,
}

const RING_CAPACITY: usize = 64;

/// A thread parked in `ReadEvent`/`ReadEventTimeout`, with enough of its
/// own address space captured to let whoever delivers the event (the
/// `PushEvent` caller, or the keyboard IRQ path) write it directly into
/// user memory — the same cross-task delivery pattern `ipc::port` uses,
/// needed because resuming a blocked thread goes straight back to user
/// mode with no intervening kernel code of its own to run.
struct Waiter {
    thread: ThreadId,
    dest_task: Arc<Mutex<Task>>,
    dest_ptr: u32,
}

struct InputDevice {
    info: InputInfo,
    owner: TaskId,
    ring: VecDeque<Event>,
    waiters: VecDeque<Waiter>,
}

static REGISTRY: Mutex<BTreeMap<u32, InputDevice>> = Mutex::new(BTreeMap::new());

fn next_device_id() -> u32 {
    static NEXT: AtomicU32 = AtomicU32::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

pub fn register(owner: TaskId, mut info: InputInfo) -> u32 {
    info.flags.remove(InputFlags::READY);
    let id = next_device_id();
    REGISTRY.lock().insert(
        id,
        InputDevice {
            info,
            owner,
            ring: VecDeque::with_capacity(RING_CAPACITY),
            waiters: VecDeque::new(),
        },
    );
    id
}

pub fn update_info(id: u32, requester: TaskId, info: InputInfo) -> KernelResult<()> {
    let mut registry = REGISTRY.lock();
    let device = registry.get_mut(&id).ok_or(KernelError::NotFound)?;
    if device.owner != requester {
        return Err(KernelError::PermissionDenied);
    }
    device.info = info;
    Ok(())
}

/// Marks a device Ready for reads (`Input_Open` in spec §6's syscall list).
pub fn open(id: u32) -> KernelResult<()> {
    let mut registry = REGISTRY.lock();
    let device = registry.get_mut(&id).ok_or(KernelError::NotFound)?;
    device.info.flags.insert(InputFlags::READY);
    Ok(())
}

#[must_use]
pub fn count() -> usize {
    REGISTRY.lock().len()
}

pub fn get_info(id: u32) -> KernelResult<InputInfo> {
    REGISTRY.lock().get(&id).map(|d| d.info).ok_or(KernelError::NotFound)
}

fn encode_event(event: Event) -> [u8; 20] {
    let words = [
        event.event_type,
        event.device_id,
        event.key_code,
        event.modifiers,
        (u32::from(event.ascii) << 24) | (event.unicode & 0x00FF_FFFF),
    ];
    let mut out = [0_u8; 20];
    for (i, word) in words.iter().enumerate() {
        out[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
    }
    out
}

/// Appends `event` to `id`'s ring buffer, dropping the oldest entry if
/// full, and delivers it to one waiting reader if any (`Input_PushEvent`,
/// called by the driver owning the device — or, for the keyboard, by the
/// IRQ path directly).
pub fn push_event(id: u32, event: Event) -> KernelResult<()> {
    let waiter = {
        let mut registry = REGISTRY.lock();
        let device = registry.get_mut(&id).ok_or(KernelError::NotFound)?;
        if let Some(waiter) = device.waiters.pop_front() {
            Some(waiter)
        } else {
            if device.ring.len() == RING_CAPACITY {
                device.ring.pop_front();
            }
            device.ring.push_back(event);
            None
        }
    };

    if let Some(waiter) = waiter {
        timer::cancel_timeout(waiter.thread);
        port::copy_into_task(&waiter.dest_task, waiter.dest_ptr, &encode_event(event));
        scheduler::set_result(waiter.thread, 0);
        scheduler::wake(waiter.thread);
    }
    Ok(())
}

fn finish(ctx: &mut Context, status: u32) -> *mut Context {
    ctx.eax = status;
    core::ptr::from_mut(ctx)
}

/// Services `Input_ReadEvent`/`Input_ReadEventTimeout`: returns the oldest
/// queued event immediately if one is available, else parks the thread
/// until `push_event` (or the timeout) completes it.
pub fn read_event(
    ctx: &mut Context,
    requester_task: Arc<Mutex<Task>>,
    device_id: u32,
    dest_ptr: u32,
    timeout_ticks: u64,
) -> *mut Context {
    if dest_ptr == 0 {
        return finish(ctx, KernelError::InvalidAddress.to_syscall_status());
    }

    let immediate = {
        let mut registry = REGISTRY.lock();
        let Some(device) = registry.get_mut(&device_id) else {
            return finish(ctx, KernelError::NotFound.to_syscall_status());
        };
        if !device.info.flags.contains(InputFlags::READY) {
            return finish(ctx, KernelError::InvalidOperation.to_syscall_status());
        }
        device.ring.pop_front()
    };

    if let Some(event) = immediate {
        port::copy_into_task(&requester_task, dest_ptr, &encode_event(event));
        return finish(ctx, 0);
    }

    let Some(thread) = scheduler::current_thread_id() else {
        return finish(ctx, KernelError::NotFound.to_syscall_status());
    };

    {
        let mut registry = REGISTRY.lock();
        if let Some(device) = registry.get_mut(&device_id) {
            device.waiters.push_back(Waiter {
                thread,
                dest_task: requester_task,
                dest_ptr,
            });
        }
    }
    scheduler::block_current();

    if timeout_ticks > 0 {
        timer::schedule_timeout(
            thread,
            timeout_ticks,
            Box::new(move || {
                let mut registry = REGISTRY.lock();
                if let Some(device) = registry.get_mut(&device_id) {
                    device.waiters.retain(|w| w.thread != thread);
                }
                drop(registry);
                scheduler::set_result(thread, KernelError::TimedOut.to_syscall_status());
                scheduler::wake(thread);
            }),
        );
    }

    scheduler::reschedule(ctx)
}
