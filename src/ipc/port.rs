//! Named ports with bounded queues, blocking receive, and handle transfer
//! (spec §4.5).

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, VecDeque};
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};
use crossbeam_queue::ArrayQueue;
use spin::Mutex;

use crate::config::MAX_PAYLOAD_BYTES;
use crate::error::{KernelError, KernelResult};
use crate::ipc::handle::Rights;
use crate::kwarn;
use crate::mm::paging;
use crate::task::scheduler;
use crate::task::thread::ThreadId;
use crate::task::{Task, TaskId};

/// Identifies a port, scoped to no particular task (spec §3 "Port").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PortId(pub u32);

/// A handle transfer riding along with a message.
#[derive(Debug, Clone, Copy)]
pub struct HandleTransfer {
    pub target_port: PortId,
    pub rights: Rights,
}

/// A fixed-size, fully-owned copy of a message (spec §3 "Message").
#[derive(Debug, Clone, Copy)]
pub struct Message {
    pub sender: TaskId,
    pub length: usize,
    pub payload: [u8; MAX_PAYLOAD_BYTES],
    pub handle: Option<HandleTransfer>,
}

impl Message {
    #[must_use]
    pub const fn empty(sender: TaskId) -> Self {
        Self {
            sender,
            length: 0,
            payload: [0; MAX_PAYLOAD_BYTES],
            handle: None,
        }
    }
}

/// How a waiting receiver wants its message delivered. `Raw` is the plain
/// `IPC_Receive` case: copy the payload verbatim into user memory. `Callback`
/// lets an in-kernel caller (the block/input device registries) parse the
/// message itself and decide what, if anything, to copy and what status to
/// hand back — run by the *sender's* thread, since the receiver's own call
/// stack is gone once it blocked (see `block_with_callback`).
enum Delivery {
    Raw {
        /// Destination in the receiver's own address space to copy the
        /// delivered message's payload into, captured before the thread
        /// blocked (the receiver's address space is not active while a
        /// different thread is running `send`).
        dest_task: Arc<Mutex<Task>>,
        dest_ptr: u32,
        dest_cap: usize,
    },
    Callback(Box<dyn FnOnce(Message) + Send>),
}

struct Waiter {
    thread: ThreadId,
    delivery: Delivery,
}

/// A named, bounded-capacity message queue (spec §3 "Port").
pub struct Port {
    pub id: PortId,
    pub owner: TaskId,
    queue: ArrayQueue<Message>,
    waiters: Mutex<VecDeque<Waiter>>,
}

fn next_port_id() -> PortId {
    static NEXT: AtomicU32 = AtomicU32::new(1);
    PortId(NEXT.fetch_add(1, Ordering::Relaxed))
}

/// Global port registry (spec §9 "kernel state root").
static PORTS: Mutex<BTreeMap<PortId, Arc<Port>>> = Mutex::new(BTreeMap::new());

/// Creates a new port owned by `owner`.
#[must_use]
pub fn create_port(owner: TaskId, capacity: usize) -> Arc<Port> {
    let port = Arc::new(Port {
        id: next_port_id(),
        owner,
        queue: ArrayQueue::new(capacity),
        waiters: Mutex::new(VecDeque::new()),
    });
    PORTS.lock().insert(port.id, port.clone());
    port
}

/// Looks up a live port by id.
#[must_use]
pub fn lookup(id: PortId) -> Option<Arc<Port>> {
    PORTS.lock().get(&id).cloned()
}

/// Destroys a port: drops all queued messages and wakes every waiter with
/// a failure result (spec §4.5 `DestroyPort`).
pub fn destroy_port(id: PortId, requester: TaskId) -> KernelResult<()> {
    let port = lookup(id).ok_or(KernelError::NotFound)?;
    if port.owner != requester {
        return Err(KernelError::PermissionDenied);
    }
    let mut waiters = port.waiters.lock();
    while let Some(waiter) = waiters.pop_front() {
        scheduler::set_result(waiter.thread, KernelError::NotFound.to_syscall_status());
        scheduler::wake(waiter.thread);
    }
    while port.queue.pop().is_some() {}
    PORTS.lock().remove(&id);
    Ok(())
}

/// Copies `bytes` into `dest_ptr` inside `task`'s address space, which may
/// not be the currently active one. Temporarily activates `task`'s
/// directory for the duration of the copy, restoring whatever was active
/// before — the cross-address-space write this kernel's single-core,
/// synchronous IPC delivery relies on (see DESIGN.md's note on `paging`'s
/// direct physical map for the related `Create`/`Destroy` problem).
pub(crate) fn copy_into_task(task: &Arc<Mutex<Task>>, dest_ptr: u32, bytes: &[u8]) {
    let dir = task.lock().address_space;
    paging::with_activated(dir, || {
        // SAFETY: `dir` is now active and `dest_ptr` was captured from a
        // syscall argument the receiving task supplied for exactly this
        // purpose; writes stay within `bytes.len()` (<= MAX_PAYLOAD_BYTES).
        unsafe {
            core::ptr::copy_nonoverlapping(bytes.as_ptr(), dest_ptr as *mut u8, bytes.len());
        }
    });
}

/// Materializes a transferred handle (if any) into the receiving task's
/// handle table, stashing it as the task's `pending_handle` for
/// `IPC_TryGetHandleMessage` to drain (spec §4.5 "Handle transfer").
pub(crate) fn materialize_handle_transfer(dest_task: &Arc<Mutex<Task>>, transfer: Option<HandleTransfer>) {
    let Some(transfer) = transfer else {
        return;
    };
    use crate::ipc::handle::Object;
    let mut task = dest_task.lock();
    let handle = task.handles.insert(Object::Port(transfer.target_port), transfer.rights);
    task.pending_handle = Some(handle);
}

impl Port {
    /// Non-blocking send (spec §4.5 "Send semantics"). Wakes one waiting
    /// receiver if any; otherwise just enqueues.
    pub fn send(&self, message: Message) -> KernelResult<()> {
        if message.length == 0 || message.length > MAX_PAYLOAD_BYTES {
            return Err(KernelError::MessageTooLarge);
        }

        let mut waiters = self.waiters.lock();
        if let Some(waiter) = waiters.pop_front() {
            match waiter.delivery {
                Delivery::Raw { dest_task, dest_ptr, dest_cap } => {
                    copy_into_task(&dest_task, dest_ptr, &message.payload[..message.length.min(dest_cap)]);
                    materialize_handle_transfer(&dest_task, message.handle);
                    scheduler::set_result(waiter.thread, 0);
                }
                Delivery::Callback(f) => f(message),
            }
            scheduler::wake(waiter.thread);
            return Ok(());
        }
        drop(waiters);

        self.queue.push(message).map_err(|_| KernelError::QueueFull)
    }

    /// Non-blocking receive: returns immediately, failing when empty.
    pub fn try_receive(&self) -> KernelResult<Message> {
        self.queue.pop().ok_or(KernelError::NotFound)
    }

    /// Registers the calling thread as a waiter and blocks it; returns
    /// once `send` (or a timeout) has filled in the destination buffer and
    /// woken the thread. The caller (a syscall handler) must treat this as
    /// "park here"; it does not return a `Message` because delivery
    /// happens asynchronously into `dest_ptr` by whichever thread sends.
    pub fn block_for_receive(
        self: &Arc<Self>,
        thread: ThreadId,
        dest_task: Arc<Mutex<Task>>,
        dest_ptr: u32,
        dest_cap: usize,
    ) {
        self.waiters.lock().push_back(Waiter {
            thread,
            delivery: Delivery::Raw { dest_task, dest_ptr, dest_cap },
        });
        scheduler::block_current();
    }

    /// Registers the calling thread as a waiter whose delivery is handled
    /// by `on_deliver`, run synchronously inside the *sender's* `send`
    /// call. Used by the block/input device registries to turn a driver's
    /// reply into the original requester's syscall result without needing
    /// to resume any kernel-side call stack (there isn't one to resume
    /// into; see `ipc::port`'s module docs).
    pub fn block_with_callback(self: &Arc<Self>, thread: ThreadId, on_deliver: Box<dyn FnOnce(Message) + Send>) {
        self.waiters.lock().push_back(Waiter {
            thread,
            delivery: Delivery::Callback(on_deliver),
        });
        scheduler::block_current();
    }

    /// Removes `thread` from this port's wait-queue (used by timeout
    /// expiry and task termination), returning whether it was present.
    pub fn cancel_wait(&self, thread: ThreadId) -> bool {
        let mut waiters = self.waiters.lock();
        let before = waiters.len();
        waiters.retain(|w| w.thread != thread);
        waiters.len() != before
    }

    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.waiters.lock().len()
    }
}

/// Drops every port owned by `task_id` (task exit cleanup).
pub fn destroy_all_owned_by(task_id: TaskId) {
    let ids: alloc::vec::Vec<PortId> = PORTS
        .lock()
        .values()
        .filter(|p| p.owner == task_id)
        .map(|p| p.id)
        .collect();
    for id in ids {
        if destroy_port(id, task_id).is_err() {
            kwarn!("destroy_all_owned_by: port {:?} already gone", id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn send_then_try_receive_round_trips() {
        let port = create_port(TaskId(1), 4);
        let mut msg = Message::empty(TaskId(1));
        msg.length = 3;
        msg.payload[..3].copy_from_slice(&[1, 2, 3]);
        port.send(msg).unwrap();
        let received = port.try_receive().unwrap();
        assert_eq!(&received.payload[..3], &[1, 2, 3]);
    }

    #[test_case]
    fn queue_full_rejects_send() {
        let port = create_port(TaskId(1), 1);
        let mut msg = Message::empty(TaskId(1));
        msg.length = 1;
        port.send(msg).unwrap();
        assert_eq!(port.send(msg), Err(KernelError::QueueFull));
    }

    #[test_case]
    fn zero_length_message_is_rejected() {
        let port = create_port(TaskId(1), 1);
        let msg = Message::empty(TaskId(1));
        assert_eq!(port.send(msg), Err(KernelError::MessageTooLarge));
    }
}
