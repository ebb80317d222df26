//! The preemptive round-robin scheduler (spec §4.4).
//!
//! Single-core, single ready queue. A context switch is expressed as
//! returning a different [`Context`] pointer from [`timer_tick`] or
//! [`reschedule`]; the interrupt return path (`interrupts::stub::isr_common`)
//! loads whatever pointer comes back into `esp` before popping registers.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use crate::kwarn;
use crate::task::context::Context;
use crate::task::thread::{Thread, ThreadId, ThreadState};
use crate::task::{Task, TaskId};

struct SchedulerState {
    threads: BTreeMap<ThreadId, Thread>,
    tasks: BTreeMap<TaskId, Arc<Mutex<Task>>>,
    ready_queue: VecDeque<ThreadId>,
    current: Option<ThreadId>,
    idle_thread: Option<ThreadId>,
    preempt_disable_count: u32,
    preemption_enabled: bool,
    force_reschedule: bool,
    /// Threads that exited while still the `current` thread, or were
    /// terminated alongside sibling threads still running elsewhere; each
    /// one's stack can't be freed until some *other* thread is running.
    /// A task-wide kill can mark several of a task's threads Terminated in
    /// one `terminate_task` call, so this has to hold all of them, not
    /// just the last one (a single slot silently leaks every id but the
    /// last).
    pending_terminated: Vec<ThreadId>,
}

impl SchedulerState {
    const fn new() -> Self {
        Self {
            threads: BTreeMap::new(),
            tasks: BTreeMap::new(),
            ready_queue: VecDeque::new(),
            current: None,
            idle_thread: None,
            preempt_disable_count: 0,
            preemption_enabled: false,
            force_reschedule: false,
            pending_terminated: Vec::new(),
        }
    }
}

static STATE: Mutex<SchedulerState> = Mutex::new(SchedulerState::new());

extern "C" fn idle_entry() -> ! {
    loop {
        crate::arch::halt();
    }
}

/// Brings up the scheduler: registers the idle task/thread and the first
/// real kernel thread (the boot continuation), without yet enabling
/// preemption.
pub fn init(kernel_dir: crate::mm::paging::PhysDir) {
    let idle_task = Task::new_kernel(kernel_dir);
    let idle_thread = Thread::new_kernel(idle_task.clone(), idle_entry);
    let idle_id = idle_thread.id;

    let mut state = STATE.lock();
    state.tasks.insert(idle_task.lock().id, idle_task);
    state.threads.insert(idle_id, idle_thread);
    state.idle_thread = Some(idle_id);
    state.current = Some(idle_id);
}

/// Registers a brand-new task in the global task table.
pub fn register_task(task: Arc<Mutex<Task>>) {
    let id = task.lock().id;
    STATE.lock().tasks.insert(id, task);
}

/// Spawns a new kernel thread under `task`, enqueuing it Ready.
pub fn spawn_kernel_thread(task: Arc<Mutex<Task>>, entry: extern "C" fn() -> !) -> ThreadId {
    let thread = Thread::new_kernel(task.clone(), entry);
    let id = thread.id;
    task.lock().threads.push(id);
    let mut state = STATE.lock();
    state.threads.insert(id, thread);
    state.ready_queue.push_back(id);
    id
}

/// Spawns a new user-mode thread under `task`, enqueuing it Ready.
pub fn spawn_user_thread(task: Arc<Mutex<Task>>, entry: u32, stack_top: u32) -> ThreadId {
    let thread = Thread::new_user(task.clone(), entry, stack_top);
    let id = thread.id;
    task.lock().threads.push(id);
    let mut state = STATE.lock();
    state.threads.insert(id, thread);
    state.ready_queue.push_back(id);
    id
}

/// Returns the currently running task, if a thread is scheduled and owns one.
#[must_use]
pub fn current_task() -> Option<Arc<Mutex<Task>>> {
    let state = STATE.lock();
    let current = state.current?;
    let thread = state.threads.get(&current)?;
    Some(thread.owning_task.clone())
}

/// Returns the currently running thread's id.
#[must_use]
pub fn current_thread_id() -> Option<ThreadId> {
    STATE.lock().current
}

/// Nests a "preemption disabled" region; pairs with [`enable_preemption`].
pub fn disable_preemption() {
    STATE.lock().preempt_disable_count += 1;
}

/// Leaves a "preemption disabled" region.
pub fn enable_preemption() {
    let mut state = STATE.lock();
    state.preempt_disable_count = state.preempt_disable_count.saturating_sub(1);
}

/// Called once the first real thread exists, allowing the timer to start
/// preempting.
pub fn enable_scheduling() {
    STATE.lock().preemption_enabled = true;
}

fn reclaim_pending(state: &mut SchedulerState) {
    for id in core::mem::take(&mut state.pending_terminated) {
        if Some(id) == state.current {
            // Still running (this is the thread that just asked to
            // reschedule on its own way out); retry on the next switch.
            state.pending_terminated.push(id);
            continue;
        }
        let Some(thread) = state.threads.remove(&id) else {
            continue;
        };
        let task = thread.owning_task.clone();
        drop(thread);
        let mut task_guard = task.lock();
        task_guard.threads.retain(|&t| t != id);
        if task_guard.threads.is_empty() {
            let dir = task_guard.address_space;
            let task_id = task_guard.id;
            drop(task_guard);
            state.tasks.remove(&task_id);
            if crate::mm::paging::destroy(dir).is_err() {
                kwarn!("scheduler: refused to destroy kernel directory for task {:?}", task_id);
            }
        }
    }
}

/// The context-switch step (spec §4.4), shared by timer preemption and
/// explicit yield/exit paths. `outgoing_ctx` is the context pointer the
/// caller was executing on when it asked to reschedule.
fn switch(state: &mut SchedulerState, outgoing_ctx: *mut Context) -> *mut Context {
    reclaim_pending(state);

    let previous_task = state
        .current
        .and_then(|id| state.threads.get(&id))
        .map(|t| t.owning_task.lock().id);

    if let Some(current_id) = state.current {
        let is_idle = Some(current_id) == state.idle_thread;
        if let Some(thread) = state.threads.get_mut(&current_id) {
            match thread.state {
                ThreadState::Running => {
                    thread.context = outgoing_ctx;
                    if !is_idle {
                        thread.state = ThreadState::Ready;
                        state.ready_queue.push_back(current_id);
                    }
                }
                ThreadState::Terminated => {
                    thread.context = outgoing_ctx;
                    state.pending_terminated.push(current_id);
                }
                ThreadState::Blocked | ThreadState::Ready => {
                    thread.context = outgoing_ctx;
                }
            }
        }
    }

    let next_id = state
        .ready_queue
        .pop_front()
        .unwrap_or_else(|| state.idle_thread.expect("idle thread not initialized"));

    let next_ctx = {
        let thread = state
            .threads
            .get_mut(&next_id)
            .expect("scheduled thread missing from table");
        thread.state = ThreadState::Running;
        state.current = Some(next_id);

        let next_task = thread.owning_task.lock();
        if previous_task != Some(next_task.id) {
            crate::mm::paging::activate(next_task.address_space);
        }
        crate::gdt::set_kernel_stack(thread.kernel_stack_top);
        thread.context
    };

    state.force_reschedule = false;
    next_ctx
}

/// Called from the timer IRQ handler. Switches only when preemption is
/// enabled and not disabled, or when an explicit path requested a forced
/// reschedule.
#[must_use]
pub fn timer_tick(ctx: *mut Context) -> *mut Context {
    let mut state = STATE.lock();
    let should_switch =
        state.force_reschedule || (state.preemption_enabled && state.preempt_disable_count == 0);
    if !should_switch {
        return ctx;
    }
    switch(&mut state, ctx)
}

/// Cooperative yield: the current thread gives up the CPU voluntarily.
/// Called from the syscall path with the interrupt context already in
/// hand, after `IF` has been cleared for the duration of the switch.
#[must_use]
pub fn reschedule(ctx: *mut Context) -> *mut Context {
    let mut state = STATE.lock();
    state.force_reschedule = true;
    switch(&mut state, ctx)
}

/// Blocks the current thread (IPC receive, wait-queue, sleep) and forces a
/// reschedule on the next dispatch return.
pub fn block_current() {
    let mut state = STATE.lock();
    if let Some(id) = state.current {
        if let Some(thread) = state.threads.get_mut(&id) {
            thread.state = ThreadState::Blocked;
        }
    }
    state.force_reschedule = true;
}

/// Moves a blocked thread back to Ready and the tail of the ready queue.
pub fn wake(id: ThreadId) {
    let mut state = STATE.lock();
    if let Some(thread) = state.threads.get_mut(&id) {
        if thread.state == ThreadState::Blocked {
            thread.state = ThreadState::Ready;
            state.ready_queue.push_back(id);
        }
    }
}

/// Writes `eax` into a (presumably Blocked) thread's saved context, so that
/// when it is later woken and rescheduled it resumes as if the syscall
/// that blocked it had just returned this value. Used by IPC delivery and
/// timeout expiry to complete a blocking receive asynchronously.
pub fn set_result(id: ThreadId, eax: u32) {
    let state = STATE.lock();
    if let Some(thread) = state.threads.get(&id) {
        if !thread.context.is_null() {
            // SAFETY: a Blocked thread's `context` points at the saved
            // frame on its own kernel stack, which nothing else writes to
            // while it is not Running.
            unsafe {
                (*thread.context).eax = eax;
            }
        }
    }
}

/// Looks up a task by id in the global task table.
#[must_use]
pub fn task_by_id(id: TaskId) -> Option<Arc<Mutex<Task>>> {
    STATE.lock().tasks.get(&id).cloned()
}

/// Returns the task owning thread `id`, if it still exists.
#[must_use]
pub fn task_of(id: ThreadId) -> Option<Arc<Mutex<Task>>> {
    STATE.lock().threads.get(&id).map(|t| t.owning_task.clone())
}

/// Terminates the current thread (spec §4.4 `Exit`); the next context
/// switch reclaims its stack and, if its task has no threads left,
/// destroys the task.
pub fn exit_current_thread(exit_code: u32) {
    let mut state = STATE.lock();
    if let Some(id) = state.current {
        if let Some(thread) = state.threads.get_mut(&id) {
            thread.state = ThreadState::Terminated;
            thread.exit_code = Some(exit_code);
            let task = thread.owning_task.clone();
            task.lock().exit_code = Some(exit_code);
        }
    }
    state.force_reschedule = true;
}

/// Terminates every thread of `task_id` (spec §5 "task exit terminates all
/// its threads"), dequeueing each from the ready queue if present.
pub fn terminate_task(task_id: TaskId, exit_code: u32) {
    let mut state = STATE.lock();
    if let Some(task) = state.tasks.get(&task_id) {
        task.lock().exit_code = Some(exit_code);
    }
    let ids: Vec<ThreadId> = state
        .threads
        .iter()
        .filter(|(_, t)| t.owning_task.lock().id == task_id)
        .map(|(id, _)| *id)
        .collect();
    let mut killed_current = false;
    for id in ids {
        state.ready_queue.retain(|&queued| queued != id);
        if let Some(thread) = state.threads.get_mut(&id) {
            thread.state = ThreadState::Terminated;
            thread.exit_code = Some(exit_code);
        }
        if state.current == Some(id) {
            killed_current = true;
        } else {
            state.pending_terminated.push(id);
        }
    }
    if killed_current {
        state.force_reschedule = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn idle_thread_is_never_enqueued() {
        let state = STATE.lock();
        if let Some(idle) = state.idle_thread {
            assert!(!state.ready_queue.contains(&idle));
        }
    }
}
