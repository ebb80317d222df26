//! Tick counter and the sleep/wake list (spec §4.4 `SleepTicks`).

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

use crate::task::scheduler;
use crate::task::thread::ThreadId;

static TICKS: AtomicU64 = AtomicU64::new(0);

struct SleepEntry {
    thread: ThreadId,
    wake_at: u64,
}

static SLEEPERS: Mutex<Vec<SleepEntry>> = Mutex::new(Vec::new());

struct TimeoutEntry {
    thread: ThreadId,
    wake_at: u64,
    on_timeout: Box<dyn FnOnce() + Send>,
}

static TIMEOUTS: Mutex<Vec<TimeoutEntry>> = Mutex::new(Vec::new());

/// Current tick count since boot.
#[must_use]
pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Parks the current thread until `ticks()` reaches `ticks() + n` (spec
/// §4.4 `SleepTicks`). The thread is already Blocked by the time this
/// returns; the caller's syscall path still needs to force a reschedule.
pub fn sleep_current(n: u64) {
    let Some(id) = scheduler::current_thread_id() else {
        return;
    };
    let wake_at = ticks() + n;
    SLEEPERS.lock().push(SleepEntry { thread: id, wake_at });
    scheduler::block_current();
}

/// Called from the timer IRQ handler on every tick: advances the clock and
/// wakes every sleeper whose deadline has passed.
pub fn on_tick() {
    let now = TICKS.fetch_add(1, Ordering::Relaxed) + 1;
    let mut sleepers = SLEEPERS.lock();
    let mut i = 0;
    while i < sleepers.len() {
        if sleepers[i].wake_at <= now {
            let entry = sleepers.swap_remove(i);
            scheduler::wake(entry.thread);
        } else {
            i += 1;
        }
    }
    drop(sleepers);

    let expired: Vec<TimeoutEntry> = {
        let mut timeouts = TIMEOUTS.lock();
        let mut expired = Vec::new();
        let mut i = 0;
        while i < timeouts.len() {
            if timeouts[i].wake_at <= now {
                expired.push(timeouts.swap_remove(i));
            } else {
                i += 1;
            }
        }
        expired
    };
    for entry in expired {
        (entry.on_timeout)();
    }
}

/// Removes every pending sleep entry for `thread`, used when a thread is
/// terminated or its blocking call is cancelled by an explicit wake.
pub fn cancel_sleep(thread: ThreadId) {
    SLEEPERS.lock().retain(|entry| entry.thread != thread);
}

/// Registers `on_timeout` to run if `thread` has not already been woken by
/// the time `ticks_from_now` more ticks elapse. Unlike [`sleep_current`],
/// this does not itself block the thread — callers combine it with some
/// other blocking registration (a port wait-queue entry, a device
/// wait-queue entry) and call `scheduler::block_current()` once themselves.
/// A `ticks_from_now` of 0 means "no timeout" and is a no-op.
pub fn schedule_timeout(thread: ThreadId, ticks_from_now: u64, on_timeout: Box<dyn FnOnce() + Send>) {
    if ticks_from_now == 0 {
        return;
    }
    let wake_at = ticks() + ticks_from_now;
    TIMEOUTS.lock().push(TimeoutEntry { thread, wake_at, on_timeout });
}

/// Cancels a pending timeout for `thread`, if one is registered. Safe to
/// call even when none is (e.g. an infinite-timeout call completing).
pub fn cancel_timeout(thread: ThreadId) {
    TIMEOUTS.lock().retain(|entry| entry.thread != thread);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn ticks_only_advance_forward() {
        let before = ticks();
        on_tick();
        assert!(ticks() > before);
    }
}
