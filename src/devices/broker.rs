//! Device broker registration (spec §4.7).
//!
//! The broker's name/id -> handle resolution logic runs in the
//! coordinator's own user-space task, over ordinary IPC to a port it owns;
//! user tasks look that port up here instead of hard-coding a well-known
//! id. The kernel's only role is holding this one pointer.

use spin::Mutex;

use crate::ipc::port::PortId;

static BROKER_PORT: Mutex<Option<PortId>> = Mutex::new(None);

/// Designates `port` as the device broker. Coordinator-only; enforced by
/// the syscall layer (`Task::is_coordinator`), not here.
pub fn set_broker_port(port: PortId) {
    *BROKER_PORT.lock() = Some(port);
}

/// The current device broker port, if the coordinator has registered one.
#[must_use]
pub fn broker_port() -> Option<PortId> {
    *BROKER_PORT.lock()
}
