//! Device broker port discovery (spec §4.7: "a separate coordinator-owned
//! port"). The broker's own name/id -> handle resolution protocol is
//! ordinary IPC traffic over that port, not a kernel concept; these two
//! calls exist only so user tasks can find the port instead of relying on
//! a hard-coded id.

use alloc::sync::Arc;
use spin::Mutex;

use crate::devices::broker;
use crate::error::KernelError;
use crate::ipc::port::PortId;
use crate::task::context::Context;
use crate::task::Task;

/// `Device_SetBrokerPort(port)` [coord-only]: `ebx` = the coordinator's own
/// port id.
pub fn set_broker_port(ctx: &mut Context, current_task: &Arc<Mutex<Task>>) -> *mut Context {
    if super::require_coordinator(current_task).is_err() {
        return super::fail(ctx, KernelError::NotCoordinator);
    }
    broker::set_broker_port(PortId(ctx.ebx));
    super::ok(ctx)
}

/// `Device_GetBrokerPort`: returns the registered broker port id in `eax`,
/// or `NotFound` if the coordinator has not registered one yet.
pub fn get_broker_port(ctx: &mut Context) -> *mut Context {
    match broker::broker_port() {
        Some(port) => {
            ctx.eax = port.0;
            core::ptr::from_mut(ctx)
        }
        None => super::fail(ctx, KernelError::NotFound),
    }
}
