//! `IRQ_*` (spec §6, all `[coord-only]`).

use alloc::sync::Arc;
use spin::Mutex;

use crate::error::KernelError;
use crate::ipc::port::PortId;
use crate::irq::router;
use crate::task::context::Context;
use crate::task::Task;

/// `IRQ_Register(line,port)`: `ebx` = IRQ line, `ecx` = the driver's own
/// port id.
pub fn register(ctx: &mut Context, current_task: &Arc<Mutex<Task>>) -> *mut Context {
    if super::require_coordinator(current_task).is_err() {
        return super::fail(ctx, KernelError::NotCoordinator);
    }
    match router::register(ctx.ebx as u8, PortId(ctx.ecx)) {
        Ok(()) => super::ok(ctx),
        Err(e) => super::fail(ctx, e),
    }
}

/// `IRQ_Unregister(line)`: `ebx` = IRQ line.
pub fn unregister(ctx: &mut Context, current_task: &Arc<Mutex<Task>>) -> *mut Context {
    if super::require_coordinator(current_task).is_err() {
        return super::fail(ctx, KernelError::NotCoordinator);
    }
    match router::unregister(ctx.ebx as u8) {
        Ok(()) => super::ok(ctx),
        Err(e) => super::fail(ctx, e),
    }
}

/// `IRQ_Enable(line)`: `ebx` = IRQ line.
pub fn enable(ctx: &mut Context, current_task: &Arc<Mutex<Task>>) -> *mut Context {
    if super::require_coordinator(current_task).is_err() {
        return super::fail(ctx, KernelError::NotCoordinator);
    }
    router::enable(ctx.ebx as u8);
    super::ok(ctx)
}

/// `IRQ_Disable(line)`: `ebx` = IRQ line.
pub fn disable(ctx: &mut Context, current_task: &Arc<Mutex<Task>>) -> *mut Context {
    if super::require_coordinator(current_task).is_err() {
        return super::fail(ctx, KernelError::NotCoordinator);
    }
    router::disable(ctx.ebx as u8);
    super::ok(ctx)
}
