//! `IO_*` (spec §6): raw port I/O gated by `Task_GrantIOAccess`.

use alloc::sync::Arc;
use spin::Mutex;

use crate::arch::Port;
use crate::error::KernelError;
use crate::task::context::Context;
use crate::task::Task;

fn require_io_access(task: &Arc<Mutex<Task>>) -> Result<(), KernelError> {
    if task.lock().io_access {
        Ok(())
    } else {
        Err(KernelError::PermissionDenied)
    }
}

/// `IO_In8(port)`: `ebx` = port number, returns the byte read in `eax`.
pub fn in8(ctx: &mut Context, current_task: &Arc<Mutex<Task>>) -> *mut Context {
    if let Err(e) = require_io_access(current_task) {
        return super::fail(ctx, e);
    }
    let port: Port<u8> = Port::new(ctx.ebx as u16);
    // SAFETY: the calling task was granted I/O access via `Task_GrantIOAccess`.
    ctx.eax = unsafe { port.read() } as u32;
    core::ptr::from_mut(ctx)
}

/// `IO_In16(port)`.
pub fn in16(ctx: &mut Context, current_task: &Arc<Mutex<Task>>) -> *mut Context {
    if let Err(e) = require_io_access(current_task) {
        return super::fail(ctx, e);
    }
    let port: Port<u16> = Port::new(ctx.ebx as u16);
    // SAFETY: see `in8`.
    ctx.eax = unsafe { port.read() } as u32;
    core::ptr::from_mut(ctx)
}

/// `IO_In32(port)`.
pub fn in32(ctx: &mut Context, current_task: &Arc<Mutex<Task>>) -> *mut Context {
    if let Err(e) = require_io_access(current_task) {
        return super::fail(ctx, e);
    }
    let port: Port<u32> = Port::new(ctx.ebx as u16);
    // SAFETY: see `in8`.
    ctx.eax = unsafe { port.read() };
    core::ptr::from_mut(ctx)
}

/// `IO_Out8(port,value)`: `ebx` = port number, `ecx` = value.
pub fn out8(ctx: &mut Context, current_task: &Arc<Mutex<Task>>) -> *mut Context {
    if let Err(e) = require_io_access(current_task) {
        return super::fail(ctx, e);
    }
    let mut port: Port<u8> = Port::new(ctx.ebx as u16);
    // SAFETY: see `in8`.
    unsafe { port.write(ctx.ecx as u8) };
    super::ok(ctx)
}

/// `IO_Out16(port,value)`.
pub fn out16(ctx: &mut Context, current_task: &Arc<Mutex<Task>>) -> *mut Context {
    if let Err(e) = require_io_access(current_task) {
        return super::fail(ctx, e);
    }
    let mut port: Port<u16> = Port::new(ctx.ebx as u16);
    // SAFETY: see `in8`.
    unsafe { port.write(ctx.ecx as u16) };
    super::ok(ctx)
}

/// `IO_Out32(port,value)`.
pub fn out32(ctx: &mut Context, current_task: &Arc<Mutex<Task>>) -> *mut Context {
    if let Err(e) = require_io_access(current_task) {
        return super::fail(ctx, e);
    }
    let mut port: Port<u32> = Port::new(ctx.ebx as u16);
    // SAFETY: see `in8`.
    unsafe { port.write(ctx.ecx) };
    super::ok(ctx)
}
