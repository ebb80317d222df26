//! `Console_Write`/`Console_WriteLine` (spec §6).

use crate::error::KernelError;
use crate::task::context::Context;

/// Both calls share a shape: `ebx` = pointer, `ecx` = length. `line` adds a
/// trailing newline (`Console_WriteLine`).
pub fn write(ctx: &mut Context, line: bool) -> *mut Context {
    let ptr = ctx.ebx;
    let len = ctx.ecx as usize;
    if ptr == 0 || len > crate::config::MAX_PAYLOAD_BYTES {
        return super::fail(ctx, KernelError::InvalidAddress);
    }

    // SAFETY: the calling task's address space is the one currently
    // active (it just trapped into this syscall from user mode); `len`
    // was just bounded above.
    let bytes = unsafe { core::slice::from_raw_parts(ptr as *const u8, len) };
    let Ok(text) = core::str::from_utf8(bytes) else {
        return super::fail(ctx, KernelError::InvalidAddress);
    };

    if line {
        crate::println!("{text}");
    } else {
        crate::print!("{text}");
    }
    super::ok(ctx)
}
