//! The common interrupt trampoline and the per-vector entry stubs.
//!
//! Every vector the kernel actually uses (CPU exceptions 0-31, IRQs 32-47,
//! and the `int 0x80` syscall gate) gets its own tiny naked stub that pushes
//! a CPU-missing error code (if needed) and the vector number, then falls
//! into [`isr_common`], which saves the rest of the [`Context`], calls
//! [`crate::interrupts::dispatch`], and restores whatever context that
//! dispatch returns — which is a different thread's stack when the
//! scheduler decided to switch.

use crate::task::context::Context;

/// Vectors that push a CPU error code automatically (8, 10-14, 17, 21, 29, 30).
#[must_use]
pub const fn has_error_code(vector: u8) -> bool {
    matches!(vector, 8 | 10 | 11 | 12 | 13 | 14 | 17 | 21 | 29 | 30)
}

/// Called by [`isr_common`] with a pointer to the frame it just saved.
///
/// Returns the context pointer to resume, which is `ctx` unless the
/// scheduler switched threads inside the dispatch.
extern "C" fn interrupt_trampoline(ctx: *mut Context) -> *mut Context {
    // SAFETY: `isr_common` only ever calls this with a pointer to a
    // freshly pushed, fully-initialized `Context` on the current kernel
    // stack.
    let ctx_ref = unsafe { &mut *ctx };
    crate::interrupts::dispatch(ctx_ref)
}

/// The shared tail of every interrupt stub.
///
/// Stack layout on entry (after the per-vector stub pushed error code and
/// vector): `[vector, error_code, eip, cs, eflags, (user_esp, user_ss)]`
/// with the CPU-pushed words already present below those two.
///
/// # Safety
/// Must only be reached by `jmp` from one of the per-vector stubs below,
/// with the stack exactly as they leave it.
#[unsafe(naked)]
pub unsafe extern "C" fn isr_common() -> ! {
    // SAFETY: naked function; the full prologue/epilogue is hand-written
    // to match `Context`'s field order exactly.
    unsafe {
        core::arch::naked_asm!(
            "push gs",
            "push fs",
            "push es",
            "push ds",
            "pushad",
            "mov eax, {kernel_data_sel}",
            "mov ds, ax",
            "mov es, ax",
            "mov fs, ax",
            "push esp",
            "call {trampoline}",
            "mov esp, eax",
            "popad",
            "pop ds",
            "pop es",
            "pop fs",
            "pop gs",
            "add esp, 8", // discard vector, error_code
            "iretd",
            kernel_data_sel = const crate::arch::gdt::KERNEL_DATA_SELECTOR,
            trampoline = sym interrupt_trampoline,
        );
    }
}

/// Defines a naked per-vector entry stub named `$name` for interrupt
/// vector `$vector`, pushing a dummy error code first when the CPU does
/// not push one itself.
macro_rules! define_stub {
    ($name:ident, $vector:expr) => {
        #[unsafe(naked)]
        pub unsafe extern "C" fn $name() -> ! {
            // SAFETY: naked function; falls straight into `isr_common`.
            unsafe {
                if $crate::interrupts::stub::has_error_code($vector) {
                    core::arch::naked_asm!(
                        "push {vector}",
                        "jmp {common}",
                        vector = const $vector,
                        common = sym $crate::interrupts::stub::isr_common,
                    );
                } else {
                    core::arch::naked_asm!(
                        "push 0",
                        "push {vector}",
                        "jmp {common}",
                        vector = const $vector,
                        common = sym $crate::interrupts::stub::isr_common,
                    );
                }
            }
        }
    };
}

define_stub!(stub_divide_by_zero, 0);
define_stub!(stub_debug, 1);
define_stub!(stub_nmi, 2);
define_stub!(stub_breakpoint, 3);
define_stub!(stub_overflow, 4);
define_stub!(stub_bound_range, 5);
define_stub!(stub_invalid_opcode, 6);
define_stub!(stub_device_not_available, 7);
define_stub!(stub_double_fault, 8);
define_stub!(stub_invalid_tss, 10);
define_stub!(stub_segment_not_present, 11);
define_stub!(stub_stack_segment_fault, 12);
define_stub!(stub_general_protection_fault, 13);
define_stub!(stub_page_fault, 14);
define_stub!(stub_x87_fp, 16);
define_stub!(stub_alignment_check, 17);
define_stub!(stub_machine_check, 18);
define_stub!(stub_simd_fp, 19);

define_stub!(stub_irq0, 32);
define_stub!(stub_irq1, 33);
define_stub!(stub_irq2, 34);
define_stub!(stub_irq3, 35);
define_stub!(stub_irq4, 36);
define_stub!(stub_irq5, 37);
define_stub!(stub_irq6, 38);
define_stub!(stub_irq7, 39);
define_stub!(stub_irq8, 40);
define_stub!(stub_irq9, 41);
define_stub!(stub_irq10, 42);
define_stub!(stub_irq11, 43);
define_stub!(stub_irq12, 44);
define_stub!(stub_irq13, 45);
define_stub!(stub_irq14, 46);
define_stub!(stub_irq15, 47);

define_stub!(stub_syscall, 0x80);
