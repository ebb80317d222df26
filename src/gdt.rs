//! GDT and TSS initialization.
//!
//! Builds the flat-model 32-bit GDT (null, kernel code/data, user
//! code/data, TSS) and exposes the one mutable piece of it the scheduler
//! touches every context switch: the TSS's `esp0` field, which the CPU
//! reads on every ring-3 -> ring-0 transition.

use conquer_once::spin::OnceCell;
use spin::Mutex;

use crate::arch::gdt::{self as raw, GDT_ENTRIES, GdtEntry, TaskStateSegment};

static TSS: Mutex<TaskStateSegment> = Mutex::new(TaskStateSegment::new());
static GDT: OnceCell<[GdtEntry; GDT_ENTRIES]> = OnceCell::uninit();

/// Loads the GDT, reloads segment registers, and loads the task register.
///
/// # Safety
/// Must run once, before any interrupt or ring transition relies on the
/// installed selectors.
pub unsafe fn init() {
    // SAFETY: `TSS` is a `'static` spinlocked static; its address is fixed
    // for the life of the kernel, satisfying `raw::load`'s requirement.
    let tss_ref: &'static TaskStateSegment = unsafe { &*(&raw const *TSS.lock()) };
    let table = GDT.get_or_init(|| {
        // SAFETY: see above.
        unsafe { raw::load(tss_ref) }
    });
    // SAFETY: `table` lives in a `OnceCell` static, `'static` for the life
    // of the kernel.
    unsafe {
        raw::activate(table);
    }
}

/// Updates the TSS's `esp0` (ring-0 stack pointer) to the next thread's
/// kernel stack top, per spec §4.4 step 5 of the context-switch sequence.
pub fn set_kernel_stack(kernel_stack_top: u32) {
    TSS.lock().esp0 = kernel_stack_top;
}
