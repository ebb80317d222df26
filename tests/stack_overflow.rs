//! Touching the kernel heap's guard region must be treated as a fatal
//! kernel bug (spec: "Touching them faults; the handler must treat this
//! as a fatal kernel bug"), not silently resolved or corrupted through.

#![no_std]
#![no_main]

extern crate alloc;

mod common;

use alloc::format;
use core::panic::PanicInfo;

use quantum::config::{KERNEL_HEAP_BASE, KERNEL_HEAP_SIZE};
use quantum::{exit_qemu, gdt, interrupts, serial_print, serial_println, QemuExitCode};

/// Reached once `common`'s trampoline has a valid stack and `boot_info_phys`
/// names a live `BootInfo` record.
#[unsafe(no_mangle)]
pub extern "C" fn kernel_test_main(boot_info_phys: u32) -> ! {
    serial_print!("stack_overflow::heap_guard_page...\t");

    // SAFETY: first and only call in this binary, before anything else
    // touches memory management.
    unsafe {
        common::init_memory(boot_info_phys);
    }
    // SAFETY: paging is active and the kernel directory installed by
    // `init_memory` above, so the TSS this maps into is reachable.
    unsafe {
        gdt::init();
    }
    interrupts::init();

    // The heap never grows past its hard limit, so this address sits
    // inside the permanent guard region no matter how much it has grown.
    let guard = (KERNEL_HEAP_BASE + KERNEL_HEAP_SIZE) as *const u8;
    // SAFETY: deliberately dereferencing an address the heap guarantees
    // is never mapped, to exercise the page fault handler's fatal path.
    unsafe {
        core::ptr::read_volatile(guard);
    }

    panic!("execution should not reach here: guard page read did not fault");
}

/// Only the page fault handler's own `"kernel-mode fault"` panic (see
/// `interrupts::fault_current_task`) counts as success; any other panic,
/// including the deliberate one at the bottom of `kernel_test_main`, is a
/// genuine test failure.
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    let message = format!("{info}");
    if message.contains("kernel-mode fault") {
        serial_println!("[ok]");
        exit_qemu(QemuExitCode::Success);
    } else {
        serial_println!("[failed]\n");
        serial_println!("Error: {message}\n");
        exit_qemu(QemuExitCode::Failure);
    }

    #[expect(
        clippy::empty_loop,
        reason = "Endless loop when test finish. It should not be possible as we exit_qemu before."
    )]
    loop {}
}
