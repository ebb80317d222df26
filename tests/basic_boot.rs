//! Simple boot test for the kernel: paging and the VGA text buffer are
//! live as soon as the boot trampoline hands off, with no heap required.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(quantum::test_runner)]
#![reexport_test_harness_main = "test_main"]

mod common;

use core::panic::PanicInfo;

use quantum::println;

/// Reached once `common`'s trampoline has a valid stack; this test never
/// touches the `BootInfo` record, so the physical address is unused.
#[unsafe(no_mangle)]
pub extern "C" fn kernel_test_main(_boot_info_phys: u32) -> ! {
    test_main();

    #[expect(
        clippy::empty_loop,
        reason = "Infinite loop after the test main function is done."
    )]
    loop {}
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    quantum::test_panic_handler(info)
}

/// Test that we can print a line.
#[test_case]
fn test_println() {
    println!("test_println output");
}
