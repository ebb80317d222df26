//! Exercises the kernel heap (spec §4.3: size-class bins, the general
//! free list, and growth by mapping fresh frames) through the ordinary
//! `alloc` collection types.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(quantum::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

mod common;

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::panic::PanicInfo;

use quantum::mm::heap;

/// Reached once `common`'s trampoline has a valid stack and
/// `boot_info_phys` names a live `BootInfo` record.
#[unsafe(no_mangle)]
pub extern "C" fn kernel_test_main(boot_info_phys: u32) -> ! {
    // SAFETY: first and only call in this binary, before anything else
    // touches memory management.
    unsafe {
        common::init_memory(boot_info_phys);
    }

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

#[test_case]
fn when_creating_simple_allocation_then_memory_is_allocated() {
    let heap_value_1 = Box::new(41);
    let heap_value_2 = Box::new(42);

    assert_eq!(*heap_value_1, 41);
    assert_eq!(*heap_value_2, 42);
}

#[test_case]
fn when_creating_large_vec_then_memory_is_allocated() {
    let mut vec = Vec::new();
    for i in 0..1000 {
        vec.push(i);
    }
    assert_eq!(vec.iter().sum::<u64>(), (0..1000).sum());
}

/// Allocating past a single page forces the heap to grow by mapping
/// fresh frames (spec §4.3 step 3), and the free list must still verify
/// clean afterwards.
#[test_case]
fn when_many_boxes_outlive_a_single_page_then_heap_grows_and_stays_consistent() {
    let mut boxes = Vec::new();
    for i in 0..4096u32 {
        boxes.push(Box::new(i));
    }
    for (i, b) in boxes.iter().enumerate() {
        assert_eq!(**b, i as u32);
    }
    drop(boxes);
    assert!(heap::verify(), "heap free list invariants violated after growth and drop");
}

#[test_case]
fn when_blocks_are_freed_then_they_coalesce_and_verify_clean() {
    let a = Box::new([0u8; 64]);
    let b = Box::new([0u8; 64]);
    let c = Box::new([0u8; 64]);
    drop(a);
    drop(b);
    drop(c);
    assert!(heap::verify(), "heap free list invariants violated after coalescing");
}
