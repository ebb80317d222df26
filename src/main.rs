//! Kernel entry point: brings up every subsystem in dependency order and
//! hands off to the scheduler.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(quantum::test_runner)]
#![reexport_test_harness_main = "test_main"]

mod boot;

use core::panic::PanicInfo;

use quantum::{arch, devices, gdt, interrupts, kinfo, kwarn, loader, mm, task};

/// Brought up exactly once, from [`boot::kernel_entry`], with interrupts
/// still disabled and paging already covering the identity-mapped low
/// 16 MiB plus the kernel's own higher-half alias (the boot handoff
/// contract `linker.ld` and `boot.rs` both assume).
pub fn kernel_main(boot_info: boot::BootInfo) -> ! {
    kinfo!("quantum kernel booting");
    if let Some(drive) = boot_info.boot_drive {
        kinfo!("boot drive: {drive:#x}");
    }

    let kernel_image = boot::kernel_image_bounds();
    let boot_info_region = (boot_info.phys_addr, boot_info.phys_addr + boot_info.phys_size);
    // SAFETY: entered exactly once from `boot::kernel_entry`, before any
    // other subsystem has touched memory management.
    let init_bundle = unsafe {
        let addr = core::ptr::addr_of!(boot::INIT_BUNDLE_PHYS_ADDR).read();
        let size = core::ptr::addr_of!(boot::INIT_BUNDLE_PHYS_SIZE).read();
        if size > 0 { Some((addr, size)) } else { None }
    };

    let entries = &boot_info.entries[..boot_info.entry_count];
    // SAFETY: `boot::bitmap_storage` is called exactly once, `entries` was
    // just parsed from the bootloader's own handoff record, and paging is
    // still in the identity/higher-half state the handoff contract promises.
    unsafe {
        mm::init(boot::bitmap_storage(), entries, kernel_image, boot_info_region, init_bundle);
    }

    // SAFETY: `mm::init` has installed and activated the kernel's own
    // page directory, so the TSS static this maps into is reachable.
    unsafe {
        gdt::init();
    }
    interrupts::init();

    task::scheduler::init(mm::paging::kernel_directory());
    devices::input::keyboard::init();

    match init_bundle {
        Some((addr, size)) => match loader::initbundle::init(addr, size) {
            Ok(()) => {
                let (version, count) = loader::initbundle::info();
                kinfo!("init bundle mapped: version={version} entries={count}");
                if loader::initbundle::spawn_coordinator().is_none() {
                    kwarn!("init bundle has no coordinator entry");
                }
            }
            Err(err) => kwarn!("init bundle rejected: {err}"),
        },
        None => kinfo!("INIT.BND not mapped"),
    }

    task::scheduler::enable_scheduling();

    // SAFETY: the IDT, GDT/TSS, and PICs are fully installed above, and
    // the scheduler has at least the idle thread ready to run.
    unsafe {
        arch::enable_interrupts();
    }

    #[cfg(test)]
    test_main();

    loop {
        arch::halt();
    }
}

/// This function is called on panic.
#[cfg(not(test))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    quantum::serial_println!("[panic] {info}");
    loop {
        arch::halt();
    }
}

#[cfg(test)]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    quantum::test_panic_handler(info);
}
