//! Memory management: physical frames, paging, and the kernel heap.

pub mod heap;
pub mod paging;
pub mod phys;

/// Brings up physical memory management, the kernel's own address space,
/// and the kernel heap, in the order each depends on the last.
///
/// # Safety
/// Must be called exactly once, early in boot, with the memory map and
/// image bounds the bootloader handed off still valid, and before any
/// other kernel subsystem touches memory through this module.
pub unsafe fn init(
    bitmap_storage: &'static mut [u8],
    entries: &[phys::MemoryMapEntry],
    kernel_image: (u32, u32),
    boot_info_region: (u32, u32),
    init_bundle: Option<(u32, u32)>,
) {
    // SAFETY: forwarded straight from this function's own contract.
    unsafe {
        phys::PHYSICAL_ALLOCATOR.lock().init(
            bitmap_storage,
            entries,
            kernel_image,
            boot_info_region,
            init_bundle,
        );
    }

    // SAFETY: physical allocator is initialized; paging is still either
    // disabled or identity-mapped, as this function's contract requires.
    let kernel_dir = unsafe { paging::init_kernel_directory() };
    paging::activate(kernel_dir);

    heap::init();
}
