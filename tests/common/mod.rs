//! Boot trampoline shared by the integration test binaries.
//!
//! Each file under `tests/` links against the same `i686-quantum.json`
//! target and `linker.ld` as the real kernel binary, so it needs the same
//! entry contract `src/boot.rs` gives `main.rs` — but `boot.rs` is private
//! to the `quantum` binary crate, not the library, so it can't just be
//! imported here. This module re-derives the small subset a test actually
//! needs: enough of the boot handoff to call [`quantum::mm::init`] when a
//! test exercises the heap or paging, and nothing else.

use quantum::config::PAGE_SIZE;
use quantum::mm::phys::MemoryMapEntry;

const MAX_ENTRIES: usize = 32;

#[repr(C)]
struct RawEntry {
    base_low: u32,
    base_high: u32,
    length_low: u32,
    length_high: u32,
    region_type: u32,
}

#[repr(C)]
struct RawBootInfo {
    entry_count: u32,
    reserved: u32,
    entries: [RawEntry; MAX_ENTRIES],
}

const BITMAP_BYTES: usize = (4u64 * 1024 * 1024 * 1024 / u64::from(PAGE_SIZE) / 8) as usize;

#[unsafe(link_section = ".bss")]
static mut FRAME_BITMAP: [u8; BITMAP_BYTES] = [0; BITMAP_BYTES];

unsafe extern "C" {
    static __kernel_start: u8;
    static __kernel_end: u8;
}

core::arch::global_asm!(
    r#"
.section .text.boot, "ax"
.global _start
_start:
    mov esp, offset __test_boot_stack_top
    push ebx
    call {entry}
.hang:
    hlt
    jmp .hang

.section .bss
.align 16
__test_boot_stack_bottom:
    .skip 0x4000
__test_boot_stack_top:
"#,
    entry = sym test_entry,
);

unsafe extern "C" {
    /// Defined by each test file: the actual test body, reached once the
    /// trampoline above has a valid stack and the `BootInfo` physical
    /// address in hand.
    fn kernel_test_main(boot_info_phys: u32) -> !;
}

extern "C" fn test_entry(boot_info_phys: u32) -> ! {
    // SAFETY: `kernel_test_main` is defined exactly once, by the test file
    // this module is compiled into, with the signature declared above.
    unsafe { kernel_test_main(boot_info_phys) }
}

/// Brings up physical memory, paging, and the kernel heap exactly as
/// `main::kernel_main` does, for tests that need to allocate.
///
/// # Safety
/// Must run at most once, before any other code in the test binary
/// touches memory management, with `boot_info_phys` pointing at a live
/// `BootInfo` record (see `src/boot.rs`'s own contract).
pub unsafe fn init_memory(boot_info_phys: u32) {
    // SAFETY: forwarded from this function's own contract.
    let raw = unsafe { &*(boot_info_phys as *const RawBootInfo) };
    let entry_count = (raw.entry_count as usize).min(MAX_ENTRIES);

    let mut entries = [MemoryMapEntry { base: 0, length: 0, region_type: 0 }; MAX_ENTRIES];
    for (slot, raw_entry) in entries.iter_mut().zip(raw.entries.iter()).take(entry_count) {
        slot.base = (u64::from(raw_entry.base_high) << 32) | u64::from(raw_entry.base_low);
        slot.length = (u64::from(raw_entry.length_high) << 32) | u64::from(raw_entry.length_low);
        slot.region_type = raw_entry.region_type;
    }

    let phys_size = (core::mem::size_of::<u32>() * 2 + entry_count * core::mem::size_of::<RawEntry>()) as u32;
    let boot_info_region = (boot_info_phys, boot_info_phys + phys_size);

    // SAFETY: both symbols are defined by `linker.ld` and never written to.
    let kernel_image = unsafe {
        (
            &__kernel_start as *const u8 as u32 - quantum::config::KERNEL_BASE,
            &__kernel_end as *const u8 as u32 - quantum::config::KERNEL_BASE,
        )
    };

    // SAFETY: called exactly once, before any other subsystem touches
    // memory through `quantum::mm`, by this function's own contract.
    unsafe {
        let bitmap = &mut *core::ptr::addr_of_mut!(FRAME_BITMAP);
        quantum::mm::init(bitmap, &entries[..entry_count], kernel_image, boot_info_region, None);
    }
}
