//! Compile-time sizing constants for the core subsystems.
//!
//! Centralized here (rather than scattered per-module as in the teacher)
//! because the full kernel has far more of these than the teacher did.

/// Size of one physical frame / virtual page.
pub const PAGE_SIZE: u32 = 4096;

/// Default bitmap size floor, used when the memory map reports less than
/// this much usable RAM (spec §4.1).
pub const MIN_MANAGED_BYTES: u32 = 64 * 1024 * 1024;

/// Bitmap sizing ceiling: never track more than 4 GiB of frames.
pub const MAX_MANAGED_BYTES: u64 = 4 * 1024 * 1024 * 1024;

/// Legacy low-memory stack carve-out, reserved and never handed out.
pub const LOW_STACK_BASE: u32 = 0x8_0000;
/// End of the low-memory stack carve-out (exclusive).
pub const LOW_STACK_END: u32 = 0x9_0000;

/// Start of the user program image / data in every task's address space.
pub const USER_IMAGE_BASE: u32 = 0x0000_0000;
/// Top of the user stack (downward-growing), shared by every task.
pub const USER_STACK_TOP: u32 = 0xBFE0_0000;
/// Default user stack size.
pub const USER_STACK_SIZE: u32 = 0x4000;

/// Start of higher-half kernel code/data.
pub const KERNEL_BASE: u32 = 0xC000_0000;
/// Start of the kernel heap region.
pub const KERNEL_HEAP_BASE: u32 = 0xC200_0000;
/// Size of the kernel heap region (virtual reservation, not all mapped).
pub const KERNEL_HEAP_SIZE: u32 = 512 * 1024 * 1024;
/// Start of the recursive page-table window (slot 1023).
pub const RECURSIVE_WINDOW_BASE: u32 = 0xFFC0_0000;

/// Start of the kernel's direct physical map: physical address `p` below
/// [`PHYS_MAP_SIZE`] is always readable/writable at `PHYS_MAP_BASE + p`.
/// Used to manipulate a page directory/table frame by physical address
/// without requiring it to be the currently active directory (the
/// recursive slot only serves that purpose for whichever directory is
/// loaded into `CR3` right now).
pub const PHYS_MAP_BASE: u32 = 0xE200_0000;
/// Size of the direct physical map; bounds how low page-table/directory
/// frames must land to stay manageable by [`PHYS_MAP_BASE`]. Matches
/// [`MIN_MANAGED_BYTES`] since the bitmap allocator's first-fit scan keeps
/// early structural allocations (directories, page tables) within this
/// range in practice.
pub const PHYS_MAP_SIZE: u32 = MIN_MANAGED_BYTES;

/// Directory index of the recursive self-map slot.
pub const RECURSIVE_SLOT: usize = 1023;
/// First directory index reserved for the kernel half (K in spec §3).
pub const KERNEL_DIRECTORY_INDEX: usize = KERNEL_BASE as usize / (4096 * 1024);

/// Kernel stack size for every kernel thread.
pub const KERNEL_STACK_SIZE: u32 = 4 * PAGE_SIZE;

/// Maximum number of messages queued per port at once (spec §4.5/§3: "small").
pub const MAX_QUEUE_DEPTH: usize = 16;
/// Maximum payload bytes per IPC message. Sized to carry one disk sector
/// (512 B) plus a small request/reply header in a single message, so block
/// device request/reply marshaling (§4.7) never needs a secondary bulk
/// transfer channel for ordinary single-sector I/O.
pub const MAX_PAYLOAD_BYTES: usize = 576;

/// Bytes per disk sector assumed by the block request/reply wire format.
pub const BLOCK_SECTOR_SIZE: usize = 512;

/// Size of the single kernel-owned DMA window, below the ISA 16 MiB line.
pub const DMA_WINDOW_SIZE: u32 = PAGE_SIZE;
/// Physical ceiling for DMA allocations (legacy ISA DMA limit).
pub const DMA_MAX_PHYS: u32 = 16 * 1024 * 1024;
/// DMA buffers may never straddle a boundary of this many bytes.
pub const DMA_BOUNDARY_BYTES: u32 = 64 * 1024;

/// Byte offset within a task's address space where the DMA window alias lives.
pub const DMA_WINDOW_USER_VADDR: u32 = 0xB000_0000;

/// Heap size classes, smallest to largest (spec §4.3: "16, 32, 64, 128").
pub const HEAP_SIZE_CLASSES: [usize; 4] = [16, 32, 64, 128];
/// Free-block payload canary value.
pub const HEAP_CANARY: u32 = 0xDEAD_C0DE;
/// Poison byte written into a block about to be handed to a caller.
pub const HEAP_POISON_ALLOC: u8 = 0xAA;
/// Poison byte written into a block just freed.
pub const HEAP_POISON_FREE: u8 = 0x55;
/// Magic tag for the over-alignment bookkeeping record.
pub const HEAP_ALIGN_MAGIC: u32 = 0xA11G_0000;

/// Init bundle on-disk magic (spec §6, bit-exact).
pub const INIT_BUNDLE_MAGIC: [u8; 8] = *b"INITBND\0";
/// Name field width of one init-bundle table entry.
pub const INIT_BUNDLE_NAME_LEN: usize = 32;
/// On-disk size of one init-bundle table entry: `type(1) + name(32) +
/// offset(4) + size(4)`.
pub const INIT_BUNDLE_ENTRY_LEN: usize = 41;
/// Byte length of the fixed init-bundle header, before the entry table.
pub const INIT_BUNDLE_HEADER_LEN: usize = 16;
/// Largest init bundle the kernel will map in (sized generously for a
/// handful of small service images).
pub const INIT_BUNDLE_MAX_SIZE: u32 = 2 * 1024 * 1024;
/// Supervisor-only kernel alias the loader parses the bundle through.
pub const INIT_BUNDLE_KERNEL_VADDR: u32 = 0xC600_0000;
/// User-accessible alias of the same physical pages, read-only, so a
/// coordinator-spawned task may inspect the bundle directly.
pub const INIT_BUNDLE_USER_VADDR: u32 = 0xC700_0000;

/// Init-bundle entry type tag marking the coordinator program (spec §4.8).
pub const INIT_BUNDLE_TYPE_COORDINATOR: u8 = 1;
