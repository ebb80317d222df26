//! Two-level paging with a recursive self-map (spec §4.2).

use bitflags::bitflags;
use spin::Mutex;

use crate::arch;
use crate::config::{
    KERNEL_DIRECTORY_INDEX, PAGE_SIZE, PHYS_MAP_BASE, PHYS_MAP_SIZE, RECURSIVE_SLOT,
    RECURSIVE_WINDOW_BASE,
};
use crate::error::{KernelError, KernelResult};
use crate::kwarn;
use crate::mm::phys;

const ENTRIES_PER_TABLE: usize = 1024;

bitflags! {
    /// Page directory/table entry flags (IA-32 layout, low 12 bits).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntryFlags: u32 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
        const GLOBAL = 1 << 8;
    }
}

/// The physical address of a page directory, naming one [`AddressSpace`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysDir(pub u32);

/// The kernel's own page directory, built once at boot and shared
/// read-only (at the PDE level) by every task's address space.
static KERNEL_DIRECTORY: Mutex<Option<PhysDir>> = Mutex::new(None);

fn directory_index(vaddr: u32) -> usize {
    (vaddr >> 22) as usize
}

fn table_index(vaddr: u32) -> usize {
    ((vaddr >> 12) & 0x3ff) as usize
}

/// Translates a physical address of a directory/table frame into the
/// virtual address it is reachable at through the kernel's direct
/// physical map (see [`crate::config::PHYS_MAP_BASE`]).
fn phys_map(phys: u32) -> u32 {
    assert!(phys < PHYS_MAP_SIZE, "page-table frame {phys:#x} outside direct physical map");
    PHYS_MAP_BASE + phys
}

unsafe fn directory_slice(dir_phys: u32) -> &'static mut [u32; ENTRIES_PER_TABLE] {
    // SAFETY: `phys_map` resolves to kernel physmap memory identity-mapped
    // to `dir_phys` by `init_kernel_directory`, kept present in every
    // address space's shared kernel half.
    unsafe { &mut *(phys_map(dir_phys) as *mut [u32; ENTRIES_PER_TABLE]) }
}

/// Bootstrap-only accessor: before this directory is installed, physical
/// memory is still identity-accessible (per spec §6 boot handoff), so a
/// physical address can be dereferenced directly rather than through the
/// not-yet-built direct physical map.
unsafe fn bootstrap_slice(phys: u32) -> &'static mut [u32; ENTRIES_PER_TABLE] {
    // SAFETY: caller (`init_kernel_directory`) guarantees paging is either
    // off or still identity-mapped at this point.
    unsafe { &mut *(phys as *mut [u32; ENTRIES_PER_TABLE]) }
}

/// Builds the kernel's own page directory: identity-maps the low 16 MiB
/// (so early boot code and the bootloader's hand-off structures stay
/// reachable), maps the higher half 1:1 with physical memory at
/// `KERNEL_BASE`, installs the direct physical map, and installs the
/// recursive self-map at slot 1023.
///
/// Called once, before paging is (re-)enabled.
///
/// # Safety
/// Must run with paging either disabled or already configured to keep the
/// addresses this function writes through (the raw `dir_phys`/table
/// frames) identity-mapped until `Activate` switches `CR3`.
pub unsafe fn init_kernel_directory() -> PhysDir {
    let dir_phys = phys::allocate_page(true);
    // SAFETY: freshly allocated, zeroed, and not yet the active directory;
    // writing through its identity-mapped physical address is valid before
    // `CR3` points at it.
    let dir = unsafe { bootstrap_slice(dir_phys) };
    dir[RECURSIVE_SLOT] = dir_phys | EntryFlags::PRESENT.bits() | EntryFlags::WRITABLE.bits();

    let kernel_base_dir = KERNEL_DIRECTORY_INDEX;
    for index in 0..4 {
        let table_phys = phys::allocate_page(true);
        // SAFETY: same reasoning as above; identity mapping still holds.
        let table = unsafe { bootstrap_slice(table_phys) };
        for (entry, e) in table.iter_mut().enumerate() {
            let phys = ((index * ENTRIES_PER_TABLE + entry) as u32) * PAGE_SIZE;
            *e = phys
                | EntryFlags::PRESENT.bits()
                | EntryFlags::WRITABLE.bits()
                | EntryFlags::GLOBAL.bits();
        }
        dir[index] = table_phys | EntryFlags::PRESENT.bits() | EntryFlags::WRITABLE.bits();
        dir[kernel_base_dir + index] =
            table_phys | EntryFlags::PRESENT.bits() | EntryFlags::WRITABLE.bits();
    }

    let physmap_dir_base = (PHYS_MAP_BASE / (PAGE_SIZE * ENTRIES_PER_TABLE as u32)) as usize;
    let physmap_tables = PHYS_MAP_SIZE / (PAGE_SIZE * ENTRIES_PER_TABLE as u32);
    for index in 0..physmap_tables as usize {
        let table_phys = phys::allocate_page(true);
        // SAFETY: same reasoning as above; identity mapping still holds.
        let table = unsafe { bootstrap_slice(table_phys) };
        for (entry, e) in table.iter_mut().enumerate() {
            let phys = ((index * ENTRIES_PER_TABLE + entry) as u32) * PAGE_SIZE;
            *e = phys | EntryFlags::PRESENT.bits() | EntryFlags::WRITABLE.bits() | EntryFlags::GLOBAL.bits();
        }
        dir[physmap_dir_base + index] = table_phys | EntryFlags::PRESENT.bits() | EntryFlags::WRITABLE.bits();
    }

    *KERNEL_DIRECTORY.lock() = Some(PhysDir(dir_phys));
    PhysDir(dir_phys)
}

/// Returns the kernel's page directory, panicking if paging has not been
/// initialized yet (a bootstrap-ordering bug, not a runtime condition).
#[must_use]
pub fn kernel_directory() -> PhysDir {
    KERNEL_DIRECTORY
        .lock()
        .expect("kernel page directory not initialized")
}

/// Creates a fresh address space for a new task (spec §4.2 `Create`).
///
/// # Panics
/// Panics if called before [`init_kernel_directory`].
#[must_use]
pub fn create() -> PhysDir {
    let kernel_dir_phys = kernel_directory().0;

    let new_dir_phys = phys::allocate_page(true);
    // SAFETY: `new_dir_phys` is freshly allocated and not yet active;
    // reading/writing through its physical address (identity-mapped low
    // memory, per the kernel's own layout) is valid.
    let new_dir = unsafe { directory_slice(new_dir_phys) };
    // SAFETY: the kernel directory is always resident and mapped.
    let kernel_dir = unsafe { directory_slice(kernel_dir_phys) };

    for index in KERNEL_DIRECTORY_INDEX..RECURSIVE_SLOT {
        new_dir[index] = kernel_dir[index];
    }

    for index in 0..KERNEL_DIRECTORY_INDEX {
        let entry = kernel_dir[index];
        if entry & EntryFlags::PRESENT.bits() == 0 {
            continue;
        }
        let src_table_phys = entry & !0xfff;
        let new_table_phys = phys::allocate_page(true);
        // SAFETY: both frames are identity-reachable kernel-owned memory.
        let src_table = unsafe { directory_slice(src_table_phys) };
        let new_table = unsafe { directory_slice(new_table_phys) };
        new_table.copy_from_slice(src_table);
        new_dir[index] = new_table_phys | (entry & 0xfff);
    }

    new_dir[RECURSIVE_SLOT] = new_dir_phys | EntryFlags::PRESENT.bits() | EntryFlags::WRITABLE.bits();

    PhysDir(new_dir_phys)
}

/// Tears down a task's address space (spec §4.2 `Destroy`): frees every
/// present user-half page table and the frames it mapped, then the
/// directory itself. Refuses to destroy the kernel directory.
pub fn destroy(dir: PhysDir) -> KernelResult<()> {
    if dir.0 == kernel_directory().0 {
        return Err(KernelError::InvalidOperation);
    }

    // SAFETY: `dir.0` names an address space no longer active on this CPU
    // (the scheduler activates the next thread's space before calling
    // this), so its frames can be freed without a dangling TLB use.
    let directory = unsafe { directory_slice(dir.0) };
    for index in 0..KERNEL_DIRECTORY_INDEX {
        let entry = directory[index];
        if entry & EntryFlags::PRESENT.bits() == 0 {
            continue;
        }
        let table_phys = entry & !0xfff;
        // SAFETY: same as above.
        let table = unsafe { directory_slice(table_phys) };
        for &pte in table.iter() {
            if pte & EntryFlags::PRESENT.bits() != 0 && pte & EntryFlags::GLOBAL.bits() == 0 {
                phys::free_page(pte & !0xfff);
            }
        }
        phys::free_page(table_phys);
    }
    phys::free_page(dir.0);
    Ok(())
}

/// Maps one page, allocating a page-table frame on demand (spec §4.2
/// `MapPage`). Invalidates the TLB entry only when `dir` is the currently
/// active directory.
pub fn map_page(dir: PhysDir, vaddr: u32, paddr: u32, writable: bool, user: bool, global: bool) {
    let d_index = directory_index(vaddr);
    let t_index = table_index(vaddr);

    // SAFETY: `dir` is a live address space owned by the caller; the
    // kernel always has at least read/write access to any directory it
    // manages, whether or not it is currently active.
    let directory = unsafe { directory_slice(dir.0) };
    if directory[d_index] & EntryFlags::PRESENT.bits() == 0 {
        let table_phys = phys::allocate_page(true);
        let mut flags = EntryFlags::PRESENT | EntryFlags::WRITABLE;
        if user {
            flags |= EntryFlags::USER;
        }
        directory[d_index] = table_phys | flags.bits();
    }

    let table_phys = directory[d_index] & !0xfff;
    // SAFETY: the table frame named by `directory[d_index]` was either
    // just allocated above or previously installed by this same function.
    let table = unsafe { directory_slice(table_phys) };

    let mut flags = EntryFlags::PRESENT;
    if writable {
        flags |= EntryFlags::WRITABLE;
    }
    if user {
        flags |= EntryFlags::USER;
    }
    if global {
        flags |= EntryFlags::GLOBAL;
    }
    table[t_index] = paddr | flags.bits();

    if dir.0 == arch::read_cr3() {
        arch::invlpg(vaddr);
    }
}

/// Looks up the physical address a virtual address currently maps to.
#[must_use]
pub fn translate(dir: PhysDir, vaddr: u32) -> Option<u32> {
    let d_index = directory_index(vaddr);
    let t_index = table_index(vaddr);
    // SAFETY: see `map_page`.
    let directory = unsafe { directory_slice(dir.0) };
    if directory[d_index] & EntryFlags::PRESENT.bits() == 0 {
        return None;
    }
    let table_phys = directory[d_index] & !0xfff;
    // SAFETY: see `map_page`.
    let table = unsafe { directory_slice(table_phys) };
    let pte = table[t_index];
    if pte & EntryFlags::PRESENT.bits() == 0 {
        return None;
    }
    Some((pte & !0xfff) | (vaddr & 0xfff))
}

/// Loads `CR3` with `dir`'s physical address, if not already active.
pub fn activate(dir: PhysDir) {
    if arch::read_cr3() != dir.0 {
        // SAFETY: `dir` names a fully populated address space: its kernel
        // half was copied from the live kernel directory and its
        // recursive slot was installed by `create`.
        unsafe {
            arch::write_cr3(dir.0);
        }
    }
}

/// Runs `f` with `dir` loaded into `CR3`, restoring whatever directory was
/// previously active before returning. The cross-address-space write every
/// synchronous delivery path (IPC replies, loader image copies) relies on,
/// since none of them run in `dir`'s own context.
pub(crate) fn with_activated<R>(dir: PhysDir, f: impl FnOnce() -> R) -> R {
    arch::without_interrupts(|| {
        let previous = arch::read_cr3();
        activate(dir);
        let result = f();
        activate(PhysDir(previous));
        result
    })
}

/// Resolves a page fault (spec §4.2). Returns `true` if the fault was
/// handled (a lazy mapping was installed) and the faulting instruction can
/// be safely retried; `false` if the fault must terminate the task.
///
/// The only faults this kernel resolves lazily are touches inside the
/// caller's user-heap window that the loader has already reserved but not
/// yet backed with a frame; everything else (guard pages, unmapped code,
/// protection violations) is fatal per spec §4.2/§7.2.
#[must_use]
pub fn handle_page_fault(faulting_address: u32, error_code: u32) -> bool {
    let present = error_code & 0x1 != 0;
    if present {
        // Protection violation on an already-mapped page: never lazily resolved.
        return false;
    }

    let Some(task) = crate::task::scheduler::current_task() else {
        return false;
    };
    let in_heap_window = {
        let guard = task.lock();
        faulting_address >= guard.user_heap.mapped_end && faulting_address < guard.user_heap.current_end
    };
    if !in_heap_window {
        return false;
    }

    let page_base = faulting_address & !(PAGE_SIZE - 1);
    let frame = phys::allocate_page(true);
    let dir = {
        let guard = task.lock();
        guard.address_space
    };
    map_page(dir, page_base, frame, true, true, false);
    {
        let mut guard = task.lock();
        guard.user_heap.mapped_end = page_base + PAGE_SIZE;
    }
    true
}

/// Maps `length` bytes (rounded up to whole pages) of freshly allocated,
/// zeroed frames starting at `vaddr`, used by the heap and loader to back
/// freshly reserved virtual ranges.
pub fn map_anonymous(dir: PhysDir, vaddr: u32, length: u32, writable: bool, user: bool) {
    let pages = length.div_ceil(PAGE_SIZE);
    for i in 0..pages {
        let page_vaddr = vaddr + i * PAGE_SIZE;
        if translate(dir, page_vaddr).is_some() {
            kwarn!("map_anonymous: {:#x} already mapped, skipping", page_vaddr);
            continue;
        }
        let frame = phys::allocate_page(true);
        map_page(dir, page_vaddr, frame, writable, user, false);
    }
}

/// Unmaps and frees `length` bytes (rounded up to whole pages) starting at
/// `vaddr`. Pages that are not present are skipped silently.
pub fn unmap_range(dir: PhysDir, vaddr: u32, length: u32) {
    let pages = length.div_ceil(PAGE_SIZE);
    for i in 0..pages {
        let page_vaddr = vaddr + i * PAGE_SIZE;
        if let Some(paddr) = translate(dir, page_vaddr) {
            let d_index = directory_index(page_vaddr);
            let t_index = table_index(page_vaddr);
            // SAFETY: `translate` above already proved this table is present.
            let directory = unsafe { directory_slice(dir.0) };
            let table_phys = directory[d_index] & !0xfff;
            // SAFETY: same.
            let table = unsafe { directory_slice(table_phys) };
            table[t_index] = 0;
            if dir.0 == arch::read_cr3() {
                arch::invlpg(page_vaddr);
            }
            phys::free_page(paddr & !0xfff);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn directory_index_splits_higher_half_correctly() {
        assert_eq!(directory_index(0xC000_0000), KERNEL_DIRECTORY_INDEX);
        assert_eq!(directory_index(0), 0);
    }

    #[test_case]
    fn recursive_window_points_at_slot_1023() {
        assert_eq!(directory_index(RECURSIVE_WINDOW_BASE), RECURSIVE_SLOT);
    }
}
