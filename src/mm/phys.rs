//! Bitmap physical frame allocator (spec §4.1).

use spin::Mutex;

use crate::config::{LOW_STACK_BASE, LOW_STACK_END, MAX_MANAGED_BYTES, MIN_MANAGED_BYTES, PAGE_SIZE};
use crate::error::{KernelError, KernelResult};
use crate::kwarn;

/// One entry of the boot-supplied memory map (spec §6).
#[derive(Debug, Clone, Copy)]
pub struct MemoryMapEntry {
    pub base: u64,
    pub length: u64,
    /// `1` means usable RAM; every other value is reserved/unusable.
    pub region_type: u32,
}

/// The single global physical allocator.
pub static PHYSICAL_ALLOCATOR: Mutex<PhysicalAllocator> = Mutex::new(PhysicalAllocator::empty());

/// Bitmap-backed frame allocator: one bit per 4 KiB frame, `1` = used.
pub struct PhysicalAllocator {
    bitmap: &'static mut [u8],
    total_frames: u32,
    used_frames: u32,
    /// `[start, end)` frame range reserved for the init bundle; frames in
    /// here are skipped by `allocate_page` but never released back.
    bundle_range: Option<(u32, u32)>,
    initialized: bool,
}

impl PhysicalAllocator {
    const fn empty() -> Self {
        Self {
            bitmap: &mut [],
            total_frames: 0,
            used_frames: 0,
            bundle_range: None,
            initialized: false,
        }
    }

    /// Builds the bitmap from a boot memory map, reserving the regions spec
    /// §4.1 names: bitmap pages themselves, the kernel image, the low
    /// stack, the boot-info region, the init-bundle region, and frame 0.
    ///
    /// # Safety
    /// `bitmap_storage` must be writable memory that is not otherwise in
    /// use, at least `bitmap_bytes_needed(highest_usable_byte)` long, and
    /// must outlive the kernel.
    #[expect(clippy::missing_panics_doc, reason = "Asserts are internal invariants, not documented API contracts.")]
    pub unsafe fn init(
        &mut self,
        bitmap_storage: &'static mut [u8],
        entries: &[MemoryMapEntry],
        kernel_image: (u32, u32),
        boot_info_region: (u32, u32),
        init_bundle: Option<(u32, u32)>,
    ) {
        assert!(!self.initialized, "PhysicalAllocator double-init");

        let highest_usable = entries
            .iter()
            .filter(|e| e.region_type == 1)
            .map(|e| e.base.saturating_add(e.length))
            .max()
            .unwrap_or(0)
            .min(MAX_MANAGED_BYTES);
        let managed_bytes = highest_usable.max(u64::from(MIN_MANAGED_BYTES));
        let total_frames = (managed_bytes / u64::from(PAGE_SIZE)) as u32;

        assert!(
            bitmap_storage.len() * 8 >= total_frames as usize,
            "bitmap storage too small for managed range"
        );

        self.bitmap = bitmap_storage;
        self.total_frames = total_frames;
        self.bitmap.fill(0xff);
        self.used_frames = total_frames;

        for entry in entries.iter().filter(|e| e.region_type == 1) {
            self.clear_range(entry.base, entry.length);
        }

        let bitmap_base = core::ptr::from_ref(&self.bitmap[0]) as u32;
        let bitmap_len = self.bitmap.len() as u32;
        self.mark_used_range(u64::from(bitmap_base), u64::from(bitmap_len));
        self.mark_used_range(u64::from(kernel_image.0), u64::from(kernel_image.1 - kernel_image.0));
        self.mark_used_range(u64::from(LOW_STACK_BASE), u64::from(LOW_STACK_END - LOW_STACK_BASE));
        self.mark_used_range(
            u64::from(boot_info_region.0),
            u64::from(boot_info_region.1 - boot_info_region.0),
        );
        if let Some((base, end)) = init_bundle {
            self.mark_used_range(u64::from(base), u64::from(end - base));
            self.bundle_range = Some((base / PAGE_SIZE, end.div_ceil(PAGE_SIZE)));
        }
        self.mark_used_range(0, u64::from(PAGE_SIZE)); // frame 0 never handed out

        self.initialized = true;
    }

    fn clear_range(&mut self, base: u64, length: u64) {
        self.for_each_frame(base, length, |bitmap, frame| {
            Self::clear_bit(bitmap, frame);
        });
    }

    fn mark_used_range(&mut self, base: u64, length: u64) {
        self.for_each_frame(base, length, |bitmap, frame| {
            Self::set_bit(bitmap, frame);
        });
    }

    fn for_each_frame(&mut self, base: u64, length: u64, mut f: impl FnMut(&mut [u8], u32)) {
        let first = (base / u64::from(PAGE_SIZE)) as u32;
        let frames = length.div_ceil(u64::from(PAGE_SIZE)) as u32;
        for i in 0..frames {
            let frame = first + i;
            if frame < self.total_frames {
                f(self.bitmap, frame);
            }
        }
    }

    fn set_bit(bitmap: &mut [u8], frame: u32) {
        let was_used = bitmap[(frame / 8) as usize] & (1 << (frame % 8)) != 0;
        bitmap[(frame / 8) as usize] |= 1 << (frame % 8);
        let _ = was_used;
    }

    fn clear_bit(bitmap: &mut [u8], frame: u32) {
        bitmap[(frame / 8) as usize] &= !(1 << (frame % 8));
    }

    fn test_bit(&self, frame: u32) -> bool {
        self.bitmap[(frame / 8) as usize] & (1 << (frame % 8)) != 0
    }

    fn in_bundle_range(&self, frame: u32) -> bool {
        self.bundle_range
            .is_some_and(|(start, end)| frame >= start && frame < end)
    }

    fn first_free_frame(&self, below: Option<u32>) -> Option<u32> {
        let limit = below.unwrap_or(self.total_frames);
        (0..self.total_frames.min(limit)).find(|&frame| !self.test_bit(frame))
    }

    /// Scans for the first free frame, optionally zeroing it before return.
    ///
    /// Frames inside the init-bundle reservation are permanently skipped
    /// (marked used) rather than handed out, per spec §4.1.
    ///
    /// # Panics
    /// Panics when the bitmap is exhausted — a kernel-critical resource
    /// failure per spec §7.3.
    pub fn allocate_page(&mut self, zero: bool) -> u32 {
        loop {
            let Some(frame) = self.first_free_frame(None) else {
                panic!("PhysicalAllocator: out of physical memory");
            };
            if self.in_bundle_range(frame) {
                Self::set_bit(self.bitmap, frame);
                continue;
            }
            Self::set_bit(self.bitmap, frame);
            self.used_frames += 1;
            let addr = frame * PAGE_SIZE;
            if zero {
                // SAFETY: `addr` is a frame this allocator just marked
                // used and exclusively owns; it is identity-mapped or
                // otherwise kernel-accessible by address before handoff.
                unsafe {
                    core::ptr::write_bytes(addr as *mut u8, 0, PAGE_SIZE as usize);
                }
            }
            return addr;
        }
    }

    /// Allocates a frame strictly below `max_phys` that does not straddle a
    /// `boundary_bytes` boundary. Returns `None` on failure (non-fatal —
    /// DMA buffers only, spec §4.1).
    pub fn allocate_page_below(
        &mut self,
        max_phys: u32,
        zero: bool,
        boundary_bytes: u32,
    ) -> Option<u32> {
        let limit_frame = max_phys / PAGE_SIZE;
        for frame in 0..self.total_frames.min(limit_frame) {
            if self.test_bit(frame) || self.in_bundle_range(frame) {
                continue;
            }
            let addr = frame * PAGE_SIZE;
            if addr % boundary_bytes + PAGE_SIZE > boundary_bytes {
                continue;
            }
            Self::set_bit(self.bitmap, frame);
            self.used_frames += 1;
            if zero {
                // SAFETY: see `allocate_page`.
                unsafe {
                    core::ptr::write_bytes(addr as *mut u8, 0, PAGE_SIZE as usize);
                }
            }
            return Some(addr);
        }
        None
    }

    /// Frees a previously allocated frame. Misuse never panics: an
    /// unaligned address, an out-of-range address, or a double-free all
    /// just log a warning and return, per spec §4.1.
    pub fn free_page(&mut self, addr: u32) {
        if addr % PAGE_SIZE != 0 {
            kwarn!("PhysicalAllocator::free_page: unaligned address {:#x}", addr);
            return;
        }
        let frame = addr / PAGE_SIZE;
        if frame >= self.total_frames {
            kwarn!("PhysicalAllocator::free_page: address {:#x} out of range", addr);
            return;
        }
        if !self.test_bit(frame) {
            kwarn!("PhysicalAllocator::free_page: double free of {:#x}", addr);
            return;
        }
        Self::clear_bit(self.bitmap, frame);
        self.used_frames -= 1;
    }

    /// Bulk-reserves an aligned page span. Idempotent.
    pub fn reserve_range(&mut self, base: u32, length: u32) {
        self.for_each_frame(u64::from(base), u64::from(length), |bitmap, frame| {
            Self::set_bit(bitmap, frame);
        });
        self.recompute_used();
    }

    /// Bulk-releases an aligned page span. Idempotent.
    pub fn release_range(&mut self, base: u32, length: u32) {
        self.for_each_frame(u64::from(base), u64::from(length), |bitmap, frame| {
            Self::clear_bit(bitmap, frame);
        });
        self.recompute_used();
    }

    fn recompute_used(&mut self) {
        self.used_frames = (0..self.total_frames).filter(|&f| self.test_bit(f)).count() as u32;
    }

    /// Total frames tracked.
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.total_frames
    }

    /// Frames currently in use.
    #[must_use]
    pub const fn used(&self) -> u32 {
        self.used_frames
    }

    /// Frames currently free.
    #[must_use]
    pub const fn free(&self) -> u32 {
        self.total_frames - self.used_frames
    }

    /// Bytes under management (`total() * PAGE_SIZE`).
    #[must_use]
    pub const fn managed_bytes(&self) -> u64 {
        self.total_frames as u64 * PAGE_SIZE as u64
    }
}

/// Allocates one zeroed (or uninitialized) frame from the global allocator.
pub fn allocate_page(zero: bool) -> u32 {
    PHYSICAL_ALLOCATOR.lock().allocate_page(zero)
}

/// Frees one frame back to the global allocator.
pub fn free_page(addr: u32) {
    PHYSICAL_ALLOCATOR.lock().free_page(addr);
}

/// Validates that `base`/`length` are page-aligned before a bulk range op.
pub fn validate_aligned(base: u32, length: u32) -> KernelResult<()> {
    if base % PAGE_SIZE != 0 || length % PAGE_SIZE != 0 {
        return Err(KernelError::InvalidAddress);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_allocator(storage: &'static mut [u8], total_bytes: u64) -> PhysicalAllocator {
        let mut allocator = PhysicalAllocator::empty();
        let entries = [MemoryMapEntry {
            base: 0,
            length: total_bytes,
            region_type: 1,
        }];
        // SAFETY: `storage` is a test-owned static, sized generously above.
        unsafe {
            allocator.init(storage, &entries, (0, 0), (0, 0), None);
        }
        allocator
    }

    #[test_case]
    fn allocate_then_free_preserves_frame_count() {
        static mut STORAGE: [u8; 4096] = [0; 4096];
        #[expect(static_mut_refs, reason = "Test-local storage, single-threaded test runner.")]
        let storage: &'static mut [u8] =
            unsafe { core::slice::from_raw_parts_mut(core::ptr::addr_of_mut!(STORAGE).cast(), 4096) };
        let mut allocator = make_allocator(storage, 64 * 1024 * 1024);
        let free_before = allocator.free();
        let a = allocator.allocate_page(false);
        let b = allocator.allocate_page(false);
        assert_ne!(a, b, "two allocations must not alias");
        allocator.free_page(a);
        allocator.free_page(b);
        assert_eq!(allocator.free(), free_before, "frame count must round-trip");
    }

    #[test_case]
    fn used_plus_free_equals_total() {
        static mut STORAGE2: [u8; 4096] = [0; 4096];
        #[expect(static_mut_refs, reason = "Test-local storage, single-threaded test runner.")]
        let storage: &'static mut [u8] =
            unsafe { core::slice::from_raw_parts_mut(core::ptr::addr_of_mut!(STORAGE2).cast(), 4096) };
        let mut allocator = make_allocator(storage, 64 * 1024 * 1024);
        let _ = allocator.allocate_page(false);
        assert_eq!(allocator.used() + allocator.free(), allocator.total());
    }
}
