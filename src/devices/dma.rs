//! The single kernel-owned DMA window (spec §4.7 `AllocateDMABuffer`).
//!
//! One page-granular, below-16 MiB, 64 KiB-boundary-safe physical frame,
//! allocated on first use and aliased at the same fixed user virtual
//! address in whichever task's directory requests it. Per spec §5,
//! concurrent drivers serialize by convention; the kernel does not
//! arbitrate access to the window itself.

use spin::Mutex;

use crate::config::{DMA_BOUNDARY_BYTES, DMA_MAX_PHYS, DMA_WINDOW_SIZE, DMA_WINDOW_USER_VADDR};
use crate::error::{KernelError, KernelResult};
use crate::mm::paging::{self, PhysDir};
use crate::mm::phys::PHYSICAL_ALLOCATOR;

static DMA_PHYS: Mutex<Option<u32>> = Mutex::new(None);

/// The DMA window as handed back to a caller: its fixed user-space address
/// and the size actually backing it.
#[derive(Debug, Clone, Copy)]
pub struct DmaBuffer {
    pub vaddr: u32,
    pub size: u32,
}

/// Ensures the single DMA frame exists and maps it into `dir` at
/// [`DMA_WINDOW_USER_VADDR`]. `requested_size` must not exceed the
/// window's fixed size.
pub fn allocate(dir: PhysDir, requested_size: u32) -> KernelResult<DmaBuffer> {
    if requested_size == 0 || requested_size > DMA_WINDOW_SIZE {
        return Err(KernelError::InvalidOperation);
    }

    let mut phys = DMA_PHYS.lock();
    let frame = match *phys {
        Some(frame) => frame,
        None => {
            let frame = PHYSICAL_ALLOCATOR
                .lock()
                .allocate_page_below(DMA_MAX_PHYS, true, DMA_BOUNDARY_BYTES)
                .ok_or(KernelError::OutOfMemory)?;
            *phys = Some(frame);
            frame
        }
    };
    drop(phys);

    paging::map_page(dir, DMA_WINDOW_USER_VADDR, frame, true, true, false);

    Ok(DmaBuffer {
        vaddr: DMA_WINDOW_USER_VADDR,
        size: DMA_WINDOW_SIZE,
    })
}
