//! ELF32/LSB/386 loading (spec §4.8 step 3).
//!
//! Hand-rolled against the documented header layout rather than pulling in
//! a parsing crate — the on-disk shape is small, fixed, and the kernel only
//! ever needs the fields that decide where `PT_LOAD` segments land.

use alloc::vec::Vec;

use crate::config::PAGE_SIZE;
use crate::error::{KernelError, KernelResult};
use crate::mm::paging::{self, PhysDir};
use crate::mm::phys;

const EI_CLASS_32: u8 = 1;
const EI_DATA_LSB: u8 = 1;
const EM_386: u16 = 3;
const ET_EXEC: u16 = 2;
const PT_LOAD: u32 = 1;
const PF_W: u32 = 0x2;

const EHDR_LEN: usize = 52;
const PHDR_LEN: usize = 32;

fn u16_at(bytes: &[u8], offset: usize) -> Option<u16> {
    bytes.get(offset..offset + 2).map(|s| u16::from_le_bytes([s[0], s[1]]))
}

fn u32_at(bytes: &[u8], offset: usize) -> Option<u32> {
    bytes.get(offset..offset + 4).map(|s| u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
}

fn align_up(value: u32, align: u32) -> u32 {
    value.div_ceil(align) * align
}

/// Checks the ELF32/LSB/386 header without touching any program header
/// (spec §4.8 step 3: "validate ELF32/LSB/386 header"). The loader falls
/// back to the legacy layout when this returns `false`.
#[must_use]
pub fn is_valid_header(image: &[u8]) -> bool {
    image.len() >= EHDR_LEN
        && image[0..4] == [0x7f, b'E', b'L', b'F']
        && image[4] == EI_CLASS_32
        && image[5] == EI_DATA_LSB
        && u16_at(image, 16) == Some(ET_EXEC)
        && u16_at(image, 18) == Some(EM_386)
}

/// Loads every `PT_LOAD` segment of `image` into `dir`, returning the entry
/// point and the highest virtual address any segment reaches (the loader
/// uses the latter to place the task's user-heap base). Assumes
/// [`is_valid_header`] already returned `true`.
pub fn load(image: &[u8], dir: PhysDir) -> KernelResult<(u32, u32)> {
    let entry = u32_at(image, 24).ok_or(KernelError::MalformedImage)?;
    let phoff = u32_at(image, 28).ok_or(KernelError::MalformedImage)? as usize;
    let phentsize = u16_at(image, 42).ok_or(KernelError::MalformedImage)? as usize;
    let phnum = u16_at(image, 44).ok_or(KernelError::MalformedImage)? as usize;

    if phentsize < PHDR_LEN {
        return Err(KernelError::MalformedImage);
    }

    let mut image_end: u32 = 0;
    let mut loaded_any = false;

    for index in 0..phnum {
        let record_start = phoff + index * phentsize;
        let record = image
            .get(record_start..record_start + PHDR_LEN)
            .ok_or(KernelError::MalformedImage)?;

        let p_type = u32_at(record, 0).ok_or(KernelError::MalformedImage)?;
        if p_type != PT_LOAD {
            continue;
        }

        let p_offset = u32_at(record, 4).ok_or(KernelError::MalformedImage)?;
        let p_vaddr = u32_at(record, 8).ok_or(KernelError::MalformedImage)?;
        let p_filesz = u32_at(record, 16).ok_or(KernelError::MalformedImage)?;
        let p_memsz = u32_at(record, 20).ok_or(KernelError::MalformedImage)?;
        let p_flags = u32_at(record, 24).ok_or(KernelError::MalformedImage)?;

        if p_filesz > p_memsz {
            return Err(KernelError::MalformedImage);
        }
        let file_end = (p_offset as usize)
            .checked_add(p_filesz as usize)
            .ok_or(KernelError::MalformedImage)?;
        let file_bytes = image.get(p_offset as usize..file_end).ok_or(KernelError::MalformedImage)?;

        let segment_end = p_vaddr.checked_add(p_memsz).ok_or(KernelError::MalformedImage)?;
        let writable = p_flags & PF_W != 0;

        load_segment(dir, p_vaddr, p_memsz, file_bytes, writable)?;

        image_end = image_end.max(segment_end);
        loaded_any = true;
    }

    if !loaded_any {
        return Err(KernelError::MalformedImage);
    }

    Ok((entry, align_up(image_end, PAGE_SIZE)))
}

/// Backs `[vaddr, vaddr+memsz)` with freshly allocated zeroed frames, copies
/// `file_bytes` into the front of it, and leaves the rest zero-filled —
/// exactly spec §4.8 step 3's `.data`/`.bss` handling. Every page is mapped
/// writable during the copy and, for a segment without `PF_W`, remapped
/// read-only afterward.
fn load_segment(dir: PhysDir, vaddr: u32, memsz: u32, file_bytes: &[u8], writable: bool) -> KernelResult<()> {
    let page_base = vaddr & !(PAGE_SIZE - 1);
    let span = (vaddr - page_base) + memsz;
    let pages = span.div_ceil(PAGE_SIZE);

    let mut frames = Vec::with_capacity(pages as usize);
    for i in 0..pages {
        let frame = phys::allocate_page(true);
        paging::map_page(dir, page_base + i * PAGE_SIZE, frame, true, true, false);
        frames.push(frame);
    }

    paging::with_activated(dir, || {
        // SAFETY: `dir` is active for the duration of this closure and every
        // page in `[page_base, page_base + pages*PAGE_SIZE)` was just mapped
        // writable above.
        unsafe {
            core::ptr::copy_nonoverlapping(file_bytes.as_ptr(), vaddr as *mut u8, file_bytes.len());
        }
    });

    if !writable {
        for i in 0..pages {
            paging::map_page(dir, page_base + i * PAGE_SIZE, frames[i as usize], false, true, false);
        }
    }

    Ok(())
}
