//! Init bundle parsing and `SpawnTask` (spec §4.8, §6 "bit-exact" layout).
//!
//! The bundle arrives as a contiguous physical region named by the boot
//! handoff. [`init`] must run before the first task is created: it maps the
//! region read-only into the kernel directory's shared half, which is
//! exactly why every task created afterward inherits both aliases for free
//! (see `mm::paging::create`'s kernel-half copy).

use spin::Mutex;

use crate::config::{
    INIT_BUNDLE_ENTRY_LEN, INIT_BUNDLE_HEADER_LEN, INIT_BUNDLE_KERNEL_VADDR, INIT_BUNDLE_MAGIC,
    INIT_BUNDLE_MAX_SIZE, INIT_BUNDLE_NAME_LEN, INIT_BUNDLE_TYPE_COORDINATOR, INIT_BUNDLE_USER_VADDR,
    PAGE_SIZE, USER_IMAGE_BASE, USER_STACK_SIZE, USER_STACK_TOP,
};
use crate::error::{KernelError, KernelResult};
use crate::loader::elf;
use crate::mm::paging::{self, PhysDir};
use crate::task::scheduler;
use crate::task::{Task, TaskId, UserHeap};

/// One parsed entry from the bundle's table (spec §6: `{type, name[32],
/// offset, size}`, 41 bytes on disk).
#[derive(Debug, Clone, Copy)]
pub struct BundleEntry {
    pub entry_type: u8,
    pub name: [u8; INIT_BUNDLE_NAME_LEN],
    pub offset: u32,
    pub size: u32,
}

impl BundleEntry {
    fn parse(record: &[u8]) -> Self {
        let mut name = [0u8; INIT_BUNDLE_NAME_LEN];
        name.copy_from_slice(&record[1..1 + INIT_BUNDLE_NAME_LEN]);
        let tail = 1 + INIT_BUNDLE_NAME_LEN;
        Self {
            entry_type: record[0],
            name,
            offset: u32::from_le_bytes([record[tail], record[tail + 1], record[tail + 2], record[tail + 3]]),
            size: u32::from_le_bytes([
                record[tail + 4],
                record[tail + 5],
                record[tail + 6],
                record[tail + 7],
            ]),
        }
    }

    /// The entry's NUL-padded ASCII name, trimmed at the first NUL.
    #[must_use]
    pub fn name_str(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        core::str::from_utf8(&self.name[..len]).unwrap_or("")
    }
}

struct Bundle {
    size: u32,
    version: u8,
    entry_count: u8,
    table_offset: u32,
}

static BUNDLE: Mutex<Option<Bundle>> = Mutex::new(None);

/// Maps `[phys_base, phys_base+size)` read-only at the kernel and user
/// aliases and validates the header. Must be called exactly once, before
/// any task's address space is created.
pub fn init(phys_base: u32, size: u32) -> KernelResult<()> {
    if size == 0 || size > INIT_BUNDLE_MAX_SIZE {
        return Err(KernelError::InvalidAddress);
    }

    let kernel_dir = paging::kernel_directory();
    let pages = size.div_ceil(PAGE_SIZE);
    for i in 0..pages {
        let offset = i * PAGE_SIZE;
        paging::map_page(kernel_dir, INIT_BUNDLE_KERNEL_VADDR + offset, phys_base + offset, false, false, true);
        paging::map_page(kernel_dir, INIT_BUNDLE_USER_VADDR + offset, phys_base + offset, false, true, true);
    }

    if (size as usize) < INIT_BUNDLE_HEADER_LEN {
        return Err(KernelError::MalformedImage);
    }
    // SAFETY: the pages just mapped above cover at least `INIT_BUNDLE_HEADER_LEN` bytes.
    let header = unsafe {
        core::slice::from_raw_parts(INIT_BUNDLE_KERNEL_VADDR as *const u8, INIT_BUNDLE_HEADER_LEN)
    };
    if header[0..8] != INIT_BUNDLE_MAGIC {
        return Err(KernelError::MalformedImage);
    }

    let version = header[8];
    let entry_count = header[9];
    let table_offset = u32::from_le_bytes([header[12], header[13], header[14], header[15]]);

    *BUNDLE.lock() = Some(Bundle { size, version, entry_count, table_offset });
    Ok(())
}

fn kernel_bytes(bundle: &Bundle) -> &'static [u8] {
    // SAFETY: `init` mapped `bundle.size` bytes read-only at this address
    // before this `Bundle` was published, and the mapping is never torn down.
    unsafe { core::slice::from_raw_parts(INIT_BUNDLE_KERNEL_VADDR as *const u8, bundle.size as usize) }
}

fn entry_at(bundle: &Bundle, index: u8) -> Option<BundleEntry> {
    if index >= bundle.entry_count {
        return None;
    }
    let start = bundle.table_offset as usize + index as usize * INIT_BUNDLE_ENTRY_LEN;
    let record = kernel_bytes(bundle).get(start..start + INIT_BUNDLE_ENTRY_LEN)?;
    Some(BundleEntry::parse(record))
}

/// `InitBundle_GetInfo`: the bundle's version and entry count.
#[must_use]
pub fn info() -> (u8, u8) {
    BUNDLE.lock().as_ref().map_or((0, 0), |b| (b.version, b.entry_count))
}

/// The entry named `name`, if the bundle has one.
#[must_use]
pub fn find_entry(name: &str) -> Option<BundleEntry> {
    let guard = BUNDLE.lock();
    let bundle = guard.as_ref()?;
    (0..bundle.entry_count).find_map(|i| entry_at(bundle, i).filter(|e| e.name_str() == name))
}

/// Finds and spawns the distinguished coordinator entry, if the bundle
/// carries one. Called once at boot, before any other `SpawnTask`.
#[must_use]
pub fn spawn_coordinator() -> Option<TaskId> {
    let name = {
        let guard = BUNDLE.lock();
        let bundle = guard.as_ref()?;
        (0..bundle.entry_count)
            .find_map(|i| entry_at(bundle, i).filter(|e| e.entry_type == INIT_BUNDLE_TYPE_COORDINATOR))
            .map(|e| {
                let len = e.name.iter().position(|&b| b == 0).unwrap_or(e.name.len());
                let mut buf = [0u8; INIT_BUNDLE_NAME_LEN];
                buf[..len].copy_from_slice(&e.name[..len]);
                (buf, len)
            })?
    };
    let name = core::str::from_utf8(&name.0[..name.1]).ok()?;
    spawn_task(name)
}

fn align_up(value: u32, align: u32) -> u32 {
    value.div_ceil(align) * align
}

/// Loads `name`'s image into a freshly created address space, maps a user
/// stack below [`USER_STACK_TOP`], establishes the task's user-heap window,
/// and starts its main thread (spec §4.8 `SpawnTask`). Returns `None` on
/// any failure, having rolled back the address space.
#[must_use]
pub fn spawn_task(name: &str) -> Option<TaskId> {
    let entry = find_entry(name)?;
    let guard = BUNDLE.lock();
    let bundle = guard.as_ref()?;
    let image_start = entry.offset as usize;
    let image_end = image_start.checked_add(entry.size as usize)?;
    let image = kernel_bytes(bundle).get(image_start..image_end)?;
    // The image bytes above live in the kernel's own read-only mapping, not
    // in anything `BUNDLE` guards concurrent access to beyond this point.
    drop(guard);

    let dir = paging::create();

    let loaded = if elf::is_valid_header(image) {
        elf::load(image, dir)
    } else {
        load_legacy(image, dir)
    };

    let (entry_point, image_end_vaddr) = match loaded {
        Ok(v) => v,
        Err(_) => {
            let _ = paging::destroy(dir);
            return None;
        }
    };

    let stack_base = USER_STACK_TOP - USER_STACK_SIZE;
    paging::map_anonymous(dir, stack_base, USER_STACK_SIZE, true, true);

    let heap_base = align_up(image_end_vaddr, PAGE_SIZE);
    if heap_base >= stack_base {
        let _ = paging::destroy(dir);
        return None;
    }

    let task = Task::new_user(
        dir,
        UserHeap {
            base: heap_base,
            current_end: heap_base,
            mapped_end: heap_base,
            hard_limit: stack_base,
        },
    );
    if entry.entry_type == INIT_BUNDLE_TYPE_COORDINATOR {
        task.lock().is_coordinator = true;
    }

    let task_id = task.lock().id;
    scheduler::register_task(task.clone());
    let thread_id = scheduler::spawn_user_thread(task.clone(), entry_point, USER_STACK_TOP);
    task.lock().main_thread = Some(thread_id);

    Some(task_id)
}

/// The legacy non-ELF layout (spec §4.8 step 4): a 4-byte entry offset
/// relative to [`USER_IMAGE_BASE`], optionally followed by a 4-byte image
/// byte count, then the raw payload copied verbatim.
fn load_legacy(image: &[u8], dir: PhysDir) -> KernelResult<(u32, u32)> {
    if image.len() < 4 {
        return Err(KernelError::MalformedImage);
    }
    let entry_offset = u32::from_le_bytes([image[0], image[1], image[2], image[3]]);

    let image_len = if image.len() >= 8 {
        let candidate = u32::from_le_bytes([image[4], image[5], image[6], image[7]]) as usize;
        if candidate > 0 && candidate <= image.len() {
            candidate
        } else {
            image.len()
        }
    } else {
        image.len()
    };
    let payload = &image[..image_len];

    let mapped_len = align_up(payload.len() as u32, PAGE_SIZE).max(PAGE_SIZE);
    paging::map_anonymous(dir, USER_IMAGE_BASE, mapped_len, true, true);
    paging::with_activated(dir, || {
        // SAFETY: `map_anonymous` above backed `[USER_IMAGE_BASE, USER_IMAGE_BASE+mapped_len)`
        // with writable frames and `payload.len() <= mapped_len`.
        unsafe {
            core::ptr::copy_nonoverlapping(payload.as_ptr(), USER_IMAGE_BASE as *mut u8, payload.len());
        }
    });

    let entry_point = USER_IMAGE_BASE.wrapping_add(entry_offset);
    Ok((entry_point, USER_IMAGE_BASE + mapped_len))
}
