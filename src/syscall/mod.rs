//! The `int 0x80` syscall surface (spec §6).
//!
//! Every handler receives the trapped [`Context`] and the calling task,
//! already resolved by [`dispatch`]; it returns the context to resume,
//! which differs from the input exactly when the call blocked (see
//! `task::scheduler::reschedule`). The identifier travels in `eax`,
//! arguments in `ebx`/`ecx`/`edx` (spec §6: "register A", "registers
//! B/C/D"); every handler's return value replaces `eax`.

pub mod block;
pub mod console;
pub mod device;
pub mod filesystem;
pub mod handle;
pub mod initbundle;
pub mod input;
pub mod io;
pub mod ipc;
pub mod irq;
pub mod memory;
mod numbers;
pub mod task;

use alloc::sync::Arc;
use spin::Mutex;

use crate::error::KernelError;
use crate::serial_println;
use crate::task::context::Context;
use crate::task::{scheduler, Task};

/// Fails a call with a status code and does not reschedule.
fn fail(ctx: &mut Context, error: KernelError) -> *mut Context {
    ctx.eax = error.to_syscall_status();
    core::ptr::from_mut(ctx)
}

/// Succeeds a call carrying no result value beyond 0.
fn ok(ctx: &mut Context) -> *mut Context {
    ctx.eax = 0;
    core::ptr::from_mut(ctx)
}

/// Checks `task` is the coordinator, the gate every `[coord-only]` call in
/// spec §6 applies (`Task_GrantIOAccess`, `InitBundle_SpawnTask`, `IRQ_*`).
fn require_coordinator(task: &Arc<Mutex<Task>>) -> Result<(), KernelError> {
    if task.lock().is_coordinator {
        Ok(())
    } else {
        Err(KernelError::NotCoordinator)
    }
}

/// The vector dispatcher's syscall entry point, reached from
/// [`crate::interrupts::dispatch`] for vector `0x80`.
pub fn dispatch(ctx: &mut Context) -> *mut Context {
    let Some(current_task) = scheduler::current_task() else {
        return fail(ctx, KernelError::NotFound);
    };

    match ctx.eax {
        numbers::TASK_EXIT => task::exit(ctx, &current_task),
        numbers::TASK_YIELD => task::yield_now(ctx),
        numbers::TASK_GRANT_IO_ACCESS => task::grant_io_access(ctx, &current_task),
        numbers::TASK_SLEEP_TICKS => task::sleep_ticks(ctx),

        numbers::CONSOLE_WRITE => console::write(ctx, false),
        numbers::CONSOLE_WRITE_LINE => console::write(ctx, true),

        numbers::INIT_BUNDLE_GET_INFO => initbundle::get_info(ctx),
        numbers::INIT_BUNDLE_SPAWN_TASK => initbundle::spawn_task(ctx, &current_task),

        numbers::IPC_CREATE_PORT => ipc::create_port(ctx, &current_task),
        numbers::IPC_OPEN_PORT => ipc::open_port(ctx, &current_task),
        numbers::IPC_DESTROY_PORT => ipc::destroy_port(ctx, &current_task),
        numbers::IPC_CLOSE_HANDLE => ipc::close_handle(ctx, &current_task),
        numbers::IPC_SEND => ipc::send(ctx, &current_task),
        numbers::IPC_RECEIVE => ipc::receive(ctx, &current_task, 0),
        numbers::IPC_TRY_RECEIVE => ipc::try_receive(ctx, &current_task),
        numbers::IPC_RECEIVE_TIMEOUT => ipc::receive_timeout(ctx, &current_task),
        numbers::IPC_SEND_HANDLE => ipc::send_handle(ctx, &current_task),
        numbers::IPC_TRY_GET_HANDLE_MESSAGE => ipc::try_get_handle_message(ctx, &current_task),

        numbers::IO_IN8 => io::in8(ctx, &current_task),
        numbers::IO_IN16 => io::in16(ctx, &current_task),
        numbers::IO_IN32 => io::in32(ctx, &current_task),
        numbers::IO_OUT8 => io::out8(ctx, &current_task),
        numbers::IO_OUT16 => io::out16(ctx, &current_task),
        numbers::IO_OUT32 => io::out32(ctx, &current_task),

        numbers::BLOCK_GET_COUNT => block::get_count(ctx),
        numbers::BLOCK_GET_INFO => block::get_info(ctx, &current_task),
        numbers::BLOCK_REGISTER => block::register(ctx, &current_task),
        numbers::BLOCK_UPDATE_INFO => block::update_info(ctx, &current_task),
        numbers::BLOCK_OPEN => block::open(ctx),
        numbers::BLOCK_READ => block::read(ctx, current_task),
        numbers::BLOCK_WRITE => block::write(ctx, current_task),
        numbers::BLOCK_BIND => block::bind(ctx, &current_task),
        numbers::BLOCK_ALLOCATE_DMA_BUFFER => block::allocate_dma_buffer(ctx, &current_task),

        numbers::INPUT_GET_COUNT => input::get_count(ctx),
        numbers::INPUT_GET_INFO => input::get_info(ctx, &current_task),
        numbers::INPUT_REGISTER => input::register(ctx, &current_task),
        numbers::INPUT_UPDATE_INFO => input::update_info(ctx, &current_task),
        numbers::INPUT_OPEN => input::open(ctx),
        numbers::INPUT_READ_EVENT => input::read_event(ctx, current_task, 0),
        numbers::INPUT_READ_EVENT_TIMEOUT => input::read_event_timeout(ctx, current_task),
        numbers::INPUT_PUSH_EVENT => input::push_event(ctx),

        numbers::FS_LIST_VOLUMES => filesystem::list_volumes(ctx, current_task),
        numbers::FS_OPEN_VOLUME => filesystem::open_volume(ctx, current_task),
        numbers::FS_CLOSE_VOLUME => filesystem::close_volume(ctx, current_task),
        numbers::FS_GET_VOLUME_INFO => filesystem::get_volume_info(ctx, current_task),
        numbers::FS_OPEN => filesystem::open(ctx, current_task),
        numbers::FS_CLOSE => filesystem::close(ctx, current_task),
        numbers::FS_READ => filesystem::read(ctx, current_task),
        numbers::FS_WRITE => filesystem::write(ctx, current_task),
        numbers::FS_SEEK => filesystem::seek(ctx, current_task),
        numbers::FS_STAT => filesystem::stat(ctx, current_task),
        numbers::FS_READ_DIRECTORY => filesystem::read_directory(ctx, current_task),
        numbers::FS_CREATE_DIRECTORY => filesystem::create_directory(ctx, current_task),
        numbers::FS_CREATE_FILE => filesystem::create_file(ctx, current_task),
        numbers::FS_REMOVE => filesystem::remove(ctx, current_task),
        numbers::FS_RENAME => filesystem::rename(ctx, current_task),
        numbers::FS_REGISTER_SERVICE => filesystem::register_service(ctx, &current_task),

        numbers::IRQ_REGISTER => irq::register(ctx, &current_task),
        numbers::IRQ_UNREGISTER => irq::unregister(ctx, &current_task),
        numbers::IRQ_ENABLE => irq::enable(ctx, &current_task),
        numbers::IRQ_DISABLE => irq::disable(ctx, &current_task),

        numbers::MEMORY_EXPAND_HEAP => memory::expand_heap(ctx, &current_task),

        numbers::HANDLE_CLOSE => handle::close(ctx, &current_task),
        numbers::HANDLE_DUP => handle::dup(ctx, &current_task),
        numbers::HANDLE_QUERY => handle::query(ctx, &current_task),

        numbers::DEVICE_SET_BROKER_PORT => device::set_broker_port(ctx, &current_task),
        numbers::DEVICE_GET_BROKER_PORT => device::get_broker_port(ctx),

        other => {
            serial_println!("[syscall] unknown id {:#x}, ignoring", other);
            core::ptr::from_mut(ctx)
        }
    }
}
