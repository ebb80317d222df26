//! IDT setup and the vector dispatcher.
//!
//! Ties the raw [`arch::idt`] table to the concrete handlers: CPU
//! exceptions (fatal to the faulting task, per spec §7.2), the timer and
//! keyboard IRQs (routed through [`crate::irq`]), and the `int 0x80`
//! syscall gate (routed through [`crate::syscall`]).

pub mod stub;

use lazy_static::lazy_static;
use pic8259::ChainedPics;
use spin::Mutex;

use crate::arch::{
    self,
    gdt::KERNEL_CODE_SELECTOR,
    idt::{self, GATE_INTERRUPT_RING0, GATE_INTERRUPT_RING3, IDT_ENTRIES, IdtEntry},
};
use crate::task::context::Context;
use crate::{serial_println, task};

/// Vector offset PIC1 is remapped to (spec §4.6: "IRQs arrive at vectors >= 0x20").
pub const PIC_1_OFFSET: u8 = 32;
/// Vector offset PIC2 is remapped to.
pub const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;
/// The syscall trap vector (spec §6: "single trap vector 0x80").
pub const SYSCALL_VECTOR: u8 = 0x80;

/// The legacy, chained 8259 PICs.
pub static PICS: Mutex<ChainedPics> =
    // SAFETY: offsets are disjoint from CPU exception vectors (0-31).
    Mutex::new(unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Exception {
    DivideByZero = 0,
    Debug = 1,
    Nmi = 2,
    Breakpoint = 3,
    Overflow = 4,
    BoundRange = 5,
    InvalidOpcode = 6,
    DeviceNotAvailable = 7,
    DoubleFault = 8,
    InvalidTss = 10,
    SegmentNotPresent = 11,
    StackSegmentFault = 12,
    GeneralProtectionFault = 13,
    PageFault = 14,
    X87Fp = 16,
    AlignmentCheck = 17,
    MachineCheck = 18,
    SimdFp = 19,
}

lazy_static! {
    static ref IDT: [IdtEntry; IDT_ENTRIES] = build_idt();
}

#[expect(
    clippy::fn_to_numeric_cast,
    reason = "Naked stub addresses are installed as raw IDT gate offsets."
)]
fn build_idt() -> [IdtEntry; IDT_ENTRIES] {
    let mut table = [IdtEntry::missing(); IDT_ENTRIES];

    macro_rules! install {
        ($vector:expr, $stub:path, $gate:expr) => {
            table[$vector] = IdtEntry::new($stub as u32, KERNEL_CODE_SELECTOR, $gate);
        };
    }

    install!(0, stub::stub_divide_by_zero, GATE_INTERRUPT_RING0);
    install!(1, stub::stub_debug, GATE_INTERRUPT_RING0);
    install!(2, stub::stub_nmi, GATE_INTERRUPT_RING0);
    install!(3, stub::stub_breakpoint, GATE_INTERRUPT_RING0);
    install!(4, stub::stub_overflow, GATE_INTERRUPT_RING0);
    install!(5, stub::stub_bound_range, GATE_INTERRUPT_RING0);
    install!(6, stub::stub_invalid_opcode, GATE_INTERRUPT_RING0);
    install!(7, stub::stub_device_not_available, GATE_INTERRUPT_RING0);
    install!(8, stub::stub_double_fault, GATE_INTERRUPT_RING0);
    install!(10, stub::stub_invalid_tss, GATE_INTERRUPT_RING0);
    install!(11, stub::stub_segment_not_present, GATE_INTERRUPT_RING0);
    install!(12, stub::stub_stack_segment_fault, GATE_INTERRUPT_RING0);
    install!(13, stub::stub_general_protection_fault, GATE_INTERRUPT_RING0);
    install!(14, stub::stub_page_fault, GATE_INTERRUPT_RING0);
    install!(16, stub::stub_x87_fp, GATE_INTERRUPT_RING0);
    install!(17, stub::stub_alignment_check, GATE_INTERRUPT_RING0);
    install!(18, stub::stub_machine_check, GATE_INTERRUPT_RING0);
    install!(19, stub::stub_simd_fp, GATE_INTERRUPT_RING0);

    install!(32, stub::stub_irq0, GATE_INTERRUPT_RING0);
    install!(33, stub::stub_irq1, GATE_INTERRUPT_RING0);
    install!(34, stub::stub_irq2, GATE_INTERRUPT_RING0);
    install!(35, stub::stub_irq3, GATE_INTERRUPT_RING0);
    install!(36, stub::stub_irq4, GATE_INTERRUPT_RING0);
    install!(37, stub::stub_irq5, GATE_INTERRUPT_RING0);
    install!(38, stub::stub_irq6, GATE_INTERRUPT_RING0);
    install!(39, stub::stub_irq7, GATE_INTERRUPT_RING0);
    install!(40, stub::stub_irq8, GATE_INTERRUPT_RING0);
    install!(41, stub::stub_irq9, GATE_INTERRUPT_RING0);
    install!(42, stub::stub_irq10, GATE_INTERRUPT_RING0);
    install!(43, stub::stub_irq11, GATE_INTERRUPT_RING0);
    install!(44, stub::stub_irq12, GATE_INTERRUPT_RING0);
    install!(45, stub::stub_irq13, GATE_INTERRUPT_RING0);
    install!(46, stub::stub_irq14, GATE_INTERRUPT_RING0);
    install!(47, stub::stub_irq15, GATE_INTERRUPT_RING0);

    table[SYSCALL_VECTOR as usize] =
        IdtEntry::new(stub::stub_syscall as u32, KERNEL_CODE_SELECTOR, GATE_INTERRUPT_RING3);

    table
}

/// Remaps the PICs and loads the IDT. Interrupts remain disabled until the
/// caller explicitly enables them (normally just before entering the idle
/// loop, once the scheduler has at least one runnable thread).
pub fn init() {
    // SAFETY: `IDT` is a `'static` `lazy_static` and outlives the kernel.
    unsafe {
        idt::load(&IDT);
    }
    // SAFETY: masks are set up before interrupts are enabled, so no
    // spurious IRQ can race this initialization.
    unsafe {
        PICS.lock().initialize();
    }
}

/// The vector dispatcher called by every [`stub::isr_common`] invocation.
///
/// Returns the context to resume, which differs from `ctx` exactly when
/// the timer vector decided to preempt the current thread.
pub fn dispatch(ctx: &mut Context) -> *mut Context {
    match ctx.vector {
        v if v < 32 => {
            handle_exception(ctx);
            core::ptr::from_mut(ctx)
        }
        v @ 32..=47 => handle_irq(ctx, (v - 32) as u8),
        v if v == u32::from(SYSCALL_VECTOR) => crate::syscall::dispatch(ctx),
        other => {
            serial_println!("[interrupts] unhandled vector {}", other);
            core::ptr::from_mut(ctx)
        }
    }
}

fn handle_exception(ctx: &Context) {
    let exception = ctx.vector;
    match exception {
        v if v == Exception::Breakpoint as u32 => {
            serial_println!("[interrupts] breakpoint at {:#x}", { ctx.eip });
        }
        v if v == Exception::DoubleFault as u32 => {
            panic!("double fault, error_code={:#x} eip={:#x}", { ctx.error_code }, { ctx.eip });
        }
        v if v == Exception::PageFault as u32 => handle_page_fault(ctx),
        v if v == Exception::GeneralProtectionFault as u32 => {
            fault_current_task("general protection fault", ctx);
        }
        v if v == Exception::InvalidOpcode as u32 => {
            fault_current_task("invalid opcode", ctx);
        }
        _ => {
            fault_current_task("unhandled CPU exception", ctx);
        }
    }
}

fn handle_page_fault(ctx: &Context) {
    let faulting_address = arch::read_cr2();
    let resolved = crate::mm::paging::handle_page_fault(faulting_address, ctx.error_code);
    if !resolved {
        fault_current_task("unresolved page fault", ctx);
    }
}

/// Terminates the task owning the current thread, per spec §7.2: a
/// user-mode fault is task termination, not a kernel panic, unless it
/// happened while still in ring 0 on behalf of the kernel itself.
fn fault_current_task(reason: &str, ctx: &Context) {
    if !ctx.targets_user_mode() && ctx.cs as u16 == KERNEL_CODE_SELECTOR {
        panic!("kernel-mode fault: {reason}, eip={:#x}", { ctx.eip });
    }
    serial_println!(
        "[interrupts] terminating task: {} (eip={:#x})",
        reason,
        { ctx.eip },
    );
    if let Some(task) = task::scheduler::current_task() {
        let task_id = task.lock().id;
        task::scheduler::terminate_task(task_id, 1);
    }
}

fn handle_irq(ctx: &mut Context, line: u8) -> *mut Context {
    // SAFETY: EOI must be sent regardless of whether a port is routed,
    // or the PIC stops delivering further interrupts on this line.
    unsafe {
        PICS.lock().notify_end_of_interrupt(PIC_1_OFFSET + line);
    }

    crate::irq::router::on_hardware_irq(line);

    if line == 0 {
        task::timer::on_tick();
        return task::scheduler::timer_tick(core::ptr::from_mut(ctx));
    }
    if line == 1 {
        crate::devices::input::keyboard::on_scancode_irq();
    }

    core::ptr::from_mut(ctx)
}
