//! Hardware IRQ -> IPC message routing (spec §4.6).

use spin::Mutex;

use crate::arch::Port;
use crate::error::{KernelError, KernelResult};
use crate::ipc::port::{self, Message, PortId};
use crate::kwarn;
use crate::task::TaskId;

const PIC1_DATA: u16 = 0x21;
const PIC2_DATA: u16 = 0xA1;

#[derive(Clone, Copy)]
struct Route {
    port: Option<PortId>,
    pending: u32,
    dropped: u32,
}

const NO_ROUTE: Route = Route {
    port: None,
    pending: 0,
    dropped: 0,
};

static ROUTES: Mutex<[Route; 16]> = Mutex::new([NO_ROUTE; 16]);

/// Registers `port` as the destination for hardware IRQ `line`. Privilege
/// (coordinator-only) is enforced by the syscall layer, not here.
pub fn register(line: u8, port: PortId) -> KernelResult<()> {
    let routes = &mut ROUTES.lock();
    let route = routes.get_mut(line as usize).ok_or(KernelError::InvalidAddress)?;
    route.port = Some(port);
    Ok(())
}

/// Removes any route on `line`.
pub fn unregister(line: u8) -> KernelResult<()> {
    let routes = &mut ROUTES.lock();
    let route = routes.get_mut(line as usize).ok_or(KernelError::InvalidAddress)?;
    route.port = None;
    Ok(())
}

fn mask_port(line: u8) -> (Port<u8>, u8) {
    if line < 8 {
        (Port::new(PIC1_DATA), line)
    } else {
        (Port::new(PIC2_DATA), line - 8)
    }
}

/// Unmasks `line` at the PIC.
pub fn enable(line: u8) {
    let (mut port, bit) = mask_port(line);
    // SAFETY: reading/writing the legacy PIC's mask register through its
    // well-known data port; no aliasing with kernel memory.
    unsafe {
        let mask = port.read();
        port.write(mask & !(1 << bit));
    }
}

/// Masks `line` at the PIC.
pub fn disable(line: u8) {
    let (mut port, bit) = mask_port(line);
    // SAFETY: see `enable`.
    unsafe {
        let mask = port.read();
        port.write(mask | (1 << bit));
    }
}

/// Called by the generic IRQ handler (after EOI) for every hardware
/// interrupt on `line`. Synthesizes the fixed-shape `{op=0, irqLine,
/// portId, replyPortId=0, data=0}` message and delivers it via the normal
/// Send path; a full queue is a drop, not a failure the ISR can surface.
pub fn on_hardware_irq(line: u8) {
    let target = {
        let mut routes = ROUTES.lock();
        let route = &mut routes[line as usize];
        route.pending += 1;
        route.port
    };

    let Some(port_id) = target else {
        return;
    };
    let Some(port) = port::lookup(port_id) else {
        return;
    };

    let mut message = Message::empty(TaskId(0));
    let fields: [u32; 4] = [0, u32::from(line), port_id.0, 0];
    message.length = fields.len() * size_of::<u32>();
    for (i, field) in fields.iter().enumerate() {
        message.payload[i * 4..i * 4 + 4].copy_from_slice(&field.to_le_bytes());
    }

    if port.send(message).is_err() {
        let mut routes = ROUTES.lock();
        routes[line as usize].dropped += 1;
        kwarn!("irq: dropped IRQ{} message, port {} queue full", line, port_id.0);
    }
}

use core::mem::size_of;

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn register_then_unregister_clears_route() {
        register(6, PortId(42)).unwrap();
        {
            let routes = ROUTES.lock();
            assert_eq!(routes[6].port, Some(PortId(42)));
        }
        unregister(6).unwrap();
        let routes = ROUTES.lock();
        assert_eq!(routes[6].port, None);
    }
}
