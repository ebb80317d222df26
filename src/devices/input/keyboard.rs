//! PS/2 keyboard IRQ handling, decoding scancodes into [`super::Event`]s
//! and pushing them through the input device registry.
//!
//! Grounded on the teacher's `keyboard_interrupt_handler` (raw port 0x60
//! read + `pc_keyboard::Keyboard` decode), adapted from its async
//! `add_scancode`/stream-waker plumbing to this kernel's synchronous
//! registry + wait-queue model.

use lazy_static::lazy_static;
use pc_keyboard::{layouts, DecodedKey, HandleControl, Keyboard, KeyEvent, KeyState, ScancodeSet1};
use spin::Mutex;

use crate::arch::Port;
use crate::devices::input::{self, Event, InputFlags, InputInfo};
use crate::task::TaskId;

const DATA_PORT: u16 = 0x60;

lazy_static! {
    static ref KEYBOARD: Mutex<Keyboard<layouts::Us104Key, ScancodeSet1>> =
        Mutex::new(Keyboard::new(ScancodeSet1::new(), layouts::Us104Key, HandleControl::Ignore));
}

static DEVICE_ID: Mutex<Option<u32>> = Mutex::new(None);

/// Registers the built-in PS/2 keyboard as input device 0, owned by the
/// kernel itself, and marks it Ready — there is no driver task to `Bind`.
pub fn init() {
    let id = input::register(
        TaskId(0),
        InputInfo {
            device_type: 0,
            flags: InputFlags::empty(),
            device_index: 0,
        },
    );
    let _ = input::open(id);
    *DEVICE_ID.lock() = Some(id);
}

fn modifiers_from(event: &KeyEvent) -> u32 {
    u32::from(event.state == KeyState::Down)
}

/// Called from the IRQ1 handler: reads the scancode byte and, once a full
/// key event has been decoded, pushes it onto the keyboard's input
/// registry entry.
pub fn on_scancode_irq() {
    let Some(id) = *DEVICE_ID.lock() else {
        return;
    };

    let mut port = Port::<u8>::new(DATA_PORT);
    // SAFETY: reading the PS/2 controller's well-known data port in
    // response to its own IRQ.
    let scancode = unsafe { port.read() };

    let mut keyboard = KEYBOARD.lock();
    let Ok(Some(key_event)) = keyboard.add_byte(scancode) else {
        return;
    };
    let modifiers = modifiers_from(&key_event);
    let decoded = keyboard.process_keyevent(key_event);

    let (ascii, unicode) = match decoded {
        Some(DecodedKey::Unicode(c)) => (if c.is_ascii() { c as u8 } else { 0 }, c as u32),
        Some(DecodedKey::RawKey(_)) | None => (0, 0),
    };

    let event = Event {
        event_type: u32::from(key_event.state == KeyState::Down),
        device_id: id,
        key_code: key_event.code as u32,
        modifiers,
        ascii,
        unicode,
    };
    let _ = input::push_event(id, event);
}
