//! Exercises the testable property spec §8 calls out by name:
//! `IPC.Send(p, m); IPC.Receive(p) == m` when exactly one sender and one
//! receiver exist on `p`, including full payload bytes and handle
//! transfer.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(quantum::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

mod common;

use core::panic::PanicInfo;

use quantum::ipc::handle::Rights;
use quantum::ipc::port::{self, HandleTransfer, Message};
use quantum::task::TaskId;

/// Reached once `common`'s trampoline has a valid stack and
/// `boot_info_phys` names a live `BootInfo` record.
#[unsafe(no_mangle)]
pub extern "C" fn kernel_test_main(boot_info_phys: u32) -> ! {
    // SAFETY: first and only call in this binary, before anything else
    // touches memory management.
    unsafe {
        common::init_memory(boot_info_phys);
    }

    test_main();

    #[expect(
        clippy::empty_loop,
        reason = "Infinite loop after the test main function is done."
    )]
    loop {}
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    quantum::test_panic_handler(info)
}

#[test_case]
fn when_sending_with_no_waiter_then_receive_returns_the_same_payload() {
    let owner = TaskId(1);
    let port = port::create_port(owner, 4);

    let mut message = Message::empty(owner);
    message.length = 5;
    message.payload[..5].copy_from_slice(b"hello");

    port.send(message).expect("send into a non-full queue must succeed");

    let received = port.try_receive().expect("a queued message must be receivable");
    assert_eq!(received.length, 5);
    assert_eq!(&received.payload[..5], b"hello");
    assert_eq!(received.sender, owner);
}

#[test_case]
fn when_queue_is_full_then_send_fails_with_queue_full() {
    let owner = TaskId(2);
    let port = port::create_port(owner, 1);

    let mut message = Message::empty(owner);
    message.length = 1;
    message.payload[0] = 0x42;

    port.send(message).expect("first send into an empty capacity-1 queue must succeed");
    let err = port.send(message).expect_err("second send into a full queue must fail");
    assert_eq!(err, quantum::error::KernelError::QueueFull);
}

#[test_case]
fn when_message_carries_a_handle_then_it_survives_the_round_trip() {
    let owner = TaskId(3);
    let port = port::create_port(owner, 4);
    let target = port::create_port(owner, 1);

    let mut message = Message::empty(owner);
    message.length = 1;
    message.payload[0] = 0xFF;
    message.handle = Some(HandleTransfer { target_port: target.id, rights: Rights::SEND });

    port.send(message).expect("send must succeed");
    let received = port.try_receive().expect("message must be receivable");
    let transfer = received.handle.expect("handle transfer must survive the round trip");
    assert_eq!(transfer.target_port, target.id);
    assert_eq!(transfer.rights, Rights::SEND);
}

#[test_case]
fn destroying_a_port_empties_its_queue() {
    let owner = TaskId(4);
    let port = port::create_port(owner, 4);

    let mut message = Message::empty(owner);
    message.length = 1;
    port.send(message).expect("send must succeed");

    port::destroy_port(port.id, owner).expect("owner must be able to destroy its own port");
    assert!(port::lookup(port.id).is_none(), "destroyed port must no longer be looked up");
}
