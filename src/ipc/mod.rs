//! Named-port IPC: bounded queues, blocking receive, handle transfer
//! (spec §4.5).

pub mod handle;
pub mod port;
