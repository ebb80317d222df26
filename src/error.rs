//! The kernel-wide error enum (spec §9 design notes).
//!
//! In-kernel fallible operations return `Result<T, KernelError>`; the
//! syscall dispatcher flattens that down to the `u32` status code the
//! syscall ABI documents (spec §6: "0 on success unless documented
//! otherwise").

use core::fmt;

/// Every way a core operation can fail without it being a kernel bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// No physical frame was available.
    OutOfMemory,
    /// A physical or virtual address was misaligned, out of range, or
    /// already in the state the caller expected it not to be in.
    InvalidAddress,
    /// A handle did not name any object known to the calling task.
    BadHandle,
    /// A handle did not carry the rights the operation requires.
    PermissionDenied,
    /// A syscall that requires coordinator identity was called by a
    /// non-coordinator task.
    NotCoordinator,
    /// A named port/device/task/bundle entry does not exist.
    NotFound,
    /// A port's queue was full; the send was rejected rather than blocked.
    QueueFull,
    /// A message was zero-length or exceeded `MAX_PAYLOAD_BYTES`.
    MessageTooLarge,
    /// A blocking operation's timeout elapsed before it completed.
    TimedOut,
    /// The target device/port/task does not accept the requested operation
    /// in its current state (e.g. write to a read-only block device).
    InvalidOperation,
    /// An ELF/init-bundle image failed validation.
    MalformedImage,
    /// A resource already exists / is already bound.
    AlreadyExists,
}

impl KernelError {
    /// Maps this error to the `u32` syscall status code. Every non-zero
    /// value is a distinct, stable code so user-mode can branch on it.
    #[must_use]
    pub const fn to_syscall_status(self) -> u32 {
        match self {
            Self::OutOfMemory => 1,
            Self::InvalidAddress => 2,
            Self::BadHandle => 3,
            Self::PermissionDenied => 4,
            Self::NotCoordinator => 5,
            Self::NotFound => 6,
            Self::QueueFull => 7,
            Self::MessageTooLarge => 8,
            Self::TimedOut => 9,
            Self::InvalidOperation => 10,
            Self::MalformedImage => 11,
            Self::AlreadyExists => 12,
        }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::OutOfMemory => "out of memory",
            Self::InvalidAddress => "invalid address",
            Self::BadHandle => "bad handle",
            Self::PermissionDenied => "permission denied",
            Self::NotCoordinator => "coordinator privilege required",
            Self::NotFound => "not found",
            Self::QueueFull => "queue full",
            Self::MessageTooLarge => "message too large",
            Self::TimedOut => "timed out",
            Self::InvalidOperation => "invalid operation",
            Self::MalformedImage => "malformed image",
            Self::AlreadyExists => "already exists",
        };
        f.write_str(message)
    }
}

/// Convenience alias used throughout the core.
pub type KernelResult<T> = Result<T, KernelError>;
