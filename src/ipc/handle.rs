//! Per-task handle tables (spec §3 "Handle").

use alloc::vec::Vec;
use bitflags::bitflags;

use crate::error::{KernelError, KernelResult};
use crate::ipc::port::PortId;

bitflags! {
    /// Rights a handle may carry over the object it names.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Rights: u32 {
        const SEND = 1 << 0;
        const RECEIVE = 1 << 1;
        const MANAGE = 1 << 2;
    }
}

/// What kind of kernel object a handle names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Object {
    Port(PortId),
    Device(u32),
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    object: Object,
    rights: Rights,
}

/// A task-scoped table mapping small integer handle ids to kernel objects.
#[derive(Default)]
pub struct HandleTable {
    slots: Vec<Option<Entry>>,
}

/// Opaque per-task handle id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleId(pub u32);

impl HandleTable {
    #[must_use]
    pub const fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Inserts a fresh handle, reusing a closed slot if one exists.
    pub fn insert(&mut self, object: Object, rights: Rights) -> HandleId {
        let entry = Entry { object, rights };
        if let Some(index) = self.slots.iter().position(Option::is_none) {
            self.slots[index] = Some(entry);
            return HandleId(index as u32);
        }
        self.slots.push(Some(entry));
        HandleId((self.slots.len() - 1) as u32)
    }

    /// Returns the object and rights of `handle`, or `BadHandle`.
    pub fn query(&self, handle: HandleId) -> KernelResult<(Object, Rights)> {
        self.slots
            .get(handle.0 as usize)
            .and_then(Option::as_ref)
            .map(|e| (e.object, e.rights))
            .ok_or(KernelError::BadHandle)
    }

    /// Checks `handle` both exists and carries every bit of `required`.
    pub fn check_rights(&self, handle: HandleId, required: Rights) -> KernelResult<Object> {
        let (object, rights) = self.query(handle)?;
        if !rights.contains(required) {
            return Err(KernelError::PermissionDenied);
        }
        Ok(object)
    }

    /// Closes a handle, dropping one reference (spec §3 "Handle").
    pub fn close(&mut self, handle: HandleId) -> KernelResult<Object> {
        let slot = self
            .slots
            .get_mut(handle.0 as usize)
            .ok_or(KernelError::BadHandle)?;
        slot.take().map(|e| e.object).ok_or(KernelError::BadHandle)
    }

    /// Duplicates a handle with a rights subset (never wider than the
    /// original), per `Handle_Dup`.
    pub fn duplicate(&mut self, handle: HandleId, rights: Rights) -> KernelResult<HandleId> {
        let (object, existing) = self.query(handle)?;
        if !existing.contains(rights) {
            return Err(KernelError::PermissionDenied);
        }
        Ok(self.insert(object, rights))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn closed_slots_are_reused() {
        let mut table = HandleTable::new();
        let h1 = table.insert(Object::Port(PortId(1)), Rights::SEND);
        table.close(h1).unwrap();
        let h2 = table.insert(Object::Port(PortId(2)), Rights::RECEIVE);
        assert_eq!(h1.0, h2.0);
    }

    #[test_case]
    fn rights_check_rejects_missing_bits() {
        let mut table = HandleTable::new();
        let h = table.insert(Object::Port(PortId(1)), Rights::SEND);
        assert!(table.check_rights(h, Rights::RECEIVE).is_err());
        assert!(table.check_rights(h, Rights::SEND).is_ok());
    }
}
