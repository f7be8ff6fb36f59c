//! Watched stream sessions and the registry that owns them.
//!
//! A session exists for every descriptor whose stream was opened through an
//! intercepted entry point and matched the watch policy. The logical offset
//! and the scratch buffer are mutated only while the session's descriptor
//! critical section is held.

use crate::mode::CapabilityMode;
use crate::sync::DescriptorMutex;
use libc::c_int;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug)]
pub struct Session {
    pub fd: c_int,
    pub mode: CapabilityMode,
    /// Bytes made visible to the caller since registration (or the last seek),
    /// used as the corruption engine's position key.
    offset: i64,
    /// Backing store for BSD `fgetln` results; valid until the next read.
    pub(crate) scratch: Vec<u8>,
}

impl Session {
    pub fn new(fd: c_int, mode: CapabilityMode) -> Self {
        Self {
            fd,
            mode,
            offset: 0,
            scratch: Vec::new(),
        }
    }

    #[inline]
    pub fn position(&self) -> i64 {
        self.offset
    }

    #[inline]
    pub fn set_position(&mut self, offset: i64) {
        self.offset = offset;
    }

    #[inline]
    pub fn advance_position(&mut self, delta: i64) {
        self.offset = self.offset.wrapping_add(delta);
    }
}

pub type SessionSlot = DescriptorMutex<Session>;

/// Descriptor-keyed registry of watched sessions.
#[derive(Default)]
pub struct SessionTable {
    slots: RwLock<HashMap<c_int, Arc<SessionSlot>>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start watching `fd` with a fresh session. Any previous session for the
    /// same descriptor is dropped.
    pub fn register(&self, fd: c_int, mode: CapabilityMode) {
        if fd < 0 {
            return;
        }
        let slot = Arc::new(DescriptorMutex::new(Session::new(fd, mode)));
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(fd, slot);
    }

    pub fn unregister(&self, fd: c_int) -> bool {
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&fd)
            .is_some()
    }

    pub fn get(&self, fd: c_int) -> Option<Arc<SessionSlot>> {
        if fd < 0 {
            return None;
        }
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&fd)
            .cloned()
    }

    pub fn is_watched(&self, fd: c_int) -> bool {
        self.get(fd).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_unregister() {
        let table = SessionTable::new();
        assert!(!table.is_watched(3));
        table.register(3, CapabilityMode::Differential);
        assert!(table.is_watched(3));
        assert_eq!(table.len(), 1);
        assert!(table.unregister(3));
        assert!(!table.unregister(3));
        assert!(table.is_empty());
    }

    #[test]
    fn negative_descriptors_are_never_watched() {
        let table = SessionTable::new();
        table.register(-1, CapabilityMode::Differential);
        assert!(table.is_empty());
        assert!(table.get(-1).is_none());
    }

    #[test]
    fn reregistration_resets_offset() {
        let table = SessionTable::new();
        table.register(5, CapabilityMode::CharacterReplay);
        table.get(5).unwrap().lock().set_position(40);
        table.register(5, CapabilityMode::CharacterReplay);
        assert_eq!(table.get(5).unwrap().lock().position(), 0);
    }

    #[test]
    fn offset_mutators() {
        let mut s = Session::new(4, CapabilityMode::Differential);
        s.advance_position(10);
        s.advance_position(-1);
        assert_eq!(s.position(), 9);
        s.set_position(90);
        assert_eq!(s.position(), 90);
    }
}
