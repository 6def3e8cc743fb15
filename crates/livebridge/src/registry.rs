//! Id-based session registry for hosts that only pass integers around.
//!
//! Slots are reused, but every reuse bumps the slot's generation, so an id
//! kept after [`SessionRegistry::free_session`] fails with `NotFound` instead
//! of reaching whichever session took its place.

use std::fmt;
use std::sync::OnceLock;

use parking_lot::Mutex;

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::layout::{Role, SharedRecord};
use crate::lookat::LookAtVectors;
use crate::session::Session;
use crate::timeline::TimelineSync;

/// Generation-checked session handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId {
    pub index: u32,
    pub generation: u32,
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.index, self.generation)
    }
}

struct Slot {
    generation: u32,
    session: Option<Session>,
}

/// Arena of sessions.
#[derive(Default)]
pub struct SessionRegistry {
    config: BridgeConfig,
    slots: Vec<Slot>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sessions created from now on use `config`.
    pub fn with_config(config: BridgeConfig) -> Self {
        Self {
            config,
            slots: Vec::new(),
        }
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.session.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocate a session, reusing the first free slot.
    pub fn new_session(&mut self) -> SessionId {
        let session = Session::with_config(self.config.clone());

        if let Some(index) = self.slots.iter().position(|s| s.session.is_none()) {
            let slot = &mut self.slots[index];
            slot.generation = slot.generation.wrapping_add(1);
            slot.session = Some(session);
            let id = SessionId {
                index: index as u32,
                generation: slot.generation,
            };
            tracing::debug!(%id, "session reused slot");
            return id;
        }

        self.slots.push(Slot {
            generation: 0,
            session: Some(session),
        });
        let id = SessionId {
            index: (self.slots.len() - 1) as u32,
            generation: 0,
        };
        tracing::debug!(%id, "session created");
        id
    }

    /// Close and drop the session. The slot becomes reusable.
    pub fn free_session(&mut self, id: SessionId) -> Result<()> {
        let slot = self.slot_mut(id)?;
        slot.session = None;
        tracing::debug!(%id, "session freed");
        Ok(())
    }

    fn slot_mut(&mut self, id: SessionId) -> Result<&mut Slot> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation && s.session.is_some())
            .ok_or_else(|| BridgeError::NotFound(format!("session {id}")))
    }

    /// Resolve `id`, optionally requiring an open transport.
    pub fn lookup(&self, id: SessionId, require_open: bool) -> Result<&Session> {
        let session = self
            .slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.session.as_ref())
            .ok_or_else(|| BridgeError::NotFound(format!("session {id}")))?;
        if require_open && !session.is_open() {
            return Err(BridgeError::NotFound(format!("open session {id}")));
        }
        Ok(session)
    }

    pub fn lookup_mut(&mut self, id: SessionId, require_open: bool) -> Result<&mut Session> {
        let session = self
            .slot_mut(id)?
            .session
            .as_mut()
            .ok_or_else(|| BridgeError::NotFound(format!("session {id}")))?;
        if require_open && !session.is_open() {
            return Err(BridgeError::NotFound(format!("open session {id}")));
        }
        Ok(session)
    }

    pub fn open(&mut self, id: SessionId, pair: &str, role: Role) -> Result<()> {
        self.lookup_mut(id, false)?.open(pair, role)
    }

    pub fn close(&mut self, id: SessionId) -> Result<()> {
        self.lookup_mut(id, false)?.close();
        Ok(())
    }

    /// `NotOpen` for a live session whose transport is closed.
    pub fn commit(&mut self, id: SessionId, auto_finish: bool) -> Result<()> {
        self.lookup_mut(id, false)?.commit(auto_finish)
    }

    pub fn manual_finish(&self, id: SessionId) -> Result<()> {
        self.lookup(id, false)?.manual_finish()
    }

    pub fn record(&self, id: SessionId) -> Result<&SharedRecord> {
        Ok(self.lookup(id, true)?.record())
    }

    pub fn record_mut(&mut self, id: SessionId) -> Result<&mut SharedRecord> {
        Ok(self.lookup_mut(id, true)?.record_mut())
    }

    pub fn timeline(&self, id: SessionId) -> Result<&TimelineSync> {
        Ok(self.lookup(id, true)?.timeline())
    }

    pub fn timeline_mut(&mut self, id: SessionId) -> Result<&mut TimelineSync> {
        Ok(self.lookup_mut(id, true)?.timeline_mut())
    }

    pub fn set_look_at_vectors(&mut self, id: SessionId, vectors: LookAtVectors) -> Result<()> {
        self.lookup_mut(id, false)?.set_look_at_vectors(vectors);
        Ok(())
    }

    pub fn look_at_vectors(&self, id: SessionId) -> Result<LookAtVectors> {
        Ok(self.lookup(id, false)?.look_at_vectors())
    }

    pub fn set_has_new_sync(&mut self, id: SessionId, value: bool) -> Result<()> {
        self.lookup_mut(id, false)?.set_has_new_sync(value);
        Ok(())
    }

    pub fn has_new_sync(&self, id: SessionId) -> Result<bool> {
        Ok(self.lookup(id, false)?.has_new_sync())
    }

    pub fn get_and_reset_has_new_sync(&mut self, id: SessionId) -> Result<bool> {
        Ok(self.lookup_mut(id, false)?.get_and_reset_has_new_sync())
    }

    pub fn set_sync_saved(&mut self, id: SessionId, value: bool) -> Result<()> {
        self.lookup_mut(id, false)?.set_sync_saved(value);
        Ok(())
    }

    pub fn sync_saved(&self, id: SessionId) -> Result<bool> {
        Ok(self.lookup(id, false)?.sync_saved())
    }
}

/// Process-wide registry for hosts that cannot own one.
pub fn global() -> &'static Mutex<SessionRegistry> {
    static REGISTRY: OnceLock<Mutex<SessionRegistry>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(SessionRegistry::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_dense_and_slots_reused() {
        let mut registry = SessionRegistry::new();
        let a = registry.new_session();
        let b = registry.new_session();
        let c = registry.new_session();
        assert_eq!((a.index, b.index, c.index), (0, 1, 2));

        registry.free_session(b).unwrap();
        assert_eq!(registry.len(), 2);
        // c stays valid after an earlier slot is freed.
        assert!(registry.lookup(c, false).is_ok());

        let d = registry.new_session();
        assert_eq!(d.index, 1);
        assert_ne!(d.generation, b.generation);
    }

    #[test]
    fn stale_ids_are_rejected() {
        let mut registry = SessionRegistry::new();
        let a = registry.new_session();
        registry.free_session(a).unwrap();
        let _b = registry.new_session();

        assert!(matches!(registry.lookup(a, false), Err(BridgeError::NotFound(_))));
        assert!(matches!(registry.free_session(a), Err(BridgeError::NotFound(_))));
        assert!(matches!(registry.set_sync_saved(a, true), Err(BridgeError::NotFound(_))));
    }

    #[test]
    fn out_of_range_id_is_not_found() {
        let registry = SessionRegistry::new();
        let id = SessionId {
            index: 9,
            generation: 0,
        };
        assert!(matches!(registry.lookup(id, false), Err(BridgeError::NotFound(_))));
    }

    #[test]
    fn require_open_filters_closed_sessions() {
        let mut registry = SessionRegistry::new();
        let id = registry.new_session();

        assert!(registry.lookup(id, false).is_ok());
        assert!(matches!(registry.lookup(id, true), Err(BridgeError::NotFound(_))));
        assert!(registry.record(id).is_err());
        assert!(registry.timeline_mut(id).is_err());
        // Look-at state is reachable without a transport.
        registry.set_has_new_sync(id, true).unwrap();
        assert!(registry.get_and_reset_has_new_sync(id).unwrap());
        assert!(!registry.has_new_sync(id).unwrap());
    }

    #[test]
    fn commit_on_closed_session_is_not_open() {
        let mut registry = SessionRegistry::new();
        let id = registry.new_session();
        assert!(matches!(registry.commit(id, true), Err(BridgeError::NotOpen)));
        assert!(matches!(registry.manual_finish(id), Err(BridgeError::NotOpen)));
    }

    #[test]
    fn global_registry_is_shared() {
        let id = global().lock().new_session();
        assert!(global().lock().lookup(id, false).is_ok());
        global().lock().free_session(id).unwrap();
    }
}
