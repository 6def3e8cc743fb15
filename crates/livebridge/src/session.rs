//! A bridge session: the shadow record, its arbiters and an optional open
//! transport.
//!
//! The caller mutates the shadow between commits; only [`Session::commit`]
//! moves data across the process boundary.

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::index::NameIndex;
use crate::layout::{JointData, PropertyData, Role, SharedRecord, MAX_JOINTS, MAX_PROPERTIES};
use crate::lookat::{LookAtSync, LookAtVectors};
use crate::segment::Turn;
use crate::timeline::TimelineSync;
use crate::transport::{self, PeerTransport};

/// Per-session state a transport reads and writes during a commit.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    /// The shadow record.
    pub record: SharedRecord,
    pub timeline: TimelineSync,
    pub look_at: LookAtSync,
}

pub struct Session {
    config: BridgeConfig,
    state: SessionState,
    transport: Option<Box<dyn PeerTransport>>,
    joint_index: NameIndex,
    property_index: NameIndex,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self::with_config(BridgeConfig::default())
    }

    pub fn with_config(config: BridgeConfig) -> Self {
        Self {
            config,
            state: SessionState::default(),
            transport: None,
            joint_index: NameIndex::with_capacity(MAX_JOINTS),
            property_index: NameIndex::with_capacity(MAX_PROPERTIES),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Open the transport for `pair`. An already-open transport is closed first.
    pub fn open(&mut self, pair: &str, role: Role) -> Result<()> {
        if self.transport.is_some() {
            tracing::info!(pair, "reopening, closing previous transport");
            self.close();
        }
        self.transport = Some(transport::open(&self.config, pair, role)?);
        Ok(())
    }

    /// Release the transport. Idempotent.
    pub fn close(&mut self) {
        self.transport = None;
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    pub fn role(&self) -> Option<Role> {
        self.transport.as_ref().map(|t| t.role())
    }

    pub fn pair_name(&self) -> Option<&str> {
        self.transport.as_ref().map(|t| t.names().pair.as_str())
    }

    /// Turn token state of the open segment.
    pub fn turn(&self) -> Option<Turn> {
        self.transport.as_ref().map(|t| t.turn())
    }

    /// Exchange the shadow with the peer if it is this side's turn.
    ///
    /// [`BridgeError::WouldBlock`] means "try again next tick".
    pub fn commit(&mut self, auto_finish: bool) -> Result<()> {
        let transport = self.transport.as_mut().ok_or(BridgeError::NotOpen)?;
        transport.commit(&mut self.state, auto_finish)?;
        self.reindex();
        Ok(())
    }

    /// Hand the turn to the peer after a commit made with `auto_finish = false`.
    pub fn manual_finish(&self) -> Result<()> {
        self.transport
            .as_ref()
            .ok_or(BridgeError::NotOpen)?
            .finish()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// The shadow record.
    pub fn record(&self) -> &SharedRecord {
        &self.state.record
    }

    /// Mutable shadow record. Call [`Session::reindex`] after changing hashes
    /// directly, or use [`Session::set_joints`].
    pub fn record_mut(&mut self) -> &mut SharedRecord {
        &mut self.state.record
    }

    pub fn set_joints(&mut self, joints: &[JointData]) -> usize {
        let stored = self.state.record.set_joints(joints);
        self.reindex();
        stored
    }

    pub fn set_properties(&mut self, properties: &[PropertyData]) -> usize {
        let stored = self.state.record.set_properties(properties);
        self.reindex();
        stored
    }

    /// Rebuild the name lookup tables from the shadow record.
    pub fn reindex(&mut self) {
        let record = &self.state.record;
        self.joint_index
            .rebuild(record.joints().iter().map(|j| j.name_hash));
        self.property_index
            .rebuild(record.properties().iter().map(|p| p.name_hash));
    }

    /// Joint with the given name hash.
    pub fn find_joint(&self, name_hash: u32) -> Option<&JointData> {
        let joints = self.state.record.joints();
        match self.joint_index.get(name_hash).and_then(|i| joints.get(i)) {
            Some(joint) if joint.name_hash == name_hash => Some(joint),
            // Stale index after a direct record edit.
            _ => joints.iter().find(|j| j.name_hash == name_hash),
        }
    }

    /// Property with the given name hash.
    pub fn find_property(&self, name_hash: u32) -> Option<&PropertyData> {
        let properties = self.state.record.properties();
        match self.property_index.get(name_hash).and_then(|i| properties.get(i)) {
            Some(property) if property.name_hash == name_hash => Some(property),
            _ => properties.iter().find(|p| p.name_hash == name_hash),
        }
    }

    pub fn timeline(&self) -> &TimelineSync {
        &self.state.timeline
    }

    pub fn timeline_mut(&mut self) -> &mut TimelineSync {
        &mut self.state.timeline
    }

    pub fn set_look_at_vectors(&mut self, vectors: LookAtVectors) {
        self.state.look_at.vectors = vectors;
    }

    pub fn look_at_vectors(&self) -> LookAtVectors {
        self.state.look_at.vectors
    }

    pub fn set_has_new_sync(&mut self, value: bool) {
        self.state.look_at.has_new_sync = value;
    }

    pub fn has_new_sync(&self) -> bool {
        self.state.look_at.has_new_sync
    }

    /// One-shot: true once per received sync signal.
    pub fn get_and_reset_has_new_sync(&mut self) -> bool {
        self.state.look_at.get_and_reset_has_new_sync()
    }

    /// Arm the outgoing sync signal for the next commit.
    pub fn set_sync_saved(&mut self, value: bool) {
        self.state.look_at.sync_saved = value;
    }

    pub fn sync_saved(&self) -> bool {
        self.state.look_at.sync_saved
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("pair", &self.pair_name())
            .field("role", &self.role())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::name_hash;

    fn joint(name: &str, x: f32) -> JointData {
        let mut joint = JointData {
            name_hash: name_hash(name),
            ..Default::default()
        };
        joint.transform.translation = [x, 0.0, 0.0];
        joint
    }

    #[test]
    fn closed_session_reports_not_open() {
        let mut session = Session::new();
        assert!(!session.is_open());
        assert!(matches!(session.commit(true), Err(BridgeError::NotOpen)));
        assert!(matches!(session.manual_finish(), Err(BridgeError::NotOpen)));
        assert_eq!(session.role(), None);
        session.close();
        session.close();
    }

    #[test]
    fn invalid_pair_name_leaves_session_closed() {
        let mut session = Session::new();
        let err = session.open("", Role::Server).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidName { .. }));
        assert!(!session.is_open());
    }

    #[test]
    fn find_joint_uses_name_hash_not_position() {
        let mut session = Session::new();
        session.set_joints(&[joint("Hips", 1.0), joint("Spine", 2.0), joint("Head", 3.0)]);

        let head = session.find_joint(name_hash("Head")).unwrap();
        assert_eq!(head.transform.translation[0], 3.0);
        assert!(session.find_joint(name_hash("Tail")).is_none());
    }

    #[test]
    fn find_joint_survives_direct_edits() {
        let mut session = Session::new();
        session.set_joints(&[joint("Hips", 1.0), joint("Spine", 2.0)]);

        session.record_mut().joints.swap(0, 1);
        assert_eq!(
            session.find_joint(name_hash("Hips")).unwrap().transform.translation[0],
            1.0
        );

        session.record_mut().header.model_count = 1;
        assert!(session.find_joint(name_hash("Hips")).is_none());
    }

    #[test]
    fn find_property() {
        let mut session = Session::new();
        session.set_properties(&[
            PropertyData { name_hash: name_hash("blink"), value: 0.25 },
            PropertyData { name_hash: name_hash("smile"), value: 0.75 },
        ]);
        assert_eq!(session.find_property(name_hash("smile")).unwrap().value, 0.75);
        assert!(session.find_property(name_hash("frown")).is_none());
    }

    #[test]
    fn sync_accessors() {
        let mut session = Session::new();
        session.set_sync_saved(true);
        assert!(session.sync_saved());

        session.set_has_new_sync(true);
        assert!(session.has_new_sync());
        assert!(session.get_and_reset_has_new_sync());
        assert!(!session.get_and_reset_has_new_sync());

        let vectors = LookAtVectors {
            root: [1.0, 2.0, 3.0, 0.0],
            ..Default::default()
        };
        session.set_look_at_vectors(vectors);
        assert_eq!(session.look_at_vectors(), vectors);
    }
}
