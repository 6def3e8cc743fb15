//! Two real [`TimelineSync`] arbiters exchanging through an in-process record.
//!
//! Commits follow the transports' order of reads and writes and alternate
//! the way the doorbells allow; both sides may take the very first turn.

use livebridge::{Role, SharedRecord, TimelineSync};

/// Operations on the pair.
#[derive(Debug, Clone)]
pub enum TimelineOp {
    SetLocal { role: Role, time: f64, playing: bool },
    SetOffset { role: Role, offset: f64 },
    Commit { role: Role },
    CheckRemote { role: Role, time: f64, playing: bool },
}

struct Peer {
    sync: TimelineSync,
    /// Commit allowed (own doorbell rung).
    may_commit: bool,
    /// Adopted a seek and has not moved since.
    quiet: bool,
}

impl Peer {
    fn new() -> Self {
        Self {
            sync: TimelineSync::new(),
            may_commit: true,
            quiet: false,
        }
    }
}

pub struct TimelineModel {
    server: Peer,
    client: Peer,
    shared: SharedRecord,
    server_local: SharedRecord,
    client_local: SharedRecord,
}

impl Default for TimelineModel {
    fn default() -> Self {
        Self::new()
    }
}

impl TimelineModel {
    pub fn new() -> Self {
        Self {
            server: Peer::new(),
            client: Peer::new(),
            shared: SharedRecord::default(),
            server_local: SharedRecord::default(),
            client_local: SharedRecord::default(),
        }
    }

    fn peer_mut(&mut self, role: Role) -> &mut Peer {
        match role {
            Role::Server => &mut self.server,
            Role::Client => &mut self.client,
        }
    }

    /// Run one commit for `role`. Returns false when it is not that side's turn.
    pub fn commit(&mut self, role: Role) -> bool {
        if !self.peer_mut(role).may_commit {
            return false;
        }
        match role {
            Role::Server => {
                let sync = &mut self.server.sync;
                sync.read_from_data(Role::Client, &mut self.shared);
                sync.write_to_data(Role::Server, &mut self.server_local);
                self.server_local.client_player = self.shared.client_player;
                self.shared = self.server_local;
            }
            Role::Client => {
                let sync = &mut self.client.sync;
                self.shared.client_player = self.client_local.client_player;
                sync.read_from_data(Role::Server, &mut self.shared);
                sync.write_to_data(Role::Client, &mut self.shared);
                self.client_local = self.shared;
            }
        }
        self.peer_mut(role).may_commit = false;
        self.peer_mut(role.peer()).may_commit = true;
        true
    }

    pub fn sync(&self, role: Role) -> &TimelineSync {
        match role {
            Role::Server => &self.server.sync,
            Role::Client => &self.client.sync,
        }
    }

    pub fn sync_mut(&mut self, role: Role) -> &mut TimelineSync {
        &mut self.peer_mut(role).sync
    }

    pub fn shared(&self) -> &SharedRecord {
        &self.shared
    }
}

/// Execute operations and verify edge delivery, one-shot consumption and
/// that a playing side is never told to seek.
pub fn execute_and_verify(ops: &[TimelineOp]) -> Result<(), String> {
    let mut model = TimelineModel::new();

    for (i, op) in ops.iter().enumerate() {
        match op {
            TimelineOp::SetLocal { role, time, playing } => {
                let peer = model.peer_mut(*role);
                peer.quiet = false;
                peer.sync.set_local_timeline(*time, *playing);

                // INVARIANT: a playing side always claims the timeline
                if *playing && (!peer.sync.is_local_time_changed() || peer.sync.is_remote_time_changed())
                {
                    return Err(format!("op {}: playing {} did not claim the timeline", i, role));
                }
            }
            TimelineOp::SetOffset { role, offset } => {
                model.sync_mut(*role).set_offset_time(*offset);
            }
            TimelineOp::Commit { role } => {
                let reader = model.sync(*role).clone();
                let incoming = *model.shared.player(role.peer());
                let quiet = model.peer_mut(*role).quiet;

                if !model.commit(*role) {
                    continue;
                }
                model.peer_mut(*role).quiet = false;
                let sync = model.sync(*role);

                if incoming.time_changed_event > 0.0 {
                    // INVARIANT: a published edge is picked up with the reader's offset
                    let expected = incoming.local_time + reader.offset_time();
                    if !sync.is_remote_time_changed() || sync.remote_time() != expected {
                        return Err(format!(
                            "op {}: {} missed edge at {} (changed={}, remote={})",
                            i,
                            role,
                            expected,
                            sync.is_remote_time_changed(),
                            sync.remote_time()
                        ));
                    }
                    // INVARIANT: the edge is consumed exactly once
                    if model.shared().player(role.peer()).time_changed_event != 0.0 {
                        return Err(format!("op {}: {} left the peer's edge set", i, role));
                    }
                } else if sync.is_remote_time_changed() != reader.is_remote_time_changed() {
                    return Err(format!("op {}: {} saw an edge nobody published", i, role));
                }

                // INVARIANT: an adopted seek is not echoed back
                let published = model.shared().player(*role).time_changed_event;
                if quiet && published != 0.0 {
                    return Err(format!("op {}: {} echoed an adopted seek", i, role));
                }
            }
            TimelineOp::CheckRemote { role, time, playing } => {
                let peer = model.peer_mut(*role);
                let pending = peer.sync.is_remote_time_changed();
                let remote = peer.sync.remote_time();

                let result = peer.sync.check_for_remote_time_control(*time, *playing);

                if let Some(t) = result {
                    // INVARIANT: a seek only follows a received edge
                    if !pending {
                        return Err(format!("op {}: {} told to seek without an edge", i, role));
                    }
                    // INVARIANT: never seek a playing side
                    if *playing {
                        return Err(format!("op {}: playing {} told to seek to {}", i, role, t));
                    }
                    if t != remote || t == *time {
                        return Err(format!(
                            "op {}: {} seek to {} (remote {}, local {})",
                            i, role, t, remote, time
                        ));
                    }
                }

                // INVARIANT: the check is one-shot
                if peer.sync.is_remote_time_changed()
                    || peer.sync.check_for_remote_time_control(*time, *playing).is_some()
                {
                    return Err(format!("op {}: {} remote change survived the check", i, role));
                }

                if pending && result.is_none() {
                    // The check also latched the caller's play state.
                    peer.quiet = false;
                }
                if let Some(t) = result {
                    peer.sync.set_local_timeline(t, false);
                    if peer.sync.is_local_time_changed() {
                        return Err(format!("op {}: {} re-claimed adopted time {}", i, role, t));
                    }
                    peer.quiet = true;
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_scrub_reaches_stopped_server() {
        let mut model = TimelineModel::new();
        model.commit(Role::Server);
        model.sync_mut(Role::Client).set_local_timeline(3.0, false);
        model.commit(Role::Client);
        model.commit(Role::Server);

        let server = model.sync_mut(Role::Server);
        assert_eq!(server.check_for_remote_time_control(0.0, false), Some(3.0));
        assert_eq!(server.check_for_remote_time_control(0.0, false), None);
    }

    #[test]
    fn test_commits_alternate() {
        let mut model = TimelineModel::new();
        assert!(model.commit(Role::Server));
        assert!(!model.commit(Role::Server));
        assert!(model.commit(Role::Client));
        assert!(!model.commit(Role::Client));
    }

    #[test]
    fn test_offsets_apply_on_both_ends() {
        let ops = vec![
            TimelineOp::SetOffset { role: Role::Server, offset: 2.0 },
            TimelineOp::SetOffset { role: Role::Client, offset: -1.0 },
            TimelineOp::SetLocal { role: Role::Server, time: 5.0, playing: true },
            TimelineOp::Commit { role: Role::Server },
            TimelineOp::Commit { role: Role::Client },
            TimelineOp::CheckRemote { role: Role::Client, time: 0.0, playing: false },
            TimelineOp::Commit { role: Role::Server },
            TimelineOp::Commit { role: Role::Client },
        ];
        execute_and_verify(&ops).unwrap();
    }

    #[test]
    fn test_playing_side_ignores_scrub() {
        let ops = vec![
            TimelineOp::Commit { role: Role::Server },
            TimelineOp::SetLocal { role: Role::Client, time: 8.0, playing: false },
            TimelineOp::Commit { role: Role::Client },
            TimelineOp::Commit { role: Role::Server },
            TimelineOp::CheckRemote { role: Role::Server, time: 1.0, playing: true },
        ];
        execute_and_verify(&ops).unwrap();
    }
}
