//! Two real [`LookAtSync`] states running the pose-sync handshake through an
//! in-process record, alternating commits like the doorbells do.

use livebridge::{LookAtSync, Role, SharedRecord, SyncSignal};

/// Operations on the pair.
#[derive(Debug, Clone)]
pub enum HandshakeOp {
    /// Arm `sync_saved` on one side.
    Save { role: Role },
    /// Move the client's look-at target.
    MoveClient { root: [f32; 3] },
    Commit { role: Role },
    /// Consume one side's `has_new_sync` latch.
    Poll { role: Role },
}

pub struct HandshakeModel {
    server: LookAtSync,
    client: LookAtSync,
    shared: SharedRecord,
    server_local: SharedRecord,
    may_commit: [bool; 2],
}

impl Default for HandshakeModel {
    fn default() -> Self {
        Self::new()
    }
}

fn slot(role: Role) -> usize {
    match role {
        Role::Server => 0,
        Role::Client => 1,
    }
}

impl HandshakeModel {
    pub fn new() -> Self {
        Self {
            server: LookAtSync::default(),
            client: LookAtSync::default(),
            shared: SharedRecord::default(),
            server_local: SharedRecord::default(),
            may_commit: [true; 2],
        }
    }

    pub fn sync_mut(&mut self, role: Role) -> &mut LookAtSync {
        match role {
            Role::Server => &mut self.server,
            Role::Client => &mut self.client,
        }
    }

    /// Returns false when it is not `role`'s turn.
    pub fn commit(&mut self, role: Role) -> bool {
        if !self.may_commit[slot(role)] {
            return false;
        }
        match role {
            Role::Server => {
                self.server.merge_on_server(&self.shared, &mut self.server_local);
                self.shared = self.server_local;
            }
            Role::Client => self.client.publish_on_client(&mut self.shared),
        }
        self.may_commit[slot(role)] = false;
        self.may_commit[slot(role.peer())] = true;
        true
    }

    pub fn signal(&self) -> SyncSignal {
        SyncSignal::from_channel(self.shared.look_at_root[3])
    }
}

/// Execute operations and verify every save request and every answer is
/// latched exactly once by the other side.
pub fn execute_and_verify(ops: &[HandshakeOp]) -> Result<(), String> {
    let mut model = HandshakeModel::new();
    // Latches each side is owed but has not polled yet.
    let mut owed = [false; 2];

    for (i, op) in ops.iter().enumerate() {
        match op {
            HandshakeOp::Save { role } => model.sync_mut(*role).sync_saved = true,
            HandshakeOp::MoveClient { root } => {
                model.client.vectors.root[..3].copy_from_slice(root);
            }
            HandshakeOp::Commit { role } => {
                let armed = model.sync_mut(*role).sync_saved;
                let incoming = model.signal();
                let client_root = model.client.vectors.root;

                if !model.commit(*role) {
                    continue;
                }

                // INVARIANT: the arm lasts for one commit
                if model.sync_mut(*role).sync_saved {
                    return Err(format!("op {}: {} sync_saved survived its commit", i, role));
                }

                let outgoing = model.signal();
                match role {
                    Role::Server => {
                        // INVARIANT: a request is latched and cleared; otherwise an armed server answers
                        let expected = if incoming == SyncSignal::SaveRequest {
                            owed[0] = true;
                            SyncSignal::None
                        } else if armed {
                            SyncSignal::Ready
                        } else {
                            SyncSignal::None
                        };
                        if outgoing != expected {
                            return Err(format!(
                                "op {}: server sent {:?} after {:?} (armed={}), expected {:?}",
                                i, outgoing, incoming, armed, expected
                            ));
                        }
                        // INVARIANT: the server adopts the client's target
                        if model.server.vectors.root[..3] != model.shared.look_at_root[..3] {
                            return Err(format!("op {}: server vectors not merged", i));
                        }
                    }
                    Role::Client => {
                        if incoming == SyncSignal::Ready {
                            owed[1] = true;
                        }
                        // INVARIANT: the client only ever raises a request or nothing
                        let expected = if armed {
                            SyncSignal::SaveRequest
                        } else {
                            SyncSignal::None
                        };
                        if outgoing != expected {
                            return Err(format!(
                                "op {}: client sent {:?} (armed={}), expected {:?}",
                                i, outgoing, armed, expected
                            ));
                        }
                        if model.shared.look_at_root[..3] != client_root[..3] {
                            return Err(format!("op {}: client target not published", i));
                        }
                    }
                }
            }
            HandshakeOp::Poll { role } => {
                let got = model.sync_mut(*role).get_and_reset_has_new_sync();
                // INVARIANT: a latch appears exactly when owed, and only once
                if got != std::mem::take(&mut owed[slot(*role)]) {
                    return Err(format!("op {}: {} latch was {}, expected {}", i, role, got, !got));
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
    fn test_full_handshake() {
        let ops = vec![
            HandshakeOp::Commit { role: Role::Server },
            HandshakeOp::MoveClient { root: [1.0, 2.0, 3.0] },
            HandshakeOp::Save { role: Role::Client },
            HandshakeOp::Commit { role: Role::Client },
            HandshakeOp::Commit { role: Role::Server },
            HandshakeOp::Poll { role: Role::Server },
            HandshakeOp::Save { role: Role::Server },
            HandshakeOp::Commit { role: Role::Client },
            HandshakeOp::Commit { role: Role::Server },
            HandshakeOp::Commit { role: Role::Client },
            HandshakeOp::Poll { role: Role::Client },
            HandshakeOp::Poll { role: Role::Client },
        ];
        execute_and_verify(&ops).unwrap();
    }

    #[test]
    fn test_request_beats_answer() {
        let mut model = HandshakeModel::new();
        model.commit(Role::Server);
        model.client.sync_saved = true;
        model.commit(Role::Client);
        model.server.sync_saved = true;
        model.commit(Role::Server);

        assert_eq!(model.signal(), SyncSignal::None);
        assert!(model.server.get_and_reset_has_new_sync());
        assert!(!model.server.sync_saved);
    }
}
