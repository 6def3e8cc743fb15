//! Drives a real [`SessionRegistry`] against a shadow slot table.
//!
//! No session is ever opened, so no OS objects are touched. The shadow keeps
//! one entry per slot (`Some(generation)` while live) plus every id ever
//! handed out, so stale handles can be replayed at any point.

use livebridge::{BridgeError, SessionId, SessionRegistry};

/// Operations on the registry.
#[derive(Debug, Clone)]
pub enum RegistryOp {
    /// Allocate a session.
    New,
    /// Free the `n`-th issued id (modulo issued count), live or not.
    Free { pick: u8 },
    /// Flip the sync-saved flag through the `n`-th issued id.
    SetSyncSaved { pick: u8, value: bool },
    /// Commit through the `n`-th issued id.
    Commit { pick: u8 },
}

struct Shadow {
    /// Generation per slot, `None` while free.
    slots: Vec<Option<u32>>,
    /// Last generation ever used per slot.
    generations: Vec<u32>,
    /// Sync-saved value per slot, reset on reuse.
    sync_saved: Vec<bool>,
    issued: Vec<SessionId>,
}

impl Shadow {
    fn is_live(&self, id: SessionId) -> bool {
        self.slots.get(id.index as usize).copied().flatten() == Some(id.generation)
    }

    fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    fn pick(&self, n: u8) -> Option<SessionId> {
        if self.issued.is_empty() {
            None
        } else {
            Some(self.issued[n as usize % self.issued.len()])
        }
    }
}

/// Execute operations and verify slot reuse, generation checks and state
/// isolation between sessions.
pub fn execute_and_verify(ops: &[RegistryOp]) -> Result<(), String> {
    let mut registry = SessionRegistry::new();
    let mut shadow = Shadow {
        slots: Vec::new(),
        generations: Vec::new(),
        sync_saved: Vec::new(),
        issued: Vec::new(),
    };

    for (i, op) in ops.iter().enumerate() {
        match op {
            RegistryOp::New => {
                let id = registry.new_session();

                // INVARIANT: the lowest free slot is reused, otherwise one is appended
                let expected_index = shadow
                    .slots
                    .iter()
                    .position(|s| s.is_none())
                    .unwrap_or(shadow.slots.len());
                if id.index as usize != expected_index {
                    return Err(format!(
                        "op {}: new session got slot {}, expected {}",
                        i, id.index, expected_index
                    ));
                }

                let expected_generation = if expected_index == shadow.slots.len() {
                    shadow.slots.push(None);
                    shadow.generations.push(0);
                    shadow.sync_saved.push(false);
                    0
                } else {
                    shadow.generations[expected_index].wrapping_add(1)
                };

                // INVARIANT: a reused slot never hands out a previous generation
                if id.generation != expected_generation {
                    return Err(format!(
                        "op {}: slot {} generation {}, expected {}",
                        i, id.index, id.generation, expected_generation
                    ));
                }

                shadow.slots[expected_index] = Some(id.generation);
                shadow.generations[expected_index] = id.generation;
                shadow.sync_saved[expected_index] = false;
                shadow.issued.push(id);

                // INVARIANT: a fresh session starts with cleared state
                match registry.sync_saved(id) {
                    Ok(false) => {}
                    other => {
                        return Err(format!("op {}: fresh session {} sync_saved = {:?}", i, id, other))
                    }
                }
            }
            RegistryOp::Free { pick } => {
                let Some(id) = shadow.pick(*pick) else { continue };
                let live = shadow.is_live(id);
                let result = registry.free_session(id);

                match (live, result) {
                    (true, Ok(())) => shadow.slots[id.index as usize] = None,
                    // INVARIANT: stale ids are rejected without touching the slot
                    (false, Err(BridgeError::NotFound(_))) => {}
                    (live, result) => {
                        return Err(format!(
                            "op {}: free {} (live={}) returned {:?}",
                            i, id, live, result
                        ))
                    }
                }
            }
            RegistryOp::SetSyncSaved { pick, value } => {
                let Some(id) = shadow.pick(*pick) else { continue };
                let live = shadow.is_live(id);
                let result = registry.set_sync_saved(id, *value);

                match (live, result) {
                    (true, Ok(())) => shadow.sync_saved[id.index as usize] = *value,
                    (false, Err(BridgeError::NotFound(_))) => {}
                    (live, result) => {
                        return Err(format!(
                            "op {}: set_sync_saved {} (live={}) returned {:?}",
                            i, id, live, result
                        ))
                    }
                }
            }
            RegistryOp::Commit { pick } => {
                let Some(id) = shadow.pick(*pick) else { continue };
                let live = shadow.is_live(id);

                // INVARIANT: live but closed is NotOpen; stale is NotFound
                match (live, registry.commit(id, true)) {
                    (true, Err(BridgeError::NotOpen)) => {}
                    (false, Err(BridgeError::NotFound(_))) => {}
                    (live, result) => {
                        return Err(format!(
                            "op {}: commit {} (live={}) returned {:?}",
                            i, id, live, result
                        ))
                    }
                }
            }
        }

        // INVARIANT: the live count matches
        if registry.len() != shadow.live_count() {
            return Err(format!(
                "op {}: registry has {} sessions, shadow has {}",
                i,
                registry.len(),
                shadow.live_count()
            ));
        }

        // INVARIANT: every live session holds its own state
        for (index, slot) in shadow.slots.iter().enumerate() {
            let Some(generation) = *slot else { continue };
            let id = SessionId {
                index: index as u32,
                generation,
            };
            match registry.sync_saved(id) {
                Ok(value) if value == shadow.sync_saved[index] => {}
                other => {
                    return Err(format!(
                        "op {}: session {} sync_saved = {:?}, expected {}",
                        i, id, other, shadow.sync_saved[index]
                    ))
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
    fn test_reuse_after_free() {
        let ops = vec![
            RegistryOp::New,
            RegistryOp::New,
            RegistryOp::Free { pick: 0 },
            RegistryOp::New,
            RegistryOp::SetSyncSaved { pick: 0, value: true },
            RegistryOp::SetSyncSaved { pick: 2, value: true },
        ];
        execute_and_verify(&ops).unwrap();
    }

    #[test]
    fn test_double_free_is_rejected() {
        let ops = vec![
            RegistryOp::New,
            RegistryOp::Free { pick: 0 },
            RegistryOp::Free { pick: 0 },
            RegistryOp::Commit { pick: 0 },
        ];
        execute_and_verify(&ops).unwrap();
    }

    #[test]
    fn test_closed_sessions_commit_not_open() {
        let ops = vec![RegistryOp::New, RegistryOp::New, RegistryOp::Commit { pick: 1 }];
        execute_and_verify(&ops).unwrap();
    }
}
