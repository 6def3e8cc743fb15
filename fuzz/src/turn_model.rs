//! In-memory replica of the commit hand-off.
//!
//! Two binary doorbells say whose turn it should be; the turn token in the
//! segment header decides who may actually write. A foreign writer (a second
//! server attached to the same pair, say) can grab the token at any time.
//!
//! The commit steps mirror the transports:
//! 1. Take own doorbell, or `WouldBlock`
//! 2. Move the token from idle to own turn, or re-ring own doorbell and `WouldBlock`
//! 3. Exchange the record and return the token to idle
//! 4. Ring the peer now (auto finish) or on a later finish

use livebridge::Turn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Server,
    Client,
}

impl Side {
    fn turn(self) -> Turn {
        match self {
            Side::Server => Turn::ServerTurn,
            Side::Client => Turn::ClientTurn,
        }
    }
}

/// Who holds the turn token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Holder {
    Idle,
    Peer(Turn),
    Foreign,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnError {
    WouldBlock,
    NothingToFinish,
}

/// Binary signal: ringing a rung doorbell is a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct DoorbellModel {
    rung: bool,
}

impl DoorbellModel {
    pub fn signal(&mut self) {
        self.rung = true;
    }

    pub fn try_take(&mut self) -> bool {
        std::mem::take(&mut self.rung)
    }

    pub fn is_rung(&self) -> bool {
        self.rung
    }
}

/// Doorbells, token and per-side bookkeeping.
#[derive(Debug, Clone)]
pub struct TurnModel {
    to_client: DoorbellModel,
    from_client: DoorbellModel,
    holder: Holder,
    commits: [u64; 2],
    unfinished: [bool; 2],
}

impl Default for TurnModel {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnModel {
    /// State right after the server opened: both doorbells rung.
    pub fn new() -> Self {
        let mut to_client = DoorbellModel::default();
        let mut from_client = DoorbellModel::default();
        from_client.signal();
        to_client.signal();
        Self {
            to_client,
            from_client,
            holder: Holder::Idle,
            commits: [0; 2],
            unfinished: [false; 2],
        }
    }

    fn slot(side: Side) -> usize {
        match side {
            Side::Server => 0,
            Side::Client => 1,
        }
    }

    fn own_bell(&mut self, side: Side) -> &mut DoorbellModel {
        match side {
            Side::Server => &mut self.from_client,
            Side::Client => &mut self.to_client,
        }
    }

    fn peer_bell(&mut self, side: Side) -> &mut DoorbellModel {
        match side {
            Side::Server => &mut self.to_client,
            Side::Client => &mut self.from_client,
        }
    }

    pub fn commit(&mut self, side: Side, auto_finish: bool) -> Result<(), TurnError> {
        if !self.own_bell(side).try_take() {
            return Err(TurnError::WouldBlock);
        }

        if self.holder != Holder::Idle {
            self.own_bell(side).signal();
            return Err(TurnError::WouldBlock);
        }
        self.holder = Holder::Peer(side.turn());
        // record exchange
        self.holder = Holder::Idle;
        self.commits[Self::slot(side)] += 1;

        if auto_finish {
            self.peer_bell(side).signal();
        } else {
            self.unfinished[Self::slot(side)] = true;
        }
        Ok(())
    }

    /// Finish a commit made without auto finish.
    pub fn finish(&mut self, side: Side) -> Result<(), TurnError> {
        let slot = Self::slot(side);
        if !std::mem::take(&mut self.unfinished[slot]) {
            return Err(TurnError::NothingToFinish);
        }
        self.peer_bell(side).signal();
        Ok(())
    }

    pub fn foreign_grab(&mut self) -> bool {
        if self.holder == Holder::Idle {
            self.holder = Holder::Foreign;
            true
        } else {
            false
        }
    }

    pub fn foreign_release(&mut self) {
        if self.holder == Holder::Foreign {
            self.holder = Holder::Idle;
        }
    }

    pub fn holder(&self) -> Holder {
        self.holder
    }

    pub fn commits(&self, side: Side) -> u64 {
        self.commits[Self::slot(side)]
    }
}

/// Operations on the model.
#[derive(Debug, Clone)]
pub enum TurnOp {
    Commit { side: Side, auto_finish: bool },
    Finish { side: Side },
    ForeignGrab,
    ForeignRelease,
}

/// Execute operations and verify alternation, exclusion and liveness.
pub fn execute_and_verify(ops: &[TurnOp]) -> Result<(), String> {
    let mut model = TurnModel::new();

    for (i, op) in ops.iter().enumerate() {
        let before = model.clone();

        match op {
            TurnOp::Commit { side, auto_finish } => match model.commit(*side, *auto_finish) {
                Ok(()) => {
                    // INVARIANT: a commit only happens while nobody else holds the token
                    if before.holder != Holder::Idle {
                        return Err(format!(
                            "op {}: {:?} committed while token held by {:?}",
                            i, side, before.holder
                        ));
                    }
                }
                Err(TurnError::WouldBlock) => {
                    // INVARIANT: a refused commit leaves the doorbells as they were
                    if model.to_client.is_rung() != before.to_client.is_rung()
                        || model.from_client.is_rung() != before.from_client.is_rung()
                    {
                        return Err(format!("op {}: refused {:?} commit changed doorbells", i, side));
                    }
                    if model.commits != before.commits {
                        return Err(format!("op {}: refused {:?} commit was counted", i, side));
                    }
                }
                Err(e) => return Err(format!("op {}: unexpected commit error {:?}", i, e)),
            },
            TurnOp::Finish { side } => {
                let _ = model.finish(*side);
            }
            TurnOp::ForeignGrab => {
                model.foreign_grab();
            }
            TurnOp::ForeignRelease => model.foreign_release(),
        }

        // INVARIANT: the token is idle between commits unless a foreign writer holds it
        if !matches!(model.holder(), Holder::Idle | Holder::Foreign) {
            return Err(format!("op {}: token left at {:?}", i, model.holder()));
        }

        // INVARIANT: neither side gets more than one commit ahead of the other
        let s = model.commits(Side::Server);
        let c = model.commits(Side::Client);
        if s > c + 1 || c > s + 1 {
            return Err(format!("op {}: commits diverged: server {}, client {}", i, s, c));
        }

        // INVARIANT: with nothing left to finish, some side can still commit
        if model.unfinished == [false; 2]
            && !model.to_client.is_rung()
            && !model.from_client.is_rung()
        {
            return Err(format!("op {}: both doorbells silent with nothing pending", i));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_rings_let_both_sides_commit_once() {
        let mut model = TurnModel::new();
        model.commit(Side::Server, true).unwrap();
        assert_eq!(model.commit(Side::Server, true), Err(TurnError::WouldBlock));
        model.commit(Side::Client, true).unwrap();
        model.commit(Side::Server, true).unwrap();
    }

    #[test]
    fn test_foreign_holder_blocks_and_keeps_the_ring() {
        let mut model = TurnModel::new();
        assert!(model.foreign_grab());
        assert_eq!(model.commit(Side::Server, true), Err(TurnError::WouldBlock));
        model.foreign_release();
        model.commit(Side::Server, true).unwrap();
        assert_eq!(model.commits(Side::Server), 1);
    }

    #[test]
    fn test_manual_finish_hands_over() {
        let mut model = TurnModel::new();
        model.commit(Side::Client, false).unwrap();
        model.commit(Side::Server, false).unwrap();
        assert_eq!(model.commit(Side::Client, true), Err(TurnError::WouldBlock));
        model.finish(Side::Server).unwrap();
        assert_eq!(model.finish(Side::Server), Err(TurnError::NothingToFinish));
        model.commit(Side::Client, true).unwrap();
    }

    #[test]
    fn test_sequence_holds_invariants() {
        let ops = vec![
            TurnOp::Commit { side: Side::Server, auto_finish: false },
            TurnOp::ForeignGrab,
            TurnOp::Commit { side: Side::Client, auto_finish: true },
            TurnOp::ForeignRelease,
            TurnOp::Commit { side: Side::Client, auto_finish: true },
            TurnOp::Finish { side: Side::Server },
            TurnOp::Commit { side: Side::Server, auto_finish: true },
        ];
        execute_and_verify(&ops).unwrap();
    }
}
