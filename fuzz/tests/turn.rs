//! Bolero fuzzer for the doorbell and turn-token hand-off.
//!
//! Properties tested:
//! - Neither side gets more than one commit ahead of the other
//! - A commit never happens while another writer holds the token
//! - A refused commit leaves both doorbells untouched
//! - With no finish pending, at least one doorbell stays rung

use bolero::check;
use livebridge_fuzz::turn_model::{execute_and_verify, Side, TurnOp};

fn main() {
    check!()
        .with_type::<Vec<TurnOpInput>>()
        .for_each(|ops| {
            let ops: Vec<TurnOp> = ops.iter().map(|op| op.to_turn_op()).collect();

            if let Err(e) = execute_and_verify(&ops) {
                panic!("Invariant violated: {}", e);
            }
        });
}

/// Fuzz-friendly input type for hand-off operations.
#[derive(Debug, Clone, bolero::TypeGenerator)]
enum TurnOpInput {
    Commit { server: bool, auto_finish: bool },
    Finish { server: bool },
    ForeignGrab,
    ForeignRelease,
}

fn side(server: bool) -> Side {
    if server {
        Side::Server
    } else {
        Side::Client
    }
}

impl TurnOpInput {
    fn to_turn_op(&self) -> TurnOp {
        match self {
            TurnOpInput::Commit {
                server,
                auto_finish,
            } => TurnOp::Commit {
                side: side(*server),
                auto_finish: *auto_finish,
            },
            TurnOpInput::Finish { server } => TurnOp::Finish {
                side: side(*server),
            },
            TurnOpInput::ForeignGrab => TurnOp::ForeignGrab,
            TurnOpInput::ForeignRelease => TurnOp::ForeignRelease,
        }
    }
}
