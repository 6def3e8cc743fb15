//! Bolero fuzzer for the look-at pose-sync handshake.
//!
//! Properties tested:
//! - Every save request the server receives is latched once and cleared
//! - An armed server answers only when no request is pending
//! - Every answer the client receives is latched once
//! - `sync_saved` is disarmed by the commit that carries it

use bolero::check;
use livebridge::Role;
use livebridge_fuzz::handshake_model::{execute_and_verify, HandshakeOp};

fn main() {
    check!()
        .with_type::<Vec<HandshakeOpInput>>()
        .for_each(|ops| {
            let ops: Vec<HandshakeOp> = ops.iter().map(|op| op.to_handshake_op()).collect();

            if let Err(e) = execute_and_verify(&ops) {
                panic!("Invariant violated: {}", e);
            }
        });
}

/// Fuzz-friendly input type for handshake operations.
#[derive(Debug, Clone, bolero::TypeGenerator)]
enum HandshakeOpInput {
    Save { server: bool },
    MoveClient { x: i16, y: i16, z: i16 },
    Commit { server: bool },
    Poll { server: bool },
}

impl HandshakeOpInput {
    fn to_handshake_op(&self) -> HandshakeOp {
        match self {
            HandshakeOpInput::Save { server } => HandshakeOp::Save {
                role: Role::from(*server),
            },
            HandshakeOpInput::MoveClient { x, y, z } => HandshakeOp::MoveClient {
                root: [f32::from(*x), f32::from(*y), f32::from(*z)],
            },
            HandshakeOpInput::Commit { server } => HandshakeOp::Commit {
                role: Role::from(*server),
            },
            HandshakeOpInput::Poll { server } => HandshakeOp::Poll {
                role: Role::from(*server),
            },
        }
    }
}
