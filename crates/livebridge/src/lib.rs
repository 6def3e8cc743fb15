//! livebridge: a live animation bridge between two processes.
//!
//! One process opens a pair name as the **server**, another as the
//! **client**. Every tick each side calls [`Session::commit`], which
//! exchanges a fixed-size [`SharedRecord`] through named shared memory when
//! it is that side's turn and returns [`BridgeError::WouldBlock`] otherwise.
//!
//! # Characteristics
//!
//! - Non-blocking: every poll is zero-timeout
//! - Turn token in the segment header for real writer exclusion
//! - Timeline arbitration with edge-triggered hand-over
//! - Look-at vectors with a one-shot pose-sync handshake
//! - Joints and properties matched by 32-bit name hash
//!
//! # Usage
//!
//! ```ignore
//! let mut server = Session::new();
//! server.open("AnimationBridgePair", Role::Server)?;
//!
//! loop {
//!     server.timeline_mut().set_local_timeline(now, playing);
//!     server.set_joints(&pose);
//!     match server.commit(true) {
//!         Ok(()) | Err(BridgeError::WouldBlock) => {}
//!         Err(e) => return Err(e),
//!     }
//! }
//! ```
//!
//! Logging goes through `tracing`; install a subscriber to see it.

pub mod config;
pub mod doorbell;
pub mod error;
pub mod index;
pub mod layout;
pub mod lookat;
pub mod registry;
pub mod segment;
pub mod session;
mod sys;
pub mod timeline;
pub mod transport;

pub use config::{BridgeConfig, ObjectNames, MAX_PAIR_NAME_LEN};
pub use error::{result_code, BridgeError, Result};
pub use index::{hash_pair_name, name_hash, NameIndex};
pub use layout::{
    Command, JointData, JointFlags, PlayerInfo, PropertyData, RecordHeader, Role, SharedRecord,
    Transform, MAX_JOINTS, MAX_PROPERTIES, RECORD_SIZE,
};
pub use lookat::{LookAtSync, LookAtVectors, SyncSignal};
pub use registry::{global, SessionId, SessionRegistry};
pub use segment::{SegmentHeader, Turn, SEGMENT_SIZE};
pub use session::{Session, SessionState};
pub use timeline::TimelineSync;
pub use transport::{ClientTransport, PeerTransport, ServerTransport};
