//! Fuzzing harnesses for livebridge.
//!
//! The registry, timeline and handshake models drive the real library types
//! over in-process records. The turn model is an in-memory replica of the
//! doorbells and the turn token, so no named OS objects are created.

pub mod handshake_model;
pub mod registry_model;
pub mod timeline_model;
pub mod turn_model;
