//! Error taxonomy for the bridge.
//!
//! Every operation returns a [`BridgeError`] instead of panicking. Callers
//! driving a tick loop should treat [`BridgeError::WouldBlock`] as "try again
//! next tick" and everything else as fatal for the session.

use std::io;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors produced by sessions, transports and OS objects.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Invalid or stale session id, or the peer objects do not exist yet.
    #[error("not found: {0}")]
    NotFound(String),

    /// The transport was never opened or has already been closed.
    #[error("transport is not open")]
    NotOpen,

    /// The peer has not handed over the turn yet.
    #[error("peer has not signaled, try again next tick")]
    WouldBlock,

    /// The shared segment could not be created or mapped.
    #[error("failed to map shared segment `{name}`: {source}")]
    MapFailure {
        name: String,
        #[source]
        source: io::Error,
    },

    /// A signaling primitive could not be created, opened or raised.
    #[error("failed to access signal `{name}`: {source}")]
    HandleFailure {
        name: String,
        #[source]
        source: io::Error,
    },

    /// The pair name cannot be turned into OS object names.
    #[error("invalid pair name `{name}`: {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// Another live server already owns the pair.
    #[error("shared segment `{name}` is owned by running server pid {pid}")]
    PairInUse { name: String, pid: u32 },

    /// The segment was created by a build with a different record layout.
    #[error("shared segment `{name}` has layout {found:#010x}, expected {expected:#010x}")]
    LayoutMismatch {
        name: String,
        expected: u32,
        found: u32,
    },
}

impl BridgeError {
    /// Stable integer code for hosts that only speak integers.
    ///
    /// Zero is reserved for success.
    pub fn code(&self) -> i32 {
        match self {
            BridgeError::WouldBlock => -1,
            BridgeError::MapFailure { .. } => -2,
            BridgeError::NotOpen => -3,
            BridgeError::NotFound(_) => -4,
            BridgeError::HandleFailure { .. } => -5,
            BridgeError::InvalidName { .. } => -6,
            BridgeError::LayoutMismatch { .. } => -7,
            BridgeError::PairInUse { .. } => -8,
        }
    }

    /// Whether this is the steady-state "peer not ready" outcome.
    #[inline]
    pub fn is_would_block(&self) -> bool {
        matches!(self, BridgeError::WouldBlock)
    }

    pub(crate) fn map_failure(name: &str, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            return BridgeError::NotFound(format!("shared segment `{name}`"));
        }
        BridgeError::MapFailure {
            name: name.to_owned(),
            source,
        }
    }

    pub(crate) fn handle_failure(name: &str, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            return BridgeError::NotFound(format!("signal `{name}`"));
        }
        BridgeError::HandleFailure {
            name: name.to_owned(),
            source,
        }
    }
}

/// Convert a unit result into the integer convention (0 on success).
pub fn result_code(result: &Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => e.code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct_and_nonzero() {
        let errors = [
            BridgeError::NotFound("x".into()),
            BridgeError::NotOpen,
            BridgeError::WouldBlock,
            BridgeError::MapFailure {
                name: "seg".into(),
                source: io::Error::from(io::ErrorKind::PermissionDenied),
            },
            BridgeError::HandleFailure {
                name: "sig".into(),
                source: io::Error::from(io::ErrorKind::PermissionDenied),
            },
            BridgeError::InvalidName {
                name: String::new(),
                reason: "empty",
            },
            BridgeError::LayoutMismatch {
                name: "seg".into(),
                expected: 1,
                found: 2,
            },
            BridgeError::PairInUse {
                name: "seg".into(),
                pid: 1,
            },
        ];

        let mut codes: Vec<i32> = errors.iter().map(BridgeError::code).collect();
        assert!(codes.iter().all(|c| *c < 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn missing_os_objects_become_not_found() {
        let e = BridgeError::map_failure("seg", io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(e, BridgeError::NotFound(_)));

        let e = BridgeError::handle_failure("sig", io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(e, BridgeError::NotFound(_)));

        let e = BridgeError::handle_failure("sig", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(e, BridgeError::HandleFailure { .. }));
    }

    #[test]
    fn result_code_maps_success_to_zero() {
        assert_eq!(result_code(&Ok(())), 0);
        assert_eq!(result_code(&Err(BridgeError::WouldBlock)), -1);
        assert_eq!(result_code(&Err(BridgeError::NotOpen)), -3);
    }
}
