//! Named doorbells for cross-process turn hand-off.
//!
//! A doorbell is an auto-reset signal: ringing it twice before the peer
//! looks is the same as ringing it once, and taking it clears it. Nothing
//! here ever blocks; the peer polls with [`Doorbell::try_take`] once per tick.

use crate::error::{BridgeError, Result};
use crate::sys::NamedEvent;

pub struct Doorbell {
    name: String,
    event: NamedEvent,
}

impl Doorbell {
    /// Create the named doorbell, optionally already rung.
    pub fn create(name: &str, rung: bool) -> Result<Self> {
        let event =
            NamedEvent::create(name, rung).map_err(|e| BridgeError::handle_failure(name, e))?;
        Ok(Self {
            name: name.to_owned(),
            event,
        })
    }

    /// Open a doorbell the peer created.
    pub fn open(name: &str) -> Result<Self> {
        let event = NamedEvent::open(name).map_err(|e| BridgeError::handle_failure(name, e))?;
        Ok(Self {
            name: name.to_owned(),
            event,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ring the doorbell.
    pub fn signal(&self) -> Result<()> {
        tracing::trace!(doorbell = %self.name, "signal");
        self.event
            .set()
            .map_err(|e| BridgeError::handle_failure(&self.name, e))
    }

    /// Take a pending ring, if any. Zero timeout.
    pub fn try_take(&self) -> Result<bool> {
        self.event
            .try_wait()
            .map_err(|e| BridgeError::handle_failure(&self.name, e))
    }

    /// Remove the name so later opens fail. Handles already open keep working.
    pub fn unlink(name: &str) {
        if let Err(e) = NamedEvent::unlink(name) {
            tracing::debug!(doorbell = %name, "unlink failed: {}", e);
        }
    }
}

impl std::fmt::Debug for Doorbell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Doorbell").field("name", &self.name).finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_doorbell_ring_and_take() {
        let name = format!("/lbbell_ring_{}", std::process::id());
        let host = Doorbell::create(&name, false).unwrap();
        let peer = Doorbell::open(&name).unwrap();

        assert!(!peer.try_take().unwrap());
        host.signal().unwrap();
        host.signal().unwrap();
        assert!(peer.try_take().unwrap());
        assert!(!peer.try_take().unwrap());

        Doorbell::unlink(&name);
    }

    #[test]
    fn test_doorbell_created_rung() {
        let name = format!("/lbbell_rung_{}", std::process::id());
        let host = Doorbell::create(&name, true).unwrap();
        assert!(host.try_take().unwrap());
        Doorbell::unlink(&name);
    }

    #[test]
    fn test_missing_doorbell_is_not_found() {
        let name = format!("/lbbell_none_{}", std::process::id());
        assert!(matches!(Doorbell::open(&name), Err(BridgeError::NotFound(_))));
    }
}
