//! Server and client halves of the commit protocol.
//!
//! The role is chosen once at [`open`]; each half implements
//! [`PeerTransport`]. A commit never blocks: it polls its doorbell, takes the
//! turn token, exchanges its sub-record with the segment and optionally rings
//! the peer.
//!
//! Hand-off per tick:
//!
//! ```text
//! server                        segment                        client
//!   │  take from_client            │                              │
//!   │  read client sub-record  ◄───┤                              │
//!   │  write full shadow  ────────►│                              │
//!   │  ring to_client ─────────────┼────────────────────────────► │
//!   │                              │            take to_client    │
//!   │                              ├───►  read server record      │
//!   │                              │◄───  write client sub-record │
//!   │ ◄────────────────────────────┼─────────── ring from_client  │
//! ```

use tracing::Span;

use crate::config::{BridgeConfig, ObjectNames};
use crate::doorbell::Doorbell;
use crate::error::{BridgeError, Result};
use crate::layout::Role;
use crate::segment::{SharedSegment, Turn};
use crate::session::SessionState;
use crate::sys::MappedRegion;

/// One side of an open bridge.
pub trait PeerTransport: Send {
    fn role(&self) -> Role;

    fn names(&self) -> &ObjectNames;

    /// Exchange the shadow state with the segment if it is this side's turn.
    ///
    /// Returns [`BridgeError::WouldBlock`] when the peer has not handed over
    /// yet; nothing is touched in that case.
    fn commit(&mut self, state: &mut SessionState, auto_finish: bool) -> Result<()>;

    /// Hand the turn to the peer.
    fn finish(&self) -> Result<()>;

    /// Current holder of the turn token.
    fn turn(&self) -> Turn;

    /// Commits completed on the segment by either side.
    fn commits(&self) -> u64;
}

/// Open the transport for `pair` in `role`.
pub fn open(config: &BridgeConfig, pair: &str, role: Role) -> Result<Box<dyn PeerTransport>> {
    let names = ObjectNames::derive(config, pair)?;
    let transport: Box<dyn PeerTransport> = match role {
        Role::Server => Box::new(ServerTransport::create(names, config.unlink_on_close)?),
        Role::Client => Box::new(ClientTransport::connect(names)?),
    };
    Ok(transport)
}

/// Objects both halves hold.
struct Link {
    names: ObjectNames,
    segment: SharedSegment,
    to_client: Doorbell,
    from_client: Doorbell,
    span: Span,
    /// Commits in a row that found the turn token taken.
    lost_races: u32,
}

impl Link {
    fn new(
        names: ObjectNames,
        segment: SharedSegment,
        to_client: Doorbell,
        from_client: Doorbell,
        span: Span,
    ) -> Self {
        Self {
            names,
            segment,
            to_client,
            from_client,
            span,
            lost_races: 0,
        }
    }

    fn span(names: &ObjectNames, role: Role) -> Span {
        tracing::info_span!("bridge", pair = %names.pair, role = %role)
    }
}

/// Count a commit that found the token taken; warn only on the first.
fn note_lost_race(lost_races: &mut u32) {
    if *lost_races == 0 {
        tracing::warn!("turn token held by another writer, retrying next tick");
    } else {
        tracing::debug!(lost_races = *lost_races + 1, "turn token still held");
    }
    *lost_races = lost_races.saturating_add(1);
}

/// Reset the count once the token was acquired again.
fn note_acquired(lost_races: &mut u32) {
    if *lost_races > 0 {
        tracing::info!(lost_races = *lost_races, "turn token free again");
        *lost_races = 0;
    }
}

fn unlink_all(names: &ObjectNames) {
    if let Err(e) = MappedRegion::unlink(&names.segment) {
        tracing::debug!(segment = %names.segment, "unlink failed: {}", e);
    }
    Doorbell::unlink(&names.to_client);
    Doorbell::unlink(&names.from_client);
}

/// Creates the objects and owns the first turn.
pub struct ServerTransport {
    link: Link,
    unlink_on_close: bool,
}

impl ServerTransport {
    /// Fails with [`BridgeError::PairInUse`] while another server is running
    /// on the same pair; that server's objects are left untouched.
    pub fn create(names: ObjectNames, unlink_on_close: bool) -> Result<Self> {
        let span = Link::span(&names, Role::Server);
        let enter = span.enter();

        let mut segment = SharedSegment::create(&names.segment).map_err(|e| {
            tracing::error!("open failed: {}", e);
            e
        })?;

        // Only the segment's owner gets here, so the signals are ours to replace.
        let signals = (|| {
            let to_client = Doorbell::create(&names.to_client, false)?;
            // The server writes first.
            let from_client = Doorbell::create(&names.from_client, true)?;
            // Lets a client that attaches later pick up the initial frame.
            to_client.signal()?;
            Ok::<_, BridgeError>((to_client, from_client))
        })();

        let (to_client, from_client) = match signals {
            Ok(signals) => signals,
            Err(e) => {
                tracing::error!("open failed: {}", e);
                if segment.release() {
                    unlink_all(&names);
                }
                return Err(e);
            }
        };

        tracing::info!(
            segment = %names.segment,
            to_client = %names.to_client,
            from_client = %names.from_client,
            "opened"
        );
        drop(enter);

        Ok(Self {
            link: Link::new(names, segment, to_client, from_client, span),
            unlink_on_close,
        })
    }
}

impl PeerTransport for ServerTransport {
    fn role(&self) -> Role {
        Role::Server
    }

    fn names(&self) -> &ObjectNames {
        &self.link.names
    }

    fn commit(&mut self, state: &mut SessionState, auto_finish: bool) -> Result<()> {
        let span = self.link.span.clone();
        let _enter = span.enter();

        if !self.link.from_client.try_take()? {
            return Err(BridgeError::WouldBlock);
        }

        let Some(mut guard) = self.link.segment.try_acquire(Role::Server) else {
            note_lost_race(&mut self.link.lost_races);
            self.link.from_client.signal()?;
            return Err(BridgeError::WouldBlock);
        };
        note_acquired(&mut self.link.lost_races);

        let shared = guard.record_mut();
        state.timeline.read_from_data(Role::Client, shared);
        state.timeline.write_to_data(Role::Server, &mut state.record);

        state.record.client_player = shared.client_player;
        state.record.header.client_tag = shared.header.client_tag;
        state.look_at.merge_on_server(shared, &mut state.record);

        *shared = state.record;
        drop(guard);

        if auto_finish {
            self.finish()?;
        }
        Ok(())
    }

    fn finish(&self) -> Result<()> {
        tracing::debug!("handing turn to client");
        self.link.to_client.signal().map_err(|e| {
            tracing::error!("failed to signal client: {}", e);
            e
        })
    }

    fn turn(&self) -> Turn {
        self.link.segment.turn()
    }

    fn commits(&self) -> u64 {
        self.link.segment.commits()
    }
}

impl Drop for ServerTransport {
    fn drop(&mut self) {
        let _enter = self.link.span.enter();
        // A segment someone else owns now keeps its names.
        let owned = self.link.segment.release();
        if owned && self.unlink_on_close {
            unlink_all(&self.link.names);
        } else if !owned {
            tracing::warn!("segment changed owner while open, leaving names in place");
        }
        tracing::info!("closed");
    }
}

/// Attaches to objects a server created.
pub struct ClientTransport {
    link: Link,
}

impl ClientTransport {
    /// Fails with [`BridgeError::NotFound`] until the server has opened.
    pub fn connect(names: ObjectNames) -> Result<Self> {
        let span = Link::span(&names, Role::Client);
        let enter = span.enter();

        let opened = (|| {
            let segment = SharedSegment::open(&names.segment)?;
            let to_client = Doorbell::open(&names.to_client)?;
            let from_client = Doorbell::open(&names.from_client)?;
            Ok::<_, BridgeError>((segment, to_client, from_client))
        })();

        let (segment, to_client, from_client) = match opened {
            Ok(objects) => objects,
            Err(e) => {
                if matches!(e, BridgeError::NotFound(_)) {
                    tracing::debug!("server not up yet: {}", e);
                } else {
                    tracing::error!("open failed: {}", e);
                }
                return Err(e);
            }
        };

        tracing::info!(segment = %names.segment, "opened");
        drop(enter);

        Ok(Self {
            link: Link::new(names, segment, to_client, from_client, span),
        })
    }
}

impl PeerTransport for ClientTransport {
    fn role(&self) -> Role {
        Role::Client
    }

    fn names(&self) -> &ObjectNames {
        &self.link.names
    }

    fn commit(&mut self, state: &mut SessionState, auto_finish: bool) -> Result<()> {
        let span = self.link.span.clone();
        let _enter = span.enter();

        if !self.link.to_client.try_take()? {
            return Err(BridgeError::WouldBlock);
        }

        let Some(mut guard) = self.link.segment.try_acquire(Role::Client) else {
            note_lost_race(&mut self.link.lost_races);
            self.link.to_client.signal()?;
            return Err(BridgeError::WouldBlock);
        };
        note_acquired(&mut self.link.lost_races);

        let shared = guard.record_mut();
        shared.client_player = state.record.client_player;
        state.timeline.read_from_data(Role::Server, shared);
        state.timeline.write_to_data(Role::Client, shared);

        state.look_at.publish_on_client(shared);
        shared.header.client_tag = state.record.header.client_tag;

        state.record = *shared;
        drop(guard);

        if auto_finish {
            self.finish()?;
        }
        Ok(())
    }

    fn finish(&self) -> Result<()> {
        tracing::debug!("handing turn to server");
        self.link.from_client.signal().map_err(|e| {
            tracing::error!("failed to signal server: {}", e);
            e
        })
    }

    fn turn(&self) -> Turn {
        self.link.segment.turn()
    }

    fn commits(&self) -> u64 {
        self.link.segment.commits()
    }
}

impl Drop for ClientTransport {
    fn drop(&mut self) {
        let _enter = self.link.span.enter();
        tracing::info!("closed");
    }
}
