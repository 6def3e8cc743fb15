//! Timeline ownership arbitration.
//!
//! Both processes drive their own playhead. Each commit publishes the local
//! time with an edge flag when it changed, and picks up the peer's edge when
//! there is one. A pending remote change suppresses the local echo so the two
//! playheads never chase each other.
//!
//! Per-tick usage on either side:
//!
//! ```ignore
//! session.timeline_mut().set_local_timeline(player.time(), player.is_playing());
//! session.commit(true)?;
//! if let Some(t) = session.timeline_mut().check_for_remote_time_control(player.time(), player.is_playing()) {
//!     player.seek(t);
//! }
//! ```

use crate::layout::{Role, SharedRecord};

/// Per-session playhead arbiter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimelineSync {
    is_playing: bool,
    local_time: f64,
    offset_time: f64,

    local_time_changed: bool,
    local_last_time: f64,

    remote_time_changed: bool,
    remote_last_time: f64,
}

impl TimelineSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record this tick's playhead. Call once per tick before committing.
    ///
    /// A playing transport always claims the timeline and discards any
    /// pending remote change. A stopped one claims it only when the time
    /// moved and no remote change is waiting.
    pub fn set_local_timeline(&mut self, local_time: f64, is_playing: bool) {
        self.local_time = local_time;
        self.is_playing = is_playing;

        if is_playing {
            self.local_time_changed = true;
            self.local_last_time = local_time;
            self.remote_time_changed = false;
        } else if local_time != self.local_last_time && !self.remote_time_changed {
            self.local_time_changed = true;
            self.local_last_time = local_time;
        }
    }

    /// Consume the peer's time-changed edge from `record`.
    ///
    /// `peer` is the role that wrote the block being read. The edge flag is
    /// cleared in place so it is observed exactly once.
    pub fn read_from_data(&mut self, peer: Role, record: &mut SharedRecord) {
        let player = record.player_mut(peer);
        if player.time_changed_event > 0.0 {
            player.time_changed_event = 0.0;
            self.remote_time_changed = true;
            self.remote_last_time = player.local_time + self.offset_time;
        }
    }

    /// Publish this side's time into its own player block in `record`.
    pub fn write_to_data(&mut self, own: Role, record: &mut SharedRecord) {
        let player = record.player_mut(own);
        if !self.remote_time_changed && (self.local_time_changed || self.is_playing) {
            self.local_time_changed = false;
            self.local_last_time = self.local_time;

            player.local_time = self.local_last_time - self.offset_time;
            player.time_changed_event = 1.0;
        } else {
            player.time_changed_event = 0.0;
        }
    }

    /// One-shot check for a seek requested by the peer.
    ///
    /// Returns the time the caller should move its playhead to. Never yields
    /// while playing. When it yields, the returned time is adopted as the
    /// last local time so the seek is not echoed back.
    pub fn check_for_remote_time_control(&mut self, local_time: f64, is_playing: bool) -> Option<f64> {
        if !self.remote_time_changed {
            return None;
        }
        self.remote_time_changed = false;
        self.local_time = local_time;
        self.is_playing = is_playing;

        if self.remote_last_time != local_time && !self.is_playing {
            self.local_time_changed = false;
            self.local_last_time = self.remote_last_time;
            return Some(self.remote_last_time);
        }
        None
    }

    pub fn set_local_time(&mut self, time: f64) {
        self.local_time = time;
    }

    pub fn local_time(&self) -> f64 {
        self.local_time
    }

    /// Phase shift applied to everything read from and written to the peer.
    pub fn set_offset_time(&mut self, time: f64) {
        self.offset_time = time;
    }

    pub fn offset_time(&self) -> f64 {
        self.offset_time
    }

    pub fn set_is_playing(&mut self, value: bool) {
        self.is_playing = value;
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn is_local_time_changed(&self) -> bool {
        self.local_time_changed
    }

    pub fn is_remote_time_changed(&self) -> bool {
        self.remote_time_changed
    }

    /// Last time received from the peer, offset applied.
    pub fn remote_time(&self) -> f64 {
        self.remote_last_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer_edge(record: &mut SharedRecord, role: Role, time: f64) {
        let player = record.player_mut(role);
        player.local_time = time;
        player.time_changed_event = 1.0;
    }

    #[test]
    fn stopped_scrub_is_published_once() {
        let mut sync = TimelineSync::new();
        let mut record = SharedRecord::default();

        sync.set_local_timeline(2.5, false);
        sync.write_to_data(Role::Server, &mut record);
        assert_eq!(record.server_player.local_time, 2.5);
        assert_eq!(record.server_player.time_changed_event, 1.0);

        // Same time again: no new edge.
        sync.set_local_timeline(2.5, false);
        sync.write_to_data(Role::Server, &mut record);
        assert_eq!(record.server_player.time_changed_event, 0.0);
    }

    #[test]
    fn playing_publishes_every_tick() {
        let mut sync = TimelineSync::new();
        let mut record = SharedRecord::default();

        for t in [1.0, 1.0, 1.5] {
            sync.set_local_timeline(t, true);
            sync.write_to_data(Role::Client, &mut record);
            assert_eq!(record.client_player.time_changed_event, 1.0);
            assert_eq!(record.client_player.local_time, t);
        }
    }

    #[test]
    fn read_consumes_edge_once() {
        let mut sync = TimelineSync::new();
        let mut record = SharedRecord::default();
        peer_edge(&mut record, Role::Client, 4.0);

        sync.read_from_data(Role::Client, &mut record);
        assert!(sync.is_remote_time_changed());
        assert_eq!(record.client_player.time_changed_event, 0.0);

        assert_eq!(sync.check_for_remote_time_control(0.0, false), Some(4.0));
        sync.read_from_data(Role::Client, &mut record);
        assert!(!sync.is_remote_time_changed());
    }

    #[test]
    fn pending_remote_change_suppresses_local_echo() {
        let mut sync = TimelineSync::new();
        let mut record = SharedRecord::default();
        peer_edge(&mut record, Role::Server, 7.0);

        sync.read_from_data(Role::Server, &mut record);
        sync.set_local_timeline(3.0, false);
        sync.write_to_data(Role::Client, &mut record);
        assert_eq!(record.client_player.time_changed_event, 0.0);
        assert!(!sync.is_local_time_changed());
    }

    #[test]
    fn playing_never_yields_remote_control() {
        let mut sync = TimelineSync::new();
        let mut record = SharedRecord::default();
        peer_edge(&mut record, Role::Server, 9.0);

        sync.read_from_data(Role::Server, &mut record);
        assert_eq!(sync.check_for_remote_time_control(1.0, true), None);
        // The edge is consumed either way.
        assert!(!sync.is_remote_time_changed());
    }

    #[test]
    fn same_time_is_not_reported() {
        let mut sync = TimelineSync::new();
        let mut record = SharedRecord::default();
        peer_edge(&mut record, Role::Server, 3.0);

        sync.read_from_data(Role::Server, &mut record);
        assert_eq!(sync.check_for_remote_time_control(3.0, false), None);
    }

    #[test]
    fn accepted_seek_is_not_echoed() {
        let mut sync = TimelineSync::new();
        let mut record = SharedRecord::default();
        peer_edge(&mut record, Role::Server, 6.0);

        sync.read_from_data(Role::Server, &mut record);
        assert_eq!(sync.check_for_remote_time_control(1.0, false), Some(6.0));

        // Host seeked its playhead to 6.0.
        sync.set_local_timeline(6.0, false);
        sync.write_to_data(Role::Client, &mut record);
        assert_eq!(record.client_player.time_changed_event, 0.0);
    }

    #[test]
    fn offset_shifts_both_directions() {
        let mut sync = TimelineSync::new();
        sync.set_offset_time(10.0);
        let mut record = SharedRecord::default();

        sync.set_local_timeline(12.0, false);
        sync.write_to_data(Role::Server, &mut record);
        assert_eq!(record.server_player.local_time, 2.0);

        peer_edge(&mut record, Role::Client, 1.0);
        sync.read_from_data(Role::Client, &mut record);
        assert_eq!(sync.remote_time(), 11.0);
    }

    #[test]
    fn playing_discards_pending_remote_change() {
        let mut sync = TimelineSync::new();
        let mut record = SharedRecord::default();
        peer_edge(&mut record, Role::Server, 5.0);

        sync.read_from_data(Role::Server, &mut record);
        sync.set_local_timeline(0.5, true);
        assert!(!sync.is_remote_time_changed());
        sync.write_to_data(Role::Client, &mut record);
        assert_eq!(record.client_player.time_changed_event, 1.0);
    }
}
