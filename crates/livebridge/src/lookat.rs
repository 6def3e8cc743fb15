//! Look-at vectors and the pose-sync handshake riding on them.
//!
//! The fourth component of the root vector doubles as a tri-state signal.
//! The client raises [`SyncSignal::SaveRequest`] once it saved a pose; the
//! server latches it and answers with [`SyncSignal::Ready`] when its own
//! `sync_saved` is armed. Either side latches `has_new_sync` on receipt.

use crate::layout::SharedRecord;

/// Root, left and right look-at positions.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LookAtVectors {
    pub root: [f32; 4],
    pub left: [f32; 4],
    pub right: [f32; 4],
}

impl LookAtVectors {
    pub fn from_record(record: &SharedRecord) -> Self {
        Self {
            root: record.look_at_root,
            left: record.look_at_left,
            right: record.look_at_right,
        }
    }

    pub fn write_to(&self, record: &mut SharedRecord) {
        record.look_at_root = self.root;
        record.look_at_left = self.left;
        record.look_at_right = self.right;
    }

    /// Copy only the xyz components, leaving the signal channel alone.
    fn write_positions_to(&self, record: &mut SharedRecord) {
        record.look_at_root[..3].copy_from_slice(&self.root[..3]);
        record.look_at_left[..3].copy_from_slice(&self.left[..3]);
        record.look_at_right[..3].copy_from_slice(&self.right[..3]);
    }
}

/// Value carried in `look_at_root[3]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncSignal {
    #[default]
    None,
    /// Client to server: pose saved.
    SaveRequest,
    /// Server to client: save acknowledged, ready to import.
    Ready,
}

impl SyncSignal {
    /// Decode the channel. Anything other than exactly 1 or 2 reads as none.
    pub fn from_channel(value: f32) -> Self {
        if value == 1.0 {
            SyncSignal::SaveRequest
        } else if value == 2.0 {
            SyncSignal::Ready
        } else {
            SyncSignal::None
        }
    }

    pub fn to_channel(self) -> f32 {
        match self {
            SyncSignal::None => 0.0,
            SyncSignal::SaveRequest => 1.0,
            SyncSignal::Ready => 2.0,
        }
    }
}

/// Per-session look-at state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LookAtSync {
    pub vectors: LookAtVectors,
    pub has_new_sync: bool,
    /// Arms the outgoing signal for the next commit only.
    pub sync_saved: bool,
}

impl LookAtSync {
    /// Consume the one-shot "new sync" latch.
    pub fn get_and_reset_has_new_sync(&mut self) -> bool {
        std::mem::take(&mut self.has_new_sync)
    }

    /// Server side: take the client's vectors from `shared` into `local`,
    /// answer a save request and adopt the merged vectors.
    pub fn merge_on_server(&mut self, shared: &SharedRecord, local: &mut SharedRecord) {
        LookAtVectors::from_record(shared).write_to(local);

        match SyncSignal::from_channel(local.look_at_root[3]) {
            SyncSignal::SaveRequest => {
                self.has_new_sync = true;
                local.look_at_root[3] = SyncSignal::None.to_channel();
            }
            _ if self.sync_saved => {
                local.look_at_root[3] = SyncSignal::Ready.to_channel();
            }
            _ => {}
        }
        self.sync_saved = false;
        self.vectors = LookAtVectors::from_record(local);
    }

    /// Client side: latch the server's answer from `shared` and publish the
    /// local vectors plus this side's signal into it.
    pub fn publish_on_client(&mut self, shared: &mut SharedRecord) {
        if SyncSignal::from_channel(shared.look_at_root[3]) == SyncSignal::Ready {
            self.has_new_sync = true;
        }

        self.vectors.write_positions_to(shared);
        shared.look_at_root[3] = if self.sync_saved {
            SyncSignal::SaveRequest
        } else {
            SyncSignal::None
        }
        .to_channel();
        self.sync_saved = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_channel_decoding() {
        assert_eq!(SyncSignal::from_channel(0.0), SyncSignal::None);
        assert_eq!(SyncSignal::from_channel(1.0), SyncSignal::SaveRequest);
        assert_eq!(SyncSignal::from_channel(2.0), SyncSignal::Ready);
        assert_eq!(SyncSignal::from_channel(1.5), SyncSignal::None);
        assert_eq!(SyncSignal::Ready.to_channel(), 2.0);
    }

    #[test]
    fn has_new_sync_is_one_shot() {
        let mut sync = LookAtSync {
            has_new_sync: true,
            ..Default::default()
        };
        assert!(sync.get_and_reset_has_new_sync());
        assert!(!sync.get_and_reset_has_new_sync());
    }

    #[test]
    fn client_request_is_latched_and_cleared_by_server() {
        let mut client = LookAtSync::default();
        client.vectors.root = [1.0, 2.0, 3.0, 0.0];
        client.sync_saved = true;

        let mut shared = SharedRecord::default();
        client.publish_on_client(&mut shared);
        assert_eq!(shared.look_at_root, [1.0, 2.0, 3.0, 1.0]);
        assert!(!client.sync_saved);

        let mut server = LookAtSync::default();
        let mut local = SharedRecord::default();
        server.merge_on_server(&shared, &mut local);
        assert!(server.get_and_reset_has_new_sync());
        assert_eq!(local.look_at_root, [1.0, 2.0, 3.0, 0.0]);
        assert_eq!(server.vectors.root, [1.0, 2.0, 3.0, 0.0]);
    }

    #[test]
    fn server_answer_reaches_client() {
        let mut server = LookAtSync {
            sync_saved: true,
            ..Default::default()
        };
        let shared = SharedRecord::default();
        let mut local = SharedRecord::default();
        server.merge_on_server(&shared, &mut local);
        assert_eq!(local.look_at_root[3], 2.0);
        assert!(!server.sync_saved);
        assert!(!server.has_new_sync);

        let mut client = LookAtSync::default();
        let mut wire = local;
        client.publish_on_client(&mut wire);
        assert!(client.get_and_reset_has_new_sync());
        // The client's reply overwrites the answer.
        assert_eq!(wire.look_at_root[3], 0.0);
    }

    #[test]
    fn client_request_wins_over_server_answer() {
        let mut server = LookAtSync {
            sync_saved: true,
            ..Default::default()
        };
        let mut shared = SharedRecord::default();
        shared.look_at_root[3] = 1.0;
        let mut local = SharedRecord::default();

        server.merge_on_server(&shared, &mut local);
        assert!(server.has_new_sync);
        assert_eq!(local.look_at_root[3], 0.0);
        // Disarmed even though the answer was not sent.
        assert!(!server.sync_saved);
    }

    #[test]
    fn client_positions_leave_other_components_to_signal() {
        let mut client = LookAtSync::default();
        client.vectors.left = [4.0, 5.0, 6.0, 9.0];

        let mut shared = SharedRecord::default();
        shared.look_at_left[3] = 7.0;
        client.publish_on_client(&mut shared);
        assert_eq!(shared.look_at_left, [4.0, 5.0, 6.0, 7.0]);
    }
}
