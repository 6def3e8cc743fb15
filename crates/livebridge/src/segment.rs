//! The named shared segment: a 64-byte header followed by one record.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  SegmentHeader (64 bytes)                    │
//! │    magic, layout version, record size        │
//! │    turn token, commit counter, owner         │
//! ├──────────────────────────────────────────────┤
//! │  SharedRecord                                │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The turn token gives real mutual exclusion between writers. The named
//! signals only say whose turn it should be next; a writer still has to move
//! the token from [`Turn::Idle`] to its own turn before touching the record.
//!
//! At most one live server owns a segment. The owner word holds the
//! server's pid in the high half and a per-open sequence number in the low
//! half; a second server on the same name fails with
//! [`BridgeError::PairInUse`] instead of replacing or wiping the segment.
//! A segment whose owner has exited is reclaimed in place, which also
//! returns a turn token left held by the dead process to [`Turn::Idle`].

use std::io::ErrorKind;
use std::ptr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::error::{BridgeError, Result};
use crate::layout::{Role, SharedRecord, RECORD_SIZE};
use crate::sys::{process_alive, MappedRegion};

/// "LVBR"
pub const MAGIC: u32 = 0x4C56_4252;

/// Bumped whenever [`SharedRecord`] changes shape.
pub const LAYOUT_VERSION: u32 = 2;

pub const HEADER_SIZE: usize = 64;

/// Bytes of the whole segment.
pub const SEGMENT_SIZE: usize = HEADER_SIZE + RECORD_SIZE;

/// Segment header (64 bytes, 8-byte aligned).
#[repr(C)]
pub struct SegmentHeader {
    /// Written last by the creator; zero until the segment is ready.
    pub magic: AtomicU32,
    pub version: u32,
    pub record_size: u32,
    /// See [`Turn`].
    pub turn: AtomicU32,
    /// Completed commits by either side.
    pub commits: AtomicU64,
    /// Owning server, `pid << 32 | sequence`; zero when unowned.
    pub owner: AtomicU64,
    _reserved: [u8; 32],
}

const _: () = assert!(core::mem::size_of::<SegmentHeader>() == HEADER_SIZE);
const _: () = assert!(HEADER_SIZE % core::mem::align_of::<SharedRecord>() == 0);

/// Who currently holds the write turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Turn {
    Idle = 0,
    ServerTurn = 1,
    ClientTurn = 2,
}

impl Turn {
    pub fn of(role: Role) -> Self {
        match role {
            Role::Server => Turn::ServerTurn,
            Role::Client => Turn::ClientTurn,
        }
    }

    fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Turn::ServerTurn,
            2 => Turn::ClientTurn,
            _ => Turn::Idle,
        }
    }
}

/// A fresh owner word for this process.
fn next_owner() -> u64 {
    static SEQUENCE: AtomicU32 = AtomicU32::new(1);
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed).max(1);
    (u64::from(std::process::id()) << 32) | u64::from(seq)
}

/// Pid half of an owner word.
#[inline]
pub fn owner_pid(owner: u64) -> u32 {
    (owner >> 32) as u32
}

/// A mapped segment.
pub struct SharedSegment {
    name: String,
    region: MappedRegion,
    /// Owner word this handle stamped; zero for handles that only opened.
    owner: u64,
}

impl SharedSegment {
    /// Create and own the segment, or reclaim one whose server has exited.
    ///
    /// Fails with [`BridgeError::PairInUse`] while another server owns it.
    pub fn create(name: &str) -> Result<Self> {
        let region = match MappedRegion::create(name, SEGMENT_SIZE) {
            Ok(region) => region,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                MappedRegion::open(name, SEGMENT_SIZE).map_err(|e| BridgeError::map_failure(name, e))?
            }
            Err(e) => return Err(BridgeError::map_failure(name, e)),
        };
        let mut segment = Self {
            name: name.to_owned(),
            region,
            owner: 0,
        };

        let owner = next_owner();
        segment.claim(owner)?;
        segment.owner = owner;

        // Clients of a dead owner fail validation until the magic is back.
        segment.header().magic.store(0, Ordering::Release);
        // SAFETY: owned from here on; nobody passes the magic check until
        // the Release store below.
        unsafe {
            let header = segment.region.as_ptr() as *mut SegmentHeader;
            (*header).version = LAYOUT_VERSION;
            (*header).record_size = RECORD_SIZE as u32;
            ptr::write_bytes(segment.record_ptr(), 0, 1);
        }
        segment.header().turn.store(Turn::Idle as u32, Ordering::Relaxed);
        segment.header().magic.store(MAGIC, Ordering::Release);

        Ok(segment)
    }

    /// Move the owner word from a free or dead owner to `owner`.
    fn claim(&self, owner: u64) -> Result<()> {
        let word = &self.header().owner;
        let current = word.load(Ordering::Acquire);
        if current != 0 && process_alive(owner_pid(current)) {
            return Err(BridgeError::PairInUse {
                name: self.name.clone(),
                pid: owner_pid(current),
            });
        }
        if current != 0 {
            tracing::warn!(
                segment = %self.name,
                pid = owner_pid(current),
                "reclaiming segment of an exited server"
            );
        }
        word.compare_exchange(current, owner, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|winner| BridgeError::PairInUse {
                name: self.name.clone(),
                pid: owner_pid(winner),
            })
    }

    /// Whether this handle still owns the segment.
    pub fn is_owner(&self) -> bool {
        self.owner != 0 && self.header().owner.load(Ordering::Acquire) == self.owner
    }

    /// Give up ownership. Returns false if this handle did not own it.
    pub fn release(&mut self) -> bool {
        if self.owner == 0 {
            return false;
        }
        let released = self
            .header()
            .owner
            .compare_exchange(self.owner, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        self.owner = 0;
        released
    }

    /// Map an existing segment and validate its header.
    pub fn open(name: &str) -> Result<Self> {
        let region =
            MappedRegion::open(name, SEGMENT_SIZE).map_err(|e| BridgeError::map_failure(name, e))?;
        let segment = Self {
            name: name.to_owned(),
            region,
            owner: 0,
        };
        segment.validate()?;
        Ok(segment)
    }

    fn validate(&self) -> Result<()> {
        let header = self.header();
        let mismatch = |expected, found| BridgeError::LayoutMismatch {
            name: self.name.clone(),
            expected,
            found,
        };

        match header.magic.load(Ordering::Acquire) {
            0 => return Err(BridgeError::NotFound(format!("shared segment `{}`", self.name))),
            MAGIC => {}
            other => return Err(mismatch(MAGIC, other)),
        }
        if header.version != LAYOUT_VERSION {
            return Err(mismatch(LAYOUT_VERSION, header.version));
        }
        if header.record_size != RECORD_SIZE as u32 {
            return Err(mismatch(RECORD_SIZE as u32, header.record_size));
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn header(&self) -> &SegmentHeader {
        // SAFETY: the region is at least SEGMENT_SIZE bytes and page aligned;
        // the shared fields are atomics or written only before publication.
        unsafe { &*(self.region.as_ptr() as *const SegmentHeader) }
    }

    pub fn turn(&self) -> Turn {
        Turn::from_raw(self.header().turn.load(Ordering::Acquire))
    }

    pub fn commits(&self) -> u64 {
        self.header().commits.load(Ordering::Relaxed)
    }

    /// Move the token from idle to `role`'s turn.
    ///
    /// Returns `None` if another writer holds it.
    pub fn try_acquire(&mut self, role: Role) -> Option<TurnGuard<'_>> {
        let turn = Turn::of(role);
        self.header()
            .turn
            .compare_exchange(
                Turn::Idle as u32,
                turn as u32,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok()?;
        Some(TurnGuard { segment: self })
    }

    fn record_ptr(&self) -> *mut SharedRecord {
        debug_assert!(self.region.len() >= SEGMENT_SIZE);
        // SAFETY: HEADER_SIZE is within the region and keeps 8-byte alignment.
        unsafe { self.region.as_ptr().add(HEADER_SIZE) as *mut SharedRecord }
    }
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        self.release();
    }
}

/// Exclusive access to the record while holding the turn.
///
/// Returns the token to [`Turn::Idle`] on drop. If the holding process dies
/// first, the token stays taken until a new server reclaims the segment.
pub struct TurnGuard<'a> {
    segment: &'a mut SharedSegment,
}

impl TurnGuard<'_> {
    pub fn record(&self) -> &SharedRecord {
        // SAFETY: holding the token excludes every other writer.
        unsafe { &*self.segment.record_ptr() }
    }

    pub fn record_mut(&mut self) -> &mut SharedRecord {
        // SAFETY: as above, and `&mut self` excludes local aliases.
        unsafe { &mut *self.segment.record_ptr() }
    }
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        let header = self.segment.header();
        header.commits.fetch_add(1, Ordering::Relaxed);
        header.turn.store(Turn::Idle as u32, Ordering::Release);
    }
}
