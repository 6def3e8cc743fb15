//! Binary layout of the record exchanged between the two peers.
//!
//! Both processes copy [`SharedRecord`] byte-for-byte, so every type here is
//! `#[repr(C)]`, padding-free and [`Pod`]. There is no version negotiation in
//! the record itself; the segment header (see [`crate::segment`]) carries the
//! layout check.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  RecordHeader                       24 bytes │
//! │  model name hash / resource hash     8 bytes │
//! │  command + reserved                  8 bytes │
//! │  server PlayerInfo                  32 bytes │
//! │  client PlayerInfo                  32 bytes │
//! │  look-at root / left / right        48 bytes │
//! │  joints[128]             128 x 52 = 6656     │
//! │  properties[32]           32 x 8  =  256     │
//! └──────────────────────────────────────────────┘
//! ```

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

/// Fixed joint capacity of a record.
pub const MAX_JOINTS: usize = 128;

/// Fixed property capacity of a record.
pub const MAX_PROPERTIES: usize = 32;

/// Size of [`SharedRecord`] in bytes.
pub const RECORD_SIZE: usize = core::mem::size_of::<SharedRecord>();

const _: () = assert!(core::mem::size_of::<RecordHeader>() == 24);
const _: () = assert!(core::mem::size_of::<Transform>() == 40);
const _: () = assert!(core::mem::size_of::<JointData>() == 52);
const _: () = assert!(core::mem::size_of::<PropertyData>() == 8);
const _: () = assert!(core::mem::size_of::<PlayerInfo>() == 32);
const _: () = assert!(core::mem::size_of::<SharedRecord>() == 7064);

/// Which side of the pair a process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Creates the OS objects and owns the first write turn.
    Server,
    /// Opens the objects the server created.
    Client,
}

impl Role {
    /// The opposite role.
    #[inline]
    pub fn peer(self) -> Role {
        match self {
            Role::Server => Role::Client,
            Role::Client => Role::Server,
        }
    }

    #[inline]
    pub fn is_server(self) -> bool {
        self == Role::Server
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Server => "server",
            Role::Client => "client",
        }
    }
}

impl From<bool> for Role {
    /// `true` selects the server role, mirroring `Open(pair, is_server)`.
    fn from(is_server: bool) -> Self {
        if is_server {
            Role::Server
        } else {
            Role::Client
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reserved command channel. Nothing in the bridge acts on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum Command {
    #[default]
    None = 0,
    ServerRequest = 1,
    ClientRequest = 2,
}

impl Command {
    /// Decode the raw field. Unknown values read as [`Command::None`].
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Command::ServerRequest,
            2 => Command::ClientRequest,
            _ => Command::None,
        }
    }
}

bitflags! {
    /// Interpretation hints for a joint transform.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct JointFlags: u32 {
        const ROTATION_QUATERNION = 1 << 0;
        const ROTATION_EULER = 1 << 1;
        const TRANSFORM_LOCAL = 1 << 2;
        const TRANSFORM_MODEL = 1 << 3;
    }
}

/// Record header. The offsets are echoed diagnostics, not used for addressing.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct RecordHeader {
    pub server_tag: u32,
    pub client_tag: u32,
    pub model_count: u32,
    pub property_count: u32,
    pub models_offset: u32,
    pub properties_offset: u32,
}

/// Translation, rotation (quaternion or euler, see [`JointFlags`]) and scale.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Transform {
    pub translation: [f32; 3],
    pub rotation: [f32; 4],
    pub scale: [f32; 3],
}

/// One joint, matched across processes by `name_hash`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct JointData {
    pub name_hash: u32,
    /// Zero when the joint has no parent.
    pub parent_hash: u32,
    pub flags: u32,
    pub transform: Transform,
}

impl JointData {
    #[inline]
    pub fn flags(&self) -> JointFlags {
        JointFlags::from_bits_truncate(self.flags)
    }

    #[inline]
    pub fn set_flags(&mut self, flags: JointFlags) {
        self.flags = flags.bits();
    }
}

/// A named scalar channel (wrinkle map weight, blend value, ...).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct PropertyData {
    pub name_hash: u32,
    pub value: f32,
}

/// Playback state of one side.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct PlayerInfo {
    pub system_time: f64,
    pub local_time: f64,
    pub is_playing: i32,
    pub start_time: f32,
    pub stop_time: f32,
    /// Edge-triggered: nonzero means "local time changed", cleared by the reader.
    pub time_changed_event: f32,
}

impl PlayerInfo {
    #[inline]
    pub fn playing(&self) -> bool {
        self.is_playing != 0
    }

    #[inline]
    pub fn set_playing(&mut self, playing: bool) {
        self.is_playing = i32::from(playing);
    }
}

/// The flat record both processes agree on.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SharedRecord {
    pub header: RecordHeader,
    pub model_name_hash: u32,
    pub model_resource_hash: u32,
    pub command: u32,
    /// Keeps the player blocks 8-byte aligned without implicit padding.
    pub reserved: u32,
    pub server_player: PlayerInfo,
    pub client_player: PlayerInfo,
    /// The 4th component carries the look-at sync signal.
    pub look_at_root: [f32; 4],
    pub look_at_left: [f32; 4],
    pub look_at_right: [f32; 4],
    pub joints: [JointData; MAX_JOINTS],
    pub properties: [PropertyData; MAX_PROPERTIES],
}

impl Default for SharedRecord {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl SharedRecord {
    /// Player block written by `role`.
    #[inline]
    pub fn player(&self, role: Role) -> &PlayerInfo {
        match role {
            Role::Server => &self.server_player,
            Role::Client => &self.client_player,
        }
    }

    #[inline]
    pub fn player_mut(&mut self, role: Role) -> &mut PlayerInfo {
        match role {
            Role::Server => &mut self.server_player,
            Role::Client => &mut self.client_player,
        }
    }

    pub fn command(&self) -> Command {
        Command::from_raw(self.command)
    }

    pub fn set_command(&mut self, command: Command) {
        self.command = command as u32;
    }

    /// Joints covered by the header count, clamped to capacity.
    pub fn joints(&self) -> &[JointData] {
        let count = (self.header.model_count as usize).min(MAX_JOINTS);
        &self.joints[..count]
    }

    /// Properties covered by the header count, clamped to capacity.
    pub fn properties(&self) -> &[PropertyData] {
        let count = (self.header.property_count as usize).min(MAX_PROPERTIES);
        &self.properties[..count]
    }

    /// Copy joints into the record and update the header count.
    ///
    /// Entries past [`MAX_JOINTS`] are dropped. Returns how many were stored.
    pub fn set_joints(&mut self, joints: &[JointData]) -> usize {
        let len = joints.len().min(MAX_JOINTS);
        self.joints[..len].copy_from_slice(&joints[..len]);
        self.header.model_count = len as u32;
        len
    }

    /// Copy properties into the record and update the header count.
    ///
    /// Entries past [`MAX_PROPERTIES`] are dropped. Returns how many were stored.
    pub fn set_properties(&mut self, properties: &[PropertyData]) -> usize {
        let len = properties.len().min(MAX_PROPERTIES);
        self.properties[..len].copy_from_slice(&properties[..len]);
        self.header.property_count = len as u32;
        len
    }

    /// Raw bytes as they appear in the shared segment.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}
