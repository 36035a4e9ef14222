//! Change records
//!
//! The unit handed to consumers: what changed (kind and sizes), which
//! object and parent, who did it, and from which terminal.
//!
//! In memory a record uses Rust types (`ChangeKind` is a sum type, absent
//! terminals are `None`). On the wire it is a fixed 336-byte little-endian
//! layout whose `change_type` word packs the kind into bits 0..4 and a
//! MODIFY's byte count into bits 4..64.

use crate::error::DecodeError;
use crate::key::EntityKey;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Capacity of the file name field, terminator included
pub const NAME_MAX: usize = 255;

/// Nominal size reported for directories
pub const DIR_SIZE: i64 = 4096;

/// Sentinel for an unreadable uid/gid
pub const UNKNOWN_ID: u32 = u32::MAX;

/// Sentinel terminal index on the wire
pub const NO_TTY_INDEX: u32 = u32::MAX;

/// Sentinel terminal driver major on the wire
pub const NO_TTY_MAJOR: i32 = -1;

const KIND_BITS: u32 = 4;
const KIND_MASK: u64 = (1 << KIND_BITS) - 1;
const MAX_PACKED_BYTES: u64 = u64::MAX >> KIND_BITS;

/// Kind of change a record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ChangeKind {
    /// Object created under a watched directory
    Create,
    /// Watched object written
    Modify {
        /// Bytes transferred by the write
        bytes: u64,
    },
    /// Watched object removed
    Delete,
    /// Watched object renamed, or moved into a watched directory
    Rename,
}

impl ChangeKind {
    /// Wire discriminant (low four bits of `change_type`)
    pub fn discriminant(&self) -> u64 {
        match self {
            ChangeKind::Create => 0x1,
            ChangeKind::Modify { .. } => 0x2,
            ChangeKind::Delete => 0x3,
            ChangeKind::Rename => 0x4,
        }
    }

    /// Pack into the `change_type` wire word. Byte counts that do not fit
    /// in 60 bits saturate.
    pub fn pack(&self) -> u64 {
        let bytes = match self {
            ChangeKind::Modify { bytes } => (*bytes).min(MAX_PACKED_BYTES),
            _ => 0,
        };
        (bytes << KIND_BITS) | self.discriminant()
    }

    /// Unpack a `change_type` wire word
    pub fn unpack(change_type: u64) -> Result<Self, DecodeError> {
        let bytes = change_type >> KIND_BITS;
        match change_type & KIND_MASK {
            0x1 => Ok(ChangeKind::Create),
            0x2 => Ok(ChangeKind::Modify { bytes }),
            0x3 => Ok(ChangeKind::Delete),
            0x4 => Ok(ChangeKind::Rename),
            _ => Err(DecodeError::UnknownKind(change_type)),
        }
    }

    /// Upper-case label without payload
    pub fn label(&self) -> &'static str {
        match self {
            ChangeKind::Create => "CREATE",
            ChangeKind::Modify { .. } => "MODIFY",
            ChangeKind::Delete => "DELETE",
            ChangeKind::Rename => "RENAME",
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::Modify { bytes } => write!(f, "MODIFY [{} bytes]", bytes),
            other => f.write_str(other.label()),
        }
    }
}

/// Fixed-capacity file name.
///
/// Holds at most `NAME_MAX - 1` bytes so the wire field always keeps a
/// terminating NUL. Longer names are truncated; input stops at the first
/// NUL, like a kernel string read.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FileName {
    bytes: [u8; NAME_MAX],
    len: u8,
}

impl FileName {
    /// Empty name
    pub const EMPTY: FileName = FileName {
        bytes: [0; NAME_MAX],
        len: 0,
    };

    /// Copy a name, truncating it to the field capacity
    pub fn from_bytes(raw: &[u8]) -> Self {
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        let len = end.min(NAME_MAX - 1);

        let mut bytes = [0u8; NAME_MAX];
        bytes[..len].copy_from_slice(&raw[..len]);
        Self {
            bytes,
            len: len as u8,
        }
    }

    /// Name bytes without the terminator
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// Lossy UTF-8 rendering
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(self.as_bytes()).into_owned()
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Whether the name is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for FileName {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl From<&str> for FileName {
    fn from(name: &str) -> Self {
        Self::from_bytes(name.as_bytes())
    }
}

impl std::fmt::Debug for FileName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.to_string_lossy())
    }
}

impl std::fmt::Display for FileName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

impl Serialize for FileName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string_lossy())
    }
}

impl<'de> Deserialize<'de> for FileName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(FileName::from(name.as_str()))
    }
}

/// Controlling terminal of the acting task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TtyAttribution {
    /// Terminal index (`tty->index`)
    pub index: Option<u32>,
    /// Terminal driver major (`tty->driver->major`)
    pub major: Option<i32>,
}

impl TtyAttribution {
    /// No controlling terminal
    pub const NONE: TtyAttribution = TtyAttribution {
        index: None,
        major: None,
    };

    /// Whether a terminal was found
    pub fn is_attached(&self) -> bool {
        self.index.is_some()
    }

    fn from_wire(index: u32, major: i32) -> Self {
        Self {
            index: (index != NO_TTY_INDEX).then_some(index),
            major: (major != NO_TTY_MAJOR).then_some(major),
        }
    }
}

impl std::fmt::Display for TtyAttribution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.major, self.index) {
            (Some(major), Some(index)) => write!(f, "{}/{}", major, index),
            (None, Some(index)) => write!(f, "?/{}", index),
            _ => f.write_str("none"),
        }
    }
}

/// Size of one record on the wire
pub const RECORD_SIZE: usize = 336;

/// One observed change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Directory containing the object
    pub parent: EntityKey,
    /// The object itself
    pub subject: EntityKey,
    /// What happened
    #[serde(flatten)]
    pub kind: ChangeKind,
    /// Acting uid
    pub uid: u32,
    /// Acting gid
    pub gid: u32,
    /// Inode change time in seconds (create/modify only)
    pub mtime: Option<i64>,
    /// Controlling terminal of the actor
    pub tty: TtyAttribution,
    /// Size before the change
    pub before_size: i64,
    /// Size after the change
    pub after_size: i64,
    /// Object name (not a full path)
    pub filename: FileName,
}

impl ChangeRecord {
    /// Start a record; principal, terminal, sizes and mtime default to
    /// unknown/zero and are filled in with the `with_*` builders.
    pub fn new(kind: ChangeKind, parent: EntityKey, subject: EntityKey, filename: FileName) -> Self {
        Self {
            parent,
            subject,
            kind,
            uid: UNKNOWN_ID,
            gid: UNKNOWN_ID,
            mtime: None,
            tty: TtyAttribution::NONE,
            before_size: 0,
            after_size: 0,
            filename,
        }
    }

    /// Set sizes. Negative sizes clamp to zero, a CREATE's before size and
    /// a DELETE's after size are forced to zero.
    pub fn with_sizes(mut self, before_size: i64, after_size: i64) -> Self {
        self.before_size = match self.kind {
            ChangeKind::Create => 0,
            _ => before_size.max(0),
        };
        self.after_size = match self.kind {
            ChangeKind::Delete => 0,
            _ => after_size.max(0),
        };
        self
    }

    /// Set the acting principal
    pub fn with_principal(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    /// Set terminal attribution
    pub fn with_tty(mut self, tty: TtyAttribution) -> Self {
        self.tty = tty;
        self
    }

    /// Set the modification timestamp
    pub fn with_mtime(mut self, mtime: Option<i64>) -> Self {
        self.mtime = mtime;
        self
    }

    /// Encode into the fixed wire layout
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut out = [0u8; RECORD_SIZE];
        let mut w = Writer::new(&mut out);
        w.put(&self.parent.inode_number.to_le_bytes());
        w.put(&self.parent.device_id.to_le_bytes());
        w.put(&self.subject.inode_number.to_le_bytes());
        w.put(&self.subject.device_id.to_le_bytes());
        w.put(&self.uid.to_le_bytes());
        w.put(&self.gid.to_le_bytes());
        w.put(&self.kind.pack().to_le_bytes());
        w.put(&self.mtime.unwrap_or(0).to_le_bytes());
        w.put(&self.tty.index.unwrap_or(NO_TTY_INDEX).to_le_bytes());
        w.put(&self.tty.major.unwrap_or(NO_TTY_MAJOR).to_le_bytes());
        w.put(&self.before_size.to_le_bytes());
        w.put(&self.after_size.to_le_bytes());
        w.put(&self.filename.bytes);
        out
    }

    /// Decode one record from the start of `raw`
    pub fn from_bytes(raw: &[u8]) -> Result<Self, DecodeError> {
        if raw.len() < RECORD_SIZE {
            return Err(DecodeError::ShortRecord {
                len: raw.len(),
                expected: RECORD_SIZE,
            });
        }

        let mut r = Reader::new(raw);
        let parent = EntityKey::new(r.u64(), r.u64());
        let subject = EntityKey::new(r.u64(), r.u64());
        let uid = r.u32();
        let gid = r.u32();
        let kind = ChangeKind::unpack(r.u64())?;
        let mtime = r.i64();
        let tty = TtyAttribution::from_wire(r.u32(), r.i32());
        let before_size = r.i64();
        let after_size = r.i64();
        let filename = FileName::from_bytes(r.take(NAME_MAX));

        Ok(Self {
            parent,
            subject,
            kind,
            uid,
            gid,
            mtime: (mtime != 0).then_some(mtime),
            tty,
            before_size,
            after_size,
            filename,
        })
    }
}

struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn put(&mut self, bytes: &[u8]) {
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> &'a [u8] {
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        out
    }

    fn array<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N));
        out
    }

    fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.array())
    }

    fn i64(&mut self) -> i64 {
        i64::from_le_bytes(self.array())
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.array())
    }

    fn i32(&mut self) -> i32 {
        i32::from_le_bytes(self.array())
    }
}
