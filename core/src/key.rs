//! Entity keys
//!
//! A filesystem object is identified by its inode number and the device id
//! of its superblock. Keys are only stable for the lifetime of one inode
//! allocation; after a delete the same pair may name a different file.

use serde::{Deserialize, Serialize};

/// Canonical identity of a filesystem object
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct EntityKey {
    /// Inode number (`i_ino`)
    pub inode_number: u64,
    /// Device id in kernel encoding (`i_sb->s_dev`)
    pub device_id: u64,
}

impl EntityKey {
    /// Placeholder for an identity the hook could not read
    pub const UNKNOWN: EntityKey = EntityKey {
        inode_number: 0,
        device_id: 0,
    };

    /// Create a key from an inode number and a kernel-encoded device id
    pub const fn new(inode_number: u64, device_id: u64) -> Self {
        Self {
            inode_number,
            device_id,
        }
    }

    /// Whether this key is the unknown placeholder
    pub fn is_unknown(&self) -> bool {
        *self == Self::UNKNOWN
    }

    /// Build a key from userspace file metadata
    #[cfg(unix)]
    pub fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self::new(metadata.ino(), kernel_dev(metadata.dev()))
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.inode_number, self.device_id)
    }
}

/// Convert a userspace `st_dev` into the in-kernel `s_dev` encoding.
///
/// `stat(2)` reports the new-style encoding (12-bit major split around the
/// minor), while the superblock stores `major << 20 | minor`. Policy keys
/// must use the kernel form or hooks will never match them.
pub fn kernel_dev(st_dev: u64) -> u64 {
    let major = (st_dev >> 8) & 0xfff;
    let minor = (st_dev & 0xff) | ((st_dev >> 12) & 0xfff00);
    (major << 20) | minor
}
