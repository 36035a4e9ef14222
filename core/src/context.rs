//! Views of the kernel objects a hook receives, and context enrichment.
//!
//! Every link between objects is an `Option`: a dentry may have no inode
//! yet, a kernel thread has no signal struct, a session may have no
//! terminal. Multi-hop reads are written as `and_then` chains so a missing
//! hop yields "unknown" instead of failing the hook.

use crate::event::{TtyAttribution, UNKNOWN_ID};
use crate::key::EntityKey;

/// `struct super_block`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperBlockView {
    /// `s_dev`
    pub dev: u64,
}

/// `struct inode`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InodeView {
    /// `i_ino`
    pub ino: u64,
    /// `i_size`
    pub size: i64,
    /// `i_ctime` seconds, when readable
    pub ctime_sec: Option<i64>,
    /// `i_sb`
    pub sb: Option<SuperBlockView>,
}

impl InodeView {
    /// Identity of this inode, if its superblock is readable
    pub fn key(&self) -> Option<EntityKey> {
        self.sb.map(|sb| EntityKey::new(self.ino, sb.dev))
    }
}

/// `struct dentry`
#[derive(Debug, Clone, Copy)]
pub struct DentryView<'a> {
    /// `d_name`
    pub name: &'a [u8],
    /// `d_inode` (absent for negative dentries)
    pub inode: Option<&'a InodeView>,
    /// `d_parent`
    pub parent: Option<&'a DentryView<'a>>,
}

impl<'a> DentryView<'a> {
    /// `dentry->d_inode`'s identity
    pub fn inode_key(&self) -> Option<EntityKey> {
        self.inode.and_then(InodeView::key)
    }

    /// `dentry->d_parent->d_inode`
    pub fn parent_inode(&self) -> Option<&'a InodeView> {
        self.parent.and_then(|parent| parent.inode)
    }

    /// `dentry->d_parent->d_inode`'s identity
    pub fn parent_key(&self) -> Option<EntityKey> {
        self.parent_inode().and_then(InodeView::key)
    }
}

/// `struct file`
#[derive(Debug, Clone, Copy)]
pub struct FileView<'a> {
    /// `f_inode`
    pub inode: Option<&'a InodeView>,
    /// `f_path.dentry`
    pub dentry: Option<&'a DentryView<'a>>,
}

impl<'a> FileView<'a> {
    /// Identity of the file's inode
    pub fn key(&self) -> Option<EntityKey> {
        self.inode.and_then(InodeView::key)
    }

    /// Identity of the directory containing the file
    pub fn parent_key(&self) -> Option<EntityKey> {
        self.dentry.and_then(DentryView::parent_key)
    }

    /// Name the file was opened under
    pub fn name(&self) -> &'a [u8] {
        self.dentry.map(|d| d.name).unwrap_or_default()
    }
}

/// `struct tty_driver`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtyDriverView {
    /// `major`
    pub major: i32,
}

/// `struct tty_struct`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtyView {
    /// `index`
    pub index: u32,
    /// `driver`
    pub driver: Option<TtyDriverView>,
}

/// `struct signal_struct`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalView {
    /// `tty`
    pub tty: Option<TtyView>,
}

/// `struct task_struct` plus the current credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskView {
    /// Current uid
    pub uid: u32,
    /// Current gid
    pub gid: u32,
    /// `signal` (absent for kernel threads)
    pub signal: Option<SignalView>,
}

/// Controlling terminal of `task`.
///
/// Walks task → signal → tty → driver. A missing task, signal or tty gives
/// no attribution; a tty without a driver keeps its index but no major.
pub fn tty_attribution(task: Option<&TaskView>) -> TtyAttribution {
    let Some(tty) = task.and_then(|t| t.signal).and_then(|s| s.tty) else {
        return TtyAttribution::NONE;
    };

    TtyAttribution {
        index: Some(tty.index),
        major: tty.driver.map(|driver| driver.major),
    }
}

/// Acting uid/gid of `task`, or the unknown sentinel
pub fn principal(task: Option<&TaskView>) -> (u32, u32) {
    task.map(|t| (t.uid, t.gid))
        .unwrap_or((UNKNOWN_ID, UNKNOWN_ID))
}
