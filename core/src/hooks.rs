//! Hook handlers
//!
//! One handler per monitored filesystem operation. Each runs to completion
//! on the thread that triggered the operation and follows the same shape:
//! derive the entity key, consult the policy store, return early on a
//! miss, otherwise build a record, enrich it, and submit it.
//!
//! Handlers never fail. What they did is reported as a [`HookOutcome`].

use crate::channel::{channel, Delivery, EventChannel, EventReceiver};
use crate::config::Config;
use crate::context::{principal, tty_attribution, DentryView, FileView, InodeView, TaskView};
use crate::correlation::{CorrelationToken, WriteCorrelationStore};
use crate::event::{ChangeKind, ChangeRecord, FileName, DIR_SIZE};
use crate::key::EntityKey;
use crate::policy::{PolicyRecord, PolicyStore};
use std::sync::Arc;
use tracing::debug;

/// Kind of object a create/delete hook fired for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    File,
    Directory,
}

/// Why a handler that matched did not emit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Write transferred no bytes (or failed)
    EmptyWrite,
    /// Write-exit without a pending write-entry
    Uncorrelated,
    /// The object's own identity could not be read
    NoIdentity,
    /// The object stopped being watched while the write was in flight
    Unwatched,
}

/// What a handler invocation did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    /// Not watched; nothing happened
    Ignored,
    /// Write-entry parked the pre-write size
    Seeded,
    /// Matched but deliberately produced no record
    Skipped(SkipReason),
    /// A record was built and submitted
    Emitted(Delivery),
}

impl HookOutcome {
    /// Whether a record reached the channel or its fallback
    pub fn emitted(&self) -> bool {
        matches!(
            self,
            HookOutcome::Emitted(Delivery::Delivered) | HookOutcome::Emitted(Delivery::Fallback)
        )
    }
}

/// The hook-side monitor: policy store, correlation store and channel
#[derive(Clone)]
pub struct Monitor {
    policy: Arc<PolicyStore>,
    correlation: Arc<WriteCorrelationStore>,
    events: EventChannel,
}

impl Monitor {
    /// Assemble a monitor from existing parts
    pub fn new(
        policy: Arc<PolicyStore>,
        correlation: Arc<WriteCorrelationStore>,
        events: EventChannel,
    ) -> Self {
        Self {
            policy,
            correlation,
            events,
        }
    }

    /// Build a monitor and its event receiver from configuration
    pub fn from_config(config: &Config) -> (Self, EventReceiver) {
        let (events, receiver) = channel(config.channel.capacity, config.channel.overflow);
        let monitor = Self::new(
            Arc::new(PolicyStore::new(config.policy.capacity)),
            Arc::new(WriteCorrelationStore::new(config.correlation.capacity)),
            events,
        );
        (monitor, receiver)
    }

    /// Shared policy store (for provisioning)
    pub fn policy(&self) -> &Arc<PolicyStore> {
        &self.policy
    }

    /// Shared correlation store
    pub fn correlation(&self) -> &Arc<WriteCorrelationStore> {
        &self.correlation
    }

    /// Producer end of the event channel
    pub fn events(&self) -> &EventChannel {
        &self.events
    }

    fn submit(&self, task: Option<&TaskView>, record: ChangeRecord) -> HookOutcome {
        let (uid, gid) = principal(task);
        let record = record
            .with_principal(uid, gid)
            .with_tty(tty_attribution(task));
        HookOutcome::Emitted(self.events.submit(record))
    }

    /// A regular file was created in `dir`
    pub fn on_create_file(
        &self,
        task: Option<&TaskView>,
        dir: &InodeView,
        dentry: &DentryView<'_>,
    ) -> HookOutcome {
        self.handle_create(task, dir, dentry, ObjectKind::File)
    }

    /// A directory was created in `dir`
    pub fn on_create_dir(
        &self,
        task: Option<&TaskView>,
        dir: &InodeView,
        dentry: &DentryView<'_>,
    ) -> HookOutcome {
        self.handle_create(task, dir, dentry, ObjectKind::Directory)
    }

    /// Membership is inherited from the containing directory: the new
    /// object has no record of its own yet, and none is added here.
    fn handle_create(
        &self,
        task: Option<&TaskView>,
        dir: &InodeView,
        dentry: &DentryView<'_>,
        kind: ObjectKind,
    ) -> HookOutcome {
        let Some(parent) = dir.key() else {
            return HookOutcome::Ignored;
        };
        if !self.policy.contains(&parent) {
            return HookOutcome::Ignored;
        }

        let after_size = match kind {
            ObjectKind::Directory => DIR_SIZE,
            ObjectKind::File => 0,
        };
        let subject = dentry.inode_key().unwrap_or(EntityKey::UNKNOWN);
        let mtime = dentry.inode.and_then(|inode| inode.ctime_sec);

        let record = ChangeRecord::new(
            ChangeKind::Create,
            parent,
            subject,
            FileName::from_bytes(dentry.name),
        )
        .with_sizes(0, after_size)
        .with_mtime(mtime);

        self.submit(task, record)
    }

    /// A file is about to be unlinked from `dir`
    pub fn on_unlink(
        &self,
        task: Option<&TaskView>,
        dir: &InodeView,
        dentry: &DentryView<'_>,
    ) -> HookOutcome {
        self.handle_delete(task, dir, dentry, ObjectKind::File)
    }

    /// A directory is about to be removed from `dir`
    pub fn on_rmdir(
        &self,
        task: Option<&TaskView>,
        dir: &InodeView,
        dentry: &DentryView<'_>,
    ) -> HookOutcome {
        self.handle_delete(task, dir, dentry, ObjectKind::Directory)
    }

    /// The record is removed with `take`, so of two racing deletes of the
    /// same key exactly one emits, and a lookup after either one misses.
    fn handle_delete(
        &self,
        task: Option<&TaskView>,
        dir: &InodeView,
        dentry: &DentryView<'_>,
        kind: ObjectKind,
    ) -> HookOutcome {
        let Some(subject) = dentry.inode_key() else {
            return HookOutcome::Ignored;
        };
        let Some(watched) = self.policy.take(&subject) else {
            return HookOutcome::Ignored;
        };

        let before_size = watched
            .file_size
            .or_else(|| match kind {
                ObjectKind::Directory => Some(DIR_SIZE),
                ObjectKind::File => dentry.inode.map(|inode| inode.size),
            })
            .unwrap_or(0);

        let record = ChangeRecord::new(
            ChangeKind::Delete,
            dir.key().unwrap_or(EntityKey::UNKNOWN),
            subject,
            FileName::from_bytes(dentry.name),
        )
        .with_sizes(before_size, 0);

        self.submit(task, record)
    }

    /// A write to `file` is starting
    pub fn on_write_entry(&self, token: CorrelationToken, file: &FileView<'_>) -> HookOutcome {
        let (Some(key), Some(inode)) = (file.key(), file.inode) else {
            return HookOutcome::Ignored;
        };
        if !self.policy.contains(&key) {
            return HookOutcome::Ignored;
        }

        self.correlation.begin(token, inode.size);
        HookOutcome::Seeded
    }

    /// A write to `file` finished having transferred `transferred` bytes
    /// (negative for an error return)
    pub fn on_write_exit(
        &self,
        task: Option<&TaskView>,
        token: CorrelationToken,
        file: &FileView<'_>,
        transferred: isize,
    ) -> HookOutcome {
        if transferred <= 0 {
            // Clear the pending entry so it does not wait for eviction
            return match self.correlation.take(&token) {
                Some(_) => HookOutcome::Skipped(SkipReason::EmptyWrite),
                None => HookOutcome::Ignored,
            };
        }

        let Some(before_size) = self.correlation.take(&token) else {
            debug!(
                tgid = token.tgid(),
                tid = token.tid(),
                "write exit without pending entry"
            );
            return HookOutcome::Skipped(SkipReason::Uncorrelated);
        };

        let (Some(subject), Some(inode)) = (file.key(), file.inode) else {
            return HookOutcome::Skipped(SkipReason::NoIdentity);
        };
        let after_size = inode.size;

        if !self.policy.update(&subject, PolicyRecord::with_size(after_size)) {
            return HookOutcome::Skipped(SkipReason::Unwatched);
        }

        let record = ChangeRecord::new(
            ChangeKind::Modify {
                bytes: transferred as u64,
            },
            file.parent_key().unwrap_or(EntityKey::UNKNOWN),
            subject,
            FileName::from_bytes(file.name()),
        )
        .with_sizes(before_size, after_size)
        .with_mtime(inode.ctime_sec);

        self.submit(task, record)
    }

    /// `old_dentry` in `old_dir` is being renamed to `new_dentry` in
    /// `new_dir`.
    ///
    /// Keys are inode identities, which survive a rename, so a watched
    /// object keeps its record. Moves into, out of, or within a watched
    /// directory are reported but change no membership. A watched target
    /// that the rename replaces is reported as deleted and loses its record.
    pub fn on_rename(
        &self,
        task: Option<&TaskView>,
        old_dir: &InodeView,
        old_dentry: &DentryView<'_>,
        new_dir: &InodeView,
        new_dentry: &DentryView<'_>,
    ) -> HookOutcome {
        let Some(subject) = old_dentry.inode_key() else {
            return HookOutcome::Ignored;
        };
        let new_parent = new_dir.key();

        if let Some(target) = new_dentry.inode_key().filter(|target| *target != subject) {
            self.replace_target(task, target, new_parent, new_dentry);
        }

        let watched_dir = |dir: Option<EntityKey>| dir.is_some_and(|k| self.policy.contains(&k));
        let known_size = match self.policy.lookup(&subject) {
            Some(watched) => watched.file_size,
            None if watched_dir(new_parent) || watched_dir(old_dir.key()) => None,
            None => return HookOutcome::Ignored,
        };

        let size = known_size
            .or_else(|| old_dentry.inode.map(|inode| inode.size))
            .unwrap_or(0);

        let record = ChangeRecord::new(
            ChangeKind::Rename,
            new_parent.unwrap_or(EntityKey::UNKNOWN),
            subject,
            FileName::from_bytes(new_dentry.name),
        )
        .with_sizes(size, size)
        .with_mtime(old_dentry.inode.and_then(|inode| inode.ctime_sec));

        self.submit(task, record)
    }

    fn replace_target(
        &self,
        task: Option<&TaskView>,
        target: EntityKey,
        new_parent: Option<EntityKey>,
        new_dentry: &DentryView<'_>,
    ) {
        let Some(replaced) = self.policy.take(&target) else {
            return;
        };

        let before_size = replaced
            .file_size
            .or_else(|| new_dentry.inode.map(|inode| inode.size))
            .unwrap_or(0);
        let record = ChangeRecord::new(
            ChangeKind::Delete,
            new_parent.unwrap_or(EntityKey::UNKNOWN),
            target,
            FileName::from_bytes(new_dentry.name),
        )
        .with_sizes(before_size, 0);

        self.submit(task, record);
    }
}
