//! Policy provisioning
//!
//! The administrative side of the watch set: walks configured directories,
//! inserts one policy record per object, and later extends the set from
//! CREATE and RENAME records read off the channel. Hooks never insert.

use crate::config::ProvisioningConfig;
use crate::error::{ConfigError, CoreError, PolicyError, ProvisionError};
use crate::event::{ChangeKind, ChangeRecord};
use crate::key::EntityKey;
use crate::path_cache::PathCache;
use crate::policy::{PolicyRecord, PolicyStore};
use glob::Pattern;
use serde::Serialize;
use std::collections::HashSet;
use std::fs::Metadata;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

/// Objects never added to the watch set
#[derive(Debug, Default)]
pub struct Exclusions {
    keys: HashSet<EntityKey>,
    extensions: Vec<String>,
    suffixes: Vec<String>,
    patterns: Vec<Pattern>,
}

impl Exclusions {
    /// Build from configuration.
    ///
    /// Excluded subtrees are resolved to entity keys up front, so a bind
    /// mount or symlinked path excludes the same objects. Paths that do not
    /// exist are skipped with a warning.
    pub fn from_config(config: &ProvisioningConfig) -> Result<Self, CoreError> {
        let mut keys = HashSet::new();
        for path in &config.exclude_paths {
            if !path.is_absolute() {
                return Err(ProvisionError::RelativePath(path.clone()).into());
            }
            match std::fs::metadata(path) {
                Ok(metadata) => {
                    keys.insert(EntityKey::from_metadata(&metadata));
                }
                Err(e) => warn!(path = %path.display(), error = %e, "exclude path not found"),
            }
        }

        let patterns = config
            .exclude_patterns
            .iter()
            .map(|pattern| {
                Pattern::new(pattern).map_err(|source| ConfigError::InvalidPattern {
                    pattern: pattern.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            keys,
            extensions: config.exclude_extensions.clone(),
            suffixes: config.exclude_suffixes.clone(),
            patterns,
        })
    }

    /// Whether a file name is excluded by extension, suffix or pattern
    pub fn excludes_name(&self, name: &str) -> bool {
        let extension = name.rfind('.').map(|dot| &name[dot..]);
        if extension.is_some_and(|ext| self.extensions.iter().any(|e| e == ext)) {
            return true;
        }
        if self.suffixes.iter().any(|suffix| name.ends_with(suffix.as_str())) {
            return true;
        }
        self.patterns.iter().any(|pattern| pattern.matches(name))
    }

    /// Whether an object is the root of an excluded subtree
    pub fn excludes_key(&self, key: &EntityKey) -> bool {
        self.keys.contains(key)
    }

    fn excludes_entry(&self, entry: &DirEntry) -> bool {
        if self.excludes_name(&entry.file_name().to_string_lossy()) {
            return true;
        }
        entry
            .metadata()
            .is_ok_and(|metadata| self.excludes_key(&EntityKey::from_metadata(&metadata)))
    }
}

/// Counts from one provisioning pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProvisionSummary {
    /// Directories added to the watch set
    pub directories: usize,
    /// Non-directories added to the watch set
    pub files: usize,
    /// Subtrees or objects skipped by an exclusion rule
    pub excluded: usize,
    /// Configured paths that do not exist
    pub missing: usize,
    /// Entries the walk could not read
    pub errors: usize,
}

impl ProvisionSummary {
    /// Objects added to the watch set
    pub fn watched(&self) -> usize {
        self.directories + self.files
    }

    fn merge(&mut self, other: ProvisionSummary) {
        self.directories += other.directories;
        self.files += other.files;
        self.excluded += other.excluded;
        self.missing += other.missing;
        self.errors += other.errors;
    }
}

fn initial_record(metadata: &Metadata) -> PolicyRecord {
    if metadata.is_dir() {
        PolicyRecord::without_size()
    } else {
        PolicyRecord::with_size(metadata.len() as i64)
    }
}

fn stat(path: &Path) -> Result<Metadata, CoreError> {
    if !path.is_absolute() {
        return Err(ProvisionError::RelativePath(path.to_path_buf()).into());
    }
    std::fs::metadata(path).map_err(|source| {
        ProvisionError::Stat {
            path: path.to_path_buf(),
            source,
        }
        .into()
    })
}

/// Populates and maintains the policy store
pub struct Provisioner {
    policy: Arc<PolicyStore>,
    paths: Arc<PathCache>,
    exclusions: Exclusions,
    follow_creates: bool,
}

impl Provisioner {
    /// Provisioner with no exclusions that follows creates
    pub fn new(policy: Arc<PolicyStore>, paths: Arc<PathCache>) -> Self {
        Self {
            policy,
            paths,
            exclusions: Exclusions::default(),
            follow_creates: true,
        }
    }

    /// Provisioner with the exclusion rules of `config`
    pub fn from_config(
        policy: Arc<PolicyStore>,
        paths: Arc<PathCache>,
        config: &ProvisioningConfig,
    ) -> Result<Self, CoreError> {
        Ok(Self {
            policy,
            paths,
            exclusions: Exclusions::from_config(config)?,
            follow_creates: config.follow_creates,
        })
    }

    /// Set whether CREATE and RENAME records extend the watch set
    pub fn follow_creates(mut self, follow: bool) -> Self {
        self.follow_creates = follow;
        self
    }

    pub fn policy(&self) -> &Arc<PolicyStore> {
        &self.policy
    }

    pub fn exclusions(&self) -> &Exclusions {
        &self.exclusions
    }

    pub fn path_cache(&self) -> &Arc<PathCache> {
        &self.paths
    }

    /// Watch every configured directory and file.
    ///
    /// Missing paths are warned about and counted; running out of policy
    /// capacity aborts.
    pub fn load(&self, config: &ProvisioningConfig) -> Result<ProvisionSummary, CoreError> {
        let mut summary = ProvisionSummary::default();

        let targets = config
            .directories
            .iter()
            .map(|dir| (dir, true))
            .chain(config.files.iter().map(|file| (file, false)));

        for (path, recursive) in targets {
            let result = if recursive {
                self.watch_directory(path)
            } else {
                self.watch_file(path)
            };
            match result {
                Ok(pass) => summary.merge(pass),
                Err(CoreError::Provision(ProvisionError::Stat { path, source })) => {
                    warn!(path = %path.display(), error = %source, "watch path not found, skipped");
                    summary.missing += 1;
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            directories = summary.directories,
            files = summary.files,
            excluded = summary.excluded,
            missing = summary.missing,
            watched = self.policy.len(),
            capacity = self.policy.capacity(),
            "watch set provisioned"
        );
        Ok(summary)
    }

    /// Watch `root` and everything below it
    pub fn watch_directory(&self, root: &Path) -> Result<ProvisionSummary, CoreError> {
        let metadata = stat(root)?;
        if !metadata.is_dir() {
            return self.watch_file(root);
        }

        let mut summary = ProvisionSummary::default();
        let mut excluded = 0;
        // parents[d] is the key of the directory currently open at depth d
        let mut parents: Vec<EntityKey> = Vec::new();

        let mut walker = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                let skip = self.exclusions.excludes_entry(entry);
                if skip {
                    excluded += 1;
                }
                !skip
            });

        while let Some(entry) = walker.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "failed to read watch tree entry");
                    summary.errors += 1;
                    continue;
                }
            };
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "failed to stat entry");
                    summary.errors += 1;
                    if entry.file_type().is_dir() {
                        walker.skip_current_dir();
                    }
                    continue;
                }
            };

            let key = EntityKey::from_metadata(&metadata);
            let depth = entry.depth();
            parents.truncate(depth);
            match depth.checked_sub(1).and_then(|d| parents.get(d)) {
                Some(parent) => {
                    let name = entry.file_name().to_string_lossy();
                    self.paths.insert(key, *parent, name);
                }
                None => self.paths.insert_root(key, entry.path()),
            }
            if metadata.is_dir() {
                parents.push(key);
            }

            if self.policy.contains(&key) {
                continue;
            }
            self.policy.insert(key, initial_record(&metadata))?;
            if metadata.is_dir() {
                summary.directories += 1;
            } else {
                summary.files += 1;
            }
        }
        drop(walker);
        summary.excluded = excluded;

        debug!(
            root = %root.display(),
            directories = summary.directories,
            files = summary.files,
            "directory provisioned"
        );
        Ok(summary)
    }

    /// Watch a single object
    pub fn watch_file(&self, path: &Path) -> Result<ProvisionSummary, CoreError> {
        let metadata = stat(path)?;
        let key = EntityKey::from_metadata(&metadata);
        let mut summary = ProvisionSummary::default();

        let name = path
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_default();
        if self.exclusions.excludes_key(&key) || self.exclusions.excludes_name(&name) {
            summary.excluded += 1;
            return Ok(summary);
        }

        self.paths.insert_root(key, path);
        if !self.policy.contains(&key) {
            self.policy.insert(key, initial_record(&metadata))?;
            if metadata.is_dir() {
                summary.directories += 1;
            } else {
                summary.files += 1;
            }
        }
        Ok(summary)
    }

    /// Stop watching `path` and, for a directory, everything below it.
    ///
    /// Returns the number of records removed.
    pub fn unwatch_path(&self, path: &Path) -> Result<usize, CoreError> {
        let metadata = stat(path)?;
        if !metadata.is_dir() {
            let key = EntityKey::from_metadata(&metadata);
            self.paths.remove(&key);
            return Ok(usize::from(self.policy.delete(&key)));
        }

        let mut removed = 0;
        for entry in WalkDir::new(path).follow_links(false) {
            let Ok(metadata) = entry.and_then(|e| e.metadata()) else {
                continue;
            };
            let key = EntityKey::from_metadata(&metadata);
            self.paths.remove(&key);
            if self.policy.delete(&key) {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// React to a record read off the channel.
    ///
    /// When following is enabled, the subject of a CREATE or RENAME whose
    /// new parent is watched joins the watch set. The path cache is kept
    /// for watched subjects only. Returns whether a record was inserted.
    pub fn follow(&self, record: &ChangeRecord) -> Result<bool, PolicyError> {
        if record.subject.is_unknown() {
            return Ok(false);
        }

        let inserted = match record.kind {
            ChangeKind::Create | ChangeKind::Rename => self.adopt(record)?,
            ChangeKind::Delete => {
                self.paths.remove(&record.subject);
                return Ok(false);
            }
            ChangeKind::Modify { .. } => return Ok(false),
        };

        if self.policy.contains(&record.subject) {
            self.paths.insert(
                record.subject,
                record.parent,
                record.filename.to_string_lossy(),
            );
        } else {
            self.paths.remove(&record.subject);
        }
        Ok(inserted)
    }

    fn adopt(&self, record: &ChangeRecord) -> Result<bool, PolicyError> {
        if !self.follow_creates || !self.policy.contains(&record.parent) {
            return Ok(false);
        }
        if self.exclusions.excludes_name(&record.filename.to_string_lossy()) {
            return Ok(false);
        }
        if self.policy.contains(&record.subject) {
            return Ok(false);
        }

        self.policy
            .insert(record.subject, PolicyRecord::with_size(record.after_size))?;
        debug!(subject = %record.subject, filename = %record.filename, "following new object");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Delivery;
    use crate::config::Config;
    use crate::context::{DentryView, FileView, InodeView, SuperBlockView};
    use crate::correlation::CorrelationToken;
    use crate::event::FileName;
    use crate::hooks::{HookOutcome, Monitor};
    use crate::key::kernel_dev;
    use std::fs;
    use std::os::unix::fs::MetadataExt;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn key_of(path: &Path) -> EntityKey {
        EntityKey::from_metadata(&fs::metadata(path).unwrap())
    }

    fn provisioner() -> Provisioner {
        Provisioner::new(Arc::new(PolicyStore::default()), Arc::new(PathCache::new()))
    }

    fn tree() -> TempDir {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("conf.d")).unwrap();
        fs::create_dir_all(root.join("ssl/private")).unwrap();
        fs::write(root.join("hosts"), "127.0.0.1 localhost\n").unwrap();
        fs::write(root.join("conf.d/app.conf"), "a=1\n").unwrap();
        fs::write(root.join("conf.d/app.conf.swp"), "").unwrap();
        fs::write(root.join("conf.d/app.conf~"), "").unwrap();
        fs::write(root.join("conf.d/run.tmp"), "").unwrap();
        fs::write(root.join("ssl/private/server.key"), "secret").unwrap();
        temp
    }

    #[test]
    fn test_watch_directory_inserts_every_object() {
        let temp = tree();
        let provisioner = provisioner();

        let summary = provisioner.watch_directory(temp.path()).unwrap();
        // root, conf.d, ssl, ssl/private
        assert_eq!(summary.directories, 4);
        assert_eq!(summary.files, 6);

        let policy = &provisioner.policy;
        assert_eq!(policy.len(), 10);
        assert_eq!(
            policy.lookup(&key_of(&temp.path().join("hosts"))),
            Some(PolicyRecord::with_size(20))
        );
        assert_eq!(
            policy.lookup(&key_of(temp.path())),
            Some(PolicyRecord::without_size())
        );
    }

    #[test]
    fn test_watch_directory_builds_path_cache() {
        let temp = tree();
        let provisioner = provisioner();
        provisioner.watch_directory(temp.path()).unwrap();

        let key = key_of(&temp.path().join("conf.d/app.conf"));
        assert_eq!(
            provisioner.path_cache().path_of(&key),
            Some(temp.path().join("conf.d/app.conf"))
        );
    }

    #[test]
    fn test_exclusions() {
        let temp = tree();
        let config = ProvisioningConfig {
            exclude_paths: vec![temp.path().join("ssl")],
            exclude_extensions: vec![".swp".to_string()],
            exclude_suffixes: vec!["~".to_string()],
            exclude_patterns: vec!["*.tmp".to_string()],
            ..Default::default()
        };
        let provisioner = Provisioner::from_config(
            Arc::new(PolicyStore::default()),
            Arc::new(PathCache::new()),
            &config,
        )
        .unwrap();

        let summary = provisioner.watch_directory(temp.path()).unwrap();
        assert_eq!(summary.directories, 2);
        assert_eq!(summary.files, 2);
        assert_eq!(summary.excluded, 4);

        let policy = &provisioner.policy;
        assert!(policy.contains(&key_of(&temp.path().join("conf.d/app.conf"))));
        assert!(!policy.contains(&key_of(&temp.path().join("conf.d/app.conf.swp"))));
        assert!(!policy.contains(&key_of(&temp.path().join("conf.d/app.conf~"))));
        assert!(!policy.contains(&key_of(&temp.path().join("conf.d/run.tmp"))));
        assert!(!policy.contains(&key_of(&temp.path().join("ssl/private/server.key"))));
    }

    #[test]
    fn test_excludes_name() {
        let config = ProvisioningConfig {
            exclude_extensions: vec![".log".to_string()],
            exclude_suffixes: vec![".orig".to_string()],
            exclude_patterns: vec!["cache-*".to_string()],
            ..Default::default()
        };
        let exclusions = Exclusions::from_config(&config).unwrap();

        assert!(exclusions.excludes_name("app.log"));
        assert!(exclusions.excludes_name("nginx.conf.orig"));
        assert!(exclusions.excludes_name("cache-0001"));
        assert!(!exclusions.excludes_name("app.log.gz"));
        assert!(!exclusions.excludes_name("passwd"));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let config = ProvisioningConfig {
            exclude_patterns: vec!["[oops".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            Exclusions::from_config(&config),
            Err(CoreError::Config(ConfigError::InvalidPattern { .. }))
        ));
    }

    #[test]
    fn test_relative_path_rejected() {
        let provisioner = provisioner();
        let result = provisioner.watch_directory(Path::new("etc"));
        assert!(matches!(
            result,
            Err(CoreError::Provision(ProvisionError::RelativePath(_)))
        ));
    }

    #[test]
    fn test_load_counts_missing_paths() {
        let temp = tree();
        let config = ProvisioningConfig {
            directories: vec![temp.path().join("conf.d"), temp.path().join("absent")],
            files: vec![temp.path().join("hosts"), PathBuf::from("/nonexistent/watchd")],
            ..Default::default()
        };
        let provisioner = provisioner();

        let summary = provisioner.load(&config).unwrap();
        assert_eq!(summary.missing, 2);
        // conf.d and its four files, plus hosts
        assert_eq!(summary.watched(), 6);
    }

    #[test]
    fn test_capacity_exceeded_aborts() {
        let temp = tree();
        let provisioner = Provisioner::new(
            Arc::new(PolicyStore::new(3)),
            Arc::new(PathCache::new()),
        );

        let result = provisioner.watch_directory(temp.path());
        assert!(matches!(
            result,
            Err(CoreError::Policy(PolicyError::CapacityExceeded { capacity: 3 }))
        ));
        assert_eq!(provisioner.policy.len(), 3);
    }

    #[test]
    fn test_watch_file_and_unwatch() {
        let temp = tree();
        let provisioner = provisioner();
        let hosts = temp.path().join("hosts");

        let summary = provisioner.watch_file(&hosts).unwrap();
        assert_eq!(summary.files, 1);
        assert_eq!(provisioner.path_cache().path_of(&key_of(&hosts)), Some(hosts.clone()));

        assert_eq!(provisioner.unwatch_path(&hosts).unwrap(), 1);
        assert!(provisioner.policy.is_empty());
    }

    #[test]
    fn test_unwatch_directory_subtree() {
        let temp = tree();
        let provisioner = provisioner();
        provisioner.watch_directory(temp.path()).unwrap();

        let removed = provisioner.unwatch_path(&temp.path().join("conf.d")).unwrap();
        assert_eq!(removed, 5);
        assert_eq!(provisioner.policy.len(), 5);
        assert!(provisioner.policy.contains(&key_of(&temp.path().join("hosts"))));
    }

    #[test]
    fn test_follow() {
        let provisioner = provisioner();
        let dir = EntityKey::new(100, 8);
        let file = EntityKey::new(101, 8);
        provisioner
            .policy
            .insert(dir, PolicyRecord::without_size())
            .unwrap();

        let modify =
            ChangeRecord::new(ChangeKind::Modify { bytes: 1 }, dir, file, FileName::from("a"));
        assert!(!provisioner.follow(&modify).unwrap());

        let create = ChangeRecord::new(ChangeKind::Create, dir, file, FileName::from("a"));
        assert!(provisioner.follow(&create).unwrap());
        assert_eq!(
            provisioner.policy.lookup(&file),
            Some(PolicyRecord::with_size(0))
        );
        // Already watched
        assert!(!provisioner.follow(&create).unwrap());

        let unknown =
            ChangeRecord::new(ChangeKind::Create, dir, EntityKey::UNKNOWN, FileName::from("b"));
        assert!(!provisioner.follow(&unknown).unwrap());
    }

    #[test]
    fn test_follow_respects_exclusions_and_toggle() {
        let config = ProvisioningConfig {
            exclude_extensions: vec![".swp".to_string()],
            ..Default::default()
        };
        let provisioner = Provisioner::from_config(
            Arc::new(PolicyStore::default()),
            Arc::new(PathCache::new()),
            &config,
        )
        .unwrap();
        let dir = EntityKey::new(100, 8);
        provisioner
            .policy
            .insert(dir, PolicyRecord::without_size())
            .unwrap();

        let swap = ChangeRecord::new(
            ChangeKind::Create,
            dir,
            EntityKey::new(101, 8),
            FileName::from(".a.txt.swp"),
        );
        assert!(!provisioner.follow(&swap).unwrap());

        let provisioner = provisioner.follow_creates(false);
        let plain =
            ChangeRecord::new(ChangeKind::Create, dir, EntityKey::new(102, 8), FileName::from("b"));
        assert!(!provisioner.follow(&plain).unwrap());
        assert_eq!(provisioner.policy.len(), 1);
        assert!(provisioner.path_cache().is_empty());
    }

    #[test]
    fn test_follow_rename_needs_watched_parent() {
        let provisioner = provisioner();
        let watched = EntityKey::new(100, 8);
        let elsewhere = EntityKey::new(200, 8);
        let file = EntityKey::new(101, 8);
        provisioner
            .policy
            .insert(watched, PolicyRecord::without_size())
            .unwrap();

        // Moved out of the watched directory
        let moved_out =
            ChangeRecord::new(ChangeKind::Rename, elsewhere, file, FileName::from("a.txt"));
        assert!(!provisioner.follow(&moved_out).unwrap());
        assert!(!provisioner.policy.contains(&file));
        assert!(!provisioner.path_cache().contains(&file));

        // Moved into it
        let moved_in =
            ChangeRecord::new(ChangeKind::Rename, watched, file, FileName::from("a.txt"))
                .with_sizes(7, 7);
        assert!(provisioner.follow(&moved_in).unwrap());
        assert_eq!(
            provisioner.policy.lookup(&file),
            Some(PolicyRecord::with_size(7))
        );
        assert!(provisioner.path_cache().contains(&file));
    }

    #[test]
    fn test_follow_keeps_path_cache_bounded() {
        let config = ProvisioningConfig {
            exclude_suffixes: vec!["~".to_string()],
            ..Default::default()
        };
        let provisioner = Provisioner::from_config(
            Arc::new(PolicyStore::default()),
            Arc::new(PathCache::new()),
            &config,
        )
        .unwrap();
        let dir = EntityKey::new(100, 8);
        provisioner
            .policy
            .insert(dir, PolicyRecord::without_size())
            .unwrap();
        provisioner.path_cache().insert_root(dir, "/srv");

        // Editor backups are created and removed over and over; their
        // DELETE is never emitted because they are not watched.
        for ino in 1000..1500 {
            let backup = ChangeRecord::new(
                ChangeKind::Create,
                dir,
                EntityKey::new(ino, 8),
                FileName::from("a.txt~"),
            );
            assert!(!provisioner.follow(&backup).unwrap());
        }
        assert_eq!(provisioner.path_cache().len(), 1);

        let provisioner = provisioner.follow_creates(false);
        for ino in 2000..2500 {
            let plain = ChangeRecord::new(
                ChangeKind::Create,
                dir,
                EntityKey::new(ino, 8),
                FileName::from("b"),
            );
            provisioner.follow(&plain).unwrap();
        }
        assert_eq!(provisioner.path_cache().len(), 1);
    }

    #[test]
    fn test_follow_tracks_watched_lifecycle() {
        let provisioner = provisioner();
        let root = EntityKey::new(1, 8);
        let archive = EntityKey::new(6, 8);
        let log = EntityKey::new(5, 8);
        provisioner
            .policy
            .insert(root, PolicyRecord::without_size())
            .unwrap();
        provisioner
            .policy
            .insert(archive, PolicyRecord::without_size())
            .unwrap();
        provisioner.path_cache().insert_root(root, "/srv");
        provisioner.path_cache().insert(archive, root, "archive");

        let create = ChangeRecord::new(ChangeKind::Create, root, log, FileName::from("new.log"));
        provisioner.follow(&create).unwrap();
        assert_eq!(
            provisioner.path_cache().path_of(&log),
            Some(PathBuf::from("/srv/new.log"))
        );

        let rename =
            ChangeRecord::new(ChangeKind::Rename, archive, log, FileName::from("old.log"));
        provisioner.follow(&rename).unwrap();
        assert_eq!(
            provisioner.path_cache().path_of(&log),
            Some(PathBuf::from("/srv/archive/old.log"))
        );

        provisioner.policy.delete(&log);
        let delete =
            ChangeRecord::new(ChangeKind::Delete, archive, log, FileName::from("old.log"));
        provisioner.follow(&delete).unwrap();
        assert!(!provisioner.path_cache().contains(&log));
    }

    #[test]
    fn test_follow_capacity_exceeded() {
        let provisioner = Provisioner::new(
            Arc::new(PolicyStore::new(1)),
            Arc::new(PathCache::new()),
        );
        let dir = EntityKey::new(100, 8);
        provisioner
            .policy
            .insert(dir, PolicyRecord::without_size())
            .unwrap();

        let create =
            ChangeRecord::new(ChangeKind::Create, dir, EntityKey::new(101, 8), FileName::from("a"));
        assert_eq!(
            provisioner.follow(&create),
            Err(PolicyError::CapacityExceeded { capacity: 1 })
        );
    }

    fn inode_of(path: &Path) -> InodeView {
        let metadata = fs::metadata(path).unwrap();
        InodeView {
            ino: metadata.ino(),
            size: metadata.len() as i64,
            ctime_sec: Some(metadata.ctime()),
            sb: Some(SuperBlockView {
                dev: kernel_dev(metadata.dev()),
            }),
        }
    }

    #[test]
    fn test_create_write_delete_on_disk() {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.provisioning.directories = vec![temp.path().to_path_buf()];

        let (monitor, receiver) = Monitor::from_config(&config);
        let provisioner = Provisioner::from_config(
            monitor.policy().clone(),
            Arc::new(PathCache::new()),
            &config.provisioning,
        )
        .unwrap();
        provisioner.load(&config.provisioning).unwrap();

        let dir = inode_of(temp.path());
        let parent = DentryView {
            name: b"",
            inode: Some(&dir),
            parent: None,
        };
        let path = temp.path().join("a.txt");

        // create
        fs::write(&path, "").unwrap();
        let created = inode_of(&path);
        let entry = DentryView {
            name: b"a.txt",
            inode: Some(&created),
            parent: Some(&parent),
        };
        assert!(monitor.on_create_file(None, &dir, &entry).emitted());
        let record = receiver.try_recv().unwrap();
        assert_eq!(record.kind, ChangeKind::Create);
        assert_eq!(record.after_size, 0);
        assert_eq!(provisioner.path_cache().resolve(&record), path);
        assert!(provisioner.follow(&record).unwrap());

        // write 50 bytes
        let token = CorrelationToken::new(1 << 32 | 1, 0);
        let view = FileView {
            inode: Some(&created),
            dentry: Some(&entry),
        };
        assert_eq!(monitor.on_write_entry(token, &view), HookOutcome::Seeded);
        fs::write(&path, [b'x'; 50]).unwrap();
        let written = inode_of(&path);
        let view = FileView {
            inode: Some(&written),
            dentry: Some(&entry),
        };
        assert_eq!(
            monitor.on_write_exit(None, token, &view, 50),
            HookOutcome::Emitted(Delivery::Delivered)
        );
        let record = receiver.try_recv().unwrap();
        assert_eq!(record.kind, ChangeKind::Modify { bytes: 50 });
        assert_eq!((record.before_size, record.after_size), (0, 50));
        assert_eq!(provisioner.path_cache().resolve(&record), path);

        // delete
        let entry = DentryView {
            name: b"a.txt",
            inode: Some(&written),
            parent: Some(&parent),
        };
        assert!(monitor.on_unlink(None, &dir, &entry).emitted());
        fs::remove_file(&path).unwrap();
        let record = receiver.try_recv().unwrap();
        assert_eq!(record.kind, ChangeKind::Delete);
        assert_eq!(record.before_size, 50);
        provisioner.follow(&record).unwrap();

        assert!(!monitor.policy().contains(&written.key().unwrap()));
        assert!(!provisioner.path_cache().contains(&written.key().unwrap()));
        assert!(monitor.policy().contains(&dir.key().unwrap()));
        assert!(receiver.try_recv().is_none());
    }
}
