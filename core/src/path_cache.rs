//! Path reconstruction
//!
//! Records carry a parent key and a bare name, never a full path. The
//! consumer keeps a map from entity key to (parent key, name) for watched
//! objects, filled while provisioning walks the watch roots and kept current
//! by the follower, and rebuilds paths by walking it upwards.

use crate::event::ChangeRecord;
use crate::key::EntityKey;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;

/// Maximum number of components walked when rebuilding a path
pub const MAX_PATH_DEPTH: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Link {
    /// Watch root, stored with its absolute path
    Root(PathBuf),
    /// Entry below a root
    Child { parent: EntityKey, name: String },
}

/// Key → (parent, name) map
#[derive(Debug, Default)]
pub struct PathCache {
    links: RwLock<HashMap<EntityKey, Link>>,
}

impl PathCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a watch root under its absolute path
    pub fn insert_root(&self, key: EntityKey, path: impl Into<PathBuf>) {
        self.links.write().insert(key, Link::Root(path.into()));
    }

    /// Register `name` inside the directory `parent`.
    ///
    /// A key already registered as a root stays a root.
    pub fn insert(&self, key: EntityKey, parent: EntityKey, name: impl Into<String>) {
        let mut links = self.links.write();
        if matches!(links.get(&key), Some(Link::Root(_))) {
            return;
        }
        links.insert(
            key,
            Link::Child {
                parent,
                name: name.into(),
            },
        );
    }

    /// Forget `key`
    pub fn remove(&self, key: &EntityKey) -> bool {
        self.links.write().remove(key).is_some()
    }

    /// Whether `key` is known
    pub fn contains(&self, key: &EntityKey) -> bool {
        self.links.read().contains_key(key)
    }

    /// Number of known entries
    pub fn len(&self) -> usize {
        self.links.read().len()
    }

    /// Whether nothing is known
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Full path of `key`, if a root is reachable within [`MAX_PATH_DEPTH`]
    pub fn path_of(&self, key: &EntityKey) -> Option<PathBuf> {
        let links = self.links.read();
        let mut names = Vec::new();
        let mut current = *key;

        for _ in 0..MAX_PATH_DEPTH {
            match links.get(&current)? {
                Link::Root(root) => {
                    let mut path = root.clone();
                    path.extend(names.iter().rev());
                    return Some(path);
                }
                Link::Child { parent, name } => {
                    names.push(name.as_str());
                    current = *parent;
                }
            }
        }
        None
    }

    /// Best path for a record: the parent's path joined with the record's
    /// name, or the bare name when the parent cannot be resolved
    pub fn resolve(&self, record: &ChangeRecord) -> PathBuf {
        let name = record.filename.to_string_lossy();
        match self.path_of(&record.parent) {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }
}
