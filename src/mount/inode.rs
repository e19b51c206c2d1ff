//! Virtual inode management for the kernel adapter
//!
//! The dispatcher is path-addressed while FUSE is inode-addressed; this table
//! owns the mapping. Inode 1 is the mount root.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::store::{FileAttributes, FileKind};

/// Root inode number
pub const ROOT_INO: u64 = 1;

impl FileKind {
    pub fn to_fuser_type(self) -> fuser::FileType {
        match self {
            FileKind::RegularFile => fuser::FileType::RegularFile,
            FileKind::Directory => fuser::FileType::Directory,
            FileKind::Symlink => fuser::FileType::Symlink,
        }
    }
}

/// Convert dispatcher attributes into the kernel's shape.
pub fn to_fuser_attr(ino: u64, attrs: &FileAttributes) -> fuser::FileAttr {
    fuser::FileAttr {
        ino,
        size: attrs.size,
        blocks: attrs.blocks,
        atime: attrs.atime,
        mtime: attrs.mtime,
        ctime: attrs.ctime,
        crtime: attrs.ctime,
        kind: attrs.kind.to_fuser_type(),
        perm: attrs.perm,
        nlink: attrs.nlink,
        uid: attrs.uid,
        gid: attrs.gid,
        rdev: 0,
        blksize: attrs.blksize,
        flags: 0,
    }
}

/// Allocates inode numbers and maps them to mounted paths
pub struct InodeManager {
    next_ino: AtomicU64,
    /// ino -> mounted path
    paths: RwLock<HashMap<u64, String>>,
    /// mounted path -> ino
    inos: RwLock<HashMap<String, u64>>,
}

impl InodeManager {
    pub fn new() -> Self {
        let manager = Self {
            next_ino: AtomicU64::new(ROOT_INO + 1),
            paths: RwLock::new(HashMap::new()),
            inos: RwLock::new(HashMap::new()),
        };
        manager.paths.write().insert(ROOT_INO, "/".to_string());
        manager.inos.write().insert("/".to_string(), ROOT_INO);
        manager
    }

    /// Mounted path for a live inode
    pub fn path_of(&self, ino: u64) -> Option<String> {
        self.paths.read().get(&ino).cloned()
    }

    /// Inode for a path, allocating one on first sight
    pub fn ino_for(&self, path: &str) -> u64 {
        if let Some(&ino) = self.inos.read().get(path) {
            return ino;
        }
        let ino = self.next_ino.fetch_add(1, Ordering::SeqCst);
        self.paths.write().insert(ino, path.to_string());
        self.inos.write().insert(path.to_string(), ino);
        ino
    }

    /// Join a parent inode's path with a child name
    pub fn child_path(&self, parent: u64, name: &str) -> Option<String> {
        let parent_path = self.path_of(parent)?;
        if parent_path == "/" {
            Some(format!("/{}", name))
        } else {
            Some(format!("{}/{}", parent_path, name))
        }
    }

    /// Path of the parent directory
    pub fn parent_path(path: &str) -> &str {
        match path.rfind('/') {
            Some(0) | None => "/",
            Some(idx) => &path[..idx],
        }
    }

    /// Drop the mapping for a removed path
    pub fn forget_path(&self, path: &str) {
        if let Some(ino) = self.inos.write().remove(path) {
            self.paths.write().remove(&ino);
        }
    }

    /// Remap a renamed path, including any cached descendants
    pub fn rename_path(&self, from: &str, to: &str) {
        let prefix = format!("{}/", from);
        let affected: Vec<(String, u64)> = self
            .inos
            .read()
            .iter()
            .filter(|(p, _)| p.as_str() == from || p.starts_with(&prefix))
            .map(|(p, &ino)| (p.clone(), ino))
            .collect();

        let mut inos = self.inos.write();
        let mut paths = self.paths.write();
        for (old_path, ino) in affected {
            let new_path = format!("{}{}", to, &old_path[from.len()..]);
            inos.remove(&old_path);
            inos.insert(new_path.clone(), ino);
            paths.insert(ino, new_path);
        }
    }
}

impl Default for InodeManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_is_preregistered() {
        let inodes = InodeManager::new();
        assert_eq!(inodes.path_of(ROOT_INO).unwrap(), "/");
        assert_eq!(inodes.ino_for("/"), ROOT_INO);
    }

    #[test]
    fn test_ino_is_stable_per_path() {
        let inodes = InodeManager::new();
        let a = inodes.ino_for("/a");
        assert_eq!(inodes.ino_for("/a"), a);
        assert_ne!(inodes.ino_for("/b"), a);
    }

    #[test]
    fn test_child_path_joins() {
        let inodes = InodeManager::new();
        assert_eq!(inodes.child_path(ROOT_INO, "a").unwrap(), "/a");

        let dir = inodes.ino_for("/a");
        assert_eq!(inodes.child_path(dir, "b").unwrap(), "/a/b");
    }

    #[test]
    fn test_parent_path() {
        assert_eq!(InodeManager::parent_path("/a/b"), "/a");
        assert_eq!(InodeManager::parent_path("/a"), "/");
        assert_eq!(InodeManager::parent_path("/"), "/");
    }

    #[test]
    fn test_forget_path() {
        let inodes = InodeManager::new();
        let ino = inodes.ino_for("/gone");
        inodes.forget_path("/gone");
        assert!(inodes.path_of(ino).is_none());
    }

    #[test]
    fn test_rename_remaps_descendants() {
        let inodes = InodeManager::new();
        let dir = inodes.ino_for("/old");
        let child = inodes.ino_for("/old/child");

        inodes.rename_path("/old", "/new");

        assert_eq!(inodes.path_of(dir).unwrap(), "/new");
        assert_eq!(inodes.path_of(child).unwrap(), "/new/child");
        assert_eq!(inodes.ino_for("/new/child"), child);
    }
}
