//! Virtual descriptor table
//!
//! Maps opaque positive descriptors onto open backing files. Each backend
//! owns its own table, so descriptors are only meaningful per backend.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

/// An open backing file referenced by a virtual descriptor
pub struct HandleEntry {
    /// Open backing file
    pub file: File,
    /// Path as seen through the mount (backend-relative)
    pub virtual_path: String,
    /// Resolved path in the backing tree
    pub real_path: PathBuf,
    /// Host open flags
    pub flags: i32,
    /// Serializes all I/O against this descriptor. Read-modify-write of a
    /// shared block is not atomic at the backing store, so concurrent
    /// operations on one descriptor must queue here.
    pub io_lock: Mutex<()>,
}

impl HandleEntry {
    pub fn new(file: File, virtual_path: String, real_path: PathBuf, flags: i32) -> Self {
        Self {
            file,
            virtual_path,
            real_path,
            flags,
            io_lock: Mutex::new(()),
        }
    }

    /// Check if opened for writing
    pub fn is_writable(&self) -> bool {
        let accmode = self.flags & libc::O_ACCMODE;
        accmode == libc::O_WRONLY || accmode == libc::O_RDWR
    }
}

/// Allocates descriptors and owns the live entries
pub struct HandleTable {
    next_fd: AtomicU64,
    entries: RwLock<HashMap<u64, Arc<HandleEntry>>>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            next_fd: AtomicU64::new(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Register an entry and return its descriptor. Descriptors are strictly
    /// positive and never reused while live.
    pub fn alloc(&self, entry: HandleEntry) -> u64 {
        let fd = self.next_fd.fetch_add(1, Ordering::SeqCst);
        self.entries.write().insert(fd, Arc::new(entry));
        fd
    }

    /// Look up a live descriptor.
    pub fn get(&self, fd: u64) -> Result<Arc<HandleEntry>> {
        self.entries
            .read()
            .get(&fd)
            .cloned()
            .ok_or(Error::BadDescriptor(fd))
    }

    /// Release a descriptor. The backing file closes when the last reference
    /// to the entry drops.
    pub fn free(&self, fd: u64) -> Result<()> {
        self.entries
            .write()
            .remove(&fd)
            .map(|_| ())
            .ok_or(Error::BadDescriptor(fd))
    }

    /// Number of live descriptors
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}
