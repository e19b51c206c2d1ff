//! VFS dispatcher
//!
//! Routes each mounted-path operation to the backend registered under the
//! longest matching prefix, keeps per-handle statistics, and is the boundary
//! where backend errors get logged and mapped for the host adapter.

mod stats;

pub use stats::{HandleStats, StatsTable};

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::store::{Backend, DirEntry, FileAttributes, FsStats, SetAttributes};

struct Route {
    prefix: String,
    backend: Arc<dyn Backend>,
}

/// A resolved operation target: the backend and the backend-relative path.
struct Target {
    backend: Arc<dyn Backend>,
    relative: String,
    prefix: String,
}

pub struct Dispatcher {
    routes: RwLock<Vec<Route>>,
    stats: StatsTable,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            routes: RwLock::new(Vec::new()),
            stats: StatsTable::new(),
        }
    }

    /// Register a backend under an anchored prefix. Runs the backend's init
    /// check; a missing backing directory fails registration.
    pub fn register(&self, prefix: &str, backend: Arc<dyn Backend>) -> Result<()> {
        if !prefix.starts_with('/') {
            return Err(Error::InvalidArgument(format!(
                "prefix {:?} is not anchored at the mount root",
                prefix
            )));
        }
        backend.init()?;

        let mut routes = self.routes.write();
        routes.push(Route {
            prefix: prefix.to_string(),
            backend,
        });
        // Longest prefix wins, so keep the routes in descending pattern
        // length; registration order breaks ties.
        routes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Ok(())
    }

    /// A prefix matches at a path-component boundary; `/` matches everything.
    fn prefix_matches(prefix: &str, path: &str) -> bool {
        if prefix == "/" {
            return true;
        }
        match path.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    fn relative_path(prefix: &str, path: &str) -> String {
        if prefix == "/" {
            return path.to_string();
        }
        let rest = &path[prefix.len()..];
        if rest.is_empty() {
            "/".to_string()
        } else {
            rest.to_string()
        }
    }

    fn resolve(&self, path: &str) -> Result<Target> {
        let routes = self.routes.read();
        for route in routes.iter() {
            if Self::prefix_matches(&route.prefix, path) {
                return Ok(Target {
                    backend: Arc::clone(&route.backend),
                    relative: Self::relative_path(&route.prefix, path),
                    prefix: route.prefix.clone(),
                });
            }
        }
        Err(Error::NoBackend(path.to_string()))
    }

    /// Log-and-propagate wrapper applied to every backend call at the
    /// dispatcher boundary.
    fn checked<T>(op: &str, path: &str, result: Result<T>) -> Result<T> {
        result.map_err(|e| {
            error!("{} {} failed: {}", op, path, e);
            e
        })
    }

    pub fn create(&self, path: &str, mode: u32) -> Result<u64> {
        debug!("create(path={}, mode={:o})", path, mode);
        let target = self.resolve(path)?;
        let fd = Self::checked("create", path, target.backend.create(&target.relative, mode))?;
        self.stats.open(path, fd);
        Ok(fd)
    }

    pub fn open(&self, path: &str, flags: i32) -> Result<u64> {
        debug!("open(path={}, flags={:#x})", path, flags);
        let target = self.resolve(path)?;
        let fd = Self::checked("open", path, target.backend.open(&target.relative, flags))?;
        self.stats.open(path, fd);
        Ok(fd)
    }

    pub fn read(&self, path: &str, fd: u64, size: u32, offset: i64) -> Result<Vec<u8>> {
        debug!("read(path={}, fd={}, size={}, offset={})", path, fd, size, offset);
        let target = self.resolve(path)?;

        let started = Instant::now();
        let data = Self::checked(
            "read",
            path,
            target.backend.read(&target.relative, fd, size, offset),
        )?;
        self.stats
            .record_read(path, fd, data.len() as u64, started.elapsed());
        Ok(data)
    }

    pub fn write(&self, path: &str, fd: u64, data: &[u8], offset: i64) -> Result<u32> {
        debug!("write(path={}, fd={}, size={}, offset={})", path, fd, data.len(), offset);
        let target = self.resolve(path)?;

        let started = Instant::now();
        let written = Self::checked(
            "write",
            path,
            target.backend.write(&target.relative, fd, data, offset),
        )?;
        self.stats
            .record_write(path, fd, written as u64, started.elapsed());
        Ok(written)
    }

    pub fn release(&self, path: &str, fd: u64) -> Result<()> {
        debug!("release(path={}, fd={})", path, fd);
        let target = self.resolve(path)?;
        let result = Self::checked("release", path, target.backend.release(&target.relative, fd));
        self.stats.close(path, fd);
        result
    }

    pub fn truncate(&self, path: &str, size: i64) -> Result<()> {
        debug!("truncate(path={}, size={})", path, size);
        let target = self.resolve(path)?;
        Self::checked("truncate", path, target.backend.truncate(&target.relative, size))
    }

    pub fn ftruncate(&self, path: &str, fd: u64, size: i64) -> Result<()> {
        debug!("ftruncate(path={}, fd={}, size={})", path, fd, size);
        let target = self.resolve(path)?;
        Self::checked(
            "ftruncate",
            path,
            target.backend.ftruncate(&target.relative, fd, size),
        )
    }

    pub fn getattr(&self, path: &str) -> Result<FileAttributes> {
        debug!("getattr(path={})", path);
        let target = self.resolve(path)?;
        Self::checked("getattr", path, target.backend.getattr(&target.relative))
    }

    pub fn setattr(&self, path: &str, changes: &SetAttributes) -> Result<()> {
        debug!("setattr(path={}, changes={:?})", path, changes);
        let target = self.resolve(path)?;
        Self::checked("setattr", path, target.backend.setattr(&target.relative, changes))
    }

    pub fn access(&self, path: &str, mask: i32) -> Result<()> {
        debug!("access(path={}, mask={:#o})", path, mask);
        let target = self.resolve(path)?;
        Self::checked("access", path, target.backend.access(&target.relative, mask))
    }

    pub fn statfs(&self, path: &str) -> Result<FsStats> {
        debug!("statfs(path={})", path);
        let target = self.resolve(path)?;
        Self::checked("statfs", path, target.backend.statfs(&target.relative))
    }

    pub fn readdir(&self, path: &str) -> Result<Vec<DirEntry>> {
        debug!("readdir(path={})", path);
        let target = self.resolve(path)?;
        Self::checked("readdir", path, target.backend.readdir(&target.relative))
    }

    pub fn mkdir(&self, path: &str, mode: u32) -> Result<()> {
        debug!("mkdir(path={}, mode={:o})", path, mode);
        let target = self.resolve(path)?;
        Self::checked("mkdir", path, target.backend.mkdir(&target.relative, mode))
    }

    pub fn rmdir(&self, path: &str) -> Result<()> {
        debug!("rmdir(path={})", path);
        let target = self.resolve(path)?;
        Self::checked("rmdir", path, target.backend.rmdir(&target.relative))
    }

    pub fn unlink(&self, path: &str) -> Result<()> {
        debug!("unlink(path={})", path);
        let target = self.resolve(path)?;
        Self::checked("unlink", path, target.backend.unlink(&target.relative))
    }

    /// Rename routes through the source backend. The destination is rebased
    /// into a backend's namespace when its prefix matches one; a destination
    /// owned by a different backend fails with cross-device. A destination no
    /// prefix matches passes through unmodified.
    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        debug!("rename(from={}, to={})", from, to);
        let source = self.resolve(from)?;

        let destination = match self.resolve(to) {
            Ok(target) if target.prefix == source.prefix => target.relative,
            Ok(_) => {
                let err = Error::CrossDevice(format!("{} -> {}", from, to));
                error!("rename {} failed: {}", from, err);
                return Err(err);
            }
            Err(_) => to.to_string(),
        };

        Self::checked(
            "rename",
            from,
            source.backend.rename(&source.relative, &destination),
        )
    }

    /// Snapshot of the statistics record for one live descriptor.
    pub fn handle_stats(&self, path: &str, fd: u64) -> Option<HandleStats> {
        self.stats.get(path, fd)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PassthroughStore;
    use tempfile::tempdir;

    fn dispatcher_with_roots() -> (Dispatcher, tempfile::TempDir, tempfile::TempDir) {
        let root = tempdir().unwrap();
        let vault = tempdir().unwrap();

        let dispatcher = Dispatcher::new();
        dispatcher
            .register("/", Arc::new(PassthroughStore::new(root.path())))
            .unwrap();
        dispatcher
            .register("/vault", Arc::new(PassthroughStore::new(vault.path())))
            .unwrap();

        (dispatcher, root, vault)
    }

    #[test]
    fn test_longest_prefix_wins() {
        let (dispatcher, root, vault) = dispatcher_with_roots();

        let fd = dispatcher.create("/vault/x", 0o644).unwrap();
        dispatcher.write("/vault/x", fd, b"V", 0).unwrap();
        dispatcher.release("/vault/x", fd).unwrap();

        let fd = dispatcher.create("/x", 0o644).unwrap();
        dispatcher.write("/x", fd, b"R", 0).unwrap();
        dispatcher.release("/x", fd).unwrap();

        // `/vault/x` landed in the vault backing dir with relative path `/x`;
        // `/x` landed in the root backing dir.
        assert_eq!(std::fs::read(vault.path().join("x")).unwrap(), b"V");
        assert_eq!(std::fs::read(root.path().join("x")).unwrap(), b"R");
    }

    #[test]
    fn test_component_boundary_matching() {
        let (dispatcher, root, _vault) = dispatcher_with_roots();

        // `/vaultx` must not match the `/vault` prefix.
        let fd = dispatcher.create("/vaultx", 0o644).unwrap();
        dispatcher.release("/vaultx", fd).unwrap();
        assert!(root.path().join("vaultx").exists());
    }

    #[test]
    fn test_no_backend() {
        let dispatcher = Dispatcher::new();
        assert!(matches!(
            dispatcher.getattr("/anything"),
            Err(Error::NoBackend(_))
        ));
    }

    #[test]
    fn test_register_missing_directory_fails() {
        let dir = tempdir().unwrap();
        let dispatcher = Dispatcher::new();
        let gone = dir.path().join("gone");

        assert!(dispatcher
            .register("/", Arc::new(PassthroughStore::new(gone)))
            .is_err());
    }

    #[test]
    fn test_register_unanchored_prefix_fails() {
        let dir = tempdir().unwrap();
        let dispatcher = Dispatcher::new();

        assert!(matches!(
            dispatcher.register("vault", Arc::new(PassthroughStore::new(dir.path()))),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_stats_accounting() {
        let (dispatcher, _root, _vault) = dispatcher_with_roots();

        let fd = dispatcher.create("/stats.bin", 0o644).unwrap();
        dispatcher.write("/stats.bin", fd, &[1u8; 10], 0).unwrap();
        dispatcher.write("/stats.bin", fd, &[2u8; 20], 10).unwrap();
        dispatcher.read("/stats.bin", fd, 5, 0).unwrap();
        dispatcher.read("/stats.bin", fd, 25, 5).unwrap();

        let stats = dispatcher.handle_stats("/stats.bin", fd).unwrap();
        assert_eq!(stats.write_ops, 2);
        assert_eq!(stats.write_bytes_total, 30);
        assert_eq!(stats.last_write_bytes, 20);
        assert_eq!(stats.read_ops, 2);
        assert_eq!(stats.read_bytes_total, 30);
        assert_eq!(stats.last_read_bytes, 25);

        dispatcher.release("/stats.bin", fd).unwrap();
        assert!(dispatcher.handle_stats("/stats.bin", fd).is_none());
    }

    #[test]
    fn test_rename_within_backend_rebases() {
        let (dispatcher, _root, vault) = dispatcher_with_roots();

        let fd = dispatcher.create("/vault/a", 0o644).unwrap();
        dispatcher.release("/vault/a", fd).unwrap();

        dispatcher.rename("/vault/a", "/vault/b").unwrap();
        assert!(vault.path().join("b").exists());
        assert!(!vault.path().join("a").exists());
    }

    #[test]
    fn test_rename_across_backends_is_cross_device() {
        let (dispatcher, _root, _vault) = dispatcher_with_roots();

        let fd = dispatcher.create("/vault/a", 0o644).unwrap();
        dispatcher.release("/vault/a", fd).unwrap();

        assert!(matches!(
            dispatcher.rename("/vault/a", "/elsewhere"),
            Err(Error::CrossDevice(_))
        ));
    }

    #[test]
    fn test_prefix_root_relative_path() {
        assert_eq!(Dispatcher::relative_path("/", "/a/b"), "/a/b");
        assert_eq!(Dispatcher::relative_path("/vault", "/vault/a"), "/a");
        assert_eq!(Dispatcher::relative_path("/vault", "/vault"), "/");
    }
}
