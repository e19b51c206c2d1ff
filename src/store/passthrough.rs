//! Pass-through store
//!
//! Forwards every operation to a backing directory without encryption or
//! header accounting. Used by tests and for mounting unencrypted subtrees
//! next to encrypted ones.

use std::fs::{self, OpenOptions};
use std::os::unix::fs::{DirBuilderExt, FileExt, OpenOptionsExt};
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::store::{
    backing_statfs, backing_utimens, Backend, DirEntry, FileAttributes, FsStats, HandleEntry,
    HandleTable, SetAttributes,
};

pub struct PassthroughStore {
    base: PathBuf,
    handles: HandleTable,
}

impl PassthroughStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            handles: HandleTable::new(),
        }
    }

    /// Resolve a mount-relative path under the backing directory.
    fn real_path(&self, path: &str) -> PathBuf {
        let mut real = self.base.clone();
        for component in path.split('/').filter(|c| !c.is_empty()) {
            real.push(component);
        }
        real
    }
}

impl Backend for PassthroughStore {
    fn init(&self) -> Result<()> {
        match fs::metadata(&self.base) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(Error::NotADirectory(
                self.base.to_string_lossy().to_string(),
            )),
            Err(e) => Err(Error::from_io(e, self.base.to_string_lossy().to_string())),
        }
    }

    fn create(&self, path: &str, mode: u32) -> Result<u64> {
        let real = self.real_path(path);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(&real)
            .map_err(|e| Error::from_io(e, path))?;

        Ok(self.handles.alloc(HandleEntry::new(
            file,
            path.to_string(),
            real,
            libc::O_RDWR,
        )))
    }

    fn open(&self, path: &str, flags: i32) -> Result<u64> {
        let real = self.real_path(path);

        let accmode = flags & libc::O_ACCMODE;
        let wants_write = accmode == libc::O_WRONLY || accmode == libc::O_RDWR;

        let mut opts = OpenOptions::new();
        opts.read(true);
        if wants_write {
            opts.write(true);
            if flags & libc::O_TRUNC != 0 {
                opts.truncate(true);
            }
        }

        let file = opts.open(&real).map_err(|e| Error::from_io(e, path))?;

        Ok(self
            .handles
            .alloc(HandleEntry::new(file, path.to_string(), real, flags)))
    }

    fn read(&self, path: &str, fd: u64, size: u32, offset: i64) -> Result<Vec<u8>> {
        if offset < 0 {
            return Err(Error::InvalidArgument(format!(
                "negative offset {} reading {}",
                offset, path
            )));
        }
        let entry = self.handles.get(fd)?;
        let _io = entry.io_lock.lock();

        let mut buf = vec![0u8; size as usize];
        let n = entry
            .file
            .read_at(&mut buf, offset as u64)
            .map_err(|e| Error::from_io(e, path))?;
        buf.truncate(n);
        Ok(buf)
    }

    fn write(&self, path: &str, fd: u64, data: &[u8], offset: i64) -> Result<u32> {
        if offset < 0 {
            return Err(Error::InvalidArgument(format!(
                "negative offset {} writing {}",
                offset, path
            )));
        }
        let entry = self.handles.get(fd)?;
        let _io = entry.io_lock.lock();

        entry
            .file
            .write_all_at(data, offset as u64)
            .map_err(|e| Error::from_io(e, path))?;
        Ok(data.len() as u32)
    }

    fn release(&self, _path: &str, fd: u64) -> Result<()> {
        self.handles.free(fd)
    }

    fn truncate(&self, path: &str, size: i64) -> Result<()> {
        if size < 0 {
            return Err(Error::InvalidArgument(format!("negative size {}", size)));
        }
        let real = self.real_path(path);
        let file = OpenOptions::new()
            .write(true)
            .open(&real)
            .map_err(|e| Error::from_io(e, path))?;
        file.set_len(size as u64).map_err(|e| Error::from_io(e, path))
    }

    fn ftruncate(&self, path: &str, fd: u64, size: i64) -> Result<()> {
        if size < 0 {
            return Err(Error::InvalidArgument(format!("negative size {}", size)));
        }
        let entry = self.handles.get(fd)?;
        let _io = entry.io_lock.lock();
        entry
            .file
            .set_len(size as u64)
            .map_err(|e| Error::from_io(e, path))
    }

    fn getattr(&self, path: &str) -> Result<FileAttributes> {
        let real = self.real_path(path);
        let meta = fs::metadata(&real).map_err(|e| Error::from_io(e, path))?;
        Ok(FileAttributes::from_metadata(&meta))
    }

    fn setattr(&self, path: &str, changes: &SetAttributes) -> Result<()> {
        let real = self.real_path(path);

        if let Some(mode) = changes.mode {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&real, fs::Permissions::from_mode(mode))
                .map_err(|e| Error::from_io(e, path))?;
        }

        if let Some(size) = changes.size {
            self.truncate(path, size)?;
        }

        if changes.atime.is_some() || changes.mtime.is_some() {
            backing_utimens(&real, changes.atime, changes.mtime)?;
        }

        Ok(())
    }

    fn access(&self, path: &str, _mask: i32) -> Result<()> {
        let real = self.real_path(path);
        fs::metadata(&real)
            .map(|_| ())
            .map_err(|e| Error::from_io(e, path))
    }

    fn statfs(&self, _path: &str) -> Result<FsStats> {
        backing_statfs(&self.base)
    }

    fn readdir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let real = self.real_path(path);
        let mut entries = Vec::new();

        for entry in fs::read_dir(&real).map_err(|e| Error::from_io(e, path))? {
            let entry = entry.map_err(|e| Error::from_io(e, path))?;
            let kind = entry.file_type().map_err(|e| Error::from_io(e, path))?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                kind: kind.into(),
            });
        }

        Ok(entries)
    }

    fn mkdir(&self, path: &str, mode: u32) -> Result<()> {
        let real = self.real_path(path);
        fs::DirBuilder::new()
            .mode(mode)
            .create(&real)
            .map_err(|e| Error::from_io(e, path))
    }

    fn rmdir(&self, path: &str) -> Result<()> {
        let real = self.real_path(path);

        let mut listing = fs::read_dir(&real).map_err(|e| Error::from_io(e, path))?;
        if listing.next().is_some() {
            return Err(Error::NotEmpty(path.to_string()));
        }

        fs::remove_dir(&real).map_err(|e| Error::from_io(e, path))
    }

    fn unlink(&self, path: &str) -> Result<()> {
        let real = self.real_path(path);
        fs::remove_file(&real).map_err(|e| Error::from_io(e, path))
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        fs::rename(self.real_path(from), self.real_path(to))
            .map_err(|e| Error::from_io(e, from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FileKind;
    use tempfile::tempdir;

    #[test]
    fn test_fixture_file_passes_through() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("fixture.txt"), b"as-is").unwrap();

        let store = PassthroughStore::new(dir.path());
        store.init().unwrap();

        let fd = store.open("/fixture.txt", libc::O_RDONLY).unwrap();
        assert_eq!(store.read("/fixture.txt", fd, 100, 0).unwrap(), b"as-is");
        store.release("/fixture.txt", fd).unwrap();

        let attrs = store.getattr("/fixture.txt").unwrap();
        assert_eq!(attrs.size, 5);
    }

    #[test]
    fn test_write_lands_unencrypted() {
        let dir = tempdir().unwrap();
        let store = PassthroughStore::new(dir.path());

        let fd = store.create("/out.bin", 0o644).unwrap();
        store.write("/out.bin", fd, b"visible", 0).unwrap();
        store.release("/out.bin", fd).unwrap();

        assert_eq!(fs::read(dir.path().join("out.bin")).unwrap(), b"visible");
    }

    #[test]
    fn test_offset_read() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("f"), b"0123456789").unwrap();

        let store = PassthroughStore::new(dir.path());
        let fd = store.open("/f", libc::O_RDONLY).unwrap();
        assert_eq!(store.read("/f", fd, 3, 4).unwrap(), b"456");
        store.release("/f", fd).unwrap();
    }

    #[test]
    fn test_readdir_names_unchanged() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("clear.txt"), b"").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();

        let store = PassthroughStore::new(dir.path());
        let mut entries = store.readdir("/").unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(entries[0].name, "clear.txt");
        assert_eq!(entries[0].kind, FileKind::RegularFile);
        assert_eq!(entries[1].name, "sub");
        assert_eq!(entries[1].kind, FileKind::Directory);
    }

    #[test]
    fn test_rmdir_non_empty() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("d")).unwrap();
        fs::write(dir.path().join("d/f"), b"").unwrap();

        let store = PassthroughStore::new(dir.path());
        assert!(matches!(store.rmdir("/d"), Err(Error::NotEmpty(_))));
    }
}
