//! Storage backends
//!
//! A backend implements the filesystem-operation interface for one registered
//! mount prefix. Paths handed to a backend are relative to its prefix and
//! always carry a leading `/`.

mod encrypted;
mod handle;
mod passthrough;

pub use encrypted::EncryptedStore;
pub use handle::{HandleEntry, HandleTable};
pub use passthrough::PassthroughStore;

use crate::error::{Error, Result};
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::time::SystemTime;

/// File type as seen through the mount
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    RegularFile,
    Directory,
    Symlink,
}

impl From<std::fs::FileType> for FileKind {
    fn from(ft: std::fs::FileType) -> Self {
        if ft.is_dir() {
            FileKind::Directory
        } else if ft.is_symlink() {
            FileKind::Symlink
        } else {
            FileKind::RegularFile
        }
    }
}

/// Attributes reported for a mounted path
#[derive(Debug, Clone)]
pub struct FileAttributes {
    pub kind: FileKind,
    pub size: u64,
    pub blocks: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub perm: u16,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub blksize: u32,
}

impl FileAttributes {
    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            kind: FileKind::from(meta.file_type()),
            size: meta.len(),
            blocks: meta.blocks(),
            atime: meta.accessed().unwrap_or(SystemTime::UNIX_EPOCH),
            mtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            ctime: SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(meta.ctime() as u64),
            perm: (meta.mode() & 0o7777) as u16,
            nlink: meta.nlink() as u32,
            uid: meta.uid(),
            gid: meta.gid(),
            blksize: meta.blksize() as u32,
        }
    }
}

/// Attribute changes requested through setattr
#[derive(Debug, Clone, Default)]
pub struct SetAttributes {
    pub mode: Option<u32>,
    pub size: Option<i64>,
    pub atime: Option<SystemTime>,
    pub mtime: Option<SystemTime>,
}

/// One entry returned by readdir, in host order
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub kind: FileKind,
}

/// Filesystem-level statistics (statvfs shape)
#[derive(Debug, Clone, Copy)]
pub struct FsStats {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub namelen: u32,
    pub frsize: u32,
}

/// The filesystem-operation interface consumed by the dispatcher. Every
/// operation takes the backend-relative path; read/write/release/ftruncate
/// additionally take a descriptor previously returned by open or create.
pub trait Backend: Send + Sync {
    /// Called once at registration; must verify the backing directory.
    fn init(&self) -> Result<()>;

    fn create(&self, path: &str, mode: u32) -> Result<u64>;
    fn open(&self, path: &str, flags: i32) -> Result<u64>;
    fn read(&self, path: &str, fd: u64, size: u32, offset: i64) -> Result<Vec<u8>>;
    fn write(&self, path: &str, fd: u64, data: &[u8], offset: i64) -> Result<u32>;
    fn release(&self, path: &str, fd: u64) -> Result<()>;

    fn truncate(&self, path: &str, size: i64) -> Result<()>;
    fn ftruncate(&self, path: &str, fd: u64, size: i64) -> Result<()>;

    fn getattr(&self, path: &str) -> Result<FileAttributes>;
    fn setattr(&self, path: &str, changes: &SetAttributes) -> Result<()>;
    fn access(&self, path: &str, mask: i32) -> Result<()>;
    fn statfs(&self, path: &str) -> Result<FsStats>;

    fn readdir(&self, path: &str) -> Result<Vec<DirEntry>>;
    fn mkdir(&self, path: &str, mode: u32) -> Result<()>;
    fn rmdir(&self, path: &str) -> Result<()>;
    fn unlink(&self, path: &str) -> Result<()>;
    fn rename(&self, from: &str, to: &str) -> Result<()>;
}

/// statvfs on a backing path; both stores report the backing filesystem's
/// numbers rather than placeholders.
pub(crate) fn backing_statfs(path: &Path) -> Result<FsStats> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| Error::InvalidArgument(path.to_string_lossy().to_string()))?;

    let mut vfs: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut vfs) };
    if rc != 0 {
        return Err(Error::from_io(
            std::io::Error::last_os_error(),
            path.to_string_lossy().to_string(),
        ));
    }

    Ok(FsStats {
        blocks: vfs.f_blocks as u64,
        bfree: vfs.f_bfree as u64,
        bavail: vfs.f_bavail as u64,
        files: vfs.f_files as u64,
        ffree: vfs.f_ffree as u64,
        bsize: vfs.f_bsize as u32,
        namelen: vfs.f_namemax as u32,
        frsize: vfs.f_frsize as u32,
    })
}

/// Set atime/mtime on a backing path, leaving absent values untouched.
pub(crate) fn backing_utimens(
    path: &Path,
    atime: Option<SystemTime>,
    mtime: Option<SystemTime>,
) -> Result<()> {
    let to_timespec = |t: Option<SystemTime>| -> libc::timespec {
        match t {
            Some(ts) => {
                let d = ts
                    .duration_since(SystemTime::UNIX_EPOCH)
                    .unwrap_or(std::time::Duration::ZERO);
                libc::timespec {
                    tv_sec: d.as_secs() as libc::time_t,
                    tv_nsec: d.subsec_nanos() as libc::c_long,
                }
            }
            None => libc::timespec {
                tv_sec: 0,
                tv_nsec: libc::UTIME_OMIT,
            },
        }
    };

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| Error::InvalidArgument(path.to_string_lossy().to_string()))?;
    let times = [to_timespec(atime), to_timespec(mtime)];

    let rc = unsafe { libc::utimensat(libc::AT_FDCWD, c_path.as_ptr(), times.as_ptr(), 0) };
    if rc != 0 {
        return Err(Error::from_io(
            std::io::Error::last_os_error(),
            path.to_string_lossy().to_string(),
        ));
    }
    Ok(())
}
