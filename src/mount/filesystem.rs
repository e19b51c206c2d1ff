//! FUSE adapter
//!
//! Translates the kernel's inode-addressed callbacks into path-addressed
//! dispatcher calls and backend errors into negative errnos.

use fuser::{
    Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::debug;

use super::inode::{to_fuser_attr, InodeManager, ROOT_INO};
use crate::store::SetAttributes;
use crate::vfs::Dispatcher;

const TTL: Duration = Duration::from_secs(1);

/// The mounted filesystem: dispatcher plus the ino↔path table
pub struct VeilFs {
    dispatcher: Arc<Dispatcher>,
    inodes: InodeManager,
}

impl VeilFs {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            inodes: InodeManager::new(),
        }
    }

    /// Join a parent inode and a child name into a mounted path. Rejects
    /// names that cannot appear as a single component.
    fn child_path(&self, parent: u64, name: &OsStr) -> Option<String> {
        let name = name.to_str()?;
        if name.is_empty() || name == "." || name == ".." || name.contains('/') {
            return None;
        }
        self.inodes.child_path(parent, name)
    }
}

impl Filesystem for VeilFs {
    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        debug!("lookup(parent={}, name={:?})", parent, name);

        let path = match self.child_path(parent, name) {
            Some(path) => path,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };

        match self.dispatcher.getattr(&path) {
            Ok(attrs) => {
                let ino = self.inodes.ino_for(&path);
                reply.entry(&TTL, &to_fuser_attr(ino, &attrs), 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        debug!("getattr(ino={})", ino);

        let path = match self.inodes.path_of(ino) {
            Some(path) => path,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };

        match self.dispatcher.getattr(&path) {
            Ok(attrs) => reply.attr(&TTL, &to_fuser_attr(ino, &attrs)),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        debug!("setattr(ino={}, mode={:?}, size={:?}, fh={:?})", ino, mode, size, fh);

        let path = match self.inodes.path_of(ino) {
            Some(path) => path,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };

        let resolve_time = |t: Option<TimeOrNow>| {
            t.map(|t| match t {
                TimeOrNow::SpecificTime(ts) => ts,
                TimeOrNow::Now => SystemTime::now(),
            })
        };

        // Size changes go through the truncate path; an open descriptor uses
        // its own file instead of reopening.
        if let Some(size) = size {
            let result = match fh {
                Some(fh) => self.dispatcher.ftruncate(&path, fh, size as i64),
                None => self.dispatcher.truncate(&path, size as i64),
            };
            if let Err(e) = result {
                reply.error(e.errno());
                return;
            }
        }

        let changes = SetAttributes {
            mode,
            size: None,
            atime: resolve_time(atime),
            mtime: resolve_time(mtime),
        };
        if changes.mode.is_some() || changes.atime.is_some() || changes.mtime.is_some() {
            if let Err(e) = self.dispatcher.setattr(&path, &changes) {
                reply.error(e.errno());
                return;
            }
        }

        match self.dispatcher.getattr(&path) {
            Ok(attrs) => reply.attr(&TTL, &to_fuser_attr(ino, &attrs)),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        debug!("mkdir(parent={}, name={:?}, mode={:o})", parent, name, mode);

        let path = match self.child_path(parent, name) {
            Some(path) => path,
            None => {
                reply.error(libc::EINVAL);
                return;
            }
        };

        if let Err(e) = self.dispatcher.mkdir(&path, mode) {
            reply.error(e.errno());
            return;
        }

        match self.dispatcher.getattr(&path) {
            Ok(attrs) => {
                let ino = self.inodes.ino_for(&path);
                reply.entry(&TTL, &to_fuser_attr(ino, &attrs), 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!("unlink(parent={}, name={:?})", parent, name);

        let path = match self.child_path(parent, name) {
            Some(path) => path,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };

        match self.dispatcher.unlink(&path) {
            Ok(()) => {
                self.inodes.forget_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!("rmdir(parent={}, name={:?})", parent, name);

        let path = match self.child_path(parent, name) {
            Some(path) => path,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };

        match self.dispatcher.rmdir(&path) {
            Ok(()) => {
                self.inodes.forget_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        debug!(
            "rename(parent={}, name={:?}, newparent={}, newname={:?})",
            parent, name, newparent, newname
        );

        let (from, to) = match (
            self.child_path(parent, name),
            self.child_path(newparent, newname),
        ) {
            (Some(from), Some(to)) => (from, to),
            _ => {
                reply.error(libc::ENOENT);
                return;
            }
        };

        match self.dispatcher.rename(&from, &to) {
            Ok(()) => {
                self.inodes.forget_path(&to);
                self.inodes.rename_path(&from, &to);
                reply.ok();
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        debug!("open(ino={}, flags={:#x})", ino, flags);

        let path = match self.inodes.path_of(ino) {
            Some(path) => path,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };

        match self.dispatcher.open(&path, flags) {
            Ok(fd) => reply.opened(fd, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn create(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        debug!("create(parent={}, name={:?}, mode={:o})", parent, name, mode);

        let path = match self.child_path(parent, name) {
            Some(path) => path,
            None => {
                reply.error(libc::EINVAL);
                return;
            }
        };

        let fd = match self.dispatcher.create(&path, mode) {
            Ok(fd) => fd,
            Err(e) => {
                reply.error(e.errno());
                return;
            }
        };

        match self.dispatcher.getattr(&path) {
            Ok(attrs) => {
                let ino = self.inodes.ino_for(&path);
                reply.created(&TTL, &to_fuser_attr(ino, &attrs), 0, fd, 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        debug!("read(ino={}, fh={}, offset={}, size={})", ino, fh, offset, size);

        let path = match self.inodes.path_of(ino) {
            Some(path) => path,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };

        match self.dispatcher.read(&path, fh, size, offset) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        debug!("write(ino={}, fh={}, offset={}, size={})", ino, fh, offset, data.len());

        let path = match self.inodes.path_of(ino) {
            Some(path) => path,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };

        match self.dispatcher.write(&path, fh, data, offset) {
            Ok(written) => reply.written(written),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn release(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        debug!("release(ino={}, fh={})", ino, fh);

        let path = match self.inodes.path_of(ino) {
            Some(path) => path,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };

        match self.dispatcher.release(&path, fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        debug!("readdir(ino={}, offset={})", ino, offset);

        let path = match self.inodes.path_of(ino) {
            Some(path) => path,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };

        let listing = match self.dispatcher.readdir(&path) {
            Ok(listing) => listing,
            Err(e) => {
                reply.error(e.errno());
                return;
            }
        };

        let parent_ino = if ino == ROOT_INO {
            ROOT_INO
        } else {
            self.inodes.ino_for(InodeManager::parent_path(&path))
        };

        let mut entries: Vec<(u64, fuser::FileType, String)> = vec![
            (ino, fuser::FileType::Directory, ".".to_string()),
            (parent_ino, fuser::FileType::Directory, "..".to_string()),
        ];

        for entry in listing {
            let child_ino = match self.inodes.child_path(ino, &entry.name) {
                Some(child) => self.inodes.ino_for(&child),
                None => continue,
            };
            entries.push((child_ino, entry.kind.to_fuser_type(), entry.name));
        }

        for (i, (entry_ino, kind, name)) in entries.iter().enumerate().skip(offset as usize) {
            if reply.add(*entry_ino, (i + 1) as i64, *kind, name) {
                break;
            }
        }

        reply.ok();
    }

    fn statfs(&mut self, _req: &Request, ino: u64, reply: ReplyStatfs) {
        debug!("statfs(ino={})", ino);

        let path = self.inodes.path_of(ino).unwrap_or_else(|| "/".to_string());
        match self.dispatcher.statfs(&path) {
            Ok(stats) => reply.statfs(
                stats.blocks,
                stats.bfree,
                stats.bavail,
                stats.files,
                stats.ffree,
                stats.bsize,
                stats.namelen,
                stats.frsize,
            ),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn access(&mut self, _req: &Request, ino: u64, mask: i32, reply: ReplyEmpty) {
        debug!("access(ino={}, mask={:#o})", ino, mask);

        let path = match self.inodes.path_of(ino) {
            Some(path) => path,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };

        match self.dispatcher.access(&path, mask) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }
}
