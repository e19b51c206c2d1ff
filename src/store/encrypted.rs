//! Encrypted store
//!
//! Each backing file carries a 24-byte header (big-endian u64 plaintext size,
//! then a 16-byte random nonce) followed by the AES-256-CTR ciphertext body.
//! The logical size in the header is authoritative; ciphertext bytes past it
//! in the last AES block are residual output and ignored. Path components are
//! encrypted independently, so the backing tree mirrors the mount tree shape
//! with opaque names.

use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::fs::{DirBuilderExt, FileExt, OpenOptionsExt};
use std::path::PathBuf;

use rand::RngCore;
use tracing::warn;

use crate::crypto::names;
use crate::crypto::stream::{self, AES_BLOCK, NONCE_SIZE};
use crate::crypto::SecretKey;
use crate::error::{Error, Result};
use crate::store::{
    backing_statfs, backing_utimens, Backend, DirEntry, FileAttributes, FileKind, FsStats,
    HandleEntry, HandleTable, SetAttributes,
};

/// On-disk header size: 8-byte size field + 16-byte nonce
pub const META: u64 = 24;

/// Sentinel readdir name for entries whose token does not decode
pub const UNDECODABLE: &str = "???";

/// Per-file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileHeader {
    /// Logical plaintext length, authoritative
    size: u64,
    /// CTR IV base, chosen once at first write
    nonce: [u8; NONCE_SIZE],
}

impl FileHeader {
    /// Fresh header for a new or lazily initialized file
    fn fresh() -> Self {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);
        FileHeader { size: 0, nonce }
    }

    /// Read the header, or None when the file has never been written
    /// (physical size below META).
    fn read_from(file: &File) -> Result<Option<FileHeader>> {
        if file.metadata()?.len() < META {
            return Ok(None);
        }
        let mut buf = [0u8; META as usize];
        file.read_exact_at(&mut buf, 0)?;

        let size = u64::from_be_bytes(buf[0..8].try_into().unwrap());
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&buf[8..24]);
        Ok(Some(FileHeader { size, nonce }))
    }

    /// Write the full header at offset 0.
    fn write_to(&self, file: &File) -> Result<()> {
        let mut buf = [0u8; META as usize];
        buf[0..8].copy_from_slice(&self.size.to_be_bytes());
        buf[8..24].copy_from_slice(&self.nonce);
        file.write_all_at(&buf, 0)?;
        Ok(())
    }

    /// Rewrite only the 8-byte size field. Ordered after the body within a
    /// write so a crash leaves the previous length in force.
    fn write_size(file: &File, size: u64) -> Result<()> {
        file.write_all_at(&size.to_be_bytes(), 0)?;
        Ok(())
    }
}

fn round_up(n: u64, unit: u64) -> u64 {
    n.div_ceil(unit) * unit
}

/// Positioned read that keeps going on short reads. Returns the number of
/// bytes actually read; a tail past EOF is left untouched (callers pass
/// zeroed buffers and treat the missing tail as zeros).
fn read_full_at(file: &File, buf: &mut [u8], offset: u64) -> Result<usize> {
    let mut total = 0usize;
    while total < buf.len() {
        match file.read_at(&mut buf[total..], offset + total as u64) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(total)
}

/// Encrypting backend over one backing directory
pub struct EncryptedStore {
    base: PathBuf,
    key: SecretKey,
    /// Plaintext block size B of the read/modify/write loop
    block_size: u64,
    handles: HandleTable,
}

impl EncryptedStore {
    /// Create a store over `base`. The block size must be a non-zero
    /// multiple of the AES block size.
    pub fn new(base: impl Into<PathBuf>, key: SecretKey, block_size: usize) -> Result<Self> {
        if block_size == 0 || block_size % AES_BLOCK != 0 {
            return Err(Error::InvalidArgument(format!(
                "block size {} is not a multiple of {}",
                block_size, AES_BLOCK
            )));
        }
        Ok(Self {
            base: base.into(),
            key,
            block_size: block_size as u64,
            handles: HandleTable::new(),
        })
    }

    /// Resolve a mount-relative path to its encrypted backing path.
    fn real_path(&self, path: &str) -> Result<PathBuf> {
        names::encrypt_path(&self.key, &self.base, path)
    }

    /// Logical size of a backing file: the header's size field, or 0 when
    /// the file has never been written.
    fn logical_size(file: &File) -> Result<u64> {
        Ok(FileHeader::read_from(file)?.map_or(0, |h| h.size))
    }

    /// Read or lazily initialize the header ahead of a mutation.
    fn header_for_write(file: &File) -> Result<FileHeader> {
        match FileHeader::read_from(file)? {
            Some(header) => Ok(header),
            None => {
                let header = FileHeader::fresh();
                header.write_to(file)?;
                Ok(header)
            }
        }
    }

    /// The block-aligned read path. Assumes `offset < header.size`.
    fn read_blocks(&self, file: &File, header: &FileHeader, offset: u64, len: u64) -> Result<Vec<u8>> {
        let end = header.size.min(offset + len);
        let mut out = vec![0u8; (end - offset) as usize];

        let bs = self.block_size;
        let mut block_start = offset - offset % bs;
        while block_start < end {
            let seg_start = offset.max(block_start);
            let seg_end = end.min(block_start + bs);

            // Ciphertext run from the block boundary, whole AES blocks,
            // clipped to what the logical size says exists.
            let span = seg_end - block_start;
            let padded = round_up(span, AES_BLOCK as u64);
            let avail = round_up(header.size - block_start, AES_BLOCK as u64);
            let want = padded.min(avail) as usize;

            let mut buf = vec![0u8; want];
            let got = read_full_at(file, &mut buf, META + block_start)?;
            // A short read leaves zeros in the tail; only ciphered bytes get
            // the keystream, so the missing region reads back as zeros.
            stream::apply_at(
                &self.key,
                &header.nonce,
                block_start / AES_BLOCK as u64,
                &mut buf[..got],
            );

            let lo = (seg_start - block_start) as usize;
            let hi = (seg_end - block_start) as usize;
            let dst = (seg_start - offset) as usize;
            out[dst..dst + (hi - lo)].copy_from_slice(&buf[lo..hi]);

            block_start += bs;
        }

        Ok(out)
    }

    /// The block-aligned read/modify/write path. Covers both the caller's
    /// interval `[offset, offset + data.len())` and, when the write starts
    /// past the current logical size, the zero-filled gap from that size up
    /// to `offset`. Returns the new logical size.
    fn write_blocks(
        &self,
        file: &File,
        header: &FileHeader,
        data: &[u8],
        offset: u64,
    ) -> Result<u64> {
        let old_size = header.size;
        let end = offset + data.len() as u64;
        let fill_from = old_size.min(offset);

        let bs = self.block_size;
        let mut block_start = fill_from - fill_from % bs;
        while block_start < end {
            let seg_start = fill_from.max(block_start);
            let seg_end = end.min(block_start + bs);
            let span = seg_end - block_start;
            let padded = round_up(span, AES_BLOCK as u64);
            let counter = block_start / AES_BLOCK as u64;

            // Stage the block: existing ciphertext deciphered in place,
            // everything else zeros.
            let mut plain = vec![0u8; padded as usize];
            let avail = padded.min(round_up(old_size.saturating_sub(block_start), AES_BLOCK as u64));
            if avail > 0 {
                let got = read_full_at(file, &mut plain[..avail as usize], META + block_start)?;
                stream::apply_at(&self.key, &header.nonce, counter, &mut plain[..got]);
            }

            // Bytes at or past the old logical size are residual cipher
            // output or gap; the caller's view of them is zero.
            let logical = old_size.saturating_sub(block_start).min(padded) as usize;
            plain[logical..].fill(0);

            // Splice in the caller's bytes for the part of this block at or
            // past `offset`; anything between the old size and `offset`
            // stays zero.
            let hi = span as usize;
            if seg_end > offset {
                let copy_from = offset.max(seg_start);
                let lo = (copy_from - block_start) as usize;
                let src = (copy_from - offset) as usize;
                plain[lo..hi].copy_from_slice(&data[src..src + (hi - lo)]);
            }

            // Re-encipher at the same counter and rewrite whole AES blocks
            // so the body length stays aligned.
            stream::apply_at(&self.key, &header.nonce, counter, &mut plain);
            file.write_all_at(&plain, META + block_start)?;

            block_start += bs;
        }

        Ok(old_size.max(end))
    }

    /// Shared truncate path for the path- and descriptor-based variants.
    fn truncate_file(&self, file: &File, size: i64) -> Result<()> {
        if size < 0 {
            return Err(Error::InvalidArgument(format!("negative size {}", size)));
        }
        let size = size as u64;

        // Lazily writes a fresh header on a never-written file.
        Self::header_for_write(file)?;
        FileHeader::write_size(file, size)?;

        let body = round_up(size, AES_BLOCK as u64);
        if file.metadata()?.len() > META + body {
            file.set_len(META + body)?;
        }
        Ok(())
    }
}

impl Backend for EncryptedStore {
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
        let real = self.real_path(path)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(&real)
            .map_err(|e| Error::from_io(e, path))?;

        FileHeader::fresh().write_to(&file)?;

        Ok(self.handles.alloc(HandleEntry::new(
            file,
            path.to_string(),
            real,
            libc::O_RDWR,
        )))
    }

    fn open(&self, path: &str, flags: i32) -> Result<u64> {
        let real = self.real_path(path)?;

        let accmode = flags & libc::O_ACCMODE;
        let wants_write = accmode == libc::O_WRONLY || accmode == libc::O_RDWR;

        // The read/modify/write path needs read access even on write-only
        // opens, so the backing file is always opened readable.
        let mut opts = OpenOptions::new();
        opts.read(true);
        if wants_write {
            opts.write(true);
            if flags & libc::O_TRUNC != 0 {
                // Physical size drops to 0; the next write lazily writes a
                // fresh header.
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

        let header = match FileHeader::read_from(&entry.file)? {
            Some(header) => header,
            // Never written: nothing to read.
            None => return Ok(Vec::new()),
        };

        let offset = offset as u64;
        if size == 0 || offset >= header.size {
            return Ok(Vec::new());
        }
        self.read_blocks(&entry.file, &header, offset, size as u64)
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

        let header = Self::header_for_write(&entry.file)?;
        if data.is_empty() {
            return Ok(0);
        }

        let new_size = self.write_blocks(&entry.file, &header, data, offset as u64)?;
        // Body first, size last: a crash in between leaves the old length in
        // force and the extra ciphertext unreachable.
        FileHeader::write_size(&entry.file, new_size)?;

        Ok(data.len() as u32)
    }

    fn release(&self, _path: &str, fd: u64) -> Result<()> {
        self.handles.free(fd)
    }

    fn truncate(&self, path: &str, size: i64) -> Result<()> {
        let real = self.real_path(path)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&real)
            .map_err(|e| Error::from_io(e, path))?;
        self.truncate_file(&file, size)
    }

    fn ftruncate(&self, _path: &str, fd: u64, size: i64) -> Result<()> {
        let entry = self.handles.get(fd)?;
        let _io = entry.io_lock.lock();
        self.truncate_file(&entry.file, size)
    }

    fn getattr(&self, path: &str) -> Result<FileAttributes> {
        let real = self.real_path(path)?;
        let meta = fs::metadata(&real).map_err(|e| Error::from_io(e, path))?;
        let mut attrs = FileAttributes::from_metadata(&meta);

        if attrs.kind == FileKind::RegularFile {
            let file = File::open(&real).map_err(|e| Error::from_io(e, path))?;
            attrs.size = Self::logical_size(&file)?;
        }
        Ok(attrs)
    }

    fn setattr(&self, path: &str, changes: &SetAttributes) -> Result<()> {
        let real = self.real_path(path)?;

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
        let real = self.real_path(path)?;
        fs::metadata(&real)
            .map(|_| ())
            .map_err(|e| Error::from_io(e, path))
    }

    fn statfs(&self, _path: &str) -> Result<FsStats> {
        backing_statfs(&self.base)
    }

    fn readdir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let real = self.real_path(path)?;
        let mut entries = Vec::new();

        for entry in fs::read_dir(&real).map_err(|e| Error::from_io(e, path))? {
            let entry = entry.map_err(|e| Error::from_io(e, path))?;
            let kind = FileKind::from(entry.file_type().map_err(|e| Error::from_io(e, path))?);

            // Undecodable entries surface as a sentinel instead of aborting
            // the listing. Host order, no sorting.
            let name = match entry.file_name().to_str() {
                Some(token) => match names::decode_name(&self.key, token) {
                    Ok(name) => name,
                    Err(_) => {
                        warn!("undecodable entry {:?} under {}", entry.file_name(), path);
                        UNDECODABLE.to_string()
                    }
                },
                None => {
                    warn!("non-UTF-8 entry {:?} under {}", entry.file_name(), path);
                    UNDECODABLE.to_string()
                }
            };

            entries.push(DirEntry { name, kind });
        }

        Ok(entries)
    }

    fn mkdir(&self, path: &str, mode: u32) -> Result<()> {
        let real = self.real_path(path)?;
        fs::DirBuilder::new()
            .mode(mode)
            .create(&real)
            .map_err(|e| Error::from_io(e, path))
    }

    fn rmdir(&self, path: &str) -> Result<()> {
        let real = self.real_path(path)?;

        let mut listing = fs::read_dir(&real).map_err(|e| Error::from_io(e, path))?;
        if listing.next().is_some() {
            return Err(Error::NotEmpty(path.to_string()));
        }

        fs::remove_dir(&real).map_err(|e| Error::from_io(e, path))
    }

    fn unlink(&self, path: &str) -> Result<()> {
        let real = self.real_path(path)?;
        fs::remove_file(&real).map_err(|e| Error::from_io(e, path))
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let real_from = self.real_path(from)?;
        let real_to = self.real_path(to)?;
        fs::rename(&real_from, &real_to).map_err(|e| Error::from_io(e, from))
    }
}
