//! The mapped backing file.
//!
//! `Region` owns the mapping and hands out bounds-checked views of it. Plain
//! reads and writes follow Rust borrowing: shared access reads, exclusive
//! access writes. TTL counters are the one exception; they are only ever
//! touched through `atomic_u32`, which lets the sweeper age entries while
//! lookups hold the shared lock.

use super::header::{CacheHeader, END_AT, HEADER_SIZE};
use crate::config::{CacheConfig, MIN_CACHE_SIZE};
use crate::error::{CacheError, Result};
use fs2::FileExt;
use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::AtomicU32;
use tracing::{debug, info, warn};

/// How the region came to be when it was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// No usable file existed, or reloading was disabled
    Created,
    /// A compatible file was mapped as-is
    Reloaded,
    /// An incompatible file was replaced
    Overwritten,
}

pub(crate) struct Region {
    base: NonNull<u8>,
    size: usize,
    map: MmapMut,
    file: File,
    path: PathBuf,
}

// SAFETY: `base` points into `map`, which lives as long as the region. Writes
// require `&mut Region`; the only writes made through `&Region` go through
// `AtomicU32` cells, and those bytes are never read non-atomically.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    /// Map the configured cache file, creating or replacing it as the
    /// configuration allows. A fresh region is zeroed and carries a new
    /// header; formatting the index arena is left to the caller.
    pub(crate) fn open(config: &CacheConfig) -> Result<(Self, OpenMode)> {
        let size = config.effective_size();
        if size < MIN_CACHE_SIZE {
            return Err(CacheError::SizeTooSmall {
                size,
                min: MIN_CACHE_SIZE,
            });
        }

        let path = config.cache_file.clone();
        let mode = if path.is_file() && config.reload_cache {
            match Self::probe(&path, size) {
                Ok(()) => OpenMode::Reloaded,
                Err(e) if config.overwrite_cache => {
                    warn!("{}; overwriting {}", e, path.display());
                    OpenMode::Overwritten
                }
                Err(e) => return Err(e),
            }
        } else {
            OpenMode::Created
        };

        let mut region = Self::map(&path, size)?;
        match mode {
            OpenMode::Reloaded => info!("Loading the existing cache from {}", path.display()),
            OpenMode::Created | OpenMode::Overwritten => {
                region.reset()?;
                if mode == OpenMode::Overwritten {
                    info!("The existing cache has been overwritten");
                }
            }
        }

        Ok((region, mode))
    }

    /// Check an existing file against the expected layout without modifying it.
    fn probe(path: &Path, size: usize) -> Result<()> {
        let mut file = File::open(path).map_err(|e| CacheError::Open {
            path: path.to_path_buf(),
            cause: e,
        })?;
        let file_len = file.metadata()?.len();

        let incompatible = |header: Option<CacheHeader>| CacheError::Incompatible {
            found_version: header.map(|h| h.version).unwrap_or(0),
            found_size: header.map(|h| h.size as u64).unwrap_or(file_len),
            expected_version: super::header::CACHE_VERSION,
            expected_size: size as u64,
        };

        if file_len < HEADER_SIZE as u64 {
            return Err(incompatible(None));
        }
        let header = CacheHeader::read_from(&mut file)?;
        if !header.is_compatible(size) || file_len != size as u64 {
            return Err(incompatible(Some(header)));
        }
        Ok(())
    }

    fn map(path: &Path, size: usize) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| CacheError::Open {
                path: path.to_path_buf(),
                cause: e,
            })?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| CacheError::Open {
                path: path.to_path_buf(),
                cause: e,
            })?;

        file.try_lock_exclusive().map_err(|e| CacheError::Lock {
            path: path.to_path_buf(),
            cause: e,
        })?;

        let map_err = |e| CacheError::Map {
            path: path.to_path_buf(),
            cause: e,
        };
        if file.metadata().map_err(map_err)?.len() != size as u64 {
            file.set_len(size as u64).map_err(map_err)?;
        }

        // SAFETY: the file is exclusively locked for the lifetime of the
        // mapping, so no other cooperating process resizes or rewrites it.
        let mut map = unsafe { MmapOptions::new().len(size).map_mut(&file) }.map_err(map_err)?;
        let base = NonNull::new(map.as_mut_ptr()).ok_or_else(|| CacheError::Map {
            path: path.to_path_buf(),
            cause: std::io::Error::other("null mapping"),
        })?;

        debug!("Mapped {} bytes of {}", size, path.display());
        Ok(Self {
            base,
            size,
            map,
            file,
            path: path.to_path_buf(),
        })
    }

    /// Zero the whole region and write a fresh header.
    pub(crate) fn reset(&mut self) -> Result<()> {
        let size = self.size;
        self.bytes_mut(0, size)?.fill(0);
        let header = CacheHeader::new(size as u32).to_bytes()?;
        self.bytes_mut(0, HEADER_SIZE)?.copy_from_slice(&header);
        Ok(())
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    fn check(&self, offset: usize, len: usize) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(CacheError::OutOfBounds {
                offset,
                len,
                size: self.size,
            }),
        }
    }

    pub(crate) fn read_u32(&self, offset: usize) -> Result<u32> {
        self.check(offset, 4)?;
        // SAFETY: bounds checked above; unaligned reads are allowed.
        let bytes = unsafe {
            self.base
                .as_ptr()
                .add(offset)
                .cast::<[u8; 4]>()
                .read_unaligned()
        };
        Ok(u32::from_ne_bytes(bytes))
    }

    pub(crate) fn write_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        self.check(offset, 4)?;
        // SAFETY: bounds checked above and access is exclusive.
        unsafe {
            self.base
                .as_ptr()
                .add(offset)
                .cast::<[u8; 4]>()
                .write_unaligned(value.to_ne_bytes())
        };
        Ok(())
    }

    pub(crate) fn read_i32(&self, offset: usize) -> Result<i32> {
        self.read_u32(offset).map(|v| v as i32)
    }

    pub(crate) fn write_i32(&mut self, offset: usize, value: i32) -> Result<()> {
        self.write_u32(offset, value as u32)
    }

    pub(crate) fn write_u8(&mut self, offset: usize, value: u8) -> Result<()> {
        self.bytes_mut(offset, 1)?[0] = value;
        Ok(())
    }

    /// Shared atomic view of a 4-byte aligned counter.
    pub(crate) fn atomic_u32(&self, offset: usize) -> Result<&AtomicU32> {
        self.check(offset, 4)?;
        // SAFETY: bounds checked above; page-aligned base keeps the
        // alignment of `offset`. Counters are only accessed through this view.
        let ptr = unsafe { self.base.as_ptr().add(offset) };
        if ptr.align_offset(std::mem::align_of::<AtomicU32>()) != 0 {
            return Err(CacheError::Corrupt(format!(
                "misaligned counter at {}",
                offset
            )));
        }
        Ok(unsafe { AtomicU32::from_ptr(ptr.cast::<u32>()) })
    }

    pub(crate) fn bytes(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.check(offset, len)?;
        // SAFETY: bounds checked above.
        Ok(unsafe { std::slice::from_raw_parts(self.base.as_ptr().add(offset), len) })
    }

    pub(crate) fn bytes_mut(&mut self, offset: usize, len: usize) -> Result<&mut [u8]> {
        self.check(offset, len)?;
        // SAFETY: bounds checked above and access is exclusive.
        Ok(unsafe { std::slice::from_raw_parts_mut(self.base.as_ptr().add(offset), len) })
    }

    /// High-water offset of the blob arena.
    pub(crate) fn end(&self) -> Result<usize> {
        self.read_u32(END_AT).map(|v| v as usize)
    }

    pub(crate) fn set_end(&mut self, end: usize) -> Result<()> {
        let end = u32::try_from(end).map_err(|_| CacheError::OutOfBounds {
            offset: end,
            len: 0,
            size: self.size,
        })?;
        self.write_u32(END_AT, end)
    }

    pub(crate) fn header(&self) -> Result<CacheHeader> {
        Ok(CacheHeader::from_bytes(self.bytes(0, HEADER_SIZE)?)?)
    }

    pub(crate) fn flush(&self) -> Result<()> {
        self.map.flush().map_err(|e| CacheError::Map {
            path: self.path.clone(),
            cause: e,
        })
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        if let Err(e) = self.map.flush() {
            warn!("Failed to flush cache file {}: {}", self.path.display(), e);
        }
        let _ = FileExt::unlock(&self.file);
    }
}
