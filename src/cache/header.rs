//! Cache file header.
//!
//! The first `HEADER_SIZE` bytes of the file. All integers are stored in host
//! byte order; a cache file is only meaningful on the machine that wrote it.

use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// Current cache file format version.
pub const CACHE_VERSION: u32 = 2;

/// Fixed size of the header in bytes. Record blobs start right after it.
pub const HEADER_SIZE: usize = 128;

// version at 0, size at 4
pub(crate) const END_AT: usize = 8;
pub(crate) const SLOT_COUNT_AT: usize = 12;
pub(crate) const NODE_COUNT_AT: usize = 16;
pub(crate) const FREE_HEAD_AT: usize = 20;
pub(crate) const ACTIVE_COUNT_AT: usize = 24;
const COMMENT_AT: usize = 32;

const COMMENT: &[u8] = b"\nDo not edit this file.\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheHeader {
    pub version: u32,
    /// Declared size of the whole file
    pub size: u32,
    /// High-water offset of the blob arena
    pub end: u32,
    /// Number of hash slots at the top of the file
    pub slot_count: u32,
    /// Nodes ever carved out of the index arena
    pub node_count: u32,
    /// First node of the free list, -1 when empty
    pub free_head: i32,
    /// Nodes currently reachable from a slot
    pub active_count: u32,
}

impl CacheHeader {
    /// Header of a freshly formatted cache; index fields are filled in by the
    /// index when it formats its arena.
    pub fn new(size: u32) -> Self {
        Self {
            version: CACHE_VERSION,
            size,
            end: HEADER_SIZE as u32,
            slot_count: 0,
            node_count: 0,
            free_head: -1,
            active_count: 0,
        }
    }

    /// True when the header was written by this format for this size.
    pub fn is_compatible(&self, expected_size: usize) -> bool {
        self.version == CACHE_VERSION && self.size as usize == expected_size
    }

    pub fn from_bytes(bytes: &[u8]) -> io::Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Buffer too small for header",
            ));
        }

        let mut cursor = io::Cursor::new(bytes);
        let version = cursor.read_u32::<NativeEndian>()?;
        let size = cursor.read_u32::<NativeEndian>()?;
        let end = cursor.read_u32::<NativeEndian>()?;
        let slot_count = cursor.read_u32::<NativeEndian>()?;
        let node_count = cursor.read_u32::<NativeEndian>()?;
        let free_head = cursor.read_i32::<NativeEndian>()?;
        let active_count = cursor.read_u32::<NativeEndian>()?;

        Ok(Self {
            version,
            size,
            end,
            slot_count,
            node_count,
            free_head,
            active_count,
        })
    }

    /// Read the header of an existing file without mapping it.
    pub fn read_from(mut reader: impl Read) -> io::Result<Self> {
        let mut bytes = [0u8; HEADER_SIZE];
        reader.read_exact(&mut bytes)?;
        Self::from_bytes(&bytes)
    }

    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        buf.write_u32::<NativeEndian>(self.version)?;
        buf.write_u32::<NativeEndian>(self.size)?;
        buf.write_u32::<NativeEndian>(self.end)?;
        buf.write_u32::<NativeEndian>(self.slot_count)?;
        buf.write_u32::<NativeEndian>(self.node_count)?;
        buf.write_i32::<NativeEndian>(self.free_head)?;
        buf.write_u32::<NativeEndian>(self.active_count)?;
        buf.resize(COMMENT_AT, 0);
        buf.write_all(COMMENT)?;
        buf.resize(HEADER_SIZE, 0);
        Ok(buf)
    }
}
