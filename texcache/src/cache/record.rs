//! Fixed-record index file (`index.header`).
//!
//! ```text
//! offset 0   u32 version
//!        4   u32 address width
//!        8   u32 entry count
//!       12   record[0]   16-byte id | i32 declared | i32 body | i64 last access
//!       44   record[1]
//!       ...
//! ```
//!
//! All integers are little-endian. A record with the nil id is a free slot.
//! Any read that returns less than a full block is reported as
//! [`CacheError::HeaderCorrupted`]; the caller is expected to reset the
//! whole cache rather than attempt partial recovery.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::id::ContentId;
use super::types::CacheError;

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

/// Pointer width of the writer; caches are not shared across widths.
pub const ADDRESS_WIDTH: u32 = usize::BITS;

/// Size of the info block in bytes.
pub const HEADER_INFO_SIZE: usize = 12;

/// Size of one index record in bytes.
pub const RECORD_SIZE: usize = 32;

/// Info block preceding the records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderInfo {
    pub version: u32,
    pub address_width: u32,
    pub entry_count: u32,
}

impl HeaderInfo {
    /// Info block for the running build.
    pub fn current(entry_count: u32) -> Self {
        Self {
            version: FORMAT_VERSION,
            address_width: ADDRESS_WIDTH,
            entry_count,
        }
    }

    /// Returns true if this file was written by a compatible build.
    pub fn is_compatible(&self) -> bool {
        self.version == FORMAT_VERSION && self.address_width == ADDRESS_WIDTH
    }

    pub fn encode(&self) -> [u8; HEADER_INFO_SIZE] {
        let mut buf = [0u8; HEADER_INFO_SIZE];
        buf[0..4].copy_from_slice(&self.version.to_le_bytes());
        buf[4..8].copy_from_slice(&self.address_width.to_le_bytes());
        buf[8..12].copy_from_slice(&self.entry_count.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8; HEADER_INFO_SIZE]) -> Self {
        Self {
            version: u32::from_le_bytes(read_4(buf, 0)),
            address_width: u32::from_le_bytes(read_4(buf, 4)),
            entry_count: u32::from_le_bytes(read_4(buf, 8)),
        }
    }
}

/// One slot of the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRecord {
    /// Content id; nil marks a free slot.
    pub id: ContentId,
    /// Full logical size; negative while allocated but uncommitted.
    pub declared_size: i32,
    /// Bytes persisted in the body file.
    pub body_size: i32,
    /// Seconds since the Unix epoch of the last recorded access.
    pub last_access: i64,
}

impl IndexRecord {
    /// A free slot.
    pub const EMPTY: IndexRecord = IndexRecord {
        id: ContentId::NIL,
        declared_size: 0,
        body_size: 0,
        last_access: 0,
    };

    /// A freshly allocated, not yet committed slot.
    pub fn placeholder(id: ContentId, now: i64) -> Self {
        Self {
            id,
            declared_size: -1,
            body_size: 0,
            last_access: now,
        }
    }

    /// Returns true for a free slot.
    pub fn is_free(&self) -> bool {
        self.id.is_nil()
    }

    /// Returns true once the entry may be surfaced to readers.
    pub fn is_committed(&self) -> bool {
        self.declared_size >= 0
    }

    /// Returns true if the sizes are consistent.
    ///
    /// Uncommitted placeholders carry no body and are consistent.
    pub fn is_consistent(&self) -> bool {
        self.body_size >= 0 && (self.declared_size < 0 || self.body_size <= self.declared_size)
    }

    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[0..16].copy_from_slice(self.id.as_bytes());
        buf[16..20].copy_from_slice(&self.declared_size.to_le_bytes());
        buf[20..24].copy_from_slice(&self.body_size.to_le_bytes());
        buf[24..32].copy_from_slice(&self.last_access.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8; RECORD_SIZE]) -> Self {
        let mut id = [0u8; 16];
        id.copy_from_slice(&buf[0..16]);
        let mut last_access = [0u8; 8];
        last_access.copy_from_slice(&buf[24..32]);
        Self {
            id: ContentId::from_bytes(id),
            declared_size: i32::from_le_bytes(read_4(buf, 16)),
            body_size: i32::from_le_bytes(read_4(buf, 20)),
            last_access: i64::from_le_bytes(last_access),
        }
    }
}

fn read_4(buf: &[u8], offset: usize) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&buf[offset..offset + 4]);
    out
}

/// Byte offset of a slot's record.
pub fn record_offset(slot: u32) -> u64 {
    HEADER_INFO_SIZE as u64 + u64::from(slot) * RECORD_SIZE as u64
}

/// Contents of a fully loaded header file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedHeader {
    pub info: HeaderInfo,
    pub records: Vec<IndexRecord>,
}

/// Handle to the index file.
///
/// Each operation opens the file, so the struct holds no descriptor and is
/// trivially shareable; callers serialise access with the index lock.
#[derive(Debug, Clone)]
pub struct HeaderFile {
    path: PathBuf,
}

impl HeaderFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current file length, or zero if it does not exist.
    pub fn file_len(&self) -> Result<u64, CacheError> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Loads the info block and every record.
    ///
    /// Returns `Ok(None)` if the file does not exist. A file that is shorter
    /// than its info block claims, or written by an incompatible build, is
    /// reported as corrupted.
    pub fn load(&self) -> Result<Option<LoadedHeader>, CacheError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let Some(info_bytes) = bytes.first_chunk::<HEADER_INFO_SIZE>() else {
            return Err(CacheError::HeaderCorrupted(format!(
                "info block truncated at {} bytes",
                bytes.len()
            )));
        };
        let info = HeaderInfo::decode(info_bytes);
        if !info.is_compatible() {
            return Err(CacheError::HeaderCorrupted(format!(
                "incompatible header: version {} width {}",
                info.version, info.address_width
            )));
        }

        let expected = record_offset(info.entry_count);
        if (bytes.len() as u64) < expected {
            return Err(CacheError::HeaderCorrupted(format!(
                "expected {} bytes for {} records, found {}",
                expected,
                info.entry_count,
                bytes.len()
            )));
        }

        let records = bytes[HEADER_INFO_SIZE..expected as usize]
            .chunks_exact(RECORD_SIZE)
            .map(|chunk| {
                let mut buf = [0u8; RECORD_SIZE];
                buf.copy_from_slice(chunk);
                IndexRecord::decode(&buf)
            })
            .collect();

        Ok(Some(LoadedHeader { info, records }))
    }

    /// Reads a single record.
    pub fn read_record(&self, slot: u32) -> Result<IndexRecord, CacheError> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(record_offset(slot)))?;
        let mut buf = [0u8; RECORD_SIZE];
        match file.read_exact(&mut buf) {
            Ok(()) => Ok(IndexRecord::decode(&buf)),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(CacheError::HeaderCorrupted(
                format!("short read of record {}", slot),
            )),
            Err(e) => Err(e.into()),
        }
    }

    fn open_for_write(&self) -> Result<File, CacheError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?)
    }

    /// Writes the info block.
    pub fn write_info(&self, info: &HeaderInfo) -> Result<(), CacheError> {
        let mut file = self.open_for_write()?;
        file.write_all(&info.encode())?;
        Ok(())
    }

    /// Writes one record in place.
    pub fn write_record(&self, slot: u32, record: &IndexRecord) -> Result<(), CacheError> {
        let mut file = self.open_for_write()?;
        file.seek(SeekFrom::Start(record_offset(slot)))?;
        file.write_all(&record.encode())?;
        Ok(())
    }

    /// Writes a batch of records with a single open.
    pub fn write_records(&self, records: &BTreeMap<u32, IndexRecord>) -> Result<(), CacheError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut file = self.open_for_write()?;
        for (slot, record) in records {
            file.seek(SeekFrom::Start(record_offset(*slot)))?;
            file.write_all(&record.encode())?;
        }
        Ok(())
    }

    /// Replaces the whole file with the given records.
    pub fn rewrite(&self, records: &[IndexRecord]) -> Result<(), CacheError> {
        let mut buf = Vec::with_capacity(HEADER_INFO_SIZE + records.len() * RECORD_SIZE);
        buf.extend_from_slice(&HeaderInfo::current(records.len() as u32).encode());
        for record in records {
            buf.extend_from_slice(&record.encode());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&self.path)?;
        file.write_all(&buf)?;
        file.sync_data()?;
        Ok(())
    }

    /// Rewrites the file as empty (zero entries).
    pub fn reset(&self) -> Result<(), CacheError> {
        self.rewrite(&[])
    }
}
