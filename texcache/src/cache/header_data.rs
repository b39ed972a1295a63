//! Per-slot leading bytes (`header.data`).
//!
//! Every slot owns a fixed block of `4 + block_size` bytes: a little-endian
//! `u32` length followed by up to `block_size` bytes of the item's head.
//! Items no larger than the block never touch the body store.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::types::CacheError;

const LEN_PREFIX: usize = 4;

/// Fixed-stride store of item heads, addressed by slot.
#[derive(Debug, Clone)]
pub struct HeaderData {
    path: PathBuf,
    block_size: usize,
}

impl HeaderData {
    pub fn new(path: impl Into<PathBuf>, block_size: usize) -> Self {
        Self {
            path: path.into(),
            block_size,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes of payload per slot.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    fn stride(&self) -> u64 {
        (LEN_PREFIX + self.block_size) as u64
    }

    fn offset(&self, slot: u32) -> u64 {
        u64::from(slot) * self.stride()
    }

    /// Reads a slot's head. A slot past the end of the file reads as empty.
    pub fn read(&self, slot: u32) -> Result<Vec<u8>, CacheError> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        file.seek(SeekFrom::Start(self.offset(slot)))?;

        let mut len_buf = [0u8; LEN_PREFIX];
        match file.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > self.block_size {
            return Err(CacheError::HeaderCorrupted(format!(
                "header data length {} exceeds block size {} at slot {}",
                len, self.block_size, slot
            )));
        }

        let mut data = vec![0u8; len];
        match file.read_exact(&mut data) {
            Ok(()) => Ok(data),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(CacheError::HeaderCorrupted(
                format!("short header data block at slot {}", slot),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes a slot's head, truncated to the block size.
    ///
    /// Returns the number of bytes stored.
    pub fn write(&self, slot: u32, data: &[u8]) -> Result<usize, CacheError> {
        let stored = data.len().min(self.block_size);
        let mut block = Vec::with_capacity(LEN_PREFIX + self.block_size);
        block.extend_from_slice(&(stored as u32).to_le_bytes());
        block.extend_from_slice(&data[..stored]);
        block.resize(LEN_PREFIX + self.block_size, 0);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        file.seek(SeekFrom::Start(self.offset(slot)))?;
        file.write_all(&block)?;
        Ok(stored)
    }

    /// Marks a slot empty.
    pub fn clear_slot(&self, slot: u32) -> Result<(), CacheError> {
        if !self.path.exists() {
            return Ok(());
        }
        self.write(slot, &[]).map(|_| ())
    }

    /// Copies one slot's block to another; used when compacting.
    pub fn move_slot(&self, from: u32, to: u32) -> Result<(), CacheError> {
        if from == to {
            return Ok(());
        }
        let data = self.read(from)?;
        self.write(to, &data)?;
        Ok(())
    }

    /// Drops blocks beyond `slots`.
    pub fn truncate(&self, slots: u32) -> Result<(), CacheError> {
        match OpenOptions::new().write(true).open(&self.path) {
            Ok(file) => {
                file.set_len(self.offset(slots))?;
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes the file.
    pub fn clear(&self) -> Result<(), CacheError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
