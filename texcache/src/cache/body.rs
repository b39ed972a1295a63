//! Sharded body file storage.
//!
//! Bodies live at `bodies/<shard>/<id>.body`. The store keeps no index of
//! its own; the cache index is the only authority on which files should
//! exist. Distinct file names per id stand in for locking.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::id::ContentId;
use super::path::{bodies_dir, body_path, parse_body_filename};
use super::types::CacheError;

/// File storage for the part of each item beyond its header block.
#[derive(Debug, Clone)]
pub struct BodyStore {
    root: PathBuf,
}

impl BodyStore {
    /// Creates a store rooted at the cache directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of an id's body file.
    pub fn path(&self, id: &ContentId) -> PathBuf {
        body_path(&self.root, id)
    }

    /// Writes `bytes` at `body_offset`.
    ///
    /// Offset zero creates or truncates the file; any other offset extends
    /// an existing body. Returns the bytes written.
    pub fn write(
        &self,
        id: &ContentId,
        bytes: &[u8],
        body_offset: u64,
    ) -> Result<usize, CacheError> {
        let body_io = |source| CacheError::BodyIo { id: *id, source };
        let path = self.path(id);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(body_io)?;
        }

        let mut file = if body_offset == 0 {
            File::create(&path).map_err(body_io)?
        } else {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)
                .map_err(body_io)?;
            file.set_len(body_offset).map_err(body_io)?;
            file.seek(SeekFrom::Start(body_offset)).map_err(body_io)?;
            file
        };
        file.write_all(bytes).map_err(body_io)?;
        Ok(bytes.len())
    }

    /// Reads into `buf` starting at `offset`.
    ///
    /// Returns 0 if the file does not exist; that is not an error.
    pub fn read_into(
        &self,
        id: &ContentId,
        buf: &mut [u8],
        offset: u64,
    ) -> Result<usize, CacheError> {
        let body_io = |source| CacheError::BodyIo { id: *id, source };
        let mut file = match File::open(self.path(id)) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(body_io(e)),
        };
        file.seek(SeekFrom::Start(offset)).map_err(body_io)?;

        let mut read = 0;
        while read < buf.len() {
            match file.read(&mut buf[read..]) {
                Ok(0) => break,
                Ok(n) => read += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(body_io(e)),
            }
        }
        Ok(read)
    }

    /// Reads up to `max_len` bytes starting at `offset`.
    pub fn read(
        &self,
        id: &ContentId,
        offset: u64,
        max_len: usize,
    ) -> Result<Vec<u8>, CacheError> {
        let mut buf = vec![0u8; max_len];
        let n = self.read_into(id, &mut buf, offset)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Size of an id's body file, if present.
    pub fn size(&self, id: &ContentId) -> Option<u64> {
        fs::metadata(self.path(id)).ok().map(|m| m.len())
    }

    /// Returns true if the body file exists.
    pub fn exists(&self, id: &ContentId) -> bool {
        self.path(id).is_file()
    }

    /// Deletes an id's body file. Absence is not an error.
    ///
    /// Returns true if a file was removed.
    pub fn remove(&self, id: &ContentId) -> Result<bool, CacheError> {
        match fs::remove_file(self.path(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(CacheError::BodyIo { id: *id, source }),
        }
    }

    /// Deletes every body file.
    pub fn clear(&self) -> Result<(), CacheError> {
        match fs::remove_dir_all(bodies_dir(&self.root)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Lists every body file with its size.
    ///
    /// Files whose names are not `<id>.body` are skipped.
    pub fn scan(&self) -> Result<Vec<(ContentId, u64)>, CacheError> {
        let dir = bodies_dir(&self.root);
        let shards = match fs::read_dir(&dir) {
            Ok(shards) => shards,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut found = Vec::new();
        for shard in shards {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            for entry in fs::read_dir(shard.path())? {
                let entry = entry?;
                let name = entry.file_name();
                let Some(id) = name.to_str().and_then(parse_body_filename) else {
                    debug!(file = ?entry.path(), "Skipping unrecognised file in body store");
                    continue;
                };
                if let Ok(meta) = entry.metadata() {
                    found.push((id, meta.len()));
                }
            }
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_store() -> (BodyStore, TempDir) {
        let dir = TempDir::new().unwrap();
        (BodyStore::new(dir.path()), dir)
    }

    #[test]
    fn test_write_and_read() {
        let (store, _dir) = create_store();
        let id = ContentId::new_v4();

        assert_eq!(store.write(&id, b"hello world", 0).unwrap(), 11);
        assert_eq!(store.read(&id, 0, 64).unwrap(), b"hello world");
        assert_eq!(store.read(&id, 6, 3).unwrap(), b"wor");
        assert_eq!(store.size(&id), Some(11));
        assert!(store.path(&id).starts_with(store.root().join("bodies")));
    }

    #[test]
    fn test_read_missing_returns_zero() {
        let (store, _dir) = create_store();
        let mut buf = [0u8; 8];
        assert_eq!(store.read_into(&ContentId::new_v4(), &mut buf, 0).unwrap(), 0);
    }

    #[test]
    fn test_write_at_offset_appends() {
        let (store, _dir) = create_store();
        let id = ContentId::new_v4();
        store.write(&id, b"abc", 0).unwrap();
        store.write(&id, b"def", 3).unwrap();
        assert_eq!(store.read(&id, 0, 16).unwrap(), b"abcdef");

        // Overwrite from zero truncates.
        store.write(&id, b"x", 0).unwrap();
        assert_eq!(store.read(&id, 0, 16).unwrap(), b"x");
    }

    #[test]
    fn test_remove_is_idempotent() {
        let (store, _dir) = create_store();
        let id = ContentId::new_v4();
        store.write(&id, b"data", 0).unwrap();

        assert!(store.remove(&id).unwrap());
        assert!(!store.remove(&id).unwrap());
        assert!(!store.exists(&id));
    }

    #[test]
    fn test_scan_and_clear() {
        let (store, dir) = create_store();
        let a = ContentId::new_v4();
        let b = ContentId::new_v4();
        store.write(&a, &[1; 10], 0).unwrap();
        store.write(&b, &[2; 20], 0).unwrap();
        fs::write(dir.path().join("bodies").join(a.shard().to_string()).join("junk"), b"x")
            .unwrap();

        let mut found = store.scan().unwrap();
        found.sort();
        let mut expected = vec![(a, 10), (b, 20)];
        expected.sort();
        assert_eq!(found, expected);

        store.clear().unwrap();
        assert!(store.scan().unwrap().is_empty());
    }
}
