//! Cache path construction.
//!
//! Layout under the cache root:
//!
//! ```text
//! <root>/index.header
//! <root>/header.data
//! <root>/fastcache.bin
//! <root>/bodies/<shard>/<id>.body
//! ```

use std::path::{Path, PathBuf};

use super::id::ContentId;

/// File name of the fixed-record index.
pub const INDEX_FILE: &str = "index.header";

/// File name of the per-slot header data blocks.
pub const HEADER_DATA_FILE: &str = "header.data";

/// File name of the thumbnail records.
pub const FAST_CACHE_FILE: &str = "fastcache.bin";

/// Directory holding the sharded body files.
pub const BODIES_DIR: &str = "bodies";

/// Body file extension.
pub const BODY_EXTENSION: &str = "body";

/// Path of the index header file.
pub fn index_path(root: &Path) -> PathBuf {
    root.join(INDEX_FILE)
}

/// Path of the header data file.
pub fn header_data_path(root: &Path) -> PathBuf {
    root.join(HEADER_DATA_FILE)
}

/// Path of the fast thumbnail cache file.
pub fn fast_cache_path(root: &Path) -> PathBuf {
    root.join(FAST_CACHE_FILE)
}

/// Root of the body tree.
pub fn bodies_dir(root: &Path) -> PathBuf {
    root.join(BODIES_DIR)
}

/// Shard directory for an id.
///
/// # Example
///
/// ```
/// use std::path::PathBuf;
/// use texcache::cache::{shard_directory, ContentId};
///
/// let id: ContentId = "a0000000-0000-4000-8000-000000000000".parse().unwrap();
/// assert_eq!(
///     shard_directory(&PathBuf::from("/cache"), &id),
///     PathBuf::from("/cache/bodies/a")
/// );
/// ```
pub fn shard_directory(root: &Path, id: &ContentId) -> PathBuf {
    bodies_dir(root).join(id.shard().to_string())
}

/// Full path of an id's body file.
///
/// # Example
///
/// ```
/// use std::path::PathBuf;
/// use texcache::cache::{body_path, ContentId};
///
/// let id: ContentId = "3f2504e0-4f89-41d3-9a0c-0305e82c3301".parse().unwrap();
/// assert_eq!(
///     body_path(&PathBuf::from("/cache"), &id),
///     PathBuf::from("/cache/bodies/3/3f2504e0-4f89-41d3-9a0c-0305e82c3301.body")
/// );
/// ```
pub fn body_path(root: &Path, id: &ContentId) -> PathBuf {
    shard_directory(root, id).join(format!("{}.{}", id, BODY_EXTENSION))
}

/// Parse a body file name back into its id.
///
/// Returns `None` for anything that is not `<uuid>.body`.
pub fn parse_body_filename(filename: &str) -> Option<ContentId> {
    let stem = filename.strip_suffix(BODY_EXTENSION)?.strip_suffix('.')?;
    stem.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_file_paths() {
        let root = PathBuf::from("/cache");
        assert_eq!(index_path(&root), PathBuf::from("/cache/index.header"));
        assert_eq!(header_data_path(&root), PathBuf::from("/cache/header.data"));
        assert_eq!(fast_cache_path(&root), PathBuf::from("/cache/fastcache.bin"));
        assert_eq!(bodies_dir(&root), PathBuf::from("/cache/bodies"));
    }

    #[test]
    fn test_body_path_roundtrip_filename() {
        let root = PathBuf::from("/cache");
        let id = ContentId::new_v4();
        let path = body_path(&root, &id);
        let name = path.file_name().unwrap().to_str().unwrap();
        assert_eq!(parse_body_filename(name), Some(id));
        assert!(path.starts_with(shard_directory(&root, &id)));
    }

    #[test]
    fn test_parse_body_filename_rejects_others() {
        assert_eq!(parse_body_filename("notes.txt"), None);
        assert_eq!(parse_body_filename("garbage.body"), None);
        assert_eq!(parse_body_filename(".body"), None);
    }
}
