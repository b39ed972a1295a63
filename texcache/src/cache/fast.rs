//! Fixed-size thumbnail records (`fastcache.bin`).
//!
//! One record per index slot, at `slot * FAST_RECORD_SIZE`:
//!
//! ```text
//! i32 width | i32 height | i32 channels | i32 discard level | payload[FAST_PAYLOAD_CAP]
//! ```
//!
//! Records are not evicted on their own. A freed slot's record is simply
//! stale until the slot is reused and overwritten.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma, LumaA, Pixel, Rgb, Rgba};
use tracing::debug;

use super::types::CacheError;

/// Pixel payload capacity of one record.
pub const FAST_PAYLOAD_CAP: usize = 1024;

const FAST_HEADER_SIZE: usize = 16;

/// Total size of one record.
pub const FAST_RECORD_SIZE: usize = FAST_HEADER_SIZE + FAST_PAYLOAD_CAP;

/// A low-fidelity preview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    /// Discard level of `pixels` relative to the full-resolution source.
    pub discard_level: i32,
    pub pixels: Vec<u8>,
}

impl Thumbnail {
    fn is_well_formed(&self) -> bool {
        let expected = (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|n| n.checked_mul(usize::from(self.channels)));
        self.width > 0
            && self.height > 0
            && (1..=4).contains(&self.channels)
            && expected == Some(self.pixels.len())
    }
}

/// Halve both dimensions, keeping at least one pixel.
fn halve<P>(pixels: Vec<u8>, width: u32, height: u32) -> Option<Vec<u8>>
where
    P: Pixel<Subpixel = u8> + 'static,
{
    let image = ImageBuffer::<P, Vec<u8>>::from_raw(width, height, pixels)?;
    let resized = imageops::resize(
        &image,
        (width / 2).max(1),
        (height / 2).max(1),
        FilterType::Triangle,
    );
    Some(resized.into_raw())
}

/// Downsample by half-resolution steps until the payload fits `cap`.
///
/// Each step adds one to the discard level.
pub fn downsample_to_fit(mut thumb: Thumbnail, cap: usize) -> Option<Thumbnail> {
    while thumb.pixels.len() > cap {
        if thumb.width == 1 && thumb.height == 1 {
            return None;
        }
        let (w, h) = (thumb.width, thumb.height);
        let pixels = std::mem::take(&mut thumb.pixels);
        thumb.pixels = match thumb.channels {
            1 => halve::<Luma<u8>>(pixels, w, h)?,
            2 => halve::<LumaA<u8>>(pixels, w, h)?,
            3 => halve::<Rgb<u8>>(pixels, w, h)?,
            4 => halve::<Rgba<u8>>(pixels, w, h)?,
            _ => return None,
        };
        thumb.width = (w / 2).max(1);
        thumb.height = (h / 2).max(1);
        thumb.discard_level += 1;
    }
    Some(thumb)
}

/// Slot-indexed thumbnail file.
#[derive(Debug, Clone)]
pub struct FastThumbnailCache {
    path: PathBuf,
}

impl FastThumbnailCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn offset(slot: u32) -> u64 {
        u64::from(slot) * FAST_RECORD_SIZE as u64
    }

    /// Sizes the file to exactly `max_entries` records.
    pub fn resize(&self, max_entries: u32) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        file.set_len(Self::offset(max_entries))?;
        Ok(())
    }

    /// Stores a preview for `slot`, downsampling if it exceeds the record.
    ///
    /// Returns the stored discard level, or `None` if the input was
    /// malformed and nothing was written.
    pub fn write(
        &self,
        slot: u32,
        pixels: &[u8],
        width: u32,
        height: u32,
        channels: u8,
        discard_level: i32,
    ) -> Result<Option<i32>, CacheError> {
        let thumb = Thumbnail {
            width,
            height,
            channels,
            discard_level,
            pixels: pixels.to_vec(),
        };
        if !thumb.is_well_formed() {
            debug!(slot, width, height, channels, len = pixels.len(), "Rejecting malformed thumbnail");
            return Ok(None);
        }
        let Some(thumb) = downsample_to_fit(thumb, FAST_PAYLOAD_CAP) else {
            return Ok(None);
        };

        let mut record = vec![0u8; FAST_RECORD_SIZE];
        record[0..4].copy_from_slice(&(thumb.width as i32).to_le_bytes());
        record[4..8].copy_from_slice(&(thumb.height as i32).to_le_bytes());
        record[8..12].copy_from_slice(&i32::from(thumb.channels).to_le_bytes());
        record[12..16].copy_from_slice(&thumb.discard_level.to_le_bytes());
        record[FAST_HEADER_SIZE..FAST_HEADER_SIZE + thumb.pixels.len()]
            .copy_from_slice(&thumb.pixels);

        self.write_record(slot, &record)?;
        Ok(Some(thumb.discard_level))
    }

    fn write_record(&self, slot: u32, record: &[u8]) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        file.seek(SeekFrom::Start(Self::offset(slot)))?;
        file.write_all(record)?;
        Ok(())
    }

    /// Reads the preview for `slot`.
    ///
    /// Empty or malformed records read as `None`; partially valid data is
    /// never returned.
    pub fn read(&self, slot: u32) -> Result<Option<Thumbnail>, CacheError> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        file.seek(SeekFrom::Start(Self::offset(slot)))?;
        let mut record = vec![0u8; FAST_RECORD_SIZE];
        match file.read_exact(&mut record) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        Ok(decode_record(&record))
    }

    /// Zeroes a slot's record.
    pub fn clear_slot(&self, slot: u32) -> Result<(), CacheError> {
        if !self.path.exists() {
            return Ok(());
        }
        self.write_record(slot, &[0u8; FAST_RECORD_SIZE])
    }

    /// Copies one record to another slot; used when compacting.
    pub fn move_slot(&self, from: u32, to: u32) -> Result<(), CacheError> {
        if from == to || !self.path.exists() {
            return Ok(());
        }
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(Self::offset(from)))?;
        let mut record = vec![0u8; FAST_RECORD_SIZE];
        match file.read_exact(&mut record) {
            Ok(()) => self.write_record(to, &record),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => self.clear_slot(to),
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

fn read_i32(buf: &[u8], offset: usize) -> i32 {
    let mut out = [0u8; 4];
    out.copy_from_slice(&buf[offset..offset + 4]);
    i32::from_le_bytes(out)
}

fn decode_record(record: &[u8]) -> Option<Thumbnail> {
    let width = read_i32(record, 0);
    let height = read_i32(record, 4);
    let channels = read_i32(record, 8);
    let discard_level = read_i32(record, 12);
    if width <= 0 || height <= 0 || !(1..=4).contains(&channels) || discard_level < 0 {
        return None;
    }
    let len = (width as usize)
        .checked_mul(height as usize)?
        .checked_mul(channels as usize)?;
    if len > FAST_PAYLOAD_CAP {
        return None;
    }
    Some(Thumbnail {
        width: width as u32,
        height: height as u32,
        channels: channels as u8,
        discard_level,
        pixels: record[FAST_HEADER_SIZE..FAST_HEADER_SIZE + len].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cache(dir: &TempDir) -> FastThumbnailCache {
        FastThumbnailCache::new(dir.path().join("fastcache.bin"))
    }

    #[test]
    fn test_small_thumbnail_stored_as_is() {
        let dir = TempDir::new().unwrap();
        let fast = cache(&dir);
        let pixels: Vec<u8> = (0..48).collect();

        assert_eq!(fast.write(3, &pixels, 4, 4, 3, 2).unwrap(), Some(2));
        let thumb = fast.read(3).unwrap().unwrap();
        assert_eq!((thumb.width, thumb.height, thumb.channels), (4, 4, 3));
        assert_eq!(thumb.discard_level, 2);
        assert_eq!(thumb.pixels, pixels);
    }

    #[test]
    fn test_large_thumbnail_downsampled() {
        let dir = TempDir::new().unwrap();
        let fast = cache(&dir);
        // 64x64 RGBA = 16 KiB; two halvings reach 16x16x4 = 1 KiB.
        let pixels = vec![200u8; 64 * 64 * 4];

        assert_eq!(fast.write(0, &pixels, 64, 64, 4, 0).unwrap(), Some(2));
        let thumb = fast.read(0).unwrap().unwrap();
        assert_eq!((thumb.width, thumb.height), (16, 16));
        assert_eq!(thumb.pixels.len(), FAST_PAYLOAD_CAP);
        assert!(thumb.pixels.iter().all(|&p| (199..=201).contains(&p)));
    }

    #[test]
    fn test_empty_and_missing_records_read_none() {
        let dir = TempDir::new().unwrap();
        let fast = cache(&dir);
        assert_eq!(fast.read(0).unwrap(), None);

        fast.resize(4).unwrap();
        assert_eq!(fast.read(2).unwrap(), None);
        assert_eq!(fs::metadata(fast.path()).unwrap().len(), 4 * FAST_RECORD_SIZE as u64);
    }

    #[test]
    fn test_malformed_input_rejected() {
        let dir = TempDir::new().unwrap();
        let fast = cache(&dir);
        assert_eq!(fast.write(0, &[1, 2, 3], 2, 2, 3, 0).unwrap(), None);
        assert_eq!(fast.write(0, &[], 0, 0, 3, 0).unwrap(), None);
        assert_eq!(fast.write(0, &[0; 4], u32::MAX, u32::MAX, 4, 0).unwrap(), None);
        assert_eq!(fast.read(0).unwrap(), None);
    }

    #[test]
    fn test_malformed_record_reads_none() {
        let dir = TempDir::new().unwrap();
        let fast = cache(&dir);
        let mut record = vec![0u8; FAST_RECORD_SIZE];
        record[0..4].copy_from_slice(&64i32.to_le_bytes());
        record[4..8].copy_from_slice(&64i32.to_le_bytes());
        record[8..12].copy_from_slice(&4i32.to_le_bytes());
        fs::write(fast.path(), &record).unwrap();
        assert_eq!(fast.read(0).unwrap(), None);
    }

    #[test]
    fn test_clear_and_move_slot() {
        let dir = TempDir::new().unwrap();
        let fast = cache(&dir);
        fast.write(5, &[9u8; 4], 2, 2, 1, 0).unwrap();

        fast.move_slot(5, 1).unwrap();
        assert_eq!(fast.read(1).unwrap().unwrap().pixels, vec![9u8; 4]);

        fast.clear_slot(5).unwrap();
        assert_eq!(fast.read(5).unwrap(), None);
    }

    #[test]
    fn test_downsample_odd_dimensions() {
        let thumb = Thumbnail {
            width: 33,
            height: 1,
            channels: 1,
            discard_level: 0,
            pixels: vec![1; 33],
        };
        let fitted = downsample_to_fit(thumb, 10).unwrap();
        assert_eq!((fitted.width, fitted.height), (8, 1));
        assert_eq!(fitted.discard_level, 2);
    }
}
