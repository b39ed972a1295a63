//! Cache requests executed on the work queue.
//!
//! A [`CacheRequest`] names an id, an offset and an operation. Wrapped in a
//! [`CacheJob`] together with the cache it targets, it becomes a unit of
//! [`Work`] whose output is a [`RequestResult`].
//!
//! Writes larger than [`WRITE_CHUNK_SIZE`] are stored one chunk per run and
//! report `Pending` in between, so an aborted write stops at a chunk
//! boundary and leaves a valid prefix in the cache.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::cache::{CacheError, ContentId, ErrorCode, TextureCache};
use crate::queue::{Completion, Outcome, RequestStatus, Work, WorkContext};

/// Bytes stored per run of a write request.
pub const WRITE_CHUNK_SIZE: usize = 256 * 1024;

/// Container format guessed from an item's leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FormatHint {
    /// JPEG 2000 codestream or JP2 container
    J2c,
    Jpeg,
    Png,
    Dds,
    #[default]
    Unknown,
}

impl FormatHint {
    /// Sniffs the format from magic bytes.
    pub fn sniff(bytes: &[u8]) -> Self {
        const J2C: &[u8] = &[0xFF, 0x4F, 0xFF, 0x51];
        const JP2: &[u8] = &[0x00, 0x00, 0x00, 0x0C, 0x6A, 0x50, 0x20, 0x20];
        const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF];
        const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        const DDS: &[u8] = b"DDS ";

        if bytes.starts_with(J2C) || bytes.starts_with(JP2) {
            FormatHint::J2c
        } else if bytes.starts_with(JPEG) {
            FormatHint::Jpeg
        } else if bytes.starts_with(PNG) {
            FormatHint::Png
        } else if bytes.starts_with(DDS) {
            FormatHint::Dds
        } else {
            FormatHint::Unknown
        }
    }
}

impl fmt::Display for FormatHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FormatHint::J2c => "j2c",
            FormatHint::Jpeg => "jpeg",
            FormatHint::Png => "png",
            FormatHint::Dds => "dds",
            FormatHint::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Low-fidelity preview stored alongside a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preview {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub discard_level: i32,
}

/// Operation carried by a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOperation {
    Read {
        max_len: usize,
    },
    Write {
        data: Vec<u8>,
        declared_size: i32,
        preview: Option<Preview>,
    },
}

/// In-process request payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRequest {
    pub id: ContentId,
    pub offset: u64,
    pub operation: CacheOperation,
}

impl CacheRequest {
    pub fn read(id: ContentId, offset: u64, max_len: usize) -> Self {
        Self {
            id,
            offset,
            operation: CacheOperation::Read { max_len },
        }
    }

    pub fn write(id: ContentId, data: Vec<u8>, declared_size: i32) -> Self {
        Self {
            id,
            offset: 0,
            operation: CacheOperation::Write {
                data,
                declared_size,
                preview: None,
            },
        }
    }

    /// Sets the offset at which a write appends.
    pub fn at_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    /// Attaches a preview to a write request. No effect on reads.
    pub fn with_preview(mut self, preview: Preview) -> Self {
        if let CacheOperation::Write { preview: slot, .. } = &mut self.operation {
            *slot = Some(preview);
        }
        self
    }

    pub fn is_write(&self) -> bool {
        matches!(self.operation, CacheOperation::Write { .. })
    }
}

/// Outcome reported to the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestResult {
    pub bytes_transferred: usize,
    pub success: bool,
    pub format_hint: FormatHint,
    /// Bytes read; empty for writes.
    pub data: Vec<u8>,
    /// Declared size of the item (reads) or as written (writes).
    pub declared_size: i32,
    /// Diagnostic for failed requests.
    pub error: Option<ErrorCode>,
}

impl RequestResult {
    pub fn failed(code: ErrorCode) -> Self {
        Self {
            error: Some(code),
            ..Self::default()
        }
    }

    /// Maps a finished queue request to what the caller sees.
    pub fn from_completion(completion: Completion<RequestResult>) -> Self {
        match (completion.status, completion.output) {
            (RequestStatus::Complete, Some(result)) => result,
            _ if completion.timed_out => Self::failed(ErrorCode::StaleRequestTimeout),
            _ => Self::failed(ErrorCode::Aborted),
        }
    }
}

impl From<&CacheError> for RequestResult {
    fn from(err: &CacheError) -> Self {
        Self::failed(err.code())
    }
}

/// A cache request bound to the cache it runs against.
pub struct CacheJob {
    cache: Arc<TextureCache>,
    request: CacheRequest,
    /// Bytes of a write already stored by earlier runs.
    written: usize,
}

impl CacheJob {
    pub fn new(cache: Arc<TextureCache>, request: CacheRequest) -> Self {
        Self {
            cache,
            request,
            written: 0,
        }
    }

    pub fn request(&self) -> &CacheRequest {
        &self.request
    }

    fn run_read(&self, max_len: usize) -> Outcome<RequestResult> {
        let id = &self.request.id;
        match self.cache.read(id, self.request.offset, max_len) {
            Ok(Some(read)) => {
                let format_hint = if self.request.offset == 0 {
                    FormatHint::sniff(&read.data)
                } else {
                    FormatHint::Unknown
                };
                trace!(id = %id, bytes = read.data.len(), "Cache read hit");
                Outcome::Complete(RequestResult {
                    bytes_transferred: read.data.len(),
                    success: true,
                    format_hint,
                    data: read.data,
                    declared_size: read.declared_size,
                    error: None,
                })
            }
            Ok(None) => Outcome::Failed(RequestResult::failed(ErrorCode::NotFound)),
            Err(e) => {
                debug!(id = %id, error = %e, "Cache read failed");
                Outcome::Failed(RequestResult::from(&e))
            }
        }
    }

    fn run_write(&mut self, cx: &WorkContext<'_>) -> Outcome<RequestResult> {
        let CacheOperation::Write {
            data,
            declared_size,
            preview,
        } = &self.request.operation
        else {
            return Outcome::Failed(RequestResult::failed(ErrorCode::NotFound));
        };
        let id = self.request.id;

        let end = (self.written + WRITE_CHUNK_SIZE).min(data.len());
        let chunk = &data[self.written..end];
        let offset = self.request.offset + self.written as u64;
        if let Err(e) = self.cache.write(&id, chunk, offset, *declared_size) {
            debug!(id = %id, offset, error = %e, "Cache write failed");
            return Outcome::Failed(RequestResult {
                bytes_transferred: self.written,
                ..RequestResult::from(&e)
            });
        }
        self.written = end;

        if self.written < data.len() {
            if cx.is_aborted() {
                debug!(id = %id, written = self.written, "Write aborted at chunk boundary");
            }
            return Outcome::Pending;
        }

        if let Some(p) = preview {
            if let Err(e) = self.cache.write_fast(
                &id,
                &p.pixels,
                p.width,
                p.height,
                p.channels,
                p.discard_level,
            ) {
                debug!(id = %id, error = %e, "Preview write failed");
            }
        }

        Outcome::Complete(RequestResult {
            bytes_transferred: data.len(),
            success: true,
            format_hint: if self.request.offset == 0 {
                FormatHint::sniff(data)
            } else {
                FormatHint::Unknown
            },
            data: Vec::new(),
            declared_size: *declared_size,
            error: None,
        })
    }
}

impl Work for CacheJob {
    type Output = RequestResult;

    fn name(&self) -> &str {
        match self.request.operation {
            CacheOperation::Read { .. } => "cache-read",
            CacheOperation::Write { .. } => "cache-write",
        }
    }

    fn run(&mut self, cx: &WorkContext<'_>) -> Outcome<RequestResult> {
        match &self.request.operation {
            CacheOperation::Read { max_len } => {
                let max_len = *max_len;
                self.run_read(max_len)
            }
            CacheOperation::Write { .. } => self.run_write(cx),
        }
    }
}
