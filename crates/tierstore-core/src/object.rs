//! Object metadata as returned by `head` and `list`.

use std::collections::HashMap;
use std::time::SystemTime;

/// Metadata describing one remote object.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectMetadata {
    /// Full object key.
    pub key: String,
    /// Object size in bytes.
    pub size: u64,
    /// Last modification timestamp (UTC).
    pub last_modified: SystemTime,
    /// Opaque entity tag.
    pub etag: String,
    /// Content type reported by the store.
    pub content_type: String,
    /// User-supplied string metadata.
    pub metadata: HashMap<String, String>,
}

impl ObjectMetadata {
    /// Age of the object relative to `now`. Zero if the clock went backwards.
    pub fn age(&self, now: SystemTime) -> std::time::Duration {
        now.duration_since(self.last_modified)
            .unwrap_or_default()
    }
}

/// An inclusive byte range for partial reads.
///
/// `end` of `None` means "until the end of the object".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteRange {
    /// Builds a range from the `(offset, length)` convention used by the
    /// object API: `length == 0` means the remainder from `offset`, and
    /// `offset == 0 && length == 0` means the whole object (no range).
    pub fn from_offset_length(offset: u64, length: u64) -> Option<Self> {
        if offset == 0 && length == 0 {
            return None;
        }
        let end = if length == 0 {
            None
        } else {
            Some(offset + length - 1)
        };
        Some(Self { start: offset, end })
    }
}
