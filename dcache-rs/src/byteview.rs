//! Provides the immutable value type stored in a cache group.
//!
//! A [ByteView](ByteView) wraps a reference counted [Bytes](bytes::Bytes) buffer. Cloning a view
//! is cheap (it only bumps a reference count) and as the buffer itself can never be mutated,
//! handing a view to a caller can never corrupt the cached state. Whenever owned bytes are
//! requested, [to_vec](ByteView::to_vec) returns an independent copy.
//!
//! # Example
//!
//! ```
//! # use dcache::byteview::ByteView;
//! let view = ByteView::from("631");
//! assert_eq!(view.len(), 3);
//!
//! // Mutating the returned copy doesn't affect the view...
//! let mut copy = view.to_vec();
//! copy[0] = b'0';
//! assert_eq!(view.to_string(), "631");
//! ```
use std::fmt;
use std::fmt::Display;

use bytes::Bytes;

use crate::lru::ByteSize;

/// Represents an immutable view on a byte payload.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct ByteView {
    bytes: Bytes,
}

impl ByteView {
    /// Returns the number of bytes in this view.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Determines if the view is empty.
    ///
    /// Note that an empty view is still a valid, present value and must not be confused with
    /// a missing one.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Returns a copy of the underlying data.
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }

    /// Provides read-only access to the underlying data.
    pub fn as_slice(&self) -> &[u8] {
        self.bytes.as_ref()
    }
}

impl ByteSize for ByteView {
    fn allocated_size(&self) -> usize {
        self.len()
    }
}

impl From<Vec<u8>> for ByteView {
    fn from(data: Vec<u8>) -> Self {
        ByteView {
            bytes: Bytes::from(data),
        }
    }
}

impl From<&[u8]> for ByteView {
    fn from(data: &[u8]) -> Self {
        ByteView {
            bytes: Bytes::copy_from_slice(data),
        }
    }
}

impl From<&str> for ByteView {
    fn from(data: &str) -> Self {
        ByteView::from(data.as_bytes())
    }
}

impl From<Bytes> for ByteView {
    fn from(bytes: Bytes) -> Self {
        ByteView { bytes }
    }
}

impl Display for ByteView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.bytes))
    }
}

impl fmt::Debug for ByteView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteView({:?})", String::from_utf8_lossy(&self.bytes))
    }
}
