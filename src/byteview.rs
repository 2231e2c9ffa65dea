//! Immutable value views
//!
//! A [`ByteView`] is the unit of data flowing through the cache: an immutable
//! byte or string value with an optional absolute expiry time. Views are
//! cheap to clone and safe to share; accessors that expose the underlying
//! data always return copies, while slicing produces new views that share
//! storage with the original.

use std::cmp::Ordering;
use std::fmt;
use std::io::{self, Cursor, Write};
use std::time::SystemTime;

use bytes::Bytes;

use crate::error::{Error, Result};

/// Backing storage for a view. Exactly one variant is populated; `Text`
/// remembers that the value entered the cache as a string so sinks can
/// receive it through their string setter without re-validation.
#[derive(Clone, Debug)]
enum Storage {
    Bytes(Bytes),
    // Byte-addressed like `Bytes`; slicing may cut a UTF-8 sequence, in
    // which case `Display` renders the remainder lossily.
    Text(Bytes),
}

/// An immutable view of bytes with an optional expiry.
///
/// `ByteView` is meant to be used as a value type. Two views compare equal
/// when their byte contents are equal, regardless of expiry or of whether
/// they were built from a string or a byte slice.
#[derive(Clone, Debug)]
pub struct ByteView {
    data: Storage,
    expire: Option<SystemTime>,
}

impl ByteView {
    pub(crate) fn from_bytes(data: Bytes, expire: Option<SystemTime>) -> Self {
        ByteView {
            data: Storage::Bytes(data),
            expire,
        }
    }

    pub(crate) fn from_slice(data: &[u8], expire: Option<SystemTime>) -> Self {
        Self::from_bytes(Bytes::copy_from_slice(data), expire)
    }

    pub(crate) fn from_string(s: String, expire: Option<SystemTime>) -> Self {
        ByteView {
            data: Storage::Text(Bytes::from(s.into_bytes())),
            expire,
        }
    }

    /// Whether the value entered the cache as a string.
    pub(crate) fn is_text(&self) -> bool {
        matches!(self.data, Storage::Text(_))
    }

    /// Borrow the underlying bytes without copying. Crate-internal; public
    /// accessors hand out copies only.
    pub(crate) fn as_bytes(&self) -> &[u8] {
        match &self.data {
            Storage::Bytes(b) | Storage::Text(b) => b,
        }
    }

    /// The absolute expiry time, if any. `None` means the value never
    /// expires.
    pub fn expire(&self) -> Option<SystemTime> {
        self.expire
    }

    /// Length of the view in bytes.
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Whether the view is empty.
    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    /// A copy of the data as a byte vector.
    pub fn byte_slice(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    /// The byte at index `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i` is out of bounds.
    pub fn at(&self, i: usize) -> u8 {
        self.as_bytes()[i]
    }

    /// A sub-view over `[from, to)` sharing storage with `self`. The new
    /// view carries no expiry of its own.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds.
    pub fn slice(&self, from: usize, to: usize) -> ByteView {
        let data = match &self.data {
            Storage::Bytes(b) => Storage::Bytes(b.slice(from..to)),
            Storage::Text(b) => Storage::Text(b.slice(from..to)),
        };
        ByteView { data, expire: None }
    }

    /// A sub-view from `from` to the end, sharing storage with `self`.
    pub fn slice_from(&self, from: usize) -> ByteView {
        self.slice(from, self.len())
    }

    /// Copy the view into `dest`, returning the number of bytes copied
    /// (the shorter of the two lengths).
    pub fn copy_to(&self, dest: &mut [u8]) -> usize {
        let src = self.as_bytes();
        let n = src.len().min(dest.len());
        dest[..n].copy_from_slice(&src[..n]);
        n
    }

    /// Byte equality against a slice.
    pub fn eq_bytes(&self, other: &[u8]) -> bool {
        self.as_bytes() == other
    }

    /// Byte equality against a string.
    pub fn eq_str(&self, other: &str) -> bool {
        self.as_bytes() == other.as_bytes()
    }

    /// A reader over the view's bytes supporting `Read` and `Seek`.
    pub fn reader(&self) -> Cursor<Bytes> {
        let bytes = match &self.data {
            Storage::Bytes(b) | Storage::Text(b) => b.clone(),
        };
        Cursor::new(bytes)
    }

    /// Read into `dest` starting at byte offset `off`, returning the number
    /// of bytes copied. An offset at or past the end copies nothing.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a negative offset.
    pub fn read_at(&self, dest: &mut [u8], off: i64) -> Result<usize> {
        if off < 0 {
            return Err(Error::Validation("invalid offset".into()));
        }
        let off = off as usize;
        if off >= self.len() {
            return Ok(0);
        }
        Ok(self.slice_from(off).copy_to(dest))
    }

    /// Write the full view to `w`.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<u64> {
        let data = self.as_bytes();
        w.write_all(data)?;
        Ok(data.len() as u64)
    }
}

impl Default for ByteView {
    fn default() -> Self {
        ByteView::from_bytes(Bytes::new(), None)
    }
}

impl fmt::Display for ByteView {
    /// The data as a string. Values that did not enter as UTF-8 text render
    /// lossily.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.as_bytes()))
    }
}

impl PartialEq for ByteView {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for ByteView {}

impl PartialOrd for ByteView {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ByteView {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_bytes().cmp(other.as_bytes())
    }
}
