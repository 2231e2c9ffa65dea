//! Write targets for loaded values
//!
//! A [`Sink`] is supplied by the caller of a group `get` and receives the
//! loaded value. Setters copy what they are given, so the caller keeps
//! ownership of its buffers; [`Sink::set_view`] is the no-copy fast path for
//! values already held as a [`ByteView`], with a default body that copying
//! implementations simply inherit.
//!
//! The provided sinks cover the common destinations: a `String`, an
//! allocated `Vec<u8>`, a caller-owned fixed buffer, a serde-decoded
//! message, and a raw `ByteView`.

use std::time::SystemTime;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::byteview::ByteView;
use crate::error::{Error, Result};

fn unset() -> Error {
    Error::Validation("sink has no value".into())
}

/// Receives the value produced by a load.
///
/// Exactly one successful set call must happen before [`view`](Sink::view)
/// is defined; later sets overwrite earlier ones. Sinks are `Send` because
/// they ride through the load path's futures.
pub trait Sink: Send {
    /// Store a string value.
    fn set_string(&mut self, value: String, expire: Option<SystemTime>) -> Result<()>;

    /// Store a byte value. The bytes are copied; the caller retains
    /// ownership of `value`.
    fn set_bytes(&mut self, value: &[u8], expire: Option<SystemTime>) -> Result<()>;

    /// A frozen view of the stored value.
    fn view(&self) -> Result<ByteView>;

    /// Store a value already materialized as a view. Sinks that can hold
    /// the view directly override this to skip the copy.
    fn set_view(&mut self, view: ByteView) -> Result<()> {
        let expire = view.expire();
        if view.is_text() {
            self.set_string(view.to_string(), expire)
        } else {
            self.set_bytes(view.as_bytes(), expire)
        }
    }
}

/// Serialize `msg` with bincode and store the encoding in `sink`.
pub fn set_sink_message<M: Serialize>(
    sink: &mut dyn Sink,
    msg: &M,
    expire: Option<SystemTime>,
) -> Result<()> {
    let buf = bincode::serialize(msg).map_err(|e| Error::Codec(e.to_string()))?;
    sink.set_bytes(&buf, expire)
}

/// Sink writing into a caller's `String`.
pub struct StringSink<'a> {
    dst: &'a mut String,
    view: Option<ByteView>,
}

impl<'a> StringSink<'a> {
    pub fn new(dst: &'a mut String) -> Self {
        StringSink { dst, view: None }
    }
}

impl Sink for StringSink<'_> {
    fn set_string(&mut self, value: String, expire: Option<SystemTime>) -> Result<()> {
        self.dst.clone_from(&value);
        self.view = Some(ByteView::from_string(value, expire));
        Ok(())
    }

    fn set_bytes(&mut self, value: &[u8], expire: Option<SystemTime>) -> Result<()> {
        let value = String::from_utf8_lossy(value).into_owned();
        self.set_string(value, expire)
    }

    fn view(&self) -> Result<ByteView> {
        self.view.clone().ok_or_else(unset)
    }
}

/// Sink allocating a copy of the value into a caller's `Vec<u8>`.
pub struct BytesSink<'a> {
    dst: &'a mut Vec<u8>,
    view: Option<ByteView>,
}

impl<'a> BytesSink<'a> {
    pub fn new(dst: &'a mut Vec<u8>) -> Self {
        BytesSink { dst, view: None }
    }
}

impl Sink for BytesSink<'_> {
    fn set_string(&mut self, value: String, expire: Option<SystemTime>) -> Result<()> {
        let view = ByteView::from_string(value, expire);
        *self.dst = view.byte_slice();
        self.view = Some(view);
        Ok(())
    }

    fn set_bytes(&mut self, value: &[u8], expire: Option<SystemTime>) -> Result<()> {
        *self.dst = value.to_vec();
        self.view = Some(ByteView::from_slice(value, expire));
        Ok(())
    }

    fn view(&self) -> Result<ByteView> {
        self.view.clone().ok_or_else(unset)
    }

    fn set_view(&mut self, view: ByteView) -> Result<()> {
        *self.dst = view.byte_slice();
        self.view = Some(view);
        Ok(())
    }
}

/// Sink writing into a caller-owned fixed buffer. Fails when the value does
/// not fit.
pub struct FixedBufferSink<'a> {
    buf: &'a mut [u8],
    written: usize,
    view: Option<ByteView>,
}

impl<'a> FixedBufferSink<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        FixedBufferSink {
            buf,
            written: 0,
            view: None,
        }
    }

    /// Number of bytes the last successful set wrote into the buffer.
    pub fn written(&self) -> usize {
        self.written
    }
}

impl Sink for FixedBufferSink<'_> {
    fn set_string(&mut self, value: String, expire: Option<SystemTime>) -> Result<()> {
        if value.len() > self.buf.len() {
            return Err(Error::Validation("destination buffer too small".into()));
        }
        self.buf[..value.len()].copy_from_slice(value.as_bytes());
        self.written = value.len();
        self.view = Some(ByteView::from_string(value, expire));
        Ok(())
    }

    fn set_bytes(&mut self, value: &[u8], expire: Option<SystemTime>) -> Result<()> {
        if value.len() > self.buf.len() {
            return Err(Error::Validation("destination buffer too small".into()));
        }
        self.buf[..value.len()].copy_from_slice(value);
        self.written = value.len();
        self.view = Some(ByteView::from_slice(value, expire));
        Ok(())
    }

    fn view(&self) -> Result<ByteView> {
        self.view.clone().ok_or_else(unset)
    }
}

/// Sink decoding a bincode message into a caller's value.
pub struct MessageSink<'a, M> {
    dst: &'a mut M,
    view: Option<ByteView>,
}

impl<'a, M: DeserializeOwned + Send> MessageSink<'a, M> {
    pub fn new(dst: &'a mut M) -> Self {
        MessageSink { dst, view: None }
    }
}

impl<M: DeserializeOwned + Send> Sink for MessageSink<'_, M> {
    fn set_string(&mut self, value: String, expire: Option<SystemTime>) -> Result<()> {
        *self.dst =
            bincode::deserialize(value.as_bytes()).map_err(|e| Error::Codec(e.to_string()))?;
        self.view = Some(ByteView::from_string(value, expire));
        Ok(())
    }

    fn set_bytes(&mut self, value: &[u8], expire: Option<SystemTime>) -> Result<()> {
        *self.dst = bincode::deserialize(value).map_err(|e| Error::Codec(e.to_string()))?;
        self.view = Some(ByteView::from_slice(value, expire));
        Ok(())
    }

    fn view(&self) -> Result<ByteView> {
        self.view.clone().ok_or_else(unset)
    }
}

/// Sink storing the view itself into a caller's `ByteView`. This is the
/// cheapest destination: cached values arrive without any copy.
pub struct ByteViewSink<'a> {
    dst: &'a mut ByteView,
    populated: bool,
}

impl<'a> ByteViewSink<'a> {
    pub fn new(dst: &'a mut ByteView) -> Self {
        ByteViewSink {
            dst,
            populated: false,
        }
    }
}

impl Sink for ByteViewSink<'_> {
    fn set_string(&mut self, value: String, expire: Option<SystemTime>) -> Result<()> {
        *self.dst = ByteView::from_string(value, expire);
        self.populated = true;
        Ok(())
    }

    fn set_bytes(&mut self, value: &[u8], expire: Option<SystemTime>) -> Result<()> {
        *self.dst = ByteView::from_slice(value, expire);
        self.populated = true;
        Ok(())
    }

    fn view(&self) -> Result<ByteView> {
        if self.populated {
            Ok(self.dst.clone())
        } else {
            Err(unset())
        }
    }

    fn set_view(&mut self, view: ByteView) -> Result<()> {
        *self.dst = view;
        self.populated = true;
        Ok(())
    }
}
