use std::fmt::Display;

use bytes::Bytes;

/// One chunk of bytes as produced by the frame source.
///
/// The contents are never interpreted.
/// Cloning is cheap since the bytes are reference counted,
/// so each subscriber gets its own handle to the same data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Frame(Bytes);

impl Frame {
    /// Create a frame from anything which can become [`Bytes`].
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// The number of bytes in the frame.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if the frame holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrowed form.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Turn the frame back into the underlying bytes.
    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl From<&'static str> for Frame {
    fn from(s: &'static str) -> Self {
        Self(Bytes::from_static(s.as_bytes()))
    }
}

impl From<Vec<u8>> for Frame {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes.into())
    }
}

impl From<Bytes> for Frame {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let preview = String::from_utf8_lossy(&self.0[..self.0.len().min(32)]);

        write!(f, "{} byte(s): `{}`", self.0.len(), preview.trim())
    }
}
