use std::io::Cursor;

use bytes::Bytes;
use serde::Serialize;

pub const ACCEPTED_EXTENSIONS: &[&str] = &["jpg", "png", "webp"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    Webp,
}

impl ImageFormat {
    pub fn from_file_name(name: &str) -> Option<Self> {
        let lowered = name.trim().to_ascii_lowercase();
        if lowered.ends_with("png") {
            return Some(Self::Png);
        }
        if lowered.ends_with("jpg") {
            return Some(Self::Jpeg);
        }
        if lowered.ends_with("webp") {
            return Some(Self::Webp);
        }
        None
    }

    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
            return Some(Self::Png);
        }
        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Some(Self::Jpeg);
        }
        if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            return Some(Self::Webp);
        }
        None
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Webp => "webp",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Webp => "image/webp",
        }
    }
}

pub fn is_accepted_file_name(name: &str) -> bool {
    ImageFormat::from_file_name(name).is_some()
}

/// Immutable image bytes for one request. Clones share the same buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBlob {
    bytes: Bytes,
    hint: ImageFormat,
}

impl ImageBlob {
    pub fn new(bytes: impl Into<Bytes>, hint: ImageFormat) -> Self {
        Self {
            bytes: bytes.into(),
            hint,
        }
    }

    /// Returns `None` for unsupported names and empty downloads.
    pub fn from_upload(file_name: &str, bytes: impl Into<Bytes>) -> Option<Self> {
        let hint = ImageFormat::from_file_name(file_name)?;
        let bytes = bytes.into();
        if bytes.is_empty() {
            return None;
        }
        Some(Self::new(bytes, hint))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn shared(&self) -> Bytes {
        self.bytes.clone()
    }

    pub fn hint(&self) -> ImageFormat {
        self.hint
    }

    /// Container format from magic bytes, falling back to the upload hint.
    pub fn format(&self) -> ImageFormat {
        ImageFormat::sniff(&self.bytes).unwrap_or(self.hint)
    }

    pub fn cursor(&self) -> Cursor<&[u8]> {
        Cursor::new(&self.bytes[..])
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
