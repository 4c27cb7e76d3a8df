//! Decoder errors.
//!
//! Every variant is expected during format detection and is absorbed by
//! [`crate::MetadataReader`]; none reaches the user.

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DecodeError {
    /// The container has no text field with this key.
    #[error("metadata field `{0}` not present")]
    MissingField(String),

    /// The field exists but holds nothing useful.
    #[error("metadata field `{0}` is empty")]
    EmptyField(String),

    #[error("unsupported container: {0}")]
    UnsupportedContainer(String),

    #[error("malformed container: {0}")]
    MalformedContainer(String),

    #[error("unrepairable JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected a JSON object in `{0}`")]
    NotAnObject(String),

    #[error("no stealth payload: {0}")]
    Stealth(String),

    #[error("signature check failed: {0}")]
    Signature(String),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type DecodeResult<T> = std::result::Result<T, DecodeError>;
