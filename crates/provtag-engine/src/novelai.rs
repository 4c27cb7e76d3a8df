//! NovelAI metadata and its verification flags.

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use image::RgbaImage;
use provtag_contracts::blob::ImageBlob;
use provtag_contracts::provenance::NovelAiRecord;
use serde_json::{Map, Value};
use tracing::debug;

use crate::container::TextFields;
use crate::error::{DecodeError, DecodeResult};
use crate::stealth;

const COMMENT_KEY: &str = "Comment";
const METADATA_KEYS: &[&str] = &[
    "Title",
    "Description",
    "Software",
    "Source",
    "Generation time",
    COMMENT_KEY,
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Verification {
    pub signed: bool,
    pub has_latent: bool,
}

pub fn parse_verify_key(encoded: &str) -> anyhow::Result<VerifyingKey> {
    let raw = BASE64
        .decode(encoded.trim())
        .context("NovelAI verify key is not base64")?;
    let bytes: [u8; 32] = raw
        .as_slice()
        .try_into()
        .map_err(|_| anyhow::anyhow!("NovelAI verify key must be 32 bytes, got {}", raw.len()))?;
    VerifyingKey::from_bytes(&bytes).context("NovelAI verify key is not a valid ed25519 point")
}

pub fn decode(
    blob: &ImageBlob,
    fields: &TextFields,
    verify_key: Option<&VerifyingKey>,
) -> DecodeResult<NovelAiRecord> {
    let (metadata, pixels) = if fields.contains_key(COMMENT_KEY) {
        (metadata_from_fields(fields)?, None)
    } else {
        let rgba = stealth::decode_rgba(blob)?;
        let payload = stealth::extract(&rgba)?;
        (normalize_metadata(payload.metadata_object()?)?, Some(rgba))
    };

    let mut record = record_from_metadata(metadata)?;
    match verify(blob, pixels, &record.metadata, verify_key) {
        Ok(verification) => {
            record.signed = verification.signed;
            record.has_latent = verification.has_latent;
        }
        Err(err) => debug!(error = %err, "novelai verification unavailable"),
    }
    Ok(record)
}

fn metadata_from_fields(fields: &TextFields) -> DecodeResult<Map<String, Value>> {
    let mut metadata = Map::new();
    for key in METADATA_KEYS {
        if let Some(value) = fields.get(key) {
            metadata.insert((*key).to_string(), Value::String(value.to_string()));
        }
    }
    normalize_metadata(metadata)
}

fn normalize_metadata(mut metadata: Map<String, Value>) -> DecodeResult<Map<String, Value>> {
    let comment = match metadata.remove(COMMENT_KEY) {
        Some(Value::String(raw)) => serde_json::from_str::<Value>(&raw)?,
        Some(other) => other,
        None => return Err(DecodeError::MissingField(COMMENT_KEY.to_string())),
    };
    if !comment.is_object() {
        return Err(DecodeError::NotAnObject(COMMENT_KEY.to_string()));
    }
    metadata.insert(COMMENT_KEY.to_string(), comment);
    Ok(metadata)
}

fn record_from_metadata(metadata: Map<String, Value>) -> DecodeResult<NovelAiRecord> {
    let comment = metadata
        .get(COMMENT_KEY)
        .and_then(Value::as_object)
        .ok_or_else(|| DecodeError::NotAnObject(COMMENT_KEY.to_string()))?;

    let prompt = match comment.get("prompt") {
        Some(value) => value.as_str().unwrap_or_default(),
        None => metadata
            .get("Description")
            .and_then(Value::as_str)
            .unwrap_or_default(),
    }
    .trim()
    .to_string();
    if prompt.is_empty() {
        return Err(DecodeError::EmptyField("prompt".to_string()));
    }
    let negative_prompt = comment
        .get("uc")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    let source = metadata
        .get("Source")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    let model = model_from_source(&source);
    let mode = mode_from_comment(comment);

    Ok(NovelAiRecord {
        prompt,
        negative_prompt,
        model,
        source,
        mode,
        signed: false,
        has_latent: false,
        metadata,
    })
}

pub fn model_from_source(source: &str) -> String {
    let mut words: Vec<&str> = source.split_whitespace().collect();
    let ends_with_hash = words
        .last()
        .map(|word| word.len() >= 6 && word.chars().all(|ch| ch.is_ascii_hexdigit()))
        .unwrap_or(false);
    if words.len() > 1 && ends_with_hash {
        words.pop();
    }
    words.join(" ")
}

pub fn mode_from_comment(comment: &Map<String, Value>) -> String {
    let base = match comment.get("request_type").and_then(Value::as_str) {
        None | Some("PromptGenerateRequest") => "Text2Image",
        Some("Img2ImgRequest") => "Img2Img",
        Some("NativeInfillingRequest") => "Inpaint",
        Some(other) => other,
    };
    if uses_vibe_transfer(comment) {
        return format!("{base}+VibeTransfer");
    }
    base.to_string()
}

fn uses_vibe_transfer(comment: &Map<String, Value>) -> bool {
    let single = comment
        .get("reference_strength")
        .and_then(Value::as_f64)
        .map(|strength| strength != 0.0)
        .unwrap_or(false);
    let multiple = comment
        .get("reference_strength_multiple")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_f64)
                .any(|strength| strength != 0.0)
        })
        .unwrap_or(false);
    single || multiple
}

pub fn verify(
    blob: &ImageBlob,
    pixels: Option<RgbaImage>,
    metadata: &Map<String, Value>,
    verify_key: Option<&VerifyingKey>,
) -> DecodeResult<Verification> {
    let rgba = match pixels {
        Some(rgba) => rgba,
        None => image::load_from_memory(blob.bytes())?.to_rgba8(),
    };
    let signed = match verify_key {
        Some(key) => signature_matches(&rgba, metadata, key),
        None => false,
    };
    let has_latent = stealth::extract(&rgba)
        .map(|payload| payload.has_latent())
        .unwrap_or(false);
    Ok(Verification { signed, has_latent })
}

fn signature_matches(rgba: &RgbaImage, metadata: &Map<String, Value>, key: &VerifyingKey) -> bool {
    match check_signature(rgba, metadata, key) {
        Ok(signed) => signed,
        Err(err) => {
            debug!(error = %err, "treating image as unsigned");
            false
        }
    }
}

fn check_signature(
    rgba: &RgbaImage,
    metadata: &Map<String, Value>,
    key: &VerifyingKey,
) -> DecodeResult<bool> {
    let Some(encoded) = metadata
        .get(COMMENT_KEY)
        .and_then(|comment| comment.get("signed_hash"))
        .and_then(Value::as_str)
    else {
        return Ok(false);
    };
    let raw = BASE64
        .decode(encoded.trim())
        .map_err(|err| DecodeError::Signature(format!("signed_hash is not base64: {err}")))?;
    let signature = Signature::from_slice(&raw)
        .map_err(|err| DecodeError::Signature(format!("signed_hash is not ed25519: {err}")))?;
    Ok(key.verify(&rgb_bytes(rgba), &signature).is_ok())
}

pub fn rgb_bytes(rgba: &RgbaImage) -> Vec<u8> {
    rgba.pixels()
        .flat_map(|pixel| [pixel.0[0], pixel.0[1], pixel.0[2]])
        .collect()
}
