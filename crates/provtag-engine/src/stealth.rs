//! Metadata hidden in the least-significant bit of the alpha channel.
//!
//! Bits are read column by column (x outer, y inner), most significant bit
//! first. The stream is a 15-byte magic, a 32-bit big-endian payload length in
//! bits, and the payload. An optional second length-prefixed section may follow.

use std::io::Read;

use flate2::read::GzDecoder;
use image::RgbaImage;
use provtag_contracts::blob::{ImageBlob, ImageFormat};
use serde_json::{Map, Value};

use crate::error::{DecodeError, DecodeResult};

pub const COMPRESSED_MAGIC: &[u8] = b"stealth_pngcomp";
pub const PLAIN_MAGIC: &[u8] = b"stealth_pnginfo";
const LATENT_MAGIC: &[u8] = b"latent";
const MAX_INFLATED_PAYLOAD: u64 = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StealthPayload {
    pub metadata: Vec<u8>,
    pub trailing: Option<Vec<u8>>,
}

impl StealthPayload {
    pub fn metadata_object(&self) -> DecodeResult<Map<String, Value>> {
        match serde_json::from_slice::<Value>(&self.metadata)? {
            Value::Object(map) => Ok(map),
            _ => Err(DecodeError::NotAnObject("stealth payload".to_string())),
        }
    }

    pub fn has_latent(&self) -> bool {
        self.trailing
            .as_deref()
            .map(|section| section.starts_with(LATENT_MAGIC))
            .unwrap_or(false)
    }
}

pub fn decode_rgba(blob: &ImageBlob) -> DecodeResult<RgbaImage> {
    if blob.format() == ImageFormat::Jpeg {
        return Err(DecodeError::UnsupportedContainer(
            "JPEG has no alpha channel".to_string(),
        ));
    }
    let decoded = image::load_from_memory(blob.bytes())?;
    if !decoded.color().has_alpha() {
        return Err(DecodeError::Stealth("image has no alpha channel".to_string()));
    }
    Ok(decoded.to_rgba8())
}

pub fn extract(image: &RgbaImage) -> DecodeResult<StealthPayload> {
    let mut reader = LsbReader::new(image);
    let magic = reader.read_bytes(COMPRESSED_MAGIC.len())?;
    let compressed = if magic == COMPRESSED_MAGIC {
        true
    } else if magic == PLAIN_MAGIC {
        false
    } else {
        return Err(DecodeError::Stealth("magic not found".to_string()));
    };

    let bits = u64::from(reader.read_u32()?);
    if bits % 8 != 0 || bits > reader.remaining() {
        return Err(DecodeError::Stealth(format!(
            "payload length {bits} bits does not fit the image"
        )));
    }
    let raw = reader.read_bytes((bits / 8) as usize)?;
    let metadata = if compressed { gunzip(&raw)? } else { raw };
    let trailing = read_trailing(&mut reader);
    Ok(StealthPayload { metadata, trailing })
}

fn read_trailing(reader: &mut LsbReader<'_>) -> Option<Vec<u8>> {
    if reader.remaining() < 32 {
        return None;
    }
    let bits = u64::from(reader.read_u32().ok()?);
    if bits == 0 || bits % 8 != 0 || bits > reader.remaining() {
        return None;
    }
    reader.read_bytes((bits / 8) as usize).ok()
}

fn gunzip(raw: &[u8]) -> DecodeResult<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(raw)
        .take(MAX_INFLATED_PAYLOAD)
        .read_to_end(&mut out)?;
    Ok(out)
}

struct LsbReader<'a> {
    image: &'a RgbaImage,
    position: u64,
    capacity: u64,
}

impl<'a> LsbReader<'a> {
    fn new(image: &'a RgbaImage) -> Self {
        Self {
            image,
            position: 0,
            capacity: u64::from(image.width()) * u64::from(image.height()),
        }
    }

    fn remaining(&self) -> u64 {
        self.capacity - self.position
    }

    fn read_bit(&mut self) -> u8 {
        let height = u64::from(self.image.height());
        let x = (self.position / height) as u32;
        let y = (self.position % height) as u32;
        self.position += 1;
        self.image.get_pixel(x, y).0[3] & 1
    }

    fn read_bytes(&mut self, count: usize) -> DecodeResult<Vec<u8>> {
        if (count as u64) * 8 > self.remaining() {
            return Err(DecodeError::Stealth(
                "stream exceeds image capacity".to_string(),
            ));
        }
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let mut byte = 0u8;
            for _ in 0..8 {
                byte = (byte << 1) | self.read_bit();
            }
            out.push(byte);
        }
        Ok(out)
    }

    fn read_u32(&mut self) -> DecodeResult<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}
