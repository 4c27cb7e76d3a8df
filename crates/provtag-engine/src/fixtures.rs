//! In-process image builders for tests.

use std::io::{Cursor, Write};

use anyhow::Result;
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::{Compression, Crc};
use image::{DynamicImage, Rgba, RgbaImage};
use provtag_contracts::blob::{ImageBlob, ImageFormat};

pub(crate) fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(image.clone())
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)?;
    Ok(bytes)
}

pub(crate) fn encode_webp(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(image.clone())
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::WebP)?;
    Ok(bytes)
}

pub(crate) fn blank_png(width: u32, height: u32) -> Result<Vec<u8>> {
    encode_png(&RgbaImage::from_pixel(
        width,
        height,
        Rgba([200, 180, 160, 255]),
    ))
}

pub(crate) fn patterned_image(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        Rgba([
            (x * 7 % 256) as u8,
            (y * 13 % 256) as u8,
            ((x + y) * 3 % 256) as u8,
            255,
        ])
    })
}

pub(crate) fn png_chunk(kind: &[u8; 4], data: &[u8]) -> Vec<u8> {
    let mut crc = Crc::new();
    crc.update(kind);
    crc.update(data);
    let mut out = Vec::with_capacity(data.len() + 12);
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(data);
    out.extend_from_slice(&crc.sum().to_be_bytes());
    out
}

pub(crate) fn text_chunk(key: &str, value: &str) -> Vec<u8> {
    let mut data = key.as_bytes().to_vec();
    data.push(0);
    data.extend_from_slice(value.as_bytes());
    png_chunk(b"tEXt", &data)
}

pub(crate) fn ztxt_chunk(key: &str, value: &str) -> Result<Vec<u8>> {
    let mut data = key.as_bytes().to_vec();
    data.extend_from_slice(&[0, 0]);
    data.extend(zlib(value.as_bytes())?);
    Ok(png_chunk(b"zTXt", &data))
}

pub(crate) fn itxt_chunk(key: &str, value: &str, compressed: bool) -> Result<Vec<u8>> {
    let mut data = key.as_bytes().to_vec();
    data.extend_from_slice(&[0, u8::from(compressed), 0]);
    data.extend_from_slice(b"\0\0");
    if compressed {
        data.extend(zlib(value.as_bytes())?);
    } else {
        data.extend_from_slice(value.as_bytes());
    }
    Ok(png_chunk(b"iTXt", &data))
}

pub(crate) fn png_with_chunks(png: Vec<u8>, chunks: &[Vec<u8>]) -> Vec<u8> {
    let split = 8 + 25;
    let mut out = png[..split].to_vec();
    for chunk in chunks {
        out.extend_from_slice(chunk);
    }
    out.extend_from_slice(&png[split..]);
    out
}

pub(crate) fn png_with_text(pairs: &[(&str, &str)]) -> Result<ImageBlob> {
    let chunks = pairs
        .iter()
        .map(|(key, value)| {
            if value.is_ascii() {
                Ok(text_chunk(key, value))
            } else {
                itxt_chunk(key, value, false)
            }
        })
        .collect::<Result<Vec<Vec<u8>>>>()?;
    Ok(ImageBlob::new(
        png_with_chunks(blank_png(8, 8)?, &chunks),
        ImageFormat::Png,
    ))
}

pub(crate) fn zlib(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

pub(crate) fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

pub(crate) fn exif_user_comment(text: &str, little_endian: bool) -> Vec<u8> {
    let u16_bytes = |value: u16| {
        if little_endian {
            value.to_le_bytes()
        } else {
            value.to_be_bytes()
        }
    };
    let u32_bytes = |value: u32| {
        if little_endian {
            value.to_le_bytes()
        } else {
            value.to_be_bytes()
        }
    };

    let mut comment = b"UNICODE\0".to_vec();
    for unit in text.encode_utf16() {
        comment.extend_from_slice(&u16_bytes(unit));
    }

    let mut tiff = Vec::new();
    tiff.extend_from_slice(if little_endian { b"II" } else { b"MM" });
    tiff.extend_from_slice(&u16_bytes(42));
    tiff.extend_from_slice(&u32_bytes(8));
    // IFD0 at 8, one entry pointing at the Exif IFD at 26
    tiff.extend_from_slice(&u16_bytes(1));
    tiff.extend_from_slice(&u16_bytes(0x8769));
    tiff.extend_from_slice(&u16_bytes(4));
    tiff.extend_from_slice(&u32_bytes(1));
    tiff.extend_from_slice(&u32_bytes(26));
    tiff.extend_from_slice(&u32_bytes(0));
    // Exif IFD at 26, UserComment payload at 44
    tiff.extend_from_slice(&u16_bytes(1));
    tiff.extend_from_slice(&u16_bytes(0x9286));
    tiff.extend_from_slice(&u16_bytes(7));
    tiff.extend_from_slice(&u32_bytes(comment.len() as u32));
    tiff.extend_from_slice(&u32_bytes(44));
    tiff.extend_from_slice(&u32_bytes(0));
    tiff.extend(comment);
    tiff
}

pub(crate) fn jpeg_with_exif(tiff: &[u8]) -> Vec<u8> {
    let mut out = vec![0xFF, 0xD8, 0xFF, 0xE1];
    out.extend_from_slice(&((tiff.len() + 8) as u16).to_be_bytes());
    out.extend_from_slice(b"Exif\0\0");
    out.extend_from_slice(tiff);
    out.extend_from_slice(&[0xFF, 0xD9]);
    out
}

pub(crate) fn webp_with_exif(tiff: &[u8]) -> Vec<u8> {
    let mut chunk = b"EXIF".to_vec();
    chunk.extend_from_slice(&(tiff.len() as u32).to_le_bytes());
    chunk.extend_from_slice(tiff);
    if tiff.len() % 2 == 1 {
        chunk.push(0);
    }
    let mut out = b"RIFF".to_vec();
    out.extend_from_slice(&((chunk.len() + 4) as u32).to_le_bytes());
    out.extend_from_slice(b"WEBP");
    out.extend(chunk);
    out
}

/// Writes `payload` into alpha least-significant bits, column-major, MSB first.
pub(crate) fn embed_lsb(image: &mut RgbaImage, payload: &[u8]) {
    let height = image.height();
    let bits = payload
        .iter()
        .flat_map(|byte| (0..8).rev().map(move |shift| (byte >> shift) & 1));
    for (index, bit) in bits.enumerate() {
        let index = index as u32;
        let pixel = image.get_pixel_mut(index / height, index % height);
        pixel.0[3] = (pixel.0[3] & 0xFE) | bit;
    }
}

pub(crate) fn stealth_stream(metadata_json: &str, trailing: Option<&[u8]>) -> Result<Vec<u8>> {
    let compressed = gzip(metadata_json.as_bytes())?;
    let mut stream = b"stealth_pngcomp".to_vec();
    stream.extend_from_slice(&((compressed.len() * 8) as u32).to_be_bytes());
    stream.extend(compressed);
    if let Some(section) = trailing {
        stream.extend_from_slice(&((section.len() * 8) as u32).to_be_bytes());
        stream.extend_from_slice(section);
    }
    Ok(stream)
}
