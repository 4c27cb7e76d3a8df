//! Named text fields embedded in image containers.
//!
//! PNG text chunks are exposed under their keywords. For JPEG and WebP the Exif
//! `UserComment` is exposed as `parameters`, which is where generation tools put
//! their settings when the container has no native text chunks.

use std::io::{self, Cursor, ErrorKind, Read};

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};
use flate2::read::ZlibDecoder;
use indexmap::IndexMap;
use provtag_contracts::blob::{ImageBlob, ImageFormat};
use tracing::debug;

use crate::error::{DecodeError, DecodeResult};

pub const PARAMETERS_FIELD: &str = "parameters";

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";
const EXIF_HEADER: &[u8] = b"Exif\0\0";
const TAG_EXIF_IFD: u16 = 0x8769;
const TAG_USER_COMMENT: u16 = 0x9286;
const MAX_INFLATED_TEXT: u64 = 32 * 1024 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextFields {
    fields: IndexMap<String, String>,
}

impl TextFields {
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut fields = Self::default();
        for (key, value) in pairs {
            fields.insert_first(key.into(), value.into());
        }
        fields
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn require(&self, key: &str) -> DecodeResult<&str> {
        let value = self
            .get(key)
            .ok_or_else(|| DecodeError::MissingField(key.to_string()))?;
        if value.trim().is_empty() {
            return Err(DecodeError::EmptyField(key.to_string()));
        }
        Ok(value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn insert_first(&mut self, key: String, value: String) {
        self.fields.entry(key).or_insert(value);
    }
}

pub fn read_text_fields(blob: &ImageBlob) -> DecodeResult<TextFields> {
    match blob.format() {
        ImageFormat::Png => read_png_text(blob),
        ImageFormat::Jpeg => read_jpeg_text(blob),
        ImageFormat::Webp => read_webp_text(blob),
    }
}

fn read_png_text(blob: &ImageBlob) -> DecodeResult<TextFields> {
    let data = blob.bytes();
    let mut cursor = blob.cursor();
    let mut signature = [0u8; 8];
    cursor.read_exact(&mut signature)?;
    if signature != PNG_SIGNATURE {
        return Err(DecodeError::MalformedContainer(
            "missing PNG signature".to_string(),
        ));
    }

    let mut fields = TextFields::default();
    loop {
        let length = match cursor.read_u32::<BigEndian>() {
            Ok(value) => value as usize,
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(err.into()),
        };
        let mut kind = [0u8; 4];
        if cursor.read_exact(&mut kind).is_err() {
            debug!("PNG ends inside a chunk header");
            break;
        }
        let start = cursor.position() as usize;
        let Some(end) = start
            .checked_add(length)
            .filter(|end| end.saturating_add(4) <= data.len())
        else {
            debug!(
                chunk = %String::from_utf8_lossy(&kind),
                "PNG chunk overruns the buffer, keeping earlier text fields"
            );
            break;
        };
        let chunk = &data[start..end];
        cursor.set_position((end + 4) as u64);

        let parsed = match &kind {
            b"tEXt" => parse_text_chunk(chunk),
            b"zTXt" => parse_compressed_text_chunk(chunk),
            b"iTXt" => parse_international_text_chunk(chunk),
            b"IEND" => break,
            _ => continue,
        };
        match parsed {
            Ok((key, value)) => fields.insert_first(key, value),
            Err(err) => debug!(
                chunk = %String::from_utf8_lossy(&kind),
                error = %err,
                "skipping unreadable PNG text chunk"
            ),
        }
    }
    Ok(fields)
}

fn split_keyword(chunk: &[u8]) -> DecodeResult<(String, &[u8])> {
    let nul = chunk
        .iter()
        .position(|byte| *byte == 0)
        .ok_or_else(|| DecodeError::MalformedContainer("text chunk without keyword".to_string()))?;
    Ok((latin1(&chunk[..nul]), &chunk[nul + 1..]))
}

fn parse_text_chunk(chunk: &[u8]) -> DecodeResult<(String, String)> {
    let (key, rest) = split_keyword(chunk)?;
    Ok((key, latin1(rest)))
}

fn parse_compressed_text_chunk(chunk: &[u8]) -> DecodeResult<(String, String)> {
    let (key, rest) = split_keyword(chunk)?;
    let Some((&method, compressed)) = rest.split_first() else {
        return Err(DecodeError::MalformedContainer(format!(
            "zTXt `{key}` has no compression method"
        )));
    };
    if method != 0 {
        return Err(DecodeError::MalformedContainer(format!(
            "zTXt `{key}` uses unknown compression method {method}"
        )));
    }
    Ok((key, latin1(&inflate(compressed)?)))
}

fn parse_international_text_chunk(chunk: &[u8]) -> DecodeResult<(String, String)> {
    let (key, rest) = split_keyword(chunk)?;
    if rest.len() < 2 {
        return Err(DecodeError::MalformedContainer(format!(
            "iTXt `{key}` is truncated"
        )));
    }
    let compressed = rest[0] == 1;
    let mut tail = &rest[2..];
    // language tag, then translated keyword
    for _ in 0..2 {
        let nul = tail.iter().position(|byte| *byte == 0).ok_or_else(|| {
            DecodeError::MalformedContainer(format!("iTXt `{key}` is truncated"))
        })?;
        tail = &tail[nul + 1..];
    }
    let raw = if compressed {
        inflate(tail)?
    } else {
        tail.to_vec()
    };
    let text = String::from_utf8(raw)
        .map_err(|_| DecodeError::MalformedContainer(format!("iTXt `{key}` is not UTF-8")))?;
    Ok((key, text))
}

fn inflate(compressed: &[u8]) -> DecodeResult<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(compressed)
        .take(MAX_INFLATED_TEXT)
        .read_to_end(&mut out)?;
    Ok(out)
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| *byte as char).collect()
}

fn read_jpeg_text(blob: &ImageBlob) -> DecodeResult<TextFields> {
    let data = blob.bytes();
    if !data.starts_with(&[0xFF, 0xD8]) {
        return Err(DecodeError::MalformedContainer(
            "missing JPEG start-of-image".to_string(),
        ));
    }
    let mut cursor = blob.cursor();
    cursor.set_position(2);
    let mut fields = TextFields::default();
    while let Some((marker, start, end)) = next_jpeg_segment(&mut cursor, data.len()) {
        if marker == 0xE1 {
            if let Some(tiff) = data[start..end].strip_prefix(EXIF_HEADER) {
                read_exif_into(tiff, &mut fields);
            }
        }
        cursor.set_position(end as u64);
    }
    Ok(fields)
}

fn next_jpeg_segment(cursor: &mut Cursor<&[u8]>, len: usize) -> Option<(u8, usize, usize)> {
    loop {
        let prefix = cursor.read_u8().ok()?;
        if prefix != 0xFF {
            debug!(offset = cursor.position() - 1, "expected JPEG marker, keeping earlier text fields");
            return None;
        }
        let mut marker = cursor.read_u8().ok()?;
        while marker == 0xFF {
            marker = cursor.read_u8().ok()?;
        }
        match marker {
            0x01 | 0xD0..=0xD8 => continue,
            0xD9 | 0xDA => return None,
            _ => {}
        }
        let Ok(length) = cursor.read_u16::<BigEndian>() else {
            debug!("JPEG ends inside a segment header");
            return None;
        };
        let length = length as usize;
        let start = cursor.position() as usize;
        let end = start + length.saturating_sub(2);
        if length < 2 || end > len {
            debug!(marker, length, "JPEG segment overruns the buffer, keeping earlier text fields");
            return None;
        }
        return Some((marker, start, end));
    }
}

fn read_webp_text(blob: &ImageBlob) -> DecodeResult<TextFields> {
    let data = blob.bytes();
    if data.len() < 12 || &data[0..4] != b"RIFF" || &data[8..12] != b"WEBP" {
        return Err(DecodeError::MalformedContainer(
            "missing RIFF/WEBP header".to_string(),
        ));
    }
    let mut cursor = blob.cursor();
    cursor.set_position(12);
    let mut fields = TextFields::default();
    while (cursor.position() as usize) + 8 <= data.len() {
        let mut fourcc = [0u8; 4];
        cursor.read_exact(&mut fourcc)?;
        let size = cursor.read_u32::<LittleEndian>()? as usize;
        let start = cursor.position() as usize;
        let end = start + size;
        if end > data.len() {
            debug!(
                chunk = %String::from_utf8_lossy(&fourcc),
                "WebP chunk overruns the buffer, keeping earlier text fields"
            );
            break;
        }
        if &fourcc == b"EXIF" {
            let payload = &data[start..end];
            let tiff = payload.strip_prefix(EXIF_HEADER).unwrap_or(payload);
            read_exif_into(tiff, &mut fields);
        }
        cursor.set_position((end + (size & 1)) as u64);
    }
    Ok(fields)
}

fn read_exif_into(tiff: &[u8], fields: &mut TextFields) {
    match read_user_comment(tiff) {
        Ok(Some(text)) => fields.insert_first(PARAMETERS_FIELD.to_string(), text),
        Ok(None) => {}
        Err(err) => debug!(error = %err, "skipping unreadable Exif block"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endianness {
    Little,
    Big,
}

struct TiffCursor<'a> {
    cursor: Cursor<&'a [u8]>,
    endianness: Endianness,
}

impl<'a> TiffCursor<'a> {
    fn new(data: &'a [u8], endianness: Endianness) -> Self {
        Self {
            cursor: Cursor::new(data),
            endianness,
        }
    }

    fn seek(&mut self, offset: u64) {
        self.cursor.set_position(offset);
    }

    fn read_u16(&mut self) -> io::Result<u16> {
        match self.endianness {
            Endianness::Little => self.cursor.read_u16::<LittleEndian>(),
            Endianness::Big => self.cursor.read_u16::<BigEndian>(),
        }
    }

    fn read_u32(&mut self) -> io::Result<u32> {
        match self.endianness {
            Endianness::Little => self.cursor.read_u32::<LittleEndian>(),
            Endianness::Big => self.cursor.read_u32::<BigEndian>(),
        }
    }
}

struct IfdEntry {
    count: u32,
    value: [u8; 4],
}

impl IfdEntry {
    fn offset(&self, endianness: Endianness) -> u32 {
        match endianness {
            Endianness::Little => LittleEndian::read_u32(&self.value),
            Endianness::Big => BigEndian::read_u32(&self.value),
        }
    }
}

fn find_entry(reader: &mut TiffCursor<'_>, ifd_offset: u32, tag: u16) -> DecodeResult<Option<IfdEntry>> {
    reader.seek(u64::from(ifd_offset));
    let entries = reader.read_u16()?;
    for _ in 0..entries {
        let entry_tag = reader.read_u16()?;
        let _field_type = reader.read_u16()?;
        let count = reader.read_u32()?;
        let mut value = [0u8; 4];
        reader.cursor.read_exact(&mut value)?;
        if entry_tag == tag {
            return Ok(Some(IfdEntry { count, value }));
        }
    }
    Ok(None)
}

fn read_user_comment(tiff: &[u8]) -> DecodeResult<Option<String>> {
    let endianness = match tiff.get(0..2) {
        Some(b"II") => Endianness::Little,
        Some(b"MM") => Endianness::Big,
        _ => {
            return Err(DecodeError::MalformedContainer(
                "unexpected TIFF byte order".to_string(),
            ))
        }
    };
    let mut reader = TiffCursor::new(tiff, endianness);
    reader.seek(2);
    if reader.read_u16()? != 42 {
        return Err(DecodeError::MalformedContainer(
            "TIFF signature invalid".to_string(),
        ));
    }
    let ifd0 = reader.read_u32()?;
    let Some(exif_ifd) = find_entry(&mut reader, ifd0, TAG_EXIF_IFD)? else {
        return Ok(None);
    };
    let exif_offset = exif_ifd.offset(endianness);
    let Some(comment) = find_entry(&mut reader, exif_offset, TAG_USER_COMMENT)? else {
        return Ok(None);
    };

    let count = comment.count as usize;
    let raw = if count <= 4 {
        &comment.value[..count]
    } else {
        let offset = comment.offset(endianness) as usize;
        tiff.get(offset..offset.saturating_add(count))
            .ok_or_else(|| {
                DecodeError::MalformedContainer("UserComment overruns the Exif block".to_string())
            })?
    };
    Ok(decode_user_comment(raw, endianness))
}

fn decode_user_comment(raw: &[u8], endianness: Endianness) -> Option<String> {
    let text = if raw.len() >= 8 {
        let (prefix, body) = raw.split_at(8);
        match prefix {
            b"UNICODE\0" => decode_utf16(body, endianness),
            b"ASCII\0\0\0" | b"JIS\0\0\0\0\0" | b"\0\0\0\0\0\0\0\0" => {
                String::from_utf8_lossy(body).into_owned()
            }
            _ => String::from_utf8_lossy(raw).into_owned(),
        }
    } else {
        String::from_utf8_lossy(raw).into_owned()
    };
    let trimmed = text.trim_end_matches('\0').trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_string())
}

fn decode_utf16(body: &[u8], fallback: Endianness) -> String {
    let endianness = match body {
        [0, second, ..] if *second != 0 => Endianness::Big,
        [first, 0, ..] if *first != 0 => Endianness::Little,
        _ => fallback,
    };
    let units: Vec<u16> = body
        .chunks_exact(2)
        .map(|pair| match endianness {
            Endianness::Little => LittleEndian::read_u16(pair),
            Endianness::Big => BigEndian::read_u16(pair),
        })
        .collect();
    String::from_utf16_lossy(&units)
}
