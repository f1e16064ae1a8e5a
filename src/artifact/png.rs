//! PNG encoding and `tEXt` metadata.
//!
//! Text chunks are spliced in directly after `IHDR`, ahead of the image
//! data. The pixels and every existing chunk stay byte-identical, and a
//! decoder reports the entries without inflating the image.

use crate::error::{Error, Result};
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

/// PNG file signature.
pub const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

/// Length and type of the `IHDR` chunk every PNG opens with.
const IHDR_HEAD: [u8; 8] = [0, 0, 0, 13, b'I', b'H', b'D', b'R'];

/// Signature plus the complete `IHDR` chunk.
const HEADER_LEN: usize = SIGNATURE.len() + IHDR_HEAD.len() + 13 + 4;

/// Whether `bytes` start with the PNG signature.
#[must_use]
pub fn is_png(bytes: &[u8]) -> bool {
    bytes.starts_with(&SIGNATURE)
}

/// Encode a decoded image as PNG.
///
/// # Errors
///
/// Returns `Storage` if the encoder rejects the image.
pub fn encode(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|e| Error::Storage(format!("PNG encoding failed: {e}")))?;
    Ok(out.into_inner())
}

fn header_end(png: &[u8]) -> Result<usize> {
    if !is_png(png) {
        return Err(Error::Storage("not a PNG file".to_string()));
    }
    if png.get(SIGNATURE.len()..SIGNATURE.len() + IHDR_HEAD.len()) != Some(&IHDR_HEAD[..]) {
        return Err(Error::Storage("PNG does not open with IHDR".to_string()));
    }
    if png.len() < HEADER_LEN {
        return Err(Error::Storage("truncated PNG header".to_string()));
    }
    Ok(HEADER_LEN)
}

fn text_chunk(keyword: &str, text: &str) -> Result<Vec<u8>> {
    if keyword.is_empty()
        || keyword.len() > 79
        || !keyword.bytes().all(|b| (0x20..=0x7e).contains(&b))
    {
        return Err(Error::Storage(format!("invalid PNG keyword {keyword:?}")));
    }
    if !text.is_ascii() || text.contains('\0') {
        return Err(Error::Storage(format!("PNG text for {keyword} must be plain ASCII")));
    }

    let len = u32::try_from(keyword.len() + 1 + text.len())
        .map_err(|_| Error::Storage("PNG text chunk too large".to_string()))?;

    let mut chunk = Vec::with_capacity(len as usize + 12);
    chunk.extend_from_slice(&len.to_be_bytes());
    chunk.extend_from_slice(b"tEXt");
    chunk.extend_from_slice(keyword.as_bytes());
    chunk.push(0);
    chunk.extend_from_slice(text.as_bytes());
    let crc = crc32fast::hash(&chunk[4..]);
    chunk.extend_from_slice(&crc.to_be_bytes());
    Ok(chunk)
}

/// Insert one `tEXt` chunk per `(keyword, text)` entry, in order.
///
/// # Errors
///
/// Returns `Storage` if `png` does not open with a signature and `IHDR`, a
/// keyword is not 1-79 printable characters, or a text is not plain ASCII.
pub fn insert_text(png: &[u8], entries: &[(&str, &str)]) -> Result<Vec<u8>> {
    let at = header_end(png)?;
    let chunks = entries
        .iter()
        .map(|(keyword, text)| text_chunk(keyword, text))
        .collect::<Result<Vec<_>>>()?;

    let mut out = Vec::with_capacity(png.len() + chunks.iter().map(Vec::len).sum::<usize>());
    out.extend_from_slice(&png[..at]);
    for chunk in &chunks {
        out.extend_from_slice(chunk);
    }
    out.extend_from_slice(&png[at..]);
    Ok(out)
}

/// `tEXt` entries preceding the image data, in file order.
///
/// # Errors
///
/// Returns `Storage` if `png` is not a well-formed PNG.
pub fn text_entries(png: &[u8]) -> Result<Vec<(String, String)>> {
    header_end(png)?;
    let reader = ::png::Decoder::new(Cursor::new(png))
        .read_info()
        .map_err(|e| Error::Storage(format!("malformed PNG: {e}")))?;
    Ok(reader
        .info()
        .uncompressed_latin1_text
        .iter()
        .map(|chunk| (chunk.keyword.clone(), chunk.text.clone()))
        .collect())
}

/// A 1x1 grayscale PNG.
#[cfg(test)]
pub(crate) fn tiny_png() -> Vec<u8> {
    encode(&DynamicImage::ImageLuma8(image::GrayImage::new(1, 1))).unwrap_or_default()
}
