//! Compression sniffing and decompression of inbound payloads.
//!
//! The format is decided by the first two bytes only, read as a big-endian
//! `u16`. Bzip2 and compress(1) streams are recognized but never decoded.

use std::io::{Cursor, Read};

use bytes::Bytes;
use flate2::read::{MultiGzDecoder, ZlibDecoder};

use crate::{Error, Result};

/// Output is pulled from the decoders in chunks of this size.
pub const CHUNK_SIZE: usize = 6144;

const GZIP_MAGIC: u16 = 0x1f8b;
const Z_MAGIC: u16 = 0x1f9d;
const BZIP2_MAGIC: u16 = 0x425a;
const ZLIB_MAGIC_FAST: u16 = 0x7801;
const ZLIB_MAGIC_DEFAULT: u16 = 0x789c;
const ZLIB_MAGIC_BEST: u16 = 0x78da;
const ZIP_MAGIC: u16 = 0x504b;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionKind {
    Gzip,
    Zlib,
    Zip,
    Bzip2,
    Z,
    Plain,
}

/// Read the leading two bytes of `data` as a big-endian `u16`.
#[inline]
pub(crate) fn magic(data: &[u8]) -> Option<u16> {
    match data {
        [a, b, ..] => Some(u16::from_be_bytes([*a, *b])),
        _ => None,
    }
}

/// Classify `data` by its 2-byte magic prefix.
#[inline]
pub fn classify(data: &[u8]) -> Result<CompressionKind> {
    let magic = magic(data).ok_or_else(|| {
        Error::MalformedInput(format!("need at least 2 bytes to classify, got {}", data.len()))
    })?;
    let kind = match magic {
        GZIP_MAGIC => CompressionKind::Gzip,
        Z_MAGIC => CompressionKind::Z,
        BZIP2_MAGIC => CompressionKind::Bzip2,
        ZLIB_MAGIC_FAST | ZLIB_MAGIC_DEFAULT | ZLIB_MAGIC_BEST => CompressionKind::Zlib,
        ZIP_MAGIC => CompressionKind::Zip,
        _ => CompressionKind::Plain,
    };
    Ok(kind)
}

/// Decompress `data` according to its detected format.
///
/// Plain payloads are returned as they are.
pub fn decompress(data: Bytes) -> Result<Bytes> {
    let kind = classify(&data)?;
    log::trace!("decompress, kind: {:?}, len: {}", kind, data.len());
    let out = match kind {
        CompressionKind::Plain => return Ok(data),
        CompressionKind::Gzip => read_chunked(kind, MultiGzDecoder::new(data.as_ref()))?,
        CompressionKind::Zlib => read_chunked(kind, ZlibDecoder::new(data.as_ref()))?,
        CompressionKind::Zip => unzip_first_entry(data.as_ref())?,
        CompressionKind::Bzip2 | CompressionKind::Z => return Err(Error::UnsupportedFormat(kind)),
    };
    log::trace!("decompressed {:?}, {} => {} bytes", kind, data.len(), out.len());
    Ok(Bytes::from(out))
}

fn read_chunked<R: Read>(kind: CompressionKind, mut r: R) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut chunk = [0u8; CHUNK_SIZE];
    loop {
        let n = r.read(&mut chunk).map_err(|e| corrupt(kind, e))?;
        if n == 0 {
            break;
        }
        out.extend_from_slice(&chunk[..n]);
    }
    Ok(out)
}

fn unzip_first_entry(data: &[u8]) -> Result<Vec<u8>> {
    let kind = CompressionKind::Zip;
    let mut archive = zip::ZipArchive::new(Cursor::new(data)).map_err(|e| corrupt(kind, e))?;
    for idx in 0..archive.len() {
        let entry = archive.by_index(idx).map_err(|e| corrupt(kind, e))?;
        if entry.is_dir() {
            continue;
        }
        log::trace!("unzip entry: {:?}, size: {}", entry.name(), entry.size());
        return read_chunked(kind, entry);
    }
    Err(corrupt(kind, "archive has no file entry"))
}

#[inline]
fn corrupt<E: ToString>(kind: CompressionKind, e: E) -> Error {
    Error::CorruptPayload { kind, reason: e.to_string() }
}
