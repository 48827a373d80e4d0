use std::io::{Read, Write};
use std::str::FromStr;

use bytes::Bytes;
use flate2::Compression;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};

use crate::errors::{Error, ErrorKind};

const BROTLI_BUFFER: usize = 4096;
const BROTLI_QUALITY: u32 = 5;
const BROTLI_WINDOW: u32 = 22;

/// Content codings understood on both sides of the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Identity,
    Gzip,
    /// zlib-wrapped deflate, as HTTP defines it.
    Deflate,
    Brotli,
}

impl Encoding {
    pub fn as_str(self) -> &'static str {
        match self {
            Encoding::Identity => "identity",
            Encoding::Gzip => "gzip",
            Encoding::Deflate => "deflate",
            Encoding::Brotli => "br",
        }
    }
}

impl FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "identity" => Ok(Encoding::Identity),
            "gzip" | "x-gzip" => Ok(Encoding::Gzip),
            "deflate" => Ok(Encoding::Deflate),
            "br" => Ok(Encoding::Brotli),
            other => Err(other.to_string()),
        }
    }
}

fn split_list(raw: &str) -> impl DoubleEndedIterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// Compress `body` with every algorithm of the comma separated list, in
/// order. Returns the new body and the `Content-Encoding` value to send.
pub(crate) fn compress_body(body: &[u8], algorithms: &str) -> Result<(Bytes, String), Error> {
    let mut applied = Vec::new();
    let mut current = body.to_vec();
    for name in split_list(algorithms) {
        let encoding = match name.parse::<Encoding>() {
            Ok(Encoding::Identity) | Err(_) => {
                return Err(crate::http_error!(
                    ErrorKind::RequestCompression,
                    format!("unknown compression algorithm {name}"),
                    "algorithm" => name
                ));
            }
            Ok(encoding) => encoding,
        };
        current = encode(encoding, &current).map_err(|e| {
            Error::new(
                ErrorKind::RequestCompression,
                format!("{} compression failed: {e}", encoding.as_str()),
            )
        })?;
        applied.push(encoding.as_str());
    }
    Ok((Bytes::from(current), applied.join(", ")))
}

fn encode(encoding: Encoding, input: &[u8]) -> std::io::Result<Vec<u8>> {
    match encoding {
        Encoding::Identity => Ok(input.to_vec()),
        Encoding::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(input)?;
            encoder.finish()
        }
        Encoding::Deflate => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(input)?;
            encoder.finish()
        }
        Encoding::Brotli => {
            let mut out = Vec::new();
            {
                let mut writer = brotli::CompressorWriter::new(
                    &mut out,
                    BROTLI_BUFFER,
                    BROTLI_QUALITY,
                    BROTLI_WINDOW,
                );
                writer.write_all(input)?;
                writer.flush()?;
            }
            Ok(out)
        }
    }
}

/// Undo a response `Content-Encoding`, last applied coding first.
pub(crate) fn decompress_body(body: Bytes, content_encoding: Option<&str>) -> Result<Bytes, Error> {
    let Some(header) = content_encoding else {
        return Ok(body);
    };
    let mut current = body;
    for name in split_list(header).rev() {
        let encoding = name.parse::<Encoding>().map_err(|unknown| {
            crate::http_error!(
                ErrorKind::ResponseDecompression,
                format!("unsupported content-encoding {unknown}"),
                "content-encoding" => header
            )
        })?;
        if encoding == Encoding::Identity {
            continue;
        }
        let decoded = decode(encoding, &current).map_err(|e| {
            Error::new(
                ErrorKind::ResponseDecompression,
                format!("failed to decode {} body: {e}", encoding.as_str()),
            )
        })?;
        current = Bytes::from(decoded);
    }
    Ok(current)
}

fn decode(encoding: Encoding, input: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    match encoding {
        Encoding::Identity => out.extend_from_slice(input),
        Encoding::Gzip => {
            GzDecoder::new(input).read_to_end(&mut out)?;
        }
        Encoding::Deflate => {
            ZlibDecoder::new(input).read_to_end(&mut out)?;
        }
        Encoding::Brotli => {
            brotli::Decompressor::new(input, BROTLI_BUFFER).read_to_end(&mut out)?;
        }
    }
    Ok(out)
}
