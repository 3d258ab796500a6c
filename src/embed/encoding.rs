//! Size-minimal payload encoding for embedded files.

use std::fmt;
use std::io::{self, Read, Write};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;
use thiserror::Error;

/// Encoding applied to an embedded payload.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum Encoding {
    /// Raw bytes, base64 encoded.
    #[serde(rename = "b64")]
    RawBase64,
    /// Gzip-compressed bytes, base64 encoded.
    #[serde(rename = "gz+b64")]
    GzipBase64,
}

impl Encoding {
    /// Tag understood by cloud-init's `write_files` module.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::RawBase64 => "b64",
            Self::GzipBase64 => "gz+b64",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Errors raised when decoding a payload back into file bytes.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload is not valid base64.
    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    /// The payload is tagged as gzip but does not decompress.
    #[error("payload failed to decompress: {0}")]
    Gzip(#[from] io::Error),
}

/// A file's bytes in their embedded, textual form.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct EncodedContent {
    /// Encoding that was selected.
    pub encoding: Encoding,
    /// Base64 text placed in the document.
    pub payload: String,
    /// Byte length before encoding.
    pub original_len: usize,
}

impl EncodedContent {
    /// Encodes `raw`, compressing only when gzip is strictly smaller.
    ///
    /// The gzip header carries no timestamp, so identical input always yields
    /// identical output.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the in-memory compressor fails.
    pub fn encode(raw: &[u8]) -> io::Result<Self> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(raw)?;
        let compressed = encoder.finish()?;

        let (encoding, winner) = if prefer_gzip(raw.len(), compressed.len()) {
            (Encoding::GzipBase64, compressed.as_slice())
        } else {
            (Encoding::RawBase64, raw)
        };

        Ok(Self {
            encoding,
            payload: STANDARD.encode(winner),
            original_len: raw.len(),
        })
    }

    /// Recovers the original file bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] when the payload is malformed.
    pub fn decode(&self) -> Result<Vec<u8>, DecodeError> {
        let bytes = STANDARD.decode(&self.payload)?;
        match self.encoding {
            Encoding::RawBase64 => Ok(bytes),
            Encoding::GzipBase64 => {
                let mut decoded = Vec::with_capacity(self.original_len);
                GzDecoder::new(bytes.as_slice()).read_to_end(&mut decoded)?;
                Ok(decoded)
            }
        }
    }
}

/// Ties keep the raw form.
const fn prefer_gzip(raw_len: usize, compressed_len: usize) -> bool {
    compressed_len < raw_len
}
