use crate::error::{HelperError, Result};
use std::io::{BufWriter, Read, Write};
use std::ops::RangeInclusive;
use std::path::Path;

/// Raw handle under the compression transform: a data file or a plugin's stdin.
pub type Handle = Box<dyn Write>;

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CodecId {
    Store = 0,
    Gzip = 1,
    Zstd = 2,
}

impl CodecId {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "none" => Ok(CodecId::Store),
            "gzip" => Ok(CodecId::Gzip),
            "zstd" => Ok(CodecId::Zstd),
            other => Err(HelperError::Config(format!(
                "unknown compression type {other:?} (expected none, gzip or zstd)"
            ))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CodecId::Store => "none",
            CodecId::Gzip => "gzip",
            CodecId::Zstd => "zstd",
        }
    }

    /// Codec implied by a data file's suffix.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("gz") => CodecId::Gzip,
            Some("zst") => CodecId::Zstd,
            _ => CodecId::Store,
        }
    }

    fn levels(self) -> Option<RangeInclusive<i32>> {
        match self {
            CodecId::Store => None,
            CodecId::Gzip => Some(1..=9),
            CodecId::Zstd => Some(1..=19),
        }
    }

    /// Wrap `src` so reads yield the decompressed stream.
    pub fn decoder(self, src: Box<dyn Read>) -> Result<Box<dyn Read>> {
        self.codec().decoder(src)
    }

    fn codec(self) -> &'static dyn Codec {
        match self {
            CodecId::Store => &store::Store,
            CodecId::Gzip => &gzip::GzipCodec,
            CodecId::Zstd => &zstdc::ZstdCodec,
        }
    }
}

/// A stream transform in front of the destination handle.
///
/// `close` finishes the transform and releases the handle. Only the
/// transform's own finishing error is returned; flushing the buffer under it
/// is best effort.
pub trait SinkWriter: Write {
    fn close(self: Box<Self>) -> Result<()>;
}

pub trait Codec: Send + Sync {
    fn encoder(&self, dst: BufWriter<Handle>, level: i32) -> Result<Box<dyn SinkWriter>>;
    fn decoder(&self, src: Box<dyn Read>) -> Result<Box<dyn Read>>;
}

/// Codec plus level, validated on construction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Compression {
    pub id: CodecId,
    pub level: i32,
}

impl Compression {
    pub fn none() -> Self {
        Self {
            id: CodecId::Store,
            level: 0,
        }
    }

    pub fn new(id: CodecId, level: i32) -> Result<Self> {
        let c = Self { id, level };
        c.validate()?;
        Ok(c)
    }

    pub fn parse(kind: &str, level: i32) -> Result<Self> {
        Self::new(CodecId::parse(kind)?, level)
    }

    pub fn validate(&self) -> Result<()> {
        match self.id.levels() {
            Some(range) if !range.contains(&self.level) => Err(HelperError::Config(format!(
                "{} compression level must be in {}..={}, got {}",
                self.id.name(),
                range.start(),
                range.end(),
                self.level
            ))),
            _ => Ok(()),
        }
    }

    pub fn writer(&self, dst: Handle) -> Result<Box<dyn SinkWriter>> {
        self.validate()?;
        self.id.codec().encoder(BufWriter::new(dst), self.level)
    }

    pub fn reader(&self, src: Box<dyn Read>) -> Result<Box<dyn Read>> {
        self.id.decoder(src)
    }
}

/// Flush and drop the buffering layer, logging instead of failing.
pub(crate) fn close_buffered(mut buf: BufWriter<Handle>) {
    if let Err(e) = buf.flush() {
        tracing::warn!(error = %e, "flushing destination buffer failed");
    }
}

pub mod gzip;
pub mod store;
pub mod zstdc;
