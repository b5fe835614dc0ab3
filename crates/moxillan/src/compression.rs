//! Block compression and decompression handling.

use std::io::{self, Read, Seek, Write};

#[cfg(feature = "deflate")]
use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use tracing::instrument;

use crate::error::Result;

/// Highest zlib compression level
pub const MAX_LEVEL: u32 = 9;

/// Compression requested by a builder source
///
/// Sources that [`CompressionHint::Inherit`] use the level of their nearest ancestor with an
/// explicit level, or the default from [`crate::write::BuildOptions`].
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum CompressionHint {
    #[default]
    Inherit,

    /// Level `0` stores the data as it is
    Level(u32),
}

impl CompressionHint {
    /// Level to use given the level in effect for the parent
    pub fn resolve(self, inherited: u32) -> u32 {
        match self {
            CompressionHint::Inherit => inherited,
            CompressionHint::Level(level) => level.min(MAX_LEVEL),
        }
    }
}

impl From<u32> for CompressionHint {
    fn from(value: u32) -> Self {
        CompressionHint::Level(value)
    }
}

/// Reads a bounded byte range, inflating it if needed
pub(crate) enum BlockReader<'a, R: Read + Seek> {
    Raw(io::Take<&'a mut R>),
    #[cfg(feature = "deflate")]
    Compressed(Box<ZlibDecoder<io::Take<&'a mut R>>>),
}

impl<'a, R: Read + Seek> BlockReader<'a, R> {
    #[instrument(skip(reader))]
    pub fn new(reader: &'a mut R, start: u64, limit: u64, compressed: bool) -> Result<Self> {
        reader.seek(io::SeekFrom::Start(start))?;

        let limit_reader = reader.by_ref().take(limit);
        match compressed {
            false => Ok(BlockReader::Raw(limit_reader)),
            #[cfg(feature = "deflate")]
            true => Ok(BlockReader::Compressed(Box::new(ZlibDecoder::new(
                limit_reader,
            )))),
            #[cfg(not(feature = "deflate"))]
            true => Err(crate::error::Error::FeatureUnsupported("compressed file table")),
        }
    }
}

impl<R: Read + Seek> Read for BlockReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            BlockReader::Raw(r) => r.read(buf),
            #[cfg(feature = "deflate")]
            BlockReader::Compressed(r) => r.read(buf),
        }
    }
}

/// Writes a block, deflating it at the chosen level
///
/// Keeps count of the bytes fed in so callers can record the logical size.
pub(crate) enum BlockWriter<W: Write> {
    Raw(W, u64),
    #[cfg(feature = "deflate")]
    Compressed(Box<ZlibEncoder<W>>),
}

impl<W: Write> BlockWriter<W> {
    #[instrument(skip(writer), err)]
    pub fn new(writer: W, level: u32) -> Result<Self> {
        match level {
            0 => Ok(BlockWriter::Raw(writer, 0)),
            #[cfg(feature = "deflate")]
            level => Ok(BlockWriter::Compressed(Box::new(ZlibEncoder::new(
                writer,
                Compression::new(level.min(MAX_LEVEL)),
            )))),
            #[cfg(not(feature = "deflate"))]
            _ => Err(crate::error::Error::FeatureUnsupported("deflate compression")),
        }
    }

    /// Flushes any pending compressed output and hands back the inner writer
    #[instrument(skip(self), err)]
    pub fn finalize(self) -> io::Result<W> {
        match self {
            BlockWriter::Raw(w, _) => Ok(w),
            #[cfg(feature = "deflate")]
            BlockWriter::Compressed(w) => (*w).finish(),
        }
    }

    pub fn total_in(&self) -> u64 {
        match self {
            BlockWriter::Raw(_, c) => *c,
            #[cfg(feature = "deflate")]
            BlockWriter::Compressed(w) => w.total_in(),
        }
    }
}

impl<W: Write> Write for BlockWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            BlockWriter::Raw(w, c) => {
                let written = w.write(buf)?;
                *c += written as u64;
                Ok(written)
            }
            #[cfg(feature = "deflate")]
            BlockWriter::Compressed(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            BlockWriter::Raw(w, _) => w.flush(),
            #[cfg(feature = "deflate")]
            BlockWriter::Compressed(w) => w.flush(),
        }
    }
}
