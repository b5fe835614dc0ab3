//! Readers over file payloads stored inside a package.
//!
//! Every handle shares the package's byte source. A read locks the source, seeks and reads
//! as one critical section; inflating happens outside of the lock on state owned by the
//! handle.

use std::{
    fmt::{self, Debug},
    io::{self, Cursor, Read, Seek, SeekFrom},
    sync::Arc,
};

#[cfg(feature = "deflate")]
use flate2::{Decompress, FlushDecompress, Status};
use parking_lot::Mutex;
use tracing::instrument;

use crate::error::{Error, Result};
#[cfg(feature = "deflate")]
use crate::error::FormatError;
use crate::format::FileLocation;

/// Size of the compressed-input scratch buffer of a [`InflateStream`]
pub const SEQUENTIAL_BUFFER_SIZE: usize = 0x1000;

/// The byte source of a package, shared by all of its handles
pub(crate) struct SharedSource<R> {
    inner: Arc<Mutex<R>>,
}

impl<R> Clone for SharedSource<R> {
    fn clone(&self) -> Self {
        SharedSource {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R> SharedSource<R> {
    pub fn new(reader: R) -> Self {
        SharedSource {
            inner: Arc::new(Mutex::new(reader)),
        }
    }

    pub fn owners(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl<R: Read + Seek> SharedSource<R> {
    /// Fills as much of `buf` as the source holds starting at `offset`
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut reader = self.inner.lock();
        reader.seek(SeekFrom::Start(offset))?;

        let mut filled = 0;
        while filled < buf.len() {
            match reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

/// How a compressed file should be opened
///
/// Stored files are always read straight from the package, regardless of the strategy.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum AccessStrategy {
    /// Inflate while reading, with bounded memory. Only rewinding to the start is supported.
    #[default]
    Sequential,

    /// Inflate the whole file into memory up front, allowing arbitrary seeks
    Random,
}

/// A direct view of a stored byte range
pub struct StoredStream<R> {
    source: SharedSource<R>,
    offset: u64,
    size: u64,
    pos: u64,
}

impl<R> StoredStream<R> {
    pub(crate) fn new(source: SharedSource<R>, offset: u64, size: u64) -> Self {
        StoredStream {
            source,
            offset,
            size,
            pos: 0,
        }
    }

    pub fn pos(&self) -> u64 {
        self.pos
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_eof(&self) -> bool {
        self.pos >= self.size
    }

    /// Moves the cursor, positions past the end simply read nothing
    pub fn set_pos(&mut self, pos: u64) {
        self.pos = pos;
    }
}

impl<R: Read + Seek> Read for StoredStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.is_eof() {
            return Ok(0);
        }

        let length = (self.size - self.pos).min(buf.len() as u64) as usize;
        let read = self
            .source
            .read_at(self.offset + self.pos, &mut buf[..length])?;
        self.pos += read as u64;

        Ok(read)
    }
}

impl<R> Seek for StoredStream<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::End(d) => self.size.checked_add_signed(d),
            SeekFrom::Current(d) => self.pos.checked_add_signed(d),
        };

        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of file")
        })?;
        self.pos = target;
        Ok(target)
    }
}

/// Streaming inflate over a compressed byte range
///
/// Owns its inflate state and input buffer, only the reads of compressed input touch the
/// shared source.
#[cfg(feature = "deflate")]
pub struct InflateStream<R> {
    source: SharedSource<R>,
    offset: u64,
    compressed_size: u64,
    size: u64,
    pos: u64,
    consumed: u64,
    input: Box<[u8]>,
    input_start: usize,
    input_end: usize,
    engine: Decompress,
}

#[cfg(feature = "deflate")]
impl<R> InflateStream<R> {
    pub fn pos(&self) -> u64 {
        self.pos
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_eof(&self) -> bool {
        self.pos >= self.size
    }
}

#[cfg(feature = "deflate")]
impl<R: Read + Seek> InflateStream<R> {
    pub(crate) fn new(source: SharedSource<R>, location: &FileLocation) -> io::Result<Self> {
        let mut stream = InflateStream {
            source,
            offset: location.offset,
            compressed_size: location.compressed_size,
            size: location.size,
            pos: 0,
            consumed: 0,
            input: vec![0; SEQUENTIAL_BUFFER_SIZE].into_boxed_slice(),
            input_start: 0,
            input_end: 0,
            engine: Decompress::new(true),
        };
        stream.refill()?;
        Ok(stream)
    }

    /// Starts over from the first byte
    ///
    /// The inflate state is thrown away and the input buffer refilled from the start of the
    /// compressed range.
    #[instrument(skip(self), fields(offset = self.offset), err)]
    pub fn rewind(&mut self) -> io::Result<()> {
        self.engine.reset(true);
        self.pos = 0;
        self.consumed = 0;
        self.input_start = 0;
        self.input_end = 0;
        self.refill()?;
        Ok(())
    }

    /// Loads the next chunk of compressed input, returns false once the range is exhausted
    fn refill(&mut self) -> io::Result<bool> {
        let remaining = self.compressed_size - self.consumed;
        if remaining == 0 {
            return Ok(false);
        }

        let wanted = remaining.min(self.input.len() as u64) as usize;
        let read = self
            .source
            .read_at(self.offset + self.consumed, &mut self.input[..wanted])?;
        tracing::trace!(offset = self.offset + self.consumed, read, "refilled input");

        self.consumed += read as u64;
        self.input_start = 0;
        self.input_end = read;
        Ok(read > 0)
    }
}

#[cfg(feature = "deflate")]
impl<R: Read + Seek> Read for InflateStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.is_eof() {
            return Ok(0);
        }

        let length = (self.size - self.pos).min(buf.len() as u64) as usize;
        let mut produced = 0;

        while produced < length {
            // The engine may still hold output once the input range is used up.
            if self.input_start == self.input_end {
                self.refill()?;
            }

            let before_in = self.engine.total_in();
            let before_out = self.engine.total_out();
            let status = self
                .engine
                .decompress(
                    &self.input[self.input_start..self.input_end],
                    &mut buf[produced..length],
                    FlushDecompress::Sync,
                )
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

            let used = (self.engine.total_in() - before_in) as usize;
            let written = (self.engine.total_out() - before_out) as usize;
            self.input_start += used;
            produced += written;

            if status == Status::StreamEnd || (used == 0 && written == 0) {
                break;
            }
        }

        self.pos += produced as u64;
        Ok(produced)
    }
}

#[cfg(feature = "deflate")]
impl<R: Read + Seek> Seek for InflateStream<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::End(d) => self.size.checked_add_signed(d),
            SeekFrom::Current(d) => self.pos.checked_add_signed(d),
        };

        match target {
            Some(0) => {
                self.rewind()?;
                Ok(0)
            }
            Some(p) if p == self.pos => Ok(p),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "sequential streams can only be rewound to the start",
            )),
        }
    }
}

#[cfg(feature = "deflate")]
impl<R> Debug for InflateStream<R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("InflateStream")
            .field("offset", &self.offset)
            .field("compressed_size", &self.compressed_size)
            .field("size", &self.size)
            .field("pos", &self.pos)
            .finish()
    }
}

/// Most output memory reserved at once while inflating into memory
#[cfg(feature = "deflate")]
const OUTPUT_RESERVE_LIMIT: usize = 0x10_0000;

/// Inflates a whole compressed range into memory, `chunk` bytes of input at a time
///
/// The output grows as data is inflated, so a recorded size that the stream cannot back
/// fails without reserving that much memory first.
#[cfg(feature = "deflate")]
#[instrument(skip(source), err)]
pub(crate) fn inflate_to_vec<R: Read + Seek>(
    source: &SharedSource<R>,
    location: &FileLocation,
    chunk: usize,
) -> Result<Vec<u8>> {
    let size = location.size as usize;
    let mut output = Vec::with_capacity(size.min(OUTPUT_RESERVE_LIMIT));
    let mut scratch = vec![0u8; chunk.max(1)];
    let mut engine = Decompress::new(true);
    let mut consumed = 0u64;

    'outer: while (output.len() as u64) < location.size && consumed < location.compressed_size {
        let wanted = (location.compressed_size - consumed).min(scratch.len() as u64) as usize;
        let read = source.read_at(location.offset + consumed, &mut scratch[..wanted])?;
        if read == 0 {
            break;
        }
        consumed += read as u64;

        let mut input = &scratch[..read];
        loop {
            if output.len() == output.capacity() {
                let remaining = size.saturating_sub(output.len());
                if remaining == 0 {
                    break 'outer;
                }
                output.reserve_exact(remaining.min(OUTPUT_RESERVE_LIMIT));
            }

            let before_in = engine.total_in();
            let before_out = output.len();
            let status = engine
                .decompress_vec(input, &mut output, FlushDecompress::Sync)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            let used = (engine.total_in() - before_in) as usize;
            input = &input[used..];

            if status == Status::StreamEnd {
                break 'outer;
            }
            // A full output may leave inflated bytes pending in the engine
            let stalled = used == 0 && output.len() == before_out;
            if input.is_empty() && (stalled || output.len() < output.capacity()) {
                break;
            }
            if stalled {
                break 'outer;
            }
        }
    }

    if (output.len() as u64) != location.size {
        return Err(FormatError::TruncatedData {
            expected: location.size,
            actual: output.len() as u64,
        }
        .into());
    }

    Ok(output)
}

/// A readable file inside a package
///
/// Returned by [`crate::read::Package::open_file`]. Handles are independent of each other and
/// of the package they came from, and may be moved to other threads.
pub enum PackageFile<R> {
    /// Stored file, read straight from the package
    Stored(StoredStream<R>),

    /// Compressed file inflated while reading
    #[cfg(feature = "deflate")]
    Inflating(Box<InflateStream<R>>),

    /// Compressed file inflated into memory when opened
    Buffered(Cursor<Vec<u8>>),
}

impl<R: Read + Seek> PackageFile<R> {
    #[instrument(skip(source), err)]
    pub(crate) fn open(
        source: SharedSource<R>,
        location: &FileLocation,
        strategy: AccessStrategy,
        chunk: usize,
    ) -> Result<Self> {
        if !location.compressed {
            return Ok(PackageFile::Stored(StoredStream::new(
                source,
                location.offset,
                location.size,
            )));
        }

        Self::open_compressed(source, location, strategy, chunk)
    }

    #[cfg(feature = "deflate")]
    fn open_compressed(
        source: SharedSource<R>,
        location: &FileLocation,
        strategy: AccessStrategy,
        chunk: usize,
    ) -> Result<Self> {
        match strategy {
            AccessStrategy::Sequential => Ok(PackageFile::Inflating(Box::new(
                InflateStream::new(source, location)?,
            ))),
            AccessStrategy::Random => Ok(PackageFile::Buffered(Cursor::new(inflate_to_vec(
                &source, location, chunk,
            )?))),
        }
    }

    #[cfg(not(feature = "deflate"))]
    fn open_compressed(
        _source: SharedSource<R>,
        _location: &FileLocation,
        _strategy: AccessStrategy,
        _chunk: usize,
    ) -> Result<Self> {
        Err(Error::FeatureUnsupported("compressed file"))
    }
}

impl<R> PackageFile<R> {
    /// Current position in the decompressed data
    pub fn pos(&self) -> u64 {
        match self {
            PackageFile::Stored(s) => s.pos(),
            #[cfg(feature = "deflate")]
            PackageFile::Inflating(s) => s.pos(),
            PackageFile::Buffered(c) => c.position(),
        }
    }

    /// Size of the decompressed data
    pub fn size(&self) -> u64 {
        match self {
            PackageFile::Stored(s) => s.size(),
            #[cfg(feature = "deflate")]
            PackageFile::Inflating(s) => s.size(),
            PackageFile::Buffered(c) => c.get_ref().len() as u64,
        }
    }

    pub fn is_eof(&self) -> bool {
        self.pos() >= self.size()
    }

    /// Whether [`PackageFile::set_pos`] accepts any position
    pub fn is_seekable(&self) -> bool {
        match self {
            PackageFile::Stored(_) | PackageFile::Buffered(_) => true,
            #[cfg(feature = "deflate")]
            PackageFile::Inflating(_) => false,
        }
    }
}

impl<R: Read + Seek> PackageFile<R> {
    /// Moves to an absolute position
    ///
    /// Sequential streams of compressed files only accept `0`, which restarts inflating
    /// from the beginning.
    pub fn set_pos(&mut self, pos: u64) -> Result<()> {
        match self {
            PackageFile::Stored(s) => s.set_pos(pos),
            #[cfg(feature = "deflate")]
            PackageFile::Inflating(s) => {
                if pos != 0 {
                    return Err(Error::FeatureUnsupported(
                        "seeking a sequential stream anywhere but the start",
                    ));
                }
                s.rewind()?;
            }
            PackageFile::Buffered(c) => c.set_position(pos),
        }
        Ok(())
    }
}

impl<R: Read + Seek> Read for PackageFile<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            PackageFile::Stored(s) => s.read(buf),
            #[cfg(feature = "deflate")]
            PackageFile::Inflating(s) => s.read(buf),
            PackageFile::Buffered(c) => c.read(buf),
        }
    }
}

impl<R: Read + Seek> Seek for PackageFile<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            PackageFile::Stored(s) => s.seek(pos),
            #[cfg(feature = "deflate")]
            PackageFile::Inflating(s) => s.seek(pos),
            PackageFile::Buffered(c) => c.seek(pos),
        }
    }
}

impl<R> Debug for PackageFile<R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PackageFile::Stored(s) => write!(f, "PackageFile::Stored({}/{})", s.pos, s.size),
            #[cfg(feature = "deflate")]
            PackageFile::Inflating(s) => write!(f, "PackageFile::Inflating({:?})", s),
            PackageFile::Buffered(c) => write!(
                f,
                "PackageFile::Buffered({}/{})",
                c.position(),
                c.get_ref().len()
            ),
        }
    }
}
