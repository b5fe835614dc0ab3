//! Types for building packages
//!

use binrw::BinWrite;
use bon::Builder;
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::{self, Seek, SeekFrom, Write};
use tracing::{debug, info, instrument, trace};

use crate::compression::{BlockWriter, MAX_LEVEL};
use crate::error::{Error, Result};
use crate::format::{
    self, CommonHeader, FileLocation, Header, HeaderFlags, Node, COMMON_HEADER_SIZE, MAX_DEPTH,
    VERSION_CURRENT,
};
use crate::source::{DirectorySource, FileSource, Source};

/// Level used for files when no source along their path asks for one
pub const DEFAULT_LEVEL: u32 = 6;

/// Options for how the package should be written
#[derive(Debug, Clone, Copy, Builder)]
pub struct BuildOptions {
    /// Compression level for files that inherit all the way up to the root
    #[builder(default = DEFAULT_LEVEL)]
    pub level: u32,

    /// Compression level for the file table, `0` stores it as it is
    #[builder(default)]
    pub table_level: u32,
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions::builder().build()
    }
}

#[derive(Debug, Default)]
struct BuildStats {
    files: usize,
    directories: usize,
    compressed_files: usize,
    data_length: u64,
}

/// Package generator
///
/// Writes every file payload first, then the file table, then goes back to fill in the
/// header. Offsets are relative to the position of the sink when [`PackageBuilder::build`]
/// starts, so a fresh sink yields a package that can be opened directly.
///
/// ```
/// # fn doit() -> moxillan::error::Result<()>
/// # {
/// use moxillan::source::{Directory, MemoryFile};
/// use moxillan::write::{BuildOptions, PackageBuilder};
///
/// let root = Directory::new("")
///     .with(Directory::new("docs").with(MemoryFile::new("readme.txt", "hello")));
///
/// // We use a buffer here, though you'd normally use a `File`
/// let builder = PackageBuilder::new(
///     std::io::Cursor::new(Vec::new()),
///     BuildOptions::builder().level(9).build(),
/// );
/// let package = builder.build(&root)?;
/// assert!(package.get_ref().starts_with(b"\xCCMox1\0"));
/// # Ok(())
/// # }
/// # doit().unwrap();
/// ```
pub struct PackageBuilder<W: Write + Seek> {
    inner: W,
    options: BuildOptions,
    base: u64,
    stats: BuildStats,
}

impl<W: Write + Seek> PackageBuilder<W> {
    pub fn new(inner: W, options: BuildOptions) -> PackageBuilder<W> {
        PackageBuilder {
            inner,
            options: BuildOptions {
                level: options.level.min(MAX_LEVEL),
                table_level: options.table_level.min(MAX_LEVEL),
            },
            base: 0,
            stats: BuildStats::default(),
        }
    }

    /// Writes `root` and everything below it, returning the sink positioned at the end of
    /// the package.
    ///
    /// The name of `root` is not stored. If anything fails the header keeps its zeroed
    /// placeholder offsets, so a partial output never opens as a valid package.
    #[instrument(skip_all, fields(root = root.name(), options = ?self.options), err)]
    pub fn build(mut self, root: &dyn DirectorySource) -> Result<W> {
        self.base = self.inner.stream_position()?;

        CommonHeader {
            format_version: VERSION_CURRENT,
        }
        .write(&mut self.inner)?;
        Header::default().write(&mut self.inner)?;

        let sources = root.children();
        let count = child_count(root.name(), sources.len())?;
        let level = root.compression().resolve(self.options.level);
        let children = self.write_data(sources, level, 1)?;

        let file_table_begin = self.position("file table begin")?;
        self.write_table(count, &children)?;
        let file_table_end = self.position("file table end")?;

        let mut flags = HeaderFlags::empty();
        flags.set(
            HeaderFlags::FILE_TABLE_COMPRESSED,
            self.options.table_level > 0,
        );
        flags.set(HeaderFlags::USES_DEFLATE, self.stats.compressed_files > 0);

        let end = self.inner.stream_position()?;
        self.inner
            .seek(SeekFrom::Start(self.base + COMMON_HEADER_SIZE))?;
        Header {
            file_table_begin,
            file_table_end,
            flags: flags.bits(),
        }
        .write(&mut self.inner)?;
        self.inner.seek(SeekFrom::Start(end))?;

        info!(
            files = self.stats.files,
            directories = self.stats.directories,
            compressed = self.stats.compressed_files,
            data_length = self.stats.data_length,
            size = end - self.base,
            "built package"
        );

        Ok(self.inner)
    }

    /// Writes the payload of every file below `sources`, returning their table entries
    fn write_data(&mut self, sources: &[Source], level: u32, depth: usize) -> Result<Vec<Node>> {
        let mut nodes = Vec::with_capacity(sources.len());

        for source in sources {
            validate_name(source.name())?;
            if depth > MAX_DEPTH {
                return Err(Error::InvalidSource {
                    name: source.name().to_owned(),
                    reason: "nested too deeply",
                });
            }

            let level = source.compression().resolve(level);
            let node = match source {
                Source::File(file) => self.write_file(&**file, level)?,
                Source::Directory(directory) => {
                    let children = directory.children();
                    child_count(directory.name(), children.len())?;

                    let nested = self.write_data(children, level, depth + 1)?;
                    self.stats.directories += 1;
                    trace!(name = directory.name(), level, "directory");
                    Node::directory(directory.name(), nested)
                }
            };
            nodes.push(node);
        }

        Ok(nodes)
    }

    #[instrument(skip(self, file), fields(name = file.name()), err)]
    fn write_file(&mut self, file: &dyn FileSource, level: u32) -> Result<Node> {
        let offset = self.position("offset")?;

        let mut reader = file.open()?;
        let mut block = BlockWriter::new(&mut self.inner, level)?;
        io::copy(&mut reader, &mut block)?;
        let size = block.total_in();
        block.finalize()?;

        let end = self.position("data segment")?;
        let location = FileLocation {
            compressed: level > 0,
            offset: offset as u64,
            compressed_size: (end - offset) as u64,
            size,
        };
        if size > u32::MAX as u64 {
            return Err(Error::Overflow {
                field: "size",
                value: size,
            });
        }

        self.stats.files += 1;
        self.stats.data_length += size;
        if location.compressed {
            self.stats.compressed_files += 1;
        }
        debug!(?location, "stored file");

        Ok(Node::file(file.name(), location))
    }

    fn write_table(&mut self, count: u16, children: &[Node]) -> Result<()> {
        // The root count stays outside the compressed block
        self.inner.write_u16::<LittleEndian>(count)?;

        let mut table = BlockWriter::new(&mut self.inner, self.options.table_level)?;
        for child in children {
            format::write_node(&mut table, child)?;
        }
        table.finalize()?;

        Ok(())
    }

    /// Current position relative to the start of the package
    fn position(&mut self, field: &'static str) -> Result<u32> {
        let value = self.inner.stream_position()? - self.base;
        u32::try_from(value).map_err(|_| Error::Overflow { field, value })
    }
}

/// Builds a package from `root` into `output`
pub fn build_package<W: Write + Seek>(
    root: &dyn DirectorySource,
    output: W,
    options: BuildOptions,
) -> Result<W> {
    PackageBuilder::new(output, options).build(root)
}

fn validate_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        "empty name"
    } else if name.contains(['/', '\\']) {
        "name contains a path separator"
    } else if name == "." || name == ".." {
        "name refers to a directory"
    } else {
        return Ok(());
    };

    Err(Error::InvalidSource {
        name: name.to_owned(),
        reason,
    })
}

fn child_count(name: &str, count: usize) -> Result<u16> {
    u16::try_from(count).map_err(|_| Error::InvalidSource {
        name: name.to_owned(),
        reason: "more than 65535 children",
    })
}
