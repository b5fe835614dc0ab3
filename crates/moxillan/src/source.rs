//! Content sources describing what goes into a package.
//!
//! [`crate::write::PackageBuilder`] walks a tree of sources: files provide a name and a byte
//! stream, directories provide a name and their children in order. Both may request a
//! [`CompressionHint`] that applies to everything below them.

use std::{
    fmt::Debug,
    fs::File,
    io::{self, Cursor, Read},
    path::{Path, PathBuf},
};

use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::{compression::CompressionHint, error::Result};

/// A file to store in a package
pub trait FileSource: Debug {
    fn name(&self) -> &str;

    fn compression(&self) -> CompressionHint;

    /// Opens the contents for reading, called once per build
    fn open(&self) -> io::Result<Box<dyn Read + '_>>;
}

/// A directory to store in a package
pub trait DirectorySource: Debug {
    fn name(&self) -> &str;

    fn compression(&self) -> CompressionHint;

    /// Children in the order they should be stored
    fn children(&self) -> &[Source];
}

/// Any node of a source tree
#[derive(Debug)]
pub enum Source {
    File(Box<dyn FileSource>),
    Directory(Box<dyn DirectorySource>),
}

impl Source {
    pub fn name(&self) -> &str {
        match self {
            Source::File(f) => f.name(),
            Source::Directory(d) => d.name(),
        }
    }

    pub fn compression(&self) -> CompressionHint {
        match self {
            Source::File(f) => f.compression(),
            Source::Directory(d) => d.compression(),
        }
    }
}

/// A file whose contents are held in memory
#[derive(Debug, Clone)]
pub struct MemoryFile {
    name: String,
    data: Vec<u8>,
    compression: CompressionHint,
}

impl MemoryFile {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        MemoryFile {
            name: name.into(),
            data: data.into(),
            compression: CompressionHint::Inherit,
        }
    }

    pub fn with_compression(mut self, level: u32) -> Self {
        self.compression = CompressionHint::Level(level);
        self
    }
}

impl FileSource for MemoryFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn compression(&self) -> CompressionHint {
        self.compression
    }

    fn open(&self) -> io::Result<Box<dyn Read + '_>> {
        Ok(Box::new(Cursor::new(self.data.as_slice())))
    }
}

/// A file on the native filesystem, read when the package is built
#[derive(Debug, Clone)]
pub struct NativeFile {
    path: PathBuf,
    name: String,
    compression: CompressionHint,
}

impl NativeFile {
    /// Uses the file name of `path` as the name inside the package
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        NativeFile {
            name: file_name(&path),
            path,
            compression: CompressionHint::Inherit,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_compression(mut self, level: u32) -> Self {
        self.compression = CompressionHint::Level(level);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FileSource for NativeFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn compression(&self) -> CompressionHint {
        self.compression
    }

    fn open(&self) -> io::Result<Box<dyn Read + '_>> {
        Ok(Box::new(File::open(&self.path)?))
    }
}

/// A directory assembled from arbitrary sources
///
/// ```
/// use moxillan::source::{Directory, MemoryFile};
///
/// let root = Directory::new("")
///     .with(Directory::new("docs").with(MemoryFile::new("readme.txt", "hello")))
///     .with(MemoryFile::new("raw.bin", vec![0u8; 16]).with_compression(0));
/// assert_eq!(root.len(), 2);
/// ```
#[derive(Debug, Default)]
pub struct Directory {
    name: String,
    compression: CompressionHint,
    children: Vec<Source>,
}

impl Directory {
    pub fn new(name: impl Into<String>) -> Self {
        Directory {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_compression(mut self, level: u32) -> Self {
        self.compression = CompressionHint::Level(level);
        self
    }

    /// Appends a child, keeping insertion order
    pub fn add(&mut self, child: impl Into<Source>) -> &mut Self {
        self.children.push(child.into());
        self
    }

    pub fn with(mut self, child: impl Into<Source>) -> Self {
        self.add(child);
        self
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

impl DirectorySource for Directory {
    fn name(&self) -> &str {
        &self.name
    }

    fn compression(&self) -> CompressionHint {
        self.compression
    }

    fn children(&self) -> &[Source] {
        &self.children
    }
}

/// A directory on the native filesystem
///
/// The listing is taken when the source is created. Entries whose names start with `.` are
/// skipped, the rest are ordered by file name. Subdirectories become nested
/// [`NativeDirectory`] sources that inherit compression.
#[derive(Debug)]
pub struct NativeDirectory {
    path: PathBuf,
    name: String,
    compression: CompressionHint,
    children: Vec<Source>,
}

impl NativeDirectory {
    #[instrument(skip(path), fields(path = %path.as_ref().display()), err)]
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let mut children = Vec::new();
        for entry in WalkDir::new(path)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .sort_by_file_name()
        {
            let entry = entry.map_err(io::Error::from)?;
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }

            if entry.file_type().is_dir() {
                children.push(NativeDirectory::new(entry.path())?.into());
            } else {
                children.push(NativeFile::new(entry.path()).into());
            }
        }
        debug!(entries = children.len(), "listed directory");

        Ok(NativeDirectory {
            path: path.to_path_buf(),
            name: file_name(path),
            compression: CompressionHint::Inherit,
            children,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_compression(mut self, level: u32) -> Self {
        self.compression = CompressionHint::Level(level);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DirectorySource for NativeDirectory {
    fn name(&self) -> &str {
        &self.name
    }

    fn compression(&self) -> CompressionHint {
        self.compression
    }

    fn children(&self) -> &[Source] {
        &self.children
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl From<MemoryFile> for Source {
    fn from(value: MemoryFile) -> Self {
        Source::File(Box::new(value))
    }
}

impl From<NativeFile> for Source {
    fn from(value: NativeFile) -> Self {
        Source::File(Box::new(value))
    }
}

impl From<Directory> for Source {
    fn from(value: Directory) -> Self {
        Source::Directory(Box::new(value))
    }
}

impl From<NativeDirectory> for Source {
    fn from(value: NativeDirectory) -> Self {
        Source::Directory(Box::new(value))
    }
}
