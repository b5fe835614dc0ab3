//! Types for reading packages
//!

use byteorder::{LittleEndian, ReadBytesExt};
use std::{
    fmt::{self, Debug},
    io::{Read, Seek, SeekFrom},
};
use tracing::{debug, instrument};

use crate::{
    compression::BlockReader,
    error::{Error, FileNotFoundError, FormatError, Result},
    format::{self, FileLocation, HeaderFlags, Node, NodeKind},
    stream::{AccessStrategy, PackageFile, SharedSource},
};

/// Default size of the chunks compressed data is read in by [`AccessStrategy::Random`]
pub const DEFAULT_IO_BUFFER_CAPACITY: usize = 0x4000;

/// Snapshot of a node, as returned by [`Package::list_directory`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_directory: bool,
    pub is_compressed: bool,
    /// Decompressed size for files, number of children for directories
    pub size: u64,
    pub compressed_size: u64,
}

impl From<&Node> for DirEntry {
    fn from(node: &Node) -> Self {
        match node.kind() {
            NodeKind::File(location) => DirEntry {
                name: node.name().to_owned(),
                is_directory: false,
                is_compressed: location.compressed,
                size: location.size,
                compressed_size: location.compressed_size,
            },
            NodeKind::Directory(children) => DirEntry {
                name: node.name().to_owned(),
                is_directory: true,
                is_compressed: false,
                size: children.len() as u64,
                compressed_size: 0,
            },
        }
    }
}

/// Layout information about an opened package
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageInfo {
    /// Format version found in the header
    pub version: u16,
    pub header_length: u64,
    /// Sum of the decompressed sizes of all files
    pub data_length: u64,
    pub file_table_length: u64,
    pub file_table_compressed: bool,
}

/// Package reader
///
/// The whole file table is parsed when the package is opened. File contents are only read
/// through the handles returned by [`Package::open_file`], which share the underlying reader
/// and may be used from several threads at once.
///
/// ```no_run
/// use std::io::prelude::*;
/// use moxillan::AccessStrategy;
///
/// fn print_readme(reader: impl Read + Seek) -> moxillan::error::Result<()> {
///     let package = moxillan::Package::new(reader)?;
///
///     for entry in package.list_directory(package.root()) {
///         println!("{} ({} bytes)", entry.name, entry.size);
///     }
///
///     let mut file = package.open_path("docs/readme.txt", AccessStrategy::Sequential)?;
///     std::io::copy(&mut file, &mut std::io::stdout())?;
///
///     Ok(())
/// }
/// ```
pub struct Package<R> {
    source: SharedSource<R>,
    root: Node,
    info: PackageInfo,
    io_buffer_capacity: usize,
}

impl<R> Debug for Package<R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Package({:#?})", self.info)
    }
}

impl<R> Package<R> {
    /// The anonymous directory holding every top level node
    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn info(&self) -> PackageInfo {
        self.info
    }

    /// Number of owners of the underlying reader, the package plus every open handle
    pub fn handle_count(&self) -> usize {
        self.source.owners()
    }

    /// Sets the chunk size used to inflate files opened with [`AccessStrategy::Random`]
    pub fn set_io_buffer_capacity(&mut self, capacity: usize) {
        self.io_buffer_capacity = capacity.max(1);
    }

    /// Looks a node up by path
    ///
    /// Components are separated by `/` or `\`, empty components are skipped. Every component
    /// but the last has to be a directory, the last one has to be a directory exactly when
    /// `want_directory` is set. An empty path names the root directory.
    pub fn resolve(&self, path: &str, want_directory: bool) -> Option<&Node> {
        let mut components = path.split(['/', '\\']).filter(|c| !c.is_empty()).peekable();

        let mut current = &self.root;
        while let Some(component) = components.next() {
            let last = components.peek().is_none();
            current = current.find(component, if last { want_directory } else { true })?;
        }

        (current.is_directory() == want_directory).then_some(current)
    }

    pub fn find_file(&self, path: &str) -> Option<&Node> {
        self.resolve(path, false)
    }

    pub fn find_directory(&self, path: &str) -> Option<&Node> {
        self.resolve(path, true)
    }

    /// Entries of a directory in stored order, empty for files
    pub fn list_directory(&self, directory: &Node) -> Vec<DirEntry> {
        directory.children().iter().map(DirEntry::from).collect()
    }

    pub fn node_info(&self, node: &Node) -> DirEntry {
        DirEntry::from(node)
    }

    /// Every node below the root in stored pre-order, with its `/` separated path
    pub fn walk(&self) -> Walk<'_> {
        Walk {
            stack: self
                .root
                .children()
                .iter()
                .rev()
                .map(|node| (String::new(), node))
                .collect(),
        }
    }
}

impl<R: Read + Seek> Package<R> {
    /// Read a package, parsing its whole file table.
    #[instrument(skip(reader), err)]
    pub fn new(mut reader: R) -> Result<Package<R>> {
        let (root, info) = Self::read_file_table(&mut reader)?;
        debug!(?info, "opened package");

        Ok(Package {
            source: SharedSource::new(reader),
            root,
            info,
            io_buffer_capacity: DEFAULT_IO_BUFFER_CAPACITY,
        })
    }

    /// Opens a file for reading
    ///
    /// Compressed files are inflated according to `strategy`, stored files are always read
    /// in place.
    #[instrument(skip(self, node), fields(name = node.name()), err)]
    pub fn open_file(&self, node: &Node, strategy: AccessStrategy) -> Result<PackageFile<R>> {
        let location = node.location().ok_or_else(|| {
            Error::FileNotFound(FileNotFoundError::Directory(node.name().to_owned()))
        })?;

        PackageFile::open(
            self.source.clone(),
            location,
            strategy,
            self.io_buffer_capacity,
        )
    }

    /// Resolves `path` to a file and opens it
    pub fn open_path(&self, path: &str, strategy: AccessStrategy) -> Result<PackageFile<R>> {
        let node = self
            .find_file(path)
            .ok_or_else(|| Error::FileNotFound(FileNotFoundError::Path(path.to_owned())))?;
        self.open_file(node, strategy)
    }

    fn read_file_table(reader: &mut R) -> Result<(Node, PackageInfo)> {
        let (version, header) = format::read_header(reader)?;
        let flags = header.flags();

        check_codec(flags)?;

        let header_length = format::header_size(version).unwrap_or_default();
        let length = reader.seek(SeekFrom::End(0))?;
        let begin = header.file_table_begin as u64;
        let end = header.file_table_end as u64;

        if begin < header_length || begin > end || end > length {
            return Err(FormatError::TableOutOfBounds { begin, end, length }.into());
        }
        if end - begin < 2 {
            return Err(FormatError::Truncated.into());
        }

        reader.seek(SeekFrom::Start(begin))?;
        let count = reader
            .read_u16::<LittleEndian>()
            .map_err(format::truncated)?;

        let compressed = flags.contains(HeaderFlags::FILE_TABLE_COMPRESSED);
        let children = {
            let mut table =
                BlockReader::new(reader, begin + 2, end.saturating_sub(begin + 2), compressed)?;
            format::read_children(&mut table, count, 1)?
        };

        let root = Node::directory("", children);
        let data_length = validate(&root, header_length, begin)?;

        Ok((
            root,
            PackageInfo {
                version,
                header_length,
                data_length,
                file_table_length: end - begin,
                file_table_compressed: compressed,
            },
        ))
    }
}

/// Checks that every file lies within the data segment, returns the sum of file sizes
fn validate(node: &Node, data_begin: u64, data_end: u64) -> Result<u64> {
    match node.kind() {
        NodeKind::File(FileLocation {
            offset,
            compressed_size,
            size,
            ..
        }) => {
            let in_bounds = *offset >= data_begin
                && offset
                    .checked_add(*compressed_size)
                    .is_some_and(|end| end <= data_end);
            if !in_bounds {
                return Err(FormatError::DataOutOfBounds(node.name().to_owned()).into());
            }
            Ok(*size)
        }
        NodeKind::Directory(children) => {
            let mut sum = 0;
            for child in children {
                sum += validate(child, data_begin, data_end)?;
            }
            Ok(sum)
        }
    }
}

#[cfg(feature = "deflate")]
fn check_codec(_flags: HeaderFlags) -> Result<()> {
    Ok(())
}

#[cfg(not(feature = "deflate"))]
fn check_codec(flags: HeaderFlags) -> Result<()> {
    if flags.is_empty() {
        Ok(())
    } else {
        Err(Error::FeatureUnsupported("package compression"))
    }
}

/// Pre-order iterator over the nodes of a [`Package`], see [`Package::walk`]
pub struct Walk<'a> {
    stack: Vec<(String, &'a Node)>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = (String, &'a Node);

    fn next(&mut self) -> Option<Self::Item> {
        let (parent, node) = self.stack.pop()?;
        let path = if parent.is_empty() {
            node.name().to_owned()
        } else {
            format!("{}/{}", parent, node.name())
        };

        self.stack.extend(
            node.children()
                .iter()
                .rev()
                .map(|child| (path.clone(), child)),
        );

        Some((path, node))
    }
}

#[cfg(test)]
mod test {
    use std::io::prelude::*;

    use pretty_assertions::assert_eq;

    use crate::error::{Error, FormatError, Result};
    use crate::read::Package;
    use crate::stream::AccessStrategy;
    use std::io::Cursor;

    #[rustfmt::skip]
    const HELLO_PACKAGE: [u8; 53] = [
        // Header (20)
        0xCC, 0x4D, 0x6F, 0x78, 0x31, 0x00, 0x11, 0x01,
        0x19, 0x00, 0x00, 0x00,
        0x35, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00,
        // Data (5)
        0x68, 0x65, 0x6C, 0x6C, 0x6F,
        // File table (28)
        0x01, 0x00,
        0x09, 0x00, 0x00, 0x00,
        0x68, 0x65, 0x6C, 0x6C, 0x6F, 0x2E, 0x74, 0x78, 0x74,
        0x01,
        0x14, 0x00, 0x00, 0x00,
        0x05, 0x00, 0x00, 0x00,
        0x05, 0x00, 0x00, 0x00,
    ];

    #[test]
    fn read_invalid_magic() {
        let mut input = HELLO_PACKAGE;
        input[1] = 0x4E;

        let err = Package::new(Cursor::new(input)).unwrap_err();
        assert_eq!(err.as_format(), Some(&FormatError::InvalidMagic));
    }

    #[test]
    fn read_empty_package() -> Result<()> {
        #[rustfmt::skip]
        let input = [
            0xCC, 0x4D, 0x6F, 0x78, 0x31, 0x00, 0x11, 0x01,
            0x14, 0x00, 0x00, 0x00,
            0x16, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00,
        ];

        let package = Package::new(Cursor::new(input))?;
        assert!(package.root().children().is_empty());
        assert_eq!(package.info().data_length, 0);
        assert_eq!(package.info().header_length, 20);

        Ok(())
    }

    #[test]
    fn read_package_with_entry() -> Result<()> {
        let package = Package::new(Cursor::new(HELLO_PACKAGE))?;
        assert_eq!(package.info().file_table_length, 28);
        assert!(!package.info().file_table_compressed);

        let node = package.find_file("hello.txt").expect("file should exist");
        assert_eq!(package.node_info(node).size, 5);

        let mut buffer = String::new();
        package
            .open_file(node, AccessStrategy::Random)?
            .read_to_string(&mut buffer)?;
        assert_eq!(buffer, "hello");

        Ok(())
    }

    #[test]
    fn read_legacy_package() -> Result<()> {
        #[rustfmt::skip]
        let input = [
            // Header (16)
            0xCC, 0x4D, 0x6F, 0x78, 0x31, 0x00, 0x10, 0x01,
            0x13, 0x00, 0x00, 0x00,
            0x2B, 0x00, 0x00, 0x00,
            // Data (3)
            0x61, 0x62, 0x63,
            // File table (24)
            0x01, 0x00,
            0x05, 0x00, 0x00, 0x00,
            0x61, 0x2E, 0x62, 0x69, 0x6E,
            0x01,
            0x10, 0x00, 0x00, 0x00,
            0x03, 0x00, 0x00, 0x00,
            0x03, 0x00, 0x00, 0x00,
        ];

        let package = Package::new(Cursor::new(input))?;
        assert_eq!(package.info().version, 0x0110);
        assert_eq!(package.info().header_length, 16);

        let mut buffer = Vec::new();
        package
            .open_path("a.bin", AccessStrategy::Sequential)?
            .read_to_end(&mut buffer)?;
        assert_eq!(buffer, b"abc");

        Ok(())
    }

    #[test]
    fn read_rejects_table_past_end() {
        let mut input = HELLO_PACKAGE;
        input[12] = 0x36;

        let err = Package::new(Cursor::new(input)).unwrap_err();
        assert!(matches!(
            err.as_format(),
            Some(FormatError::TableOutOfBounds { .. })
        ));
    }

    #[test]
    fn read_rejects_data_inside_table() {
        let mut input = HELLO_PACKAGE;
        // Offset 0x16 puts the last bytes of the file into the table
        input[41] = 0x16;

        let err = Package::new(Cursor::new(input)).unwrap_err();
        assert_eq!(
            err.as_format(),
            Some(&FormatError::DataOutOfBounds("hello.txt".into()))
        );
    }

    #[test]
    fn read_rejects_truncated_table() {
        let mut input = HELLO_PACKAGE.to_vec();
        input.truncate(50);
        input[12] = 0x32;

        let err = Package::new(Cursor::new(input)).unwrap_err();
        assert_eq!(err.as_format(), Some(&FormatError::Truncated));
    }

    #[test]
    fn open_directory_is_not_found() -> Result<()> {
        let package = Package::new(Cursor::new(HELLO_PACKAGE))?;

        let err = package
            .open_file(package.root(), AccessStrategy::Sequential)
            .unwrap_err();
        assert!(matches!(err, Error::FileNotFound(_)));

        let err = package
            .open_path("missing.txt", AccessStrategy::Sequential)
            .unwrap_err();
        assert!(matches!(err, Error::FileNotFound(_)));

        Ok(())
    }

    #[test]
    fn read_rejects_truncated_header() {
        let err = Package::new(Cursor::new(&HELLO_PACKAGE[..12])).unwrap_err();
        assert_eq!(err.as_format(), Some(&FormatError::Truncated));
    }

    #[test]
    fn read_rejects_path_like_names() {
        for name in [b"../evil.t", b"..\\evil.t", b"dir/a.txt"] {
            let mut input = HELLO_PACKAGE;
            input[31..40].copy_from_slice(name);

            let err = Package::new(Cursor::new(input)).unwrap_err();
            assert_eq!(err.as_format(), Some(&FormatError::InvalidName));
        }
    }

    #[cfg(not(feature = "deflate"))]
    #[test]
    fn read_flagged_package_is_unsupported() {
        let mut input = HELLO_PACKAGE;
        input[16] = 0x02;

        let err = Package::new(Cursor::new(input)).unwrap_err();
        assert!(matches!(err, Error::FeatureUnsupported(_)));
    }

    #[cfg(not(feature = "deflate"))]
    #[test]
    fn open_compressed_file_is_unsupported() -> Result<()> {
        let mut input = HELLO_PACKAGE;
        input[40] = 0x09;

        let package = Package::new(Cursor::new(input))?;
        let node = package.find_file("hello.txt").expect("file should exist");
        for strategy in [AccessStrategy::Sequential, AccessStrategy::Random] {
            let err = package.open_file(node, strategy).unwrap_err();
            assert!(matches!(err, Error::FeatureUnsupported(_)));
        }

        Ok(())
    }
}
