//! On-disk structures shared by the package reader and the builder.

use std::io::{self, Read, Write};

use binrw::{BinRead, BinWrite};
use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, FormatError, Result};

/// Magic bytes every package starts with
pub const MAGIC: [u8; 6] = *b"\xCCMox1\0";

/// Version of the legacy header without a flags field
pub const VERSION_LEGACY: u16 = 0x0110;

/// Version written by [`crate::write::PackageBuilder`]
pub const VERSION_CURRENT: u16 = 0x0111;

/// Size of [`CommonHeader`] on disk
pub const COMMON_HEADER_SIZE: u64 = 8;

/// Directories nested deeper than this are rejected while parsing
pub const MAX_DEPTH: usize = 256;

/// Magic and version preceding every header variant
#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq)]
#[brw(magic = b"\xCCMox1\0", little)]
pub struct CommonHeader {
    /// Selects the header layout that follows
    pub format_version: u16,
}

/// Header of version `0x0110` packages
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct LegacyHeader {
    pub file_table_begin: u32,
    pub file_table_end: u32,
}

/// Header of version `0x0111` packages
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct Header {
    /// Absolute offset of the file table
    pub file_table_begin: u32,

    /// Absolute offset one past the end of the file table
    pub file_table_end: u32,

    /// Raw [`HeaderFlags`] bits
    pub flags: u32,
}

bitflags! {
    /// Feature bits of a version `0x0111` header
    #[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
    pub struct HeaderFlags: u32 {
        const FILE_TABLE_COMPRESSED = 0x01;
        const USES_DEFLATE = 0x02;
    }
}

bitflags! {
    /// Type byte stored after every node name
    #[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
    pub struct NodeFlags: u8 {
        const FILE = 0x01;
        const DIRECTORY = 0x02;
        const SYSTEM = 0x04;
        const COMPRESSED = 0x08;
    }
}

impl Header {
    pub fn flags(&self) -> HeaderFlags {
        HeaderFlags::from_bits_retain(self.flags)
    }
}

impl From<LegacyHeader> for Header {
    fn from(value: LegacyHeader) -> Self {
        Header {
            file_table_begin: value.file_table_begin,
            file_table_end: value.file_table_end,
            flags: 0,
        }
    }
}

/// Full size of the headers for `version`, if the version is known
pub fn header_size(version: u16) -> Option<u64> {
    match version {
        VERSION_LEGACY => Some(COMMON_HEADER_SIZE + 8),
        VERSION_CURRENT => Some(COMMON_HEADER_SIZE + 12),
        _ => None,
    }
}

/// Reads the common header and the versioned header after it, normalized to [`Header`]
#[tracing::instrument(skip(reader), err)]
pub fn read_header<R: Read + io::Seek>(reader: &mut R) -> Result<(u16, Header)> {
    let common = CommonHeader::read(reader)?;

    let header = match common.format_version {
        VERSION_LEGACY => LegacyHeader::read(reader)?.into(),
        VERSION_CURRENT => Header::read(reader)?,
        other => return Err(FormatError::UnsupportedVersion(other).into()),
    };

    Ok((common.format_version, header))
}

/// Location of a file's payload inside the data segment
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct FileLocation {
    /// Whether the payload is a zlib stream
    pub compressed: bool,

    /// Absolute offset of the payload
    pub offset: u64,

    /// Number of payload bytes stored in the package
    pub compressed_size: u64,

    /// Number of bytes the file has once decompressed
    pub size: u64,
}

/// What a [`Node`] holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    File(FileLocation),
    Directory(Vec<Node>),
}

/// An entry of the file table
///
/// Only the location of file data is kept, never the data itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub(crate) name: Box<str>,
    pub(crate) kind: NodeKind,
}

impl Node {
    pub(crate) fn file(name: impl Into<Box<str>>, location: FileLocation) -> Self {
        Node {
            name: name.into(),
            kind: NodeKind::File(location),
        }
    }

    pub(crate) fn directory(name: impl Into<Box<str>>, children: Vec<Node>) -> Self {
        Node {
            name: name.into(),
            kind: NodeKind::Directory(children),
        }
    }

    /// Name of the node, empty for the root
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.kind, NodeKind::Directory(_))
    }

    /// Payload location, `None` for directories
    pub fn location(&self) -> Option<&FileLocation> {
        match &self.kind {
            NodeKind::File(location) => Some(location),
            NodeKind::Directory(_) => None,
        }
    }

    /// Children in stored order, empty for files
    pub fn children(&self) -> &[Node] {
        match &self.kind {
            NodeKind::File(_) => &[],
            NodeKind::Directory(children) => children,
        }
    }

    /// First child named `name` whose kind matches `want_directory`, by linear scan
    ///
    /// An empty name refers to the node itself when looking for a directory.
    pub fn find(&self, name: &str, want_directory: bool) -> Option<&Node> {
        if name.is_empty() {
            return (want_directory && self.is_directory()).then_some(self);
        }

        self.children()
            .iter()
            .find(|child| child.name() == name && child.is_directory() == want_directory)
    }
}

pub(crate) fn truncated(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        FormatError::Truncated.into()
    } else {
        e.into()
    }
}

/// Reads a `u32` length prefixed UTF-8 string
pub fn read_string<R: Read>(reader: &mut R) -> Result<String> {
    let length = reader.read_u32::<LittleEndian>().map_err(truncated)? as u64;

    let mut raw = Vec::new();
    reader.take(length).read_to_end(&mut raw)?;
    if (raw.len() as u64) < length {
        return Err(FormatError::Truncated.into());
    }

    String::from_utf8(raw).map_err(|_| FormatError::InvalidName.into())
}

/// Writes a `u32` length prefixed UTF-8 string
pub fn write_string<W: Write>(writer: &mut W, value: &str) -> Result<()> {
    let length = u32::try_from(value.len()).map_err(|_| Error::Overflow {
        field: "name length",
        value: value.len() as u64,
    })?;
    writer.write_u32::<LittleEndian>(length)?;
    writer.write_all(value.as_bytes())?;
    Ok(())
}

/// Whether `name` names a single entry, rather than a path or a relative reference
pub fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

/// Reads one node and, for directories, everything below it
pub fn read_node<R: Read>(reader: &mut R, depth: usize) -> Result<Node> {
    if depth > MAX_DEPTH {
        return Err(FormatError::TooDeep.into());
    }

    let name = read_string(reader)?;
    if !is_plain_name(&name) {
        return Err(FormatError::InvalidName.into());
    }

    let raw = reader.read_u8().map_err(truncated)?;
    let flags = NodeFlags::from_bits(raw).ok_or(FormatError::InvalidNodeType(raw))?;

    if flags.contains(NodeFlags::FILE) && !flags.contains(NodeFlags::DIRECTORY) {
        let offset = reader.read_u32::<LittleEndian>().map_err(truncated)?;
        let compressed_size = reader.read_u32::<LittleEndian>().map_err(truncated)?;
        let size = reader.read_u32::<LittleEndian>().map_err(truncated)?;

        let location = FileLocation {
            compressed: flags.contains(NodeFlags::COMPRESSED),
            offset: offset as u64,
            compressed_size: compressed_size as u64,
            size: size as u64,
        };
        if !location.compressed && location.compressed_size != location.size {
            return Err(FormatError::SizeMismatch(name).into());
        }

        tracing::trace!(name, ?location, "file node");
        Ok(Node::file(name, location))
    } else if flags.contains(NodeFlags::DIRECTORY)
        && !flags.intersects(NodeFlags::FILE | NodeFlags::COMPRESSED)
    {
        let count = reader.read_u16::<LittleEndian>().map_err(truncated)?;
        let children = read_children(reader, count, depth + 1)?;

        tracing::trace!(name, count, "directory node");
        Ok(Node::directory(name, children))
    } else {
        Err(FormatError::InvalidNodeType(raw).into())
    }
}

/// Reads `count` consecutive nodes
pub fn read_children<R: Read>(reader: &mut R, count: u16, depth: usize) -> Result<Vec<Node>> {
    (0..count).map(|_| read_node(reader, depth)).collect()
}

fn to_u32(field: &'static str, value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::Overflow { field, value })
}

/// Writes one node and, for directories, everything below it
pub fn write_node<W: Write>(writer: &mut W, node: &Node) -> Result<()> {
    write_string(writer, node.name())?;

    match node.kind() {
        NodeKind::File(location) => {
            let mut flags = NodeFlags::FILE;
            flags.set(NodeFlags::COMPRESSED, location.compressed);

            writer.write_u8(flags.bits())?;
            writer.write_u32::<LittleEndian>(to_u32("offset", location.offset)?)?;
            writer.write_u32::<LittleEndian>(to_u32(
                "compressed size",
                location.compressed_size,
            )?)?;
            writer.write_u32::<LittleEndian>(to_u32("size", location.size)?)?;
        }
        NodeKind::Directory(children) => {
            writer.write_u8(NodeFlags::DIRECTORY.bits())?;
            write_children(writer, children)?;
        }
    }

    Ok(())
}

/// Writes a `u16` child count followed by the children
pub fn write_children<W: Write>(writer: &mut W, children: &[Node]) -> Result<()> {
    let count = u16::try_from(children.len()).map_err(|_| Error::Overflow {
        field: "child count",
        value: children.len() as u64,
    })?;
    writer.write_u16::<LittleEndian>(count)?;

    children.iter().try_for_each(|child| write_node(writer, child))
}
