//! This library handles reading from and building **Moxillan** packages.
//!
//! # Package Format Documentation
//!
//! A package is a single binary blob holding a tree of named files and directories. File
//! payloads may be stored as they are or as zlib streams, and the file table describing
//! the tree may itself be compressed. Packages are built once and read many times; there is
//! no in-place modification.
//!
//! ## File Structure
//!
//! A package consists of a header, followed by the data segment holding every file payload,
//! followed by the file table.
//!
//! | Offset (bytes) | Field             | Description                                              |
//! |----------------|-------------------|----------------------------------------------------------|
//! | 0x0000         | Magic             | 6 bytes: `CC 4D 6F 78 31 00`                             |
//! | 0x0006         | Version           | 2 bytes: `0x0110` (legacy) or `0x0111` (current)         |
//! | 0x0008         | File Table Begin  | 4 bytes: Absolute offset of the file table               |
//! | 0x000C         | File Table End    | 4 bytes: Absolute offset one past the file table         |
//! | 0x0010         | Flags             | 4 bytes: Only present in version `0x0111`                |
//!
//! ### Header
//!
//! - **Magic**: identifies the file type, the trailing NUL is part of it.
//! - **Version**: selects the header layout. Legacy headers are 16 bytes long and have no
//!   flags, current headers are 20 bytes long. Other versions are rejected.
//! - **Flags**:
//!   - `0x01`: the file table is compressed
//!   - `0x02`: at least one file payload is compressed
//!
//! ### Data Segment
//!
//! Spans from the end of the header to the start of the file table. Every file's payload is a
//! contiguous range inside it.
//!
//! ### File Table
//!
//! Starts with the `u16` number of children of the root directory, followed by that many
//! nodes. When the table is compressed, everything after the root count is a single zlib
//! stream. Each node has the following structure:
//!
//! | Field        | Description                                                     |
//! |--------------|-----------------------------------------------------------------|
//! | Name         | `u32` byte length followed by that many UTF-8 bytes             |
//! | Type         | 1 byte: `0x01` file, `0x02` directory, `0x04` system, `0x08` compressed |
//! | File         | `u32` offset, `u32` compressed size, `u32` size                 |
//! | Directory    | `u16` child count followed by the children                      |
//!
//! ## Additional Information
//!
//! - **Endianness**: Little-endian for all multi-byte integers
//! - **Paths**: segments separated by `/` or `\`, empty segments are ignored
//! - **Compression**: zlib, levels `0` (stored) to `9`
//!
//! ```
//! # fn doit() -> moxillan::error::Result<()>
//! # {
//! use std::io::{Cursor, Read};
//! use moxillan::{build_package, AccessStrategy, BuildOptions, Package};
//! use moxillan::source::{Directory, MemoryFile};
//!
//! let root = Directory::new("")
//!     .with(Directory::new("docs").with(MemoryFile::new("readme.txt", "hello")));
//! let mut output = build_package(&root, Cursor::new(Vec::new()), BuildOptions::default())?;
//! output.set_position(0);
//!
//! let package = Package::new(output)?;
//! let mut contents = String::new();
//! package
//!     .open_path("docs/readme.txt", AccessStrategy::Sequential)?
//!     .read_to_string(&mut contents)?;
//! assert_eq!(contents, "hello");
//! # Ok(())
//! # }
//! # doit().unwrap();
//! ```

pub mod compression;
pub mod error;
pub mod format;
pub mod read;
pub mod source;
pub mod stream;
pub mod write;

pub use compression::CompressionHint;
pub use format::{Node, NodeKind};
pub use read::{DirEntry, Package, PackageInfo};
pub use stream::{AccessStrategy, PackageFile};
pub use write::{build_package, BuildOptions, PackageBuilder};
