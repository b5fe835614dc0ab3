//! Error types that can be emitted from this library

use miette::Diagnostic;
use thiserror::Error;

/// Error type for library
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// Transparent warpper for [`std::io::Error`]
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// Transparent warpper for [`binrw::Error`]
    #[error(transparent)]
    BinRWError(binrw::Error),

    /// input is not a well formed package
    #[error("input is not a valid moxillan package")]
    #[diagnostic(code(moxillan::format))]
    Format(#[from] FormatError),

    /// unable to find requested file
    #[error("unable to find requested node")]
    #[diagnostic(code(moxillan::not_found))]
    FileNotFound(#[from] FileNotFoundError),

    /// {0}
    #[error("{0} is not supported")]
    #[diagnostic(code(moxillan::unsupported))]
    FeatureUnsupported(&'static str),

    /// a builder source cannot be represented in a package
    #[error("invalid source `{name}`: {reason}")]
    #[diagnostic(code(moxillan::invalid_source))]
    InvalidSource { name: String, reason: &'static str },

    /// a value does not fit into its on-disk field
    #[error("{field} of {value} does not fit into 32 bits")]
    #[diagnostic(code(moxillan::overflow))]
    Overflow { field: &'static str, value: u64 },
}

/// Structural problems found while parsing a package
#[derive(Error, Diagnostic, Debug, PartialEq, Eq)]
pub enum FormatError {
    #[error("bad magic number")]
    InvalidMagic,

    #[error("unsupported package version: {0:#06x}")]
    UnsupportedVersion(u16),

    #[error("unexpected end of package")]
    Truncated,

    #[error("file table [{begin}, {end}) lies outside the package (length {length})")]
    TableOutOfBounds { begin: u64, end: u64, length: u64 },

    #[error("invalid node type {0:#04x}")]
    InvalidNodeType(u8),

    #[error("invalid node name")]
    InvalidName,

    #[error("uncompressed file `{0}` has differing stored and logical sizes")]
    SizeMismatch(String),

    #[error("data of `{0}` lies outside the data segment")]
    DataOutOfBounds(String),

    #[error("directory nesting is too deep")]
    TooDeep,

    #[error("compressed data ended after {actual} of {expected} bytes")]
    TruncatedData { expected: u64, actual: u64 },
}

/// Error type to provide further information when a node has not been found
#[derive(Error, Diagnostic, Debug)]
#[error("unable to find requested node")]
pub enum FileNotFoundError {
    /// by path {0}
    #[error("by path {0}")]
    Path(String),

    /// {0} is a directory
    #[error("{0} is a directory")]
    Directory(String),
}

impl From<binrw::Error> for Error {
    fn from(value: binrw::Error) -> Self {
        // Field errors arrive wrapped in backtraces
        if value.is_eof() {
            return Error::Format(FormatError::Truncated);
        }
        if matches!(value.root_cause(), binrw::Error::BadMagic { .. }) {
            return Error::Format(FormatError::InvalidMagic);
        }

        match value {
            binrw::Error::Io(e) => Error::IOError(e),
            other => Error::BinRWError(other),
        }
    }
}

impl Error {
    /// Returns the structural problem, if this error describes one
    pub fn as_format(&self) -> Option<&FormatError> {
        match self {
            Error::Format(e) => Some(e),
            _ => None,
        }
    }
}

/// Generic result type with crate's Error as its error variant
pub type Result<T> = core::result::Result<T, Error>;
