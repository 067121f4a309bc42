//! Error types for classic file parsing and building

use thiserror::Error;

/// Errors that can occur when reading or writing classic NetCDF files
#[derive(Error, Debug)]
pub enum Error {
    /// File does not start with the `CDF` magic bytes
    #[error("not a NetCDF classic file: magic {0:?}")]
    NotNetcdf([u8; 3]),

    /// Version byte is neither 1 (classic) nor 2 (64-bit offset)
    #[error("unknown NetCDF version byte: {0}")]
    UnknownVersion(u8),

    /// An array slot in the header carried an unexpected tag
    #[error("unexpected tag {found:#010x} while reading {expected}")]
    UnexpectedTag {
        /// Grammar element being decoded
        expected: &'static str,
        /// Tag value found in the stream
        found: u32,
    },

    /// A length prefix or element count was negative
    #[error("negative count {0} in header")]
    NegativeCount(i32),

    /// The stream ended in the middle of a field or data region
    #[error("truncated file while reading {0}")]
    Truncated(&'static str),

    /// A variable referenced a dimension id past the dimension list
    #[error("dimension id {id} out of range (file has {count} dimensions)")]
    DimIdOutOfRange {
        /// Offending dimension id
        id: usize,
        /// Number of dimensions in the file
        count: usize,
    },

    /// Type tag outside the six classic element types
    #[error("unsupported NetCDF type tag {0:#010x}")]
    UnsupportedType(u32),

    /// Unlimited dimension misuse or a shape/value mismatch
    #[error("invalid shape: {0}")]
    InvalidShape(String),

    /// `filesize` needs a record count that was never set or written
    #[error("the number of records is not set, cannot compute the file size")]
    NumrecsUnset,

    /// Attempt to mutate data backed by a read-only memory map
    #[error("variable data is read-only (backed by a memory map)")]
    NotWritable,

    /// Named dimension or variable does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// Dimension or variable name collision
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// A streaming chunk violated the layout contract
    #[error("stream chunk mismatch: {0}")]
    ChunkMismatch(String),

    /// Header structure violates the grammar in some other way
    #[error("malformed header: {0}")]
    Header(String),

    /// Invalid UTF-8 in a dimension, variable, or attribute name
    #[error("invalid UTF-8 in name: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<binrw::Error> for Error {
    fn from(err: binrw::Error) -> Self {
        match err {
            // Domain errors raised inside BinRead/BinWrite impls travel
            // boxed in the Custom variant; unwrap them back.
            binrw::Error::Custom { err, .. } => match err.downcast::<Self>() {
                Ok(domain) => *domain,
                Err(_) => Self::Header("unrecognized codec error".to_string()),
            },
            binrw::Error::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
                Self::Truncated("header")
            }
            binrw::Error::Io(io) => Self::Io(io),
            other => Self::Header(other.to_string()),
        }
    }
}

/// Type alias for classic file operation results
pub type Result<T> = std::result::Result<T, Error>;
