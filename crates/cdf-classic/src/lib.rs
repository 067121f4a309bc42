//! Reader and writer for NetCDF classic files
//!
#![allow(clippy::cast_possible_truncation)] // Intentional for binary format fields
#![allow(clippy::cast_possible_wrap)] // Intentional for binary operations
#![allow(clippy::cast_lossless)] // Sometimes clearer than From
#![allow(clippy::float_cmp)] // Sentinel comparisons are bit-exact
#![allow(clippy::module_name_repetitions)] // Clear naming is preferred
//! This crate provides a symmetric (reader and writer) implementation of
//! the NetCDF classic binary format: CDF-1 ("classic") and CDF-2
//! ("64-bit offset") files. A file is a self-describing container of
//! named dimensions, typed multidimensional variables over those
//! dimensions, and attributes at file and variable scope. Variables over
//! the unlimited dimension grow record by record, interleaved in a
//! shared record region.
//!
//! NetCDF-4/HDF5 files are not supported.
//!
//! # Writing
//!
//! ```rust,no_run
//! use cdf_classic::{NcFile, NcType, Values};
//!
//! fn main() -> cdf_classic::Result<()> {
//!     let mut nc = NcFile::create("simple.nc")?;
//!     nc.set_attr("history", "Created for a test");
//!     nc.create_dimension("time", Some(10))?;
//!     let time = nc.create_variable("time", NcType::Int, &["time"])?;
//!     time.set_all(Values::Int((0..10).collect()))?;
//!     time.set_attr("units", "µs since 2008-01-01");
//!     nc.close()?;
//!     Ok(())
//! }
//! ```
//!
//! # Reading
//!
//! Files opened with [`NcFile::open`] are memory-mapped; variable data
//! stays on disk and is decoded to native byte order on access.
//!
//! ```rust,no_run
//! # fn main() -> cdf_classic::Result<()> {
//! let nc = cdf_classic::NcFile::open("simple.nc")?;
//! for var in nc.variables() {
//!     println!("{} {:?} {:?}", var.name(), var.nc_type(), var.shape());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Streaming
//!
//! The streaming pipeline emits a valid file from an iterator of typed
//! chunks without holding any variable in memory:
//!
//! ```rust,no_run
//! use cdf_classic::{NcFile, NcType, Values, Version, stream_to};
//!
//! fn main() -> cdf_classic::Result<()> {
//!     let mut nc = NcFile::new(Version::Classic);
//!     nc.create_dimension("t", None)?;
//!     nc.create_dimension("x", Some(3))?;
//!     nc.create_variable("wave", NcType::Float, &["t", "x"])?;
//!
//!     let records = (0..4).map(|r| Values::Float(vec![r as f32; 3]));
//!     let sink = std::fs::File::create("wave.nc")?;
//!     stream_to(&nc, records, sink)?;
//!     Ok(())
//! }
//! ```
//!
//! # Design notes
//!
//! - All multi-byte values are big-endian on disk; payloads live in
//!   native order in memory and convert at the codec boundary.
//! - Variables iterate in canonical order: fixed-size variables first,
//!   then record variables, each group in declaration order.
//! - Every `vsize` is padded to a 4-byte boundary, except the per-record
//!   size of a file's only record variable, which stays unpadded.

#![warn(missing_docs)]

mod codec;
mod dimension;
mod error;
mod file;
mod header;
mod layout;
mod reader;
mod stream;
mod types;
mod value;
mod variable;
mod writer;

pub use crate::dimension::Dimension;
pub use crate::error::{Error, Result};
pub use crate::file::{NcFile, WriteOptions};
pub use crate::header::CDF_MAGIC;
pub use crate::reader::ReadOptions;
pub use crate::stream::{ByteRun, StreamState, StreamWriter, stream_to};
pub use crate::types::{NcType, Version};
pub use crate::value::{Attribute, Values};
pub use crate::variable::Variable;

/// Symmetric parse/build seam shared by the format entry points
pub trait CdfFormat: Sized {
    /// Parse from a complete file image
    fn parse(data: &[u8]) -> Result<Self>;

    /// Build the complete file image
    fn build(&self) -> Result<Vec<u8>>;

    /// Verify that `data` parses and rebuilds to identical bytes
    fn verify_round_trip(data: &[u8]) -> Result<()> {
        let parsed = Self::parse(data)?;
        let rebuilt = parsed.build()?;
        if data != rebuilt.as_slice() {
            return Err(Error::Header("round-trip verification failed".to_string()));
        }
        Ok(())
    }
}

impl CdfFormat for NcFile {
    fn parse(data: &[u8]) -> Result<Self> {
        crate::reader::parse_slice(data)
    }

    fn build(&self) -> Result<Vec<u8>> {
        crate::writer::build_bytes(self)
    }
}
