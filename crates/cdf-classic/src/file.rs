//! In-memory representation of a classic file
//!
//! An [`NcFile`] is the entity store behind every read and write path:
//! ordered dimensions, global attributes, and variables kept in
//! canonical order (fixed-size variables first, then record variables,
//! each group in declaration order). A file can be virtual (schema and
//! data in memory only), open for write, or open for read.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{debug, warn};

use crate::dimension::Dimension;
use crate::error::{Error, Result};
use crate::layout;
use crate::reader::{self, ReadOptions};
use crate::types::{NcType, Version};
use crate::value::{Attribute, Values};
use crate::variable::{DataStore, Variable};
use crate::writer;

/// Options for creating a file for write
#[derive(Debug, Clone, Copy)]
pub struct WriteOptions {
    /// File format version to emit
    pub version: Version,
    /// Whether variable access applies the mask-and-scale transform
    pub mask_and_scale: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            version: Version::Classic,
            mask_and_scale: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Virtual,
    Write,
    Read,
}

/// A classic NetCDF file
pub struct NcFile {
    pub(crate) version: Version,
    pub(crate) dims: Vec<Dimension>,
    pub(crate) gatts: Vec<Attribute>,
    pub(crate) variables: Vec<Variable>,
    pub(crate) numrecs: Option<usize>,
    pub(crate) mask_and_scale: bool,
    pub(crate) mode: Mode,
    pub(crate) fp: Option<File>,
    /// On-disk size, known for files opened for read
    pub(crate) file_len: Option<u64>,
    dirty: bool,
}

impl NcFile {
    /// Create a virtual file: schema and data live in memory until
    /// streamed or built explicitly
    pub fn new(version: Version) -> Self {
        Self {
            version,
            dims: Vec::new(),
            gatts: Vec::new(),
            variables: Vec::new(),
            numrecs: None,
            mask_and_scale: false,
            mode: Mode::Virtual,
            fp: None,
            file_len: None,
            dirty: false,
        }
    }

    /// Create a classic (CDF-1) file for writing
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::create_with(path, WriteOptions::default())
    }

    /// Create a file for writing with explicit options
    pub fn create_with(path: impl AsRef<Path>, options: WriteOptions) -> Result<Self> {
        let path = path.as_ref();
        let fp = File::create(path)?;
        debug!(path = %path.display(), version = options.version.byte(), "created file");
        let mut nc = Self::new(options.version);
        nc.mask_and_scale = options.mask_and_scale;
        nc.mode = Mode::Write;
        nc.fp = Some(fp);
        Ok(nc)
    }

    /// Open an existing file for reading, memory-mapped
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, &ReadOptions::default())
    }

    /// Open an existing file for reading with explicit options
    pub fn open_with(path: impl AsRef<Path>, options: &ReadOptions) -> Result<Self> {
        reader::open_path(path.as_ref(), options)
    }

    /// Parse a file image from memory, reading all data eagerly
    pub fn parse(data: &[u8]) -> Result<Self> {
        reader::parse_slice(data)
    }

    /// Encode the whole file (header and data region) to bytes
    pub fn build(&self) -> Result<Vec<u8>> {
        writer::build_bytes(self)
    }

    /// File format version
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Dimensions in declaration order
    pub fn dimensions(&self) -> &[Dimension] {
        &self.dims
    }

    /// Look up a dimension by name
    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dims.iter().find(|d| d.name() == name)
    }

    /// The unlimited dimension, if one was declared
    pub fn unlimited_dimension(&self) -> Option<&Dimension> {
        self.dims.iter().find(|d| d.is_unlimited())
    }

    /// Variables in canonical order
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    /// Look up a variable by name
    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name() == name)
    }

    /// Look up a variable for mutation
    pub fn variable_mut(&mut self, name: &str) -> Option<&mut Variable> {
        self.dirty = true;
        self.variables.iter_mut().find(|v| v.name() == name)
    }

    /// Global attributes in declaration order
    pub fn attributes(&self) -> &[Attribute] {
        &self.gatts
    }

    /// Look up a global attribute value by name
    pub fn attr(&self, name: &str) -> Option<&Values> {
        self.gatts
            .iter()
            .find(|a| a.name == name)
            .map(|a| &a.values)
    }

    /// Set or replace a global attribute
    pub fn set_attr(&mut self, name: &str, values: impl Into<Values>) {
        self.dirty = true;
        let values = values.into();
        match self.gatts.iter_mut().find(|a| a.name == name) {
            Some(attr) => attr.values = values,
            None => self.gatts.push(Attribute::new(name, values)),
        }
    }

    /// Declare a dimension; `None` (or zero) length means unlimited
    ///
    /// The unlimited dimension must be declared before any other
    /// dimension, and only one may exist.
    pub fn create_dimension(&mut self, name: &str, length: Option<usize>) -> Result<()> {
        let length = length.filter(|&len| len > 0);
        if length.is_none() && !self.dims.is_empty() {
            return Err(Error::InvalidShape(format!(
                "unlimited dimension '{name}' must be the first dimension of the file",
            )));
        }
        if self.dimension(name).is_some() {
            return Err(Error::AlreadyExists(format!("dimension '{name}'")));
        }
        self.dirty = true;
        self.dims.push(Dimension::new(name, length));
        Ok(())
    }

    /// Declare a variable over existing dimensions
    pub fn create_variable(
        &mut self,
        name: &str,
        kind: NcType,
        dims: &[&str],
    ) -> Result<&mut Variable> {
        self.create_variable_with_attrs(name, kind, dims, Vec::new())
    }

    /// Declare a variable with initial attributes
    pub fn create_variable_with_attrs(
        &mut self,
        name: &str,
        kind: NcType,
        dims: &[&str],
        attrs: Vec<Attribute>,
    ) -> Result<&mut Variable> {
        if self.variable(name).is_some() {
            return Err(Error::AlreadyExists(format!("variable '{name}'")));
        }
        let mut declared_shape = Vec::with_capacity(dims.len());
        for (position, dim_name) in dims.iter().enumerate() {
            let dim = self
                .dimension(dim_name)
                .ok_or_else(|| Error::NotFound(format!("dimension '{dim_name}'")))?;
            if dim.is_unlimited() && position != 0 {
                return Err(Error::InvalidShape(format!(
                    "unlimited dimension '{dim_name}' must be the first dimension of \
                     variable '{name}', got position {position}",
                )));
            }
            declared_shape.push(dim.length());
        }

        let initial: usize = declared_shape.iter().map(|len| len.unwrap_or(0)).product();
        let var = Variable::new(
            name,
            kind,
            dims.iter().map(|d| (*d).to_string()).collect(),
            declared_shape,
            attrs,
            DataStore::Owned(Values::zeros(kind, initial)),
            self.mask_and_scale,
        );

        // Canonical order: fixed variables first, record variables last,
        // each group in declaration order.
        let index = if var.is_record() {
            self.variables.len()
        } else {
            self.variables
                .iter()
                .position(Variable::is_record)
                .unwrap_or(self.variables.len())
        };
        self.dirty = true;
        self.variables.insert(index, var);
        Ok(&mut self.variables[index])
    }

    /// Fix the record count explicitly
    pub fn set_numrecs(&mut self, numrecs: usize) {
        self.dirty = true;
        self.numrecs = Some(numrecs);
    }

    /// Explicitly set record count, if any
    pub const fn numrecs(&self) -> Option<usize> {
        self.numrecs
    }

    /// Record count to encode: the explicit value when set, otherwise
    /// the longest record-variable buffer, otherwise unknown
    pub(crate) fn effective_numrecs(&self) -> Option<usize> {
        if self.numrecs.is_some() {
            return self.numrecs;
        }
        self.variables
            .iter()
            .filter(|v| v.is_record())
            .map(Variable::rows)
            .filter(|&rows| rows > 0)
            .max()
    }

    /// Whether the file declares any record variables
    pub(crate) fn has_record_vars(&self) -> bool {
        self.variables.iter().any(Variable::is_record)
    }

    /// Size of the file in bytes
    ///
    /// For a file on disk this is its actual size. For a virtual file it
    /// is the size the file will have once written; this needs a record
    /// count, so it fails with [`Error::NumrecsUnset`] when record
    /// variables exist but no count was set or written.
    pub fn filesize(&self) -> Result<u64> {
        if let Some(len) = self.file_len {
            return Ok(len);
        }
        let layout = layout::compute(self);
        if let Some(records_begin) = layout.records_begin {
            let recs = self.effective_numrecs().ok_or(Error::NumrecsUnset)? as u64;
            return Ok(records_begin + recs * layout.recsize);
        }
        Ok(layout
            .vars
            .last()
            .map_or(layout.header_len, |last| last.begin + last.vsize))
    }

    /// Switch the mask-and-scale transform on or off for the file and
    /// all of its variables
    pub fn set_mask_and_scale(&mut self, enabled: bool) {
        self.mask_and_scale = enabled;
        for var in &mut self.variables {
            var.mask_and_scale = enabled;
        }
    }

    /// Write the in-memory file to disk, when open for write
    pub fn flush(&mut self) -> Result<()> {
        if self.mode != Mode::Write || self.fp.is_none() {
            return Ok(());
        }
        let bytes = writer::build_bytes(self)?;
        let fp = self.fp.as_mut().ok_or(Error::NotWritable)?;
        fp.set_len(0)?;
        fp.seek(SeekFrom::Start(0))?;
        fp.write_all(&bytes)?;
        fp.flush()?;
        self.dirty = false;
        debug!(bytes = bytes.len(), "flushed file");
        Ok(())
    }

    /// Alias of [`NcFile::flush`]
    pub fn sync(&mut self) -> Result<()> {
        self.flush()
    }

    /// Flush pending writes and release the file handle
    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        self.fp = None;
        Ok(())
    }
}

impl Drop for NcFile {
    fn drop(&mut self) {
        if self.dirty && self.mode == Mode::Write {
            if let Err(err) = self.flush() {
                warn!(%err, "flush on drop failed");
            }
        }
    }
}

impl std::fmt::Debug for NcFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NcFile")
            .field("version", &self.version)
            .field("dims", &self.dims)
            .field("gatts", &self.gatts)
            .field("variables", &self.variables)
            .field("numrecs", &self.numrecs)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_order_places_fixed_variables_first() {
        let mut nc = NcFile::new(Version::Classic);
        nc.create_dimension("t", None).unwrap();
        nc.create_dimension("x", Some(2)).unwrap();
        nc.create_variable("rec_a", NcType::Int, &["t", "x"]).unwrap();
        nc.create_variable("fixed_a", NcType::Int, &["x"]).unwrap();
        nc.create_variable("rec_b", NcType::Int, &["t"]).unwrap();
        nc.create_variable("fixed_b", NcType::Int, &["x"]).unwrap();

        let names: Vec<&str> = nc.variables().iter().map(Variable::name).collect();
        assert_eq!(names, ["fixed_a", "fixed_b", "rec_a", "rec_b"]);
    }

    #[test]
    fn non_first_unlimited_dimension_rejected() {
        let mut nc = NcFile::new(Version::Classic);
        nc.create_dimension("n1", Some(4)).unwrap();
        let err = nc.create_dimension("n2", None).unwrap_err();
        assert!(matches!(err, Error::InvalidShape(_)));
        assert_eq!(nc.dimensions().len(), 1);
    }

    #[test]
    fn unlimited_dimension_must_lead_variable_shape() {
        let mut nc = NcFile::new(Version::Classic);
        nc.create_dimension("n1", None).unwrap();
        nc.create_dimension("n2", Some(10)).unwrap();
        let err = nc
            .create_variable("data1", NcType::Double, &["n2", "n1"])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidShape(_)));
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut nc = NcFile::new(Version::Classic);
        nc.create_dimension("x", Some(2)).unwrap();
        let err = nc.create_dimension("x", Some(3)).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
        nc.create_variable("v", NcType::Int, &["x"]).unwrap();
        let err = nc.create_variable("v", NcType::Int, &["x"]).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[test]
    fn unknown_dimension_rejected() {
        let mut nc = NcFile::new(Version::Classic);
        let err = nc.create_variable("v", NcType::Int, &["ghost"]).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn filesize_without_record_variables() {
        let mut nc = NcFile::new(Version::Classic);
        nc.create_dimension("x", Some(2)).unwrap();
        nc.create_variable("v", NcType::Short, &["x"]).unwrap();
        let layout = crate::layout::compute(&nc);
        assert_eq!(nc.filesize().unwrap(), layout.header_len + 4);
    }

    #[test]
    fn filesize_with_record_variables() {
        let mut nc = NcFile::new(Version::Classic);
        nc.create_dimension("t", None).unwrap();
        nc.create_dimension("x", Some(2)).unwrap();
        nc.create_variable("v", NcType::Int, &["t", "x"]).unwrap();

        // Never set, no data written: the record count is unknowable.
        assert!(matches!(nc.filesize(), Err(Error::NumrecsUnset)));

        // Zero records: the file ends right where the record region starts.
        nc.set_numrecs(0);
        let layout = crate::layout::compute(&nc);
        assert_eq!(nc.filesize().unwrap(), layout.records_begin.unwrap());

        nc.set_numrecs(5);
        assert_eq!(
            nc.filesize().unwrap(),
            layout.records_begin.unwrap() + 5 * layout.recsize
        );
    }

    #[test]
    fn numrecs_derived_from_written_data() {
        let mut nc = NcFile::new(Version::Classic);
        nc.create_dimension("t", None).unwrap();
        nc.create_dimension("x", Some(2)).unwrap();
        let var = nc.create_variable("v", NcType::Int, &["t", "x"]).unwrap();
        var.set_all(Values::Int(vec![1, 2, 3, 4, 5, 6])).unwrap();
        assert_eq!(nc.effective_numrecs(), Some(3));
        assert!(nc.filesize().is_ok());
    }
}
