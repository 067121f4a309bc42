//! Variables and their data buffers
//!
//! During construction a variable owns its values in native byte order.
//! Files opened with memory mapping expose variable data straight from
//! the shared map instead, big-endian as stored, decoded on access;
//! those buffers are read-only.

use std::sync::Arc;

use memmap2::Mmap;

use crate::error::{Error, Result};
use crate::types::NcType;
use crate::value::{Attribute, Values};

/// A typed, multidimensional variable
#[derive(Debug)]
pub struct Variable {
    pub(crate) name: String,
    pub(crate) kind: NcType,
    pub(crate) dim_names: Vec<String>,
    /// Declared dimension lengths; `None` marks the unlimited slot
    pub(crate) declared_shape: Vec<Option<usize>>,
    pub(crate) attrs: Vec<Attribute>,
    pub(crate) data: DataStore,
    pub(crate) mask_and_scale: bool,
}

/// Backing storage for a variable's values
#[derive(Debug)]
pub(crate) enum DataStore {
    /// Native-order values owned by the variable
    Owned(Values),
    /// Contiguous big-endian region of a shared file mapping
    Mapped(MappedRegion),
    /// Field of the interleaved record region of a shared file mapping
    Record(RecordRegion),
}

#[derive(Debug)]
pub(crate) struct MappedRegion {
    pub map: Arc<Mmap>,
    pub offset: usize,
    pub len: usize,
}

#[derive(Debug)]
pub(crate) struct RecordRegion {
    pub map: Arc<Mmap>,
    /// Offset of the record region (first record variable's `begin`)
    pub start: usize,
    /// Stride between consecutive records
    pub recsize: usize,
    /// Offset of this variable's field inside one record
    pub field_offset: usize,
    /// Unpadded bytes of one record of this variable
    pub row_bytes: usize,
    pub numrecs: usize,
}

impl Variable {
    pub(crate) fn new(
        name: impl Into<String>,
        kind: NcType,
        dim_names: Vec<String>,
        declared_shape: Vec<Option<usize>>,
        attrs: Vec<Attribute>,
        data: DataStore,
        mask_and_scale: bool,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            dim_names,
            declared_shape,
            attrs,
            data,
            mask_and_scale,
        }
    }

    /// Variable name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Element type
    pub const fn nc_type(&self) -> NcType {
        self.kind
    }

    /// Names of the dimensions this variable spans
    pub fn dimensions(&self) -> &[String] {
        &self.dim_names
    }

    /// Attributes in declaration order
    pub fn attributes(&self) -> &[Attribute] {
        &self.attrs
    }

    /// Look up an attribute value by name
    pub fn attr(&self, name: &str) -> Option<&Values> {
        self.attrs
            .iter()
            .find(|a| a.name == name)
            .map(|a| &a.values)
    }

    /// Set or replace an attribute
    pub fn set_attr(&mut self, name: &str, values: impl Into<Values>) {
        let values = values.into();
        match self.attrs.iter_mut().find(|a| a.name == name) {
            Some(attr) => attr.values = values,
            None => self.attrs.push(Attribute::new(name, values)),
        }
    }

    /// Whether the first dimension is the unlimited one
    pub fn is_record(&self) -> bool {
        self.declared_shape.first() == Some(&None)
    }

    /// Whether the variable has no dimensions
    pub fn is_scalar(&self) -> bool {
        self.declared_shape.is_empty()
    }

    /// Elements in one slice along the first dimension (1 for scalars)
    pub(crate) fn row_elems(&self) -> usize {
        if self.declared_shape.is_empty() {
            return 1;
        }
        self.declared_shape[1..]
            .iter()
            .map(|len| len.unwrap_or(0))
            .product()
    }

    /// Unpadded bytes in one slice along the first dimension
    pub(crate) fn row_bytes(&self) -> usize {
        self.row_elems() * self.kind.size_of()
    }

    /// Current length of the first dimension
    pub fn rows(&self) -> usize {
        if self.is_scalar() {
            return 1;
        }
        if self.is_record() {
            return match &self.data {
                DataStore::Owned(values) => values.len() / self.row_elems(),
                DataStore::Record(region) => region.numrecs,
                DataStore::Mapped(_) => 0,
            };
        }
        self.declared_shape[0].unwrap_or(0)
    }

    /// Current shape; the unlimited slot reports the record count
    pub fn shape(&self) -> Vec<usize> {
        let mut shape: Vec<usize> = self
            .declared_shape
            .iter()
            .map(|len| len.unwrap_or(0))
            .collect();
        if self.is_record() {
            shape[0] = self.rows();
        }
        shape
    }

    /// Total element count at the current shape
    pub fn len(&self) -> usize {
        self.rows() * self.row_elems()
    }

    /// Whether the variable currently holds no elements
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the whole buffer in native order
    pub fn values(&self) -> Result<Values> {
        match &self.data {
            DataStore::Owned(values) => Ok(values.clone()),
            DataStore::Mapped(region) => {
                let bytes = &region.map[region.offset..region.offset + region.len];
                Values::from_be_bytes(self.kind, bytes)
            }
            DataStore::Record(region) => {
                let mut bytes = Vec::with_capacity(region.numrecs * region.row_bytes);
                for rec in 0..region.numrecs {
                    bytes.extend_from_slice(record_field(region, rec));
                }
                Values::from_be_bytes(self.kind, &bytes)
            }
        }
    }

    /// Copy of the slice at `index` along the first dimension
    pub fn get(&self, index: usize) -> Result<Values> {
        let rows = self.rows();
        if index >= rows {
            return Err(Error::InvalidShape(format!(
                "index {index} out of bounds for variable '{}' with {rows} slices",
                self.name,
            )));
        }
        let elems = self.row_elems();
        match &self.data {
            DataStore::Owned(values) => Ok(values.slice(index * elems, (index + 1) * elems)),
            DataStore::Mapped(region) => {
                let row = self.row_bytes();
                let offset = region.offset + index * row;
                Values::from_be_bytes(self.kind, &region.map[offset..offset + row])
            }
            DataStore::Record(region) => {
                Values::from_be_bytes(self.kind, record_field(region, index))
            }
        }
    }

    /// Value of a scalar (single-element) variable
    pub fn value(&self) -> Result<Values> {
        if self.len() != 1 {
            return Err(Error::InvalidShape(format!(
                "variable '{}' is not a scalar",
                self.name,
            )));
        }
        self.get(0)
    }

    /// Assign the value of a scalar variable
    pub fn assign_value(&mut self, value: impl Into<Values>) -> Result<()> {
        let values = value.into();
        if !self.is_scalar() {
            return Err(Error::InvalidShape(format!(
                "variable '{}' is not a scalar",
                self.name,
            )));
        }
        self.set_records(0, &values)
    }

    /// Write one slice at `index` along the first dimension
    ///
    /// Record variables grow as needed; the gap up to `index` is
    /// zero-filled.
    pub fn set(&mut self, index: usize, values: impl Into<Values>) -> Result<()> {
        let values = values.into();
        let elems = self.row_elems();
        if values.len() != elems {
            return Err(Error::InvalidShape(format!(
                "slice of variable '{}' holds {elems} elements, got {}",
                self.name,
                values.len(),
            )));
        }
        self.set_records(index, &values)
    }

    /// Write consecutive slices starting at `start`
    pub fn set_records(&mut self, start: usize, values: &Values) -> Result<()> {
        if values.nc_type() != self.kind {
            return Err(Error::InvalidShape(format!(
                "cannot write {} values into {} variable '{}'",
                values.nc_type().name(),
                self.kind.name(),
                self.name,
            )));
        }
        let elems = self.row_elems();
        if elems == 0 || values.len() % elems != 0 {
            return Err(Error::InvalidShape(format!(
                "value count {} is not a whole number of {elems}-element slices",
                values.len(),
            )));
        }
        let new_rows = start + values.len() / elems;
        let is_record = self.is_record();
        let rows = self.rows();
        if !is_record && new_rows > rows {
            return Err(Error::InvalidShape(format!(
                "write of slices [{start}, {new_rows}) exceeds fixed first dimension {rows}",
            )));
        }
        let buffer = self.owned_mut()?;
        if is_record && new_rows * elems > buffer.len() {
            let grow = new_rows * elems - buffer.len();
            buffer.extend_zero(grow);
        }
        buffer.splice(start * elems, values)
    }

    /// Replace the whole buffer
    ///
    /// Fixed variables must receive exactly their declared element count;
    /// record variables may receive any whole number of records.
    pub fn set_all(&mut self, values: impl Into<Values>) -> Result<()> {
        let values = values.into();
        if values.nc_type() != self.kind {
            return Err(Error::InvalidShape(format!(
                "cannot write {} values into {} variable '{}'",
                values.nc_type().name(),
                self.kind.name(),
                self.name,
            )));
        }
        let elems = self.row_elems();
        if self.is_record() {
            if elems == 0 || values.len() % elems != 0 {
                return Err(Error::InvalidShape(format!(
                    "value count {} is not a whole number of {elems}-element records",
                    values.len(),
                )));
            }
        } else if values.len() != self.len() {
            return Err(Error::InvalidShape(format!(
                "variable '{}' holds {} elements, got {}",
                self.name,
                self.len(),
                values.len(),
            )));
        }
        *self.owned_mut()? = values;
        Ok(())
    }

    /// Slice at `index`, masked and scaled per the variable's attributes
    ///
    /// With mask-and-scale disabled this is just the raw slice widened to
    /// double precision. Enabled, elements equal to `missing_value` (or
    /// `_FillValue`) come back as `None` and the rest as
    /// `value * scale_factor + add_offset`.
    pub fn scaled(&self, index: usize) -> Result<Vec<Option<f64>>> {
        let raw = self.get(index)?;
        let mut out = Vec::with_capacity(raw.len());
        for i in 0..raw.len() {
            let value = raw.get_f64(i).ok_or_else(|| {
                Error::InvalidShape(format!(
                    "variable '{}' holds text, not numbers",
                    self.name,
                ))
            })?;
            out.push(value);
        }
        if !self.mask_and_scale {
            return Ok(out.into_iter().map(Some).collect());
        }
        let transform = MaskScale::from_attrs(&self.attrs);
        Ok(out.into_iter().map(|v| transform.apply(v)).collect())
    }

    /// Write a slice at `index` through the inverse mask-and-scale
    /// transform
    ///
    /// Masked (`None`) elements are stored as `missing_value`; a
    /// `missing_value` attribute is created when none exists.
    pub fn set_scaled(&mut self, index: usize, values: &[Option<f64>]) -> Result<()> {
        if !self.mask_and_scale {
            let raw: Vec<f64> = values.iter().map(|v| v.unwrap_or(0.0)).collect();
            return self.set(index, Values::from_f64s(self.kind, &raw));
        }
        let mut transform = MaskScale::from_attrs(&self.attrs);
        if transform.missing.is_none() {
            transform.missing = Some(DEFAULT_FILL);
            self.set_attr(
                "missing_value",
                Values::from_f64s(self.kind, &[DEFAULT_FILL]),
            );
        }
        let missing = transform.missing.unwrap_or(DEFAULT_FILL);
        let raw: Vec<f64> = values
            .iter()
            .map(|v| v.map_or(missing, |x| transform.unapply(x)))
            .collect();
        self.set(index, Values::from_f64s(self.kind, &raw))
    }

    /// Whole buffer as big-endian bytes, unpadded
    pub(crate) fn be_bytes(&self) -> Result<Vec<u8>> {
        match &self.data {
            DataStore::Owned(values) => Ok(values.to_be_bytes()),
            DataStore::Mapped(region) => {
                Ok(region.map[region.offset..region.offset + region.len].to_vec())
            }
            DataStore::Record(region) => {
                let mut bytes = Vec::with_capacity(region.numrecs * region.row_bytes);
                for rec in 0..region.numrecs {
                    bytes.extend_from_slice(record_field(region, rec));
                }
                Ok(bytes)
            }
        }
    }

    /// One record as big-endian bytes; records past the buffer are zeros
    pub(crate) fn record_be_bytes(&self, index: usize) -> Result<Vec<u8>> {
        if index >= self.rows() {
            return Ok(vec![0; self.row_bytes()]);
        }
        Ok(self.get(index)?.to_be_bytes())
    }

    fn owned_mut(&mut self) -> Result<&mut Values> {
        match &mut self.data {
            DataStore::Owned(values) => Ok(values),
            DataStore::Mapped(_) | DataStore::Record(_) => Err(Error::NotWritable),
        }
    }
}

const DEFAULT_FILL: f64 = 999_999.0;

fn record_field(region: &RecordRegion, rec: usize) -> &[u8] {
    let offset = region.start + rec * region.recsize + region.field_offset;
    &region.map[offset..offset + region.row_bytes]
}

/// Mask-and-scale parameters pulled from variable attributes
struct MaskScale {
    missing: Option<f64>,
    scale: Option<f64>,
    offset: Option<f64>,
}

impl MaskScale {
    fn from_attrs(attrs: &[Attribute]) -> Self {
        let first = |name: &str| -> Option<f64> {
            attrs
                .iter()
                .find(|a| a.name == name)
                .and_then(|a| a.values.get_f64(0))
        };
        Self {
            missing: first("missing_value").or_else(|| first("_FillValue")),
            scale: first("scale_factor"),
            offset: first("add_offset"),
        }
    }

    fn apply(&self, value: f64) -> Option<f64> {
        if self.missing == Some(value) {
            return None;
        }
        Some(value * self.scale.unwrap_or(1.0) + self.offset.unwrap_or(0.0))
    }

    fn unapply(&self, value: f64) -> f64 {
        (value - self.offset.unwrap_or(0.0)) / self.scale.unwrap_or(1.0)
    }
}
