//! Read path: header parsing and payload access
//!
//! The reader parses the header, rebuilds the entity store, and then
//! either memory-maps the whole file once (sharing the map across all
//! variable stores) or reads every payload eagerly into native-order
//! values. Record variables address the interleaved record region as
//! `records_begin + record * recsize + field_offset`.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use memmap2::{Mmap, MmapOptions};
use tracing::debug;

use crate::codec::NUMRECS_STREAMING;
use crate::dimension::Dimension;
use crate::error::{Error, Result};
use crate::file::{Mode, NcFile};
use crate::header::Header;
use crate::value::Values;
use crate::variable::{DataStore, MappedRegion, RecordRegion, Variable};

/// Options for opening a file for read
#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    /// Memory-map the file instead of reading it eagerly
    pub mmap: bool,
    /// Whether variable access applies the mask-and-scale transform
    pub mask_and_scale: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            mmap: true,
            mask_and_scale: false,
        }
    }
}

enum Source {
    Mapped(Arc<Mmap>),
    Eager,
}

pub(crate) fn open_path(path: &Path, options: &ReadOptions) -> Result<NcFile> {
    let file = File::open(path)?;
    if options.mmap {
        #[allow(unsafe_code)]
        let map = unsafe { MmapOptions::new().map(&file)? };
        debug!(path = %path.display(), len = map.len(), "memory-mapped file");
        let map = Arc::new(map);
        let data: &[u8] = &map;
        // The slice borrow ends before the map is moved into the stores.
        build_file(data, &Source::Mapped(Arc::clone(&map)), options)
    } else {
        let data = std::fs::read(path)?;
        debug!(path = %path.display(), len = data.len(), "read file eagerly");
        build_file(&data, &Source::Eager, options)
    }
}

pub(crate) fn parse_slice(data: &[u8]) -> Result<NcFile> {
    build_file(
        data,
        &Source::Eager,
        &ReadOptions {
            mmap: false,
            mask_and_scale: false,
        },
    )
}

fn build_file(data: &[u8], source: &Source, options: &ReadOptions) -> Result<NcFile> {
    let header = Header::parse(data)?;
    let total = data.len();

    let mut dims = Vec::with_capacity(header.dims.len());
    for entry in &header.dims {
        let length = if entry.length == 0 {
            if dims.iter().any(Dimension::is_unlimited) {
                return Err(Error::InvalidShape(
                    "file declares more than one unlimited dimension".to_string(),
                ));
            }
            None
        } else {
            Some(entry.length as usize)
        };
        dims.push(Dimension::new(entry.name.clone(), length));
    }

    // Resolve shapes before touching any payload, so dim-id errors win
    // over truncation errors.
    let mut shapes = Vec::with_capacity(header.vars.len());
    for entry in &header.vars {
        let mut declared_shape = Vec::with_capacity(entry.dimids.len());
        for &id in &entry.dimids {
            let dim = dims.get(id).ok_or(Error::DimIdOutOfRange {
                id,
                count: dims.len(),
            })?;
            declared_shape.push(dim.length());
        }
        shapes.push(declared_shape);
    }

    // Record geometry comes from the header's vsize fields.
    let recsize: u64 = header
        .vars
        .iter()
        .zip(&shapes)
        .filter(|(_, shape)| shape.first() == Some(&None))
        .map(|(entry, _)| u64::from(entry.vsize))
        .sum();
    let records_begin = header
        .vars
        .iter()
        .zip(&shapes)
        .find(|(_, shape)| shape.first() == Some(&None))
        .map(|(entry, _)| entry.begin);

    let numrecs = if header.numrecs == NUMRECS_STREAMING {
        let derived = match records_begin {
            Some(begin) if recsize > 0 && (total as u64) > begin => {
                ((total as u64 - begin) / recsize) as usize
            }
            _ => 0,
        };
        debug!(derived, "streaming numrecs, derived record count from file size");
        derived
    } else {
        header.numrecs as usize
    };

    if let Some(begin) = records_begin {
        let end = begin + numrecs as u64 * recsize;
        if end > total as u64 {
            return Err(Error::Truncated("record data"));
        }
    }

    let mut variables = Vec::with_capacity(header.vars.len());
    let mut field_offset = 0u64;
    for (entry, declared_shape) in header.vars.iter().zip(&shapes) {
        let is_record = declared_shape.first() == Some(&None);
        let elem = entry.kind.size_of();
        let data_store = if is_record {
            let row_elems: usize = declared_shape[1..]
                .iter()
                .map(|len| len.unwrap_or(0))
                .product();
            let row_bytes = row_elems * elem;
            if u64::from(entry.vsize) < row_bytes as u64 {
                return Err(Error::Header(format!(
                    "vsize {} of record variable '{}' is smaller than its \
                     {row_bytes}-byte record slice",
                    entry.vsize, entry.name,
                )));
            }
            let offset = field_offset;
            field_offset += u64::from(entry.vsize);
            let start = records_begin.unwrap_or(0) as usize;
            match source {
                Source::Mapped(map) => DataStore::Record(RecordRegion {
                    map: Arc::clone(map),
                    start,
                    recsize: recsize as usize,
                    field_offset: offset as usize,
                    row_bytes,
                    numrecs,
                }),
                Source::Eager => {
                    let mut bytes = Vec::with_capacity(numrecs * row_bytes);
                    for rec in 0..numrecs {
                        let at = start + rec * recsize as usize + offset as usize;
                        bytes.extend_from_slice(&data[at..at + row_bytes]);
                    }
                    DataStore::Owned(Values::from_be_bytes(entry.kind, &bytes)?)
                }
            }
        } else {
            let elems: usize = declared_shape
                .iter()
                .map(|len| len.unwrap_or(0))
                .product();
            let nbytes = elems * elem;
            let begin = entry.begin as usize;
            if begin + nbytes > total {
                return Err(Error::Truncated("variable data"));
            }
            match source {
                Source::Mapped(map) => DataStore::Mapped(MappedRegion {
                    map: Arc::clone(map),
                    offset: begin,
                    len: nbytes,
                }),
                Source::Eager => DataStore::Owned(Values::from_be_bytes(
                    entry.kind,
                    &data[begin..begin + nbytes],
                )?),
            }
        };

        variables.push(Variable::new(
            entry.name.clone(),
            entry.kind,
            entry
                .dimids
                .iter()
                .map(|&id| dims[id].name().to_string())
                .collect(),
            declared_shape.clone(),
            entry.attrs.clone(),
            data_store,
            options.mask_and_scale,
        ));
    }

    debug!(
        dims = dims.len(),
        vars = variables.len(),
        numrecs,
        "parsed file"
    );

    let mut nc = NcFile::new(header.version);
    nc.dims = dims;
    nc.gatts = header.gatts;
    nc.variables = variables;
    nc.numrecs = Some(numrecs);
    nc.mask_and_scale = options.mask_and_scale;
    nc.mode = Mode::Read;
    nc.file_len = Some(total as u64);
    Ok(nc)
}
