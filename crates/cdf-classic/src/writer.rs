//! Eager write path
//!
//! Emits `header ++ data region`: fixed variables first in canonical
//! order, each zero-padded to its vsize, then `numrecs` records with the
//! record variables interleaved round-robin. All payloads are converted
//! to big-endian at the boundary.

use std::io::Write;

use tracing::debug;

use crate::error::{Error, Result};
use crate::file::NcFile;
use crate::header::{DimEntry, Header, VarEntry};
use crate::layout::{self, Layout, clamp_vsize};

const ZEROS: [u8; 8] = [0; 8];

pub(crate) fn build_bytes(file: &NcFile) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_into(file, &mut out)?;
    Ok(out)
}

/// Serialize the whole file into `sink`, returning the bytes written
pub(crate) fn write_into<W: Write>(file: &NcFile, sink: &mut W) -> Result<u64> {
    let layout = layout::compute(file);
    let numrecs = file.effective_numrecs().unwrap_or(0);
    let header = wire_header(file, &layout, numrecs as u32)?;
    let header_bytes = header.build()?;
    debug_assert_eq!(header_bytes.len() as u64, layout.header_len);
    sink.write_all(&header_bytes)?;
    let mut written = header_bytes.len() as u64;

    for (var, var_layout) in file
        .variables
        .iter()
        .zip(&layout.vars)
        .filter(|(var, _)| !var.is_record())
    {
        let bytes = var.be_bytes()?;
        sink.write_all(&bytes)?;
        write_zeros(sink, var_layout.vsize as usize - bytes.len())?;
        written += var_layout.vsize;
    }

    let record_vars: Vec<_> = file
        .variables
        .iter()
        .zip(&layout.vars)
        .filter(|(var, _)| var.is_record())
        .collect();
    for rec in 0..numrecs {
        for (var, var_layout) in &record_vars {
            let bytes = var.record_be_bytes(rec)?;
            sink.write_all(&bytes)?;
            write_zeros(sink, var_layout.vsize as usize - bytes.len())?;
            written += var_layout.vsize;
        }
    }

    debug!(bytes = written, numrecs, "serialized file");
    Ok(written)
}

fn write_zeros<W: Write>(sink: &mut W, mut count: usize) -> Result<()> {
    while count > 0 {
        let n = count.min(ZEROS.len());
        sink.write_all(&ZEROS[..n])?;
        count -= n;
    }
    Ok(())
}

/// Build the wire header with real offsets from the layout
pub(crate) fn wire_header(file: &NcFile, layout: &Layout, numrecs: u32) -> Result<Header> {
    let mut vars = Vec::with_capacity(file.variables.len());
    for (var, var_layout) in file.variables.iter().zip(&layout.vars) {
        let mut dimids = Vec::with_capacity(var.dimensions().len());
        for dim_name in var.dimensions() {
            let id = file
                .dims
                .iter()
                .position(|dim| dim.name() == dim_name)
                .ok_or_else(|| Error::NotFound(format!("dimension '{dim_name}'")))?;
            dimids.push(id);
        }
        vars.push(VarEntry {
            name: var.name().to_string(),
            dimids,
            attrs: var.attributes().to_vec(),
            kind: var.nc_type(),
            vsize: clamp_vsize(var_layout.vsize),
            begin: var_layout.begin,
        });
    }
    Ok(Header {
        version: file.version,
        numrecs,
        dims: file
            .dims
            .iter()
            .map(|dim| DimEntry {
                name: dim.name().to_string(),
                length: dim.length_or_zero() as u32,
            })
            .collect(),
        gatts: file.gatts.clone(),
        vars,
    })
}
