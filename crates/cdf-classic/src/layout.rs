//! Data layout engine
//!
//! Computes each variable's byte footprint (`vsize`), the record stride
//! (`recsize`) and the absolute `begin` offset of every data region. The
//! first variable starts right after the header, whose length is
//! computed analytically from the grammar, so no placeholder encoding
//! pass is needed.

use crate::codec::{name_len, padded4, values_len};
use crate::file::NcFile;
use crate::types::Version;
use crate::value::Attribute;
use crate::variable::Variable;

/// Layout of a single variable
#[derive(Debug, Clone, Copy)]
pub(crate) struct VarLayout {
    /// Aligned byte footprint: total bytes for fixed variables, bytes
    /// per record for record variables
    pub vsize: u64,
    /// Unpadded data bytes behind `vsize`
    pub nbytes: u64,
    /// Absolute offset of the variable's data region
    pub begin: u64,
}

/// Layout of the whole file
#[derive(Debug, Clone)]
pub(crate) struct Layout {
    /// Encoded header length in bytes
    pub header_len: u64,
    /// Per-variable layouts, aligned with the file's canonical order
    pub vars: Vec<VarLayout>,
    /// Stride between consecutive records
    pub recsize: u64,
    /// Offset of the record region, when record variables exist
    pub records_begin: Option<u64>,
}

fn att_array_len(attrs: &[Attribute]) -> u64 {
    if attrs.is_empty() {
        return 8;
    }
    8 + attrs
        .iter()
        .map(|a| name_len(&a.name) + values_len(&a.values))
        .sum::<u64>()
}

fn var_entry_len(var: &Variable, version: Version) -> u64 {
    name_len(var.name())
        + 4
        + 4 * var.dimensions().len() as u64
        + att_array_len(var.attributes())
        + 4
        + 4
        + version.begin_width() as u64
}

/// Encoded header length, computed from the grammar without
/// materializing any bytes
pub(crate) fn header_len(file: &NcFile) -> u64 {
    let dim_array = if file.dims.is_empty() {
        8
    } else {
        8 + file
            .dims
            .iter()
            .map(|d| name_len(d.name()) + 4)
            .sum::<u64>()
    };
    let gatt_array = att_array_len(&file.gatts);
    let var_array = if file.variables.is_empty() {
        8
    } else {
        8 + file
            .variables
            .iter()
            .map(|v| var_entry_len(v, file.version))
            .sum::<u64>()
    };
    4 + 4 + dim_array + gatt_array + var_array
}

/// Compute the full file layout
pub(crate) fn compute(file: &NcFile) -> Layout {
    let rec_count = file.variables.iter().filter(|v| v.is_record()).count();
    let pad_records = rec_count > 1;

    let mut vars = Vec::with_capacity(file.variables.len());
    let mut recsize = 0u64;
    let mut records_begin = None;
    let mut begin = header_len(file);

    for var in &file.variables {
        let (nbytes, vsize) = if var.is_record() {
            let nbytes = var.row_bytes() as u64;
            let vsize = if pad_records {
                padded4(nbytes as usize) as u64
            } else {
                nbytes
            };
            recsize += vsize;
            if records_begin.is_none() {
                records_begin = Some(begin);
            }
            (nbytes, vsize)
        } else {
            let nbytes = (var.row_elems() * var.rows() * var.nc_type().size_of()) as u64;
            (nbytes, padded4(nbytes as usize) as u64)
        };
        vars.push(VarLayout {
            vsize,
            nbytes,
            begin,
        });
        begin += vsize;
    }

    Layout {
        header_len: header_len(file),
        vars,
        recsize,
        records_begin,
    }
}

/// Clamp a true vsize to what the 32-bit header field can carry
pub(crate) fn clamp_vsize(vsize: u64) -> u32 {
    let max = u64::from(u32::MAX - 3);
    if vsize > max { u32::MAX - 3 } else { vsize as u32 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NcType;

    #[test]
    fn fixed_vsizes_are_padded_to_four() {
        let mut nc = NcFile::new(Version::Classic);
        nc.create_dimension("x", Some(3)).unwrap();
        nc.create_variable("b", NcType::Byte, &["x"]).unwrap();
        nc.create_variable("s", NcType::Short, &["x"]).unwrap();
        let layout = compute(&nc);
        assert_eq!(layout.vars[0].nbytes, 3);
        assert_eq!(layout.vars[0].vsize, 4);
        assert_eq!(layout.vars[1].nbytes, 6);
        assert_eq!(layout.vars[1].vsize, 8);
        assert_eq!(layout.vars[0].begin, layout.header_len);
        assert_eq!(layout.vars[1].begin, layout.header_len + 4);
        assert_eq!(layout.recsize, 0);
        assert!(layout.records_begin.is_none());
    }

    #[test]
    fn single_record_variable_is_unpadded() {
        let mut nc = NcFile::new(Version::Classic);
        nc.create_dimension("t", None).unwrap();
        nc.create_dimension("x", Some(3)).unwrap();
        nc.create_variable("r", NcType::Byte, &["t", "x"]).unwrap();
        let layout = compute(&nc);
        assert_eq!(layout.vars[0].vsize, 3);
        assert_eq!(layout.recsize, 3);
        assert_eq!(layout.records_begin, Some(layout.header_len));
    }

    #[test]
    fn multiple_record_variables_are_padded() {
        let mut nc = NcFile::new(Version::Classic);
        nc.create_dimension("t", None).unwrap();
        nc.create_dimension("x", Some(3)).unwrap();
        nc.create_variable("a", NcType::Byte, &["t", "x"]).unwrap();
        nc.create_variable("b", NcType::Short, &["t", "x"]).unwrap();
        let layout = compute(&nc);
        assert_eq!(layout.vars[0].vsize, 4);
        assert_eq!(layout.vars[1].vsize, 8);
        assert_eq!(layout.recsize, 12);
        // Record variables chain their begins by per-record vsize.
        assert_eq!(layout.vars[1].begin, layout.vars[0].begin + 4);
    }

    #[test]
    fn header_len_matches_encoded_header() {
        let mut nc = NcFile::new(Version::Offset64);
        nc.set_attr("history", "layout test");
        nc.create_dimension("t", None).unwrap();
        nc.create_dimension("x", Some(2)).unwrap();
        let var = nc.create_variable("v", NcType::Double, &["t", "x"]).unwrap();
        var.set_attr("units", "m");
        let bytes = nc.build().unwrap();
        let layout = compute(&nc);
        assert!(bytes.len() as u64 >= layout.header_len);
        // The first variable begins exactly at the header boundary.
        assert_eq!(layout.vars[0].begin, layout.header_len);
    }

    #[test]
    fn vsize_clamps_at_field_limit() {
        assert_eq!(clamp_vsize(10), 10);
        assert_eq!(clamp_vsize(u64::from(u32::MAX - 3)), u32::MAX - 3);
        assert_eq!(clamp_vsize(u64::from(u32::MAX) + 100), u32::MAX - 3);
    }
}
