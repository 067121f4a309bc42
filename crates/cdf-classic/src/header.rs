//! Wire representation of the classic file header
//!
//! ```text
//! "CDF" version  numrecs  dim_array  gatt_array  var_array
//! ```
//!
//! Each array slot is either the 8-byte `ABSENT` sentinel or
//! `tag ++ count ++ entries`. The width of each variable's `begin`
//! offset depends on the version byte, threaded through the
//! `BinRead`/`BinWrite` impls as an argument.

use binrw::io::{Cursor, Read, Seek, Write};
use binrw::{BinRead, BinResult, BinWrite, Endian};

use crate::codec::{
    self, ABSENT, TAG_ATTRIBUTE, TAG_DIMENSION, TAG_VARIABLE, custom_err,
};
use crate::error::{Error, Result};
use crate::types::{NcType, Version};
use crate::value::Attribute;

/// Magic bytes opening every classic file
pub const CDF_MAGIC: [u8; 3] = *b"CDF";

/// Decoded file header
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Header {
    /// File format version
    pub version: Version,
    /// Raw record count; `0xFFFF_FFFF` means "derive from file size"
    pub numrecs: u32,
    /// Dimension entries in declaration order
    pub dims: Vec<DimEntry>,
    /// Global attributes in declaration order
    pub gatts: Vec<Attribute>,
    /// Variable entries in canonical order
    pub vars: Vec<VarEntry>,
}

/// One dimension entry: name and length (0 = unlimited)
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DimEntry {
    pub name: String,
    pub length: u32,
}

/// One variable entry of the header grammar
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct VarEntry {
    pub name: String,
    pub dimids: Vec<usize>,
    pub attrs: Vec<Attribute>,
    pub kind: NcType,
    /// Clamped byte footprint as stored on disk
    pub vsize: u32,
    /// Absolute offset of the variable's data region
    pub begin: u64,
}

/// Read `tag ++ count`, accepting the `ABSENT` sentinel as zero entries
fn read_array_header<R: Read + Seek>(
    reader: &mut R,
    expected_tag: u32,
    what: &'static str,
) -> BinResult<usize> {
    let pos = reader.stream_position()?;
    let tag = u32::read_options(reader, Endian::Big, ())?;
    let count_pos = reader.stream_position()?;
    let count = i32::read_options(reader, Endian::Big, ())?;
    if tag == 0 {
        // An absent array must consume the full 8-byte sentinel.
        if count != 0 {
            return Err(custom_err(
                pos,
                Error::Header(format!("absent {what} array with nonzero count {count}")),
            ));
        }
        return Ok(0);
    }
    if tag != expected_tag {
        return Err(custom_err(
            pos,
            Error::UnexpectedTag {
                expected: what,
                found: tag,
            },
        ));
    }
    if count < 0 {
        return Err(custom_err(count_pos, Error::NegativeCount(count)));
    }
    Ok(count as usize)
}

fn write_array_header<W: Write + Seek>(
    writer: &mut W,
    tag: u32,
    count: usize,
) -> BinResult<()> {
    if count == 0 {
        writer.write_all(&ABSENT)?;
    } else {
        tag.write_options(writer, Endian::Big, ())?;
        (count as i32).write_options(writer, Endian::Big, ())?;
    }
    Ok(())
}

fn read_att_array<R: Read + Seek>(reader: &mut R) -> BinResult<Vec<Attribute>> {
    let count = read_array_header(reader, TAG_ATTRIBUTE, "attribute")?;
    let mut attrs = Vec::with_capacity(count);
    for _ in 0..count {
        attrs.push(Attribute::read_options(reader, Endian::Big, ())?);
    }
    Ok(attrs)
}

fn write_att_array<W: Write + Seek>(writer: &mut W, attrs: &[Attribute]) -> BinResult<()> {
    write_array_header(writer, TAG_ATTRIBUTE, attrs.len())?;
    for attr in attrs {
        attr.write_options(writer, Endian::Big, ())?;
    }
    Ok(())
}

impl BinRead for DimEntry {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        _endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let name = codec::read_name(reader)?;
        let length = codec::read_count(reader)? as u32;
        Ok(Self { name, length })
    }
}

impl BinWrite for DimEntry {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        _endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        codec::write_name(writer, &self.name)?;
        (self.length as i32).write_options(writer, Endian::Big, ())?;
        Ok(())
    }
}

impl BinRead for Attribute {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        _endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let name = codec::read_name(reader)?;
        let values = codec::read_values(reader)?;
        Ok(Self { name, values })
    }
}

impl BinWrite for Attribute {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        _endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        codec::write_name(writer, &self.name)?;
        codec::write_values(writer, &self.values)?;
        Ok(())
    }
}

impl BinRead for VarEntry {
    type Args<'a> = (Version,);

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        _endian: Endian,
        args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let (version,) = args;
        let name = codec::read_name(reader)?;
        let rank = codec::read_count(reader)?;
        let mut dimids = Vec::with_capacity(rank);
        for _ in 0..rank {
            dimids.push(codec::read_count(reader)?);
        }
        let attrs = read_att_array(reader)?;
        let kind = codec::read_type_tag(reader)?;
        let vsize = u32::read_options(reader, Endian::Big, ())?;
        let begin = codec::read_begin(reader, version)?;
        Ok(Self {
            name,
            dimids,
            attrs,
            kind,
            vsize,
            begin,
        })
    }
}

impl BinWrite for VarEntry {
    type Args<'a> = (Version,);

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        _endian: Endian,
        args: Self::Args<'_>,
    ) -> BinResult<()> {
        let (version,) = args;
        codec::write_name(writer, &self.name)?;
        (self.dimids.len() as i32).write_options(writer, Endian::Big, ())?;
        for dimid in &self.dimids {
            (*dimid as i32).write_options(writer, Endian::Big, ())?;
        }
        write_att_array(writer, &self.attrs)?;
        self.kind.tag().write_options(writer, Endian::Big, ())?;
        self.vsize.write_options(writer, Endian::Big, ())?;
        codec::write_begin(writer, version, self.begin)?;
        Ok(())
    }
}

impl BinRead for Header {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        _endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let mut magic = [0u8; 3];
        reader.read_exact(&mut magic)?;
        if magic != CDF_MAGIC {
            return Err(custom_err(0, Error::NotNetcdf(magic)));
        }
        let mut version_byte = [0u8; 1];
        reader.read_exact(&mut version_byte)?;
        let version = Version::from_byte(version_byte[0]).map_err(|e| custom_err(3, e))?;

        let numrecs = u32::read_options(reader, Endian::Big, ())?;

        let dim_count = read_array_header(reader, TAG_DIMENSION, "dimension")?;
        let mut dims = Vec::with_capacity(dim_count);
        for _ in 0..dim_count {
            dims.push(DimEntry::read_options(reader, Endian::Big, ())?);
        }

        let gatts = read_att_array(reader)?;

        let var_count = read_array_header(reader, TAG_VARIABLE, "variable")?;
        let mut vars = Vec::with_capacity(var_count);
        for _ in 0..var_count {
            vars.push(VarEntry::read_options(reader, Endian::Big, (version,))?);
        }

        Ok(Self {
            version,
            numrecs,
            dims,
            gatts,
            vars,
        })
    }
}

impl BinWrite for Header {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        _endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        writer.write_all(&CDF_MAGIC)?;
        writer.write_all(&[self.version.byte()])?;
        self.numrecs.write_options(writer, Endian::Big, ())?;

        write_array_header(writer, TAG_DIMENSION, self.dims.len())?;
        for dim in &self.dims {
            dim.write_options(writer, Endian::Big, ())?;
        }

        write_att_array(writer, &self.gatts)?;

        write_array_header(writer, TAG_VARIABLE, self.vars.len())?;
        for var in &self.vars {
            var.write_options(writer, Endian::Big, (self.version,))?;
        }

        Ok(())
    }
}

impl Header {
    /// Parse a header from the start of `data`
    pub(crate) fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        Ok(Self::read_be(&mut cursor)?)
    }

    /// Parse a header and report how many bytes it occupied
    pub(crate) fn parse_with_len(data: &[u8]) -> Result<(Self, u64)> {
        let mut cursor = Cursor::new(data);
        let header = Self::read_be(&mut cursor)?;
        Ok((header, cursor.position()))
    }

    /// Encode to bytes
    pub(crate) fn build(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        let mut cursor = Cursor::new(&mut buffer);
        self.write_be(&mut cursor)?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> Header {
        Header {
            version: Version::Classic,
            numrecs: 2,
            dims: vec![
                DimEntry {
                    name: "time".to_string(),
                    length: 0,
                },
                DimEntry {
                    name: "x".to_string(),
                    length: 3,
                },
            ],
            gatts: vec![Attribute::new("history", "created")],
            vars: vec![VarEntry {
                name: "v".to_string(),
                dimids: vec![0, 1],
                attrs: vec![Attribute::new("units", "m")],
                kind: NcType::Short,
                vsize: 8,
                begin: 120,
            }],
        }
    }

    #[test]
    fn header_round_trip() {
        let header = sample_header();
        let bytes = header.build().unwrap();
        assert_eq!(&bytes[..4], b"CDF\x01");
        let (back, len) = Header::parse_with_len(&bytes).unwrap();
        assert_eq!(back, header);
        assert_eq!(len as usize, bytes.len());
    }

    #[test]
    fn header_round_trip_64bit_offsets() {
        let mut header = sample_header();
        header.version = Version::Offset64;
        header.vars[0].begin = u64::from(u32::MAX) + 16;
        let bytes = header.build().unwrap();
        assert_eq!(&bytes[..4], b"CDF\x02");
        let back = Header::parse(&bytes).unwrap();
        assert_eq!(back, header);
    }

    #[test]
    fn empty_arrays_use_absent_sentinel() {
        let header = Header {
            version: Version::Classic,
            numrecs: 0,
            dims: Vec::new(),
            gatts: Vec::new(),
            vars: Vec::new(),
        };
        let bytes = header.build().unwrap();
        // magic+version, numrecs, then three 8-byte ABSENT slots
        assert_eq!(bytes.len(), 4 + 4 + 8 + 8 + 8);
        assert_eq!(&bytes[8..], &[0u8; 24]);
        assert_eq!(Header::parse(&bytes).unwrap(), header);
    }

    #[test]
    fn bad_magic_rejected() {
        let err = Header::parse(b"HDF\x01\x00\x00\x00\x00").unwrap_err();
        assert!(matches!(err, Error::NotNetcdf(m) if &m == b"HDF"));
    }

    #[test]
    fn bad_version_rejected() {
        let err = Header::parse(b"CDF\x03\x00\x00\x00\x00").unwrap_err();
        assert!(matches!(err, Error::UnknownVersion(3)));
    }

    #[test]
    fn unexpected_tag_rejected() {
        let mut bytes = sample_header().build().unwrap();
        // Overwrite the dimension tag (directly after magic+numrecs).
        bytes[8..12].copy_from_slice(&0x0Cu32.to_be_bytes());
        let err = Header::parse(&bytes).unwrap_err();
        assert!(matches!(
            err,
            Error::UnexpectedTag {
                expected: "dimension",
                found: 0x0C,
            }
        ));
    }

    #[test]
    fn half_absent_sentinel_rejected() {
        let header = Header {
            version: Version::Classic,
            numrecs: 0,
            dims: Vec::new(),
            gatts: Vec::new(),
            vars: Vec::new(),
        };
        let mut bytes = header.build().unwrap();
        // Corrupt the second word of the dimension sentinel.
        bytes[12..16].copy_from_slice(&5u32.to_be_bytes());
        let err = Header::parse(&bytes).unwrap_err();
        assert!(matches!(err, Error::Header(_)));
    }

    #[test]
    fn truncated_header_rejected() {
        let bytes = sample_header().build().unwrap();
        let err = Header::parse(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, Error::Truncated(_)));
    }
}
