//! Primitive codec for the classic header grammar
//!
//! The grammar is length-prefixed, 4-byte aligned and big-endian. Names
//! and typed values are padded to the next 4-byte boundary with NUL
//! bytes; decoding consumes the padding and strips trailing NULs from
//! names. Domain errors are boxed into `binrw::Error::Custom` so they
//! survive the trip through the `BinRead`/`BinWrite` impls.

use binrw::io::{Read, Seek, Write};
use binrw::{BinRead, BinResult, BinWrite, Endian};

use crate::error::Error;
use crate::types::{NcType, Version};
use crate::value::Values;

/// 8-byte sentinel for an empty array slot
pub(crate) const ABSENT: [u8; 8] = [0; 8];

/// Tag opening the dimension array
pub(crate) const TAG_DIMENSION: u32 = 0x0A;
/// Tag opening the variable array
pub(crate) const TAG_VARIABLE: u32 = 0x0B;
/// Tag opening an attribute array
pub(crate) const TAG_ATTRIBUTE: u32 = 0x0C;

/// `numrecs` value meaning "record count unknown, derive from file size"
pub(crate) const NUMRECS_STREAMING: u32 = 0xFFFF_FFFF;

const PAD: [u8; 3] = [0; 3];

/// Bytes needed to reach the next 4-byte boundary
pub(crate) const fn pad4(len: usize) -> usize {
    (4 - len % 4) % 4
}

/// `len` rounded up to the next 4-byte boundary
pub(crate) const fn padded4(len: usize) -> usize {
    len + pad4(len)
}

pub(crate) fn custom_err(pos: u64, err: Error) -> binrw::Error {
    binrw::Error::Custom {
        pos,
        err: Box::new(err),
    }
}

/// Read a non-negative i32 count
pub(crate) fn read_count<R: Read + Seek>(reader: &mut R) -> BinResult<usize> {
    let pos = reader.stream_position()?;
    let count = i32::read_options(reader, Endian::Big, ())?;
    if count < 0 {
        return Err(custom_err(pos, Error::NegativeCount(count)));
    }
    Ok(count as usize)
}

fn skip_pad<R: Read + Seek>(reader: &mut R, len: usize) -> BinResult<()> {
    let mut pad = [0u8; 3];
    reader.read_exact(&mut pad[..pad4(len)])?;
    Ok(())
}

fn write_pad<W: Write>(writer: &mut W, len: usize) -> std::io::Result<()> {
    writer.write_all(&PAD[..pad4(len)])
}

/// Read a length-prefixed name, consuming padding and stripping trailing
/// NUL bytes
pub(crate) fn read_name<R: Read + Seek>(reader: &mut R) -> BinResult<String> {
    let pos = reader.stream_position()?;
    let count = read_count(reader)?;
    let mut buf = vec![0u8; count];
    reader.read_exact(&mut buf)?;
    skip_pad(reader, count)?;
    while buf.last() == Some(&0) {
        buf.pop();
    }
    String::from_utf8(buf).map_err(|e| custom_err(pos, Error::InvalidUtf8(e)))
}

/// Write a length-prefixed, NUL-padded name
pub(crate) fn write_name<W: Write + Seek>(writer: &mut W, name: &str) -> BinResult<()> {
    (name.len() as i32).write_options(writer, Endian::Big, ())?;
    writer.write_all(name.as_bytes())?;
    write_pad(writer, name.len())?;
    Ok(())
}

/// Read a 4-byte type tag
pub(crate) fn read_type_tag<R: Read + Seek>(reader: &mut R) -> BinResult<NcType> {
    let pos = reader.stream_position()?;
    let tag = u32::read_options(reader, Endian::Big, ())?;
    NcType::from_tag(tag).map_err(|e| custom_err(pos, e))
}

/// Read a typed value vector: `tag ++ nelems ++ payload ++ padding`
///
/// `Char` payloads are decoded as UTF-8 with trailing NULs stripped, the
/// convention for text attributes.
pub(crate) fn read_values<R: Read + Seek>(reader: &mut R) -> BinResult<Values> {
    let pos = reader.stream_position()?;
    let kind = read_type_tag(reader)?;
    let nelems = read_count(reader)?;
    let nbytes = nelems * kind.size_of();
    let mut buf = vec![0u8; nbytes];
    reader.read_exact(&mut buf)?;
    skip_pad(reader, nbytes)?;
    if kind == NcType::Char {
        while buf.last() == Some(&0) {
            buf.pop();
        }
        return Ok(Values::Char(String::from_utf8_lossy(&buf).into_owned()));
    }
    Values::from_be_bytes(kind, &buf).map_err(|e| custom_err(pos, e))
}

/// Write a typed value vector with its tag, element count and padding
pub(crate) fn write_values<W: Write + Seek>(writer: &mut W, values: &Values) -> BinResult<()> {
    values
        .nc_type()
        .tag()
        .write_options(writer, Endian::Big, ())?;
    (values.len() as i32).write_options(writer, Endian::Big, ())?;
    let bytes = values.to_be_bytes();
    writer.write_all(&bytes)?;
    write_pad(writer, bytes.len())?;
    Ok(())
}

/// Read a `begin` offset, 4 or 8 bytes wide depending on the version
pub(crate) fn read_begin<R: Read + Seek>(reader: &mut R, version: Version) -> BinResult<u64> {
    let pos = reader.stream_position()?;
    let begin = match version {
        Version::Classic => i64::from(i32::read_options(reader, Endian::Big, ())?),
        Version::Offset64 => i64::read_options(reader, Endian::Big, ())?,
    };
    if begin < 0 {
        return Err(custom_err(
            pos,
            Error::Header(format!("negative begin offset {begin}")),
        ));
    }
    Ok(begin as u64)
}

/// Write a `begin` offset at the version's width
pub(crate) fn write_begin<W: Write + Seek>(
    writer: &mut W,
    version: Version,
    begin: u64,
) -> BinResult<()> {
    match version {
        Version::Classic => (begin as u32).write_options(writer, Endian::Big, ()),
        Version::Offset64 => begin.write_options(writer, Endian::Big, ()),
    }
}

/// Encoded length of a name field
pub(crate) fn name_len(name: &str) -> u64 {
    4 + padded4(name.len()) as u64
}

/// Encoded length of a typed value field
pub(crate) fn values_len(values: &Values) -> u64 {
    8 + padded4(values.byte_len()) as u64
}
