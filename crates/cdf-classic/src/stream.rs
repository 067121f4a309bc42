//! Streaming write pipeline
//!
//! A pull-model state machine replaces the coroutine pipeline of older
//! NetCDF writers: the producer hands typed chunks to [`StreamState::feed`]
//! and receives the byte runs (data plus any padding) to emit, so a
//! valid file is produced without ever materializing a variable. The
//! cursor walks the canonical layout: fixed variables first, then
//! records interleaved round-robin across the record variables.
//!
//! When the record count is unknown up front, the emitted header carries
//! the streaming sentinel and readers derive the count from the file
//! size; the producer just stops on a record boundary.

use std::io::Write;

use tracing::{debug, trace};

use crate::codec::NUMRECS_STREAMING;
use crate::error::{Error, Result};
use crate::file::NcFile;
use crate::layout;
use crate::types::NcType;
use crate::value::Values;
use crate::writer::wire_header;

const ZEROS: [u8; 8] = [0; 8];

/// A run of output bytes: literal data or zero padding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ByteRun {
    /// Literal bytes to emit
    Bytes(Vec<u8>),
    /// A run of zero bytes to emit
    Zeros(usize),
}

impl ByteRun {
    /// Length of the run in bytes
    pub fn len(&self) -> usize {
        match self {
            Self::Bytes(bytes) => bytes.len(),
            Self::Zeros(count) => *count,
        }
    }

    /// Whether the run is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Filling the fixed variable at this canonical index
    Fixed(usize),
    /// Awaiting record `rec` of the record variable at this index
    Record { rec: u64, var: usize },
    Done,
}

#[derive(Debug)]
struct Slot {
    name: String,
    kind: NcType,
    /// True data bytes (total for fixed slots, per record otherwise)
    nbytes: u64,
    /// Aligned footprint the slot occupies on disk
    vsize: u64,
}

/// Cursor-driven streaming encoder
#[derive(Debug)]
pub struct StreamState {
    fixed: Vec<Slot>,
    records: Vec<Slot>,
    numrecs: Option<u64>,
    phase: Phase,
    /// Data bytes fed into the current fixed slot so far
    filled: u64,
    /// Total bytes handed out, header included
    emitted: u64,
}

impl StreamState {
    /// Build the state machine and the header bytes to emit first
    ///
    /// With record variables and no explicit record count the header's
    /// `numrecs` field is the streaming sentinel.
    pub fn new(file: &NcFile) -> Result<(Self, Vec<u8>)> {
        let layout = layout::compute(file);
        let numrecs = match file.numrecs() {
            Some(n) => Some(n as u64),
            None if file.has_record_vars() => None,
            None => Some(0),
        };
        let numrecs_field = numrecs.map_or(NUMRECS_STREAMING, |n| n as u32);
        let header = wire_header(file, &layout, numrecs_field)?.build()?;

        let mut fixed = Vec::new();
        let mut records = Vec::new();
        for (var, var_layout) in file.variables().iter().zip(&layout.vars) {
            let slot = Slot {
                name: var.name().to_string(),
                kind: var.nc_type(),
                nbytes: var_layout.nbytes,
                vsize: var_layout.vsize,
            };
            if var.is_record() {
                records.push(slot);
            } else {
                fixed.push(slot);
            }
        }

        let phase = if fixed.is_empty() {
            initial_record_phase(&records, numrecs)
        } else {
            Phase::Fixed(0)
        };
        let emitted = header.len() as u64;
        Ok((
            Self {
                fixed,
                records,
                numrecs,
                phase,
                filled: 0,
                emitted,
            },
            header,
        ))
    }

    /// Accept one typed chunk, returning the runs to emit
    ///
    /// Fixed variables may arrive in several chunks but must not cross a
    /// variable boundary; each record variable receives exactly one
    /// chunk per record.
    pub fn feed(&mut self, chunk: &Values) -> Result<Vec<ByteRun>> {
        match self.phase {
            Phase::Done => Err(Error::ChunkMismatch(
                "chunk received after the end of the data region".to_string(),
            )),
            Phase::Fixed(index) => self.feed_fixed(index, chunk),
            Phase::Record { rec, var } => self.feed_record(rec, var, chunk),
        }
    }

    fn feed_fixed(&mut self, index: usize, chunk: &Values) -> Result<Vec<ByteRun>> {
        let slot = &self.fixed[index];
        check_kind(slot, chunk)?;
        let bytes = chunk.to_be_bytes();
        if self.filled + bytes.len() as u64 > slot.nbytes {
            return Err(Error::ChunkMismatch(format!(
                "chunk of {} bytes crosses the boundary of variable '{}' \
                 ({} of {} bytes filled)",
                bytes.len(),
                slot.name,
                self.filled,
                slot.nbytes,
            )));
        }
        self.filled += bytes.len() as u64;
        self.emitted += bytes.len() as u64;
        let mut runs = vec![ByteRun::Bytes(bytes)];
        if self.filled == slot.nbytes {
            let pad = (slot.vsize - slot.nbytes) as usize;
            if pad > 0 {
                runs.push(ByteRun::Zeros(pad));
                self.emitted += pad as u64;
            }
            trace!(var = %slot.name, "fixed variable complete");
            self.filled = 0;
            self.phase = if index + 1 < self.fixed.len() {
                Phase::Fixed(index + 1)
            } else {
                initial_record_phase(&self.records, self.numrecs)
            };
        }
        Ok(runs)
    }

    fn feed_record(&mut self, rec: u64, var: usize, chunk: &Values) -> Result<Vec<ByteRun>> {
        let slot = &self.records[var];
        check_kind(slot, chunk)?;
        let bytes = chunk.to_be_bytes();
        if bytes.len() as u64 != slot.nbytes {
            return Err(Error::ChunkMismatch(format!(
                "record slice of variable '{}' is {} bytes, got {}",
                slot.name,
                slot.nbytes,
                bytes.len(),
            )));
        }
        self.emitted += slot.vsize;
        let pad = (slot.vsize - slot.nbytes) as usize;
        let mut runs = vec![ByteRun::Bytes(bytes)];
        if pad > 0 {
            runs.push(ByteRun::Zeros(pad));
        }
        self.phase = if var + 1 < self.records.len() {
            Phase::Record { rec, var: var + 1 }
        } else if self.numrecs == Some(rec + 1) {
            Phase::Done
        } else {
            Phase::Record {
                rec: rec + 1,
                var: 0,
            }
        };
        Ok(runs)
    }

    /// Declare the producer exhausted and validate the stop position
    ///
    /// Ending inside a fixed variable or mid-record is a contract
    /// violation; so is stopping short of an explicit record count.
    pub fn finish(&self) -> Result<()> {
        match self.phase {
            Phase::Done => Ok(()),
            Phase::Fixed(index) => Err(Error::ChunkMismatch(format!(
                "producer ended inside fixed variable '{}'",
                self.fixed[index].name,
            ))),
            Phase::Record { rec, var } => {
                if var != 0 {
                    return Err(Error::ChunkMismatch(format!(
                        "producer ended in the middle of record {rec}",
                    )));
                }
                match self.numrecs {
                    // Unknown record count: any record boundary is a
                    // graceful end.
                    None => Ok(()),
                    Some(n) => Err(Error::ChunkMismatch(format!(
                        "producer ended after {rec} of {n} records",
                    ))),
                }
            }
        }
    }

    /// Total bytes handed out so far, header included
    pub const fn emitted(&self) -> u64 {
        self.emitted
    }
}

fn initial_record_phase(records: &[Slot], numrecs: Option<u64>) -> Phase {
    if records.is_empty() || numrecs == Some(0) {
        Phase::Done
    } else {
        Phase::Record { rec: 0, var: 0 }
    }
}

fn check_kind(slot: &Slot, chunk: &Values) -> Result<()> {
    if chunk.nc_type() != slot.kind {
        return Err(Error::ChunkMismatch(format!(
            "variable '{}' is {}, got a {} chunk",
            slot.name,
            slot.kind.name(),
            chunk.nc_type().name(),
        )));
    }
    Ok(())
}

/// Streaming writer driving a [`StreamState`] into a byte sink
pub struct StreamWriter<W: Write> {
    state: StreamState,
    sink: W,
}

impl<W: Write> StreamWriter<W> {
    /// Emit the header and set the cursor at the first variable
    pub fn new(file: &NcFile, mut sink: W) -> Result<Self> {
        let (state, header) = StreamState::new(file)?;
        sink.write_all(&header)?;
        Ok(Self { state, sink })
    }

    /// Feed one chunk, writing its runs to the sink
    pub fn feed(&mut self, chunk: &Values) -> Result<()> {
        for run in self.state.feed(chunk)? {
            match run {
                ByteRun::Bytes(bytes) => self.sink.write_all(&bytes)?,
                ByteRun::Zeros(mut count) => {
                    while count > 0 {
                        let n = count.min(ZEROS.len());
                        self.sink.write_all(&ZEROS[..n])?;
                        count -= n;
                    }
                }
            }
        }
        Ok(())
    }

    /// Bytes emitted so far, header included
    pub const fn bytes_written(&self) -> u64 {
        self.state.emitted()
    }

    /// Validate the stop position, flush and hand the sink back
    pub fn finish(mut self) -> Result<W> {
        self.state.finish()?;
        self.sink.flush()?;
        debug!(bytes = self.state.emitted(), "stream complete");
        Ok(self.sink)
    }
}

/// Drive a whole producer through the pipeline into `sink`
///
/// Chunks must arrive in canonical order: fixed variables first, in any
/// chunking; then one chunk per record slice, records interleaved across
/// the record variables.
pub fn stream_to<W, I>(file: &NcFile, chunks: I, sink: W) -> Result<u64>
where
    W: Write,
    I: IntoIterator<Item = Values>,
{
    let mut writer = StreamWriter::new(file, sink)?;
    for chunk in chunks {
        writer.feed(&chunk)?;
    }
    let written = writer.bytes_written();
    writer.finish()?;
    Ok(written)
}
