//! Record framing: the collaborator contracts and the prefix/suffix
//! byte layout rules from spec.md §4.1/§4.4/§4.5.

use std::io::{self, Read, Write};

use bytes::Bytes;

use crate::error::ChunkError;

/// An externally-owned record. The chunk subsystem never inspects the
/// payload; it only asks the record to emit itself at a known logical
/// address.
pub trait LogRecord {
    /// Emits this record's payload bytes. `global_position` is the
    /// logical address the record will occupy once committed.
    fn write_to(&self, global_position: u64, writer: &mut dyn Write) -> io::Result<()>;
}

/// A reconstruction factory supplied by the caller. Returning `Ok(None)`
/// signals corruption (never silently recovered by the caller of this
/// crate) rather than panicking or raising.
pub trait RecordReader<T> {
    fn read_record(&mut self, length: u64, reader: &mut dyn Read) -> io::Result<Option<T>>;
}

impl<T, F> RecordReader<T> for F
where
    F: FnMut(u64, &mut dyn Read) -> io::Result<Option<T>>,
{
    fn read_record(&mut self, length: u64, reader: &mut dyn Read) -> io::Result<Option<T>> {
        self(length, reader)
    }
}

/// Frames a variable-length record: `u32 length | payload | u32 length`.
///
/// The space check against remaining chunk capacity happens after this
/// call, in the caller — see the Open Question in spec.md §9: a
/// pathological oversized record still costs one serialization before
/// being rejected, and that is deliberately preserved rather than
/// hoisting a cheaper upper-bound probe.
pub fn frame_variable_record(
    record: &dyn LogRecord,
    global_position: u64,
    max_log_record_size: u64,
    chunk_number: u64,
) -> Result<Bytes, ChunkError> {
    let mut scratch = Vec::with_capacity(64);
    scratch.extend_from_slice(&[0_u8; 4]); // prefix placeholder
    record
        .write_to(global_position, &mut scratch)
        .map_err(ChunkError::Io)?;

    let record_length = (scratch.len() - 4) as u64;
    if record_length == 0 || record_length > max_log_record_size {
        return Err(ChunkError::ChunkWriteError {
            chunk_number,
            message: format!(
                "framed record length {record_length} is outside (0, {max_log_record_size}]"
            ),
        });
    }

    let length_bytes = (record_length as u32).to_le_bytes();
    scratch.extend_from_slice(&length_bytes); // suffix
    scratch[0..4].copy_from_slice(&length_bytes); // prefix

    Ok(Bytes::from(scratch))
}

/// Frames a fixed-size record: exactly `unit_size` bytes, no
/// prefix/suffix.
pub fn frame_fixed_record(
    record: &dyn LogRecord,
    global_position: u64,
    unit_size: u64,
    chunk_number: u64,
) -> Result<Bytes, ChunkError> {
    let mut scratch = Vec::with_capacity(unit_size as usize);
    record
        .write_to(global_position, &mut scratch)
        .map_err(ChunkError::Io)?;

    if scratch.len() as u64 != unit_size {
        return Err(ChunkError::ChunkWriteError {
            chunk_number,
            message: format!(
                "fixed record framed to {} bytes, expected unit_size {unit_size}",
                scratch.len()
            ),
        });
    }

    Ok(Bytes::from(scratch))
}

pub fn read_u32_le(reader: &mut dyn Read) -> io::Result<u32> {
    let mut buf = [0_u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Wraps a reader and counts bytes pulled through it, so fixed-record
/// reads can verify `read_record` consumed exactly `chunk_data_unit_size`
/// bytes (spec.md §4.5 edge case).
pub struct CountingReader<'a> {
    inner: &'a mut dyn Read,
    consumed: u64,
}

impl<'a> CountingReader<'a> {
    pub fn new(inner: &'a mut dyn Read) -> Self {
        Self { inner, consumed: 0 }
    }

    #[must_use]
    pub fn consumed(&self) -> u64 {
        self.consumed
    }
}

impl Read for CountingReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.consumed += n as u64;
        Ok(n)
    }
}
