//! Writer context: the single-owner append path for one chunk.
//!
//! Positioned writes rather than pure sequential appends, so that
//! `from_ongoing` recovery can resume overwriting from a recovered
//! position without first truncating the trailing garbage (spec.md
//! §4.7: "Truncation of the trailing garbage is deferred").

use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::sync::Arc;

use crate::mirror::MemoryBuffer;

enum WriteTarget {
    File(File),
    Memory(Arc<MemoryBuffer>),
}

/// Holds the append-only stream (file or memory buffer) for one chunk.
/// Chunk controllers wrap this in a `parking_lot::Mutex` to provide the
/// single process-wide `write_sync` lock named in spec.md §4.3.
pub struct WriterContext {
    target: WriteTarget,
}

impl WriterContext {
    #[must_use]
    pub fn for_file(file: File) -> Self {
        Self {
            target: WriteTarget::File(file),
        }
    }

    #[must_use]
    pub fn for_memory(buffer: Arc<MemoryBuffer>) -> Self {
        Self {
            target: WriteTarget::Memory(buffer),
        }
    }

    /// Writes `bytes` starting at absolute file/buffer offset
    /// `position`.
    pub fn append_data(&mut self, position: u64, bytes: &[u8]) -> io::Result<()> {
        match &mut self.target {
            WriteTarget::File(file) => {
                file.seek(SeekFrom::Start(position))?;
                file.write_all(bytes)
            }
            WriteTarget::Memory(buffer) => {
                buffer.write_at(position, bytes);
                Ok(())
            }
        }
    }

    /// Durably syncs the stream. A no-op for the memory target.
    pub fn flush_to_disk(&mut self) -> io::Result<()> {
        match &mut self.target {
            WriteTarget::File(file) => file.sync_all(),
            WriteTarget::Memory(_) => Ok(()),
        }
    }

    /// Truncates the stream to exactly `len` bytes — used at completion
    /// to drop any pre-allocated tail left over in variable-record mode.
    pub fn resize_stream(&mut self, len: u64) -> io::Result<()> {
        match &mut self.target {
            WriteTarget::File(file) => file.set_len(len),
            WriteTarget::Memory(buffer) => {
                buffer.truncate(len);
                Ok(())
            }
        }
    }

    pub fn into_file(self) -> Option<File> {
        match self.target {
            WriteTarget::File(file) => Some(file),
            WriteTarget::Memory(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::sync::Arc;

    use tempfile::NamedTempFile;

    use super::WriterContext;
    use crate::mirror::MemoryBuffer;

    #[test]
    fn file_target_appends_at_position() {
        let file = NamedTempFile::new().expect("tempfile should create");
        let mut writer = WriterContext::for_file(file.reopen().expect("reopen should succeed"));
        writer.append_data(0, b"abc").expect("write should succeed");
        writer.append_data(3, b"def").expect("write should succeed");
        writer.flush_to_disk().expect("flush should succeed");

        let mut contents = String::new();
        std::fs::File::open(file.path())
            .expect("open should succeed")
            .read_to_string(&mut contents)
            .expect("read should succeed");
        assert_eq!(contents, "abcdef");
    }

    #[test]
    fn file_target_resize_truncates() {
        let file = NamedTempFile::new().expect("tempfile should create");
        let mut writer = WriterContext::for_file(file.reopen().expect("reopen should succeed"));
        writer
            .append_data(0, b"abcdefgh")
            .expect("write should succeed");
        writer.resize_stream(4).expect("resize should succeed");

        let metadata = std::fs::metadata(file.path()).expect("metadata should read");
        assert_eq!(metadata.len(), 4);
    }

    #[test]
    fn memory_target_overwrites_from_recovered_position() {
        let buffer = Arc::new(MemoryBuffer::with_capacity(32));
        let mut writer = WriterContext::for_memory(Arc::clone(&buffer));
        writer.append_data(0, b"0123456789").expect("write ok");
        // Simulate ongoing recovery resuming at position 4, overwriting
        // trailing garbage rather than truncating first.
        writer.append_data(4, b"XYZ").expect("write ok");
        assert_eq!(buffer.snapshot(), b"0123XYZ789");
    }
}
