//! The in-memory mirror: an owned, growable byte buffer standing in for
//! the "unmanaged buffer" spec.md §3/§9 describes. Rust has no raw
//! off-heap allocation story as lightweight as the teacher's target
//! runtime, so this models the same ownership discipline — exclusive
//! owner is the mirror chunk, released exactly once on drop, shared
//! with readers only through `Arc` plus a lock that guards the grow-only
//! append — over a plain heap `Vec<u8>`.

use std::io;
use std::sync::Arc;

use parking_lot::RwLock;

/// Exclusively owned by one memory-mirror chunk. Cloning the `Arc`
/// handed to reader-pool cursors does not transfer ownership; only the
/// mirror chunk ever appends to it or lets it drop for good.
pub struct MemoryBuffer {
    inner: RwLock<Vec<u8>>,
}

impl MemoryBuffer {
    #[must_use]
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            inner: RwLock::new(Vec::with_capacity(capacity as usize)),
        }
    }

    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            inner: RwLock::new(bytes),
        }
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.inner.read().len() as u64
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn append(&self, bytes: &[u8]) {
        self.inner.write().extend_from_slice(bytes);
    }

    /// Writes `bytes` at an absolute offset, growing the buffer (and
    /// zero-filling any gap) as needed. Used for ongoing recovery, where
    /// subsequent appends overwrite from the recovered position rather
    /// than strictly extending the buffer — the same sparse-write
    /// behavior a `File` gives a seek-then-write sequence.
    pub fn write_at(&self, position: u64, bytes: &[u8]) {
        let mut guard = self.inner.write();
        let position = position as usize;
        let end = position + bytes.len();
        if guard.len() < end {
            guard.resize(end, 0);
        }
        guard[position..end].copy_from_slice(bytes);
    }

    /// Truncates to exactly `len` bytes (used at completion, mirroring
    /// `ResizeStream` on the file-backed writer context).
    pub fn truncate(&self, len: u64) {
        self.inner.write().truncate(len as usize);
    }

    /// Reads as many bytes as available starting at `position`, up to
    /// `buf.len()`. Returns the number of bytes copied.
    #[must_use]
    pub fn read_at(&self, position: u64, buf: &mut [u8]) -> usize {
        let guard = self.inner.read();
        let position = position as usize;
        if position >= guard.len() {
            return 0;
        }
        let available = &guard[position..];
        let to_copy = available.len().min(buf.len());
        buf[..to_copy].copy_from_slice(&available[..to_copy]);
        to_copy
    }

    /// Snapshot of the whole buffer, used when sealing a mirror into a
    /// new file-backed chunk is never required — mirrors are never
    /// themselves written back to disk — but is handy for tests and for
    /// S5-style parity checks.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.inner.read().clone()
    }
}

/// A single reader's position into a shared [`MemoryBuffer`]. Plays the
/// same role as a file's seek position, but against the in-memory
/// mirror instead of a `File` handle.
pub struct MemoryCursor {
    buffer: Arc<MemoryBuffer>,
    position: u64,
}

impl MemoryCursor {
    #[must_use]
    pub fn new(buffer: Arc<MemoryBuffer>) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    pub fn set_position(&mut self, position: u64) {
        self.position = position;
    }
}

impl io::Read for MemoryCursor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let copied = self.buffer.read_at(self.position, buf);
        self.position += copied as u64;
        Ok(copied)
    }
}
