//! Bounded pool of seekable read handles shared among reader threads.
//!
//! Construction fills an `ArrayQueue` with `chunk_reader_count` handles.
//! `acquire()` busy-waits with a minimal sleep when the pool is
//! momentarily empty — the "lock-free queue" / "busy-wait with minimal
//! sleep" option named in spec.md §4.2/§5.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_queue::ArrayQueue;

use crate::mirror::{MemoryBuffer, MemoryCursor};

const ACQUIRE_BACKOFF: Duration = Duration::from_micros(50);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// One read handle: either an independent file handle opened in
/// share-read-write mode, or a cursor over the shared in-memory mirror
/// buffer.
pub enum ReadHandle {
    File(File),
    Memory(MemoryCursor),
}

impl ReadHandle {
    fn open_file(path: &Path) -> io::Result<Self> {
        // Share-read-write: readers must be able to proceed while the
        // writer keeps appending to the same path.
        let file = OpenOptions::new().read(true).open(path)?;
        Ok(Self::File(file))
    }

    fn for_memory(buffer: Arc<MemoryBuffer>) -> Self {
        Self::Memory(MemoryCursor::new(buffer))
    }

    pub fn seek_to(&mut self, position: u64) -> io::Result<()> {
        match self {
            Self::File(file) => {
                file.seek(SeekFrom::Start(position))?;
            }
            Self::Memory(cursor) => {
                cursor.set_position(position);
            }
        }
        Ok(())
    }
}

impl Read for ReadHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::File(file) => file.read(buf),
            Self::Memory(cursor) => cursor.read(buf),
        }
    }
}

/// Bounded, shared set of read handles against one chunk.
pub struct ReaderPool {
    handles: ArrayQueue<ReadHandle>,
    capacity: usize,
}

impl ReaderPool {
    /// Fills the pool with `capacity` independent file handles on
    /// `path`.
    pub fn for_file(path: &Path, capacity: usize) -> io::Result<Self> {
        let handles = ArrayQueue::new(capacity.max(1));
        for _ in 0..capacity {
            let handle = ReadHandle::open_file(path)?;
            // capacity.max(1) guarantees room for every handle we just opened.
            let _ = handles.push(handle);
        }
        Ok(Self { handles, capacity })
    }

    /// Fills the pool with `capacity` cursors over the shared memory
    /// buffer.
    #[must_use]
    pub fn for_memory(buffer: &Arc<MemoryBuffer>, capacity: usize) -> Self {
        let handles = ArrayQueue::new(capacity.max(1));
        for _ in 0..capacity {
            let _ = handles.push(ReadHandle::for_memory(Arc::clone(buffer)));
        }
        Self { handles, capacity }
    }

    /// Blocks (busy-wait with a minimal sleep) until a handle is
    /// available.
    pub fn acquire(&self) -> ReadHandle {
        loop {
            if let Some(handle) = self.handles.pop() {
                return handle;
            }
            thread::sleep(ACQUIRE_BACKOFF);
        }
    }

    pub fn release(&self, handle: ReadHandle) {
        // The queue was sized to `capacity` and every handle we hand out
        // came from it, so this can never be full.
        let _ = self.handles.push(handle);
    }

    /// Drains every handle, up to 30 seconds. If fewer handles were
    /// reclaimed than were issued, logs and proceeds — outstanding
    /// handles become the OS's problem on process exit. This is the
    /// intentional leak documented in spec.md §4.2/§9 and DESIGN.md.
    pub fn close_all(&self, chunk_path: &Path) {
        let deadline = Instant::now() + DRAIN_TIMEOUT;
        let mut reclaimed = 0usize;
        while reclaimed < self.capacity && Instant::now() < deadline {
            if self.handles.pop().is_some() {
                reclaimed += 1;
            } else {
                thread::sleep(ACQUIRE_BACKOFF);
            }
        }

        if reclaimed < self.capacity {
            tracing::warn!(
                path = %chunk_path.display(),
                reclaimed,
                issued = self.capacity,
                "reader pool drain timed out after 30s; leaking outstanding handles"
            );
        }
    }
}
