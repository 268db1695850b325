//! The chunk controller: glues the codec, reader pool, writer context
//! and memory mirror together into `create_new`/`from_completed`/
//! `from_ongoing`/`try_append`/`try_read_at`/`flush`/`complete`/
//! `try_cache_in_memory`/`uncache_from_memory`/`delete`/`close`.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::codec::{ChunkFooter, ChunkHeader, FOOTER_SIZE, HEADER_SIZE};
use crate::config::{ChunkConfig, ChunkDataLayout};
use crate::error::{ChunkError, CorruptChunkError, TryAppendOutcome};
use crate::mem_info::{MemoryInfo, SystemMemoryInfo};
use crate::mirror::MemoryBuffer;
use crate::reader_pool::ReaderPool;
use crate::record::{
    frame_fixed_record, frame_variable_record, read_u32_le, CountingReader, LogRecord, RecordReader,
};
use crate::writer::WriterContext;

/// A single append-only chunk file, plus optional in-memory mirror.
pub struct Chunk {
    path: PathBuf,
    config: ChunkConfig,
    header: ChunkHeader,
    footer: Mutex<Option<ChunkFooter>>,
    data_position: AtomicU64,
    is_completed: AtomicBool,
    is_deleting: AtomicBool,
    is_closed: AtomicBool,
    is_memory: bool,
    last_active: Mutex<Instant>,
    reader_pool: ReaderPool,
    writer: Mutex<Option<WriterContext>>,
    mirror: RwLock<Option<Arc<Chunk>>>,
    cache_sync: Mutex<()>,
    caching_in_progress: AtomicBool,
    mem_info: Arc<dyn MemoryInfo>,
}

impl Chunk {
    /// Creates a brand-new chunk. File-backed chunks are written via a
    /// sibling `{path}.{uuid}.tmp` file, flushed, closed, then renamed
    /// into place (spec.md §6).
    pub fn create_new(
        path: &Path,
        chunk_number: u64,
        config: ChunkConfig,
        is_memory: bool,
    ) -> Result<Arc<Self>, ChunkError> {
        Self::create_new_with_mem_info(
            path,
            chunk_number,
            config,
            is_memory,
            Arc::new(SystemMemoryInfo::new()),
        )
    }

    pub fn create_new_with_mem_info(
        path: &Path,
        chunk_number: u64,
        config: ChunkConfig,
        is_memory: bool,
        mem_info: Arc<dyn MemoryInfo>,
    ) -> Result<Arc<Self>, ChunkError> {
        config.validate()?;
        let header = ChunkHeader::new(chunk_number, config.chunk_data_total_size());

        let (reader_pool, writer) = if is_memory {
            let capacity = HEADER_SIZE + header.chunk_data_total_size + FOOTER_SIZE;
            let buffer = Arc::new(MemoryBuffer::with_capacity(capacity));
            let mut header_bytes = Vec::new();
            header.write_to(&mut header_bytes).map_err(ChunkError::Io)?;
            buffer.write_at(0, &header_bytes);

            let reader_pool = ReaderPool::for_memory(&buffer, config.chunk_reader_count);
            let writer = WriterContext::for_memory(Arc::clone(&buffer));
            (reader_pool, writer)
        } else {
            create_file_via_temp(path, &header)?;
            let writer_file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(path)
                .map_err(ChunkError::Io)?;
            let reader_pool =
                ReaderPool::for_file(path, config.chunk_reader_count).map_err(ChunkError::Io)?;
            (reader_pool, WriterContext::for_file(writer_file))
        };

        Ok(Arc::new(Self {
            path: path.to_path_buf(),
            config,
            header,
            footer: Mutex::new(None),
            data_position: AtomicU64::new(0),
            is_completed: AtomicBool::new(false),
            is_deleting: AtomicBool::new(false),
            is_closed: AtomicBool::new(false),
            is_memory,
            last_active: Mutex::new(Instant::now()),
            reader_pool,
            writer: Mutex::new(Some(writer)),
            mirror: RwLock::new(None),
            cache_sync: Mutex::new(()),
            caching_in_progress: AtomicBool::new(false),
            mem_info,
        }))
    }

    /// Opens a chunk that was sealed with a footer.
    pub fn from_completed(
        path: &Path,
        config: ChunkConfig,
        is_memory: bool,
    ) -> Result<Arc<Self>, ChunkError> {
        Self::from_completed_with_mem_info(path, config, is_memory, Arc::new(SystemMemoryInfo::new()))
    }

    pub fn from_completed_with_mem_info(
        path: &Path,
        config: ChunkConfig,
        is_memory: bool,
        mem_info: Arc<dyn MemoryInfo>,
    ) -> Result<Arc<Self>, ChunkError> {
        config.validate()?;
        let mut file = open_existing(path)?;
        let file_len = file.metadata().map_err(ChunkError::Io)?.len();

        let header = ChunkHeader::read_from(&mut file, path)?;
        file.seek(SeekFrom::Start(file_len.saturating_sub(FOOTER_SIZE)))
            .map_err(ChunkError::Io)?;
        let footer = ChunkFooter::read_from(&mut file, path)?;

        let expected_len = HEADER_SIZE + footer.chunk_data_total_size + FOOTER_SIZE;
        if file_len != expected_len {
            return Err(CorruptChunkError::BadChunkInDatabase {
                path: path.to_path_buf(),
                reason: format!("file length {file_len} != expected {expected_len}"),
            }
            .into());
        }
        if config.layout.is_fixed() && footer.chunk_data_total_size != header.chunk_data_total_size
        {
            return Err(CorruptChunkError::BadChunkInDatabase {
                path: path.to_path_buf(),
                reason: "fixed-mode footer total_size does not match header total_size"
                    .to_string(),
            }
            .into());
        }

        let reader_pool = if is_memory {
            file.seek(SeekFrom::Start(0)).map_err(ChunkError::Io)?;
            let mut bytes = vec![0_u8; file_len as usize];
            file.read_exact(&mut bytes).map_err(ChunkError::Io)?;
            let buffer = Arc::new(MemoryBuffer::from_bytes(bytes));
            ReaderPool::for_memory(&buffer, config.chunk_reader_count)
        } else {
            ReaderPool::for_file(path, config.chunk_reader_count).map_err(ChunkError::Io)?
        };

        Ok(Arc::new(Self {
            path: path.to_path_buf(),
            config,
            header,
            footer: Mutex::new(Some(footer)),
            data_position: AtomicU64::new(footer.chunk_data_total_size),
            is_completed: AtomicBool::new(true),
            is_deleting: AtomicBool::new(false),
            is_closed: AtomicBool::new(false),
            is_memory,
            last_active: Mutex::new(Instant::now()),
            reader_pool,
            writer: Mutex::new(None),
            mirror: RwLock::new(None),
            cache_sync: Mutex::new(()),
            caching_in_progress: AtomicBool::new(false),
            mem_info,
        }))
    }

    /// Reopens a chunk that was still being appended to when the
    /// process stopped, recovering `data_position` by scanning forward
    /// from the header until the first invalid probe.
    pub fn from_ongoing<T>(
        path: &Path,
        config: ChunkConfig,
        read_record: impl RecordReader<T>,
        is_memory: bool,
    ) -> Result<Arc<Self>, ChunkError> {
        Self::from_ongoing_with_mem_info(
            path,
            config,
            read_record,
            is_memory,
            Arc::new(SystemMemoryInfo::new()),
        )
    }

    pub fn from_ongoing_with_mem_info<T>(
        path: &Path,
        config: ChunkConfig,
        read_record: impl RecordReader<T>,
        is_memory: bool,
        mem_info: Arc<dyn MemoryInfo>,
    ) -> Result<Arc<Self>, ChunkError> {
        config.validate()?;
        let mut file = open_existing(path)?;
        let file_len = file.metadata().map_err(ChunkError::Io)?.len();
        let header = ChunkHeader::read_from(&mut file, path)?;

        let scan_bound = file_len.saturating_sub(FOOTER_SIZE);
        let recovered_data_position =
            scan_ongoing(&mut file, &config, scan_bound, read_record).map_err(ChunkError::Io)?;

        let (reader_pool, writer) = if is_memory {
            let capacity = HEADER_SIZE + header.chunk_data_total_size + FOOTER_SIZE;
            let buffer = Arc::new(MemoryBuffer::with_capacity(capacity));
            let mut header_bytes = Vec::new();
            header.write_to(&mut header_bytes).map_err(ChunkError::Io)?;
            buffer.write_at(0, &header_bytes);

            file.seek(SeekFrom::Start(HEADER_SIZE)).map_err(ChunkError::Io)?;
            let mut data_bytes = vec![0_u8; recovered_data_position as usize];
            file.read_exact(&mut data_bytes).map_err(ChunkError::Io)?;
            buffer.write_at(HEADER_SIZE, &data_bytes);

            let reader_pool = ReaderPool::for_memory(&buffer, config.chunk_reader_count);
            let writer = WriterContext::for_memory(Arc::clone(&buffer));
            (reader_pool, writer)
        } else {
            let reader_pool =
                ReaderPool::for_file(path, config.chunk_reader_count).map_err(ChunkError::Io)?;
            let writer_file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(path)
                .map_err(ChunkError::Io)?;
            (reader_pool, WriterContext::for_file(writer_file))
        };

        Ok(Arc::new(Self {
            path: path.to_path_buf(),
            config,
            header,
            footer: Mutex::new(None),
            data_position: AtomicU64::new(recovered_data_position),
            is_completed: AtomicBool::new(false),
            is_deleting: AtomicBool::new(false),
            is_closed: AtomicBool::new(false),
            is_memory,
            last_active: Mutex::new(Instant::now()),
            reader_pool,
            writer: Mutex::new(Some(writer)),
            mirror: RwLock::new(None),
            cache_sync: Mutex::new(()),
            caching_in_progress: AtomicBool::new(false),
            mem_info,
        }))
    }

    #[must_use]
    pub fn chunk_number(&self) -> u64 {
        self.header.chunk_number
    }

    #[must_use]
    pub fn data_position(&self) -> u64 {
        self.data_position.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.is_completed.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_deleting(&self) -> bool {
        self.is_deleting.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn has_memory_mirror(&self) -> bool {
        self.mirror.read().is_some()
    }

    #[must_use]
    pub fn last_active(&self) -> Instant {
        *self.last_active.lock()
    }

    /// Appends one record, returning its logical global position or
    /// `NotEnoughSpace`.
    pub fn try_append(&self, record: &dyn LogRecord) -> Result<TryAppendOutcome, ChunkError> {
        if self.is_completed.load(Ordering::Acquire) {
            return Err(ChunkError::ChunkWriteError {
                chunk_number: self.header.chunk_number,
                message: "cannot append to a completed chunk".to_string(),
            });
        }

        let data_position_before = self.data_position.load(Ordering::Acquire);
        let global_position = self.header.chunk_data_start_position() + data_position_before;
        let chunk_number = self.header.chunk_number;

        let framed = match self.config.layout {
            ChunkDataLayout::Variable { .. } => frame_variable_record(
                record,
                global_position,
                self.config.max_log_record_size,
                chunk_number,
            )?,
            ChunkDataLayout::Fixed {
                chunk_data_unit_size,
                ..
            } => frame_fixed_record(record, global_position, chunk_data_unit_size, chunk_number)?,
        };

        let outcome = self.try_append_framed(&framed)?;

        if let TryAppendOutcome::Success { global_position } = outcome {
            if let Some(mirror) = self.mirror.read().clone() {
                mirror.dual_write(global_position, &framed)?;
            }
        }

        Ok(outcome)
    }

    /// Appends already-framed bytes under `write_sync`. Shared by
    /// `try_append` and the mirror's `dual_write`.
    fn try_append_framed(&self, framed: &[u8]) -> Result<TryAppendOutcome, ChunkError> {
        let mut writer_guard = self.writer.lock();
        let writer = writer_guard.as_mut().ok_or_else(|| ChunkError::ChunkWriteError {
            chunk_number: self.header.chunk_number,
            message: "writer already disposed".to_string(),
        })?;

        let data_position_before = self.data_position.load(Ordering::Acquire);
        let total_size = self.config.chunk_data_total_size();
        if data_position_before + framed.len() as u64 > total_size {
            return Ok(TryAppendOutcome::NotEnoughSpace);
        }

        let position = HEADER_SIZE + data_position_before;
        writer.append_data(position, framed).map_err(ChunkError::Io)?;

        let new_data_position = data_position_before + framed.len() as u64;
        self.data_position.store(new_data_position, Ordering::Release);
        drop(writer_guard);

        let global_position = self.header.chunk_data_start_position() + data_position_before;
        self.touch_last_active();
        Ok(TryAppendOutcome::Success { global_position })
    }

    /// Writes already-framed bytes produced for the parent's append into
    /// this mirror chunk, verifying the resulting position matches.
    /// Used only when this chunk is itself a memory mirror.
    fn dual_write(&self, expected_global_position: u64, framed: &[u8]) -> Result<(), ChunkError> {
        match self.try_append_framed(framed)? {
            TryAppendOutcome::Success { global_position } if global_position == expected_global_position => {
                Ok(())
            }
            TryAppendOutcome::Success { global_position } => Err(ChunkError::ChunkWriteError {
                chunk_number: self.header.chunk_number,
                message: format!(
                    "memory mirror position mismatch: expected {expected_global_position}, got {global_position}"
                ),
            }),
            TryAppendOutcome::NotEnoughSpace => Err(ChunkError::ChunkWriteError {
                chunk_number: self.header.chunk_number,
                message: "memory mirror rejected append for lack of space".to_string(),
            }),
        }
    }

    /// Reads the record committed at `data_position`. Delegates to the
    /// memory mirror when one is attached and never touches the file in
    /// that case.
    pub fn try_read_at<T>(
        self: &Arc<Self>,
        data_position: u64,
        mut read_record: impl RecordReader<T>,
    ) -> Result<T, ChunkError> {
        if let Some(mirror) = self.mirror.read().clone() {
            return mirror.try_read_at(data_position, read_record);
        }

        if self.is_deleting.load(Ordering::Acquire) {
            return Err(ChunkError::InvalidReadError(
                "chunk is being deleted".to_string(),
            ));
        }

        self.maybe_schedule_opportunistic_caching();

        let current_data_position = self.data_position.load(Ordering::Acquire);
        if data_position >= current_data_position {
            return Err(ChunkError::InvalidReadError(format!(
                "data_position {data_position} is not less than committed data_position {current_data_position}"
            )));
        }

        let mut handle = self.reader_pool.acquire();
        let result = handle
            .seek_to(HEADER_SIZE + data_position)
            .map_err(ChunkError::Io)
            .and_then(|()| {
                self.read_framed(&mut handle, data_position, current_data_position, &mut read_record)
            });
        self.reader_pool.release(handle);
        self.touch_last_active();
        result
    }

    fn read_framed<T>(
        &self,
        handle: &mut dyn Read,
        data_position: u64,
        current_data_position: u64,
        read_record: &mut dyn RecordReader<T>,
    ) -> Result<T, ChunkError> {
        match self.config.layout {
            ChunkDataLayout::Variable {
                ..
            } => {
                let length = u64::from(
                    read_u32_le(handle)
                        .map_err(|_| ChunkError::InvalidReadError("truncated length prefix".to_string()))?,
                );
                if length == 0 || length > self.config.max_log_record_size {
                    return Err(ChunkError::InvalidReadError(format!(
                        "record length {length} out of range"
                    )));
                }
                if data_position + length + 8 > current_data_position {
                    return Err(ChunkError::InvalidReadError(
                        "record extends past committed data".to_string(),
                    ));
                }

                let record = read_record
                    .read_record(length, handle)
                    .map_err(ChunkError::Io)?
                    .ok_or_else(|| ChunkError::InvalidReadError("read_record returned null".to_string()))?;

                let suffix = u64::from(
                    read_u32_le(handle)
                        .map_err(|_| ChunkError::InvalidReadError("truncated length suffix".to_string()))?,
                );
                if suffix != length {
                    return Err(ChunkError::InvalidReadError(format!(
                        "prefix {length} != suffix {suffix}"
                    )));
                }
                Ok(record)
            }
            ChunkDataLayout::Fixed {
                chunk_data_unit_size,
                ..
            } => {
                if data_position + chunk_data_unit_size > current_data_position {
                    return Err(ChunkError::InvalidReadError(
                        "record extends past committed data".to_string(),
                    ));
                }

                let mut counting = CountingReader::new(handle);
                let record = read_record
                    .read_record(chunk_data_unit_size, &mut counting)
                    .map_err(ChunkError::Io)?
                    .ok_or_else(|| ChunkError::InvalidReadError("read_record returned null".to_string()))?;

                if counting.consumed() != chunk_data_unit_size {
                    return Err(ChunkError::InvalidReadError(format!(
                        "read_record consumed {} bytes, expected {chunk_data_unit_size}",
                        counting.consumed()
                    )));
                }
                Ok(record)
            }
        }
    }

    fn maybe_schedule_opportunistic_caching(self: &Arc<Self>) {
        if self.is_memory || !self.is_completed.load(Ordering::Acquire) {
            return;
        }
        if self
            .caching_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let chunk = Arc::clone(self);
        thread::spawn(move || {
            if let Err(error) = chunk.try_cache_in_memory() {
                tracing::warn!(
                    chunk_number = chunk.header.chunk_number,
                    %error,
                    "opportunistic in-memory caching failed"
                );
            }
        });
    }

    /// Durably flushes any pending appends.
    pub fn flush(&self) -> Result<(), ChunkError> {
        let mut writer_guard = self.writer.lock();
        if let Some(writer) = writer_guard.as_mut() {
            writer.flush_to_disk().map_err(ChunkError::Io)?;
        }
        Ok(())
    }

    /// Seals the chunk with a footer. Idempotent.
    pub fn complete(&self) -> Result<(), ChunkError> {
        if self.is_completed.load(Ordering::Acquire) {
            return Ok(());
        }

        let mut writer_guard = self.writer.lock();
        let Some(writer) = writer_guard.as_mut() else {
            return Ok(());
        };

        let data_position = self.data_position.load(Ordering::Acquire);
        let total_size = self.config.chunk_data_total_size();
        if self.config.layout.is_fixed() && data_position != total_size {
            return Err(ChunkError::ChunkCompleteError {
                data_position,
                total_size,
            });
        }

        let footer = ChunkFooter::new(data_position);
        let mut footer_bytes = Vec::new();
        footer.write_to(&mut footer_bytes).map_err(ChunkError::Io)?;
        writer
            .append_data(HEADER_SIZE + data_position, &footer_bytes)
            .map_err(ChunkError::Io)?;
        writer.flush_to_disk().map_err(ChunkError::Io)?;
        writer
            .resize_stream(HEADER_SIZE + data_position + FOOTER_SIZE)
            .map_err(ChunkError::Io)?;

        self.is_completed.store(true, Ordering::Release);
        *self.footer.lock() = Some(footer);
        let disposed = writer_guard.take();
        drop(writer_guard);

        if !self.is_memory {
            if let Some(file) = disposed.and_then(WriterContext::into_file) {
                drop(file);
            }
            if let Err(error) = set_readonly(&self.path, true) {
                tracing::warn!(path = %self.path.display(), %error, "failed to set chunk read-only on complete");
            }
        }

        if let Some(mirror) = self.mirror.read().clone() {
            mirror.complete()?;
        }

        Ok(())
    }

    /// Attempts to attach an in-memory mirror, subject to the memory
    /// budget in `config`. Always clears the single-flight
    /// `caching_in_progress` flag on exit, whether it admits the mirror
    /// or not.
    pub fn try_cache_in_memory(self: &Arc<Self>) -> Result<bool, ChunkError> {
        let _guard = self.cache_sync.lock();
        let result = self.try_cache_in_memory_inner();
        self.caching_in_progress.store(false, Ordering::Release);
        result
    }

    fn try_cache_in_memory_inner(self: &Arc<Self>) -> Result<bool, ChunkError> {
        if self.is_memory || !self.is_completed.load(Ordering::Acquire) || self.has_memory_mirror() {
            return Ok(false);
        }

        let chunk_size_mb = (HEADER_SIZE + self.header.chunk_data_total_size + FOOTER_SIZE)
            .div_ceil(1024 * 1024);
        let total_mb = self.mem_info.total_physical_mb();
        let used_percent = u64::from(self.mem_info.used_percent());
        let used_mb = total_mb.saturating_mul(used_percent) / 100;
        let budget_mb =
            total_mb.saturating_mul(u64::from(self.config.message_chunk_cache_max_percent)) / 100;

        if !self.config.force_cache_chunk && used_mb + chunk_size_mb > budget_mb {
            return Ok(false);
        }

        match Self::from_completed_with_mem_info(
            &self.path,
            self.config,
            true,
            Arc::clone(&self.mem_info),
        ) {
            Ok(mirror) => {
                *self.mirror.write() = Some(mirror);
                Ok(true)
            }
            Err(error) => {
                tracing::warn!(
                    chunk_number = self.header.chunk_number,
                    %error,
                    "failed to build in-memory mirror"
                );
                Ok(false)
            }
        }
    }

    /// Detaches and disposes the mirror, if any.
    pub fn uncache_from_memory(&self) -> Result<bool, ChunkError> {
        let _guard = self.cache_sync.lock();
        if self.is_memory || !self.is_completed.load(Ordering::Acquire) {
            return Ok(false);
        }

        let mut mirror_guard = self.mirror.write();
        if mirror_guard.is_none() {
            return Ok(false);
        }
        *mirror_guard = None;
        Ok(true)
    }

    /// Permanently removes a completed, file-backed chunk. In-flight
    /// reads observe `is_deleting` and fail cleanly on their next
    /// acquire.
    pub fn delete(&self) -> Result<(), ChunkError> {
        if self.is_memory {
            return Err(ChunkError::ChunkWriteError {
                chunk_number: self.header.chunk_number,
                message: "cannot delete a memory-mirror chunk".to_string(),
            });
        }
        if !self.is_completed.load(Ordering::Acquire) {
            return Err(ChunkError::ChunkWriteError {
                chunk_number: self.header.chunk_number,
                message: "cannot delete an incomplete chunk".to_string(),
            });
        }

        self.is_deleting.store(true, Ordering::Release);
        self.reader_pool.close_all(&self.path);

        if let Err(error) = set_readonly(&self.path, false) {
            tracing::warn!(path = %self.path.display(), %error, "failed to clear read-only attribute before delete");
        }

        std::fs::remove_file(&self.path).map_err(ChunkError::Io)?;
        *self.mirror.write() = None;
        Ok(())
    }

    /// Idempotent teardown: flushes pending writes (if any) and drains
    /// the reader pool, without deleting the underlying file.
    pub fn close(&self) {
        if self
            .is_closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        if !self.is_completed.load(Ordering::Acquire) {
            let _ = self.flush();
        }
        self.reader_pool.close_all(&self.path);
    }

    fn touch_last_active(&self) {
        *self.last_active.lock() = Instant::now();
    }
}

fn create_file_via_temp(path: &Path, header: &ChunkHeader) -> Result<(), ChunkError> {
    let temp_path = sibling_temp_path(path);
    {
        let mut temp_file = File::create(&temp_path).map_err(ChunkError::Io)?;
        header.write_to(&mut temp_file).map_err(ChunkError::Io)?;
        temp_file.flush().map_err(ChunkError::Io)?;
        temp_file.sync_all().map_err(ChunkError::Io)?;
    }
    std::fs::rename(&temp_path, path).map_err(ChunkError::Io)?;
    Ok(())
}

fn sibling_temp_path(path: &Path) -> PathBuf {
    let mut temp = path.as_os_str().to_owned();
    temp.push(format!(".{}.tmp", Uuid::new_v4()));
    PathBuf::from(temp)
}

fn open_existing(path: &Path) -> Result<File, ChunkError> {
    match File::open(path) {
        Ok(file) => Ok(file),
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            Err(CorruptChunkError::ChunkFileNotExist {
                path: path.to_path_buf(),
            }
            .into())
        }
        Err(error) => Err(CorruptChunkError::Io(error).into()),
    }
}

// Setting FILE_ATTRIBUTE_NOT_CONTENT_INDEXED on Windows needs a syscall
// outside std and no such crate is part of this stack; the read-only bit
// below is the best-effort attribute this crate sets on complete/delete.
fn set_readonly(path: &Path, readonly: bool) -> io::Result<()> {
    let metadata = std::fs::metadata(path)?;
    let mut permissions = metadata.permissions();
    permissions.set_readonly(readonly);
    std::fs::set_permissions(path, permissions)
}

/// Scans forward from the header, probing one record at a time using
/// the same framing rules as `try_read_at`, stopping cleanly at the
/// first invalid probe. Returns the recovered `data_position`.
fn scan_ongoing<T>(
    file: &mut File,
    config: &ChunkConfig,
    scan_bound: u64,
    mut read_record: impl RecordReader<T>,
) -> io::Result<u64> {
    let mut good_position = HEADER_SIZE;

    loop {
        let probe_start = good_position;
        if probe_start >= scan_bound {
            break;
        }
        if file.seek(SeekFrom::Start(probe_start)).is_err() {
            break;
        }

        let probed = match config.layout {
            ChunkDataLayout::Variable { .. } => probe_variable_record(
                file,
                probe_start,
                scan_bound,
                config.max_log_record_size,
                &mut read_record,
            ),
            ChunkDataLayout::Fixed {
                chunk_data_unit_size,
                ..
            } => probe_fixed_record(file, probe_start, scan_bound, chunk_data_unit_size, &mut read_record),
        };

        match probed {
            Some(new_position) => good_position = new_position,
            None => break,
        }
    }

    Ok(good_position - HEADER_SIZE)
}

fn probe_variable_record<T>(
    file: &mut File,
    probe_start: u64,
    scan_bound: u64,
    max_log_record_size: u64,
    read_record: &mut dyn RecordReader<T>,
) -> Option<u64> {
    let length = u64::from(read_u32_le(file).ok()?);
    if length == 0 || length > max_log_record_size {
        return None;
    }
    if probe_start + 8 + length > scan_bound {
        return None;
    }
    read_record.read_record(length, file).ok()??;
    let suffix = u64::from(read_u32_le(file).ok()?);
    if suffix != length {
        return None;
    }
    Some(probe_start + 8 + length)
}

fn probe_fixed_record<T>(
    file: &mut File,
    probe_start: u64,
    scan_bound: u64,
    unit_size: u64,
    read_record: &mut dyn RecordReader<T>,
) -> Option<u64> {
    if probe_start + unit_size > scan_bound {
        return None;
    }
    let mut counting = CountingReader::new(file);
    read_record.read_record(unit_size, &mut counting).ok()??;
    if counting.consumed() != unit_size {
        return None;
    }
    Some(probe_start + unit_size)
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Seek, SeekFrom, Write};

    use tempfile::TempDir;

    use super::Chunk;
    use crate::config::ChunkConfig;
    use crate::error::{ChunkError, TryAppendOutcome};
    use crate::mem_info::FixedMemoryInfo;
    use crate::record::LogRecord;

    struct BytesRecord(Vec<u8>);

    impl LogRecord for BytesRecord {
        fn write_to(&self, _global_position: u64, writer: &mut dyn Write) -> std::io::Result<()> {
            writer.write_all(&self.0)
        }
    }

    fn read_bytes(length: u64, reader: &mut dyn Read) -> std::io::Result<Option<Vec<u8>>> {
        let mut buf = vec![0_u8; length as usize];
        reader.read_exact(&mut buf)?;
        Ok(Some(buf))
    }

    fn chunk_path(dir: &TempDir, name: &str) -> std::path::PathBuf {
        dir.path().join(name)
    }

    #[test]
    fn s1_fixed_mode_round_trip_and_capacity() {
        let dir = TempDir::new().expect("tempdir should create");
        let path = chunk_path(&dir, "fixed.chunk");
        let config = ChunkConfig::fixed(16, 4, 2);
        let chunk = Chunk::create_new(&path, 0, config, false).expect("create should succeed");

        let records: Vec<Vec<u8>> = (0..4u8).map(|b| vec![b.wrapping_mul(0x11); 16]).collect();
        for record in &records {
            let outcome = chunk
                .try_append(&BytesRecord(record.clone()))
                .expect("append should succeed");
            assert!(matches!(outcome, TryAppendOutcome::Success { .. }));
        }

        let fifth = chunk
            .try_append(&BytesRecord(vec![0xFF; 16]))
            .expect("append call should not error");
        assert_eq!(fifth, TryAppendOutcome::NotEnoughSpace);

        chunk.complete().expect("complete should succeed");
        let metadata = std::fs::metadata(&path).expect("metadata should read");
        assert_eq!(metadata.len(), 32 + 64 + 24);
    }

    #[test]
    fn s2_variable_mode_framing_bytes() {
        let dir = TempDir::new().expect("tempdir should create");
        let path = chunk_path(&dir, "variable.chunk");
        let config = ChunkConfig::variable(1024, 512, 2);
        let chunk = Chunk::create_new(&path, 0, config, false).expect("create should succeed");

        let payload = vec![0xAB; 10];
        let outcome = chunk
            .try_append(&BytesRecord(payload.clone()))
            .expect("append should succeed");
        assert!(matches!(outcome, TryAppendOutcome::Success { .. }));

        let mut file = std::fs::File::open(&path).expect("open should succeed");
        file.seek(SeekFrom::Start(super::HEADER_SIZE))
            .expect("seek should succeed");
        let mut framed = [0_u8; 18];
        file.read_exact(&mut framed).expect("read should succeed");
        assert_eq!(&framed[0..4], 10u32.to_le_bytes().as_slice());
        assert_eq!(&framed[4..14], payload.as_slice());
        assert_eq!(&framed[14..18], 10u32.to_le_bytes().as_slice());
    }

    #[test]
    fn round_trip_returns_byte_equal_record() {
        let dir = TempDir::new().expect("tempdir should create");
        let path = chunk_path(&dir, "roundtrip.chunk");
        let config = ChunkConfig::variable(1024, 512, 2);
        let chunk = Chunk::create_new(&path, 2, config, false).expect("create should succeed");

        let payload = b"round-trip-record".to_vec();
        let outcome = chunk
            .try_append(&BytesRecord(payload.clone()))
            .expect("append should succeed");
        let TryAppendOutcome::Success { global_position } = outcome else {
            panic!("expected success");
        };

        let start = chunk.header.chunk_data_start_position();
        let read_back = chunk
            .try_read_at(global_position - start, read_bytes)
            .expect("read should succeed");
        assert_eq!(read_back, payload);
    }

    #[test]
    fn s3_ongoing_recovery_ignores_truncated_tail() {
        let dir = TempDir::new().expect("tempdir should create");
        let path = chunk_path(&dir, "ongoing.chunk");
        let config = ChunkConfig::variable(1024, 512, 2);

        {
            let chunk = Chunk::create_new(&path, 0, config, false).expect("create should succeed");
            chunk
                .try_append(&BytesRecord(vec![0xAA; 10]))
                .expect("append should succeed");
            chunk
                .try_append(&BytesRecord(vec![0xBB; 20]))
                .expect("append should succeed");
            chunk
                .try_append(&BytesRecord(vec![0xCC; 30]))
                .expect("append should succeed");
            chunk.flush().expect("flush should succeed");
        }

        let full_len = std::fs::metadata(&path).expect("metadata should read").len();
        let truncated = full_len - 3;
        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .expect("open should succeed");
        file.set_len(truncated).expect("truncate should succeed");
        drop(file);

        let recovered = Chunk::from_ongoing(&path, config, read_bytes, false)
            .expect("recovery should succeed");
        assert_eq!(recovered.data_position(), 18 + 28);
    }

    #[test]
    fn s4_corruption_detection_on_suffix_mismatch() {
        let dir = TempDir::new().expect("tempdir should create");
        let path = chunk_path(&dir, "corrupt.chunk");
        let config = ChunkConfig::variable(1024, 512, 1);
        let chunk = Chunk::create_new(&path, 0, config, false).expect("create should succeed");
        chunk
            .try_append(&BytesRecord(vec![0xAB; 10]))
            .expect("append should succeed");
        chunk.flush().expect("flush should succeed");
        drop(chunk);

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .expect("open should succeed");
        // suffix starts at HEADER_SIZE + 4 (prefix) + 10 (payload)
        file.seek(std::io::SeekFrom::Start(super::HEADER_SIZE + 14))
            .expect("seek should succeed");
        file.write_all(&[0xFF, 0xFF, 0xFF, 0xFF]).expect("write should succeed");
        drop(file);

        let reopened = Chunk::from_completed_with_mem_info(
            &path,
            config,
            false,
            std::sync::Arc::new(FixedMemoryInfo {
                total_mb: 0,
                used_percent: 0,
            }),
        );
        // The chunk was never completed (no footer), so from_completed
        // should reject it outright as corrupt.
        assert!(reopened.is_err());

        let ongoing = Chunk::from_ongoing(&path, config, read_bytes, false)
            .expect("ongoing open should succeed even with a corrupt tail");
        let error = ongoing
            .try_read_at(0, read_bytes)
            .expect_err("corrupt suffix should be rejected");
        assert!(matches!(error, ChunkError::InvalidReadError(_)));
    }

    #[test]
    fn s5_mirror_parity_after_caching() {
        let dir = TempDir::new().expect("tempdir should create");
        let path = chunk_path(&dir, "mirrored.chunk");
        let config = ChunkConfig::variable(4096, 512, 2).with_cache(100, true);
        let chunk = Chunk::create_new(&path, 0, config, false).expect("create should succeed");

        let mut positions = Vec::new();
        for i in 0..20u8 {
            let outcome = chunk
                .try_append(&BytesRecord(vec![i; 8]))
                .expect("append should succeed");
            if let TryAppendOutcome::Success { global_position } = outcome {
                positions.push(global_position);
            }
        }
        chunk.complete().expect("complete should succeed");

        let admitted = chunk.try_cache_in_memory().expect("cache attempt should not error");
        assert!(admitted);
        assert!(chunk.has_memory_mirror());

        let start = chunk.header.chunk_data_start_position();
        for (i, position) in positions.iter().enumerate() {
            let record = chunk
                .try_read_at(position - start, read_bytes)
                .expect("mirrored read should succeed");
            assert_eq!(record, vec![i as u8; 8]);
        }
    }

    #[test]
    fn s6_reads_fail_cleanly_after_delete() {
        let dir = TempDir::new().expect("tempdir should create");
        let path = chunk_path(&dir, "deleted.chunk");
        let config = ChunkConfig::variable(1024, 512, 2);
        let chunk = Chunk::create_new(&path, 0, config, false).expect("create should succeed");
        let outcome = chunk
            .try_append(&BytesRecord(vec![0xAB; 8]))
            .expect("append should succeed");
        chunk.complete().expect("complete should succeed");

        let TryAppendOutcome::Success { global_position } = outcome else {
            panic!("expected success");
        };
        let start = chunk.header.chunk_data_start_position();

        chunk.delete().expect("delete should succeed");
        let error = chunk
            .try_read_at(global_position - start, read_bytes)
            .expect_err("read after delete should fail");
        assert!(matches!(error, ChunkError::InvalidReadError(_)));
        assert!(!path.exists());
    }

    #[test]
    fn complete_is_idempotent() {
        let dir = TempDir::new().expect("tempdir should create");
        let path = chunk_path(&dir, "idempotent.chunk");
        let config = ChunkConfig::variable(1024, 512, 1);
        let chunk = Chunk::create_new(&path, 0, config, false).expect("create should succeed");
        chunk.complete().expect("first complete should succeed");
        chunk.complete().expect("second complete should be a no-op");
    }

    #[test]
    fn delete_refuses_incomplete_chunk() {
        let dir = TempDir::new().expect("tempdir should create");
        let path = chunk_path(&dir, "incomplete.chunk");
        let config = ChunkConfig::variable(1024, 512, 1);
        let chunk = Chunk::create_new(&path, 0, config, false).expect("create should succeed");
        let error = chunk.delete().expect_err("delete should refuse");
        assert!(matches!(error, ChunkError::ChunkWriteError { .. }));
    }

    #[test]
    fn append_after_complete_fails() {
        let dir = TempDir::new().expect("tempdir should create");
        let path = chunk_path(&dir, "completed_append.chunk");
        let config = ChunkConfig::variable(1024, 512, 1);
        let chunk = Chunk::create_new(&path, 0, config, false).expect("create should succeed");
        chunk.complete().expect("complete should succeed");

        let error = chunk
            .try_append(&BytesRecord(vec![0xCD; 4]))
            .expect_err("append after complete should fail");
        assert!(matches!(error, ChunkError::ChunkWriteError { .. }));
    }

    #[test]
    fn cache_admission_respects_memory_budget() {
        let dir = TempDir::new().expect("tempdir should create");
        let path = chunk_path(&dir, "budget.chunk");
        let config = ChunkConfig::variable(1024, 512, 1).with_cache(10, false);
        let chunk = Chunk::create_new_with_mem_info(
            &path,
            0,
            config,
            false,
            std::sync::Arc::new(FixedMemoryInfo {
                total_mb: 1000,
                used_percent: 95,
            }),
        )
        .expect("create should succeed");
        chunk.complete().expect("complete should succeed");

        let admitted = chunk.try_cache_in_memory().expect("cache attempt should not error");
        assert!(!admitted);
        assert!(!chunk.has_memory_mirror());
    }

    #[test]
    fn ongoing_reopen_without_prior_data_starts_at_zero() {
        let dir = TempDir::new().expect("tempdir should create");
        let path = chunk_path(&dir, "fresh_ongoing.chunk");
        let config = ChunkConfig::variable(1024, 512, 1);
        {
            Chunk::create_new(&path, 0, config, false).expect("create should succeed");
        }
        let reopened = Chunk::from_ongoing(&path, config, read_bytes, false)
            .expect("recovery should succeed");
        assert_eq!(reopened.data_position(), 0);
    }
}
