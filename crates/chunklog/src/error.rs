use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures that can surface while opening a chunk file.
#[derive(Debug, Error)]
pub enum CorruptChunkError {
    #[error("chunk file does not exist: {path:?}")]
    ChunkFileNotExist { path: PathBuf },

    #[error("chunk at {path:?} is not a valid chunk: {reason}")]
    BadChunkInDatabase { path: PathBuf, reason: String },

    #[error("I/O error opening chunk: {0}")]
    Io(#[from] io::Error),
}

/// Top-level error type for all chunk operations.
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("corrupt database: {0}")]
    CorruptDatabase(#[from] CorruptChunkError),

    #[error("chunk {chunk_number} write error: {message}")]
    ChunkWriteError { chunk_number: u64, message: String },

    #[error("chunk complete error: data_position {data_position} != total_size {total_size}")]
    ChunkCompleteError { data_position: u64, total_size: u64 },

    #[error("invalid read: {0}")]
    InvalidReadError(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid chunk config: {0}")]
    InvalidConfig(#[from] ConfigError),
}

/// `ChunkConfig::validate` failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("message_chunk_cache_max_percent {value} exceeds 100")]
    CachePercentAboveHundred { value: u8 },

    #[error("max_log_record_size {max_log_record_size} cannot fit in a data region of {chunk_data_total_size} bytes (needs room for an 8-byte frame)")]
    RecordLargerThanRegion {
        max_log_record_size: u64,
        chunk_data_total_size: u64,
    },

    #[error("chunk_reader_count must be at least 1")]
    NoReaders,
}

/// Outcome of `Chunk::try_append` — `NotEnoughSpace` is routine
/// backpressure, not a defect, so it is a success-shaped variant rather
/// than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryAppendOutcome {
    Success { global_position: u64 },
    NotEnoughSpace,
}
