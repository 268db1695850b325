//! Chunked append-only log files for a message broker's storage tier.
//!
//! A chunk is a fixed-capacity region of records, identified by a
//! `chunk_number`, written once sequentially and never mutated in
//! place after it is sealed. [`Chunk`] is the entry point: construct
//! one with [`Chunk::create_new`], [`Chunk::from_completed`] or
//! [`Chunk::from_ongoing`], then append and read through it.

pub mod chunk;
pub mod codec;
pub mod config;
pub mod error;
pub mod mem_info;
pub mod mirror;
pub mod reader_pool;
pub mod record;
pub mod writer;

pub use chunk::Chunk;
pub use codec::{ChunkFooter, ChunkHeader, FOOTER_SIZE, HEADER_SIZE};
pub use config::{ChunkConfig, ChunkDataLayout};
pub use error::{ChunkError, ConfigError, CorruptChunkError, TryAppendOutcome};
pub use mem_info::{FixedMemoryInfo, MemoryInfo, SystemMemoryInfo};
pub use mirror::MemoryBuffer;
pub use reader_pool::{ReadHandle, ReaderPool};
pub use record::{frame_fixed_record, frame_variable_record, CountingReader, LogRecord, RecordReader};
pub use writer::WriterContext;
