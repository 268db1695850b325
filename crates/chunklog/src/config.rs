use crate::error::ConfigError;

/// Record layout selected at chunk construction. Mutually exclusive:
/// a chunk is either variable-record or fixed-record for its whole
/// lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkDataLayout {
    /// Variable-length, length-prefixed-and-suffixed records.
    Variable { chunk_data_size: u64 },
    /// Fixed-size records, no prefix/suffix.
    Fixed {
        chunk_data_unit_size: u64,
        chunk_data_count: u64,
    },
}

impl ChunkDataLayout {
    #[must_use]
    pub const fn chunk_data_total_size(&self) -> u64 {
        match *self {
            Self::Variable { chunk_data_size } => chunk_data_size,
            Self::Fixed {
                chunk_data_unit_size,
                chunk_data_count,
            } => chunk_data_unit_size * chunk_data_count,
        }
    }

    #[must_use]
    pub const fn is_fixed(&self) -> bool {
        matches!(self, Self::Fixed { .. })
    }
}

/// Immutable-after-construction configuration for a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    pub layout: ChunkDataLayout,
    pub max_log_record_size: u64,
    pub chunk_reader_count: usize,
    pub message_chunk_cache_max_percent: u8,
    pub force_cache_chunk: bool,
}

impl ChunkConfig {
    #[must_use]
    pub const fn variable(
        chunk_data_size: u64,
        max_log_record_size: u64,
        chunk_reader_count: usize,
    ) -> Self {
        Self {
            layout: ChunkDataLayout::Variable { chunk_data_size },
            max_log_record_size,
            chunk_reader_count,
            message_chunk_cache_max_percent: 0,
            force_cache_chunk: false,
        }
    }

    #[must_use]
    pub const fn fixed(
        chunk_data_unit_size: u64,
        chunk_data_count: u64,
        chunk_reader_count: usize,
    ) -> Self {
        Self {
            layout: ChunkDataLayout::Fixed {
                chunk_data_unit_size,
                chunk_data_count,
            },
            max_log_record_size: chunk_data_unit_size,
            chunk_reader_count,
            message_chunk_cache_max_percent: 0,
            force_cache_chunk: false,
        }
    }

    #[must_use]
    pub const fn with_cache(mut self, max_percent: u8, force: bool) -> Self {
        self.message_chunk_cache_max_percent = max_percent;
        self.force_cache_chunk = force;
        self
    }

    #[must_use]
    pub const fn chunk_data_total_size(&self) -> u64 {
        self.layout.chunk_data_total_size()
    }

    /// Validates internal invariants before any file I/O is attempted,
    /// in the style of `rustak_limits::Limits::validate`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.layout {
            ChunkDataLayout::Variable { chunk_data_size } => {
                ensure_non_zero("chunk_data_size", chunk_data_size)?;
            }
            ChunkDataLayout::Fixed {
                chunk_data_unit_size,
                chunk_data_count,
            } => {
                ensure_non_zero("chunk_data_unit_size", chunk_data_unit_size)?;
                ensure_non_zero("chunk_data_count", chunk_data_count)?;
            }
        }

        ensure_non_zero("max_log_record_size", self.max_log_record_size)?;

        if self.chunk_reader_count < 1 {
            return Err(ConfigError::NoReaders);
        }

        if self.message_chunk_cache_max_percent > 100 {
            return Err(ConfigError::CachePercentAboveHundred {
                value: self.message_chunk_cache_max_percent,
            });
        }

        let total_size = self.chunk_data_total_size();
        let smallest_possible_frame = if self.layout.is_fixed() {
            self.max_log_record_size
        } else {
            self.max_log_record_size.saturating_add(8)
        };
        if smallest_possible_frame > total_size {
            return Err(ConfigError::RecordLargerThanRegion {
                max_log_record_size: self.max_log_record_size,
                chunk_data_total_size: total_size,
            });
        }

        Ok(())
    }
}

fn ensure_non_zero(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Zero { field });
    }
    Ok(())
}
