//! Bit-exact, little-endian, fixed-width header/footer codec.
//!
//! `HEADER_SIZE` and `FOOTER_SIZE` are permanently fixed once a chunk
//! format ships; changing either breaks every chunk already on disk.

use std::io::{self, Read, Write};
use std::path::Path;

use crate::error::CorruptChunkError;

const HEADER_MAGIC: [u8; 4] = *b"CHNK";
const HEADER_VERSION: u16 = 1;
const FOOTER_MAGIC: [u8; 4] = *b"CEND";

/// Fixed on-disk size of [`ChunkHeader`], in bytes.
pub const HEADER_SIZE: u64 = 32;
/// Fixed on-disk size of [`ChunkFooter`], in bytes.
pub const FOOTER_SIZE: u64 = 24;

/// First fixed-width record in a chunk file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub chunk_number: u64,
    pub chunk_data_total_size: u64,
}

impl ChunkHeader {
    #[must_use]
    pub const fn new(chunk_number: u64, chunk_data_total_size: u64) -> Self {
        Self {
            chunk_number,
            chunk_data_total_size,
        }
    }

    #[must_use]
    pub const fn chunk_data_start_position(&self) -> u64 {
        self.chunk_number * self.chunk_data_total_size
    }

    #[must_use]
    pub const fn chunk_data_end_position(&self) -> u64 {
        self.chunk_data_start_position() + self.chunk_data_total_size
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&HEADER_MAGIC)?;
        writer.write_all(&HEADER_VERSION.to_le_bytes())?;
        writer.write_all(&self.chunk_number.to_le_bytes())?;
        writer.write_all(&self.chunk_data_total_size.to_le_bytes())?;
        let written = 4 + 2 + 8 + 8;
        write_padding(writer, HEADER_SIZE - written)
    }

    pub fn read_from<R: Read>(reader: &mut R, path: &Path) -> Result<Self, CorruptChunkError> {
        let mut magic = [0_u8; 4];
        read_exact_or_corrupt(reader, &mut magic, path, "header")?;
        if magic != HEADER_MAGIC {
            return Err(CorruptChunkError::BadChunkInDatabase {
                path: path.to_path_buf(),
                reason: format!("bad header magic {magic:?}"),
            });
        }

        let mut version_bytes = [0_u8; 2];
        read_exact_or_corrupt(reader, &mut version_bytes, path, "header")?;
        let version = u16::from_le_bytes(version_bytes);
        if version != HEADER_VERSION {
            return Err(CorruptChunkError::BadChunkInDatabase {
                path: path.to_path_buf(),
                reason: format!("unsupported header version {version}"),
            });
        }

        let mut chunk_number_bytes = [0_u8; 8];
        read_exact_or_corrupt(reader, &mut chunk_number_bytes, path, "header")?;
        let chunk_number = u64::from_le_bytes(chunk_number_bytes);

        let mut chunk_data_total_size_bytes = [0_u8; 8];
        read_exact_or_corrupt(reader, &mut chunk_data_total_size_bytes, path, "header")?;
        let chunk_data_total_size = u64::from_le_bytes(chunk_data_total_size_bytes);

        let written = 4 + 2 + 8 + 8;
        let mut padding = vec![0_u8; (HEADER_SIZE - written) as usize];
        read_exact_or_corrupt(reader, &mut padding, path, "header")?;

        Ok(Self::new(chunk_number, chunk_data_total_size))
    }
}

/// Last fixed-width record in a completed chunk file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkFooter {
    pub chunk_data_total_size: u64,
}

impl ChunkFooter {
    #[must_use]
    pub const fn new(chunk_data_total_size: u64) -> Self {
        Self {
            chunk_data_total_size,
        }
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&FOOTER_MAGIC)?;
        writer.write_all(&self.chunk_data_total_size.to_le_bytes())?;
        let written = 4 + 8;
        write_padding(writer, FOOTER_SIZE - written)
    }

    pub fn read_from<R: Read>(reader: &mut R, path: &Path) -> Result<Self, CorruptChunkError> {
        let mut magic = [0_u8; 4];
        read_exact_or_corrupt(reader, &mut magic, path, "footer")?;
        if magic != FOOTER_MAGIC {
            return Err(CorruptChunkError::BadChunkInDatabase {
                path: path.to_path_buf(),
                reason: format!("bad footer magic {magic:?}"),
            });
        }

        let mut chunk_data_total_size_bytes = [0_u8; 8];
        read_exact_or_corrupt(reader, &mut chunk_data_total_size_bytes, path, "footer")?;
        let chunk_data_total_size = u64::from_le_bytes(chunk_data_total_size_bytes);

        let written = 4 + 8;
        let mut padding = vec![0_u8; (FOOTER_SIZE - written) as usize];
        read_exact_or_corrupt(reader, &mut padding, path, "footer")?;

        Ok(Self::new(chunk_data_total_size))
    }
}

fn write_padding<W: Write>(writer: &mut W, remaining: u64) -> io::Result<()> {
    if remaining == 0 {
        return Ok(());
    }
    let padding = vec![0_u8; remaining as usize];
    writer.write_all(&padding)
}

fn read_exact_or_corrupt<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    path: &Path,
    what: &str,
) -> Result<(), CorruptChunkError> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::UnexpectedEof => {
            Err(CorruptChunkError::BadChunkInDatabase {
                path: path.to_path_buf(),
                reason: format!("file shorter than {what}"),
            })
        }
        Err(error) => Err(CorruptChunkError::Io(error)),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::path::Path;

    use super::{ChunkFooter, ChunkHeader, FOOTER_SIZE, HEADER_SIZE};

    #[test]
    fn header_round_trips() {
        let header = ChunkHeader::new(3, 4096);
        let mut buf = Vec::new();
        header.write_to(&mut buf).expect("write should succeed");
        assert_eq!(buf.len(), HEADER_SIZE as usize);

        let decoded = ChunkHeader::read_from(&mut Cursor::new(buf), Path::new("x"))
            .expect("read should succeed");
        assert_eq!(decoded, header);
        assert_eq!(decoded.chunk_data_start_position(), 3 * 4096);
        assert_eq!(decoded.chunk_data_end_position(), 4 * 4096);
    }

    #[test]
    fn footer_round_trips() {
        let footer = ChunkFooter::new(2048);
        let mut buf = Vec::new();
        footer.write_to(&mut buf).expect("write should succeed");
        assert_eq!(buf.len(), FOOTER_SIZE as usize);

        let decoded = ChunkFooter::read_from(&mut Cursor::new(buf), Path::new("x"))
            .expect("read should succeed");
        assert_eq!(decoded, footer);
    }

    #[test]
    fn header_read_rejects_short_file() {
        let short = vec![0_u8; HEADER_SIZE as usize - 1];
        let error = ChunkHeader::read_from(&mut Cursor::new(short), Path::new("x"))
            .expect_err("short header should be corrupt");
        assert!(format!("{error}").contains("shorter than header"));
    }

    #[test]
    fn header_read_rejects_bad_magic() {
        let mut buf = vec![0_u8; HEADER_SIZE as usize];
        buf[0] = b'X';
        let error = ChunkHeader::read_from(&mut Cursor::new(buf), Path::new("x"))
            .expect_err("bad magic should be corrupt");
        assert!(format!("{error}").contains("bad header magic"));
    }

    #[test]
    fn footer_read_rejects_short_file() {
        let short = vec![0_u8; FOOTER_SIZE as usize - 1];
        let error = ChunkFooter::read_from(&mut Cursor::new(short), Path::new("x"))
            .expect_err("short footer should be corrupt");
        assert!(format!("{error}").contains("shorter than footer"));
    }
}
