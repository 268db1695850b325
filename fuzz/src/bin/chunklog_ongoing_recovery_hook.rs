use std::io::{self, Read, Write};

use chunklog::{Chunk, ChunkConfig, ChunkHeader};
use tempfile::NamedTempFile;

fn main() {
    let mut data = Vec::new();
    let _ = io::stdin().read_to_end(&mut data);

    let config = ChunkConfig::variable(4096, 512, 1);
    let header = ChunkHeader::new(0, config.chunk_data_total_size());

    let mut file = match NamedTempFile::new() {
        Ok(file) => file,
        Err(_) => return,
    };
    if header.write_to(file.as_file_mut()).is_err() {
        return;
    }
    // Arbitrary bytes after a valid header stand in for a chunk body
    // left in an unknown state by an abrupt kill; from_ongoing must
    // only ever stop cleanly at the first invalid probe, never panic.
    if file.write_all(&data).is_err() {
        return;
    }
    if file.flush().is_err() {
        return;
    }

    let path = file.path().to_path_buf();
    let _ = Chunk::from_ongoing(&path, config, read_record, false);
}

fn read_record(length: u64, reader: &mut dyn Read) -> io::Result<Option<Vec<u8>>> {
    let mut buf = vec![0_u8; length as usize];
    reader.read_exact(&mut buf)?;
    Ok(Some(buf))
}
