//! Flat embedding file codec.
//!
//! A sequence of fixed-size little-endian records with no header or
//! delimiter: `media_id (8 bytes) | timestamp (8 bytes) | f32 x dimension`.
//! Records are appended in insertion order; the reader knows the dimension
//! out of band. This is also the backup/export representation.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{Error, Result};

use super::EmbeddingRecord;

/// Bytes per record for the given vector dimension.
pub fn record_size(dimension: usize) -> usize {
    16 + 4 * dimension
}

/// Append records to the file, creating it if needed. Every vector must
/// already match `dimension`.
pub fn append_records(path: &Path, dimension: usize, records: &[EmbeddingRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = BufWriter::new(file);

    for record in records {
        if record.vector.len() != dimension {
            return Err(Error::DimensionMismatch {
                expected: dimension,
                actual: record.vector.len(),
            });
        }
        writer.write_all(&record.media_id.to_le_bytes())?;
        writer.write_all(&record.timestamp.to_le_bytes())?;
        for &val in &record.vector {
            writer.write_all(&val.to_le_bytes())?;
        }
    }

    writer.flush()?;
    Ok(())
}

/// Read the whole file back. A missing file reads as empty; a file whose
/// length is not a multiple of the record size is corrupt.
pub fn read_records(path: &Path, dimension: usize) -> Result<Vec<EmbeddingRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    let len = file.metadata()?.len() as usize;
    let rec_size = record_size(dimension);
    if len % rec_size != 0 {
        return Err(Error::Store(format!(
            "embedding file {} has length {} not divisible by record size {}",
            path.display(),
            len,
            rec_size
        )));
    }

    let mut reader = BufReader::new(file);
    let mut records = Vec::with_capacity(len / rec_size);
    let mut buf = vec![0u8; rec_size];

    for _ in 0..(len / rec_size) {
        reader.read_exact(&mut buf)?;
        let media_id = i64::from_le_bytes(buf[0..8].try_into().unwrap());
        let timestamp = i64::from_le_bytes(buf[8..16].try_into().unwrap());
        let vector = buf[16..]
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes(chunk.try_into().unwrap()))
            .collect();
        records.push(EmbeddingRecord {
            media_id,
            timestamp,
            vector,
        });
    }

    Ok(records)
}
