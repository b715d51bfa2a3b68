//! LZ4 chunk table and chunk payloads.
use crate::error::SaveError;
use crate::ext::io::*;
use crate::types::*;
use crate::utils::threadpool::run_ordered;
use anyhow::Result;
use lz4::block::CompressionMode;
use serde::Serialize;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use tracing::debug;

/// Bytes in front of the LZ4 block: tag and decompressed size copy.
const CHUNK_PREFIX_SIZE: usize = 8;
/// An LZ4 block never decodes to more than this many bytes per stored byte.
const MAX_LZ4_RATIO: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq)]
/// A compressed chunk as stored in the file.
pub struct Chunk {
    /// Tag, size copy and LZ4 block.
    pub data: Vec<u8>,
    pub decompressed_size: usize,
}

impl Chunk {
    pub fn compressed_size(&self) -> usize {
        self.data.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
/// One chunk table row.
pub struct ChunkInfo {
    pub offset: usize,
    pub compressed_size: usize,
    pub decompressed_size: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChunkTable {
    pub header_size: usize,
    pub chunks: Vec<ChunkInfo>,
}

impl ChunkTable {
    pub fn decompressed_size(&self) -> usize {
        self.chunks
            .iter()
            .fold(0usize, |total, c| total.saturating_add(c.decompressed_size))
    }

    /// Encoded size of the table, magic included.
    pub fn encoded_len(chunk_count: usize) -> usize {
        4 + 4 + 4 + chunk_count * 8 + chunk_count.saturating_sub(1) * 4
    }
}

fn table_value<R: Read>(reader: &mut R, what: &str, index: usize) -> Result<usize> {
    let value = reader.read_i32().map_err(|e| {
        SaveError::corruption(format!("Chunk table truncated at {} of chunk {}: {}", what, index, e))
    })?;
    usize::try_from(value).map_err(|_| {
        SaveError::corruption(format!("Chunk {} has negative {} {}", index, what, value)).into()
    })
}

/// Read the chunk table. `reader` must be positioned right after the version block.
///
/// Every size is checked against the stream length before anything is allocated for it.
pub fn read_chunk_table<R: Read + Seek>(reader: &mut R) -> Result<ChunkTable> {
    let start = reader.stream_position()?;
    let file_len = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(start))?;
    let magic = reader
        .read_magic()
        .map_err(|e| SaveError::corruption(format!("Failed to read chunk table magic: {}", e)))?;
    if &magic != CHUNK_TABLE_MAGIC {
        return Err(SaveError::corruption(format!(
            "Invalid chunk table magic: {:?}",
            String::from_utf8_lossy(&magic)
        ))
        .into());
    }
    let count = reader
        .read_i32()
        .map_err(|e| SaveError::corruption(format!("Failed to read chunk count: {}", e)))?;
    let count = usize::try_from(count)
        .map_err(|_| SaveError::corruption(format!("Negative chunk count {}", count)))?;
    let header_size = table_value(reader, "header size", 0)?;
    if header_size as u64 > file_len {
        return Err(SaveError::corruption(format!(
            "Header size {} exceeds the file size {}",
            header_size, file_len
        ))
        .into());
    }
    let table_end = (HEADER_PREFIX_SIZE as u64).saturating_add(ChunkTable::encoded_len(count) as u64);
    if table_end > header_size as u64 {
        return Err(SaveError::corruption(format!(
            "Chunk table of {} chunks does not fit in a header of {} bytes",
            count, header_size
        ))
        .into());
    }
    let mut chunks = Vec::with_capacity(count);
    let mut offset = header_size;
    let mut total: usize = 0;
    for i in 0..count {
        if i > 0 {
            offset = table_value(reader, "offset", i)?;
        }
        let compressed_size = table_value(reader, "compressed size", i)?;
        let decompressed_size = table_value(reader, "decompressed size", i)?;
        let limit = compressed_size
            .saturating_sub(CHUNK_PREFIX_SIZE)
            .saturating_mul(MAX_LZ4_RATIO);
        if decompressed_size > limit {
            return Err(SaveError::corruption(format!(
                "Chunk {} declares {} decompressed bytes for {} stored bytes",
                i, decompressed_size, compressed_size
            ))
            .into());
        }
        total = total.checked_add(decompressed_size).ok_or_else(|| {
            SaveError::corruption(format!("Chunk {} overflows the decompressed body size", i))
        })?;
        chunks.push(ChunkInfo {
            offset,
            compressed_size,
            decompressed_size,
        });
    }
    Ok(ChunkTable {
        header_size,
        chunks,
    })
}

/// Write the chunk table for `chunks` laid out back to back from `header_size`.
pub fn write_chunk_table<W: Write>(writer: &mut W, header_size: usize, chunks: &[Chunk]) -> Result<()> {
    let too_large = |what: &str, value: usize| {
        SaveError::encode(NONE_ID, "<header>", format!("{} {} does not fit in 32 bits", what, value))
    };
    writer.write_all(CHUNK_TABLE_MAGIC)?;
    writer.write_i32(i32::try_from(chunks.len()).map_err(|_| too_large("chunk count", chunks.len()))?)?;
    let mut offset = header_size;
    for chunk in chunks {
        writer.write_i32(i32::try_from(offset).map_err(|_| too_large("chunk offset", offset))?)?;
        writer.write_i32(
            i32::try_from(chunk.compressed_size())
                .map_err(|_| too_large("compressed size", chunk.compressed_size()))?,
        )?;
        writer.write_i32(
            i32::try_from(chunk.decompressed_size)
                .map_err(|_| too_large("decompressed size", chunk.decompressed_size))?,
        )?;
        offset += chunk.compressed_size();
    }
    if chunks.is_empty() {
        writer.write_i32(i32::try_from(header_size).map_err(|_| too_large("header size", header_size))?)?;
    }
    Ok(())
}

fn decompress_chunk(index: usize, info: ChunkInfo, data: &[u8]) -> Result<Vec<u8>> {
    let corrupt = |reason: String| -> anyhow::Error {
        SaveError::corruption(format!("Chunk {}: {}", index, reason)).into()
    };
    if data.len() < CHUNK_PREFIX_SIZE {
        return Err(corrupt(format!("{} bytes is too short for a chunk", data.len())));
    }
    if &data[..4] != CHUNK_MAGIC {
        return Err(corrupt(format!(
            "invalid chunk tag {:?}",
            String::from_utf8_lossy(&data[..4])
        )));
    }
    let mut reader = MemReaderRef::new(&data[4..8]);
    let embedded = reader.read_u32()? as usize;
    if embedded != info.decompressed_size {
        return Err(corrupt(format!(
            "embedded size {} differs from declared size {}",
            embedded, info.decompressed_size
        )));
    }
    if info.decompressed_size == 0 {
        return Ok(Vec::new());
    }
    let size = i32::try_from(info.decompressed_size)
        .map_err(|_| corrupt(format!("declared size {} is too large", info.decompressed_size)))?;
    let out = lz4::block::decompress(&data[CHUNK_PREFIX_SIZE..], Some(size))
        .map_err(|e| corrupt(format!("LZ4 decode failed: {}", e)))?;
    if out.len() != info.decompressed_size {
        return Err(corrupt(format!(
            "decompressed to {} bytes, declared {}",
            out.len(),
            info.decompressed_size
        )));
    }
    Ok(out)
}

/// Decompress every chunk of `table` from the whole file `data` and concatenate them.
///
/// Chunks must lie inside the file after the header, in order and without overlap.
pub fn decompress_chunks(data: &[u8], table: &ChunkTable, workers: usize) -> Result<Vec<u8>> {
    let mut ranges = Vec::with_capacity(table.chunks.len());
    let mut previous_end = table.header_size;
    for (index, info) in table.chunks.iter().enumerate() {
        let end = info
            .offset
            .checked_add(info.compressed_size)
            .filter(|&end| end <= data.len())
            .ok_or_else(|| {
                SaveError::corruption(format!(
                    "Chunk {} ({} bytes at {:#x}) runs past the end of the file ({} bytes)",
                    index,
                    info.compressed_size,
                    info.offset,
                    data.len()
                ))
            })?;
        if info.offset < previous_end {
            return Err(SaveError::corruption(format!(
                "Chunk {} at {:#x} overlaps the data before it (ends at {:#x})",
                index, info.offset, previous_end
            ))
            .into());
        }
        previous_end = end;
        ranges.push(info.offset..end);
    }
    let workers = workers.min(table.chunks.len());
    debug!(
        "Decompressing {} chunks ({} bytes) with {} workers",
        table.chunks.len(),
        table.decompressed_size(),
        workers
    );
    let parts: Vec<Vec<u8>> = if workers <= 1 {
        table
            .chunks
            .iter()
            .zip(ranges)
            .enumerate()
            .map(|(index, (info, range))| decompress_chunk(index, *info, &data[range]))
            .collect::<Result<_>>()?
    } else {
        let shared: Arc<[u8]> = Arc::from(data);
        let jobs: Vec<_> = table
            .chunks
            .iter()
            .copied()
            .zip(ranges)
            .enumerate()
            .map(|(index, (info, range))| {
                let shared = Arc::clone(&shared);
                move || decompress_chunk(index, info, &shared[range])
            })
            .collect();
        run_ordered(jobs, workers)?
            .into_iter()
            .collect::<Result<_>>()?
    };
    Ok(parts.concat())
}

/// Read the chunk table of a whole save file and return its decompressed chunks.
pub fn decompress(data: &[u8], workers: usize) -> Result<Vec<u8>> {
    if data.len() < HEADER_PREFIX_SIZE || &data[..4] != FILE_MAGIC {
        return Err(SaveError::corruption("Not a save file: missing file magic").into());
    }
    let mut reader = MemReaderRef::new(data);
    reader.seek(SeekFrom::Start(HEADER_PREFIX_SIZE as u64))?;
    let table = read_chunk_table(&mut reader)?;
    decompress_chunks(data, &table, workers)
}

fn compress_chunk(index: usize, data: &[u8], level: Option<i32>) -> Result<Chunk> {
    let mode = level.map(CompressionMode::HIGHCOMPRESSION);
    let block = lz4::block::compress(data, mode, false).map_err(|e| {
        SaveError::encode(NONE_ID, "<body>", format!("LZ4 encode of chunk {} failed: {}", index, e))
    })?;
    let mut out = Vec::with_capacity(CHUNK_PREFIX_SIZE + block.len());
    out.write_all(CHUNK_MAGIC)?;
    out.write_u32(data.len() as u32)?;
    out.extend_from_slice(&block);
    Ok(Chunk {
        data: out,
        decompressed_size: data.len(),
    })
}

/// Split `body` into chunks of at most `max_chunk_size` bytes and compress each of them.
pub fn compress(
    body: &[u8],
    max_chunk_size: usize,
    level: Option<i32>,
    workers: usize,
) -> Result<Vec<Chunk>> {
    if max_chunk_size == 0 || max_chunk_size > u32::MAX as usize {
        return Err(anyhow::anyhow!("Invalid chunk size {}", max_chunk_size));
    }
    let jobs: Vec<_> = body
        .chunks(max_chunk_size)
        .map(|part| part.to_vec())
        .enumerate()
        .map(|(index, part)| move || compress_chunk(index, &part, level))
        .collect();
    debug!(
        "Compressing {} bytes into {} chunks with {} workers",
        body.len(),
        jobs.len(),
        workers
    );
    run_ordered(jobs, workers)?.into_iter().collect()
}
