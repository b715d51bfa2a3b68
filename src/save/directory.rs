//! The node directory stored in the file footer.
use crate::error::SaveError;
use crate::ext::io::*;
use crate::types::*;
use anyhow::Result;
use std::io::{Read, Seek, Write};

/// Read the directory magic, the node count and every entry.
pub fn read_directory<R: Read + Seek>(reader: &mut R) -> Result<Vec<NodeEntry>> {
    let magic = reader
        .read_magic()
        .map_err(|e| SaveError::corruption(format!("Failed to read directory magic: {}", e)))?;
    if &magic != DIRECTORY_MAGIC {
        return Err(SaveError::corruption(format!(
            "Invalid directory magic: {:?}",
            String::from_utf8_lossy(&magic)
        ))
        .into());
    }
    let count = reader
        .read_packed_i32()
        .map_err(|e| SaveError::corruption(format!("Failed to read node count: {}", e)))?;
    let count = usize::try_from(count)
        .map_err(|_| SaveError::corruption(format!("Negative node count {}", count)))?;
    parse_directory(reader, count)
}

/// Read `count` directory entries in on-disk order.
pub fn parse_directory<R: Read + Seek>(reader: &mut R, count: usize) -> Result<Vec<NodeEntry>> {
    // Each entry takes at least 17 bytes, so a bogus count can not reserve much.
    let mut nodes = Vec::with_capacity(count.min(0x10000));
    for i in 0..count {
        let node: NodeEntry = reader.read_struct().map_err(|e| {
            SaveError::corruption(format!("Failed to read directory entry {} of {}: {}", i, count, e))
        })?;
        nodes.push(node);
    }
    Ok(nodes)
}

/// Write the directory magic, node count and entries.
pub fn write_directory<W: Write>(writer: &mut W, nodes: &[NodeEntry]) -> Result<()> {
    let count = i32::try_from(nodes.len()).map_err(|_| {
        SaveError::encode(NONE_ID, "<directory>", format!("too many nodes: {}", nodes.len()))
    })?;
    writer.write_all(DIRECTORY_MAGIC)?;
    writer.write_packed_i32(count)?;
    for node in nodes {
        writer
            .write_struct(node)
            .map_err(|e| SaveError::encode(node.id, &node.name, format!("directory entry: {}", e)))?;
    }
    Ok(())
}
