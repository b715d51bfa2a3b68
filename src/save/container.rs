//! Whole-file load and save.
use super::chunk::*;
use super::directory::*;
use super::tree::*;
use crate::error::SaveError;
use crate::ext::io::*;
use crate::nodes::{CodecRegistry, NodeCodec};
use crate::types::*;
use anyhow::Result;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Everything read from a save file.
#[derive(Debug, Clone)]
pub struct LoadedSave {
    pub header: SaveHeader,
    pub chunks: ChunkTable,
    /// Header bytes followed by the decompressed chunks. Node offsets index into it.
    pub body: Vec<u8>,
    pub tree: SaveTree,
}

fn file_corrupt<S: Into<String>>(reason: S) -> anyhow::Error {
    SaveError::corruption(reason).into()
}

fn read_header(reader: &mut MemReaderRef<'_>) -> Result<(SaveHeader, ChunkTable)> {
    if reader.data.len() < HEADER_PREFIX_SIZE + TRAILER_SIZE {
        return Err(file_corrupt(format!(
            "File of {} bytes is too small to be a save",
            reader.data.len()
        )));
    }
    let magic = reader.read_magic()?;
    if &magic != FILE_MAGIC {
        return Err(file_corrupt(format!(
            "Invalid file magic: {:?}",
            String::from_utf8_lossy(&magic)
        )));
    }
    let mut header: SaveHeader = reader.read_struct()?;
    let chunks = read_chunk_table(reader)?;
    header.header_size = chunks.header_size;
    Ok((header, chunks))
}

fn build_body(data: &[u8], chunks: &ChunkTable, workers: usize) -> Result<Vec<u8>> {
    let decompressed = decompress_chunks(data, chunks, workers)?;
    let mut body = Vec::with_capacity(chunks.header_size + decompressed.len());
    body.extend_from_slice(&data[..chunks.header_size]);
    body.extend_from_slice(&decompressed);
    Ok(body)
}

/// Header bytes followed by the decompressed chunks.
pub fn body_image(data: &[u8], workers: usize) -> Result<Vec<u8>> {
    let (_, chunks) = read_header(&mut MemReaderRef::new(data))?;
    build_body(data, &chunks, workers)
}

/// Parse a whole save file and decode every node through `registry`.
pub fn parse(data: &[u8], registry: &CodecRegistry, workers: usize) -> Result<LoadedSave> {
    let mut reader = MemReaderRef::new(data);
    let (header, chunks) = read_header(&mut reader)?;

    reader.seek(SeekFrom::End(-(TRAILER_SIZE as i64)))?;
    let footer_offset = reader.read_i32()?;
    let end_magic = reader.read_magic()?;
    if &end_magic != END_MAGIC {
        return Err(file_corrupt(format!(
            "Invalid end magic: {:?}",
            String::from_utf8_lossy(&end_magic)
        )));
    }
    let footer_end = data.len() - TRAILER_SIZE;
    let footer_offset = usize::try_from(footer_offset)
        .ok()
        .filter(|&o| o >= chunks.header_size && o <= footer_end)
        .ok_or_else(|| file_corrupt(format!("Footer offset {} is out of range", footer_offset)))?;
    let mut footer = MemReaderRef::new(&data[..footer_end]);
    footer.pos = footer_offset;
    let mut nodes = read_directory(&mut footer)?;
    if !footer.is_eof() {
        warn!(
            "{} bytes between the directory and the trailer are ignored",
            footer.remaining().len()
        );
    }
    debug!(
        "Read {} directory entries from footer at {:#x}",
        nodes.len(),
        footer_offset
    );

    let body = build_body(data, &chunks, workers)?;
    debug!(
        "Body image is {} bytes ({} chunks)",
        body.len(),
        chunks.chunks.len()
    );

    assign_ids(&mut nodes, &mut MemReaderRef::new(&body))?;
    compute_true_sizes(&mut nodes)?;
    let mut tree = SaveTree::from_nodes(nodes)?;
    debug!("Built {} roots from {} nodes", tree.roots().len(), tree.len());
    if let Some(last) = tree.nodes().last() {
        let span_end = last.offset.max(0) as usize + last.true_size;
        if span_end < body.len() {
            warn!(
                "{} bytes after the last node are not covered by any node",
                body.len() - span_end
            );
        }
    }

    for (_, index) in tree.walk() {
        let value = registry.decode(&tree.nodes()[index], &body)?;
        tree.nodes_mut()[index].value = Some(value);
    }

    Ok(LoadedSave {
        header,
        chunks,
        body,
        tree,
    })
}

#[derive(Debug, Clone, Copy)]
struct Layout {
    offset: i32,
    size: i32,
    true_size: usize,
}

/// Place encoded spans back to back from `header_size`.
///
/// Declared sizes move by the change of the node's whole subtree span, so a tree
/// saved without edits keeps the sizes it was loaded with.
fn plan_layout(tree: &SaveTree, encoded: &[Vec<u8>], header_size: usize) -> Result<Vec<Layout>> {
    let nodes = tree.nodes();
    let mut delta: Vec<i64> = nodes
        .iter()
        .zip(encoded)
        .map(|(node, data)| data.len() as i64 - node.true_size as i64)
        .collect();
    // Reverse pre-order visits every child before its parent.
    for (_, index) in tree.walk().into_iter().rev() {
        let children: i64 = nodes[index].children.iter().map(|&c| delta[c]).sum();
        delta[index] += children;
    }

    let mut layout = Vec::with_capacity(nodes.len());
    let mut offset = header_size as i64;
    for (index, node) in nodes.iter().enumerate() {
        let size = i64::from(node.size) + delta[index];
        let offset32 = i32::try_from(offset).map_err(|_| {
            SaveError::encode(node.id, &node.name, format!("offset {} does not fit in 32 bits", offset))
        })?;
        let size32 = i32::try_from(size)
            .ok()
            .filter(|&s| s >= 0)
            .ok_or_else(|| SaveError::encode(node.id, &node.name, format!("invalid size {}", size)))?;
        layout.push(Layout {
            offset: offset32,
            size: size32,
            true_size: encoded[index].len(),
        });
        offset += encoded[index].len() as i64;
    }
    Ok(layout)
}

/// Apply `layout` to the tree and return the values it replaced.
fn apply_layout(tree: &mut SaveTree, layout: &[Layout]) -> Vec<Layout> {
    tree.nodes_mut()
        .iter_mut()
        .zip(layout)
        .map(|(node, new)| {
            let old = Layout {
                offset: node.offset,
                size: node.size,
                true_size: node.true_size,
            };
            node.offset = new.offset;
            node.size = new.size;
            node.true_size = new.true_size;
            old
        })
        .collect()
}

fn write_file(
    header: &SaveHeader,
    tree: &SaveTree,
    encoded: &[Vec<u8>],
    config: &SaveConfig,
) -> Result<Vec<u8>> {
    let mut footer = Vec::new();
    write_directory(&mut footer, tree.nodes())?;

    let body = encoded.concat();
    let chunks = compress(
        &body,
        config.max_chunk_size,
        config.compression_level,
        config.workers,
    )?;

    let mut out = Vec::with_capacity(header.header_size + body.len() / 2 + footer.len());
    out.write_all(FILE_MAGIC)?;
    out.write_struct(header)?;
    write_chunk_table(&mut out, header.header_size, &chunks)?;
    if out.len() > header.header_size {
        return Err(SaveError::encode(
            NONE_ID,
            "<header>",
            format!(
                "chunk table for {} chunks needs {} bytes, the header holds {}",
                chunks.len(),
                out.len(),
                header.header_size
            ),
        )
        .into());
    }
    out.resize(header.header_size, 0);
    for chunk in &chunks {
        out.extend_from_slice(&chunk.data);
    }
    let footer_offset = i32::try_from(out.len()).map_err(|_| {
        SaveError::encode(
            NONE_ID,
            "<footer>",
            format!("footer offset {} does not fit in 32 bits", out.len()),
        )
    })?;
    out.extend_from_slice(&footer);
    out.write_i32(footer_offset)?;
    out.write_all(END_MAGIC)?;
    debug!(
        "Wrote {} nodes, {} body bytes in {} chunks, {} bytes total",
        tree.len(),
        body.len(),
        chunks.len(),
        out.len()
    );
    Ok(out)
}

/// Encode every node and write a complete save file.
///
/// On success the tree's offsets and sizes describe the written file. On failure the
/// tree is left as it was.
pub fn serialize(
    header: &SaveHeader,
    tree: &mut SaveTree,
    registry: &CodecRegistry,
    config: &SaveConfig,
) -> Result<Vec<u8>> {
    let encoded = tree
        .nodes()
        .iter()
        .map(|node| registry.encode(node))
        .collect::<Result<Vec<_>>>()?;
    let layout = plan_layout(tree, &encoded, header.header_size)?;
    let previous = apply_layout(tree, &layout);
    match write_file(header, tree, &encoded, config) {
        Ok(out) => Ok(out),
        Err(e) => {
            apply_layout(tree, &previous);
            Err(e)
        }
    }
}

/// A save file: header, node tree and the codecs used to read and write it.
#[derive(Debug)]
pub struct SaveFile {
    config: SaveConfig,
    registry: CodecRegistry,
    header: SaveHeader,
    chunks: ChunkTable,
    tree: SaveTree,
}

impl SaveFile {
    /// An empty save file using the codecs of `config`.
    pub fn new(config: SaveConfig) -> Self {
        let registry = CodecRegistry::with_codecs(config.codecs.iter().cloned());
        let header = SaveHeader {
            header_size: config.header_size,
            ..Default::default()
        };
        Self {
            config,
            registry,
            header,
            chunks: ChunkTable::default(),
            tree: SaveTree::default(),
        }
    }

    /// A save file for a tree built in memory.
    pub fn from_tree(config: SaveConfig, header: SaveHeader, tree: SaveTree) -> Self {
        let mut file = Self::new(config);
        file.header = header;
        file.tree = tree;
        file
    }

    pub fn config(&self) -> &SaveConfig {
        &self.config
    }

    pub fn registry(&self) -> &CodecRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut CodecRegistry {
        &mut self.registry
    }

    /// Register a codec for nodes named `name`, returning the one it replaces.
    ///
    /// Affects the next load and save.
    pub fn register_codec<S: Into<String>>(
        &mut self,
        name: S,
        codec: Arc<dyn NodeCodec>,
    ) -> Option<Arc<dyn NodeCodec>> {
        self.registry.register(name, codec)
    }

    pub fn header(&self) -> &SaveHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut SaveHeader {
        &mut self.header
    }

    /// Chunk table of the last loaded file.
    pub fn chunks(&self) -> &ChunkTable {
        &self.chunks
    }

    pub fn tree(&self) -> &SaveTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut SaveTree {
        &mut self.tree
    }

    /// Replace the current content with the file in `data`.
    ///
    /// Nothing changes when loading fails.
    pub fn load(&mut self, data: &[u8]) -> Result<&SaveTree> {
        let loaded = parse(data, &self.registry, self.config.workers)?;
        self.header = loaded.header;
        self.chunks = loaded.chunks;
        self.tree = loaded.tree;
        Ok(&self.tree)
    }

    pub fn load_file<P: AsRef<Path> + ?Sized>(&mut self, path: &P) -> Result<&SaveTree> {
        let data = crate::utils::files::read_file(path)?;
        self.load(&data)
    }

    /// Encode the tree into a complete save file.
    pub fn save(&mut self) -> Result<Vec<u8>> {
        serialize(&self.header, &mut self.tree, &self.registry, &self.config)
    }

    pub fn save_file<P: AsRef<Path> + ?Sized>(&mut self, path: &P) -> Result<()> {
        let data = self.save()?;
        crate::utils::files::make_sure_dir_exists(path)?;
        let mut f = crate::utils::files::write_file(path)?;
        f.write_all(&data)?;
        f.flush()?;
        Ok(())
    }
}
