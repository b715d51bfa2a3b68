use crate::nodes::{NodeCodec, NodeData};
use save_tool_macro::{StructPack, StructUnpack};
use serde::Serialize;
use std::sync::Arc;

/// Magic at the start of every save file.
pub const FILE_MAGIC: &[u8; 4] = b"VASC";
/// Magic in front of the chunk table.
pub const CHUNK_TABLE_MAGIC: &[u8; 4] = b"FZLC";
/// Magic in front of the node directory.
pub const DIRECTORY_MAGIC: &[u8; 4] = b"EDON";
/// Magic closing the file.
pub const END_MAGIC: &[u8; 4] = b"ENOD";
/// Tag in front of every compressed chunk.
pub const CHUNK_MAGIC: &[u8; 4] = b"XLZ4";

/// Bytes taken by the file magic and the version block.
pub const HEADER_PREFIX_SIZE: usize = 4 + 4 + 4 + 9 + 4;
/// Header size written by the game.
pub const DEFAULT_HEADER_SIZE: usize = 0xC21;
/// Largest amount of body data stored in one chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 0x40000;
/// Trailer: footer offset and end magic.
pub const TRAILER_SIZE: usize = 8;

/// Sentinel for "no sibling" / "no child".
pub const NONE_ID: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, StructPack, StructUnpack)]
/// Header fields carried from load to save.
pub struct SaveHeader {
    pub version1: i32,
    pub version2: i32,
    /// Not understood, written back unchanged.
    pub reserved: [u8; 9],
    pub version3: i32,
    #[skip_pack]
    #[skip_unpack]
    /// Size of the uncompressed header block. Chunks and nodes start here.
    pub header_size: usize,
}

impl SaveHeader {
    pub fn new(version1: i32, version2: i32, version3: i32) -> Self {
        Self {
            version1,
            version2,
            reserved: [0; 9],
            version3,
            header_size: DEFAULT_HEADER_SIZE,
        }
    }
}

impl Default for SaveHeader {
    fn default() -> Self {
        Self::new(0, 0, 0)
    }
}

#[derive(Debug, Clone, StructPack, StructUnpack)]
/// One directory record plus what the loader derives for it.
///
/// Only `name`, `next_id`, `child_id`, `offset` and `size` are stored in the footer.
pub struct NodeEntry {
    #[pstring]
    pub name: String,
    pub next_id: i32,
    pub child_id: i32,
    pub offset: i32,
    /// Declared size. For parents it covers the whole subtree.
    pub size: i32,
    #[skip_pack]
    #[skip_unpack]
    /// Leading integer of the node's body span.
    pub id: i32,
    #[skip_pack]
    #[skip_unpack]
    /// Bytes owned by this node alone, up to the next node in flat order.
    pub true_size: usize,
    #[skip_pack]
    #[skip_unpack]
    pub children: Vec<usize>,
    #[skip_pack]
    #[skip_unpack]
    pub parent: Option<usize>,
    #[skip_pack]
    #[skip_unpack]
    /// Flat successor resolved from `next_id`. Not a containment edge.
    pub next: Option<usize>,
    #[skip_pack]
    #[skip_unpack]
    pub is_child: bool,
    #[skip_pack]
    #[skip_unpack]
    pub value: Option<Box<dyn NodeData>>,
}

impl NodeEntry {
    /// Create a node for a tree built in memory.
    ///
    /// Offsets and sizes are filled in by the next save.
    pub fn new<S: Into<String>>(id: i32, name: S, next_id: i32, child_id: i32) -> Self {
        Self {
            name: name.into(),
            next_id,
            child_id,
            offset: 0,
            size: 0,
            id,
            true_size: 0,
            children: Vec::new(),
            parent: None,
            next: None,
            is_child: false,
            value: None,
        }
    }

    pub fn with_value<V: NodeData>(mut self, value: V) -> Self {
        self.value = Some(Box::new(value));
        self
    }

    pub fn first_child_id(&self) -> Option<i32> {
        (self.child_id >= 0).then_some(self.child_id)
    }

    pub fn next_sibling_id(&self) -> Option<i32> {
        (self.next_id >= 0).then_some(self.next_id)
    }

    pub fn value(&self) -> Option<&dyn NodeData> {
        self.value.as_deref()
    }

    /// Decoded value as a concrete codec type.
    pub fn value_as<T: NodeData>(&self) -> Option<&T> {
        self.value.as_deref().and_then(|v| v.downcast_ref::<T>())
    }

    pub fn value_as_mut<T: NodeData>(&mut self) -> Option<&mut T> {
        self.value.as_deref_mut().and_then(|v| v.downcast_mut::<T>())
    }
}

#[derive(Debug, Clone)]
/// Settings handed to [crate::save::SaveFile].
pub struct SaveConfig {
    /// Codecs registered under their own names when the save file is created.
    pub codecs: Vec<Arc<dyn NodeCodec>>,
    pub max_chunk_size: usize,
    /// `None` uses the LZ4 default mode, `Some(n)` the high compression mode at level n.
    pub compression_level: Option<i32>,
    /// Threads used for chunk compression. 1 keeps everything on the calling thread.
    pub workers: usize,
    /// Header size for files created from scratch.
    pub header_size: usize,
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            codecs: crate::nodes::default_codecs(),
            max_chunk_size: DEFAULT_CHUNK_SIZE,
            compression_level: None,
            workers: num_cpus::get(),
            header_size: DEFAULT_HEADER_SIZE,
        }
    }
}

impl SaveConfig {
    /// A configuration without any node codec: every node is kept as raw bytes.
    pub fn opaque_only() -> Self {
        Self {
            codecs: Vec::new(),
            ..Default::default()
        }
    }

    pub fn with_codec(mut self, codec: Arc<dyn NodeCodec>) -> Self {
        self.codecs.push(codec);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_max_chunk_size(mut self, size: usize) -> Self {
        self.max_chunk_size = size;
        self
    }

    pub fn with_compression_level(mut self, level: Option<i32>) -> Self {
        self.compression_level = level;
        self
    }
}
