//! Fallback for nodes without a registered codec.
use super::base::*;
use crate::ext::io::MemReaderRef;
use crate::types::NodeEntry;
use anyhow::Result;
use std::any::Any;

#[derive(Debug, Clone, PartialEq, Eq)]
/// The untouched bytes of a node span, id included.
pub struct OpaqueNode {
    pub data: Vec<u8>,
}

impl OpaqueNode {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl NodeData for OpaqueNode {
    fn trailing_bytes(&self) -> &[u8] {
        &self.data
    }

    fn summary(&self) -> String {
        format!("opaque, {} bytes", self.data.len())
    }

    fn clone_box(&self) -> Box<dyn NodeData> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OpaqueCodec;

impl OpaqueCodec {
    pub const fn new() -> Self {
        Self
    }
}

impl NodeCodec for OpaqueCodec {
    fn name(&self) -> &'static str {
        ""
    }

    fn display_name(&self) -> &'static str {
        "Opaque"
    }

    fn decode(&self, _node: &NodeEntry, reader: &mut MemReaderRef<'_>) -> Result<Box<dyn NodeData>> {
        let data = reader.remaining().to_vec();
        reader.pos = reader.data.len();
        Ok(Box::new(OpaqueNode::new(data)))
    }

    fn encode(&self, node: &NodeEntry, value: &dyn NodeData) -> Result<Vec<u8>> {
        let value = expect_value::<OpaqueNode>(self, node, value)?;
        Ok(value.data.clone())
    }
}

#[test]
fn test_opaque_keeps_span() {
    let node = NodeEntry::new(3, "Foo", -1, -1);
    let span = [3u8, 0, 0, 0, 0xAA, 0xBB];
    let mut reader = MemReaderRef::new(&span);
    let value = OpaqueCodec.decode(&node, &mut reader).unwrap();
    assert!(reader.is_eof());
    assert_eq!(value.trailing_bytes(), &span);
    assert_eq!(OpaqueCodec.encode(&node, value.as_ref()).unwrap(), span);
}
