use crate::error::SaveError;
use crate::ext::io::MemReaderRef;
use crate::types::NodeEntry;
use anyhow::Result;
use std::any::Any;

/// A decoded node value.
pub trait NodeData: std::fmt::Debug + Send + Sync + Any {
    /// Bytes after the last field the codec understands.
    fn trailing_bytes(&self) -> &[u8];

    /// Short human readable description, used by `info`.
    fn summary(&self) -> String {
        String::new()
    }

    fn clone_box(&self) -> Box<dyn NodeData>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl dyn NodeData {
    pub fn downcast_ref<T: NodeData>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: NodeData>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }

    pub fn is<T: NodeData>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

impl Clone for Box<dyn NodeData> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

pub trait NodeCodec: std::fmt::Debug + Send + Sync {
    /// Node name this codec is registered under by default.
    fn name(&self) -> &'static str;

    fn display_name(&self) -> &'static str {
        self.name()
    }

    /// Decode a node span. `reader` covers exactly `node.true_size` bytes, id included.
    ///
    /// The whole span must be consumed; unknown bytes go into the value's trailing data.
    fn decode(&self, node: &NodeEntry, reader: &mut MemReaderRef<'_>) -> Result<Box<dyn NodeData>>;

    /// Encode a value back into the node's own span.
    fn encode(&self, node: &NodeEntry, value: &dyn NodeData) -> Result<Vec<u8>>;
}

/// Downcast `value` to the type a codec produces, failing with an encode error otherwise.
pub fn expect_value<'a, T: NodeData>(
    codec: &dyn NodeCodec,
    node: &NodeEntry,
    value: &'a dyn NodeData,
) -> Result<&'a T> {
    value.downcast_ref::<T>().ok_or_else(|| {
        SaveError::encode(
            node.id,
            &node.name,
            format!("value was not produced by the {} codec", codec.display_name()),
        )
        .into()
    })
}

/// Check a section marker read from a node span.
pub fn expect_marker(node: &NodeEntry, found: &str, expected: &str) -> Result<()> {
    if found != expected {
        return Err(SaveError::codec_mismatch(
            node.id,
            &node.name,
            format!("expected marker {:?}, found {:?}", expected, found),
        )
        .into());
    }
    Ok(())
}

/// Turn any failure raised inside a codec into a codec mismatch for `node`.
pub(crate) fn as_codec_mismatch(node: &NodeEntry, err: anyhow::Error) -> anyhow::Error {
    if crate::error::save_error(&err).is_some() {
        return err;
    }
    SaveError::codec_mismatch(node.id, &node.name, format!("{:#}", err)).into()
}

/// Turn any failure raised while encoding into an encode error for `node`.
pub(crate) fn as_encode_error(node: &NodeEntry, err: anyhow::Error) -> anyhow::Error {
    if crate::error::save_error(&err).is_some() {
        return err;
    }
    SaveError::encode(node.id, &node.name, format!("{:#}", err)).into()
}
