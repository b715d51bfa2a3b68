use super::base::*;
use super::opaque::{OpaqueCodec, OpaqueNode};
use crate::error::SaveError;
use crate::ext::io::MemReaderRef;
use crate::types::NodeEntry;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{trace, warn};

/// Node name to codec map with an opaque fallback.
#[derive(Debug, Clone, Default)]
pub struct CodecRegistry {
    codecs: HashMap<String, Arc<dyn NodeCodec>>,
    fallback: OpaqueCodec,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry with every codec registered under its own name.
    pub fn with_codecs<I: IntoIterator<Item = Arc<dyn NodeCodec>>>(codecs: I) -> Self {
        let mut registry = Self::new();
        for codec in codecs {
            registry.register(codec.name(), codec);
        }
        registry
    }

    /// Register `codec` for nodes named `name`, returning the codec it replaces.
    pub fn register<S: Into<String>>(
        &mut self,
        name: S,
        codec: Arc<dyn NodeCodec>,
    ) -> Option<Arc<dyn NodeCodec>> {
        self.codecs.insert(name.into(), codec)
    }

    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn NodeCodec>> {
        self.codecs.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn NodeCodec>> {
        self.codecs.get(name)
    }

    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.codecs.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Codec used for nodes named `name`.
    pub fn codec_for(&self, name: &str) -> &dyn NodeCodec {
        match self.codecs.get(name) {
            Some(codec) => codec.as_ref(),
            None => &self.fallback,
        }
    }

    /// Decode the span of `node` inside the body image.
    pub fn decode(&self, node: &NodeEntry, body: &[u8]) -> Result<Box<dyn NodeData>> {
        let start = usize::try_from(node.offset).map_err(|_| {
            SaveError::corruption(format!(
                "Node [{}] {} has negative offset {}",
                node.id, node.name, node.offset
            ))
        })?;
        let end = start
            .checked_add(node.true_size)
            .filter(|&end| end <= body.len())
            .ok_or_else(|| {
                SaveError::corruption(format!(
                    "Node [{}] {} spans {} bytes at {:#x}, beyond the body of {} bytes",
                    node.id,
                    node.name,
                    node.true_size,
                    start,
                    body.len()
                ))
            })?;
        let codec = self.codec_for(&node.name);
        if !self.codecs.contains_key(&node.name)
            && self.codecs.keys().any(|k| k.eq_ignore_ascii_case(&node.name))
        {
            warn!(
                "Node [{}] {} only matches a registered codec when ignoring case, keeping it opaque",
                node.id, node.name
            );
        }
        trace!(
            "Decoding node [{}] {} ({} bytes) with {}",
            node.id,
            node.name,
            node.true_size,
            codec.display_name()
        );
        let mut reader = MemReaderRef::new(&body[start..end]);
        let value = codec
            .decode(node, &mut reader)
            .map_err(|e| as_codec_mismatch(node, e))?;
        if !reader.is_eof() {
            return Err(SaveError::codec_mismatch(
                node.id,
                &node.name,
                format!(
                    "{} codec left {} bytes unread",
                    codec.display_name(),
                    reader.remaining().len()
                ),
            )
            .into());
        }
        Ok(value)
    }

    /// Encode the decoded value of `node` into its own span.
    ///
    /// Opaque values are replayed as they are, whatever codec is registered for the name.
    pub fn encode(&self, node: &NodeEntry) -> Result<Vec<u8>> {
        let value = node.value().ok_or_else(|| {
            SaveError::encode(node.id, &node.name, "node has no decoded value")
        })?;
        let codec = if value.is::<OpaqueNode>() {
            &self.fallback
        } else {
            self.codec_for(&node.name)
        };
        trace!(
            "Encoding node [{}] {} with {}",
            node.id,
            node.name,
            codec.display_name()
        );
        codec
            .encode(node, value)
            .map_err(|e| as_encode_error(node, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ext::io::ReadExt;
    use std::any::Any;

    #[derive(Debug, Clone)]
    struct Counter {
        id: i32,
        count: u32,
    }

    impl NodeData for Counter {
        fn trailing_bytes(&self) -> &[u8] {
            &[]
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

    #[derive(Debug)]
    struct CounterCodec;

    impl NodeCodec for CounterCodec {
        fn name(&self) -> &'static str {
            "Counter"
        }

        fn decode(
            &self,
            _node: &NodeEntry,
            reader: &mut MemReaderRef<'_>,
        ) -> Result<Box<dyn NodeData>> {
            let id = reader.read_i32()?;
            let count = reader.read_u32()?;
            Ok(Box::new(Counter { id, count }))
        }

        fn encode(&self, node: &NodeEntry, value: &dyn NodeData) -> Result<Vec<u8>> {
            let value = expect_value::<Counter>(self, node, value)?;
            let mut data = value.id.to_le_bytes().to_vec();
            data.extend_from_slice(&value.count.to_le_bytes());
            Ok(data)
        }
    }

    fn node(name: &str, offset: i32, true_size: usize) -> NodeEntry {
        let mut node = NodeEntry::new(7, name, -1, -1);
        node.offset = offset;
        node.true_size = true_size;
        node
    }

    #[test]
    fn test_unknown_name_is_opaque() {
        let registry = CodecRegistry::new();
        let body = [0xFFu8, 7, 0, 0, 0, 1, 2, 3];
        let mut foo = node("Foo", 1, 7);
        foo.value = Some(registry.decode(&foo, &body).unwrap());
        assert!(foo.value_as::<OpaqueNode>().is_some());
        assert_eq!(registry.encode(&foo).unwrap(), &body[1..]);
    }

    #[test]
    fn test_register_returns_replaced() {
        let mut registry = CodecRegistry::new();
        assert!(registry.register("Counter", Arc::new(CounterCodec)).is_none());
        let old = registry.register("Counter", Arc::new(CounterCodec));
        assert_eq!(old.map(|c| c.name()), Some("Counter"));
        assert_eq!(registry.names(), vec!["Counter"]);
    }

    #[test]
    fn test_registered_codec_dispatch() {
        let registry = CodecRegistry::with_codecs([Arc::new(CounterCodec) as Arc<dyn NodeCodec>]);
        let body = [7u8, 0, 0, 0, 42, 0, 0, 0];
        let mut counter = node("Counter", 0, 8);
        counter.value = Some(registry.decode(&counter, &body).unwrap());
        assert_eq!(counter.value_as::<Counter>().map(|c| c.count), Some(42));
        counter.value_as_mut::<Counter>().unwrap().count = 43;
        assert_eq!(registry.encode(&counter).unwrap(), [7, 0, 0, 0, 43, 0, 0, 0]);
    }

    #[test]
    fn test_unread_bytes_are_a_mismatch() {
        let registry = CodecRegistry::with_codecs([Arc::new(CounterCodec) as Arc<dyn NodeCodec>]);
        let body = [7u8, 0, 0, 0, 42, 0, 0, 0, 9];
        let counter = node("Counter", 0, 9);
        let err = registry.decode(&counter, &body).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SaveError>(),
            Some(SaveError::CodecMismatch { id: 7, .. })
        ));
    }

    #[test]
    fn test_short_span_is_a_mismatch() {
        let registry = CodecRegistry::with_codecs([Arc::new(CounterCodec) as Arc<dyn NodeCodec>]);
        let body = [7u8, 0, 0, 0, 42];
        let counter = node("Counter", 0, 5);
        let err = registry.decode(&counter, &body).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SaveError>(),
            Some(SaveError::CodecMismatch { .. })
        ));
    }

    #[test]
    fn test_span_outside_body_is_corruption() {
        let registry = CodecRegistry::new();
        let foo = node("Foo", 4, 8);
        let err = registry.decode(&foo, &[0u8; 10]).unwrap_err();
        assert!(err.downcast_ref::<SaveError>().unwrap().is_corruption());
    }

    #[test]
    fn test_foreign_value_fails_encode() {
        let mut registry = CodecRegistry::with_codecs([Arc::new(CounterCodec) as Arc<dyn NodeCodec>]);
        let mut counter = node("Counter", 0, 8);
        counter.value = Some(Box::new(Counter { id: 7, count: 1 }));
        registry.register("Counter", Arc::new(OtherCodec));
        let err = registry.encode(&counter).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SaveError>(),
            Some(SaveError::Encode { id: 7, .. })
        ));
    }

    #[test]
    fn test_missing_value_fails_encode() {
        let registry = CodecRegistry::new();
        let err = registry.encode(&node("Foo", 0, 4)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SaveError>(),
            Some(SaveError::Encode { .. })
        ));
    }

    #[derive(Debug)]
    struct OtherCodec;

    impl NodeCodec for OtherCodec {
        fn name(&self) -> &'static str {
            "Counter"
        }

        fn decode(
            &self,
            _node: &NodeEntry,
            reader: &mut MemReaderRef<'_>,
        ) -> Result<Box<dyn NodeData>> {
            let data = reader.remaining().to_vec();
            reader.pos = reader.data.len();
            Ok(Box::new(OpaqueNode::new(data)))
        }

        fn encode(&self, node: &NodeEntry, value: &dyn NodeData) -> Result<Vec<u8>> {
            let value = expect_value::<OpaqueNode>(self, node, value)?;
            Ok(value.data.clone())
        }
    }
}
