//! Node codecs and the registry dispatching to them.
#[cfg(feature = "character-customization")]
pub mod appearance;
pub mod base;
pub mod opaque;
pub mod registry;

pub use base::{NodeCodec, NodeData};
pub use opaque::{OpaqueCodec, OpaqueNode};
pub use registry::CodecRegistry;

use std::sync::Arc;

/// Every codec enabled by cargo features.
pub fn default_codecs() -> Vec<Arc<dyn NodeCodec>> {
    #[allow(unused_mut)]
    let mut codecs: Vec<Arc<dyn NodeCodec>> = Vec::new();
    #[cfg(feature = "character-customization")]
    codecs.push(Arc::new(
        appearance::CharacterCustomizationAppearancesCodec::new(),
    ));
    codecs
}
