//! Reading and writing chunk-compressed node save files.
//!
//! A save file is a header with an LZ4 chunk table, the compressed node bodies and a
//! footer listing every node. [save::SaveFile] loads it into a [save::SaveTree], decodes
//! each node through a [nodes::CodecRegistry] and writes it back byte for byte.
pub mod error;
pub mod ext;
pub mod nodes;
pub mod save;
pub mod types;
pub mod utils;

pub use error::SaveError;
pub use save::{SaveFile, SaveTree};
pub use types::{NodeEntry, SaveConfig, SaveHeader};
