//! The save container: chunk table, directory, tree and the load/save pipeline.
pub mod chunk;
pub mod container;
pub mod directory;
pub mod tree;

pub use container::{LoadedSave, SaveFile, body_image, parse, serialize};
pub use tree::{NodeSummary, SaveTree};
