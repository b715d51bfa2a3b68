//! Character appearance selections for third and first person views.
use super::base::*;
use crate::error::SaveError;
use crate::ext::io::*;
use crate::types::NodeEntry;
use crate::utils::struct_pack::*;
use anyhow::Result;
use save_tool_macro::{StructPack, StructUnpack};
use std::any::Any;

/// Directory name of the node, spelled as the game writes it.
pub const NODE_NAME: &str = "CharacetrCustomization_Appearances";
const THIRD_PERSON_MARKER: &str = "TPP";
const FIRST_PERSON_MARKER: &str = "FPP";

/// Smallest encoded [HashValueEntry]: hash, two empty strings and the unknown block.
const MIN_HASH_ENTRY_SIZE: usize = 8 + 1 + 1 + 8;
/// Smallest encoded [ValueEntry].
const MIN_VALUE_ENTRY_SIZE: usize = 1 + 1 + 8;

#[derive(Debug, Clone, PartialEq, Eq, StructPack, StructUnpack)]
pub struct HashValueEntry {
    pub hash: u64,
    #[pstring]
    pub first: String,
    #[pstring]
    pub second: String,
    pub unknown: [u8; 8],
}

#[derive(Debug, Clone, PartialEq, Eq, StructPack, StructUnpack)]
pub struct ValueEntry {
    #[pstring]
    pub first: String,
    #[pstring]
    pub second: String,
    pub unknown: [u8; 8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterCustomizationAppearances {
    pub unknown_first_bytes: [u8; 15],
    pub third_person: Vec<HashValueEntry>,
    pub additional_third_person: Vec<ValueEntry>,
    pub first_person: Vec<HashValueEntry>,
    pub trailing: Vec<u8>,
}

impl NodeData for CharacterCustomizationAppearances {
    fn trailing_bytes(&self) -> &[u8] {
        &self.trailing
    }

    fn summary(&self) -> String {
        format!(
            "{} third person, {} additional, {} first person entries",
            self.third_person.len(),
            self.additional_third_person.len(),
            self.first_person.len()
        )
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
pub struct CharacterCustomizationAppearancesCodec;

impl CharacterCustomizationAppearancesCodec {
    pub const fn new() -> Self {
        Self
    }
}

/// Read an entry count, rejecting values the rest of the span can not hold.
fn read_count(
    node: &NodeEntry,
    reader: &mut MemReaderRef<'_>,
    min_entry_size: usize,
    section: &str,
) -> Result<usize> {
    let count = reader.read_i32()?;
    let count = usize::try_from(count).map_err(|_| {
        SaveError::codec_mismatch(
            node.id,
            &node.name,
            format!("negative {} entry count {}", section, count),
        )
    })?;
    if count.saturating_mul(min_entry_size) > reader.remaining().len() {
        return Err(SaveError::codec_mismatch(
            node.id,
            &node.name,
            format!(
                "{} {} entries can not fit in {} remaining bytes",
                count,
                section,
                reader.remaining().len()
            ),
        )
        .into());
    }
    Ok(count)
}

impl NodeCodec for CharacterCustomizationAppearancesCodec {
    fn name(&self) -> &'static str {
        NODE_NAME
    }

    fn display_name(&self) -> &'static str {
        "Character Appearance"
    }

    fn decode(&self, node: &NodeEntry, reader: &mut MemReaderRef<'_>) -> Result<Box<dyn NodeData>> {
        let _id = reader.read_i32()?;
        let unknown_first_bytes = reader.read_struct::<[u8; 15]>()?;

        expect_marker(node, &reader.read_pstring()?, THIRD_PERSON_MARKER)?;
        let count = read_count(node, reader, MIN_HASH_ENTRY_SIZE, "third person")?;
        let third_person = reader.read_struct_vec::<HashValueEntry>(count)?;

        let count = read_count(node, reader, MIN_VALUE_ENTRY_SIZE, "additional")?;
        let additional_third_person = reader.read_struct_vec::<ValueEntry>(count)?;

        expect_marker(node, &reader.read_pstring()?, FIRST_PERSON_MARKER)?;
        let count = read_count(node, reader, MIN_HASH_ENTRY_SIZE, "first person")?;
        let first_person = reader.read_struct_vec::<HashValueEntry>(count)?;

        let trailing = reader.remaining().to_vec();
        reader.pos = reader.data.len();
        Ok(Box::new(CharacterCustomizationAppearances {
            unknown_first_bytes,
            third_person,
            additional_third_person,
            first_person,
            trailing,
        }))
    }

    fn encode(&self, node: &NodeEntry, value: &dyn NodeData) -> Result<Vec<u8>> {
        let value = expect_value::<CharacterCustomizationAppearances>(self, node, value)?;
        let mut data = Vec::new();
        data.write_i32(node.id)?;
        data.write_struct(&value.unknown_first_bytes)?;
        data.write_pstring(THIRD_PERSON_MARKER)?;
        data.write_i32(section_len(node, value.third_person.len())?)?;
        value.third_person.pack(&mut data)?;
        data.write_i32(section_len(node, value.additional_third_person.len())?)?;
        value.additional_third_person.pack(&mut data)?;
        data.write_pstring(FIRST_PERSON_MARKER)?;
        data.write_i32(section_len(node, value.first_person.len())?)?;
        value.first_person.pack(&mut data)?;
        data.extend_from_slice(&value.trailing);
        Ok(data)
    }
}

fn section_len(node: &NodeEntry, len: usize) -> Result<i32> {
    i32::try_from(len).map_err(|_| {
        SaveError::encode(node.id, &node.name, format!("too many entries: {}", len)).into()
    })
}
