#![cfg(feature = "character-customization")]
use save_tool::SaveError;
use save_tool::nodes::appearance::*;
use save_tool::nodes::{NodeCodec, OpaqueNode};
use save_tool::save::{SaveFile, SaveTree};
use save_tool::types::*;

fn appearances() -> CharacterCustomizationAppearances {
    CharacterCustomizationAppearances {
        unknown_first_bytes: [7; 15],
        third_person: vec![
            HashValueEntry {
                hash: 0x1122334455667788,
                first: "TPP_Body".into(),
                second: "body_01".into(),
                unknown: [1, 2, 3, 4, 5, 6, 7, 8],
            },
            HashValueEntry {
                hash: 42,
                first: "TPP_Hair".into(),
                second: "hair_short".into(),
                unknown: [0; 8],
            },
        ],
        additional_third_person: Vec::new(),
        first_person: vec![HashValueEntry {
            hash: 9,
            first: "FPP_Arms".into(),
            second: "arms_01".into(),
            unknown: [9; 8],
        }],
        trailing: vec![0, 0, 0, 1],
    }
}

fn tree_with(appearance: NodeEntry) -> SaveTree {
    SaveTree::from_nodes(vec![
        NodeEntry::new(0, "inventory", -1, 1).with_value(OpaqueNode::new(vec![0, 0, 0, 0, 1, 2])),
        appearance,
        NodeEntry::new(2, "tail", -1, -1).with_value(OpaqueNode::new(vec![2, 0, 0, 0])),
    ])
    .unwrap()
}

fn config() -> SaveConfig {
    SaveConfig::default().with_workers(1)
}

#[test]
fn test_appearance_round_trip() {
    let node = NodeEntry::new(1, NODE_NAME, 2, -1).with_value(appearances());
    let mut file = SaveFile::from_tree(config(), SaveHeader::default(), tree_with(node));
    let data = file.save().unwrap();

    let mut loaded = SaveFile::new(config());
    loaded.load(&data).unwrap();
    let value = loaded.tree().nodes()[1]
        .value_as::<CharacterCustomizationAppearances>()
        .unwrap();
    assert_eq!(value, &appearances());
    assert_eq!(loaded.save().unwrap(), data);

    // Without the codec the node is kept as raw bytes and written back unchanged.
    let mut opaque = SaveFile::new(SaveConfig::opaque_only().with_workers(1));
    opaque.load(&data).unwrap();
    assert!(opaque.tree().nodes()[1].value_as::<OpaqueNode>().is_some());
    assert_eq!(opaque.save().unwrap(), data);
}

#[test]
fn test_appearance_edit() {
    let node = NodeEntry::new(1, NODE_NAME, 2, -1).with_value(appearances());
    let mut file = SaveFile::from_tree(config(), SaveHeader::default(), tree_with(node));
    let data = file.save().unwrap();

    let mut loaded = SaveFile::new(config());
    loaded.load(&data).unwrap();
    let index = loaded.tree().find_by_name(NODE_NAME).unwrap();
    let old_size = loaded.tree().nodes()[0].size;
    loaded
        .tree_mut()
        .get_mut(index)
        .unwrap()
        .value_as_mut::<CharacterCustomizationAppearances>()
        .unwrap()
        .third_person[1]
        .second = "hair_long_braid".into();
    let edited = loaded.save().unwrap();

    let mut reloaded = SaveFile::new(config());
    reloaded.load(&edited).unwrap();
    let value = reloaded.tree().nodes()[index]
        .value_as::<CharacterCustomizationAppearances>()
        .unwrap();
    assert_eq!(value.third_person[1].second, "hair_long_braid");
    assert_eq!(value.trailing, vec![0, 0, 0, 1]);
    assert_eq!(reloaded.tree().nodes()[0].size, old_size + 5);
}

#[test]
fn test_wrong_marker_is_codec_mismatch() {
    let codec = CharacterCustomizationAppearancesCodec::new();
    let template = NodeEntry::new(1, NODE_NAME, 2, -1);
    let mut bytes = codec.encode(&template, &appearances()).unwrap();
    // First marker starts after the id and the 15 unknown bytes.
    bytes[20..23].copy_from_slice(b"FPP");
    let node = NodeEntry::new(1, NODE_NAME, 2, -1).with_value(OpaqueNode::new(bytes));
    let mut file = SaveFile::from_tree(
        SaveConfig::opaque_only().with_workers(1),
        SaveHeader::default(),
        tree_with(node),
    );
    let data = file.save().unwrap();

    let mut loaded = SaveFile::new(config());
    let err = loaded.load(&data).unwrap_err();
    match err.downcast_ref::<SaveError>() {
        Some(SaveError::CodecMismatch { id, name, .. }) => {
            assert_eq!(*id, 1);
            assert_eq!(name, NODE_NAME);
        }
        other => panic!("unexpected error: {:?}", other),
    }
}
