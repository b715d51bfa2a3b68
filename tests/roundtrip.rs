use save_tool::nodes::{NodeCodec, NodeData, OpaqueNode};
use save_tool::save::{SaveFile, SaveTree, body_image};
use save_tool::types::*;
use save_tool::SaveError;
use std::sync::Arc;

fn opaque(id: i32, name: &str, next_id: i32, child_id: i32, payload_len: usize) -> NodeEntry {
    let mut data = id.to_le_bytes().to_vec();
    data.extend((0..payload_len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(id as u8)));
    NodeEntry::new(id, name, next_id, child_id).with_value(OpaqueNode::new(data))
}

// Root { A { A1 } B C } Root2 { D E { E1 } }
fn sample_tree() -> SaveTree {
    SaveTree::from_nodes(vec![
        opaque(0, "Root", 5, 1, 12),
        opaque(1, "A", 3, 2, 40),
        opaque(2, "A1", -1, -1, 100),
        opaque(3, "B", 4, -1, 0),
        opaque(4, "C", -1, -1, 70),
        opaque(5, "Root2", -1, 6, 8),
        opaque(6, "D", 7, -1, 150),
        opaque(7, "E", -1, 8, 3),
        opaque(8, "E1", -1, -1, 33),
    ])
    .unwrap()
}

fn config() -> SaveConfig {
    SaveConfig::opaque_only()
        .with_workers(1)
        .with_max_chunk_size(64)
}

fn sample_bytes() -> Vec<u8> {
    let mut file = SaveFile::from_tree(config(), SaveHeader::new(193, 9, 1), sample_tree());
    file.save().unwrap()
}

fn load(data: &[u8], config: SaveConfig) -> SaveFile {
    let mut file = SaveFile::new(config);
    file.load(data).unwrap();
    file
}

fn load_err(data: &[u8], config: SaveConfig) -> SaveError {
    let mut file = SaveFile::new(config);
    let err = file.load(data).unwrap_err();
    save_tool::error::save_error(&err)
        .cloned()
        .unwrap_or_else(|| panic!("not a save error: {:#}", err))
}

#[test]
fn test_round_trip_is_byte_exact() {
    let data = sample_bytes();
    let mut file = load(&data, config());
    assert_eq!(file.save().unwrap(), data);
}

#[test]
fn test_load_is_idempotent() {
    let data = sample_bytes();
    let mut first = load(&data, config());
    let summary = first.tree().summary();
    let again = first.save().unwrap();
    let second = load(&again, config());
    assert_eq!(second.tree().summary(), summary);
    assert_eq!(second.header(), first.header());
}

#[test]
fn test_tree_shape() {
    let file = load(&sample_bytes(), config());
    let tree = file.tree();
    assert_eq!(tree.roots(), &[0, 5]);
    let children: Vec<Vec<usize>> = tree.nodes().iter().map(|n| n.children.clone()).collect();
    assert_eq!(
        children,
        vec![
            vec![1, 3, 4],
            vec![2],
            vec![],
            vec![],
            vec![],
            vec![6, 7],
            vec![],
            vec![8],
            vec![],
        ]
    );
    let mut seen = vec![0; tree.len()];
    for (_, index) in tree.walk() {
        seen[index] += 1;
    }
    assert!(seen.iter().all(|&count| count == 1));
    for (index, node) in tree.nodes().iter().enumerate() {
        for &child in &node.children {
            assert_eq!(tree.get(child).unwrap().parent, Some(index));
        }
    }
    assert_eq!(tree.get(1).unwrap().next, Some(3));
    assert_eq!(tree.find_by_name("E1"), Some(8));
}

#[test]
fn test_true_sizes_follow_offsets() {
    let file = load(&sample_bytes(), config());
    let nodes = file.tree().nodes();
    assert_eq!(nodes[0].offset, DEFAULT_HEADER_SIZE as i32);
    for pair in nodes.windows(2) {
        assert_eq!(pair[0].true_size as i32, pair[1].offset - pair[0].offset);
    }
    let last = nodes.last().unwrap();
    assert_eq!(last.true_size as i32, last.size);
    // Declared sizes of parents cover their subtree.
    assert_eq!(nodes[1].size as usize, nodes[1].true_size + nodes[2].true_size);
    assert_eq!(
        nodes[0].size as usize,
        nodes[0..5].iter().map(|n| n.true_size).sum::<usize>()
    );
}

#[test]
fn test_chunks_cover_body() {
    let data = sample_bytes();
    let file = load(&data, config());
    let chunks = file.chunks();
    assert!(chunks.chunks.len() > 1);
    assert!(chunks.chunks.iter().all(|c| c.decompressed_size <= 64));
    let body = body_image(&data, 1).unwrap();
    assert_eq!(body.len(), chunks.header_size + chunks.decompressed_size());
    let nodes = file.tree().nodes();
    let last = nodes.last().unwrap();
    assert_eq!(body.len(), last.offset as usize + last.true_size);
}

#[test]
fn test_parallel_matches_sequential() {
    let mut seq = SaveFile::from_tree(config(), SaveHeader::default(), sample_tree());
    let mut par = SaveFile::from_tree(
        config().with_workers(4),
        SaveHeader::default(),
        sample_tree(),
    );
    let data = seq.save().unwrap();
    assert_eq!(par.save().unwrap(), data);
    let loaded = load(&data, config().with_workers(4));
    assert_eq!(loaded.tree().summary(), seq.tree().summary());
}

#[test]
fn test_compression_level_round_trip() {
    let level = config().with_compression_level(Some(9));
    let mut file = SaveFile::from_tree(level.clone(), SaveHeader::default(), sample_tree());
    let data = file.save().unwrap();
    let mut reloaded = load(&data, level);
    assert_eq!(reloaded.save().unwrap(), data);
}

#[test]
fn test_declared_chunk_size_corruption() {
    let mut data = sample_bytes();
    // First chunk: magic, count, header size, compressed size, then decompressed size.
    let pos = HEADER_PREFIX_SIZE + 16;
    let declared = i32::from_le_bytes(data[pos..pos + 4].try_into().unwrap());
    data[pos..pos + 4].copy_from_slice(&(declared + 1).to_le_bytes());
    assert!(load_err(&data, config()).is_corruption());
}

fn put_i32(data: &mut [u8], pos: usize, value: i32) {
    data[pos..pos + 4].copy_from_slice(&value.to_le_bytes());
}

#[test]
fn test_huge_declared_chunks_are_corruption() {
    let mut file = SaveFile::from_tree(config(), SaveHeader::default(), SaveTree::default());
    let mut data = file.save().unwrap();
    // Magic, count, then the header size doubling as the first chunk offset.
    let table = HEADER_PREFIX_SIZE;
    let count = 200;
    put_i32(&mut data, table + 4, count);
    let mut pos = table + 12;
    for i in 0..count {
        if i > 0 {
            put_i32(&mut data, pos, DEFAULT_HEADER_SIZE as i32);
            pos += 4;
        }
        put_i32(&mut data, pos, 0);
        put_i32(&mut data, pos + 4, i32::MAX);
        pos += 8;
    }
    assert!(pos <= DEFAULT_HEADER_SIZE);
    assert!(load_err(&data, config()).is_corruption());
    assert!(body_image(&data, 4).is_err());

    // Stored bytes that could never expand to the declared size.
    let mut data = sample_bytes();
    put_i32(&mut data, table + 16, i32::MAX);
    assert!(load_err(&data, config()).is_corruption());
}

#[test]
fn test_header_size_past_end_is_corruption() {
    let mut data = sample_bytes();
    let len = data.len() as i32;
    put_i32(&mut data, HEADER_PREFIX_SIZE + 8, len + 1);
    assert!(load_err(&data, config()).is_corruption());
}

#[test]
fn test_bad_magics_are_corruption() {
    let data = sample_bytes();
    let mut bad = data.clone();
    bad[0] = b'X';
    assert!(load_err(&bad, config()).is_corruption());
    let mut bad = data.clone();
    let len = bad.len();
    bad[len - 2] = b'X';
    assert!(load_err(&bad, config()).is_corruption());
    let mut bad = data.clone();
    bad[HEADER_PREFIX_SIZE] = b'X';
    assert!(load_err(&bad, config()).is_corruption());
    assert!(load_err(&data[..10], config()).is_corruption());
}

#[test]
fn test_truncated_directory_is_corruption() {
    let data = sample_bytes();
    let footer = i32::from_le_bytes(data[data.len() - 8..data.len() - 4].try_into().unwrap());
    let mut bad = data[..data.len() - 20].to_vec();
    bad.extend_from_slice(&footer.to_le_bytes());
    bad.extend_from_slice(END_MAGIC);
    assert!(load_err(&bad, config()).is_corruption());
}

#[test]
fn test_unknown_node_replays_bytes() {
    let tree = SaveTree::from_nodes(vec![opaque(0, "Foo", -1, -1, 21)]).unwrap();
    let expected = tree.nodes()[0].value_as::<OpaqueNode>().unwrap().data.clone();
    let mut file = SaveFile::from_tree(SaveConfig::default().with_workers(1), SaveHeader::default(), tree);
    let data = file.save().unwrap();
    let mut loaded = load(&data, SaveConfig::default().with_workers(1));
    let node = &loaded.tree().nodes()[0];
    assert_eq!(node.value_as::<OpaqueNode>().unwrap().data, expected);
    assert_eq!(node.value().unwrap().trailing_bytes(), &expected[..]);
    assert_eq!(loaded.save().unwrap(), data);
}

#[test]
fn test_edit_moves_offsets_and_sizes() {
    let data = sample_bytes();
    let mut file = load(&data, config());
    let before: Vec<_> = file.tree().nodes().iter().map(|n| (n.offset, n.size)).collect();
    file.tree_mut()
        .get_mut(2)
        .unwrap()
        .value_as_mut::<OpaqueNode>()
        .unwrap()
        .data
        .extend_from_slice(&[0xEE; 5]);
    let edited = file.save().unwrap();
    let reloaded = load(&edited, config());
    let after: Vec<_> = reloaded.tree().nodes().iter().map(|n| (n.offset, n.size)).collect();
    // A1 grew by five bytes: its ancestors grow, every later node moves.
    assert_eq!(after[0], (before[0].0, before[0].1 + 5));
    assert_eq!(after[1], (before[1].0, before[1].1 + 5));
    assert_eq!(after[2], (before[2].0, before[2].1 + 5));
    for i in 3..after.len() {
        assert_eq!(after[i], (before[i].0 + 5, before[i].1));
    }
}

#[derive(Debug)]
struct RejectingCodec;

impl NodeCodec for RejectingCodec {
    fn name(&self) -> &'static str {
        "B"
    }

    fn decode(
        &self,
        node: &NodeEntry,
        _reader: &mut save_tool::ext::io::MemReaderRef<'_>,
    ) -> anyhow::Result<Box<dyn NodeData>> {
        Err(SaveError::codec_mismatch(node.id, &node.name, "rejected").into())
    }

    fn encode(&self, _node: &NodeEntry, _value: &dyn NodeData) -> anyhow::Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

#[test]
fn test_registered_codec_overrides_fallback() {
    let data = sample_bytes();
    let mut file = SaveFile::new(config());
    assert!(file.register_codec("B", Arc::new(RejectingCodec)).is_none());
    let err = file.load(&data).unwrap_err();
    match save_tool::error::save_error(&err) {
        Some(SaveError::CodecMismatch { id, name, .. }) => {
            assert_eq!(*id, 3);
            assert_eq!(name, "B");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(file.tree().is_empty());
}
