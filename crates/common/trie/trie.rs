pub mod nibbles;
pub mod prefix_set;

pub use nibbles::Nibbles;
pub use prefix_set::PrefixSet;

use ethereum_types::H256;
use lazy_static::lazy_static;
use sha3::{Digest, Keccak256};
use wyrm_rlp::encode::{encode_length, RLPEncode};

lazy_static! {
    /// Root of the empty Merkle Patricia Trie: keccak256(RLP("")).
    pub static ref EMPTY_TRIE_HASH: H256 = H256::from_slice(
        Keccak256::digest([wyrm_rlp::constants::RLP_NULL]).as_slice()
    );
}

/// RLP-encoded trie path (the key as stored, not yet nibbled).
pub type PathRLP = Vec<u8>;
/// RLP-encoded value.
pub type ValueRLP = Vec<u8>;

/// Computes the Merkle Patricia Trie root of the given key/value pairs
/// without materializing the trie. Duplicated paths keep their first value.
pub fn compute_hash_from_unsorted_iter(iter: impl Iterator<Item = (PathRLP, ValueRLP)>) -> H256 {
    let mut entries: Vec<(Nibbles, ValueRLP)> = iter
        .map(|(path, value)| (Nibbles::from_bytes(&path), value))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries.dedup_by(|a, b| a.0 == b.0);

    if entries.is_empty() {
        return *EMPTY_TRIE_HASH;
    }
    let root_rlp = encode_node(&entries, 0);
    H256::from_slice(Keccak256::digest(&root_rlp).as_slice())
}

// RLP encoding of the node covering `entries`, whose paths all agree up to
// `depth` nibbles. `entries` is sorted and non-empty.
fn encode_node(entries: &[(Nibbles, ValueRLP)], depth: usize) -> Vec<u8> {
    if entries.len() == 1 {
        let (path, value) = &entries[0];
        let compact = path.offset(depth).encode_compact(true);
        return encode_list(&[encode_str(&compact), encode_str(value)]);
    }

    // sorted input: the prefix shared by the first and last entries is
    // shared by every entry in between
    let first = &entries[0].0;
    let last = &entries[entries.len() - 1].0;
    let common = first.offset(depth).count_prefix(&last.offset(depth));
    if common > 0 {
        let child = encode_node(entries, depth + common);
        let compact = first.slice(depth, depth + common).encode_compact(false);
        return encode_list(&[encode_str(&compact), node_ref(child)]);
    }

    // branch node: 16 children plus the value of a key ending right here
    // (only the first entry can, keys being distinct and sorted)
    let mut items: Vec<Vec<u8>> = Vec::with_capacity(17);
    let mut idx = 0;
    let mut branch_value: &[u8] = &[];
    if entries[0].0.len() == depth {
        branch_value = &entries[0].1;
        idx = 1;
    }
    for choice in 0u8..16 {
        let start = idx;
        while idx < entries.len() && entries[idx].0.at(depth) == choice {
            idx += 1;
        }
        if start == idx {
            items.push(encode_str(&[]));
        } else {
            items.push(node_ref(encode_node(&entries[start..idx], depth + 1)));
        }
    }
    items.push(encode_str(branch_value));
    encode_list(&items)
}

// A child node is inlined when its encoding is shorter than a hash,
// referenced by keccak otherwise.
fn node_ref(node_rlp: Vec<u8>) -> Vec<u8> {
    if node_rlp.len() < 32 {
        node_rlp
    } else {
        encode_str(Keccak256::digest(&node_rlp).as_slice())
    }
}

fn encode_str(data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    data.encode(&mut buf);
    buf
}

fn encode_list(items: &[Vec<u8>]) -> Vec<u8> {
    let payload_len = items.iter().map(Vec::len).sum();
    let mut buf = Vec::new();
    encode_length(payload_len, &mut buf);
    for item in items {
        buf.extend_from_slice(item);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn empty_iter_hashes_to_empty_trie_root() {
        let root = compute_hash_from_unsorted_iter(std::iter::empty());
        assert_eq!(
            root,
            H256(hex!(
                "56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421"
            ))
        );
    }

    #[test]
    fn root_is_independent_of_insertion_order() {
        let entries = vec![
            (vec![0x01], b"one".to_vec()),
            (vec![0x80], b"zero".to_vec()),
            (vec![0x02], b"two".to_vec()),
            (vec![0x03], b"three".to_vec()),
        ];
        let mut reversed = entries.clone();
        reversed.reverse();

        let a = compute_hash_from_unsorted_iter(entries.into_iter());
        let b = compute_hash_from_unsorted_iter(reversed.into_iter());
        assert_eq!(a, b);
    }

    #[test]
    fn root_depends_on_values() {
        let a = compute_hash_from_unsorted_iter(
            vec![(vec![0x01], b"same".to_vec())].into_iter(),
        );
        let b = compute_hash_from_unsorted_iter(
            vec![(vec![0x01], b"different".to_vec())].into_iter(),
        );
        assert_ne!(a, b);
        assert_ne!(a, *EMPTY_TRIE_HASH);
    }

    #[test]
    fn branching_paths_hash_differently_from_single_leaf() {
        let single =
            compute_hash_from_unsorted_iter(vec![(vec![0x12], b"x".to_vec())].into_iter());
        let branched = compute_hash_from_unsorted_iter(
            vec![
                (vec![0x12], b"x".to_vec()),
                (vec![0x22], b"y".to_vec()),
            ]
            .into_iter(),
        );
        assert_ne!(single, branched);
    }
}
