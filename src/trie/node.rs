//! The four node shapes of §3's data model plus the machinery to move
//! between them and their RLP/`node_ref` representation.

use primitive_types::H256;

use crate::rlp::{self, RlpItem};

use super::nibble::{from_compact, to_compact};
use super::{KvStore, TrieError};

/// 16 branch slots, each an owned subtree (possibly `Empty`, possibly an
/// unresolved `Hash` reference waiting to be fetched from the store).
pub type BranchChildren = [Box<Node>; 16];

pub fn empty_children() -> BranchChildren {
    std::array::from_fn(|_| Box::new(Node::Empty))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Empty,
    Leaf {
        path: Vec<u8>,
        value: Vec<u8>,
    },
    Extension {
        path: Vec<u8>,
        child: Box<Node>,
    },
    Branch {
        children: BranchChildren,
        value: Option<Vec<u8>>,
    },
    /// A reference to a node that has not yet been loaded from the store.
    Hash(H256),
}

impl Node {
    /// Resolve a `Hash` placeholder into the concrete node it names,
    /// fetching and decoding from the store as needed. Concrete nodes are
    /// returned unchanged (cloned).
    pub fn resolve<S: KvStore>(self, store: &S) -> Result<Node, TrieError> {
        match self {
            Node::Hash(h) => decode_node(
                &store
                    .get(h.as_bytes())
                    .ok_or(TrieError::MissingNode(h))?,
            ),
            other => Ok(other),
        }
    }
}

/// Parse an already-decoded `RlpItem` into a `Node`. Used both for
/// top-level node bytes and for inline children embedded directly in a
/// parent's RLP list.
pub fn node_from_item(item: &RlpItem) -> Result<Node, TrieError> {
    match item {
        RlpItem::String(s) if s.is_empty() => Ok(Node::Empty),
        RlpItem::String(s) if s.len() == 32 => Ok(Node::Hash(H256::from_slice(s))),
        RlpItem::String(_) => Err(TrieError::MalformedNode),
        RlpItem::List(items) => match items.len() {
            2 => {
                let path_bytes = items[0].as_str().map_err(|_| TrieError::MalformedNode)?;
                let (path, is_leaf) = from_compact(path_bytes)?;
                if is_leaf {
                    let value = items[1].as_str().map_err(|_| TrieError::MalformedNode)?.to_vec();
                    Ok(Node::Leaf { path, value })
                } else {
                    let child = node_from_item(&items[1])?;
                    Ok(Node::Extension {
                        path,
                        child: Box::new(child),
                    })
                }
            }
            17 => {
                let mut children = empty_children();
                for i in 0..16 {
                    children[i] = Box::new(node_from_item(&items[i])?);
                }
                let value = match &items[16] {
                    RlpItem::String(s) if s.is_empty() => None,
                    RlpItem::String(s) => Some(s.clone()),
                    RlpItem::List(_) => return Err(TrieError::MalformedNode),
                };
                Ok(Node::Branch { children, value })
            }
            _ => Err(TrieError::MalformedNode),
        },
    }
}

/// Decode a node from its raw top-level RLP bytes (as fetched from the
/// store by hash).
pub fn decode_node(bytes: &[u8]) -> Result<Node, TrieError> {
    let item = rlp::decode_exact(bytes)?;
    node_from_item(&item)
}

/// Build this node's own `RlpItem` (its two- or seventeen-element list, or
/// the empty string for `Empty`), recursively persisting any child whose
/// encoding is 32 bytes or longer into `store` and leaving children under
/// that threshold embedded inline. This is the `node_ref` operation of
/// §4.2, applied at every level except the root (root commitment is always
/// hashed regardless of size — see `Trie::root_hash`).
pub fn to_item_and_persist<S: KvStore>(node: &Node, store: &mut S) -> RlpItem {
    match node {
        Node::Empty => RlpItem::String(vec![]),
        Node::Hash(h) => RlpItem::String(h.as_bytes().to_vec()),
        Node::Leaf { path, value } => RlpItem::List(vec![
            RlpItem::String(to_compact(path, true)),
            RlpItem::String(value.clone()),
        ]),
        Node::Extension { path, child } => {
            let child_ref = node_ref(child, store);
            RlpItem::List(vec![RlpItem::String(to_compact(path, false)), child_ref])
        }
        Node::Branch { children, value } => {
            let mut items: Vec<RlpItem> = children.iter().map(|c| node_ref(c, store)).collect();
            items.push(match value {
                Some(v) => RlpItem::String(v.clone()),
                None => RlpItem::String(vec![]),
            });
            RlpItem::List(items)
        }
    }
}

/// `node_ref(node)`: the reference a *parent* embeds for this child — the
/// node's own RLP item when under 32 bytes encoded, otherwise its
/// Keccak-256 hash, with the encoding persisted into the store.
fn node_ref<S: KvStore>(node: &Node, store: &mut S) -> RlpItem {
    match node {
        Node::Empty => RlpItem::String(vec![]),
        Node::Hash(h) => RlpItem::String(h.as_bytes().to_vec()),
        _ => {
            let item = to_item_and_persist(node, store);
            let bytes = rlp::encode(&item);
            if bytes.len() < 32 {
                item
            } else {
                let hash = crate::crypto::keccak256(&bytes);
                store.put(hash.as_bytes(), &bytes);
                RlpItem::String(hash.as_bytes().to_vec())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trie::MemoryKvStore;

    #[test]
    fn leaf_roundtrips_through_rlp() {
        let node = Node::Leaf {
            path: vec![1, 2, 3, 4],
            value: b"value".to_vec(),
        };
        let mut store = MemoryKvStore::default();
        let item = to_item_and_persist(&node, &mut store);
        let decoded = node_from_item(&item).unwrap();
        assert_eq!(decoded, node);
    }

    #[test]
    fn branch_with_long_child_hashes_it() {
        let long_leaf = Node::Leaf {
            path: vec![0; 40],
            value: vec![0xaa; 40],
        };
        let mut children = empty_children();
        children[0] = Box::new(long_leaf);
        let branch = Node::Branch {
            children,
            value: None,
        };
        let mut store = MemoryKvStore::default();
        let item = to_item_and_persist(&branch, &mut store);
        let list = item.as_list().unwrap();
        // slot 0 should now be a 32-byte hash string, not an inline list
        assert_eq!(list[0].as_str().unwrap().len(), 32);
        assert!(!store.inner.is_empty());
    }
}
