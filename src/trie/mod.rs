//! The Merkle-Patricia trie: an authenticated key→value map whose root hash
//! commits to its entire contents (§3, §4.2).
//!
//! A `Trie<S>` is a thin handle over a content-addressed [`KvStore`]: nodes
//! are immutable once persisted, so `put`/`delete` build new nodes bottom-up
//! and leave unrelated subtries untouched (the "logically persistent"
//! behaviour named in §4.2).

use std::collections::HashMap;

use primitive_types::H256;
use thiserror::Error;

use crate::crypto::keccak256;
use crate::rlp::{self, RlpError};

mod nibble;
mod node;

use nibble::{bytes_to_nibbles, common_prefix_len};
use node::{decode_node, empty_children, to_item_and_persist, BranchChildren, Node};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrieError {
    #[error("node referenced by hash {0:?} is missing from the store")]
    MissingNode(H256),
    #[error("node bytes do not decode to a well-formed node")]
    MalformedNode,
    #[error(transparent)]
    Rlp(#[from] RlpError),
}

/// Content-addressed byte store backing a trie. Keys are always 32-byte
/// Keccak-256 hashes.
pub trait KvStore {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;
    fn put(&mut self, key: &[u8], value: &[u8]);
}

/// Simple in-memory `KvStore`, used by tests and by callers that don't need
/// the trie to outlive the process.
#[derive(Debug, Default, Clone)]
pub struct MemoryKvStore {
    pub(crate) inner: HashMap<Vec<u8>, Vec<u8>>,
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.get(key).cloned()
    }

    fn put(&mut self, key: &[u8], value: &[u8]) {
        self.inner.insert(key.to_vec(), value.to_vec());
    }
}

/// A Merkle-Patricia trie over an arbitrary [`KvStore`].
#[derive(Clone)]
pub struct Trie<S: KvStore + Clone> {
    store: S,
    root: Node,
}

impl<S: KvStore + Clone> Trie<S> {
    /// An empty trie over a fresh store.
    pub fn new(store: S) -> Self {
        Trie {
            store,
            root: Node::Empty,
        }
    }

    /// Re-open a trie whose root was previously committed with `root_hash`.
    /// `Empty` is accepted as the canonical empty-trie root (see
    /// `root_hash`'s special case) without requiring a store entry.
    pub fn open(store: S, root: H256) -> Result<Self, TrieError> {
        if root == crate::crypto::empty_trie_root() {
            return Ok(Trie {
                store,
                root: Node::Empty,
            });
        }
        let bytes = store
            .get(root.as_bytes())
            .ok_or(TrieError::MissingNode(root))?;
        let root = decode_node(&bytes)?;
        Ok(Trie { store, root })
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, TrieError> {
        let nibbles = bytes_to_nibbles(key);
        get_at(&self.root, &nibbles, &self.store)
    }

    pub fn put(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), TrieError> {
        let nibbles = bytes_to_nibbles(key);
        let root = std::mem::replace(&mut self.root, Node::Empty);
        self.root = insert_at(root, &nibbles, value, &mut self.store)?;
        Ok(())
    }

    pub fn delete(&mut self, key: &[u8]) -> Result<(), TrieError> {
        let nibbles = bytes_to_nibbles(key);
        let root = std::mem::replace(&mut self.root, Node::Empty);
        self.root = delete_at(root, &nibbles, &mut self.store)?;
        Ok(())
    }

    /// Reclaim the underlying store, discarding the in-memory root pointer.
    /// Used by callers (e.g. per-account storage tries) that persist the
    /// root hash separately and reopen the trie on next access.
    pub fn into_store(self) -> S {
        self.store
    }

    /// The commitment for the current contents: the canonical empty-trie
    /// hash for an empty trie, otherwise Keccak-256 of the root node's RLP
    /// encoding. Unlike interior node references the root is always hashed
    /// and always persisted, regardless of how short its own encoding is,
    /// so that it is always independently store-addressable.
    pub fn root_hash(&mut self) -> H256 {
        if matches!(self.root, Node::Empty) {
            return crate::crypto::empty_trie_root();
        }
        let item = to_item_and_persist(&self.root, &mut self.store);
        let bytes = rlp::encode(&item);
        let hash = keccak256(&bytes);
        self.store.put(hash.as_bytes(), &bytes);
        hash
    }
}

fn get_at<S: KvStore>(node: &Node, path: &[u8], store: &S) -> Result<Option<Vec<u8>>, TrieError> {
    match node {
        Node::Empty => Ok(None),
        Node::Hash(h) => {
            let bytes = store.get(h.as_bytes()).ok_or(TrieError::MissingNode(*h))?;
            get_at(&decode_node(&bytes)?, path, store)
        }
        Node::Leaf {
            path: leaf_path,
            value,
        } => {
            if leaf_path == path {
                Ok(Some(value.clone()))
            } else {
                Ok(None)
            }
        }
        Node::Extension {
            path: ext_path,
            child,
        } => {
            if path.len() >= ext_path.len() && &path[..ext_path.len()] == ext_path.as_slice() {
                get_at(child, &path[ext_path.len()..], store)
            } else {
                Ok(None)
            }
        }
        Node::Branch { children, value } => match path.first() {
            None => Ok(value.clone()),
            Some(&nibble) => get_at(&children[nibble as usize], &path[1..], store),
        },
    }
}

/// Resolve a node one level (following a `Hash` placeholder) so that
/// `insert`/`delete` can pattern-match on its concrete shape.
fn resolve<S: KvStore>(node: Node, store: &S) -> Result<Node, TrieError> {
    node.resolve(store)
}

fn insert_at<S: KvStore>(
    node: Node,
    path: &[u8],
    value: Vec<u8>,
    store: &mut S,
) -> Result<Node, TrieError> {
    let node = resolve(node, store)?;
    match node {
        Node::Empty => Ok(Node::Leaf {
            path: path.to_vec(),
            value,
        }),
        Node::Leaf {
            path: leaf_path,
            value: leaf_value,
        } => {
            let common = common_prefix_len(&leaf_path, path);
            if common == leaf_path.len() && common == path.len() {
                // same key: overwrite
                return Ok(Node::Leaf {
                    path: leaf_path,
                    value,
                });
            }
            branch_from_two(
                &leaf_path,
                leaf_value,
                path,
                value,
                common,
            )
        }
        Node::Extension {
            path: ext_path,
            child,
        } => {
            let common = common_prefix_len(&ext_path, path);
            if common == ext_path.len() {
                // fully matched the extension's path; recurse into child
                let new_child = insert_at(*child, &path[common..], value, store)?;
                return Ok(extend(ext_path, new_child));
            }
            // diverges partway through the extension: split into a branch
            let branch_nibble = ext_path[common];
            let remaining_ext_path = ext_path[common + 1..].to_vec();
            let below = extend(remaining_ext_path, *child);

            let mut children = empty_children();
            children[branch_nibble as usize] = Box::new(below);

            let mut branch_value = None;
            if common == path.len() {
                branch_value = Some(value.clone());
            } else {
                let leaf_nibble = path[common];
                children[leaf_nibble as usize] = Box::new(Node::Leaf {
                    path: path[common + 1..].to_vec(),
                    value: value.clone(),
                });
            }
            let branch = Node::Branch {
                children,
                value: branch_value,
            };
            Ok(extend(ext_path[..common].to_vec(), branch))
        }
        Node::Branch {
            mut children,
            value: branch_value,
        } => match path.first() {
            None => Ok(Node::Branch {
                children,
                value: Some(value),
            }),
            Some(&nibble) => {
                let child = std::mem::replace(&mut children[nibble as usize], Box::new(Node::Empty));
                let new_child = insert_at(*child, &path[1..], value, store)?;
                children[nibble as usize] = Box::new(new_child);
                Ok(Node::Branch {
                    children,
                    value: branch_value,
                })
            }
        },
        Node::Hash(_) => unreachable!("resolved above"),
    }
}

/// Build a branch from two diverging (path, value) pairs that share a
/// `common`-nibble prefix, wrapped in an extension over that shared prefix
/// if non-empty.
fn branch_from_two(
    path_a: &[u8],
    value_a: Vec<u8>,
    path_b: &[u8],
    value_b: Vec<u8>,
    common: usize,
) -> Result<Node, TrieError> {
    let mut children = empty_children();
    let mut branch_value = None;

    if common == path_a.len() {
        branch_value = Some(value_a);
    } else {
        let nibble = path_a[common];
        children[nibble as usize] = Box::new(Node::Leaf {
            path: path_a[common + 1..].to_vec(),
            value: value_a,
        });
    }

    if common == path_b.len() {
        branch_value = Some(value_b);
    } else {
        let nibble = path_b[common];
        children[nibble as usize] = Box::new(Node::Leaf {
            path: path_b[common + 1..].to_vec(),
            value: value_b,
        });
    }

    let branch = Node::Branch {
        children,
        value: branch_value,
    };
    Ok(extend(path_a[..common].to_vec(), branch))
}

/// Wrap `child` in an `Extension` over `prefix`, unless `prefix` is empty in
/// which case `child` is returned directly (an extension with an empty path
/// carries no information and must not be constructed, per the node_ref
/// invariants of §3).
fn extend(prefix: Vec<u8>, child: Node) -> Node {
    if prefix.is_empty() {
        child
    } else {
        Node::Extension {
            path: prefix,
            child: Box::new(child),
        }
    }
}

fn delete_at<S: KvStore>(node: Node, path: &[u8], store: &mut S) -> Result<Node, TrieError> {
    let node = resolve(node, store)?;
    match node {
        Node::Empty => Ok(Node::Empty),
        Node::Leaf {
            path: leaf_path,
            value,
        } => {
            if leaf_path == path {
                Ok(Node::Empty)
            } else {
                Ok(Node::Leaf {
                    path: leaf_path,
                    value,
                })
            }
        }
        Node::Extension {
            path: ext_path,
            child,
        } => {
            if path.len() < ext_path.len() || &path[..ext_path.len()] != ext_path.as_slice() {
                // key not present; nothing changes
                return Ok(Node::Extension {
                    path: ext_path,
                    child,
                });
            }
            let new_child = delete_at(*child, &path[ext_path.len()..], store)?;
            Ok(normalize_extension(ext_path, new_child, store)?)
        }
        Node::Branch {
            mut children,
            value,
        } => match path.first() {
            None => {
                let branch = Node::Branch {
                    children,
                    value: None,
                };
                normalize_branch(branch, store)
            }
            Some(&nibble) => {
                let child =
                    std::mem::replace(&mut children[nibble as usize], Box::new(Node::Empty));
                let new_child = delete_at(*child, &path[1..], store)?;
                children[nibble as usize] = Box::new(new_child);
                normalize_branch(Node::Branch { children, value }, store)
            }
        },
        Node::Hash(_) => unreachable!("resolved above"),
    }
}

/// Fold a freshly-modified extension's child back into canonical form:
/// an extension pointing at `Empty` disappears entirely, one pointing at
/// another extension or a leaf merges the two paths into a single node
/// (§4.2's mandatory post-delete normalization).
fn normalize_extension<S: KvStore>(
    path: Vec<u8>,
    child: Node,
    store: &S,
) -> Result<Node, TrieError> {
    let child = resolve(child, store)?;
    match child {
        Node::Empty => Ok(Node::Empty),
        Node::Leaf {
            path: child_path,
            value,
        } => {
            let mut merged = path;
            merged.extend_from_slice(&child_path);
            Ok(Node::Leaf {
                path: merged,
                value,
            })
        }
        Node::Extension {
            path: child_path,
            child: grandchild,
        } => {
            let mut merged = path;
            merged.extend_from_slice(&child_path);
            Ok(Node::Extension {
                path: merged,
                child: grandchild,
            })
        }
        branch @ Node::Branch { .. } => Ok(extend(path, branch)),
        Node::Hash(_) => unreachable!("resolved above"),
    }
}

/// Fold a freshly-modified branch back into canonical form: a branch left
/// with a single child and no value collapses into that child (extended by
/// one nibble), per §4.2's mandatory post-delete normalization.
fn normalize_branch<S: KvStore>(node: Node, store: &mut S) -> Result<Node, TrieError> {
    let (children, value) = match node {
        Node::Branch { children, value } => (children, value),
        other => return Ok(other),
    };

    let occupied: Vec<usize> = children
        .iter()
        .enumerate()
        .filter(|(_, c)| !matches!(c.as_ref(), Node::Empty))
        .map(|(i, _)| i)
        .collect();

    if occupied.is_empty() {
        return match value {
            Some(v) => Ok(Node::Leaf { path: vec![], value: v }),
            None => Ok(Node::Empty),
        };
    }

    if occupied.len() == 1 && value.is_none() {
        let nibble = occupied[0];
        let only_child = resolve(*take_child(children, nibble), store)?;
        let merged = match only_child {
            Node::Leaf { path, value } => {
                let mut new_path = vec![nibble as u8];
                new_path.extend_from_slice(&path);
                Node::Leaf {
                    path: new_path,
                    value,
                }
            }
            Node::Extension { path, child } => {
                let mut new_path = vec![nibble as u8];
                new_path.extend_from_slice(&path);
                Node::Extension {
                    path: new_path,
                    child,
                }
            }
            branch @ Node::Branch { .. } => Node::Extension {
                path: vec![nibble as u8],
                child: Box::new(branch),
            },
            Node::Empty => unreachable!("occupied slot resolved to Empty"),
            Node::Hash(_) => unreachable!("resolved above"),
        };
        return Ok(merged);
    }

    Ok(Node::Branch { children, value })
}

fn take_child(mut children: BranchChildren, index: usize) -> Box<Node> {
    std::mem::replace(&mut children[index], Box::new(Node::Empty))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_trie_has_canonical_root() {
        let mut trie = Trie::new(MemoryKvStore::default());
        assert_eq!(trie.root_hash(), crate::crypto::empty_trie_root());
    }

    #[test]
    fn put_then_get_roundtrips() {
        let mut trie = Trie::new(MemoryKvStore::default());
        trie.put(b"dog", b"puppy".to_vec()).unwrap();
        trie.put(b"doge", b"coin".to_vec()).unwrap();
        trie.put(b"horse", b"stallion".to_vec()).unwrap();

        assert_eq!(trie.get(b"dog").unwrap(), Some(b"puppy".to_vec()));
        assert_eq!(trie.get(b"doge").unwrap(), Some(b"coin".to_vec()));
        assert_eq!(trie.get(b"horse").unwrap(), Some(b"stallion".to_vec()));
        assert_eq!(trie.get(b"cat").unwrap(), None);
    }

    #[test]
    fn delete_restores_empty_root() {
        let mut trie = Trie::new(MemoryKvStore::default());
        trie.put(b"dog", b"puppy".to_vec()).unwrap();
        trie.delete(b"dog").unwrap();
        assert_eq!(trie.get(b"dog").unwrap(), None);
        assert_eq!(trie.root_hash(), crate::crypto::empty_trie_root());
    }

    #[test]
    fn delete_one_of_many_preserves_the_rest() {
        let mut trie = Trie::new(MemoryKvStore::default());
        trie.put(b"dog", b"puppy".to_vec()).unwrap();
        trie.put(b"doge", b"coin".to_vec()).unwrap();
        trie.put(b"horse", b"stallion".to_vec()).unwrap();

        trie.delete(b"doge").unwrap();

        assert_eq!(trie.get(b"doge").unwrap(), None);
        assert_eq!(trie.get(b"dog").unwrap(), Some(b"puppy".to_vec()));
        assert_eq!(trie.get(b"horse").unwrap(), Some(b"stallion".to_vec()));
    }

    #[test]
    fn insert_order_does_not_affect_root_hash() {
        let mut a = Trie::new(MemoryKvStore::default());
        a.put(b"dog", b"puppy".to_vec()).unwrap();
        a.put(b"doge", b"coin".to_vec()).unwrap();
        a.put(b"horse", b"stallion".to_vec()).unwrap();

        let mut b = Trie::new(MemoryKvStore::default());
        b.put(b"horse", b"stallion".to_vec()).unwrap();
        b.put(b"doge", b"coin".to_vec()).unwrap();
        b.put(b"dog", b"puppy".to_vec()).unwrap();

        assert_eq!(a.root_hash(), b.root_hash());
    }

    #[test]
    fn insert_order_does_not_affect_root_hash_under_random_shuffles() {
        use rand::seq::SliceRandom;

        let pairs: Vec<(&[u8], &[u8])> = vec![
            (b"dog", b"puppy"),
            (b"doge", b"coin"),
            (b"horse", b"stallion"),
            (b"do", b"verb"),
            (b"dogglesworth", b"cat"),
        ];

        let mut rng = rand::thread_rng();
        let mut baseline = Trie::new(MemoryKvStore::default());
        for (key, value) in &pairs {
            baseline.put(key, value.to_vec()).unwrap();
        }
        let expected_root = baseline.root_hash();

        for _ in 0..8 {
            let mut shuffled = pairs.clone();
            shuffled.shuffle(&mut rng);
            let mut trie = Trie::new(MemoryKvStore::default());
            for (key, value) in &shuffled {
                trie.put(key, value.to_vec()).unwrap();
            }
            assert_eq!(trie.root_hash(), expected_root);
        }
    }

    #[test]
    fn overwrite_existing_key_updates_value_not_shape() {
        let mut trie = Trie::new(MemoryKvStore::default());
        trie.put(b"dog", b"puppy".to_vec()).unwrap();
        trie.put(b"dog", b"hound".to_vec()).unwrap();
        assert_eq!(trie.get(b"dog").unwrap(), Some(b"hound".to_vec()));
    }

    #[test]
    fn reopen_from_committed_root_hash() {
        let mut trie = Trie::new(MemoryKvStore::default());
        trie.put(b"dog", b"puppy".to_vec()).unwrap();
        trie.put(b"doge", b"coin".to_vec()).unwrap();
        let root = trie.root_hash();
        let store = trie.store;

        let reopened = Trie::open(store, root).unwrap();
        assert_eq!(reopened.get(b"dog").unwrap(), Some(b"puppy".to_vec()));
        assert_eq!(reopened.get(b"doge").unwrap(), Some(b"coin".to_vec()));
    }
}
