// trie.rs — Byte trie over the keyed edges of one match node
//
// Edges are sorted by key and split recursively: a group whose keys share a
// prefix of two or more bytes becomes a `Sequence`, anything else becomes a
// `Single` that branches on one byte. An exhausted key is a `Leaf`.
//
// Preconditions: edge keys of one node are distinct.
// Postconditions: every input key is reachable through exactly one path.
// Failure modes: duplicate keys, an empty key at the root, or peek and match
//                edges sharing a prefix → `CompileError::Configuration`.
// Side effects: none.

use std::collections::BTreeMap;

use crate::diag::{codes, CompileError, CompileResult};
use crate::id::NodeId;

// ── Public types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrieEdge {
    pub key: Vec<u8>,
    pub target: NodeId,
    pub no_advance: bool,
    pub value: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrieLeaf {
    pub target: NodeId,
    pub value: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrieChild {
    pub key: u8,
    pub no_advance: bool,
    pub node: TrieNode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrieNode {
    Leaf(TrieLeaf),
    /// Multi-byte literal shared by every key below.
    Sequence { select: Vec<u8>, child: Box<TrieNode> },
    /// One-byte branch, children in ascending key order. `otherwise` is the
    /// leaf of a key that ends here.
    Single {
        children: Vec<TrieChild>,
        otherwise: Option<TrieLeaf>,
    },
}

/// Trie builder for the node called `name` (used in error messages).
pub struct Trie<'a> {
    name: &'a str,
}

// ── Construction ────────────────────────────────────────────────────────────

impl<'a> Trie<'a> {
    pub fn new(name: &'a str) -> Self {
        Trie { name }
    }

    /// `None` when there are no edges.
    pub fn build(&self, mut edges: Vec<TrieEdge>) -> CompileResult<Option<TrieNode>> {
        if edges.is_empty() {
            return Ok(None);
        }
        edges.sort_by(|a, b| a.key.cmp(&b.key));
        self.level(edges, &[]).map(Some)
    }

    fn level(&self, edges: Vec<TrieEdge>, path: &[Vec<u8>]) -> CompileResult<TrieNode> {
        if edges.len() == 1 && edges[0].key.is_empty() {
            return Ok(TrieNode::Leaf(TrieLeaf {
                target: edges[0].target,
                value: edges[0].value,
            }));
        }

        let first = &edges[0].key;
        let last = &edges[edges.len() - 1].key;
        let common = first
            .iter()
            .zip(last.iter())
            .take_while(|(a, b)| a == b)
            .count();

        if common > 1 {
            let prefix = first[..common].to_vec();
            self.sequence(edges, prefix, path)
        } else {
            self.single(edges, path)
        }
    }

    fn sequence(&self, edges: Vec<TrieEdge>, prefix: Vec<u8>, path: &[Vec<u8>]) -> CompileResult<TrieNode> {
        if edges.iter().any(|e| e.no_advance) {
            return Err(self.conflict(path));
        }
        let sliced = slice(edges, prefix.len());
        let mut subpath = path.to_vec();
        subpath.push(prefix.clone());
        let child = self.level(sliced, &subpath)?;
        Ok(TrieNode::Sequence {
            select: prefix,
            child: Box::new(child),
        })
    }

    fn single(&self, edges: Vec<TrieEdge>, path: &[Vec<u8>]) -> CompileResult<TrieNode> {
        if edges[0].key.is_empty() {
            if path.is_empty() {
                return Err(CompileError::config(
                    codes::INVALID_EDGE,
                    format!("Empty root entry at \"{}\"", self.name),
                ));
            }
            if edges.len() > 1 && edges[1].key.is_empty() {
                return Err(CompileError::config(
                    codes::DUPLICATE_ENTRY,
                    format!(
                        "Duplicate entries in \"{}\" at: [{}]",
                        self.name,
                        render_path(path)
                    ),
                ));
            }
        }

        let mut otherwise = None;
        let mut groups: BTreeMap<u8, Vec<TrieEdge>> = BTreeMap::new();
        for edge in edges {
            match edge.key.first() {
                None => {
                    otherwise = Some(TrieLeaf {
                        target: edge.target,
                        value: edge.value,
                    })
                }
                Some(&b) => groups.entry(b).or_default().push(edge),
            }
        }

        let mut children = Vec::with_capacity(groups.len());
        for (key, group) in groups {
            let mut subpath = path.to_vec();
            subpath.push(vec![key]);
            let no_advance = group[0].no_advance;
            if group.iter().any(|e| e.no_advance != no_advance) {
                return Err(self.conflict(&subpath));
            }
            let node = self.level(slice(group, 1), &subpath)?;
            children.push(TrieChild {
                key,
                no_advance,
                node,
            });
        }

        Ok(TrieNode::Single { children, otherwise })
    }

    fn conflict(&self, path: &[Vec<u8>]) -> CompileError {
        CompileError::config(
            codes::PEEK_MATCH_CONFLICT,
            format!(
                "Conflicting .peek and .match entries in \"{}\" at: [{}]",
                self.name,
                render_path(path)
            ),
        )
    }
}

fn slice(edges: Vec<TrieEdge>, from: usize) -> Vec<TrieEdge> {
    edges
        .into_iter()
        .map(|mut e| {
            e.key.drain(..from);
            e
        })
        .collect()
}

fn render_path(path: &[Vec<u8>]) -> String {
    path.iter()
        .map(|seg| String::from_utf8_lossy(seg).into_owned())
        .collect::<Vec<_>>()
        .join(",")
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(key: &str, target: u32) -> TrieEdge {
        TrieEdge {
            key: key.as_bytes().to_vec(),
            target: NodeId(target),
            no_advance: false,
            value: None,
        }
    }

    fn peek(key: &str, target: u32) -> TrieEdge {
        TrieEdge {
            no_advance: true,
            ..edge(key, target)
        }
    }

    fn leaf(target: u32) -> TrieNode {
        TrieNode::Leaf(TrieLeaf {
            target: NodeId(target),
            value: None,
        })
    }

    #[test]
    fn no_edges_no_trie() {
        assert_eq!(Trie::new("n").build(vec![]).unwrap(), None);
    }

    #[test]
    fn single_key_is_a_single_branch() {
        let trie = Trie::new("n").build(vec![edge("a", 1)]).unwrap().unwrap();
        assert_eq!(
            trie,
            TrieNode::Single {
                children: vec![TrieChild {
                    key: b'a',
                    no_advance: false,
                    node: leaf(1),
                }],
                otherwise: None,
            }
        );
    }

    #[test]
    fn long_common_prefix_is_a_sequence() {
        let trie = Trie::new("n")
            .build(vec![edge("HTTP/1.1", 1), edge("HTTP/1.0", 2)])
            .unwrap()
            .unwrap();
        let TrieNode::Sequence { select, child } = trie else {
            panic!("expected sequence, got {:?}", trie);
        };
        assert_eq!(select, b"HTTP/1.".to_vec());
        let TrieNode::Single { children, otherwise } = *child else {
            panic!("expected single");
        };
        assert!(otherwise.is_none());
        assert_eq!(children.iter().map(|c| c.key).collect::<Vec<_>>(), b"01".to_vec());
        assert_eq!(children[0].node, leaf(2));
    }

    #[test]
    fn prefix_key_becomes_otherwise_leaf() {
        let trie = Trie::new("n")
            .build(vec![edge("abc", 2), edge("ab", 1)])
            .unwrap()
            .unwrap();
        let TrieNode::Sequence { select, child } = trie else {
            panic!("expected sequence");
        };
        assert_eq!(select, b"ab".to_vec());
        let TrieNode::Single { children, otherwise } = *child else {
            panic!("expected single");
        };
        assert_eq!(otherwise.map(|l| l.target), Some(NodeId(1)));
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].key, b'c');
    }

    #[test]
    fn children_are_sorted() {
        let trie = Trie::new("n")
            .build(vec![edge("c", 3), edge("a", 1), edge("b", 2)])
            .unwrap()
            .unwrap();
        let TrieNode::Single { children, .. } = trie else {
            panic!("expected single");
        };
        assert_eq!(children.iter().map(|c| c.key).collect::<Vec<_>>(), b"abc".to_vec());
    }

    #[test]
    fn peek_and_match_conflict() {
        let err = Trie::new("start")
            .build(vec![peek("a", 2), edge("ab", 1)])
            .unwrap_err();
        assert_eq!(err.code(), codes::PEEK_MATCH_CONFLICT);
        assert_eq!(
            err.to_string(),
            "Conflicting .peek and .match entries in \"start\" at: [a]"
        );
    }

    #[test]
    fn duplicate_entries() {
        let err = Trie::new("dup")
            .build(vec![edge("ab", 1), edge("ab", 2), edge("ac", 3)])
            .unwrap_err();
        assert_eq!(err.code(), codes::DUPLICATE_ENTRY);
        assert_eq!(err.to_string(), "Duplicate entries in \"dup\" at: [a,b]");
    }

    #[test]
    fn values_reach_leaves() {
        let mut e = edge("GET", 1);
        e.value = Some(1);
        let trie = Trie::new("n").build(vec![e]).unwrap().unwrap();
        let TrieNode::Sequence { child, .. } = trie else {
            panic!("expected sequence");
        };
        assert_eq!(
            *child,
            TrieNode::Leaf(TrieLeaf {
                target: NodeId(1),
                value: Some(1)
            })
        );
    }
}
