//! Prefix tree over glossary source terms.
//!
//! Keys are lowercased on insert and lookup, so matching is case-insensitive.

use std::collections::HashMap;

#[derive(Debug)]
struct Node<V> {
    children: HashMap<char, Node<V>>,
    value: Option<V>,
}

#[derive(Debug)]
pub struct Trie<V> {
    root: Node<V>,
    len: usize,
}

impl<V> Default for Trie<V> {
    fn default() -> Self {
        Self {
            root: Node {
                children: HashMap::new(),
                value: None,
            },
            len: 0,
        }
    }
}

impl<V> Trie<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `value` under `key`, returning the value it replaced.
    pub fn insert(&mut self, key: &str, value: V) -> Option<V> {
        let mut node = &mut self.root;
        for ch in key.chars().flat_map(char::to_lowercase) {
            node = node.children.entry(ch).or_insert_with(|| Node {
                children: HashMap::new(),
                value: None,
            });
        }
        let previous = node.value.replace(value);
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    /// Exact lookup.
    pub fn get(&self, key: &str) -> Option<&V> {
        let mut node = &self.root;
        for ch in key.chars().flat_map(char::to_lowercase) {
            node = node.children.get(&ch)?;
        }
        node.value.as_ref()
    }

    /// Longest key that is a prefix of `text`, with the number of bytes of
    /// `text` it covers.
    pub fn longest_prefix_match(&self, text: &str) -> Option<(usize, &V)> {
        let mut node = &self.root;
        let mut best = None;

        for (idx, ch) in text.char_indices() {
            let mut lowered = ch.to_lowercase();
            // Multi-char lowercase expansions are walked as a unit.
            let next = lowered.try_fold(node, |n, c| n.children.get(&c));
            match next {
                Some(n) => node = n,
                None => break,
            }
            if let Some(value) = node.value.as_ref() {
                best = Some((idx + ch.len_utf8(), value));
            }
        }

        best
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
