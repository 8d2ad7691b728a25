//! Longest-suffix matching over DNS labels.
//!
//! A [`DomainTrie`] mirrors the DNS tree: the root node is the root name and
//! each edge is one label, consumed from the most significant (TLD) label
//! down. Lookups walk as deep as the query allows and return the payload of
//! the deepest terminal node passed on the way, which is exactly "most
//! specific enclosing zone" semantics.
//!
//! The payload held at a terminal node is abstracted by [`Terminal`]:
//!
//! - `Option<V>` holds one owner per name (the zone trie).
//! - `Vec<V>` holds several values per name (the firewall trie, where many
//!   rules may target the same domain).
//!
//! Whether a `*` child acts as a wildcard fallback is decided by the
//! [`TriePolicy`] the trie was built with.

use crate::names::{from_labels_rev, labels_rev, WILDCARD_LABEL};
use std::collections::HashMap;

/// The payload stored at a terminal node.
pub trait Terminal: Default + Clone {
    type Value;

    /// Stores `value` in this payload.
    fn store(&mut self, value: Self::Value);

    /// Removes `value` from this payload, returning whether it was present.
    fn discard(&mut self, value: &Self::Value) -> bool;

    /// Returns `true` if the node carries no value and is therefore not terminal.
    fn is_vacant(&self) -> bool;
}

impl<V: Clone + PartialEq> Terminal for Option<V> {
    type Value = V;

    fn store(&mut self, value: V) {
        *self = Some(value);
    }

    fn discard(&mut self, value: &V) -> bool {
        if self.as_ref() == Some(value) {
            *self = None;
            true
        } else {
            false
        }
    }

    fn is_vacant(&self) -> bool {
        self.is_none()
    }
}

impl<V: Clone + PartialEq> Terminal for Vec<V> {
    type Value = V;

    fn store(&mut self, value: V) {
        if !self.contains(&value) {
            self.push(value);
        }
    }

    fn discard(&mut self, value: &V) -> bool {
        let before = self.len();
        self.retain(|v| v != value);
        self.len() != before
    }

    fn is_vacant(&self) -> bool {
        self.is_empty()
    }
}

/// Matching behaviour of a [`DomainTrie`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriePolicy {
    /// Treat a child labelled `*` as a fallback match for any label at that depth.
    pub wildcard: bool,
}

impl TriePolicy {
    /// Plain longest-suffix matching; `*` is an ordinary label.
    pub const EXACT: Self = Self { wildcard: false };
    /// Longest-suffix matching with `*` children acting as wildcards.
    pub const WILDCARD: Self = Self { wildcard: true };
}

#[derive(Debug, Clone, Default)]
struct Node<T> {
    children: HashMap<String, Node<T>>,
    terminal: T,
}

/// A longest-suffix-match trie keyed by DNS labels.
#[derive(Debug, Clone)]
pub struct DomainTrie<T> {
    root: Node<T>,
    policy: TriePolicy,
}

/// Maps zone apex names to the zone that owns them.
pub type ZoneTrie = DomainTrie<Option<String>>;

/// Maps firewall domains (possibly `*.`-prefixed) to the IDs of the rules targeting them.
pub type FirewallTrie = DomainTrie<Vec<u64>>;

impl<T: Terminal> DomainTrie<T> {
    /// Creates an empty trie with the given matching policy.
    pub fn new(policy: TriePolicy) -> Self {
        Self {
            root: Node::default(),
            policy,
        }
    }

    /// Stores `value` under `name`, creating intermediate nodes as needed.
    pub fn insert(&mut self, name: &str, value: T::Value) {
        let mut node = &mut self.root;
        for label in labels_rev(name) {
            node = node.children.entry(label).or_default();
        }
        node.terminal.store(value);
    }

    /// Clears the terminal marker at `name`, returning whether one was present.
    pub fn remove(&mut self, name: &str) -> bool {
        self.remove_with(name, |terminal| {
            let was_terminal = !terminal.is_vacant();
            *terminal = T::default();
            was_terminal
        })
    }

    /// Removes a single `value` stored under `name`, leaving any others in place.
    pub fn remove_value(&mut self, name: &str, value: &T::Value) -> bool {
        self.remove_with(name, |terminal| terminal.discard(value))
    }

    fn remove_with<F>(&mut self, name: &str, f: F) -> bool
    where
        F: FnOnce(&mut T) -> bool,
    {
        let labels = labels_rev(name);
        // The root is never pruned, so its "prune me" flag is ignored.
        let (removed, _) = remove_in(&mut self.root, &labels, f);
        removed
    }

    /// Returns `true` if `name` was inserted and still carries a value.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Returns the payload stored at exactly `name`, if it is terminal.
    pub fn get(&self, name: &str) -> Option<&T> {
        let mut node = &self.root;
        for label in labels_rev(name) {
            node = node.children.get(&label)?;
        }
        (!node.terminal.is_vacant()).then_some(&node.terminal)
    }

    /// Returns the payload of the deepest terminal node that is an
    /// ancestor-or-equal of `qname`.
    ///
    /// Under [`TriePolicy::WILDCARD`], a terminal `*` child is recorded as a
    /// candidate before descending to the next label, so a deeper exact
    /// path always wins over a wildcard at a shallower depth.
    pub fn find_longest(&self, qname: &str) -> Option<&T> {
        let mut node = &self.root;
        let mut best = (!node.terminal.is_vacant()).then_some(&node.terminal);

        for label in labels_rev(qname) {
            if self.policy.wildcard {
                if let Some(wild) = node.children.get(WILDCARD_LABEL) {
                    if !wild.terminal.is_vacant() {
                        best = Some(&wild.terminal);
                    }
                }
            }
            match node.children.get(&label) {
                Some(child) => {
                    node = child;
                    if !child.terminal.is_vacant() {
                        best = Some(&child.terminal);
                    }
                }
                None => break,
            }
        }

        best
    }

    /// Returns every terminal name in the trie, in no particular order.
    pub fn names(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut path = Vec::new();
        collect_names(&self.root, &mut path, &mut out);
        out
    }

    pub fn is_empty(&self) -> bool {
        self.root.terminal.is_vacant() && self.root.children.is_empty()
    }

    #[cfg(test)]
    fn node_count(&self) -> usize {
        fn count<T>(node: &Node<T>) -> usize {
            1 + node.children.values().map(count).sum::<usize>()
        }
        count(&self.root)
    }
}

impl<V: Clone + PartialEq> DomainTrie<Option<V>> {
    /// Returns the owner of the most specific registered ancestor of `qname`.
    pub fn find_longest_match(&self, qname: &str) -> Option<&V> {
        self.find_longest(qname).and_then(Option::as_ref)
    }
}

impl<V: Clone + PartialEq> DomainTrie<Vec<V>> {
    /// Returns all values registered at the most specific match for `qname`.
    pub fn find_matching(&self, qname: &str) -> &[V] {
        self.find_longest(qname).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl ZoneTrie {
    pub fn zones() -> Self {
        Self::new(TriePolicy::EXACT)
    }
}

impl FirewallTrie {
    pub fn rules() -> Self {
        Self::new(TriePolicy::WILDCARD)
    }
}

/// Applies `f` to the terminal at `labels` below `node`, pruning nodes that
/// end up with neither a value nor children. Returns `(removed, prune_node)`.
fn remove_in<T, F>(node: &mut Node<T>, labels: &[String], f: F) -> (bool, bool)
where
    T: Terminal,
    F: FnOnce(&mut T) -> bool,
{
    match labels.split_first() {
        None => {
            let removed = f(&mut node.terminal);
            (removed, node.terminal.is_vacant() && node.children.is_empty())
        }
        Some((label, rest)) => match node.children.get_mut(label) {
            Some(child) => {
                let (removed, prune_child) = remove_in(child, rest, f);
                if prune_child {
                    node.children.remove(label);
                }
                (removed, node.terminal.is_vacant() && node.children.is_empty())
            }
            None => (false, false),
        },
    }
}

fn collect_names<T: Terminal>(node: &Node<T>, path: &mut Vec<String>, out: &mut Vec<String>) {
    if !node.terminal.is_vacant() {
        out.push(from_labels_rev(path));
    }
    for (label, child) in &node.children {
        path.push(label.clone());
        collect_names(child, path, out);
        path.pop();
    }
}
