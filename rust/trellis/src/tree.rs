//! The context tree.
//!
//! Every plugin registration allocates a [`Node`] in an arena indexed by
//! creation order. A node keeps a back-reference to its parent (never owning
//! it) plus the decorations declared directly on it. Lookups walk from a node
//! up to the root and return the first match, so the nearest context wins
//! and nothing declared below a node is ever visible from it.
//!
//! ```text
//! root (0) ─┬─ a (1) ─── a1 (3)
//!           └─ b (2)
//!
//! chain(3) = [3, 1, 0]      chain(2) = [2, 0]
//! ```

use std::{collections::HashSet, fmt};

use serde::{Deserialize, Serialize};

use crate::{Decoration, Decorations, Instance, Reply, Request, Target};

/// Index of a context in the tree arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextId(usize);

impl ContextId {
    /// The root context of every tree.
    pub const ROOT: ContextId = ContextId(0);

    /// Position of the context in creation order.
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One context: a node of the plugin tree.
#[derive(Debug, Clone, Default)]
pub struct Node {
    parent: Option<ContextId>,
    children: Vec<ContextId>,
    pub(crate) instance: Decorations<Instance>,
    pub(crate) request: Decorations<Request>,
    pub(crate) reply: Decorations<Reply>,
    plugins: Vec<String>,
}

impl Node {
    /// The enclosing context, `None` for the root.
    pub fn parent(&self) -> Option<ContextId> {
        self.parent
    }

    /// Contexts created by registrations nested in this one, in order.
    pub fn children(&self) -> &[ContextId] {
        &self.children
    }

    /// Names of plugins that finished loading against this context.
    pub fn plugins(&self) -> &[String] {
        &self.plugins
    }

    /// Decorations of the `T` family declared directly on this context.
    pub fn decorations<T: Target>(&self) -> &Decorations<T> {
        T::decorations(self)
    }
}

/// Arena of contexts.
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    /// A tree holding only the root context.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::default()],
        }
    }

    /// Number of contexts in the tree.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// A tree always holds at least the root.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// The node for `id`.
    ///
    /// # Panics
    ///
    /// Context ids are only handed out by the tree that owns them, so an
    /// unknown id is a programming error.
    pub fn node(&self, id: ContextId) -> &Node {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: ContextId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    /// Allocate a child context under `parent`.
    pub fn create(&mut self, parent: ContextId) -> ContextId {
        let id = ContextId(self.nodes.len());
        self.nodes.push(Node {
            parent: Some(parent),
            ..Node::default()
        });
        self.node_mut(parent).children.push(id);
        id
    }

    /// Iterate `id` and its ancestors, nearest first.
    pub fn chain(&self, id: ContextId) -> Chain<'_> {
        Chain {
            tree: self,
            next: Some(id),
        }
    }

    /// The nearest decoration named `name` for the `T` family.
    pub fn resolve<T: Target>(&self, id: ContextId, name: &str) -> Option<&Decoration<T>> {
        self.chain(id)
            .find_map(|(_, node)| node.decorations::<T>().get(name))
    }

    /// Whether `name` resolves for the `T` family from `id`.
    pub fn contains<T: Target>(&self, id: ContextId, name: &str) -> bool {
        self.resolve::<T>(id, name).is_some()
    }

    /// Every name visible from `id` for the `T` family, nearest first, each
    /// once.
    pub fn names<T: Target>(&self, id: ContextId) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut names = Vec::new();
        for (_, node) in self.chain(id) {
            for name in node.decorations::<T>().keys() {
                if seen.insert(name.as_str()) {
                    names.push(name.clone());
                }
            }
        }
        names
    }

    /// Record a decoration on `id` itself. Returns the displaced entry when
    /// the name was already declared on this very context.
    pub(crate) fn insert<T: Target>(
        &mut self,
        id: ContextId,
        decoration: Decoration<T>,
    ) -> Option<Decoration<T>> {
        T::decorations_mut(self.node_mut(id)).insert(decoration.name().to_owned(), decoration)
    }

    /// Record that plugin `name` finished loading against `id`.
    pub(crate) fn record_plugin(&mut self, id: ContextId, name: &str) {
        self.node_mut(id).plugins.push(name.to_owned());
    }

    /// Whether a plugin named `name` loaded anywhere on the chain of `id`.
    pub fn has_plugin(&self, id: ContextId, name: &str) -> bool {
        self.chain(id)
            .any(|(_, node)| node.plugins.iter().any(|plugin| plugin == name))
    }
}

/// Iterator over a context and its ancestors.
pub struct Chain<'a> {
    tree: &'a Tree,
    next: Option<ContextId>,
}

impl<'a> Iterator for Chain<'a> {
    type Item = (ContextId, &'a Node);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        let node = self.tree.node(id);
        self.next = node.parent;
        Some((id, node))
    }
}
