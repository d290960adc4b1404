//! The decoration registry of one application.
//!
//! While the application is constructing, the tree lives behind a write lock
//! and every `decorate*` call validates and inserts under that lock. Starting
//! the application freezes the tree: the lifecycle guard flips to `ready`
//! under the same lock and an immutable snapshot is published, after which
//! lookups and materialization read the snapshot without locking.

use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use tracing::debug;

use crate::{
    ContextId, DecorateError, Decoration, Decorator, Lifecycle, LifecycleError, Phase, Target,
    Tree, dependency,
};

/// Decorations of every context of one application, gated by its lifecycle.
#[derive(Debug)]
pub struct Registry {
    lifecycle: Lifecycle,
    building: RwLock<Tree>,
    frozen: OnceLock<Arc<Tree>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// An empty registry holding only the root context.
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::new(),
            building: RwLock::new(Tree::new()),
            frozen: OnceLock::new(),
        }
    }

    /// The lifecycle guard shared by the whole tree.
    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Allocate a child context of `parent`.
    pub fn create_context(&self, parent: ContextId) -> ContextId {
        self.building.write().create(parent)
    }

    /// Declare `name` on `context` for the `T` family.
    ///
    /// Fails when the application has started, when `context` itself already
    /// declares `name`, or when a dependency does not resolve. Nothing is
    /// recorded unless every check passes.
    pub fn decorate<T: Target>(
        &self,
        context: ContextId,
        name: &str,
        decorator: Decorator<T>,
        dependencies: Vec<String>,
    ) -> Result<(), DecorateError> {
        let mut tree = self.building.write();

        if !self.lifecycle.is_constructing() {
            return Err(DecorateError::AfterStart { name: name.into() });
        }
        if tree.node(context).decorations::<T>().contains_key(name) {
            return Err(DecorateError::AlreadyPresent {
                name: name.into(),
                target: T::KIND,
            });
        }
        dependency::check::<T>(&tree, context, &dependencies)?;

        debug!(
            %context,
            target = %T::KIND,
            name,
            kind = ?decorator.kind(),
            "decorated"
        );
        tree.insert(context, Decoration::new(name.into(), decorator, dependencies));
        Ok(())
    }

    /// The nearest declaration of `name` visible from `context`, cloned so
    /// that accessors can be evaluated without holding any lock.
    pub fn resolve<T: Target>(&self, context: ContextId, name: &str) -> Option<Decoration<T>> {
        self.read(|tree| tree.resolve::<T>(context, name).cloned())
    }

    /// Whether `name` resolves from `context` for the `T` family.
    pub fn contains<T: Target>(&self, context: ContextId, name: &str) -> bool {
        self.read(|tree| tree.contains::<T>(context, name))
    }

    /// Every name visible from `context` for the `T` family.
    pub fn names<T: Target>(&self, context: ContextId) -> Vec<String> {
        self.read(|tree| tree.names::<T>(context))
    }

    /// Whether a plugin named `name` loaded on the chain of `context`.
    pub fn has_plugin(&self, context: ContextId, name: &str) -> bool {
        self.read(|tree| tree.has_plugin(context, name))
    }

    pub(crate) fn record_plugin(&self, context: ContextId, name: &str) {
        self.building.write().record_plugin(context, name);
    }

    /// Run `read` against the frozen snapshot when there is one, or against
    /// the tree under construction otherwise.
    pub fn read<R>(&self, read: impl FnOnce(&Tree) -> R) -> R {
        match self.frozen.get() {
            Some(tree) => read(tree),
            None => read(&*self.building.read()),
        }
    }

    /// Flip the lifecycle to `ready` and publish the frozen tree. Holding the
    /// write lock across both steps guarantees no decoration lands after the
    /// snapshot was taken.
    pub fn freeze(&self) -> Result<Arc<Tree>, LifecycleError> {
        let tree = self.building.write();
        self.lifecycle.advance(Phase::Ready)?;
        let frozen = self.frozen.get_or_init(|| Arc::new((*tree).clone()));
        Ok(frozen.clone())
    }

    /// The frozen tree, once the application has started.
    pub fn frozen(&self) -> Option<Arc<Tree>> {
        self.frozen.get().cloned()
    }
}
