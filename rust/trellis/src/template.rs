//! Materialization of per-call request and reply values.
//!
//! A [`Template`] is nothing more than a frozen tree and the context that
//! owns a route. Materializing a [`Request`] or [`Reply`] from it is O(1):
//! the value keeps the tree and context, plus a map of its own per-call
//! properties. Reads check the own properties first and then walk the
//! chain, aliasing stored values and evaluating accessors against the
//! concrete value being read. The tree is never mutated.

use std::{any::Any, collections::HashMap, sync::Arc};

use trellis_common::SharedCell;

use crate::{ContextId, DecorateError, Decorator, Payload, Target, Tree};

/// The shape of request and reply values for routes owned by one context.
#[derive(Debug, Clone)]
pub struct Template {
    tree: Arc<Tree>,
    context: ContextId,
}

impl Template {
    /// The template of `context` in a frozen `tree`.
    pub fn new(tree: Arc<Tree>, context: ContextId) -> Self {
        Self { tree, context }
    }

    /// The owning context.
    pub fn context(&self) -> ContextId {
        self.context
    }

    /// Materialize a request for `path`.
    pub fn request(&self, path: impl Into<String>) -> Request {
        Request {
            path: path.into(),
            object: Object::new(self),
        }
    }

    /// Materialize an empty reply.
    pub fn reply(&self) -> Reply {
        Reply {
            body: SharedCell::new(None),
            object: Object::new(self),
        }
    }

    /// Whether a request decorator named `name` is part of this template.
    pub fn has_request_decorator(&self, name: &str) -> bool {
        self.tree.contains::<Request>(self.context, name)
    }

    /// Whether a reply decorator named `name` is part of this template.
    pub fn has_reply_decorator(&self, name: &str) -> bool {
        self.tree.contains::<Reply>(self.context, name)
    }
}

/// State shared by materialized requests and replies.
#[derive(Debug)]
struct Object {
    tree: Arc<Tree>,
    context: ContextId,
    own: SharedCell<HashMap<String, Payload>>,
}

impl Object {
    fn new(template: &Template) -> Self {
        Self {
            tree: template.tree.clone(),
            context: template.context,
            own: SharedCell::new(HashMap::new()),
        }
    }

    fn decorator<T: Target>(&self, name: &str) -> Option<&Decorator<T>> {
        self.tree
            .resolve::<T>(self.context, name)
            .map(|decoration| decoration.decorator())
    }

    fn payload<T: Target>(&self, target: &T, name: &str) -> Option<Payload> {
        if let Some(payload) = self.own.read().get(name) {
            return Some(payload.clone());
        }
        self.decorator::<T>(name)
            .map(|decorator| decorator.read(target))
    }

    fn set<T: Target>(&self, target: &T, name: &str, value: Payload) -> Result<(), DecorateError> {
        match self.decorator::<T>(name) {
            Some(Decorator::Accessor(accessor)) => {
                if accessor.set(target, value) {
                    Ok(())
                } else {
                    Err(DecorateError::ReadOnly { name: name.into() })
                }
            }
            _ => {
                self.own.write().insert(name.into(), value);
                Ok(())
            }
        }
    }

    fn has<T: Target>(&self, name: &str) -> bool {
        self.own.read().contains_key(name) || self.tree.contains::<T>(self.context, name)
    }

    fn names<T: Target>(&self) -> Vec<String> {
        let mut names = self.tree.names::<T>(self.context);
        for name in self.own.read().keys() {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }
}

macro_rules! materialized {
    ($target:ty) => {
        impl $target {
            /// The context whose template this value was materialized from.
            pub fn context(&self) -> ContextId {
                self.object.context
            }

            /// Read `name`: an own property, else the nearest decoration on
            /// the chain. Accessors are evaluated against `self`.
            pub fn payload(&self, name: &str) -> Option<Payload> {
                self.object.payload(self, name)
            }

            /// Read `name` as a `T`.
            pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
                self.payload(name)?.downcast::<T>()
            }

            /// Write `name`. Accessors run their setter (failing when there
            /// is none); anything else becomes an own property of this value
            /// only, shadowing the template.
            pub fn set(&self, name: &str, value: Payload) -> Result<(), DecorateError> {
                self.object.set(self, name, value)
            }

            /// Whether `name` is readable on this value.
            pub fn has(&self, name: &str) -> bool {
                self.object.has::<Self>(name)
            }

            /// Every readable name, nearest declaration first, then own
            /// properties.
            pub fn names(&self) -> Vec<String> {
                self.object.names::<Self>()
            }
        }
    };
}

/// A request value materialized for one call.
#[derive(Debug)]
pub struct Request {
    path: String,
    object: Object,
}

impl Request {
    /// The requested path.
    pub fn path(&self) -> &str {
        &self.path
    }
}

materialized!(Request);

/// A reply value materialized for one call.
#[derive(Debug)]
pub struct Reply {
    body: SharedCell<Option<Payload>>,
    object: Object,
}

impl Reply {
    /// Set the response body.
    pub fn send(&self, body: Payload) {
        self.body.replace(Some(body));
    }

    /// The response body, if one was sent.
    pub fn body(&self) -> Option<Payload> {
        self.body.read().clone()
    }
}

materialized!(Reply);
