//! Decorations and the payloads they carry.
//!
//! A [`Decoration`] is a named capability added to one of three object
//! families ([`TargetKind`]): the application instance, the per-call request
//! or the per-call reply. It carries either a shared [`Payload`] or an
//! [`Accessor`] that computes a payload every time it is read.
//!
//! ```text
//! Decorator<T>
//!   ├── Value(Payload)         → shared by reference with every reader
//!   └── Accessor(Accessor<T>)  → getter(&T) evaluated on every read
//! ```

use std::{any::Any, fmt, sync::Arc};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{Instance, Reply, Request, tree::Node};

/// A type-erased value shared by reference.
///
/// Cloning a payload aliases the same allocation; [`Payload::ptr_eq`] tells
/// whether two payloads are the same value.
#[derive(Clone)]
pub struct Payload(Arc<dyn Any + Send + Sync>);

impl Payload {
    /// Wrap a value.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Wrap an already shared value without copying it.
    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self(value)
    }

    /// The payload as a `T`, if that is what it holds.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.0.clone().downcast::<T>().ok()
    }

    /// Borrow the payload as a `T`, if that is what it holds.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Whether this payload holds a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.0.is::<T>()
    }

    /// Whether both payloads alias the same value.
    pub fn ptr_eq(&self, other: &Payload) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Payload(..)")
    }
}

type Getter<T> = Arc<dyn Fn(&T) -> Payload + Send + Sync>;
type Setter<T> = Arc<dyn Fn(&T, Payload) + Send + Sync>;

/// A computed property: a getter evaluated against the concrete object it is
/// read through, and an optional setter.
///
/// Accessors never cache. Every read calls the getter again.
pub struct Accessor<T: ?Sized> {
    getter: Getter<T>,
    setter: Option<Setter<T>>,
}

impl<T: ?Sized> Accessor<T> {
    /// An accessor with only a getter.
    pub fn getter<F>(getter: F) -> Self
    where
        F: Fn(&T) -> Payload + Send + Sync + 'static,
    {
        Self {
            getter: Arc::new(getter),
            setter: None,
        }
    }

    /// Attach a setter.
    pub fn with_setter<F>(mut self, setter: F) -> Self
    where
        F: Fn(&T, Payload) + Send + Sync + 'static,
    {
        self.setter = Some(Arc::new(setter));
        self
    }

    /// Evaluate the getter against `target`.
    pub fn get(&self, target: &T) -> Payload {
        (self.getter)(target)
    }

    /// Run the setter against `target`. Returns `false` when there is no setter.
    pub fn set(&self, target: &T, value: Payload) -> bool {
        match &self.setter {
            Some(setter) => {
                setter(target, value);
                true
            }
            None => false,
        }
    }

    /// Whether a setter is attached.
    pub fn is_writable(&self) -> bool {
        self.setter.is_some()
    }
}

impl<T: ?Sized> Clone for Accessor<T> {
    fn clone(&self) -> Self {
        Self {
            getter: self.getter.clone(),
            setter: self.setter.clone(),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Accessor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accessor")
            .field("writable", &self.is_writable())
            .finish()
    }
}

/// What a decoration stores: a shared value or a computed accessor.
pub enum Decorator<T: ?Sized> {
    /// A fixed payload, aliased by every lookup.
    Value(Payload),
    /// A getter (and optional setter) evaluated on every access.
    Accessor(Accessor<T>),
}

impl<T: ?Sized> Decorator<T> {
    /// A value decorator.
    pub fn value<V: Any + Send + Sync>(value: V) -> Self {
        Decorator::Value(Payload::new(value))
    }

    /// A getter-only accessor decorator.
    pub fn getter<F>(getter: F) -> Self
    where
        F: Fn(&T) -> Payload + Send + Sync + 'static,
    {
        Decorator::Accessor(Accessor::getter(getter))
    }

    /// The kind of this decorator.
    pub fn kind(&self) -> Kind {
        match self {
            Decorator::Value(_) => Kind::Value,
            Decorator::Accessor(_) => Kind::Accessor,
        }
    }

    /// Read the decorator through `target`: values are aliased, accessors
    /// are evaluated.
    pub fn read(&self, target: &T) -> Payload {
        match self {
            Decorator::Value(payload) => payload.clone(),
            Decorator::Accessor(accessor) => accessor.get(target),
        }
    }
}

impl<T: ?Sized> Clone for Decorator<T> {
    fn clone(&self) -> Self {
        match self {
            Decorator::Value(payload) => Decorator::Value(payload.clone()),
            Decorator::Accessor(accessor) => Decorator::Accessor(accessor.clone()),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Decorator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decorator::Value(payload) => f.debug_tuple("Value").field(payload).finish(),
            Decorator::Accessor(accessor) => f.debug_tuple("Accessor").field(accessor).finish(),
        }
    }
}

impl<T: ?Sized> From<Payload> for Decorator<T> {
    fn from(payload: Payload) -> Self {
        Decorator::Value(payload)
    }
}

impl<T: ?Sized> From<Accessor<T>> for Decorator<T> {
    fn from(accessor: Accessor<T>) -> Self {
        Decorator::Accessor(accessor)
    }
}

/// Whether a decoration is a stored value or a computed accessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    /// A fixed payload
    Value,
    /// A getter/setter pair
    Accessor,
}

/// The object family a decoration extends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// The application instance
    Instance,
    /// Per-call request values
    Request,
    /// Per-call reply values
    Reply,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TargetKind::Instance => "Instance",
            TargetKind::Request => "Request",
            TargetKind::Reply => "Reply",
        })
    }
}

/// A named decorator declared on one context.
pub struct Decoration<T: ?Sized> {
    name: String,
    decorator: Decorator<T>,
    dependencies: Vec<String>,
}

impl<T: ?Sized> Decoration<T> {
    pub(crate) fn new(name: String, decorator: Decorator<T>, dependencies: Vec<String>) -> Self {
        Self {
            name,
            decorator,
            dependencies,
        }
    }

    /// Decorator name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value or accessor
    pub fn kind(&self) -> Kind {
        self.decorator.kind()
    }

    /// The names that had to resolve when this decoration was declared
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// The stored decorator
    pub fn decorator(&self) -> &Decorator<T> {
        &self.decorator
    }
}

impl<T: Target> Decoration<T> {
    /// The object family this decoration extends
    pub fn target(&self) -> TargetKind {
        T::KIND
    }
}

impl<T: ?Sized> Clone for Decoration<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            decorator: self.decorator.clone(),
            dependencies: self.dependencies.clone(),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Decoration<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decoration")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

/// Decorations declared directly on one context for one target kind, in
/// declaration order.
pub type Decorations<T> = IndexMap<String, Decoration<T>>;

/// An object family that can be decorated.
///
/// Selects the per-context map that holds decorations for the family, so
/// registry operations can be written once for all three kinds.
pub trait Target: Sized + 'static {
    /// The kind tag of this family.
    const KIND: TargetKind;

    /// Decorations of this family declared on `node`.
    fn decorations(node: &Node) -> &Decorations<Self>;

    /// Mutable access to the decorations of this family declared on `node`.
    fn decorations_mut(node: &mut Node) -> &mut Decorations<Self>;
}

impl Target for Instance {
    const KIND: TargetKind = TargetKind::Instance;

    fn decorations(node: &Node) -> &Decorations<Self> {
        &node.instance
    }

    fn decorations_mut(node: &mut Node) -> &mut Decorations<Self> {
        &mut node.instance
    }
}

impl Target for Request {
    const KIND: TargetKind = TargetKind::Request;

    fn decorations(node: &Node) -> &Decorations<Self> {
        &node.request
    }

    fn decorations_mut(node: &mut Node) -> &mut Decorations<Self> {
        &mut node.request
    }
}

impl Target for Reply {
    const KIND: TargetKind = TargetKind::Reply;

    fn decorations(node: &Node) -> &Decorations<Self> {
        &node.reply
    }

    fn decorations_mut(node: &mut Node) -> &mut Decorations<Self> {
        &mut node.reply
    }
}
