//! Decoration-time dependency validation.
//!
//! A dependency is satisfied when the name resolves on the declaring
//! context's chain for the same target kind. Siblings never satisfy each
//! other's dependencies; only ancestors (and the context itself) do.

use crate::{ContextId, DecorateError, Target, Tree};

/// Check that every entry of `dependencies` resolves from `context` for the
/// `T` family, reporting the first one that does not.
pub fn check<T: Target>(
    tree: &Tree,
    context: ContextId,
    dependencies: &[String],
) -> Result<(), DecorateError> {
    match dependencies
        .iter()
        .find(|name| !tree.contains::<T>(context, name))
    {
        Some(missing) => Err(DecorateError::MissingDependency {
            name: missing.clone(),
            target: T::KIND,
        }),
        None => Ok(()),
    }
}
