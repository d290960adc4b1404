//! Shared interior mutability.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Shared interior mutability cell used for per-call state that many readers
/// may observe while a single writer occasionally updates it.
///
/// Unlike `std::sync::RwLock` the cell never poisons, so readers and writers
/// do not need to handle a failed acquisition.
///
/// # Example
/// ```
/// use trellis_common::SharedCell;
///
/// let cell = SharedCell::new(42);
///
/// // Reading
/// {
///     let value = cell.read();
///     assert_eq!(*value, 42);
/// }
///
/// // Writing
/// {
///     let mut value = cell.write();
///     *value = 100;
/// }
///
/// assert_eq!(*cell.read(), 100);
/// ```
#[derive(Debug, Default)]
pub struct SharedCell<T>(RwLock<T>);

impl<T> SharedCell<T> {
    /// Creates a new SharedCell with the given value
    pub fn new(value: T) -> Self {
        Self(RwLock::new(value))
    }

    /// Acquires a read guard, blocking until it can be acquired
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.0.read()
    }

    /// Acquires a write guard, blocking until it can be acquired
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.0.write()
    }

    /// Replaces the inner value, returning the previous one
    pub fn replace(&self, value: T) -> T {
        std::mem::replace(&mut *self.0.write(), value)
    }
}

#[cfg(test)]
mod tests {
    use super::SharedCell;

    #[test]
    fn it_replaces_the_value() {
        let cell = SharedCell::new(String::from("before"));
        let previous = cell.replace(String::from("after"));

        assert_eq!(previous, "before");
        assert_eq!(*cell.read(), "after");
    }
}
