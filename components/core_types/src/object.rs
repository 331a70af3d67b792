//! Object identity and the object-lifetime capability.

use std::fmt;

use crate::{ExecutionMode, RuntimeResult};

/// Identity of a managed object.
///
/// Objects are addressed by index into the heap's object table; an id stays
/// valid (and is never reused) for the lifetime of the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u32);

impl ObjectId {
    /// Creates an id from a raw table index.
    pub const fn from_index(index: u32) -> Self {
        ObjectId(index)
    }

    /// Returns the raw table index.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj#{}", self.0)
    }
}

/// Reference-counting primitives supplied by the object runtime.
///
/// The reference and frame layers never touch counts through globals; every
/// operation that may change a count receives an implementation of this trait.
/// That keeps the substrate independent of a particular heap and lets tests
/// substitute a recording provider.
pub trait ObjectLifetime {
    /// Execution mode the provider was configured with.
    fn mode(&self) -> ExecutionMode;

    /// Adds one counted reference.
    fn incref(&self, obj: ObjectId);

    /// Drops one counted reference.
    ///
    /// Reaching zero destroys the object, which runs its finalizer and
    /// releases everything it owns. Errors raised by that cleanup are returned.
    fn decref(&self, obj: ObjectId) -> RuntimeResult<()>;

    /// Returns true for objects exempt from counting and destruction.
    fn is_immortal(&self, obj: ObjectId) -> bool;

    /// Returns true for objects enrolled in deferred reclamation.
    fn has_deferred_refcount(&self, obj: ObjectId) -> bool;

    /// Current count of `obj`.
    fn refcount(&self, obj: ObjectId) -> usize;
}
