//! Tagged references for values on the execution stack.
//!
//! Every value the dispatch loop moves through a frame's slots is a
//! [`StackRef`]. A stack reference either owns a counted claim on its object
//! (`Owning`) or is `Deferred`: the object is immortal or enrolled in deferred
//! reclamation, so the reference may be copied and dropped without touching the
//! object's count. Under free-threading that keeps the hottest objects (`None`,
//! booleans, functions and code units) free of cross-thread count traffic.
//!
//! # Discipline
//!
//! Stack references follow a strict linear discipline:
//!
//! - Conversions **in**: [`StackRef::from_owned`] (steal), [`StackRef::from_borrowed`]
//!   (new reference), [`StackRef::from_immortal`].
//! - Conversions **out**: [`StackRef::into_owned`] (steal), [`StackRef::to_owned_new`]
//!   (new reference), [`StackRef::as_borrowed`] (borrow, discouraged beyond inspection).
//! - [`StackRef::duplicate`] creates a second reference, [`StackRef::release`]
//!   destroys one.
//!
//! `StackRef` is neither `Clone` nor `Copy`, so the type checker rejects
//! accidental duplication; every reference is consumed exactly once.
//!
//! It is unsafe to borrow a stack reference and then perform plain count
//! operations on the borrowed object: a `Deferred` reference does not own the
//! count the caller would be giving back.

use core_types::{ObjectId, ObjectLifetime, RuntimeResult};

use crate::ObjectHeap;

/// Ownership discriminant of a [`StackRef`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefTag {
    /// Holds a real, counted claim
    Owning,
    /// Needs no per-operation counting
    Deferred,
}

/// A stack-resident reference to a managed object.
///
/// In global-lock mode the `Deferred` tag is reserved for [`StackRef::NULL`];
/// every non-null reference is `Owning`.
#[must_use = "stack references must be released or converted"]
#[derive(Debug, PartialEq, Eq, Hash)]
pub enum StackRef {
    /// Counted reference
    Owning(ObjectId),
    /// Uncounted reference to an immortal or deferred-enrolled object, or null
    Deferred(Option<ObjectId>),
}

impl Default for StackRef {
    fn default() -> Self {
        StackRef::NULL
    }
}

impl StackRef {
    /// The canonical null reference.
    pub const NULL: StackRef = StackRef::Deferred(None);

    /// Converts a reference the caller owns, stealing it.
    ///
    /// Under free-threading a null or immortal object is tagged `Deferred`; the
    /// incoming claim is simply discharged since such objects keep no count.
    /// Otherwise ownership moves into an `Owning` reference with no count
    /// change.
    pub fn from_owned<L>(rt: &L, obj: Option<ObjectId>) -> StackRef
    where
        L: ObjectLifetime + ?Sized,
    {
        match obj {
            None => StackRef::NULL,
            Some(obj) if rt.mode().is_free_threading() && rt.is_immortal(obj) => {
                StackRef::Deferred(Some(obj))
            }
            Some(obj) => StackRef::Owning(obj),
        }
    }

    /// Creates a new reference to a borrowed object.
    ///
    /// The count is always incremented first. Under free-threading an
    /// immortal or deferred-enrolled object is then tagged `Deferred`; the
    /// increment is redundant on that path and is left in place rather than
    /// special-cased.
    pub fn from_borrowed<L>(rt: &L, obj: ObjectId) -> StackRef
    where
        L: ObjectLifetime + ?Sized,
    {
        rt.incref(obj);
        if rt.mode().is_free_threading()
            && (rt.is_immortal(obj) || rt.has_deferred_refcount(obj))
        {
            StackRef::Deferred(Some(obj))
        } else {
            StackRef::Owning(obj)
        }
    }

    /// Wraps an immortal object without touching its count.
    ///
    /// # Panics
    ///
    /// Debug builds panic if `obj` is not immortal.
    pub fn from_immortal<L>(rt: &L, obj: ObjectId) -> StackRef
    where
        L: ObjectLifetime + ?Sized,
    {
        debug_assert!(rt.is_immortal(obj), "{obj} is not immortal");
        if rt.mode().is_free_threading() {
            StackRef::Deferred(Some(obj))
        } else {
            StackRef::Owning(obj)
        }
    }

    /// Reference to the `None` singleton.
    pub fn none(heap: &ObjectHeap) -> StackRef {
        Self::from_immortal(heap, heap.none())
    }

    /// Reference to the `True` singleton.
    pub fn true_object(heap: &ObjectHeap) -> StackRef {
        Self::from_immortal(heap, heap.true_object())
    }

    /// Reference to the `False` singleton.
    pub fn false_object(heap: &ObjectHeap) -> StackRef {
        Self::from_immortal(heap, heap.false_object())
    }

    /// Returns true for the null reference.
    pub fn is_null(&self) -> bool {
        *self == StackRef::NULL
    }

    /// Returns true if this reference carries no counted claim.
    pub fn is_deferred(&self) -> bool {
        matches!(self, StackRef::Deferred(_))
    }

    /// Ownership tag.
    pub fn tag(&self) -> RefTag {
        match self {
            StackRef::Owning(_) => RefTag::Owning,
            StackRef::Deferred(_) => RefTag::Deferred,
        }
    }

    /// Identity comparison: same object and same tag.
    pub fn is(&self, other: &StackRef) -> bool {
        self == other
    }

    /// The referenced object, without any ownership change.
    pub fn as_borrowed(&self) -> Option<ObjectId> {
        match *self {
            StackRef::Owning(obj) => Some(obj),
            StackRef::Deferred(obj) => obj,
        }
    }

    /// Converts into an owned object reference, consuming `self`.
    ///
    /// A non-null `Deferred` reference performs a real increment first: the
    /// deferred bookkeeping does not account for references leaving the stack.
    pub fn into_owned<L>(self, rt: &L) -> Option<ObjectId>
    where
        L: ObjectLifetime + ?Sized,
    {
        match self {
            StackRef::Owning(obj) => Some(obj),
            StackRef::Deferred(Some(obj)) => {
                rt.incref(obj);
                Some(obj)
            }
            StackRef::Deferred(None) => None,
        }
    }

    /// Produces a new owned object reference; `self` stays valid.
    pub fn to_owned_new<L>(&self, rt: &L) -> Option<ObjectId>
    where
        L: ObjectLifetime + ?Sized,
    {
        let obj = self.as_borrowed()?;
        rt.incref(obj);
        Some(obj)
    }

    /// Creates a second, independent reference with the same tag.
    pub fn duplicate<L>(&self, rt: &L) -> StackRef
    where
        L: ObjectLifetime + ?Sized,
    {
        match *self {
            StackRef::Deferred(obj) => {
                debug_assert!(
                    obj.map_or(true, |obj| rt.is_immortal(obj) || rt.has_deferred_refcount(obj)),
                    "deferred reference to a counted object"
                );
                StackRef::Deferred(obj)
            }
            StackRef::Owning(obj) => {
                rt.incref(obj);
                StackRef::Owning(obj)
            }
        }
    }

    /// Destroys this reference.
    ///
    /// Releasing an `Owning` reference may destroy the object and run
    /// arbitrary finalizers; errors raised by that cleanup are returned.
    pub fn release<L>(self, rt: &L) -> RuntimeResult<()>
    where
        L: ObjectLifetime + ?Sized,
    {
        match self {
            StackRef::Deferred(_) => Ok(()),
            StackRef::Owning(obj) => rt.decref(obj),
        }
    }

    /// Nulls `slot`, then releases its previous value.
    ///
    /// The slot is emptied before the release so code run by a finalizer never
    /// sees a half-released value in it.
    pub fn clear<L>(slot: &mut StackRef, rt: &L) -> RuntimeResult<()>
    where
        L: ObjectLifetime + ?Sized,
    {
        let old = std::mem::take(slot);
        old.release(rt)
    }
}

/// Borrowed view of a run of stack references, for calls into APIs that take
/// plain object arrays.
pub fn borrow_all(refs: &[StackRef]) -> Vec<Option<ObjectId>> {
    refs.iter().map(StackRef::as_borrowed).collect()
}
