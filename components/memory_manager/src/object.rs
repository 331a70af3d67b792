//! Heap object kinds and payloads
//!
//! The heap itself only knows counts, owned child references and an optional
//! payload. Higher layers (code units, frame wrappers) attach their state as a
//! payload and describe its outgoing edges and teardown through [`HeapPayload`].

use std::any::Any;
use std::ops::ControlFlow;

use core_types::{ObjectId, RuntimeResult};

use crate::gc::VisitResult;
use crate::ObjectHeap;

/// Coarse classification of a heap object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// Interpreter-wide singleton (`None`, `True`, `False`)
    Singleton,
    /// Executable code unit
    Code,
    /// Function object defined in the language
    Function,
    /// Function implemented natively
    BuiltinFunction,
    /// Method descriptor of a native type
    MethodDescriptor,
    /// Name-to-value mapping (locals, globals)
    Mapping,
    /// Heap-visible wrapper around an execution frame
    FrameObject,
    /// Any other object
    Generic,
}

impl ObjectKind {
    /// Human-readable name, used in diagnostics and allocation errors.
    pub fn name(self) -> &'static str {
        match self {
            ObjectKind::Singleton => "singleton",
            ObjectKind::Code => "code object",
            ObjectKind::Function => "function",
            ObjectKind::BuiltinFunction => "builtin function",
            ObjectKind::MethodDescriptor => "method descriptor",
            ObjectKind::Mapping => "mapping",
            ObjectKind::FrameObject => "frame object",
            ObjectKind::Generic => "object",
        }
    }
}

/// State attached to a heap object.
///
/// `traverse` must report every reference the payload owns, and `dealloc`
/// must release exactly those references. The heap calls `dealloc` once, after
/// the object's count reached zero and its finalizer ran, without holding any
/// of its internal locks.
pub trait HeapPayload: Any + Send {
    /// Visits every object this payload owns a reference to.
    fn traverse(&self, _visit: &mut dyn FnMut(ObjectId) -> VisitResult) -> VisitResult {
        ControlFlow::Continue(())
    }

    /// Releases the references owned by this payload.
    fn dealloc(self: Box<Self>, _heap: &ObjectHeap) -> RuntimeResult<()> {
        Ok(())
    }

    /// Downcasting support for [`ObjectHeap::with_payload`].
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Code run when an object is destroyed, before its references are released.
///
/// Finalizers may execute arbitrary runtime code, including further count
/// operations on the same heap.
pub type Finalizer = Box<dyn FnOnce(&ObjectHeap, ObjectId) -> RuntimeResult<()> + Send>;
