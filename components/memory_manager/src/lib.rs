//! Memory Manager - tagged stack references and the object heap
//!
//! This component provides:
//! - `StackRef`, the tagged reference used for every value on the execution stack
//! - `ObjectHeap`, the reference lifetime provider: allocation, counts,
//!   immortal singletons, deferred-reclamation enrollment, finalizers and
//!   garbage-collector tracking
//! - The traversal contract the cycle collector drives

pub mod gc;
pub mod heap;
pub mod object;
pub mod stackref;

// Re-export main types
pub use gc::{collect_edges, visit_object, visit_ref, VisitResult};
pub use heap::{HeapStats, ObjectHeap, IMMORTAL_REFCOUNT};
pub use object::{Finalizer, HeapPayload, ObjectKind};
pub use stackref::{borrow_all, RefTag, StackRef};
