//! Traversal contract for the cycle collector.
//!
//! The collector itself lives outside this crate. It drives traversal by
//! handing a visit callback to anything that owns references; the callback is
//! invoked once per owned edge and may stop the walk early by returning
//! `ControlFlow::Break`. Visitors must not mutate the object graph.

use std::ops::ControlFlow;

use core_types::ObjectId;

use crate::StackRef;

/// Result of a single visit; `Break` aborts the traversal.
pub type VisitResult = ControlFlow<()>;

/// Visits `obj` if present.
pub fn visit_object(
    obj: Option<ObjectId>,
    visit: &mut dyn FnMut(ObjectId) -> VisitResult,
) -> VisitResult {
    match obj {
        Some(obj) => visit(obj),
        None => ControlFlow::Continue(()),
    }
}

/// Visits the object behind a stack reference; null references are skipped.
pub fn visit_ref(
    stackref: &StackRef,
    visit: &mut dyn FnMut(ObjectId) -> VisitResult,
) -> VisitResult {
    visit_object(stackref.as_borrowed(), visit)
}

/// Runs `traverse` with a visitor that records every edge in visit order.
///
/// ```
/// use memory_manager::{collect_edges, visit_object};
/// use core_types::ObjectId;
///
/// let a = ObjectId::from_index(1);
/// let edges = collect_edges(|visit| {
///     visit_object(Some(a), visit)?;
///     visit_object(None, visit)
/// });
/// assert_eq!(edges, vec![a]);
/// ```
pub fn collect_edges<F>(traverse: F) -> Vec<ObjectId>
where
    F: FnOnce(&mut dyn FnMut(ObjectId) -> VisitResult) -> VisitResult,
{
    let mut edges = Vec::new();
    let _ = traverse(&mut |obj| {
        edges.push(obj);
        ControlFlow::Continue(())
    });
    edges
}
