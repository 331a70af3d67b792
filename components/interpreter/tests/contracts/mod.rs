//! Contract tests for the frame runtime API
//!
//! These tests verify ownership accounting across the frame lifecycle:
//! every reference a record owns is reported by traversal and released
//! exactly once, by exactly one terminal path.

use std::collections::HashMap;
use std::sync::Arc;

use core_types::{ObjectId, ObjectLifetime};
use interpreter::{new_function, CodeUnit, FrameOwner, FrameStorage, FrameObject, ThreadState};
use memory_manager::{borrow_all, collect_edges, ObjectHeap, ObjectKind, StackRef};
use parking_lot::Mutex;
use proptest::prelude::*;

fn thread_with_function(nlocals: usize, stacksize: usize) -> (ThreadState, ObjectId) {
    let heap = Arc::new(ObjectHeap::default());
    let code = CodeUnit::new("f", nlocals, stacksize).into_object(&heap).unwrap();
    let func = new_function(&heap, code).unwrap();
    heap.decref(code).unwrap();
    (ThreadState::new(heap), func)
}

/// Contract: three owning slots are each destroyed exactly once, in slot order
#[test]
fn contract_owning_slots_destroyed_once_in_order() {
    let (mut ts, func) = thread_with_function(3, 0);
    let heap = Arc::clone(ts.heap());
    let h = ts.push_frame(func, None, FrameOwner::ThreadOwned);
    let log = Arc::new(Mutex::new(Vec::new()));

    let objs: Vec<ObjectId> = (0..3).map(|_| heap.alloc(ObjectKind::Generic).unwrap()).collect();
    for (slot, &obj) in objs.iter().enumerate() {
        let log = Arc::clone(&log);
        heap.set_finalizer(obj, move |_, id| {
            log.lock().push(id);
            Ok(())
        });
        ts.frame_mut(h)
            .set_local(slot, StackRef::from_owned(&*heap, Some(obj)), &*heap)
            .unwrap();
    }

    ts.exit_frame(h).unwrap();
    assert_eq!(*log.lock(), objs);
    for obj in objs {
        assert_eq!(heap.times_destroyed(obj), 1);
    }
}

/// Contract: clearing a cleared record is a no-op
#[test]
fn contract_clear_is_idempotent() {
    let (mut ts, func) = thread_with_function(1, 0);
    let heap = Arc::clone(ts.heap());
    let h = ts.push_frame(func, None, FrameOwner::ThreadOwned);
    ts.unlink(h);
    ts.clear_except_executable(h).unwrap();
    let stats = heap.stats();
    ts.clear_except_executable(h).unwrap();
    assert_eq!(heap.stats(), stats);
    ts.pop_frame(h).unwrap();
}

/// Contract: traversal reports wrapper, locals, function, executable, live slots
#[test]
fn contract_traversal_set() {
    let (mut ts, func) = thread_with_function(2, 2);
    let heap = Arc::clone(ts.heap());
    let mapping = heap.alloc(ObjectKind::Mapping).unwrap();
    let h = ts.push_frame(func, Some(mapping), FrameOwner::ThreadOwned);
    heap.decref(mapping).unwrap();
    let code = ts.frame(h).executable().as_borrowed().unwrap();
    let wrapper = ts.frame_object(h).unwrap();
    let value = heap.alloc(ObjectKind::Generic).unwrap();
    ts.frame_mut(h)
        .set_local(0, StackRef::from_owned(&*heap, Some(value)), &*heap)
        .unwrap();
    ts.frame_mut(h).push(StackRef::false_object(&heap));

    let edges = collect_edges(|visit| ts.traverse_frame(h, visit));
    assert_eq!(edges, vec![wrapper, mapping, func, code, value, heap.false_object()]);
    ts.exit_frame(h).unwrap();
}

/// Contract: promotion moves slot contents unchanged into the wrapper
#[test]
fn contract_promotion_preserves_slots() {
    let (mut ts, func) = thread_with_function(3, 2);
    let heap = Arc::clone(ts.heap());
    let h = ts.push_frame(func, None, FrameOwner::ThreadOwned);
    let a = heap.alloc(ObjectKind::Generic).unwrap();
    let b = heap.alloc(ObjectKind::Generic).unwrap();
    {
        let record = ts.frame_mut(h);
        record.set_local(0, StackRef::from_owned(&*heap, Some(a)), &*heap).unwrap();
        record.set_local(2, StackRef::from_owned(&*heap, Some(b)), &*heap).unwrap();
        record.push(StackRef::none(&heap));
        record.advance(4);
    }
    let before = borrow_all(ts.frame(h).live_slots());
    let tags: Vec<_> = ts.frame(h).live_slots().iter().map(StackRef::tag).collect();
    let wrapper = ts.frame_object(h).unwrap();
    heap.incref(wrapper);
    let counts = (heap.refcount(a), heap.refcount(b));

    ts.unlink(h);
    ts.clear_except_executable(h).unwrap();

    let after = ts
        .with_frame_object_record(wrapper, |record| {
            let tags: Vec<_> = record.live_slots().iter().map(StackRef::tag).collect();
            (borrow_all(record.live_slots()), tags, record.instr_offset())
        })
        .unwrap();
    assert_eq!(after, (before, tags, 4));
    assert_eq!((heap.refcount(a), heap.refcount(b)), counts);

    // The arena keeps only an emptied shell until it is popped.
    let shell = ts.frame(h);
    assert!(shell.is_cleared());
    assert_eq!(shell.capacity(), 0);
    assert!(shell.function().is_null());
    ts.pop_frame(h).unwrap();
    assert_eq!(ts.frame_count(), 0);

    assert_eq!(heap.refcount(wrapper), 1);
    heap.decref(wrapper).unwrap();
    assert_eq!(heap.times_destroyed(a), 1);
    assert_eq!(heap.times_destroyed(b), 1);
}

/// Contract: promoting a child creates the parent's wrapper as its back link
#[test]
fn contract_promotion_links_parent_wrapper() {
    let (mut ts, func) = thread_with_function(0, 1);
    let heap = Arc::clone(ts.heap());
    let parent = ts.push_frame(func, None, FrameOwner::ThreadOwned);
    let child = ts.push_frame(func, None, FrameOwner::ThreadOwned);
    let child_wrapper = ts.frame_object(child).unwrap();
    heap.incref(child_wrapper);
    assert_eq!(ts.frame(parent).frame_object(), None);

    ts.exit_frame(child).unwrap();

    let parent_wrapper = ts.frame(parent).frame_object().unwrap();
    let back = heap.with_payload(child_wrapper, |f: &mut FrameObject| f.back());
    assert_eq!(back, Some(Some(parent_wrapper)));
    let previous = ts.with_frame_object_record(child_wrapper, |r| r.previous());
    assert_eq!(previous, Some(None));
    // Held by the parent record and by the child's back link.
    assert_eq!(heap.refcount(parent_wrapper), 2);

    heap.decref(child_wrapper).unwrap();
    assert_eq!(heap.refcount(parent_wrapper), 1);
    ts.exit_frame(parent).unwrap();
    assert!(!heap.is_alive(parent_wrapper));
}

/// Contract: a wrapper starts out naming the live record
#[test]
fn contract_wrapper_storage_is_live_until_promotion() {
    let (mut ts, func) = thread_with_function(0, 0);
    let heap = Arc::clone(ts.heap());
    let h = ts.push_frame(func, None, FrameOwner::ThreadOwned);
    let wrapper = ts.frame_object(h).unwrap();
    let live = heap.with_payload(wrapper, |f: &mut FrameObject| {
        matches!(f.storage(), FrameStorage::Live(handle) if *handle == h)
    });
    assert_eq!(live, Some(true));
    assert!(!heap.is_tracked(wrapper));
    ts.exit_frame(h).unwrap();
}

#[derive(Debug, Clone)]
enum SlotFill {
    Empty,
    Object(usize),
    Singleton,
}

fn slot_fill() -> impl Strategy<Value = SlotFill> {
    prop_oneof![
        Just(SlotFill::Empty),
        (0usize..4).prop_map(SlotFill::Object),
        Just(SlotFill::Singleton),
    ]
}

proptest! {
    /// Every mortal edge traversal reports loses exactly one count on exit,
    /// and nothing else changes.
    #[test]
    fn prop_traversal_set_equals_release_set(
        locals in prop::collection::vec(slot_fill(), 0..6),
        stack in prop::collection::vec(slot_fill(), 0..4),
        with_mapping in any::<bool>(),
        observed in any::<bool>(),
    ) {
        let (mut ts, func) = thread_with_function(locals.len(), stack.len());
        let heap = Arc::clone(ts.heap());
        let pool: Vec<ObjectId> = (0..4).map(|_| heap.alloc(ObjectKind::Generic).unwrap()).collect();
        let mapping = heap.alloc(ObjectKind::Mapping).unwrap();

        let h = ts.push_frame(func, with_mapping.then_some(mapping), FrameOwner::ThreadOwned);
        let fill = |fill: &SlotFill| match fill {
            SlotFill::Empty => StackRef::NULL,
            SlotFill::Object(i) => StackRef::from_borrowed(&*heap, pool[*i]),
            SlotFill::Singleton => StackRef::none(&heap),
        };
        for (i, f) in locals.iter().enumerate() {
            ts.frame_mut(h).set_local(i, fill(f), &*heap).unwrap();
        }
        for f in &stack {
            ts.frame_mut(h).push(fill(f));
        }
        let wrapper = if observed { Some(ts.frame_object(h).unwrap()) } else { None };

        let mut expected: HashMap<ObjectId, usize> = HashMap::new();
        for edge in collect_edges(|visit| ts.traverse_frame(h, visit)) {
            if !heap.is_immortal(edge) && Some(edge) != wrapper {
                *expected.entry(edge).or_default() += 1;
            }
        }
        let mut watched: Vec<ObjectId> = pool.clone();
        watched.extend([mapping, func, ts.frame(h).executable().as_borrowed().unwrap()]);
        let before: Vec<usize> = watched.iter().map(|&o| heap.refcount(o)).collect();

        // Keep the wrapper observed so the record is promoted, then drop it.
        if let Some(wrapper) = wrapper {
            heap.incref(wrapper);
        }
        ts.exit_frame(h).unwrap();
        if let Some(wrapper) = wrapper {
            heap.decref(wrapper).unwrap();
            prop_assert!(!heap.is_alive(wrapper));
        }

        for (obj, count) in watched.iter().zip(before) {
            let released = expected.get(obj).copied().unwrap_or(0);
            prop_assert_eq!(heap.refcount(*obj), count - released);
        }
    }
}
