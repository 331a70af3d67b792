//! Free-threading integration tests
//!
//! Several threads share one heap, each with its own frame stack.

use std::sync::Arc;
use std::thread;

use core_types::{ExecutionMode, ObjectLifetime, RuntimeConfig};
use integration_tests::{init_tracing, make_function};
use interpreter::{CodeUnit, FrameOwner, ThreadState};
use memory_manager::{ObjectHeap, ObjectKind, RefTag, StackRef};

/// Test: threads sharing objects leave every count where it started
#[test]
fn test_shared_objects_across_threads() {
    init_tracing();
    let heap = Arc::new(ObjectHeap::new(&RuntimeConfig::free_threading()));
    let function = make_function(&heap, CodeUnit::new("worker", 2, 2));
    let shared = heap.alloc(ObjectKind::Generic).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let heap = Arc::clone(&heap);
            thread::spawn(move || {
                let mut ts = ThreadState::new(Arc::clone(&heap));
                for _ in 0..250 {
                    let h = ts.push_frame(function, None, FrameOwner::ThreadOwned);
                    let record = ts.frame_mut(h);
                    record
                        .set_local(0, StackRef::from_borrowed(&*heap, shared), &*heap)
                        .unwrap();
                    record.push(record.local(0).duplicate(&*heap));
                    record.push(StackRef::none(&heap));
                    ts.exit_frame(h).unwrap();
                }
                assert_eq!(ts.frame_count(), 0);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(heap.refcount(shared), 1);
    assert_eq!(heap.refcount(function), 1);
    heap.decref(shared).unwrap();
    assert!(!heap.is_alive(shared));
}

/// Test: a live frame wrapper only resolves on the thread that runs the frame
#[test]
fn test_live_wrapper_resolves_only_on_its_thread() {
    init_tracing();
    let heap = Arc::new(ObjectHeap::new(&RuntimeConfig::free_threading()));
    let function = make_function(&heap, CodeUnit::new("f", 1, 1));
    let mut ts = ThreadState::new(Arc::clone(&heap));
    let outer = ts.push_frame(function, None, FrameOwner::ThreadOwned);
    let inner = ts.push_frame(function, None, FrameOwner::ThreadOwned);
    let wrapper = ts.frame_object(inner).unwrap();
    heap.incref(wrapper);

    let inspect = move |heap: Arc<ObjectHeap>| {
        thread::spawn(move || {
            // Occupy the same arena slots as the owning thread.
            let mut other = ThreadState::new(Arc::clone(&heap));
            let a = other.push_frame(function, None, FrameOwner::ThreadOwned);
            let b = other.push_frame(function, None, FrameOwner::ThreadOwned);
            let seen = other.with_frame_object_record(wrapper, |r| r.owner());
            let back = other.frame_object_back(wrapper).unwrap();
            other.exit_frame(b).unwrap();
            other.exit_frame(a).unwrap();
            (seen, back)
        })
        .join()
        .unwrap()
    };

    assert_eq!(inspect(Arc::clone(&heap)), (None, None));
    assert_eq!(
        ts.with_frame_object_record(wrapper, |r| r.owner()),
        Some(FrameOwner::ThreadOwned)
    );

    // Once promoted the record travels with the wrapper.
    ts.exit_frame(inner).unwrap();
    let outer_wrapper = ts.frame(outer).frame_object();
    assert_eq!(
        inspect(Arc::clone(&heap)),
        (Some(FrameOwner::HeapOwned), outer_wrapper)
    );

    heap.decref(wrapper).unwrap();
    ts.exit_frame(outer).unwrap();
    assert_eq!(heap.refcount(function), 1);
}

/// Test: deferred-enrolled objects are tagged deferred and skip count updates
#[test]
fn test_deferred_enrollment_avoids_count_traffic() {
    init_tracing();
    let heap = Arc::new(ObjectHeap::with_mode(ExecutionMode::FreeThreading));
    let function = make_function(&heap, CodeUnit::new("f", 1, 8));
    let module_global = heap.alloc(ObjectKind::Generic).unwrap();
    assert!(heap.enable_deferred(module_global));

    let mut ts = ThreadState::new(Arc::clone(&heap));
    let h = ts.push_frame(function, None, FrameOwner::ThreadOwned);
    let pinned = StackRef::from_borrowed(&*heap, module_global);
    assert_eq!(pinned.tag(), RefTag::Deferred);

    let stats = heap.stats();
    let record = ts.frame_mut(h);
    for _ in 0..8 {
        record.push(pinned.duplicate(&*heap));
    }
    for _ in 0..8 {
        record.pop().release(&*heap).unwrap();
    }
    assert_eq!(heap.stats().increments, stats.increments);
    assert_eq!(heap.stats().decrements, stats.decrements);

    pinned.release(&*heap).unwrap();
    ts.exit_frame(h).unwrap();
}

/// Test: global-lock mode counts every non-null reference
#[test]
fn test_global_lock_mode_counts_immortals_as_owning() {
    let heap = ObjectHeap::with_mode(ExecutionMode::GlobalLock);
    let reference = StackRef::none(&heap);
    assert_eq!(reference.tag(), RefTag::Owning);
    let copy = reference.duplicate(&heap);
    assert!(copy.is(&reference));
    copy.release(&heap).unwrap();
    reference.release(&heap).unwrap();
    assert!(heap.is_alive(heap.none()));
}
