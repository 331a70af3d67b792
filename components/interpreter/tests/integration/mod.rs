//! Integration tests for interpreter
//!
//! Tests interaction between ThreadState, frame objects, finalizers and the heap

use std::sync::Arc;

use core_types::{ExecutionMode, ObjectId, ObjectLifetime, RuntimeConfig, RuntimeError};
use interpreter::{new_function, CodeUnit, FrameHandle, FrameOwner, GeneratorState, ThreadState};
use memory_manager::{ObjectHeap, ObjectKind, StackRef};
use parking_lot::Mutex;

fn function(heap: &ObjectHeap, code: CodeUnit) -> ObjectId {
    let code = code.into_object(heap).unwrap();
    let func = new_function(heap, code).unwrap();
    heap.decref(code).unwrap();
    func
}

#[test]
fn test_finalizer_sees_caller_as_current_frame() {
    let heap = Arc::new(ObjectHeap::default());
    let func = function(&heap, CodeUnit::new("f", 1, 0));
    let mut ts = ThreadState::new(Arc::clone(&heap));
    let outer = ts.push_frame(func, None, FrameOwner::ThreadOwned);
    let inner = ts.push_frame(func, None, FrameOwner::ThreadOwned);

    let seen: Arc<Mutex<Option<Option<FrameHandle>>>> = Arc::new(Mutex::new(None));
    let value = heap.alloc(ObjectKind::Generic).unwrap();
    {
        let cell = ts.current_frame_cell();
        let seen = Arc::clone(&seen);
        heap.set_finalizer(value, move |_, _| {
            *seen.lock() = Some(cell.load());
            Ok(())
        });
    }
    ts.frame_mut(inner)
        .set_local(0, StackRef::from_owned(&*heap, Some(value)), &*heap)
        .unwrap();

    ts.exit_frame(inner).unwrap();
    assert_eq!(*seen.lock(), Some(Some(outer)));
    ts.exit_frame(outer).unwrap();
}

#[test]
fn test_finalizer_error_is_reported_after_full_release() {
    let heap = Arc::new(ObjectHeap::default());
    let func = function(&heap, CodeUnit::new("f", 2, 0));
    let mut ts = ThreadState::new(Arc::clone(&heap));
    let h = ts.push_frame(func, None, FrameOwner::ThreadOwned);

    let failing = heap.alloc(ObjectKind::Generic).unwrap();
    let other = heap.alloc(ObjectKind::Generic).unwrap();
    heap.set_finalizer(failing, |_, _| Err(RuntimeError::OutOfMemory { what: "finalizer" }));
    ts.frame_mut(h)
        .set_local(0, StackRef::from_owned(&*heap, Some(failing)), &*heap)
        .unwrap();
    ts.frame_mut(h)
        .set_local(1, StackRef::from_owned(&*heap, Some(other)), &*heap)
        .unwrap();

    let result = ts.exit_frame(h);
    assert_eq!(result, Err(RuntimeError::OutOfMemory { what: "finalizer" }));
    assert!(!heap.is_alive(failing));
    assert!(!heap.is_alive(other));
    assert_eq!(heap.refcount(func), 1);
    assert_eq!(ts.frame_count(), 0);
}

#[test]
fn test_unstarted_generator_promotion_fixes_cursor() {
    let heap = Arc::new(ObjectHeap::default());
    let func = function(&heap, CodeUnit::new("gen", 0, 1).with_prologue(2));
    let mut ts = ThreadState::new(Arc::clone(&heap));
    let gen = ts.push_generator_frame(func, None);

    let wrapper = ts.frame_object(gen).unwrap();
    heap.incref(wrapper);
    ts.close_generator(gen).unwrap();

    let state = ts.with_frame_object_record(wrapper, |r| {
        (r.owner(), r.instr_offset(), r.is_incomplete(), r.generator_state())
    });
    assert_eq!(
        state,
        Some((FrameOwner::HeapOwned, 3, false, Some(GeneratorState::Cleared)))
    );
    assert_eq!(ts.frame_object_back(wrapper).unwrap(), None);
    heap.decref(wrapper).unwrap();
    assert_eq!(heap.refcount(func), 1);
}

#[test]
fn test_suspended_generator_observed_from_caller() {
    let heap = Arc::new(ObjectHeap::default());
    let main = function(&heap, CodeUnit::new("main", 0, 1));
    let gen_func = function(&heap, CodeUnit::new("gen", 1, 1).with_line(0, 9, 3));
    let mut ts = ThreadState::new(Arc::clone(&heap));
    let caller = ts.push_frame(main, None, FrameOwner::ThreadOwned);
    let gen = ts.push_generator_frame(gen_func, None);

    ts.resume(gen);
    ts.frame_mut(gen).advance(1);
    let wrapper = ts.frame_object(gen).unwrap();
    heap.incref(wrapper);
    ts.suspend(gen);
    ts.resume(gen);
    ts.close_generator(gen).unwrap();

    assert_eq!(ts.current_frame(), Some(caller));
    let back = ts.frame_object_back(wrapper).unwrap();
    assert_eq!(back, ts.frame(caller).frame_object());
    let line = ts.with_frame_object_record(wrapper, |r| {
        (r.last_instruction_offset(), r.source_line(&heap))
    });
    assert_eq!(line, Some((2, Some(3))));
    heap.decref(wrapper).unwrap();
    ts.exit_frame(caller).unwrap();
}

#[test]
fn test_wrapper_creation_preserves_pending_error() {
    let heap = Arc::new(ObjectHeap::default());
    let func = function(&heap, CodeUnit::new("f", 0, 0));
    let mut ts = ThreadState::new(Arc::clone(&heap));
    let h = ts.push_frame(func, None, FrameOwner::ThreadOwned);

    let earlier = RuntimeError::OutOfMemory { what: "earlier" };
    ts.set_pending_error(earlier.clone());
    ts.frame_object(h).unwrap();
    assert_eq!(ts.pending_error(), Some(&earlier));
    ts.exit_frame(h).unwrap();
}

#[test]
fn test_back_link_failure_is_swallowed() {
    let heap = Arc::new(ObjectHeap::default());
    let func = function(&heap, CodeUnit::new("f", 0, 0));
    let mut ts = ThreadState::new(Arc::clone(&heap));
    let parent = ts.push_frame(func, None, FrameOwner::ThreadOwned);
    let child = ts.push_frame(func, None, FrameOwner::ThreadOwned);
    let wrapper = ts.frame_object(child).unwrap();
    heap.incref(wrapper);

    let earlier = RuntimeError::OutOfMemory { what: "earlier" };
    ts.set_pending_error(earlier.clone());
    heap.inject_allocation_failure();
    ts.exit_frame(child).unwrap();

    assert_eq!(ts.pending_error(), Some(&earlier));
    assert_eq!(ts.frame(parent).frame_object(), None);
    assert_eq!(ts.frame_object_back(wrapper).unwrap(), None);
    heap.decref(wrapper).unwrap();
    ts.exit_frame(parent).unwrap();
}

#[test]
fn test_object_ceiling_surfaces_as_out_of_memory() {
    let config = RuntimeConfig::default().with_max_objects(3);
    let heap = Arc::new(ObjectHeap::new(&config));
    let func = function(&heap, CodeUnit::new("f", 0, 0));
    let mut ts = ThreadState::new(Arc::clone(&heap));
    let h = ts.push_frame(func, None, FrameOwner::ThreadOwned);
    let _filler = heap.alloc(ObjectKind::Generic).unwrap();

    let err = ts.frame_object(h).unwrap_err();
    assert_eq!(err, RuntimeError::OutOfMemory { what: "frame object" });
    assert_eq!(ts.pending_error(), Some(&err));
    ts.take_pending_error();
    ts.exit_frame(h).unwrap();
}

#[test]
fn test_free_threading_immortal_values_cost_no_count_traffic() {
    let heap = Arc::new(ObjectHeap::with_mode(ExecutionMode::FreeThreading));
    let func = function(&heap, CodeUnit::new("f", 1, 4));
    let mut ts = ThreadState::new(Arc::clone(&heap));
    let h = ts.push_frame(func, None, FrameOwner::ThreadOwned);

    let stats = heap.stats();
    for _ in 0..1000 {
        let record = ts.frame_mut(h);
        record.push(StackRef::true_object(&heap));
        let copy = record.peek().unwrap().duplicate(&*heap);
        record.push(copy);
        record.pop().release(&*heap).unwrap();
        record.pop().release(&*heap).unwrap();
    }
    assert_eq!(heap.stats().increments, stats.increments);
    assert_eq!(heap.stats().decrements, stats.decrements);
    ts.exit_frame(h).unwrap();
}
