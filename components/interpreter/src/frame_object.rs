//! Heap-visible frame wrappers
//!
//! A frame record becomes visible to user code through a [`FrameObject`]
//! allocated on first observation. While the record is live the wrapper only
//! names it by handle. When the record is cleared while something else still
//! holds the wrapper, the record's contents move into the wrapper instead of
//! being released ("promotion"), and the wrapper keeps a link to its caller's
//! wrapper so tracebacks can still walk outward.

use std::ops::ControlFlow;
use std::sync::Arc;

use core_types::{ObjectId, ObjectLifetime, RuntimeResult};
use memory_manager::{visit_object, HeapPayload, ObjectHeap, ObjectKind, VisitResult};
use tracing::{debug, trace, warn};

use crate::frame::{FrameOwner, FrameRecord, GeneratorState};
use crate::thread_state::{FrameHandle, ThreadState};

/// Where a wrapper's frame state lives.
#[derive(Debug)]
pub enum FrameStorage {
    /// The record is still in its thread's arena
    Live(FrameHandle),
    /// The record was promoted into the wrapper
    Owned(Box<FrameRecord>),
}

/// Payload of an `ObjectKind::FrameObject`.
#[derive(Debug)]
pub struct FrameObject {
    storage: FrameStorage,
    back: Option<ObjectId>,
}

impl FrameObject {
    fn live(handle: FrameHandle) -> Self {
        FrameObject {
            storage: FrameStorage::Live(handle),
            back: None,
        }
    }

    /// Where the frame state lives.
    pub fn storage(&self) -> &FrameStorage {
        &self.storage
    }

    /// Returns true once the record was promoted into this wrapper.
    pub fn is_owned(&self) -> bool {
        matches!(self.storage, FrameStorage::Owned(_))
    }

    /// Handle of the live record, if not yet promoted.
    pub fn live_handle(&self) -> Option<FrameHandle> {
        match self.storage {
            FrameStorage::Live(handle) => Some(handle),
            FrameStorage::Owned(_) => None,
        }
    }

    /// Caller's wrapper, set during promotion.
    pub fn back(&self) -> Option<ObjectId> {
        self.back
    }
}

impl HeapPayload for FrameObject {
    fn traverse(&self, visit: &mut dyn FnMut(ObjectId) -> VisitResult) -> VisitResult {
        visit_object(self.back, visit)?;
        match &self.storage {
            FrameStorage::Owned(record) => record.traverse(visit),
            FrameStorage::Live(_) => ControlFlow::Continue(()),
        }
    }

    fn dealloc(self: Box<Self>, heap: &ObjectHeap) -> RuntimeResult<()> {
        let FrameObject { storage, back } = *self;
        let mut result = match back {
            Some(back) => heap.decref(back),
            None => Ok(()),
        };
        if let FrameStorage::Owned(mut record) = storage {
            debug_assert_eq!(record.owner(), FrameOwner::HeapOwned);
            result = result.and(record.clear(heap));
            result = result.and(record.release_executable(heap));
        }
        result
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

impl ThreadState {
    /// Heap wrapper of the record behind `handle`, created on first use.
    ///
    /// The returned reference is borrowed from the record; callers that keep
    /// the wrapper must take their own reference. On allocation failure the
    /// error is left pending and returned.
    pub fn frame_object(&mut self, handle: FrameHandle) -> RuntimeResult<ObjectId> {
        match self.frame(handle).frame_object() {
            Some(wrapper) => Ok(wrapper),
            None => self.make_frame_object(handle),
        }
    }

    fn make_frame_object(&mut self, handle: FrameHandle) -> RuntimeResult<ObjectId> {
        let record = self.frame(handle);
        debug_assert!(record.frame_object().is_none());
        debug_assert!(!record.is_incomplete(), "{handle} is not visible yet");
        debug_assert!(!matches!(
            record.owner(),
            FrameOwner::HeapOwned | FrameOwner::Cleared
        ));

        let saved = self.pending_error.take();
        let wrapper = match self
            .heap()
            .alloc_with_payload(ObjectKind::FrameObject, Box::new(FrameObject::live(handle)))
        {
            Ok(wrapper) => wrapper,
            Err(err) => {
                debug!(%handle, %err, "frame object allocation failed");
                self.pending_error = Some(err.clone());
                return Err(err);
            }
        };
        self.pending_error = saved;
        self.frame_mut(handle).set_frame_object(wrapper);
        trace!(%handle, %wrapper, "materialized frame object");
        Ok(wrapper)
    }

    /// Nearest record at or above `start` that is visible to introspection.
    pub fn first_complete(&self, start: Option<FrameHandle>) -> Option<FrameHandle> {
        let mut cursor = start;
        while let Some(handle) = cursor {
            let record = self.frame(handle);
            if !record.is_incomplete() {
                return Some(handle);
            }
            cursor = record.previous();
        }
        None
    }

    /// Releases everything the record behind `handle` owns except its
    /// executable.
    ///
    /// If a wrapper exists and something besides the record holds it, the
    /// record's contents move into the wrapper instead. Clearing an already
    /// cleared record does nothing.
    ///
    /// # Panics
    ///
    /// Panics if `handle` is the current frame. Debug builds also panic for a
    /// generator frame whose generator was not cleared first.
    pub fn clear_except_executable(&mut self, handle: FrameHandle) -> RuntimeResult<()> {
        let heap = Arc::clone(self.heap());
        let record = self.frame(handle);
        if record.is_cleared() {
            return Ok(());
        }
        debug_assert!(
            record.owner() != FrameOwner::SuspendedOwner
                || record.generator_state() == Some(GeneratorState::Cleared),
            "generator of {handle} must be cleared before its frame"
        );
        assert_ne!(
            self.current_frame(),
            Some(handle),
            "{handle} must be unlinked before it is cleared"
        );

        let wrapper = self.frame_mut(handle).take_frame_object();
        if let Some(wrapper) = wrapper {
            if heap.refcount(wrapper) > 1 {
                self.take_ownership(wrapper, handle);
                return heap.decref(wrapper);
            }
        }

        let result = self.frame_mut(handle).clear(&*heap);
        trace!(%handle, "cleared frame");
        match wrapper {
            Some(wrapper) => result.and(heap.decref(wrapper)),
            None => result,
        }
    }

    fn take_ownership(&mut self, wrapper: ObjectId, handle: FrameHandle) {
        let heap = Arc::clone(self.heap());
        let record = self.frame_mut(handle);
        debug_assert!(matches!(
            record.owner(),
            FrameOwner::ThreadOwned | FrameOwner::SuspendedOwner
        ));
        let executable = record.executable().duplicate(&*heap);
        let mut promoted = std::mem::replace(record, FrameRecord::cleared_shell(executable));
        promoted.set_owner(FrameOwner::HeapOwned);
        if promoted.is_incomplete() {
            // Never started; make it look like the prologue ran.
            promoted.set_instr_offset(promoted.prologue_end() + 1);
        }
        debug_assert!(!promoted.is_incomplete());
        let previous = promoted.take_previous();

        let installed = heap.with_payload(wrapper, |frame: &mut FrameObject| {
            debug_assert!(frame.back.is_none());
            frame.storage = FrameStorage::Owned(Box::new(promoted));
        });
        debug_assert!(installed.is_some(), "{wrapper} is not a frame object");

        if let Some(caller) = self.first_complete(previous) {
            let saved = self.pending_error.take();
            match self.frame_object(caller) {
                Ok(back) => {
                    heap.incref(back);
                    heap.with_payload(wrapper, |frame: &mut FrameObject| frame.back = Some(back));
                }
                Err(err) => warn!(%handle, %err, "caller frame object unavailable; back link left empty"),
            }
            self.pending_error = saved;
        }

        if !heap.is_tracked(wrapper) {
            heap.track(wrapper);
        }
        debug!(%handle, %wrapper, "promoted frame into its frame object");
    }

    /// Caller of the frame behind `wrapper`, as a wrapper.
    ///
    /// Promoted wrappers answer from their back link; live ones materialize
    /// the caller's wrapper on demand. The result is borrowed. A live wrapper
    /// whose record belongs to another thread has no caller here.
    pub fn frame_object_back(&mut self, wrapper: ObjectId) -> RuntimeResult<Option<ObjectId>> {
        let (back, live) = self
            .heap()
            .with_payload(wrapper, |frame: &mut FrameObject| (frame.back, frame.live_handle()))
            .unwrap_or((None, None));
        if back.is_some() {
            return Ok(back);
        }
        let Some(previous) = live
            .and_then(|handle| self.frames.get(handle))
            .map(FrameRecord::previous)
        else {
            return Ok(None);
        };
        match self.first_complete(previous) {
            Some(caller) => self.frame_object(caller).map(Some),
            None => Ok(None),
        }
    }

    /// Runs `f` on the record behind `wrapper`, wherever it lives.
    ///
    /// For promoted records `f` runs while the wrapper's payload is locked
    /// and must not touch the wrapper itself. Live records are only reachable
    /// from the thread whose arena holds them; elsewhere this returns `None`.
    pub fn with_frame_object_record<R>(
        &self,
        wrapper: ObjectId,
        f: impl FnOnce(&FrameRecord) -> R,
    ) -> Option<R> {
        let mut f = Some(f);
        let mut live = None;
        let owned = self
            .heap()
            .with_payload(wrapper, |frame: &mut FrameObject| match &frame.storage {
                FrameStorage::Owned(record) => f.take().map(|f| f(record)),
                FrameStorage::Live(handle) => {
                    live = Some(*handle);
                    None
                }
            })
            .flatten();
        if owned.is_some() {
            return owned;
        }
        let f = f.take()?;
        self.frames.get(live?).map(f)
    }
}
