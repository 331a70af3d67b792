//! Frame runtime for the interpreter
//!
//! This crate provides the execution-frame layer the dispatch loop runs on:
//! - Code units and function objects stored on the object heap
//! - `FrameRecord`, one call's slots and bookkeeping, held in a per-thread arena
//! - `ThreadState`, the frame stack, the shared current-frame cell and the
//!   pending error
//! - Heap-visible frame objects and the promotion of a record into its
//!   frame object when the record dies while still observed
//! - Introspection accessors for debuggers and tracebacks
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use interpreter::{new_function, CodeUnit, FrameOwner, ThreadState};
//! use memory_manager::{ObjectHeap, StackRef};
//! use core_types::ObjectLifetime;
//!
//! let heap = Arc::new(ObjectHeap::default());
//! let code = CodeUnit::new("main", 1, 2).into_object(&heap).unwrap();
//! let func = new_function(&heap, code).unwrap();
//!
//! let mut thread = ThreadState::new(Arc::clone(&heap));
//! let frame = thread.push_frame(func, None, FrameOwner::ThreadOwned);
//! thread.frame_mut(frame).push(StackRef::none(&heap));
//! thread.exit_frame(frame).unwrap();
//!
//! assert_eq!(heap.refcount(func), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod code;
pub mod frame;
pub mod frame_object;
pub mod introspection;
pub mod thread_state;

// Re-export main types at crate root
pub use code::{
    executable_kind, function_code, new_function, with_code, CodeUnit, ExecutableKind,
    FunctionObject, LineEntry, CODE_UNIT_SIZE,
};
pub use frame::{FrameLayout, FrameOwner, FrameRecord, GeneratorState};
pub use frame_object::{FrameObject, FrameStorage};
pub use thread_state::{CurrentFrame, FrameArena, FrameHandle, ThreadState};
