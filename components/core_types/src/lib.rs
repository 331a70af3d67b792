//! Core types shared by every runtime component.
//!
//! This crate provides the vocabulary the reference-ownership substrate is
//! written in: object identity, the execution mode, runtime configuration,
//! the recoverable error type, and the object-lifetime capability that the
//! reference and frame layers thread through their APIs.
//!
//! # Overview
//!
//! - [`ObjectId`] - Identity of a managed object
//! - [`ObjectLifetime`] - Counting capability supplied by the object runtime
//! - [`ExecutionMode`] - Global-lock or free-threading execution
//! - [`RuntimeConfig`] - Runtime configuration
//! - [`RuntimeError`] - Recoverable runtime failures
//!
//! # Examples
//!
//! ```
//! use core_types::{ExecutionMode, RuntimeConfig, RuntimeError};
//!
//! let config = RuntimeConfig::free_threading();
//! assert_eq!(config.mode, ExecutionMode::FreeThreading);
//!
//! let error = RuntimeError::OutOfMemory { what: "frame object" };
//! assert_eq!(error.to_string(), "out of memory while allocating frame object");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod config;
mod error;
mod object;

pub use config::{ExecutionMode, RuntimeConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use object::{ObjectId, ObjectLifetime};
