//! Recoverable runtime errors.
//!
//! Allocation failure is the only failure the substrate reports as a value.
//! Structural violations (count underflow, clearing a frame twice while it is
//! still executing, reading dead stack slots) are programming errors and are
//! asserted instead.

use thiserror::Error;

/// A recoverable failure raised by the runtime.
///
/// # Examples
///
/// ```
/// use core_types::RuntimeError;
///
/// let error = RuntimeError::OutOfMemory { what: "object" };
/// assert!(error.is_memory_error());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// The allocator refused a request
    #[error("out of memory while allocating {what}")]
    OutOfMemory {
        /// What was being allocated
        what: &'static str,
    },
}

impl RuntimeError {
    /// Returns true for allocation failures.
    pub fn is_memory_error(&self) -> bool {
        matches!(self, RuntimeError::OutOfMemory { .. })
    }
}

/// Result alias used throughout the runtime.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
