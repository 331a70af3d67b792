//! Runtime configuration.

use serde::{Deserialize, Serialize};

/// How the runtime schedules threads over shared objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// A single global execution lock; one thread mutates objects at a time
    #[default]
    GlobalLock,
    /// Threads execute concurrently while sharing objects
    FreeThreading,
}

impl ExecutionMode {
    /// Returns true when objects may be mutated by several threads at once.
    pub fn is_free_threading(self) -> bool {
        matches!(self, ExecutionMode::FreeThreading)
    }
}

/// Configuration for a runtime instance.
///
/// Every field has a default, so partial documents deserialize cleanly:
///
/// ```
/// use core_types::{ExecutionMode, RuntimeConfig};
///
/// let config: RuntimeConfig = serde_json::from_str(r#"{"mode": "free_threading"}"#).unwrap();
/// assert_eq!(config.mode, ExecutionMode::FreeThreading);
/// assert_eq!(config.max_objects, None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Execution mode
    pub mode: ExecutionMode,
    /// Ceiling on live heap objects; allocations past it fail with `OutOfMemory`
    pub max_objects: Option<usize>,
    /// Number of frame records reserved up front in each thread's arena
    pub frame_arena_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            mode: ExecutionMode::GlobalLock,
            max_objects: None,
            frame_arena_capacity: 64,
        }
    }
}

impl RuntimeConfig {
    /// Default configuration with the global execution lock.
    pub fn global_lock() -> Self {
        Self::default()
    }

    /// Default configuration with free-threading enabled.
    pub fn free_threading() -> Self {
        RuntimeConfig {
            mode: ExecutionMode::FreeThreading,
            ..Self::default()
        }
    }

    /// Sets the live-object ceiling.
    pub fn with_max_objects(mut self, max_objects: usize) -> Self {
        self.max_objects = Some(max_objects);
        self
    }
}
