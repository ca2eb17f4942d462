//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Pool size on machines with at most two cores.
pub const SMALL_POOL_SIZE: usize = 5;
/// Pool size on machines with more than two cores.
pub const LARGE_POOL_SIZE: usize = 10;

/// Settings fixed when an engine is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of worker threads (default: 5 on two cores or fewer, else 10)
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Worker threads are named `<prefix>-<index>` (default: "fetch-worker")
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            thread_name_prefix: default_thread_name_prefix(),
        }
    }
}

/// Pool size for a machine with `cores` hardware threads.
pub fn pool_size_for(cores: usize) -> usize {
    if cores <= 2 {
        SMALL_POOL_SIZE
    } else {
        LARGE_POOL_SIZE
    }
}

fn default_worker_threads() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    pool_size_for(cores)
}

fn default_thread_name_prefix() -> String {
    "fetch-worker".to_string()
}
