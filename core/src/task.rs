//! Tasks: the specialization contract and per-task lifecycle state.

use std::any::type_name;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use crate::callback::Callback;
use crate::error::{CacheError, ParseFailure};
use crate::http::HttpRequest;

/// The four hooks a concrete task provides. The engine calls them in a fixed
/// order on a worker thread; see [`run_pipeline`](crate::engine::run_pipeline).
pub trait ApiTask: Send + 'static {
    type Output: Send + 'static;

    /// Name used in log events.
    fn name(&self) -> &str {
        type_name::<Self>()
    }

    /// Cached value, if any. Skipped when the task is force-updated.
    fn read_cache(&self) -> Option<Self::Output> {
        None
    }

    /// `None` means the task's parameters are unusable.
    fn build_request(&self) -> Option<HttpRequest>;

    fn parse_response(&self, body: &str) -> Result<Self::Output, ParseFailure>;

    /// Called after a successful parse. Errors are logged, never reported.
    fn write_cache(&self, _value: &Self::Output) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Lifecycle of one task. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum TaskStatus {
    NotStarted = 0,
    RunningBackground = 1,
    RunningCallback = 2,
    Finished = 3,
}

impl TaskStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => TaskStatus::NotStarted,
            1 => TaskStatus::RunningBackground,
            2 => TaskStatus::RunningCallback,
            _ => TaskStatus::Finished,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::NotStarted => "NOT_STARTED",
            TaskStatus::RunningBackground => "RUNNING_BACKGROUND",
            TaskStatus::RunningCallback => "RUNNING_CALLBACK",
            TaskStatus::Finished => "FINISHED",
        };
        f.write_str(name)
    }
}

/// State shared between the caller's handle and the engine.
#[derive(Debug)]
pub(crate) struct TaskControl {
    status: AtomicU8,
    cancelled: AtomicBool,
}

impl TaskControl {
    fn new() -> Self {
        Self {
            status: AtomicU8::new(TaskStatus::NotStarted as u8),
            cancelled: AtomicBool::new(false),
        }
    }

    pub(crate) fn status(&self) -> TaskStatus {
        TaskStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Move to `next` unless the task is already past it.
    pub(crate) fn advance(&self, next: TaskStatus) {
        self.status.fetch_max(next as u8, Ordering::AcqRel);
    }

    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// A task ready to be handed to [`Engine::execute`](crate::Engine::execute).
pub struct FetchTask<S: ApiTask> {
    pub(crate) api: S,
    pub(crate) callback: Option<Box<dyn Callback<S::Output>>>,
    pub(crate) force_update: bool,
    pub(crate) control: Arc<TaskControl>,
}

impl<S: ApiTask> FetchTask<S> {
    pub fn new(api: S, callback: impl Callback<S::Output> + 'static) -> Self {
        Self::with_callback(api, Some(Box::new(callback)))
    }

    /// A task whose result nobody is waiting for.
    pub fn detached(api: S) -> Self {
        Self::with_callback(api, None)
    }

    pub fn with_callback(api: S, callback: Option<Box<dyn Callback<S::Output>>>) -> Self {
        Self {
            api,
            callback,
            force_update: false,
            control: Arc::new(TaskControl::new()),
        }
    }

    /// Skip the cache read. Executing consumes the task, so this can only
    /// happen before it starts.
    pub fn set_force_update(mut self) -> Self {
        self.force_update = true;
        self
    }

    pub fn is_force_update(&self) -> bool {
        self.force_update
    }

    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            control: Arc::clone(&self.control),
        }
    }
}

impl<S: ApiTask> fmt::Debug for FetchTask<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchTask")
            .field("name", &self.api.name())
            .field("has_callback", &self.callback.is_some())
            .field("force_update", &self.force_update)
            .field("status", &self.control.status())
            .finish()
    }
}

/// Caller-side view of a submitted task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    control: Arc<TaskControl>,
}

impl TaskHandle {
    /// Lock-free; safe from any thread.
    pub fn status(&self) -> TaskStatus {
        self.control.status()
    }

    /// Suppress delivery. Never interrupts a request already in flight.
    pub fn cancel(&self) {
        self.control.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.control.is_cancelled()
    }
}
