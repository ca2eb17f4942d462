//! The task engine: schedules pipelines on workers and delivers results.
//!
//! # Design
//! `Engine` is a cheap, cloneable bundle of three shared pieces: an
//! `Executor` for pipelines, a `Transport` for requests and the
//! `DeliveryQueue` feeding the owner thread. `run_pipeline` is the whole
//! cache, request, parse, cache-write algorithm as one generic function; the
//! engine adds status bookkeeping, the cancel check and delivery around it.
//!
//! Cancellation is checked exactly once, right after the pipeline returns.
//! A cancel that lands after that check does not stop the delivery that is
//! already queued.

use std::any::type_name;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

use tracing::{debug, error, warn};

use crate::callback::Callback;
use crate::config::EngineConfig;
use crate::delivery::{self, DeliveryLoop, DeliveryQueue};
use crate::error::{EngineError, ParseFailure};
use crate::executor::{Executor, Job, WorkerPool};
use crate::result::{ApiResult, ERROR_INVALID_PARAM, ERROR_NETWORK, ERROR_RESPONSE_FORMAT};
use crate::task::{ApiTask, FetchTask, TaskControl, TaskHandle, TaskStatus};
use crate::transport::{HttpTransport, Transport, UreqConnector};

static GLOBAL: OnceLock<Engine> = OnceLock::new();

/// Runs tasks off the caller's thread and delivers their results on the
/// delivery thread.
#[derive(Clone)]
pub struct Engine {
    executor: Arc<dyn Executor>,
    transport: Arc<dyn Transport>,
    delivery: DeliveryQueue,
}

impl Engine {
    /// Engine with a `WorkerPool` sized by `config` and the ureq transport.
    /// The returned loop must be driven by the delivery thread.
    pub fn new(config: EngineConfig) -> Result<(Engine, DeliveryLoop), EngineError> {
        Self::builder().config(config).build()
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Create the process-wide engine. Succeeds once; it is never torn down.
    pub fn init_global(config: EngineConfig) -> Result<DeliveryLoop, EngineError> {
        if GLOBAL.get().is_some() {
            return Err(EngineError::AlreadyInitialized);
        }
        let (engine, delivery) = Engine::new(config)?;
        GLOBAL
            .set(engine)
            .map_err(|_| EngineError::AlreadyInitialized)?;
        Ok(delivery)
    }

    pub fn global() -> Option<&'static Engine> {
        GLOBAL.get()
    }

    /// Schedule `task` and return immediately.
    ///
    /// If the executor refuses the job the task never starts; this is logged
    /// and the returned handle stays `NotStarted`.
    pub fn execute<S: ApiTask>(&self, task: FetchTask<S>) -> TaskHandle {
        let handle = task.handle();
        let name = task_name(&task.api);
        let FetchTask {
            api,
            callback,
            force_update,
            control,
        } = task;

        let transport = Arc::clone(&self.transport);
        let delivery = self.delivery.clone();
        let job: Job = Box::new(move || {
            run_task(api, callback, force_update, control, transport.as_ref(), &delivery)
        });

        if let Err(e) = self.executor.spawn(job) {
            error!(task = %name, error = %e, "task was not scheduled");
        }
        handle
    }

    pub fn cancel(&self, handle: &TaskHandle) {
        handle.cancel();
    }

    pub fn status(&self, handle: &TaskHandle) -> TaskStatus {
        handle.status()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("delivery_closed", &self.delivery.is_closed())
            .finish_non_exhaustive()
    }
}

/// Assembles an [`Engine`]. Unset parts fall back to the production ones.
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    executor: Option<Arc<dyn Executor>>,
    transport: Option<Arc<dyn Transport>>,
}

impl EngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<(Engine, DeliveryLoop), EngineError> {
        let executor = match self.executor {
            Some(executor) => executor,
            None => Arc::new(WorkerPool::new(&self.config)?),
        };
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(HttpTransport::<UreqConnector>::default()));
        let (queue, delivery) = delivery::channel();
        let engine = Engine {
            executor,
            transport,
            delivery: queue,
        };
        Ok((engine, delivery))
    }
}

fn run_task<S: ApiTask>(
    api: S,
    callback: Option<Box<dyn Callback<S::Output>>>,
    force_update: bool,
    control: Arc<TaskControl>,
    transport: &dyn Transport,
    delivery: &DeliveryQueue,
) {
    let name = task_name(&api);
    control.advance(TaskStatus::RunningBackground);
    debug!(task = %name, "RUNNING_BACKGROUND");

    let result = run_pipeline(&api, force_update, transport);
    drop(api);

    if control.is_cancelled() {
        control.advance(TaskStatus::Finished);
        debug!(task = %name, "FINISHED (cancelled)");
        return;
    }

    let job_control = Arc::clone(&control);
    let job_name = name.clone();
    let job: Job = Box::new(move || deliver(&job_name, result, callback, &job_control));
    if delivery.post(job).is_err() {
        error!(task = %name, "delivery queue is closed, result dropped");
        control.advance(TaskStatus::Finished);
    }
}

fn deliver<T>(
    name: &str,
    result: ApiResult<T>,
    callback: Option<Box<dyn Callback<T>>>,
    control: &TaskControl,
) {
    control.advance(TaskStatus::RunningCallback);
    debug!(task = name, "RUNNING_CALLBACK");

    if !result.is_success() {
        warn!(
            task = name,
            code = result.error_code(),
            message = result.error_message(),
            "task failed"
        );
    }

    match callback {
        Some(callback) if callback_alive(name, callback.as_ref()) => {
            debug!(task = name, "notifying callback");
            if catch_unwind(AssertUnwindSafe(|| callback.on_result(result))).is_err() {
                error!(task = name, "callback panicked");
            }
        }
        Some(_) => debug!(task = name, "callback target is gone, quit"),
        None => debug!(task = name, "no callback, quit"),
    }

    control.advance(TaskStatus::Finished);
    debug!(task = name, "FINISHED");
}

/// Run one task's cache, request, parse and cache-write steps in order.
///
/// Never panics past a hook: a panicking hook counts as that hook returning
/// nothing.
pub fn run_pipeline<S: ApiTask>(
    task: &S,
    force_update: bool,
    transport: &dyn Transport,
) -> ApiResult<S::Output> {
    let owned_name = task_name(task);
    let name = owned_name.as_str();

    if !force_update {
        if let Some(cached) = guarded(name, "read_cache", || task.read_cache()).flatten() {
            debug!(task = name, "served from cache");
            return ApiResult::success(cached);
        }
    }

    let Some(request) = guarded(name, "build_request", || task.build_request()).flatten() else {
        return ApiResult::failure(ERROR_INVALID_PARAM, None);
    };

    let response = transport.execute(&request);
    let body = match (response.network_failure(), response.body) {
        (None, Some(body)) => body,
        (reason, _) => return ApiResult::failure(ERROR_NETWORK, reason),
    };

    let value = match guarded(name, "parse_response", || task.parse_response(&body)) {
        Some(Ok(value)) => value,
        Some(Err(ParseFailure::Server { code, message })) => {
            return ApiResult::failure(code, message);
        }
        Some(Err(ParseFailure::Malformed)) | None => {
            return ApiResult::failure(ERROR_RESPONSE_FORMAT, None);
        }
    };

    if let Some(Err(e)) = guarded(name, "write_cache", || task.write_cache(&value)) {
        warn!(task = name, error = %e, "cache write failed");
    }
    ApiResult::success(value)
}

/// `task.name()`, or the type name if the hook panics.
fn task_name<S: ApiTask>(task: &S) -> String {
    let fallback = type_name::<S>();
    guarded(fallback, "name", || task.name().to_string())
        .unwrap_or_else(|| fallback.to_string())
}

/// A callback whose liveness check panics is treated as gone.
fn callback_alive<T>(name: &str, callback: &dyn Callback<T>) -> bool {
    guarded(name, "is_alive", || callback.is_alive()).unwrap_or(false)
}

fn guarded<R>(task: &str, step: &'static str, hook: impl FnOnce() -> R) -> Option<R> {
    match catch_unwind(AssertUnwindSafe(hook)) {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(task, step, "task hook panicked");
            None
        }
    }
}
