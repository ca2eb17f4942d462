//! Asynchronous remote-data fetch core.
//!
//! # Overview
//! A task checks a cache, issues one HTTP request (with retry, timeouts and
//! optional certificate pinning), parses the body, writes the cache and hands
//! a typed `ApiResult` to a callback. Callers never block: pipelines run on a
//! worker pool and callbacks run on a single delivery thread owned by the
//! consumer.
//!
//! # Design
//! - `ApiTask` is the extension point: four hooks a concrete task implements.
//!   `run_pipeline` is the one algorithm that drives them.
//! - `Engine` owns the seams (`Executor`, `Transport`, `DeliveryQueue`) as
//!   trait objects so tests can swap in inline execution and canned
//!   responses.
//! - Every failure during a run becomes an `ApiResult` value. Only building a
//!   request or an engine returns `Err`.
//!
//! ```no_run
//! use fetch_core::{
//!     ApiResult, ApiTask, Engine, EngineConfig, FetchTask, HttpRequest, ParseFailure,
//! };
//!
//! struct Find(&'static str);
//!
//! impl ApiTask for Find {
//!     type Output = serde_json::Value;
//!
//!     fn build_request(&self) -> Option<HttpRequest> {
//!         HttpRequest::get("http://localhost:3000/find").query("q", self.0).build().ok()
//!     }
//!
//!     fn parse_response(&self, body: &str) -> Result<Self::Output, ParseFailure> {
//!         Ok(serde_json::from_str(body)?)
//!     }
//! }
//!
//! let (engine, delivery) = Engine::new(EngineConfig::default()).unwrap();
//! engine.execute(FetchTask::new(Find("test"), |result: ApiResult<serde_json::Value>| {
//!     println!("{result:?}");
//! }));
//! delivery.run();
//! ```

pub mod callback;
pub mod config;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod executor;
pub mod http;
pub mod result;
pub mod task;
mod tls;
pub mod transport;

pub use callback::{Callback, ConsumerId, ConsumerRegistry};
pub use config::EngineConfig;
pub use delivery::{DeliveryLoop, DeliveryQueue};
pub use engine::{run_pipeline, Engine, EngineBuilder};
pub use error::{CacheError, EngineError, ParseFailure, RequestError, TransportError};
pub use executor::{Executor, InlineExecutor, WorkerPool};
pub use http::{FilePart, HostnameVerifier, HttpMethod, HttpRequest, HttpResponse, RequestBuilder};
pub use result::ApiResult;
pub use task::{ApiTask, FetchTask, TaskHandle, TaskStatus};
pub use transport::{Connector, HttpTransport, Transport, UreqConnector};
