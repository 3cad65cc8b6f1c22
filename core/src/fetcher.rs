//! Non-blocking HTTP fetching on an owned background pool.
//!
//! # Design
//! A `Fetcher` is constructed explicitly and owns its pool (a tokio runtime
//! used only for its blocking threads) and its `Transport`. Clones share
//! both. There is no process-wide session.
//!
//! Two ways to run a request:
//! - `data_task` / `send` hand the result to a completion callback. A task
//!   starts `Idle` and only goes on the wire when `resume` is called (`send`
//!   does both). The callback runs exactly once on a pool thread, after the
//!   task's terminal state has been recorded.
//! - `fetch` returns a future, so sequential or concurrent fetches compose
//!   with `.await` and `join!` instead of nested callbacks.
//!
//! Every started job holds a reference to the pool, so dropping the last
//! `Fetcher` never cancels work that was already started. Completions of
//! concurrent requests arrive in no particular order.

use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::runtime::{Builder, Handle, Runtime};

use crate::codec::JsonCodec;
use crate::error::{DecodingError, TransportError};
use crate::http::{HttpRequest, HttpResponse};
use crate::transport::{Transport, UreqTransport};

/// Callback receiving the outcome of a data task.
pub type Completion = Box<dyn FnOnce(Result<HttpResponse, TransportError>) + Send + 'static>;

/// Settings for a `Fetcher` and its default transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    /// Overall deadline per request. `None` leaves it to the OS.
    pub timeout_ms: Option<u64>,
    /// Upper bound on requests executing at the same time; extra requests
    /// queue on the pool.
    pub max_in_flight: usize,
    /// Responses with a larger body fail with `TransportError::BodyTooLarge`.
    pub max_body_bytes: u64,
    /// Sent as `User-Agent` unless the request sets one.
    pub user_agent: Option<String>,
    /// Added to every request that does not already carry the header.
    pub default_headers: Vec<(String, String)>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            max_in_flight: 8,
            max_body_bytes: 10 * 1024 * 1024,
            user_agent: Some(concat!("fetch-core/", env!("CARGO_PKG_VERSION")).to_string()),
            default_headers: Vec::new(),
        }
    }
}

impl FetcherConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Read a config from a JSON document; absent fields keep their defaults.
    pub fn from_json(payload: impl AsRef<[u8]>) -> Result<Self, DecodingError> {
        JsonCodec::default().decode(payload)
    }
}

/// Lifecycle of a data task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Created, not started.
    Idle,
    InFlight,
    /// A response arrived (whatever its status code).
    Completed,
    /// The transport failed; no response exists.
    Failed,
}

/// Issues HTTP requests without blocking the caller.
#[derive(Clone)]
pub struct Fetcher {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    config: FetcherConfig,
    handle: Handle,
    runtime: Option<Runtime>,
    next_id: AtomicU64,
}

impl Fetcher {
    /// Build a fetcher that talks to the network through `UreqTransport`.
    pub fn new(config: FetcherConfig) -> Result<Self, TransportError> {
        let transport = Arc::new(UreqTransport::new(&config));
        Self::with_transport(config, transport)
    }

    pub fn with_transport(
        config: FetcherConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, TransportError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(config.max_in_flight.max(1))
            .thread_name("fetch-worker")
            .build()
            .map_err(|e| TransportError::Runtime(e.to_string()))?;
        let handle = runtime.handle().clone();
        Ok(Self {
            inner: Arc::new(Inner {
                transport,
                config,
                handle,
                runtime: Some(runtime),
                next_id: AtomicU64::new(1),
            }),
        })
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.inner.config
    }

    /// Create a task for `request` without starting it.
    pub fn data_task<F>(&self, request: HttpRequest, on_complete: F) -> DataTask
    where
        F: FnOnce(Result<HttpResponse, TransportError>) + Send + 'static,
    {
        let id = self.inner.next_id();
        DataTask {
            id,
            shared: Arc::new(TaskShared {
                state: Mutex::new(TaskState::Idle),
                pending: Mutex::new(Some(Pending {
                    inner: Arc::clone(&self.inner),
                    request,
                    on_complete: Box::new(on_complete),
                })),
            }),
        }
    }

    /// Start `request` now; `on_complete` receives the outcome exactly once.
    pub fn send<F>(&self, request: HttpRequest, on_complete: F) -> DataTask
    where
        F: FnOnce(Result<HttpResponse, TransportError>) + Send + 'static,
    {
        let task = self.data_task(request, on_complete);
        task.resume();
        task
    }

    /// Start `request` now and return a future resolving to its outcome.
    ///
    /// The request is already running when this returns; awaiting only
    /// collects the result. The future does not depend on any particular
    /// executor.
    pub fn fetch(
        &self,
        request: HttpRequest,
    ) -> impl Future<Output = Result<HttpResponse, TransportError>> + Send + 'static {
        let id = self.inner.next_id();
        let inner = Arc::clone(&self.inner);
        let job = self.inner.handle.spawn_blocking(move || inner.execute(id, request));
        async move {
            match job.await {
                Ok(result) => result,
                Err(e) => Err(TransportError::Aborted(e.to_string())),
            }
        }
    }
}

impl fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetcher")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Run one request on the calling thread.
    fn execute(&self, id: u64, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let request = self.prepare(request);
        debug!("fetch[{id}]: {} {}", request.method, request.url);

        let result = match catch_unwind(AssertUnwindSafe(|| self.transport.execute(&request))) {
            Ok(result) => result,
            Err(_) => {
                warn!("fetch[{id}]: transport panicked");
                Err(TransportError::Aborted("transport panicked".to_string()))
            }
        };

        match &result {
            Ok(response) => debug!(
                "fetch[{id}]: {} {} ({} bytes)",
                response.status,
                response.status_text(),
                response.body.len()
            ),
            Err(e) => warn!("fetch[{id}]: {} {} failed: {e}", request.method, request.url),
        }
        result
    }

    fn prepare(&self, mut request: HttpRequest) -> HttpRequest {
        for (name, value) in &self.config.default_headers {
            if request.header(name).is_none() {
                request.headers.push((name.clone(), value.clone()));
            }
        }
        if let Some(agent) = &self.config.user_agent {
            if request.header("user-agent").is_none() {
                request.headers.push(("user-agent".to_string(), agent.clone()));
            }
        }
        request
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // The last reference may be released on one of the pool's own
        // threads, which must not wait for the pool to drain.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// A single request bound to its completion callback.
pub struct DataTask {
    id: u64,
    shared: Arc<TaskShared>,
}

struct TaskShared {
    state: Mutex<TaskState>,
    pending: Mutex<Option<Pending>>,
}

struct Pending {
    inner: Arc<Inner>,
    request: HttpRequest,
    on_complete: Completion,
}

impl DataTask {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> TaskState {
        *lock(&self.shared.state)
    }

    /// Put the request on the wire.
    ///
    /// Returns `false`, doing nothing, if the task was already started.
    pub fn resume(&self) -> bool {
        let Some(pending) = lock(&self.shared.pending).take() else {
            warn!("fetch[{}]: resume on a task that already started", self.id);
            return false;
        };
        *lock(&self.shared.state) = TaskState::InFlight;

        let Pending {
            inner,
            request,
            on_complete,
        } = pending;
        let id = self.id;
        let shared = Arc::clone(&self.shared);
        let handle = inner.handle.clone();
        handle.spawn_blocking(move || {
            let result = inner.execute(id, request);
            *lock(&shared.state) = if result.is_ok() {
                TaskState::Completed
            } else {
                TaskState::Failed
            };
            on_complete(result);
        });
        true
    }
}

impl fmt::Debug for DataTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataTask")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
