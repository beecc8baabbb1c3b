//! Background workers that keep the [`StateStore`] up to date, at most one per module.
//!
//! A worker either polls a blocking [`Fetch`] routine on an interval, or drives an event-driven [`Listen`]
//! routine. Both publish through a [`Publisher`], which implements the fallback policy: a failed or empty
//! fetch republishes the last good payload marked `stale`, or `null` if there never was one.

use std::{
    collections::HashMap,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use barstate_shared_util::ModuleKey;
use futures::{future::BoxFuture, FutureExt};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    cache::ModuleCache,
    config::{BarConfig, ModuleConfig},
    error::{FetchError, FetchResult, RegistryError},
    payload,
    registry::ModuleRegistry,
    store::StateStore,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_LISTEN_RESTART_DELAY: Duration = Duration::from_secs(5);

/// A blocking data-fetch routine, run periodically on the blocking thread pool.
pub trait Fetch: Send + Sync + 'static {
    fn fetch(&self, config: &ModuleConfig) -> FetchResult<Value>;

    fn default_interval(&self) -> Duration {
        DEFAULT_POLL_INTERVAL
    }

    /// Whether successful payloads are written to the on-disk cache, unless the module config says otherwise.
    fn persistent(&self) -> bool {
        false
    }
}

/// An event-driven routine that publishes whenever its source produces something.
///
/// The returned future should run until the source is exhausted or `cancel` fires. When it ends on its own
/// (or fails), the worker falls back to stale data and starts it again after the restart delay.
pub trait Listen: Send + Sync + 'static {
    fn listen<'a>(&'a self, config: &'a ModuleConfig, publisher: Publisher, cancel: CancellationToken) -> BoxFuture<'a, FetchResult<()>>;

    fn restart_delay(&self) -> Duration {
        DEFAULT_LISTEN_RESTART_DELAY
    }

    fn persistent(&self) -> bool {
        false
    }
}

#[derive(Clone)]
pub enum Worker {
    Poll(Arc<dyn Fetch>),
    Listen(Arc<dyn Listen>),
}

impl Worker {
    pub fn poll(fetch: impl Fetch) -> Self {
        Worker::Poll(Arc::new(fetch))
    }

    pub fn listen(listen: impl Listen) -> Self {
        Worker::Listen(Arc::new(listen))
    }

    fn persistent(&self) -> bool {
        match self {
            Worker::Poll(fetch) => fetch.persistent(),
            Worker::Listen(listen) => listen.persistent(),
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Worker::Poll(_) => write!(f, "Worker::Poll"),
            Worker::Listen(_) => write!(f, "Worker::Listen"),
        }
    }
}

/// The only way a worker touches shared state. Remembers the last good payload for the stale fallback
/// and goes quiet once its worker has been stopped.
#[derive(Clone)]
pub struct Publisher {
    key: ModuleKey,
    store: Arc<StateStore>,
    cache: Option<ModuleCache>,
    last_good: Arc<Mutex<Option<Value>>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher").field("key", &self.key).field("persistent", &self.cache.is_some()).finish()
    }
}

impl Publisher {
    fn new(key: ModuleKey, store: Arc<StateStore>, cache: Option<ModuleCache>, cancel: CancellationToken) -> Self {
        Self { key, store, cache, last_good: Arc::new(Mutex::new(None)), cancel }
    }

    pub fn key(&self) -> &ModuleKey {
        &self.key
    }

    fn last_good(&self) -> MutexGuard<'_, Option<Value>> {
        self.last_good.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish a fetch result. Non-empty values are published fresh and persisted, empty ones trigger the
    /// stale fallback.
    pub async fn publish(&self, value: Value) {
        if payload::is_empty(&value) {
            self.fall_back();
            return;
        }
        if self.cancel.is_cancelled() {
            return;
        }

        let value = payload::mark_fresh(value);
        *self.last_good() = Some(value.clone());
        self.store.update(&self.key, value.clone());

        if let Some(cache) = self.cache.clone() {
            let key = self.key.clone();
            let result = tokio::task::spawn_blocking(move || cache.store(&key, &value)).await;
            match result {
                Ok(result) => crate::print_result_err!(format!("persisting {}", self.key), result),
                Err(err) => log::error!("Cache write for {} did not complete: {}", self.key, err),
            }
        }
    }

    /// Republish the last good payload marked stale, or `null` if nothing ever succeeded.
    pub fn fall_back(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        let fallback = match self.last_good().clone() {
            Some(last_good) => payload::mark_stale(last_good),
            None => Value::Null,
        };
        self.store.update(&self.key, fallback);
    }

    /// Pick up the last good payload from a previous run: the on-disk cache if this module persists,
    /// otherwise whatever the store still holds for the key. A cached payload is shown (as stale) right away
    /// if the store has nothing yet.
    async fn seed(&self) {
        let from_cache = match self.cache.clone() {
            Some(cache) => {
                let key = self.key.clone();
                tokio::task::spawn_blocking(move || cache.load(&key)).await.ok().flatten()
            }
            None => None,
        };

        let in_store = self.store.get(&self.key).filter(|value| !payload::is_empty(value));
        match (from_cache, in_store) {
            (Some(cached), None) => {
                log::debug!("Showing cached data for {} until the first fetch completes", self.key);
                *self.last_good() = Some(cached.clone());
                if !self.cancel.is_cancelled() {
                    self.store.update(&self.key, payload::mark_stale(cached));
                }
            }
            (_, Some(current)) => {
                let mut current = (*current).clone();
                if let Value::Object(map) = &mut current {
                    map.remove(payload::STALE_FIELD);
                }
                *self.last_good() = Some(current);
            }
            (None, None) => {}
        }
    }
}

struct WorkerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    worker: Worker,
    config: ModuleConfig,
}

/// Owns the running workers, keyed by module. Starting a worker for a key that already has one replaces it.
pub struct WorkerManager {
    store: Arc<StateStore>,
    cache: Option<ModuleCache>,
    rt: Option<tokio::runtime::Runtime>,
    root_cancel: CancellationToken,
    workers: Mutex<HashMap<ModuleKey, WorkerHandle>>,
    retired: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for WorkerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerManager").field("running", &self.running_keys()).field("cache", &self.cache).finish()
    }
}

impl WorkerManager {
    /// Create a manager with its own multi-threaded runtime. `cache` enables on-disk persistence for modules that want it.
    pub fn new(store: Arc<StateStore>, cache: Option<ModuleCache>) -> Result<Self> {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("module-worker")
            .build()
            .context("Failed to initialize tokio runtime for module workers")?;
        Ok(Self {
            store,
            cache,
            rt: Some(rt),
            root_cancel: CancellationToken::new(),
            workers: Mutex::new(HashMap::new()),
            retired: Mutex::new(Vec::new()),
        })
    }

    fn workers(&self) -> MutexGuard<'_, HashMap<ModuleKey, WorkerHandle>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn retire(&self, key: &ModuleKey, handle: WorkerHandle) {
        handle.cancel.cancel();
        let mut retired = self.retired.lock().unwrap_or_else(PoisonError::into_inner);
        retired.retain(|task| !task.is_finished());
        retired.push(handle.task);
        log::debug!("Stopped worker for {}", key);
    }

    /// Start the worker for `key`, stopping the one currently running for it, if any.
    pub fn start(&self, key: ModuleKey, worker: Worker, config: ModuleConfig) {
        let Some(rt) = &self.rt else {
            log::warn!("Not starting worker for {}, the worker manager has been shut down", key);
            return;
        };

        let mut workers = self.workers();
        if let Some(previous) = workers.remove(&key) {
            self.retire(&key, previous);
        }

        let persistent = config.cache.unwrap_or_else(|| worker.persistent());
        let cache = if persistent { self.cache.clone() } else { None };
        let cancel = self.root_cancel.child_token();
        let publisher = Publisher::new(key.clone(), self.store.clone(), cache, cancel.clone());

        log::debug!("Starting {:?} for {}", worker, key);
        let task = match worker.clone() {
            Worker::Poll(fetch) => rt.spawn(run_poll_worker(fetch, config.clone(), publisher, cancel.clone())),
            Worker::Listen(listen) => rt.spawn(run_listen_worker(listen, config.clone(), publisher, cancel.clone())),
        };
        workers.insert(key, WorkerHandle { cancel, task, worker, config });
    }

    /// Stop the worker for `key`. Returns whether one was running. The task itself winds down in the background.
    pub fn stop(&self, key: &ModuleKey) -> bool {
        match self.workers().remove(key) {
            Some(handle) => {
                self.retire(key, handle);
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) {
        log::debug!("Stopping all module workers");
        let drained: Vec<_> = self.workers().drain().collect();
        for (key, handle) in drained {
            self.retire(&key, handle);
        }
    }

    /// Start the worker for `key` again with the routine and configuration it was last started with.
    pub fn restart(&self, key: &ModuleKey) -> bool {
        let previous = self.workers().get(key).map(|handle| (handle.worker.clone(), handle.config.clone()));
        match previous {
            Some((worker, config)) => {
                self.start(key.clone(), worker, config);
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, key: &ModuleKey) -> bool {
        self.workers().contains_key(key)
    }

    pub fn running_keys(&self) -> Vec<ModuleKey> {
        let mut keys: Vec<_> = self.workers().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// The configuration the worker for `key` is currently running with.
    pub fn running_config(&self, key: &ModuleKey) -> Option<ModuleConfig> {
        self.workers().get(key).map(|handle| handle.config.clone())
    }

    /// Bring the running workers in line with `config`: workers for removed modules are stopped, new and
    /// changed modules are (re)started, unchanged ones keep running. Modules that can't be built are skipped
    /// and returned alongside their error.
    pub fn apply_config(&self, registry: &ModuleRegistry, config: &BarConfig) -> Vec<(ModuleKey, RegistryError)> {
        let running = self.running_keys();
        let wanted: Vec<ModuleKey> = config.modules.keys().cloned().collect();
        let (removed, _) = crate::util::list_difference(&running, &wanted);
        for key in removed {
            self.stop(key);
        }

        let mut errors = Vec::new();
        for (key, module_config) in &config.modules {
            if self.running_config(key).as_ref() == Some(module_config) {
                continue;
            }
            match registry.create(module_config) {
                Ok(worker) => self.start(key.clone(), worker, module_config.clone()),
                Err(err) => {
                    self.stop(key);
                    errors.push((key.clone(), err));
                }
            }
        }
        errors
    }

    /// Stop every worker and wait, at most `timeout`, for all of them (including recently replaced ones) to
    /// finish, so no cache write is cut off halfway.
    pub fn shutdown(mut self, timeout: Duration) {
        self.stop_all();
        self.root_cancel.cancel();
        let Some(rt) = self.rt.take() else {
            return;
        };

        let tasks: Vec<_> = std::mem::take(&mut *self.retired.lock().unwrap_or_else(PoisonError::into_inner));
        let started = Instant::now();
        let joined = rt.block_on(async { tokio::time::timeout(timeout, futures::future::join_all(tasks)).await });
        match joined {
            Ok(results) => {
                for result in results {
                    if let Err(err) = result {
                        log::error!("Module worker ended abnormally: {}", err);
                    }
                }
                log::debug!("All module workers finished after {:?}", started.elapsed());
            }
            Err(_) => log::warn!("Module workers did not finish within {:?}, abandoning them", timeout),
        }
        rt.shutdown_timeout(timeout.saturating_sub(started.elapsed()));
    }
}

impl Drop for WorkerManager {
    fn drop(&mut self) {
        if let Some(rt) = self.rt.take() {
            self.stop_all();
            self.root_cancel.cancel();
            rt.shutdown_background();
        }
    }
}

async fn run_poll_worker(fetch: Arc<dyn Fetch>, config: ModuleConfig, publisher: Publisher, cancel: CancellationToken) {
    let interval = config.interval().unwrap_or_else(|| fetch.default_interval());
    publisher.seed().await;

    loop {
        let fetch_task = {
            let fetch = fetch.clone();
            let config = config.clone();
            tokio::task::spawn_blocking(move || fetch.fetch(&config))
        };
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = fetch_task => result,
        };

        let result = result.unwrap_or_else(|err| match err.try_into_panic() {
            Ok(panic) => Err(FetchError::Panicked(crate::util::panic_message(panic.as_ref()))),
            Err(err) => Err(FetchError::Other(err.to_string())),
        });
        match result {
            Ok(value) => publisher.publish(value).await,
            Err(err) => {
                log::warn!("Fetching {} failed: {}", publisher.key(), err);
                publisher.fall_back();
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    log::debug!("Poll worker for {} exited", publisher.key());
}

async fn run_listen_worker(listen: Arc<dyn Listen>, config: ModuleConfig, publisher: Publisher, cancel: CancellationToken) {
    let restart_delay = config.interval().unwrap_or_else(|| listen.restart_delay());
    publisher.seed().await;

    loop {
        let result = AssertUnwindSafe(listen.listen(&config, publisher.clone(), cancel.clone())).catch_unwind().await;
        if cancel.is_cancelled() {
            break;
        }
        match result {
            Ok(Ok(())) => log::info!("Listener for {} ended, restarting in {:?}", publisher.key(), restart_delay),
            Ok(Err(err)) => log::warn!("Listener for {} failed: {}", publisher.key(), err),
            Err(panic) => log::error!("Listener for {} panicked: {}", publisher.key(), crate::util::panic_message(panic.as_ref())),
        }
        publisher.fall_back();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(restart_delay) => {}
        }
    }
    log::debug!("Listen worker for {} exited", publisher.key());
}
