use std::{
    collections::HashMap,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{Context, Result};
use barstate::{
    cache::ModuleCache,
    config::{self, BarConfig},
    paths::BarPaths,
    registry::ModuleRegistry,
    Consumer, ModuleKey, StateStore, SubscriptionId, WorkerManager,
};
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// How long workers get to wind down on exit.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Renders module state as text: one json line per delivered update on stdout.
/// Owns the subscription ids of everything it shows and drops them when a module disappears.
struct TextRenderer {
    consumer: Consumer,
    subscriptions: HashMap<ModuleKey, SubscriptionId>,
}

impl TextRenderer {
    fn new(store: Arc<StateStore>) -> Self {
        Self { consumer: Consumer::new(store), subscriptions: HashMap::new() }
    }

    /// Subscribe to every module in `config` and unsubscribe from modules that are no longer there.
    fn sync_with(&mut self, config: &BarConfig) {
        let gone: Vec<ModuleKey> = self.subscriptions.keys().filter(|key| !config.modules.contains_key(*key)).cloned().collect();
        for key in gone {
            if let Some(id) = self.subscriptions.remove(&key) {
                log::debug!("No longer rendering {}", key);
                self.consumer.unsubscribe(id);
            }
        }

        for key in config.modules.keys() {
            if !self.subscriptions.contains_key(key) {
                let id = self.consumer.subscribe(key, render_line);
                self.subscriptions.insert(key.clone(), id);
            }
        }
    }
}

fn render_line(key: &ModuleKey, payload: &Value) -> Result<()> {
    let line = serde_json::to_string(&json!({ "module": key, "payload": payload }))?;
    println!("{}", line);
    Ok(())
}

pub fn run_daemon(paths: BarPaths) -> Result<()> {
    log::info!("Loading paths: {}", &paths);

    let bar_config = match config::read_from_file(paths.get_config_file()) {
        Ok(config) => config,
        Err(err) => {
            log::error!("{:?}", err);
            BarConfig::default()
        }
    };

    let registry = ModuleRegistry::with_builtins();
    let store = Arc::new(StateStore::new());
    let manager = WorkerManager::new(store.clone(), Some(ModuleCache::new(paths.get_cache_dir())))?;

    let shutdown = CancellationToken::new();
    simple_signal::set_handler(&[simple_signal::Signal::Int, simple_signal::Signal::Term], {
        let shutdown = shutdown.clone();
        move |_| {
            log::info!("Shutting down barstate daemon...");
            shutdown.cancel();
        }
    });

    log::info!("Starting {} module(s)", bar_config.modules.len());
    report_module_errors(manager.apply_config(&registry, &bar_config));

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to initialize tokio runtime for the render loop")?;

    let result: Result<()> = rt.block_on(async {
        let mut renderer = TextRenderer::new(store.clone());
        renderer.sync_with(&bar_config);
        let mut current_config = bar_config;

        let (reload_send, mut reload_recv) = tokio::sync::mpsc::unbounded_channel();
        let filewatch = {
            let config_dir = paths.get_config_dir().to_path_buf();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let result = run_filewatch(config_dir, reload_send, shutdown).await;
                barstate::print_result_err!("while watching the configuration directory", result);
            })
        };

        barstate::loop_select_cancellable! { shutdown,
            _ = renderer.consumer.dispatch_next() => {}
            Some(()) = reload_recv.recv() => {
                match config::read_from_file(paths.get_config_file()) {
                    Ok(new_config) => {
                        log::info!("Reloading configuration");
                        report_module_errors(manager.apply_config(&registry, &new_config));
                        renderer.sync_with(&new_config);
                        current_config = new_config;
                    }
                    Err(err) => log::error!("Keeping the previous configuration of {} module(s): {:?}", current_config.modules.len(), err),
                }
            }
        }

        renderer.consumer.dispatch_pending();
        let _ = filewatch.await;
        Ok(())
    });

    log::debug!("Waiting for module workers to finish");
    manager.shutdown(SHUTDOWN_TIMEOUT);
    log::info!("barstate daemon stopped");
    result
}

fn report_module_errors(errors: Vec<(ModuleKey, barstate::error::RegistryError)>) {
    for (key, err) in errors {
        log::error!("Module {} could not be started: {}", key, err);
    }
}

/// Watch the configuration directory, sending reload events when the config file changes.
async fn run_filewatch<P: AsRef<Path>>(config_dir: P, evt_send: UnboundedSender<()>, shutdown: CancellationToken) -> Result<()> {
    use notify::{RecommendedWatcher, RecursiveMode, Watcher};

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut watcher: RecommendedWatcher = Watcher::new(
        move |res: notify::Result<notify::Event>| match res {
            Ok(notify::Event { kind: notify::EventKind::Modify(_) | notify::EventKind::Create(_), paths, .. }) => {
                let relevant_files_changed = paths.iter().any(|path| path.extension().unwrap_or_default() == "json");
                if relevant_files_changed {
                    if let Err(err) = tx.send(()) {
                        log::warn!("Error forwarding file update event: {:?}", err);
                    }
                }
            }
            Ok(_) => {}
            Err(e) => log::error!("Encountered Error While Watching Files: {}", e),
        },
        notify::Config::default(),
    )?;
    watcher.watch(config_dir.as_ref(), RecursiveMode::NonRecursive)?;

    // make sure to not trigger reloads too much by only accepting one reload every 500ms.
    let debounce_done = Arc::new(AtomicBool::new(true));

    barstate::loop_select_cancellable! { shutdown,
        Some(()) = rx.recv() => {
            let debounce_done = debounce_done.clone();
            if debounce_done.swap(false, Ordering::SeqCst) {
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    debounce_done.store(true, Ordering::SeqCst);
                });
                // editors tend to truncate before writing, give them a moment to finish
                tokio::time::sleep(Duration::from_millis(50)).await;
                evt_send.send(())?;
            }
        },
        else => break
    };
    Ok(())
}

/// Print the persisted payload of a module, if there is one.
pub fn print_cached(paths: &BarPaths, module: &ModuleKey) -> Result<()> {
    let cache = ModuleCache::new(paths.get_cache_dir());
    match cache.load(module) {
        Some(payload) => println!("{}", serde_json::to_string_pretty(&payload)?),
        None => println!("No cached data for {} in {}", module, cache.dir().display()),
    }
    Ok(())
}

pub fn print_modules(paths: &BarPaths) -> Result<()> {
    let bar_config = config::read_from_file(paths.get_config_file())?;
    let registry = ModuleRegistry::with_builtins();
    for (key, module_config) in &bar_config.modules {
        match registry.create(module_config) {
            Ok(worker) => println!("{} ({}, {:?})", key, module_config.module_type, worker),
            Err(err) => println!("{} ({}): {}", key, module_config.module_type, err),
        }
    }
    Ok(())
}
