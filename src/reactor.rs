//! Orchestrator: builds alerts and handlers from the options, runs them and
//! routes their notifications

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::alerts::{Alert, AlertMonitor, Level, NotificationEvent};
use crate::config::Options;
use crate::handlers::{Handler, HandlerError, HandlerRegistry};
use crate::sources::SourceRegistry;
use crate::units::InvalidDuration;

type AlertTable = DashMap<(String, String), Arc<AlertMonitor>>;

/// Active handlers per level and the time each delivery may take
#[derive(Default)]
struct HandlerTable {
    by_level: HashMap<Level, Vec<Arc<dyn Handler>>>,
    timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum ReactorError {
    #[error("No alerts could be loaded from the configuration")]
    NoAlerts,

    #[error("Invalid repeat_interval: {0}")]
    RepeatInterval(#[from] InvalidDuration),

    #[error("repeat_interval must be positive")]
    ZeroRepeatInterval,

    #[error("request_timeout must be a positive number of seconds, got {0}")]
    RequestTimeout(f64),

    #[error("Failed to write pidfile {path}: {source}")]
    Pidfile {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Delivery counters
#[derive(Debug, Default)]
pub struct NotifyStats {
    events: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl NotifyStats {
    pub fn events(&self) -> u64 {
        self.events.load(Ordering::Relaxed)
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

pub struct Reactor {
    options: RwLock<Options>,
    sources: SourceRegistry,
    registry: Mutex<HandlerRegistry>,
    handlers: Arc<RwLock<HandlerTable>>,
    alerts: Arc<AlertTable>,
    repeat_interval: RwLock<Duration>,
    events_tx: mpsc::UnboundedSender<NotificationEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<NotificationEvent>>>,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
    dispatcher: Mutex<Option<JoinHandle<mpsc::UnboundedReceiver<NotificationEvent>>>>,
    repeater: Mutex<Option<JoinHandle<()>>>,
    initialized: AtomicBool,
    running: AtomicBool,
    stats: Arc<NotifyStats>,
}

impl Reactor {
    /// Reactor with the built-in sources and handlers
    pub fn new(options: Options) -> Result<Self, ReactorError> {
        Self::with_registries(
            options,
            SourceRegistry::with_defaults(),
            HandlerRegistry::with_defaults(),
        )
    }

    pub fn with_registries(
        options: Options,
        sources: SourceRegistry,
        handlers: HandlerRegistry,
    ) -> Result<Self, ReactorError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let reactor = Self {
            repeat_interval: RwLock::new(repeat_period(&options)?),
            options: RwLock::new(options.clone()),
            sources,
            registry: Mutex::new(handlers),
            handlers: Arc::new(RwLock::new(HandlerTable::default())),
            alerts: Arc::new(DashMap::new()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            shutdown_tx: Mutex::new(None),
            dispatcher: Mutex::new(None),
            repeater: Mutex::new(None),
            initialized: AtomicBool::new(false),
            running: AtomicBool::new(false),
            stats: Arc::new(NotifyStats::default()),
        };
        reactor.reinit(options)?;
        Ok(reactor)
    }

    /// Apply new options: rebuild handlers, replace every alert. Returns
    /// the number of alerts loaded. On an invalid `repeat_interval` or
    /// `request_timeout` the current setup is kept.
    pub fn reinit(&self, options: Options) -> Result<usize, ReactorError> {
        tracing::info!("Read configuration");
        let repeat_interval = repeat_period(&options)?;
        let timeout = handler_timeout(&options)?;

        self.reinit_handlers(&options, timeout);

        for entry in self.alerts.iter() {
            entry.value().stop();
        }
        self.alerts.clear();

        let mut loaded = 0;
        for config in &options.alerts {
            let monitor = Alert::from_config(config, &options).and_then(|alert| {
                let source = self.sources.build(&alert, config, &options)?;
                Ok(AlertMonitor::new(alert, source, self.events_tx.clone()).with_debug(options.debug))
            });

            let monitor = match monitor {
                Ok(monitor) => Arc::new(monitor),
                Err(e) => {
                    tracing::error!(error = %e, "Invalid alert configuration");
                    continue;
                }
            };

            let key = monitor.alert().key();
            if self.alerts.contains_key(&key) {
                tracing::warn!(alert = %monitor.alert(), "Duplicate alert, skipping");
                continue;
            }

            tracing::info!(alert = %monitor.alert(), "Alert loaded");
            self.alerts.insert(key, monitor);
            loaded += 1;
        }

        let first_boot = !self.initialized.load(Ordering::Acquire);
        if first_boot && loaded == 0 && !options.alerts.is_empty() {
            return Err(ReactorError::NoAlerts);
        }
        self.initialized.store(true, Ordering::Release);

        if self.is_running() {
            for entry in self.alerts.iter() {
                entry.value().start();
            }
        }

        *self.repeat_interval.write() = repeat_interval;
        *self.options.write() = options;
        tracing::debug!(alerts = loaded, "Configuration applied");
        Ok(loaded)
    }

    fn reinit_handlers(&self, options: &Options, timeout: Duration) {
        let mut registry = self.registry.lock();
        registry.clear();

        let mut table = HandlerTable {
            by_level: HashMap::new(),
            timeout,
        };
        for level in Level::ALL {
            let mut handlers = Vec::new();
            for name in options.handlers_for(level) {
                match registry.get(name, options) {
                    Ok(handler) => handlers.push(handler),
                    Err(e) => {
                        tracing::error!(handler = %name, level = %level, error = %e, "Handler init failed")
                    }
                }
            }
            table.by_level.insert(level, handlers);
        }
        *self.handlers.write() = table;
    }

    /// Start alerts, notification dispatch and the repeat timer
    pub fn start(&self) -> Result<(), ReactorError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let pidfile = self.options.read().pidfile.clone();
        if let Some(path) = pidfile {
            if let Err(source) = std::fs::write(&path, std::process::id().to_string()) {
                self.running.store(false, Ordering::Release);
                return Err(ReactorError::Pidfile { path, source });
            }
        }
        tracing::info!(alerts = self.alerts.len(), "Reactor starting");

        for entry in self.alerts.iter() {
            entry.value().start();
        }

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        *self.shutdown_tx.lock() = Some(shutdown_tx);

        let events_rx = self.events_rx.lock().take();
        if let Some(events_rx) = events_rx {
            let handle = tokio::spawn(dispatch_loop(
                events_rx,
                shutdown_rx,
                Arc::clone(&self.handlers),
                Arc::clone(&self.stats),
            ));
            *self.dispatcher.lock() = Some(handle);
        }

        let period = *self.repeat_interval.read();
        let alerts = Arc::clone(&self.alerts);
        let repeater = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                reset_all(&alerts);
            }
        });
        *self.repeater.lock() = Some(repeater);

        Ok(())
    }

    /// Stop every alert and timer. Pending notifications are delivered
    /// before the dispatcher exits.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        tracing::info!("Reactor stopping");

        for entry in self.alerts.iter() {
            entry.value().stop();
        }

        let repeater = self.repeater.lock().take();
        if let Some(handle) = repeater {
            handle.abort();
        }

        let shutdown_tx = self.shutdown_tx.lock().take();
        if let Some(tx) = shutdown_tx {
            let _ = tx.send(()).await;
        }

        let dispatcher = self.dispatcher.lock().take();
        if let Some(handle) = dispatcher {
            match handle.await {
                Ok(events_rx) => *self.events_rx.lock() = Some(events_rx),
                Err(e) => tracing::error!(error = %e, "Dispatcher task failed"),
            }
        }

        let pidfile = self.options.read().pidfile.clone();
        if let Some(path) = pidfile {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove pidfile");
            }
        }
    }

    /// Clear dedup state of every alert
    pub fn repeat(&self) {
        reset_all(&self.alerts);
    }

    /// Deliver one event to the handlers of its level
    pub async fn notify(&self, event: &NotificationEvent) {
        deliver(&self.handlers, &self.stats, event).await;
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Every loaded alert
    pub fn alerts(&self) -> Vec<Arc<AlertMonitor>> {
        self.alerts.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    pub fn alert(&self, name: &str, source: &str) -> Option<Arc<AlertMonitor>> {
        self.alerts
            .get(&(name.to_string(), source.to_string()))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Names of the active handlers for a level
    pub fn handlers_for(&self, level: Level) -> Vec<String> {
        self.handlers
            .read()
            .by_level
            .get(&level)
            .map(|handlers| handlers.iter().map(|h| h.name().to_string()).collect())
            .unwrap_or_default()
    }

    pub fn options(&self) -> Options {
        self.options.read().clone()
    }

    pub fn stats(&self) -> &NotifyStats {
        &self.stats
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        if let Some(handle) = self.repeater.get_mut().take() {
            handle.abort();
        }
    }
}

/// Validated `repeat_interval`
fn repeat_period(options: &Options) -> Result<Duration, ReactorError> {
    let period = options.repeat_interval.to_interval()?.as_std()?;
    if period.is_zero() {
        return Err(ReactorError::ZeroRepeatInterval);
    }
    Ok(period)
}

/// Upper bound for one handler delivery
fn handler_timeout(options: &Options) -> Result<Duration, ReactorError> {
    Duration::try_from_secs_f64(options.request_timeout)
        .ok()
        .filter(|timeout| !timeout.is_zero())
        .ok_or(ReactorError::RequestTimeout(options.request_timeout))
}

fn reset_all(alerts: &AlertTable) {
    tracing::info!("Reset alerts");
    for entry in alerts.iter() {
        entry.value().reset();
    }
}

async fn dispatch_loop(
    mut events: mpsc::UnboundedReceiver<NotificationEvent>,
    mut shutdown: mpsc::Receiver<()>,
    handlers: Arc<RwLock<HandlerTable>>,
    stats: Arc<NotifyStats>,
) -> mpsc::UnboundedReceiver<NotificationEvent> {
    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                deliver(&handlers, &stats, &event).await;
            }
            _ = shutdown.recv() => {
                while let Ok(event) = events.try_recv() {
                    deliver(&handlers, &stats, &event).await;
                }
                tracing::info!("Dispatcher shutting down");
                break;
            }
        }
    }
    events
}

async fn deliver(handlers: &RwLock<HandlerTable>, stats: &NotifyStats, event: &NotificationEvent) {
    stats.events.fetch_add(1, Ordering::Relaxed);
    tracing::info!(
        level = %event.level,
        alert = %event.alert,
        target = %event.target,
        value = %event.value_text(),
        "Notify"
    );

    let (targets, timeout) = {
        let table = handlers.read();
        let targets: Vec<Arc<dyn Handler>> =
            table.by_level.get(&event.level).cloned().unwrap_or_default();
        (targets, table.timeout)
    };

    let results = join_all(targets.iter().map(|handler| async move {
        let result = match tokio::time::timeout(timeout, handler.notify(event)).await {
            Ok(result) => result,
            Err(_) => Err(HandlerError::Timeout(timeout)),
        };
        (handler.name().to_string(), result)
    }))
    .await;

    for (name, result) in results {
        match result {
            Ok(()) => {
                stats.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(handler = %name, alert = %event.alert.name, error = %e, "Notification failed");
            }
        }
    }
}
