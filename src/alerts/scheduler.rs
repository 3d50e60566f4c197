//! Per-alert poll loop
//!
//! Each [`AlertMonitor`] owns one timer task. Every firing spawns a load;
//! an atomic guard keeps loads of the same alert from overlapping.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::state::{AlertState, EventValue, NotificationEvent, NotificationKind, LOADING, WAITING};
use super::{Alert, History, Level};
use crate::config::IntervalSpec;
use crate::sources::{Sample, Source};
use crate::units::{Interval, InvalidDuration};

/// Poll period used for every alert when `debug` is on
pub const DEBUG_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScheduleError {
    #[error(transparent)]
    Duration(#[from] InvalidDuration),

    #[error("Poll interval must be positive")]
    Zero,

    #[error("Poll interval {0} is too large")]
    TooLarge(Interval),

    #[error("Invalid cron expression {expr:?}: {reason}")]
    Cron { expr: String, reason: String },
}

/// Prepend a seconds field to 5-field expressions; the `cron` crate wants 6
pub fn normalize_cron(expr: &str) -> String {
    let trimmed = expr.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    }
}

/// When an alert fires
#[derive(Debug, Clone)]
pub enum Schedule {
    Every {
        interval: Interval,
        /// Timer period, at least one nanosecond
        period: Duration,
    },
    Cron {
        expr: String,
        schedule: Box<cron::Schedule>,
        /// Gap between the next two firings
        period: Interval,
    },
}

impl Schedule {
    pub fn parse(spec: &IntervalSpec) -> Result<Self, ScheduleError> {
        let IntervalSpec::Text(expr) = spec else {
            return Self::every(spec.to_interval()?);
        };
        if !spec.is_cron() {
            return Self::every(Interval::parse(expr)?);
        }

        let cron_error = |reason: String| ScheduleError::Cron {
            expr: expr.clone(),
            reason,
        };
        let schedule = cron::Schedule::from_str(&normalize_cron(expr))
            .map_err(|e| cron_error(e.to_string()))?;

        let mut upcoming = schedule.upcoming(Utc);
        let (Some(first), Some(second)) = (upcoming.next(), upcoming.next()) else {
            return Err(cron_error("never fires".to_string()));
        };
        let millis = (second - first).num_milliseconds();
        let period = Interval::from_secs_f64(millis as f64 / 1000.0)?;

        Ok(Schedule::Cron {
            expr: expr.trim().to_string(),
            schedule: Box::new(schedule),
            period,
        })
    }

    fn every(interval: Interval) -> Result<Self, ScheduleError> {
        let period = interval
            .as_std()
            .map_err(|_| ScheduleError::TooLarge(interval))?;
        if period.is_zero() {
            return Err(ScheduleError::Zero);
        }
        Ok(Schedule::Every { interval, period })
    }

    /// Fixed [`DEBUG_PERIOD`] schedule
    pub fn debug() -> Self {
        Schedule::Every {
            interval: Interval::from(DEBUG_PERIOD),
            period: DEBUG_PERIOD,
        }
    }

    pub fn is_cron(&self) -> bool {
        matches!(self, Schedule::Cron { .. })
    }

    pub fn period(&self) -> Interval {
        match self {
            Schedule::Every { interval, .. } => *interval,
            Schedule::Cron { period, .. } => *period,
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Every { interval, .. } => write!(f, "{interval}"),
            Schedule::Cron { expr, .. } => f.write_str(expr),
        }
    }
}

/// Holds the single-flight flag for the duration of one load
struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A running alert: its source, its state and its timer
pub struct AlertMonitor {
    alert: Arc<Alert>,
    source: Arc<dyn Source>,
    state: Mutex<AlertState>,
    in_flight: AtomicBool,
    /// Set by `stop`; results of loads finishing afterwards are dropped
    retired: AtomicBool,
    debug: bool,
    events: mpsc::UnboundedSender<NotificationEvent>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl AlertMonitor {
    pub fn new(
        alert: Alert,
        source: Arc<dyn Source>,
        events: mpsc::UnboundedSender<NotificationEvent>,
    ) -> Self {
        Self {
            state: Mutex::new(AlertState::new(alert.history_size)),
            alert: Arc::new(alert),
            source,
            in_flight: AtomicBool::new(false),
            retired: AtomicBool::new(false),
            debug: false,
            events,
            timer: Mutex::new(None),
        }
    }

    /// Poll every [`DEBUG_PERIOD`] instead of the alert's schedule
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// The compiled alert this monitor drives
    pub fn alert(&self) -> &Arc<Alert> {
        &self.alert
    }

    /// Whether the timer is active
    pub fn is_running(&self) -> bool {
        self.timer.lock().is_some()
    }

    /// Load once now and keep loading on schedule
    pub fn start(self: &Arc<Self>) {
        self.retired.store(false, Ordering::Release);

        let schedule = if self.debug {
            Schedule::debug()
        } else {
            self.alert.schedule.clone()
        };

        tracing::debug!(alert = %self.alert, "Start alert");
        let handle = tokio::spawn(run_timer(Arc::downgrade(self), schedule));
        if let Some(previous) = self.timer.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Cancel the timer. A load already running finishes but its result is
    /// dropped.
    pub fn stop(&self) {
        self.retired.store(true, Ordering::Release);
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
        }
        tracing::debug!(alert = %self.alert, "Stop alert");
    }

    fn fire(self: Arc<Self>) {
        tokio::spawn(async move { self.load().await });
    }

    /// One fetch-and-check cycle
    pub async fn load(&self) {
        let Some(_guard) = FlightGuard::acquire(&self.in_flight) else {
            tracing::warn!(alert = %self.alert, "Previous load is still running");
            let event = self.state.lock().transition(
                &self.alert,
                Level::Warning,
                EventValue::Message("Process takes too much time".to_string()),
                WAITING,
                NotificationKind::Common,
                None,
            );
            self.emit(event);
            return;
        };

        tracing::debug!(alert = %self.alert, "Load");
        let result = self.source.load().await;

        if self.retired.load(Ordering::Acquire) {
            tracing::debug!(alert = %self.alert, "Alert stopped, discarding load result");
            return;
        }

        let outcome = match result {
            Ok(samples) if samples.is_empty() => Err("No data".to_string()),
            Ok(samples) => Ok(samples),
            Err(e) => Err(e.to_string()),
        };

        let events = match outcome {
            Ok(samples) => {
                let mut state = self.state.lock();
                let mut events = state.check(&self.alert, &samples);
                events.extend(state.transition(
                    &self.alert,
                    Level::Normal,
                    EventValue::Message("Metrics are loaded".to_string()),
                    LOADING,
                    NotificationKind::Common,
                    None,
                ));
                events
            }
            Err(reason) => {
                tracing::error!(alert = %self.alert, error = %reason, "Loading error");
                let event = self.state.lock().transition(
                    &self.alert,
                    self.alert.loading_error,
                    EventValue::Message(format!("Loading error: {reason}")),
                    LOADING,
                    NotificationKind::Common,
                    None,
                );
                event.into_iter().collect()
            }
        };

        for event in events {
            self.emit(Some(event));
        }
    }

    /// Feed samples straight into the state machine
    pub fn check(&self, samples: &[Sample]) {
        let events = self.state.lock().check(&self.alert, samples);
        for event in events {
            self.emit(Some(event));
        }
    }

    /// Clear dedup state so unresolved faults notify again
    pub fn reset(&self) {
        self.state.lock().reset();
    }

    /// Last notified level of a target
    pub fn level(&self, target: &str) -> Option<Level> {
        self.state.lock().level(target)
    }

    /// Snapshot of a target's history
    pub fn history(&self, target: &str) -> Option<History> {
        self.state.lock().history(target).cloned()
    }

    fn emit(&self, event: Option<NotificationEvent>) {
        let Some(event) = event else {
            return;
        };
        if self.events.send(event).is_err() {
            tracing::debug!(alert = %self.alert, "Notification channel closed");
        }
    }
}

impl Drop for AlertMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.get_mut().take() {
            handle.abort();
        }
    }
}

async fn run_timer(monitor: Weak<AlertMonitor>, schedule: Schedule) {
    match schedule {
        Schedule::Every { period, .. } => {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(monitor) = monitor.upgrade() else {
                    break;
                };
                monitor.fire();
            }
        }
        Schedule::Cron { schedule, .. } => {
            let Some(first) = monitor.upgrade() else {
                return;
            };
            first.fire();

            // firings are placed on the runtime clock relative to one wall-clock origin
            let origin = Utc::now();
            let started = Instant::now();
            for next in schedule.after(&origin) {
                let offset = (next - origin).to_std().unwrap_or(Duration::ZERO);
                tokio::time::sleep_until(started + offset).await;
                let Some(monitor) = monitor.upgrade() else {
                    break;
                };
                monitor.fire();
            }
            tracing::info!("Cron schedule exhausted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AlertConfig, Options};
    use crate::sources::fetch::testing::ScriptedFetcher;
    use crate::sources::{GraphiteSource, TransportError};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn monitor(
        config: AlertConfig,
        fetcher: Arc<ScriptedFetcher>,
    ) -> (Arc<AlertMonitor>, UnboundedReceiver<NotificationEvent>) {
        let options = Options::default();
        let alert = Alert::from_config(&config, &options).unwrap();
        let source = GraphiteSource::new(&alert, &config, &options, fetcher).unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(AlertMonitor::new(alert, Arc::new(source), tx)), rx)
    }

    fn config() -> AlertConfig {
        AlertConfig::new("cpu", "*.cpu", ["critical: > 100", "warning: > 50"]).with_interval("1minute")
    }

    fn drain(rx: &mut UnboundedReceiver<NotificationEvent>) -> Vec<(Level, String)> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push((event.level, event.target));
        }
        out
    }

    #[test]
    fn test_normalize_cron() {
        assert_eq!(normalize_cron("*/5 * * * *"), "0 */5 * * * *");
        assert_eq!(normalize_cron(" 30 0 9 * * * "), "30 0 9 * * *");
    }

    #[test]
    fn test_schedule_parse() {
        let every = Schedule::parse(&IntervalSpec::text("30second")).unwrap();
        assert!(!every.is_cron());
        assert_eq!(every.period(), Interval::parse("30s").unwrap());
        assert!(matches!(every, Schedule::Every { period, .. } if period == Duration::from_secs(30)));

        let hourly = Schedule::parse(&IntervalSpec::text("0 * * * *")).unwrap();
        assert!(hourly.is_cron());
        assert_eq!(hourly.period(), Interval::parse("1hour").unwrap());

        assert!(matches!(
            Schedule::parse(&IntervalSpec::text("0 * * * * * * *")),
            Err(ScheduleError::Duration(_))
        ));
        assert!(matches!(
            Schedule::parse(&IntervalSpec::text("61 * * * *")),
            Err(ScheduleError::Cron { .. })
        ));
        assert_eq!(
            Schedule::parse(&IntervalSpec::Seconds(0.0)).unwrap_err(),
            ScheduleError::Zero
        );
    }

    #[test]
    fn test_schedule_rejects_unusable_periods() {
        for text in ["0second", "0.0000000001ms", "0.5ns"] {
            let result = Schedule::parse(&IntervalSpec::text(text));
            assert!(
                matches!(result, Err(ScheduleError::Zero) | Err(ScheduleError::Duration(_))),
                "{text:?} should be rejected"
            );
        }
        assert_eq!(
            Schedule::parse(&IntervalSpec::text("0.0000000001ms")).unwrap_err(),
            ScheduleError::Zero
        );
        assert!(matches!(
            Schedule::parse(&IntervalSpec::text("600000000000year")),
            Err(ScheduleError::TooLarge(_))
        ));
        assert!(matches!(
            Schedule::parse(&IntervalSpec::Seconds(1e30)),
            Err(ScheduleError::TooLarge(_))
        ));
        assert!(Schedule::parse(&IntervalSpec::text("1ms")).is_ok());
    }

    #[test]
    fn test_debug_schedule() {
        let debug = Schedule::debug();
        assert!(!debug.is_cron());
        assert_eq!(debug.to_string(), "5second");
    }

    #[tokio::test]
    async fn test_load_without_start_is_processed() {
        let (monitor, mut rx) = monitor(config(), Arc::new(ScriptedFetcher::body("a,1,2,60|120\n")));
        assert!(!monitor.is_running());

        monitor.load().await;
        assert_eq!(drain(&mut rx), vec![(Level::Critical, "a".to_string())]);
        assert_eq!(monitor.level("a"), Some(Level::Critical));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cron_timer_fires_immediately_then_on_schedule() {
        let fetcher = Arc::new(ScriptedFetcher::body("a,1,2,60|1\n"));
        let mut config = config();
        config.interval = Some(IntervalSpec::text("0 * * * *"));
        let (monitor, _rx) = monitor(config, fetcher.clone());
        assert!(monitor.alert().schedule.is_cron());

        monitor.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fetcher.calls(), 1);

        // the next top of the hour is at most an hour away
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(fetcher.calls(), 2);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(fetcher.calls(), 3);

        monitor.stop();
        assert!(!monitor.is_running());
    }

    #[tokio::test]
    async fn test_load_checks_and_reports_loading() {
        let fetcher = Arc::new(ScriptedFetcher::bodies(&[
            "a,1,2,60|120\nb,1,2,60|10\n",
            "not a record",
            "a,1,2,60|120\nb,1,2,60|10\n",
        ]));
        let (monitor, mut rx) = monitor(config(), fetcher);

        monitor.load().await;
        assert_eq!(drain(&mut rx), vec![(Level::Critical, "a".to_string())]);
        assert_eq!(monitor.level(LOADING), Some(Level::Normal));

        monitor.load().await;
        assert_eq!(drain(&mut rx), vec![(Level::Critical, LOADING.to_string())]);

        monitor.load().await;
        assert_eq!(drain(&mut rx), vec![(Level::Normal, LOADING.to_string())]);
        assert_eq!(monitor.history("a").unwrap().to_vec(), vec![120.0, 120.0]);
    }

    #[tokio::test]
    async fn test_loading_error_message() {
        let fetcher = Arc::new(ScriptedFetcher::failing(TransportError::Timeout("20s".into())));
        let mut config = config();
        config.loading_error = Some(Level::Warning);
        let (monitor, mut rx) = monitor(config, fetcher);

        monitor.load().await;
        let event = rx.try_recv().unwrap();
        assert_eq!(event.level, Level::Warning);
        assert_eq!(event.target, LOADING);
        assert_eq!(event.kind, NotificationKind::Common);
        assert_eq!(
            event.value,
            EventValue::Message("Loading error: Request timed out: 20s".into())
        );
    }

    #[tokio::test]
    async fn test_empty_response_is_loading_error() {
        let (monitor, mut rx) = monitor(config(), Arc::new(ScriptedFetcher::body("")));

        monitor.load().await;
        let event = rx.try_recv().unwrap();
        assert_eq!(event.target, LOADING);
        assert_eq!(event.value, EventValue::Message("Loading error: No data".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_flight() {
        let fetcher = Arc::new(
            ScriptedFetcher::body("a,1,2,60|1\n").with_delay(Duration::from_secs(30)),
        );
        let (monitor, mut rx) = monitor(config(), fetcher.clone());

        tokio::join!(monitor.load(), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            monitor.load().await;
        });

        assert_eq!(fetcher.calls(), 1);
        let events = drain(&mut rx);
        assert_eq!(events, vec![(Level::Warning, WAITING.to_string())]);

        // guard released
        monitor.load().await;
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_immediately_and_periodically() {
        let fetcher = Arc::new(ScriptedFetcher::body("a,1,2,60|1\n"));
        let (monitor, _rx) = monitor(config(), fetcher.clone());

        monitor.start();
        assert!(monitor.is_running());
        tokio::time::sleep(Duration::from_secs(150)).await;
        assert_eq!(fetcher.calls(), 3);

        monitor.stop();
        assert!(!monitor.is_running());
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debug_period() {
        let fetcher = Arc::new(ScriptedFetcher::body("a,1,2,60|1\n"));
        let options = Options::default();
        let config = config();
        let alert = Alert::from_config(&config, &options).unwrap();
        let source = GraphiteSource::new(&alert, &config, &options, fetcher.clone()).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let monitor = Arc::new(AlertMonitor::new(alert, Arc::new(source), tx).with_debug(true));

        monitor.start();
        tokio::time::sleep(Duration::from_secs(12)).await;
        monitor.stop();
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_discards_in_flight_result() {
        let fetcher = Arc::new(
            ScriptedFetcher::body("a,1,2,60|120\n").with_delay(Duration::from_secs(10)),
        );
        let (monitor, mut rx) = monitor(config(), fetcher.clone());

        monitor.start();
        tokio::time::sleep(Duration::from_secs(1)).await;
        monitor.stop();
        tokio::time::sleep(Duration::from_secs(20)).await;

        assert_eq!(fetcher.calls(), 1);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(monitor.level("a"), None);
    }

    #[test]
    fn test_check_and_reset() {
        let (monitor, mut rx) = monitor(config(), Arc::new(ScriptedFetcher::body("")));

        monitor.check(&[Sample::new(Some(120.0), "a")]);
        monitor.check(&[Sample::new(Some(130.0), "a")]);
        assert_eq!(drain(&mut rx), vec![(Level::Critical, "a".to_string())]);

        monitor.reset();
        monitor.check(&[Sample::new(Some(130.0), "a")]);
        assert_eq!(drain(&mut rx), vec![(Level::Critical, "a".to_string())]);
    }
}
