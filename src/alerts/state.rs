//! Per-target alert state machine
//!
//! Every target keeps its last notified level and a bounded history of raw
//! values. A notification is produced only when a target's level changes.
//! The pseudo-targets [`WAITING`] and [`LOADING`] carry scheduling and
//! transport health through the same path.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::{Alert, History, Level};
use crate::rules::{first_match, Rule};
use crate::sources::Sample;
use crate::units::format_value;

/// Raised while a previous load of the same alert is still running
pub const WAITING: &str = "waiting";
/// Raised when a load fails or returns nothing
pub const LOADING: &str = "loading";

/// What a notification reports
#[derive(Debug, Clone, PartialEq)]
pub enum EventValue {
    Number(f64),
    NoData,
    Message(String),
}

/// Whether the target came from the alert's source or is a pseudo-target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Source,
    Common,
}

/// A level change of one target, handed to the handlers
#[derive(Debug, Clone)]
pub struct NotificationEvent {
    pub level: Level,
    pub alert: Arc<Alert>,
    pub value: EventValue,
    pub target: String,
    pub kind: NotificationKind,
    pub rule: Option<Rule>,
    pub timestamp: DateTime<Utc>,
}

impl NotificationEvent {
    /// Value rendered with the alert's format
    pub fn value_text(&self) -> String {
        match &self.value {
            EventValue::Number(v) => format_value(*v, self.alert.format),
            EventValue::NoData => "no data".to_string(),
            EventValue::Message(message) => message.clone(),
        }
    }

    /// Source tag for source targets, `common` for pseudo-targets
    pub fn kind_name(&self) -> &str {
        match self.kind {
            NotificationKind::Source => &self.alert.source,
            NotificationKind::Common => "common",
        }
    }

    pub fn graph_url(&self) -> Option<String> {
        match self.kind {
            NotificationKind::Source => self.alert.graph_url(&self.target),
            NotificationKind::Common => None,
        }
    }
}

impl fmt::Display for NotificationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {}: {}",
            self.level.as_str().to_uppercase(),
            self.alert.name,
            self.target,
            self.value_text()
        )
    }
}

#[derive(Debug, Clone)]
pub struct AlertState {
    levels: HashMap<String, Level>,
    history: HashMap<String, History>,
    history_size: usize,
}

impl AlertState {
    pub fn new(history_size: usize) -> Self {
        let levels = HashMap::from([
            (WAITING.to_string(), Level::Normal),
            (LOADING.to_string(), Level::Normal),
        ]);
        Self {
            levels,
            history: HashMap::new(),
            history_size,
        }
    }

    /// Evaluate one batch of samples and return the resulting notifications
    pub fn check(&mut self, alert: &Arc<Alert>, samples: &[Sample]) -> Vec<NotificationEvent> {
        let mut events = Vec::new();

        for sample in samples {
            tracing::info!(
                alert = %alert.name,
                target = %sample.target,
                value = ?sample.value,
                "Check"
            );

            let Some(value) = sample.value else {
                events.extend(self.transition(
                    alert,
                    alert.no_data,
                    EventValue::NoData,
                    &sample.target,
                    NotificationKind::Source,
                    None,
                ));
                continue;
            };

            let rule = first_match(&alert.rules, value, self.history.get(&sample.target)).cloned();
            let level = rule.as_ref().map_or(Level::Normal, Rule::level);
            events.extend(self.transition(
                alert,
                level,
                EventValue::Number(value),
                &sample.target,
                NotificationKind::Source,
                rule,
            ));

            let capacity = self.history_size;
            self.history
                .entry(sample.target.clone())
                .or_insert_with(|| History::new(capacity))
                .push(value);
        }

        events
    }

    /// Record `level` for `target` and build the notification, unless the
    /// level is unchanged or this is a first-seen normal target.
    pub fn transition(
        &mut self,
        alert: &Arc<Alert>,
        level: Level,
        value: EventValue,
        target: &str,
        kind: NotificationKind,
        rule: Option<Rule>,
    ) -> Option<NotificationEvent> {
        match self.levels.get(target) {
            Some(previous) if *previous == level => return None,
            None if level == Level::Normal && !alert.send_initial => return None,
            _ => {}
        }

        self.levels.insert(target.to_string(), level);
        Some(NotificationEvent {
            level,
            alert: Arc::clone(alert),
            value,
            target: target.to_string(),
            kind,
            rule,
            timestamp: Utc::now(),
        })
    }

    /// Every known target back to normal so unresolved faults re-alert.
    /// History is kept.
    pub fn reset(&mut self) {
        for level in self.levels.values_mut() {
            *level = Level::Normal;
        }
    }

    pub fn level(&self, target: &str) -> Option<Level> {
        self.levels.get(target).copied()
    }

    pub fn history(&self, target: &str) -> Option<&History> {
        self.history.get(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AlertConfig, Options};

    fn alert(config: AlertConfig) -> Arc<Alert> {
        Arc::new(Alert::from_config(&config, &Options::default()).unwrap())
    }

    fn scenario_alert() -> Arc<Alert> {
        alert(
            AlertConfig::new(
                "multimetrics",
                "*",
                ["critical: > 100", "warning: > 50", "warning: < historical / 2"],
            )
            .with_history_size("40m"),
        )
    }

    fn samples(values: &[(f64, &str)]) -> Vec<Sample> {
        values.iter().map(|(v, t)| Sample::new(Some(*v), *t)).collect()
    }

    fn summary(events: &[NotificationEvent]) -> Vec<(Level, String)> {
        events.iter().map(|e| (e.level, e.target.clone())).collect()
    }

    #[test]
    fn test_scenario_first_and_second_cycle() {
        let alert = scenario_alert();
        let mut state = AlertState::new(alert.history_size);

        let events = state.check(&alert, &samples(&[(110.0, "m1"), (60.0, "m2"), (30.0, "m3")]));
        assert_eq!(
            summary(&events),
            vec![
                (Level::Critical, "m1".to_string()),
                (Level::Warning, "m2".to_string())
            ]
        );
        assert_eq!(events[0].rule.as_ref().unwrap().raw(), "critical: > 100");
        assert_eq!(events[0].value, EventValue::Number(110.0));
        assert_eq!(state.level("m3"), None);

        let events = state.check(&alert, &samples(&[(60.0, "m1"), (60.0, "m2"), (30.0, "m3")]));
        assert_eq!(summary(&events), vec![(Level::Warning, "m1".to_string())]);
        assert_eq!(state.level("m2"), Some(Level::Warning));
    }

    #[test]
    fn test_historical_rule_over_full_cycle() {
        let alert = scenario_alert();
        let mut state = AlertState::new(alert.history_size);
        assert_eq!(alert.history_size, 4);

        let cycles: [[(f64, &str); 3]; 4] = [
            [(110.0, "m1"), (60.0, "m2"), (30.0, "m3")],
            [(60.0, "m1"), (60.0, "m2"), (30.0, "m3")],
            [(90.0, "m1"), (60.0, "m2"), (30.0, "m3")],
            [(110.0, "m1"), (60.0, "m2"), (30.0, "m3")],
        ];
        for cycle in &cycles {
            state.check(&alert, &samples(cycle));
        }
        assert_eq!(state.level("m1"), Some(Level::Critical));
        assert_eq!(state.history("m3").unwrap().to_vec(), vec![30.0; 4]);

        // history of m3 is full: mean 30, threshold 15
        let events = state.check(&alert, &samples(&[(60.0, "m1"), (60.0, "m2"), (10.0, "m3")]));
        assert_eq!(
            summary(&events),
            vec![
                (Level::Warning, "m1".to_string()),
                (Level::Warning, "m3".to_string())
            ]
        );
        assert_eq!(
            events[1].rule.as_ref().unwrap().raw(),
            "warning: < historical / 2"
        );
        assert_eq!(state.history("m3").unwrap().to_vec(), vec![30.0, 30.0, 30.0, 10.0]);
    }

    #[test]
    fn test_chained_historical_expression() {
        let alert = alert(
            AlertConfig::new(
                "multiexpressions",
                "*",
                ["warning: > historical * 1.05 AND > 70"],
            )
            .with_history_size("4minute")
            .with_interval("1minute"),
        );
        assert_eq!(alert.history_size, 4);
        let mut state = AlertState::new(alert.history_size);

        let mut notified = Vec::new();
        for value in [50.0, 65.0, 85.0, 65.0, 68.0, 75.0] {
            notified.extend(state.check(&alert, &samples(&[(value, "metric")])));
        }

        // 75 > 1.05 * mean(65, 85, 65, 68) and 75 > 70
        assert_eq!(summary(&notified), vec![(Level::Warning, "metric".to_string())]);
        assert_eq!(notified[0].value, EventValue::Number(75.0));
        assert_eq!(
            state.history("metric").unwrap().to_vec(),
            vec![85.0, 65.0, 68.0, 75.0]
        );
    }

    #[test]
    fn test_no_data() {
        let alert = scenario_alert();
        let mut state = AlertState::new(alert.history_size);

        let events = state.check(&alert, &[Sample::new(None, "m1")]);
        assert_eq!(summary(&events), vec![(Level::Critical, "m1".to_string())]);
        assert_eq!(events[0].value, EventValue::NoData);
        assert!(events[0].rule.is_none());
        assert!(state.history("m1").is_none());

        assert!(state.check(&alert, &[Sample::new(None, "m1")]).is_empty());
    }

    #[test]
    fn test_no_data_level_is_configurable() {
        let mut config = AlertConfig::new("quiet", "*", ["critical: > 1"]);
        config.no_data = Some(Level::Warning);
        let alert = alert(config);
        let mut state = AlertState::new(alert.history_size);

        let events = state.check(&alert, &[Sample::new(None, "m")]);
        assert_eq!(events[0].level, Level::Warning);
    }

    #[test]
    fn test_reset_then_realert() {
        let alert = scenario_alert();
        let mut state = AlertState::new(alert.history_size);

        assert_eq!(state.check(&alert, &samples(&[(110.0, "m1")])).len(), 1);
        assert!(state.check(&alert, &samples(&[(110.0, "m1")])).is_empty());

        state.reset();
        assert_eq!(state.level("m1"), Some(Level::Normal));
        assert_eq!(state.history("m1").unwrap().len(), 2);

        let events = state.check(&alert, &samples(&[(110.0, "m1")]));
        assert_eq!(summary(&events), vec![(Level::Critical, "m1".to_string())]);
    }

    #[test]
    fn test_recovery_after_reset_is_silent() {
        let alert = scenario_alert();
        let mut state = AlertState::new(alert.history_size);

        state.check(&alert, &samples(&[(110.0, "m1")]));
        state.reset();
        assert!(state.check(&alert, &samples(&[(10.0, "m1")])).is_empty());
    }

    #[test]
    fn test_no_consecutive_duplicate_levels() {
        let alert = scenario_alert();
        let mut state = AlertState::new(alert.history_size);

        let values = [10.0, 60.0, 70.0, 120.0, 130.0, 60.0, 10.0, 10.0, 200.0, 55.0, 55.0];
        let mut stream = Vec::new();
        for value in values {
            stream.extend(state.check(&alert, &samples(&[(value, "t")])));
        }

        assert!(stream.windows(2).all(|pair| pair[0].level != pair[1].level));
        let levels: Vec<Level> = stream.iter().map(|e| e.level).collect();
        assert_eq!(
            levels,
            vec![
                Level::Warning,
                Level::Critical,
                Level::Warning,
                Level::Critical,
                Level::Warning
            ]
        );
    }

    #[test]
    fn test_send_initial() {
        let mut config = AlertConfig::new("initial", "*", ["critical: > 100"]);
        config.send_initial = Some(true);
        let alert = alert(config);
        let mut state = AlertState::new(alert.history_size);

        let events = state.check(&alert, &samples(&[(1.0, "m")]));
        assert_eq!(summary(&events), vec![(Level::Normal, "m".to_string())]);
        assert!(state.check(&alert, &samples(&[(2.0, "m")])).is_empty());
    }

    #[test]
    fn test_pseudo_targets_are_seeded() {
        let alert = scenario_alert();
        let mut state = AlertState::new(alert.history_size);
        assert_eq!(state.level(WAITING), Some(Level::Normal));
        assert_eq!(state.level(LOADING), Some(Level::Normal));

        let ok = state.transition(
            &alert,
            Level::Normal,
            EventValue::Message("Metrics are loaded".into()),
            LOADING,
            NotificationKind::Common,
            None,
        );
        assert!(ok.is_none());

        let failed = state
            .transition(
                &alert,
                Level::Critical,
                EventValue::Message("Loading error: boom".into()),
                LOADING,
                NotificationKind::Common,
                None,
            )
            .unwrap();
        assert_eq!(failed.kind_name(), "common");
        assert_eq!(failed.value_text(), "Loading error: boom");
        assert!(failed.graph_url().is_none());
    }

    #[test]
    fn test_event_rendering() {
        let mut config = AlertConfig::new("disk", "*", ["critical: > 1GB"]);
        config.format = Some(crate::units::Format::Bytes);
        let alert = alert(config);
        let mut state = AlertState::new(alert.history_size);

        let events = state.check(&alert, &samples(&[(2_147_483_648.0, "host.disk")]));
        let event = &events[0];
        assert_eq!(event.kind_name(), "graphite");
        assert_eq!(event.value_text(), "2GB");
        assert_eq!(event.to_string(), "CRITICAL [disk] host.disk: 2GB");
        assert!(event.graph_url().unwrap().contains("target=host.disk"));
    }
}
