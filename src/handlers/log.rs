//! Writes notifications to the process log

use async_trait::async_trait;

use super::{short_message, Handler, HandlerError};
use crate::alerts::{Level, NotificationEvent};
use crate::config::Options;

pub struct LogHandler {
    prefix: String,
}

impl LogHandler {
    pub fn new(options: &Options) -> Self {
        Self {
            prefix: options.prefix.clone(),
        }
    }
}

#[async_trait]
impl Handler for LogHandler {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, event: &NotificationEvent) -> Result<(), HandlerError> {
        let message = short_message(&self.prefix, event);
        match event.level {
            Level::Normal => tracing::info!(alert = %event.alert.name, "{}", message),
            Level::Warning => tracing::warn!(alert = %event.alert.name, "{}", message),
            Level::Critical | Level::NoData => {
                tracing::error!(alert = %event.alert.name, "{}", message)
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::alerts::{Alert, AlertState};
    use crate::config::AlertConfig;
    use crate::sources::Sample;

    #[tokio::test]
    async fn test_log_never_fails() {
        let options = Options::default();
        let handler = LogHandler::new(&options);
        let alert = Arc::new(
            Alert::from_config(&AlertConfig::new("cpu", "*", ["warning: > 1"]), &options).unwrap(),
        );
        let mut state = AlertState::new(1);

        for sample in [Sample::new(Some(5.0), "a"), Sample::new(None, "a")] {
            for event in state.check(&alert, &[sample]) {
                assert!(handler.notify(&event).await.is_ok());
            }
        }
    }
}
