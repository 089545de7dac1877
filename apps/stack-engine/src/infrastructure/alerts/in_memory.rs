//! Alert sink that keeps alerts in memory.

use std::sync::RwLock;

use async_trait::async_trait;

use crate::application::ports::{Alert, AlertError, AlertKind, AlertPort};

/// Collects raised alerts.
#[derive(Debug, Default)]
pub struct InMemoryAlertSink {
    alerts: RwLock<Vec<Alert>>,
}

impl InMemoryAlertSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Alerts raised so far, oldest first.
    #[must_use]
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts
            .read()
            .map(|alerts| alerts.clone())
            .unwrap_or_default()
    }

    /// Number of alerts of `kind`.
    #[must_use]
    pub fn count(&self, kind: AlertKind) -> usize {
        self.alerts
            .read()
            .map(|alerts| alerts.iter().filter(|a| a.kind == kind).count())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AlertPort for InMemoryAlertSink {
    async fn raise(&self, alert: Alert) -> Result<(), AlertError> {
        self.alerts
            .write()
            .map_err(|e| AlertError::DeliveryFailed {
                message: e.to_string(),
            })?
            .push(alert);
        Ok(())
    }
}
