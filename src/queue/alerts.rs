//! Process-local alert book with deduplication.
//!
//! Alerts are operator-facing, not telemetry: they stay queryable until
//! someone resolves them. Re-raising the same condition inside the dedup
//! window bumps the existing alert instead of stacking copies.

use std::time::Duration;

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::telemetry::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: Uuid,
    pub severity: Severity,
    pub message: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// How many times this condition was raised while the alert was open.
    pub count: u32,
    pub resolved: bool,
}

/// All alerts raised by this process.
pub struct AlertBook {
    window: Duration,
    alerts: RwLock<Vec<Alert>>,
}

impl AlertBook {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            alerts: RwLock::new(Vec::new()),
        }
    }

    /// Raise an alert, deduplicating against open alerts.
    ///
    /// A raise matches an existing alert when severity and message are
    /// identical, the alert is unresolved, and its last occurrence is
    /// within the dedup window. Returns the id of the alert that now
    /// represents the condition.
    pub async fn raise(&self, severity: Severity, message: impl Into<String>) -> Uuid {
        let message = message.into();
        let now = Utc::now();
        let window = chrono::Duration::milliseconds(self.window.as_millis() as i64);

        let mut alerts = self.alerts.write().await;

        if let Some(existing) = alerts.iter_mut().find(|a| {
            !a.resolved && a.severity == severity && a.message == message && now - a.last_seen <= window
        }) {
            existing.last_seen = now;
            existing.count += 1;
            return existing.id;
        }

        let alert = Alert {
            id: Uuid::new_v4(),
            severity,
            message,
            first_seen: now,
            last_seen: now,
            count: 1,
            resolved: false,
        };
        let id = alert.id;
        alerts.push(alert);

        metrics::alerts_raised().add(1, &[KeyValue::new("severity", severity.to_string())]);

        id
    }

    /// Unresolved alerts, most recent activity first.
    pub async fn active(&self) -> Vec<Alert> {
        let alerts = self.alerts.read().await;
        let mut active: Vec<Alert> = alerts.iter().filter(|a| !a.resolved).cloned().collect();
        active.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        active
    }

    /// Every alert this process has raised, including resolved ones.
    pub async fn all(&self) -> Vec<Alert> {
        self.alerts.read().await.clone()
    }

    /// Mark an alert resolved. Returns false for unknown ids.
    pub async fn resolve(&self, id: Uuid) -> bool {
        let mut alerts = self.alerts.write().await;
        match alerts.iter_mut().find(|a| a.id == id) {
            Some(alert) => {
                alert.resolved = true;
                true
            }
            None => false,
        }
    }
}
