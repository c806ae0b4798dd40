//! Periodic queue health audit: depth thresholds, error rate, and
//! recovery of items stranded in processing.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::Db;
use crate::error::Result;
use crate::model::QueueCounts;
use crate::telemetry::metrics;

use super::alerts::{Alert, AlertBook, Severity};

/// Thresholds and cadence for the health audit.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Time between audits.
    pub check_interval: Duration,
    /// A processing item older than this is considered stuck.
    pub stale_after: Duration,
    /// Pending backlog above this raises a warning alert.
    pub warning_backlog: u64,
    /// Pending backlog above this raises a critical alert.
    pub critical_backlog: u64,
    /// Error rate above this raises a warning alert.
    pub max_error_rate: f64,
    /// Identical alerts inside this window collapse into one.
    pub alert_window: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            stale_after: Duration::from_secs(600),
            warning_backlog: 50,
            critical_backlog: 200,
            max_error_rate: 0.2,
            alert_window: Duration::from_secs(300),
        }
    }
}

/// What one audit pass found and did.
#[derive(Debug)]
pub struct AuditReport {
    pub counts: QueueCounts,
    pub error_rate: f64,
    /// Stuck processing items returned to pending this pass.
    pub stuck_reset: u64,
}

/// Watches queue health on a timer and self-heals what it can.
/// Cloning shares the same loop and alert book.
#[derive(Clone)]
pub struct HealthMonitor {
    db: Arc<Db>,
    config: MonitorConfig,
    alerts: Arc<AlertBook>,
    cancel: CancellationToken,
    loop_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl HealthMonitor {
    pub(crate) fn new(db: Arc<Db>, config: MonitorConfig) -> Self {
        let alerts = Arc::new(AlertBook::new(config.alert_window));
        Self {
            db,
            config,
            alerts,
            cancel: CancellationToken::new(),
            loop_handle: Arc::new(Mutex::new(None)),
        }
    }

    /// Spawn the audit loop unless one is already running.
    pub async fn ensure_started(&self) {
        let mut handle = self.loop_handle.lock().await;
        if let Some(existing) = handle.as_ref() {
            if !existing.is_finished() {
                return;
            }
        }
        let monitor = self.clone();
        *handle = Some(tokio::spawn(async move { monitor.run().await }));
        info!(
            check_interval_secs = self.config.check_interval.as_secs(),
            stale_after_secs = self.config.stale_after.as_secs(),
            "health monitor started"
        );
    }

    async fn run(self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("health monitor loop stopped");
                    return;
                }
                _ = tokio::time::sleep(self.config.check_interval) => {
                    if let Err(e) = self.audit_once().await {
                        error!("health audit failed: {e}");
                    }
                }
            }
        }
    }

    /// One audit pass: snapshot counts, check thresholds, reset stuck items.
    pub async fn audit_once(&self) -> Result<AuditReport> {
        let counts = self.db.counts().await?;
        let error_rate = counts.error_rate();
        info!(
            pending = counts.pending,
            processing = counts.processing,
            completed = counts.completed,
            failed = counts.failed,
            error_rate,
            "queue audit"
        );

        // Alert messages stay fixed so repeats collapse in the book;
        // the live numbers are in the audit log line above.
        if counts.pending > self.config.critical_backlog {
            self.alerts
                .raise(Severity::Critical, "pending backlog above critical threshold")
                .await;
        } else if counts.pending > self.config.warning_backlog {
            self.alerts
                .raise(Severity::Warning, "pending backlog above warning threshold")
                .await;
        }
        if error_rate > self.config.max_error_rate {
            self.alerts
                .raise(Severity::Warning, "queue error rate above threshold")
                .await;
        }

        let stuck_reset = self.reset_stuck_items().await?;
        Ok(AuditReport {
            counts,
            error_rate,
            stuck_reset,
        })
    }

    /// Return stranded processing items to pending. A reset does not touch
    /// retry_count: no scoring failure was recorded for them.
    async fn reset_stuck_items(&self) -> Result<u64> {
        let reset = self
            .db
            .reset_stuck(
                self.config.stale_after,
                "reset by health monitor: processing exceeded staleness window",
            )
            .await?;
        if reset > 0 {
            metrics::stuck_resets().add(reset, &[]);
            warn!(
                count = reset,
                stale_after_secs = self.config.stale_after.as_secs(),
                "reset stuck processing items"
            );
            self.alerts
                .raise(Severity::Warning, format!("reset {reset} stuck processing items"))
                .await;
        }
        Ok(reset)
    }

    /// On-demand stuck scan, same reset the periodic audit performs.
    pub async fn emergency_cleanup(&self) -> Result<u64> {
        self.reset_stuck_items().await
    }

    pub async fn queue_counts(&self) -> Result<QueueCounts> {
        self.db.counts().await
    }

    /// Unresolved alerts, most recent first.
    pub async fn alerts(&self) -> Vec<Alert> {
        self.alerts.active().await
    }

    /// Every alert ever raised, resolved ones included.
    pub async fn alert_history(&self) -> Vec<Alert> {
        self.alerts.all().await
    }

    pub async fn resolve_alert(&self, id: Uuid) -> bool {
        self.alerts.resolve(id).await
    }

    /// Stop the audit loop.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.loop_handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("health monitor loop ended abnormally: {e}");
            }
        }
        info!("health monitor stopped");
    }
}
