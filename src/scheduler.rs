//! Automatic publication of scheduled quotes.
//!
//! A single background task sweeps for due quotes, then sleeps for the configured
//! interval. Sweeps hold a shared lock, so a restarted task or a manual check waits
//! for the one in flight. Each due quote is re-read and published only while it is
//! still scheduled and due.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use utoipa::ToSchema;

use crate::quote;
use crate::repo::{QuoteRepo, RepoError};

pub const DEFAULT_INTERVAL_MINUTES: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Stopped,
    Running,
}

/// Outcome of one sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct CheckSummary {
    pub checked_at: DateTime<Utc>,
    pub due: usize,
    pub published: usize,
    /// changed or deleted after the due query ran
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub running: bool,
    #[serde(rename = "intervalMinutes")]
    pub interval_minutes: u64,
    #[serde(rename = "intervalSeconds")]
    pub interval_seconds: u64,
    #[serde(rename = "lastCheck")]
    pub last_check: Option<CheckSummary>,
}

/// Publish every quote due at `now`, earliest first. A failing quote is logged and
/// counted; the rest of the batch still runs.
pub async fn publish_due(repo: &dyn QuoteRepo, now: DateTime<Utc>) -> Result<CheckSummary, RepoError> {
    let due = repo.find_due_quotes(now).await?;
    let mut summary = CheckSummary { checked_at: now, due: due.len(), published: 0, skipped: 0, failed: 0 };
    for q in due {
        match quote::publish_if_due(repo, q.id, now).await {
            Ok(Some(_)) => {
                summary.published += 1;
                info!(quote_id = q.id, scheduled_at = ?q.scheduled_at, "quote auto-published");
            }
            Ok(None) => {
                summary.skipped += 1;
                info!(quote_id = q.id, "quote no longer due; skipped");
            }
            Err(e) => {
                summary.failed += 1;
                error!(quote_id = q.id, error = %e, "auto-publish failed");
            }
        }
    }
    metrics::counter!("quotes_autopublished_total").increment(summary.published as u64);
    metrics::counter!("quotes_autopublish_failures_total").increment(summary.failed as u64);
    Ok(summary)
}

pub struct Scheduler {
    repo: Arc<dyn QuoteRepo>,
    interval: Duration,
    cancel: Mutex<Option<CancellationToken>>,
    last_check: Arc<Mutex<Option<CheckSummary>>>,
    sweeping: Arc<tokio::sync::Mutex<()>>,
}

impl Scheduler {
    pub fn new(repo: Arc<dyn QuoteRepo>, interval_minutes: u64) -> Self {
        Self::with_interval(repo, Duration::from_secs(interval_minutes.max(1) * 60))
    }

    pub fn with_interval(repo: Arc<dyn QuoteRepo>, interval: Duration) -> Self {
        Self {
            repo,
            interval,
            cancel: Mutex::new(None),
            last_check: Arc::new(Mutex::new(None)),
            sweeping: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Spawn the sweep task. Returns `false` (and changes nothing) when it is
    /// already running. Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut slot = match self.cancel.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.as_ref().is_some_and(|t| !t.is_cancelled()) {
            warn!("scheduler already running; start ignored");
            return false;
        }
        let token = CancellationToken::new();
        *slot = Some(token.clone());
        drop(slot);

        let repo = Arc::clone(&self.repo);
        let last_check = Arc::clone(&self.last_check);
        let sweeping = Arc::clone(&self.sweeping);
        let interval = self.interval;
        info!(interval_secs = interval.as_secs(), "scheduler started");
        tokio::spawn(async move {
            loop {
                // an in-flight sweep is allowed to finish after stop()
                {
                    let _sweep = sweeping.lock().await;
                    if token.is_cancelled() {
                        break;
                    }
                    sweep(repo.as_ref(), &last_check).await;
                }
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            info!("scheduler task exited");
        });
        true
    }

    /// Cancel the task. Returns `false` when it was not running.
    pub fn stop(&self) -> bool {
        let mut slot = match self.cancel.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        match slot.take() {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                info!("scheduler stopped");
                true
            }
            _ => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.cancel
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|t| !t.is_cancelled()))
            .unwrap_or(false)
    }

    pub fn status(&self) -> SchedulerStatus {
        let running = self.is_running();
        SchedulerStatus {
            state: if running { SchedulerState::Running } else { SchedulerState::Stopped },
            running,
            interval_minutes: self.interval.as_secs() / 60,
            interval_seconds: self.interval.as_secs(),
            last_check: self.last_check.lock().ok().and_then(|c| c.clone()),
        }
    }

    /// One sweep on the caller's task. Waits for a timer sweep in flight.
    pub async fn run_check(&self) -> Result<CheckSummary, RepoError> {
        let _sweep = self.sweeping.lock().await;
        let summary = publish_due(self.repo.as_ref(), Utc::now()).await?;
        record(&self.last_check, &summary);
        Ok(summary)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn record(last_check: &Mutex<Option<CheckSummary>>, summary: &CheckSummary) {
    if let Ok(mut slot) = last_check.lock() {
        *slot = Some(summary.clone());
    }
}

async fn sweep(repo: &dyn QuoteRepo, last_check: &Mutex<Option<CheckSummary>>) {
    match publish_due(repo, Utc::now()).await {
        Ok(summary) => {
            if summary.due > 0 {
                info!(due = summary.due, published = summary.published, failed = summary.failed, "scheduler check done");
            }
            record(last_check, &summary);
        }
        // the next tick recomputes from stored dates
        Err(e) => error!(error = %e, "scheduler could not load due quotes"),
    }
}
