//! Scan orchestrator
//!
//! ## Responsibilities
//!
//! - Own the scan lifecycle (idle / running, single-flight)
//! - Drive one pass: expand ranges, scan, reconcile, publish
//! - Periodic scheduling
//!
//! Exactly one scan runs at a time; a trigger while one is in flight
//! is reported, never queued. The state flips to running before the
//! pass is spawned, so two concurrent triggers cannot both start.

use crate::broadcaster::{Broadcaster, ScanStatus, ScanSummary};
use crate::reconciler::Reconciler;
use crate::scanner::{expand_ranges, NetworkScanner};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanState {
    Idle,
    Running,
}

/// Current and last-completed scan, as reported to operators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRun {
    pub state: ScanState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_summary: Option<ScanSummary>,
    pub last_message: Option<String>,
}

impl Default for ScanRun {
    fn default() -> Self {
        Self {
            state: ScanState::Idle,
            started_at: None,
            finished_at: None,
            last_summary: None,
            last_message: None,
        }
    }
}

/// What a trigger request did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Started,
    AlreadyRunning,
}

pub struct ScanOrchestrator {
    scanner: NetworkScanner,
    reconciler: Reconciler,
    broadcaster: Broadcaster,
    ranges: Vec<String>,
    run: RwLock<ScanRun>,
}

impl ScanOrchestrator {
    pub fn new(
        scanner: NetworkScanner,
        reconciler: Reconciler,
        broadcaster: Broadcaster,
        ranges: Vec<String>,
    ) -> Self {
        Self {
            scanner,
            reconciler,
            broadcaster,
            ranges,
            run: RwLock::new(ScanRun::default()),
        }
    }

    pub async fn status(&self) -> ScanRun {
        self.run.read().await.clone()
    }

    /// Start a scan pass unless one is already in flight
    pub async fn trigger_scan(self: &Arc<Self>) -> TriggerOutcome {
        {
            let mut run = self.run.write().await;
            if run.state == ScanState::Running {
                return TriggerOutcome::AlreadyRunning;
            }
            run.state = ScanState::Running;
            run.started_at = Some(Utc::now());
            run.finished_at = None;
        }

        let this = self.clone();
        tokio::spawn(async move {
            this.drive().await;
        });
        TriggerOutcome::Started
    }

    /// One full pass. Whatever happens, the state returns to idle.
    async fn drive(&self) {
        let candidates = expand_ranges(&self.ranges);
        info!(candidates = candidates.len(), "scan started");
        self.broadcaster
            .publish_status(ScanStatus::Started, "scan started", None);

        let started = Instant::now();
        let scan = self.scanner.scan(&candidates).await;

        let (summary, message, status) = match self.reconciler.reconcile(&scan).await {
            Ok(events) => {
                self.broadcaster.publish_changes(&events);
                let summary = summarize(
                    &scan,
                    &events,
                    started.elapsed().as_millis() as u64,
                );
                let message = format!(
                    "scan completed: {} reachable of {} scanned",
                    summary.reachable, summary.candidates
                );
                info!(
                    reachable = summary.reachable,
                    candidates = summary.candidates,
                    events = summary.events,
                    duration_ms = summary.duration_ms,
                    "scan completed"
                );
                (Some(summary), message, ScanStatus::Completed)
            }
            Err(e) => {
                // Observations are discarded; the next pass starts from
                // the last committed state
                error!(error = %e, "reconcile failed, scan results dropped");
                (None, format!("scan failed: {}", e), ScanStatus::Error)
            }
        };

        self.broadcaster
            .publish_status(status, message.clone(), summary);

        let mut run = self.run.write().await;
        run.state = ScanState::Idle;
        run.finished_at = Some(Utc::now());
        if summary.is_some() {
            run.last_summary = summary;
        }
        run.last_message = Some(message);
    }

    /// Scan on a fixed cadence; the first pass starts immediately
    pub fn start_periodic(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if this.trigger_scan().await == TriggerOutcome::AlreadyRunning {
                    debug!("periodic scan skipped, previous pass still running");
                }
            }
        })
    }
}

fn summarize(
    scan: &crate::scanner::ScanResult,
    events: &[crate::reconciler::ChangeEvent],
    duration_ms: u64,
) -> ScanSummary {
    use crate::prober::ProbeOutcome;
    use crate::reconciler::ChangeEvent;

    let mut summary = ScanSummary {
        candidates: scan.outcomes.len(),
        events: events.len(),
        duration_ms,
        deadline_hit: scan.deadline_hit,
        ..ScanSummary::default()
    };
    for outcome in &scan.outcomes {
        match &outcome.outcome {
            ProbeOutcome::Reachable { .. } => summary.reachable += 1,
            ProbeOutcome::AuthFailed => summary.auth_failed += 1,
            ProbeOutcome::Unreachable(_) => summary.unreachable += 1,
            ProbeOutcome::ParseError { .. } => summary.parse_errors += 1,
        }
    }
    for event in events {
        match event {
            ChangeEvent::DeviceAdded(_) => summary.devices_added += 1,
            ChangeEvent::DeviceUpdated(_) => summary.devices_updated += 1,
            ChangeEvent::DeviceRemoved { .. } => summary.devices_removed += 1,
            ChangeEvent::TerminalAdded(_) => summary.terminals_added += 1,
            ChangeEvent::TerminalUpdated(_) => summary.terminals_updated += 1,
            ChangeEvent::TerminalRemoved { .. } => summary.terminals_removed += 1,
        }
    }
    summary
}
