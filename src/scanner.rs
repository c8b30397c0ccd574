//! Network scanner
//!
//! ## Responsibilities
//!
//! - Expand configured ranges into candidate addresses
//! - Probe candidates concurrently under a fixed permit budget
//! - Enforce the global scan deadline
//!
//! Invariant: every candidate produces exactly one outcome, even when
//! the deadline cuts workers short.

use crate::prober::{Probe, ProbeOutcome, UnreachableReason};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

/// Outcome of probing one address
#[derive(Debug, Clone)]
pub struct AddressOutcome {
    pub ip: String,
    pub outcome: ProbeOutcome,
    pub latency_ms: u64,
}

/// Result of one full scan pass
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub outcomes: Vec<AddressOutcome>,
    /// True when the global deadline expired before all probes finished
    pub deadline_hit: bool,
}

/// Expand a range expression into concrete addresses.
///
/// Two forms are accepted: an octet prefix ("10.0.0." covers .1-.254)
/// and CIDR ("10.0.0.0/24", network and broadcast excluded).
pub fn expand_range(range: &str) -> Vec<String> {
    let trimmed = range.trim();
    if let Some(prefix) = trimmed.strip_suffix('.') {
        if prefix.split('.').count() == 3
            && prefix.split('.').all(|o| o.parse::<u8>().is_ok())
        {
            return (1..=254).map(|host| format!("{}.{}", prefix, host)).collect();
        }
        return Vec::new();
    }
    expand_cidr(trimmed).unwrap_or_default()
}

/// Shortest accepted CIDR prefix; anything wider would expand into
/// millions of candidates from one config entry
const MIN_CIDR_PREFIX: u32 = 16;

fn expand_cidr(cidr: &str) -> Option<Vec<String>> {
    let (base, prefix_len) = cidr.split_once('/')?;
    let base: Ipv4Addr = base.parse().ok()?;
    let prefix_len: u32 = prefix_len.parse().ok()?;
    if prefix_len > 32 {
        return None;
    }
    if prefix_len < MIN_CIDR_PREFIX {
        warn!(cidr = %cidr, floor = MIN_CIDR_PREFIX, "range rejected, prefix too wide");
        return None;
    }

    let mask = u32::MAX << (32 - prefix_len);
    let network = u32::from(base) & mask;
    let broadcast = network | !mask;

    // Host part only; /31 and /32 have no usable hosts under this rule
    if broadcast.saturating_sub(network) < 2 {
        return Some(Vec::new());
    }
    Some(
        ((network + 1)..broadcast)
            .map(|addr| Ipv4Addr::from(addr).to_string())
            .collect(),
    )
}

/// Expand, deduplicate and order all configured ranges
pub fn expand_ranges(ranges: &[String]) -> Vec<String> {
    let mut seen: BTreeSet<(u32, String)> = BTreeSet::new();
    for range in ranges {
        for ip in expand_range(range) {
            let key = ip
                .parse::<Ipv4Addr>()
                .map(u32::from)
                .unwrap_or(u32::MAX);
            seen.insert((key, ip));
        }
    }
    seen.into_iter().map(|(_, ip)| ip).collect()
}

/// Concurrent prober driver
pub struct NetworkScanner {
    probe: Arc<dyn Probe>,
    concurrency: usize,
    scan_timeout: Duration,
}

impl NetworkScanner {
    pub fn new(probe: Arc<dyn Probe>, concurrency: usize, scan_timeout: Duration) -> Self {
        Self {
            probe,
            concurrency: concurrency.max(1),
            scan_timeout,
        }
    }

    /// Probe every candidate address once
    pub async fn scan(&self, candidates: &[String]) -> ScanResult {
        let deadline = Instant::now() + self.scan_timeout;
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(candidates.len());

        for ip in candidates {
            let probe = self.probe.clone();
            let semaphore = semaphore.clone();
            let ip = ip.clone();
            handles.push((
                ip.clone(),
                tokio::spawn(async move {
                    // Unwrap is fine: the semaphore is never closed
                    let _permit = semaphore.acquire_owned().await.unwrap();
                    let started = Instant::now();
                    let outcome = probe.probe(&ip).await;
                    AddressOutcome {
                        ip,
                        outcome,
                        latency_ms: started.elapsed().as_millis() as u64,
                    }
                }),
            ));
        }

        let mut result = ScanResult::default();
        for (ip, mut handle) in handles {
            match timeout_at(deadline, &mut handle).await {
                Ok(Ok(outcome)) => {
                    log_outcome(&outcome);
                    result.outcomes.push(outcome);
                }
                Ok(Err(join_err)) => {
                    warn!(ip = %ip, error = %join_err, "probe task failed");
                    result.outcomes.push(AddressOutcome {
                        ip,
                        outcome: ProbeOutcome::Unreachable(UnreachableReason::Network),
                        latency_ms: 0,
                    });
                }
                Err(_) => {
                    // Deadline: cancel the worker and record the miss
                    handle.abort();
                    result.deadline_hit = true;
                    result.outcomes.push(AddressOutcome {
                        ip,
                        outcome: ProbeOutcome::Unreachable(UnreachableReason::Timeout),
                        latency_ms: self.scan_timeout.as_millis() as u64,
                    });
                }
            }
        }

        result
    }
}

fn log_outcome(outcome: &AddressOutcome) {
    match &outcome.outcome {
        ProbeOutcome::Reachable { device, terminals } => {
            debug!(
                ip = %outcome.ip,
                name = %device.name,
                terminals = terminals.len(),
                latency_ms = outcome.latency_ms,
                "device reachable"
            );
        }
        ProbeOutcome::AuthFailed => {
            warn!(ip = %outcome.ip, "device answered but rejected every credential");
        }
        ProbeOutcome::ParseError { snippet } => {
            warn!(ip = %outcome.ip, snippet = %snippet, "unparseable device output");
        }
        ProbeOutcome::Unreachable(reason) => {
            debug!(ip = %outcome.ip, reason = reason.as_str(), "address unreachable");
        }
    }
}
