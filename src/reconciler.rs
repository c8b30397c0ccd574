//! Reconciliation engine
//!
//! ## Responsibilities
//!
//! - Diff one scan result against the stored inventory
//! - Produce a transactional mutation batch plus the change events
//! - Grace-period accounting for misses (device offline, terminal
//!   removal)
//!
//! The diff itself is a pure function; only `Reconciler::reconcile`
//! touches the store. Events describe committed state: they are only
//! surfaced after the batch has been applied.

use crate::error::Result;
use crate::prober::ProbeOutcome;
use crate::scanner::ScanResult;
use crate::store::{
    DeviceRecord, DeviceStatus, DeviceStore, MetricSample, StoreMutation, StoreSnapshot,
    TerminalRecord,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

/// Grace thresholds, in consecutive scans
#[derive(Debug, Clone, Copy)]
pub struct ReconcilePolicy {
    /// Misses before a known device flips offline
    pub device_offline_after: u32,
    /// Absences before a terminal is dropped from inventory
    pub terminal_remove_after: u32,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            device_offline_after: 2,
            terminal_remove_after: 2,
        }
    }
}

/// Inventory change, emitted once per transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ChangeEvent {
    DeviceAdded(DeviceRecord),
    DeviceUpdated(DeviceRecord),
    DeviceRemoved { ip: String },
    TerminalAdded(TerminalRecord),
    TerminalUpdated(TerminalRecord),
    TerminalRemoved { olt_ip: String, serial: String },
}

/// Output of one diff: what to persist and what to announce
#[derive(Debug, Default)]
pub struct ReconcilePlan {
    pub mutations: Vec<StoreMutation>,
    pub events: Vec<ChangeEvent>,
}

/// Diff a scan result against the stored state.
///
/// Deterministic: outcomes are processed in address order and each
/// device's events precede its terminals' events.
pub fn diff(
    snapshot: &StoreSnapshot,
    scan: &ScanResult,
    policy: &ReconcilePolicy,
    now: DateTime<Utc>,
) -> ReconcilePlan {
    let mut plan = ReconcilePlan::default();

    let mut outcomes: Vec<_> = scan.outcomes.iter().collect();
    outcomes.sort_by(|a, b| a.ip.cmp(&b.ip));

    for address in outcomes {
        match &address.outcome {
            ProbeOutcome::Reachable { device, terminals } => {
                reconcile_reachable(snapshot, device, terminals, now, policy, &mut plan);
            }
            ProbeOutcome::AuthFailed | ProbeOutcome::Unreachable(_) => {
                reconcile_miss(snapshot, &address.ip, policy, &mut plan);
            }
            // The device answered, so this is not a miss; its inventory
            // is simply left alone until the output parses again
            ProbeOutcome::ParseError { .. } => {
                if let Some(existing) = snapshot.devices.get(&address.ip) {
                    let mut updated = existing.clone();
                    updated.missed_count = 0;
                    updated.last_seen = now;
                    plan.mutations.push(StoreMutation::UpsertDevice(updated));
                }
            }
        }
    }

    plan
}

fn reconcile_reachable(
    snapshot: &StoreSnapshot,
    device: &crate::prober::DeviceReport,
    terminals: &[crate::prober::TerminalReport],
    now: DateTime<Utc>,
    policy: &ReconcilePolicy,
    plan: &mut ReconcilePlan,
) {
    match snapshot.devices.get(&device.ip) {
        None => {
            let record = DeviceRecord {
                ip: device.ip.clone(),
                name: device.name.clone(),
                model: device.model_label.clone(),
                credentials_ref: device.credentials_ref.clone(),
                status: DeviceStatus::Online,
                missed_count: 0,
                temperature_c: device.temperature_c,
                cpu_percent: device.cpu_percent,
                memory_percent: device.memory_percent,
                last_seen: now,
                created_at: now,
            };
            plan.mutations
                .push(StoreMutation::UpsertDevice(record.clone()));
            plan.events.push(ChangeEvent::DeviceAdded(record));
        }
        Some(existing) => {
            let mut updated = existing.clone();
            updated.name = device.name.clone();
            updated.model = device.model_label.clone();
            updated.credentials_ref = device.credentials_ref.clone();
            updated.status = DeviceStatus::Online;
            updated.missed_count = 0;
            updated.temperature_c = device.temperature_c;
            updated.cpu_percent = device.cpu_percent;
            updated.memory_percent = device.memory_percent;
            updated.last_seen = now;

            // Health readings and timestamps are bookkeeping; only
            // identity and status transitions are worth announcing
            let eventful = updated.name != existing.name
                || updated.model != existing.model
                || updated.status != existing.status;

            if updated != *existing {
                plan.mutations
                    .push(StoreMutation::UpsertDevice(updated.clone()));
            }
            if eventful {
                plan.events.push(ChangeEvent::DeviceUpdated(updated));
            }
        }
    }

    // Each pass with a health reading extends the device's history;
    // samples ride in the same transaction and announce nothing
    if device.temperature_c.is_some()
        || device.cpu_percent.is_some()
        || device.memory_percent.is_some()
    {
        plan.mutations
            .push(StoreMutation::AppendMetric(MetricSample {
                device_ip: device.ip.clone(),
                temperature_c: device.temperature_c,
                cpu_percent: device.cpu_percent,
                memory_percent: device.memory_percent,
                recorded_at: now,
            }));
    }

    // A probe that cannot enumerate terminals (SNMP-only identification)
    // says nothing about them, so absences are not counted
    let can_enumerate = device.credentials_ref.starts_with("ssh:");

    let mut reported: BTreeSet<&str> = BTreeSet::new();
    for terminal in terminals {
        reported.insert(terminal.serial.as_str());
        let key = (device.ip.clone(), terminal.serial.clone());
        match snapshot.terminals.get(&key) {
            None => {
                let record = TerminalRecord {
                    olt_ip: device.ip.clone(),
                    serial: terminal.serial.clone(),
                    interface: terminal.interface.clone(),
                    slot: terminal.slot.clone(),
                    port: terminal.port.clone(),
                    status: terminal.status,
                    rx_power_dbm: terminal.rx_power_dbm,
                    tx_power_dbm: terminal.tx_power_dbm,
                    missed_count: 0,
                    last_seen: now,
                    created_at: now,
                };
                plan.mutations
                    .push(StoreMutation::UpsertTerminal(record.clone()));
                plan.events.push(ChangeEvent::TerminalAdded(record));
            }
            Some(existing) => {
                let mut updated = existing.clone();
                updated.interface = terminal.interface.clone();
                updated.slot = terminal.slot.clone();
                updated.port = terminal.port.clone();
                updated.status = terminal.status;
                updated.rx_power_dbm = terminal.rx_power_dbm;
                updated.tx_power_dbm = terminal.tx_power_dbm;
                updated.missed_count = 0;
                updated.last_seen = now;

                let eventful = updated.status != existing.status
                    || updated.rx_power_dbm != existing.rx_power_dbm
                    || updated.tx_power_dbm != existing.tx_power_dbm
                    || updated.interface != existing.interface
                    || updated.slot != existing.slot
                    || updated.port != existing.port;

                if updated != *existing {
                    plan.mutations
                        .push(StoreMutation::UpsertTerminal(updated.clone()));
                }
                if eventful {
                    plan.events.push(ChangeEvent::TerminalUpdated(updated));
                }
            }
        }
    }

    if !can_enumerate {
        return;
    }

    for known in snapshot.terminals_of(&device.ip) {
        if reported.contains(known.serial.as_str()) {
            continue;
        }
        let missed = known.missed_count + 1;
        if missed >= policy.terminal_remove_after {
            plan.mutations.push(StoreMutation::DeleteTerminal {
                olt_ip: known.olt_ip.clone(),
                serial: known.serial.clone(),
            });
            plan.events.push(ChangeEvent::TerminalRemoved {
                olt_ip: known.olt_ip.clone(),
                serial: known.serial.clone(),
            });
        } else {
            let mut updated = known.clone();
            updated.missed_count = missed;
            plan.mutations.push(StoreMutation::UpsertTerminal(updated));
        }
    }
}

fn reconcile_miss(
    snapshot: &StoreSnapshot,
    ip: &str,
    policy: &ReconcilePolicy,
    plan: &mut ReconcilePlan,
) {
    // Unknown addresses that fail to answer are simply not inventory
    let Some(existing) = snapshot.devices.get(ip) else {
        return;
    };

    let mut updated = existing.clone();
    updated.missed_count = existing.missed_count + 1;

    let flips_offline = updated.missed_count >= policy.device_offline_after
        && existing.status != DeviceStatus::Offline;
    if flips_offline {
        updated.status = DeviceStatus::Offline;
    }

    plan.mutations
        .push(StoreMutation::UpsertDevice(updated.clone()));
    if flips_offline {
        plan.events.push(ChangeEvent::DeviceUpdated(updated));
    }
}

/// Applies diffs against a live store
pub struct Reconciler {
    store: Arc<dyn DeviceStore>,
    policy: ReconcilePolicy,
}

impl Reconciler {
    pub fn new(store: Arc<dyn DeviceStore>, policy: ReconcilePolicy) -> Self {
        Self { store, policy }
    }

    /// Diff `scan` against the store and commit the result. Events are
    /// returned only after the mutation batch has committed.
    pub async fn reconcile(&self, scan: &ScanResult) -> Result<Vec<ChangeEvent>> {
        let snapshot = self.store.snapshot().await?;
        let plan = diff(&snapshot, scan, &self.policy, Utc::now());

        if !plan.mutations.is_empty() {
            self.store.apply(&plan.mutations).await?;
        }
        if !plan.events.is_empty() {
            info!(
                mutations = plan.mutations.len(),
                events = plan.events.len(),
                "inventory reconciled"
            );
        }
        Ok(plan.events)
    }

    /// Operator-initiated removal of a device and its terminals
    pub async fn remove_device(&self, ip: &str) -> Result<ChangeEvent> {
        let snapshot = self.store.snapshot().await?;
        if !snapshot.devices.contains_key(ip) {
            return Err(crate::error::Error::NotFound(format!("device {}", ip)));
        }
        self.store
            .apply(&[StoreMutation::DeleteDevice { ip: ip.to_string() }])
            .await?;
        Ok(ChangeEvent::DeviceRemoved { ip: ip.to_string() })
    }
}
