//! In-memory store
//!
//! Backs the integration tests and any run without a database. Mutation
//! batches are applied to a staged copy and swapped in, so a failure
//! injected mid-batch leaves the visible state untouched, matching the
//! transactional contract of the SQLite store.

use super::{
    DeviceRecord, DeviceStatus, DeviceStore, MetricSample, StatsSnapshot, StoreMutation,
    StoreSnapshot, TerminalRecord, METRIC_HISTORY_LIMIT,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Default, Clone)]
struct MemoryInner {
    snapshot: StoreSnapshot,
    /// Newest-first history per device ip
    metrics: BTreeMap<String, Vec<MetricSample>>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryInner>,
    fail_next_apply: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `apply` fail before mutating anything (test hook
    /// for store-outage behavior)
    pub fn fail_next_apply(&self) {
        self.fail_next_apply.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn snapshot(&self) -> Result<StoreSnapshot> {
        Ok(self.state.read().await.snapshot.clone())
    }

    async fn apply(&self, mutations: &[StoreMutation]) -> Result<()> {
        if self.fail_next_apply.swap(false, Ordering::SeqCst) {
            return Err(Error::Store("injected store failure".to_string()));
        }

        let mut state = self.state.write().await;
        let mut staged = state.clone();

        for mutation in mutations {
            match mutation {
                StoreMutation::UpsertDevice(device) => {
                    staged
                        .snapshot
                        .devices
                        .insert(device.ip.clone(), device.clone());
                }
                StoreMutation::DeleteDevice { ip } => {
                    staged.snapshot.devices.remove(ip);
                    // Cascade: terminals and history never outlive the device
                    staged.snapshot.terminals.retain(|(olt, _), _| olt != ip);
                    staged.metrics.remove(ip);
                }
                StoreMutation::UpsertTerminal(terminal) => {
                    staged.snapshot.terminals.insert(
                        (terminal.olt_ip.clone(), terminal.serial.clone()),
                        terminal.clone(),
                    );
                }
                StoreMutation::DeleteTerminal { olt_ip, serial } => {
                    staged
                        .snapshot
                        .terminals
                        .remove(&(olt_ip.clone(), serial.clone()));
                }
                StoreMutation::AppendMetric(sample) => {
                    let history =
                        staged.metrics.entry(sample.device_ip.clone()).or_default();
                    history.insert(0, sample.clone());
                    history.truncate(METRIC_HISTORY_LIMIT);
                }
            }
        }

        *state = staged;
        Ok(())
    }

    async fn list_devices(&self) -> Result<Vec<DeviceRecord>> {
        let state = self.state.read().await;
        let mut devices: Vec<DeviceRecord> =
            state.snapshot.devices.values().cloned().collect();
        devices.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(devices)
    }

    async fn device_with_terminals(
        &self,
        ip: &str,
    ) -> Result<Option<(DeviceRecord, Vec<TerminalRecord>)>> {
        let state = self.state.read().await;
        let Some(device) = state.snapshot.devices.get(ip).cloned() else {
            return Ok(None);
        };
        let mut terminals: Vec<TerminalRecord> =
            state.snapshot.terminals_of(ip).cloned().collect();
        terminals.sort_by(|a, b| {
            a.interface
                .cmp(&b.interface)
                .then_with(|| a.serial.cmp(&b.serial))
        });
        Ok(Some((device, terminals)))
    }

    async fn stats(&self) -> Result<StatsSnapshot> {
        let state = self.state.read().await;
        Ok(StatsSnapshot {
            total_devices: state.snapshot.devices.len() as u64,
            total_terminals: state.snapshot.terminals.len() as u64,
            devices_online: state
                .snapshot
                .devices
                .values()
                .filter(|d| d.status == DeviceStatus::Online)
                .count() as u64,
            timestamp: Utc::now(),
        })
    }

    async fn recent_metrics(&self, ip: &str, limit: usize) -> Result<Vec<MetricSample>> {
        let state = self.state.read().await;
        Ok(state
            .metrics
            .get(ip)
            .map(|history| history.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample(ip: &str, temperature_c: f64, age_min: i64) -> MetricSample {
        MetricSample {
            device_ip: ip.to_string(),
            temperature_c: Some(temperature_c),
            cpu_percent: None,
            memory_percent: None,
            recorded_at: Utc::now() - Duration::minutes(age_min),
        }
    }

    fn device(ip: &str) -> DeviceRecord {
        DeviceRecord {
            ip: ip.to_string(),
            name: "OLT".to_string(),
            model: "V1600G1".to_string(),
            credentials_ref: "ssh:admin".to_string(),
            status: DeviceStatus::Online,
            missed_count: 0,
            temperature_c: None,
            cpu_percent: None,
            memory_percent: None,
            last_seen: Utc::now(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn metric_history_is_newest_first_and_limited() {
        let store = MemoryStore::new();
        store
            .apply(&[
                StoreMutation::UpsertDevice(device("10.0.0.5")),
                StoreMutation::AppendMetric(sample("10.0.0.5", 40.0, 2)),
                StoreMutation::AppendMetric(sample("10.0.0.5", 45.0, 1)),
                StoreMutation::AppendMetric(sample("10.0.0.5", 50.0, 0)),
            ])
            .await
            .unwrap();

        let history = store.recent_metrics("10.0.0.5", 2).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].temperature_c, Some(50.0));
        assert_eq!(history[1].temperature_c, Some(45.0));
    }

    #[tokio::test]
    async fn deleting_a_device_drops_its_metric_history() {
        let store = MemoryStore::new();
        store
            .apply(&[
                StoreMutation::UpsertDevice(device("10.0.0.5")),
                StoreMutation::AppendMetric(sample("10.0.0.5", 40.0, 0)),
            ])
            .await
            .unwrap();
        store
            .apply(&[StoreMutation::DeleteDevice {
                ip: "10.0.0.5".to_string(),
            }])
            .await
            .unwrap();

        assert!(store
            .recent_metrics("10.0.0.5", 10)
            .await
            .unwrap()
            .is_empty());
    }
}
