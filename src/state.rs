//! Shared application state
//!
//! Wires the transport, prober, scanner, reconciler and broadcaster
//! together and exposes the query/command surface the rest of the
//! process (and the tests) talk to.

use crate::broadcaster::{spawn_stats_task, Broadcaster, Subscription};
use crate::config::MonitorConfig;
use crate::error::{Error, Result};
use crate::orchestrator::{ScanOrchestrator, ScanRun, TriggerOutcome};
use crate::prober::{DeviceProber, Probe};
use crate::reconciler::{ReconcilePolicy, Reconciler};
use crate::scanner::NetworkScanner;
use crate::store::{DeviceRecord, DeviceStore, MetricSample, StatsSnapshot, TerminalRecord};
use crate::transport::NetTransport;
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<MonitorConfig>,
    pub store: Arc<dyn DeviceStore>,
    pub broadcaster: Broadcaster,
    pub orchestrator: Arc<ScanOrchestrator>,
    reconciler: Arc<Reconciler>,
}

impl AppState {
    /// Production wiring over the real network transport
    pub fn new(config: MonitorConfig, store: Arc<dyn DeviceStore>) -> Self {
        let probe: Arc<dyn Probe> = Arc::new(DeviceProber::new(
            Arc::new(NetTransport::new()),
            config.credentials.clone(),
            config.probe_timeout,
        ));
        Self::with_probe(config, store, probe)
    }

    /// Wiring with an injected probe, for tests
    pub fn with_probe(
        config: MonitorConfig,
        store: Arc<dyn DeviceStore>,
        probe: Arc<dyn Probe>,
    ) -> Self {
        let policy = ReconcilePolicy {
            device_offline_after: config.device_offline_after,
            terminal_remove_after: config.terminal_remove_after,
        };
        let broadcaster = Broadcaster::new(config.event_capacity);
        let scanner = NetworkScanner::new(probe, config.concurrency, config.scan_timeout);
        let orchestrator = Arc::new(ScanOrchestrator::new(
            scanner,
            Reconciler::new(store.clone(), policy),
            broadcaster.clone(),
            config.scan_ranges.clone(),
        ));
        let reconciler = Arc::new(Reconciler::new(store.clone(), policy));

        Self {
            config: Arc::new(config),
            store,
            broadcaster,
            orchestrator,
            reconciler,
        }
    }

    /// Launch the periodic scan and stats publishers
    pub fn start_background_tasks(&self) -> Vec<JoinHandle<()>> {
        vec![
            self.orchestrator.start_periodic(self.config.scan_interval),
            spawn_stats_task(
                self.store.clone(),
                self.broadcaster.clone(),
                self.config.stats_interval,
            ),
        ]
    }

    pub async fn trigger_scan(&self) -> TriggerOutcome {
        self.orchestrator.trigger_scan().await
    }

    pub async fn scan_status(&self) -> ScanRun {
        self.orchestrator.status().await
    }

    pub fn subscribe(&self) -> Subscription {
        self.broadcaster.subscribe()
    }

    pub async fn list_devices(&self) -> Result<Vec<DeviceRecord>> {
        self.store.list_devices().await
    }

    pub async fn device_with_terminals(
        &self,
        ip: &str,
    ) -> Result<(DeviceRecord, Vec<TerminalRecord>)> {
        self.store
            .device_with_terminals(ip)
            .await?
            .ok_or_else(|| Error::NotFound(format!("device {}", ip)))
    }

    pub async fn stats(&self) -> Result<StatsSnapshot> {
        self.store.stats().await
    }

    /// Recent health readings for one device, newest first
    pub async fn device_metrics(&self, ip: &str, limit: usize) -> Result<Vec<MetricSample>> {
        self.store.recent_metrics(ip, limit).await
    }

    /// Remove a device and its terminals, announcing the removal
    pub async fn remove_device(&self, ip: &str) -> Result<()> {
        let event = self.reconciler.remove_device(ip).await?;
        self.broadcaster.publish_changes(&[event]);
        Ok(())
    }
}
