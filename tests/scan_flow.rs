//! End-to-end scan pipeline tests over an in-memory store and a
//! scripted probe: trigger a scan, collect the broadcast events, check
//! the inventory.

use async_trait::async_trait;
use oltwatch::broadcaster::{HubEvent, ScanStatus, ScanSummary};
use oltwatch::config::MonitorConfig;
use oltwatch::orchestrator::TriggerOutcome;
use oltwatch::prober::vendor::DeviceModel;
use oltwatch::prober::{DeviceReport, Probe, ProbeOutcome, TerminalReport, UnreachableReason};
use oltwatch::reconciler::ChangeEvent;
use oltwatch::state::AppState;
use oltwatch::store::{DeviceStatus, MemoryStore, TerminalStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const OLT_IP: &str = "10.77.0.1";

/// One OLT at a fixed address; everything else times out. Flipping
/// `down` silences the OLT too.
struct ScriptedProbe {
    down: AtomicBool,
    terminals: Vec<TerminalReport>,
}

impl ScriptedProbe {
    fn new(terminals: Vec<TerminalReport>) -> Self {
        Self {
            down: AtomicBool::new(false),
            terminals,
        }
    }

    fn take_down(&self) {
        self.down.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Probe for ScriptedProbe {
    async fn probe(&self, ip: &str) -> ProbeOutcome {
        if ip == OLT_IP && !self.down.load(Ordering::SeqCst) {
            ProbeOutcome::Reachable {
                device: DeviceReport {
                    ip: ip.to_string(),
                    name: "OLT-CENTRO".to_string(),
                    model: DeviceModel::VsolGpon,
                    model_label: "V1600G1".to_string(),
                    credentials_ref: "ssh:admin".to_string(),
                    temperature_c: Some(41.0),
                    cpu_percent: Some(12.0),
                    memory_percent: Some(48.0),
                },
                terminals: self.terminals.clone(),
            }
        } else {
            ProbeOutcome::Unreachable(UnreachableReason::Timeout)
        }
    }
}

fn terminal(serial: &str) -> TerminalReport {
    TerminalReport {
        serial: serial.to_string(),
        interface: "gpon0/1".to_string(),
        slot: "1".to_string(),
        port: "0".to_string(),
        status: TerminalStatus::Online,
        rx_power_dbm: Some(-21.0),
        tx_power_dbm: Some(2.3),
    }
}

fn test_config() -> MonitorConfig {
    MonitorConfig {
        // 10.77.0.1 and 10.77.0.2
        scan_ranges: vec!["10.77.0.0/30".to_string()],
        probe_timeout: Duration::from_millis(100),
        scan_timeout: Duration::from_secs(5),
        concurrency: 4,
        ..MonitorConfig::default()
    }
}

fn build_state(probe: Arc<dyn Probe>) -> (AppState, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let state = AppState::with_probe(test_config(), store.clone(), probe);
    (state, store)
}

/// Trigger one scan and collect its change events plus the summary
async fn run_scan(state: &AppState) -> (Vec<ChangeEvent>, Option<ScanSummary>, ScanStatus) {
    let mut sub = state.subscribe();
    assert_eq!(state.trigger_scan().await, TriggerOutcome::Started);

    let mut changes = Vec::new();
    loop {
        match sub.next().await.expect("hub closed mid-scan") {
            HubEvent::Change(event) => changes.push(event),
            HubEvent::ScanStatus {
                status: ScanStatus::Started,
                ..
            } => {}
            HubEvent::ScanStatus {
                status, summary, ..
            } => return (changes, summary, status),
            HubEvent::Stats(_) => {}
        }
    }
}

#[tokio::test]
async fn discovery_announces_device_then_terminals() {
    let probe = Arc::new(ScriptedProbe::new(vec![
        terminal("VSOL0001"),
        terminal("VSOL0002"),
        terminal("VSOL0003"),
        terminal("VSOL0004"),
    ]));
    let (state, _store) = build_state(probe);

    let (changes, summary, status) = run_scan(&state).await;
    assert_eq!(status, ScanStatus::Completed);
    let summary = summary.unwrap();
    assert_eq!(summary.candidates, 2);
    assert_eq!(summary.reachable, 1);
    assert_eq!(summary.unreachable, 1);
    assert_eq!(summary.devices_added, 1);
    assert_eq!(summary.terminals_added, 4);

    assert_eq!(changes.len(), 5);
    let ChangeEvent::DeviceAdded(device) = &changes[0] else {
        panic!("expected device first, got {:?}", changes[0]);
    };
    assert_eq!(device.ip, OLT_IP);
    assert_eq!(device.name, "OLT-CENTRO");
    assert_eq!(device.status, DeviceStatus::Online);
    for change in &changes[1..] {
        assert!(matches!(change, ChangeEvent::TerminalAdded(_)));
    }

    let (device, terminals) = state.device_with_terminals(OLT_IP).await.unwrap();
    assert_eq!(device.model, "V1600G1");
    assert_eq!(terminals.len(), 4);

    let stats = state.stats().await.unwrap();
    assert_eq!(stats.total_devices, 1);
    assert_eq!(stats.devices_online, 1);
    assert_eq!(stats.total_terminals, 4);
}

#[tokio::test]
async fn full_range_scan_accounts_for_every_address() {
    // One live OLT somewhere in a full octet-prefix range
    struct OneInTheHaystack;

    #[async_trait]
    impl Probe for OneInTheHaystack {
        async fn probe(&self, ip: &str) -> ProbeOutcome {
            if ip == "10.88.0.17" {
                ProbeOutcome::Reachable {
                    device: DeviceReport {
                        ip: ip.to_string(),
                        name: "OLT-17".to_string(),
                        model: DeviceModel::VsolGpon,
                        model_label: "V1600G1".to_string(),
                        credentials_ref: "ssh:admin".to_string(),
                        temperature_c: None,
                        cpu_percent: None,
                        memory_percent: None,
                    },
                    terminals: vec![
                        terminal("S1"),
                        terminal("S2"),
                        terminal("S3"),
                        terminal("S4"),
                    ],
                }
            } else {
                ProbeOutcome::Unreachable(UnreachableReason::Timeout)
            }
        }
    }

    let config = MonitorConfig {
        scan_ranges: vec!["10.88.0.".to_string()],
        ..test_config()
    };
    let store = Arc::new(MemoryStore::new());
    let state = AppState::with_probe(config, store, Arc::new(OneInTheHaystack));

    let (changes, summary, status) = run_scan(&state).await;
    assert_eq!(status, ScanStatus::Completed);
    let summary = summary.unwrap();
    assert_eq!(summary.candidates, 254);
    assert_eq!(summary.reachable, 1);
    assert_eq!(summary.unreachable, 253);
    assert!(!summary.deadline_hit);

    assert_eq!(changes.len(), 5);
    assert!(matches!(changes[0], ChangeEvent::DeviceAdded(_)));
    assert_eq!(
        changes
            .iter()
            .filter(|c| matches!(c, ChangeEvent::TerminalAdded(_)))
            .count(),
        4
    );
}

#[tokio::test]
async fn unchanged_rescan_emits_no_change_events() {
    let probe = Arc::new(ScriptedProbe::new(vec![terminal("VSOL0001")]));
    let (state, _store) = build_state(probe);

    let (first, _, _) = run_scan(&state).await;
    assert_eq!(first.len(), 2);

    let (second, summary, status) = run_scan(&state).await;
    assert_eq!(status, ScanStatus::Completed);
    assert!(second.is_empty(), "got {:?}", second);
    assert_eq!(summary.unwrap().events, 0);
}

#[tokio::test]
async fn health_history_grows_by_one_sample_per_scan() {
    let probe = Arc::new(ScriptedProbe::new(vec![terminal("VSOL0001")]));
    let (state, _store) = build_state(probe.clone());

    run_scan(&state).await;
    run_scan(&state).await;

    let history = state.device_metrics(OLT_IP, 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[0].recorded_at >= history[1].recorded_at);
    assert_eq!(history[0].temperature_c, Some(41.0));
    assert_eq!(history[0].cpu_percent, Some(12.0));

    // A scan that misses the device adds no sample
    probe.take_down();
    run_scan(&state).await;
    assert_eq!(state.device_metrics(OLT_IP, 10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn device_goes_offline_after_two_missed_scans() {
    let probe = Arc::new(ScriptedProbe::new(vec![terminal("VSOL0001")]));
    let (state, _store) = build_state(probe.clone());

    run_scan(&state).await;
    probe.take_down();

    // First miss is absorbed by the grace period
    let (changes, _, _) = run_scan(&state).await;
    assert!(changes.is_empty());
    let devices = state.list_devices().await.unwrap();
    assert_eq!(devices[0].status, DeviceStatus::Online);
    assert_eq!(devices[0].missed_count, 1);

    // Second miss flips the device, exactly once
    let (changes, _, _) = run_scan(&state).await;
    assert_eq!(changes.len(), 1);
    let ChangeEvent::DeviceUpdated(device) = &changes[0] else {
        panic!("expected device update, got {:?}", changes[0]);
    };
    assert_eq!(device.status, DeviceStatus::Offline);

    // Further misses stay quiet
    let (changes, _, _) = run_scan(&state).await;
    assert!(changes.is_empty());
}

#[tokio::test]
async fn store_failure_drops_the_pass_and_recovers() {
    let probe = Arc::new(ScriptedProbe::new(vec![terminal("VSOL0001")]));
    let (state, store) = build_state(probe);

    store.fail_next_apply();
    let (changes, summary, status) = run_scan(&state).await;
    assert_eq!(status, ScanStatus::Error);
    assert!(changes.is_empty());
    assert!(summary.is_none());
    assert!(state.list_devices().await.unwrap().is_empty());

    // Next pass starts from the untouched state and succeeds
    let (changes, _, status) = run_scan(&state).await;
    assert_eq!(status, ScanStatus::Completed);
    assert_eq!(changes.len(), 2);
}

#[tokio::test]
async fn operator_removal_is_announced_and_cascades() {
    let probe = Arc::new(ScriptedProbe::new(vec![terminal("VSOL0001")]));
    let (state, _store) = build_state(probe.clone());
    run_scan(&state).await;

    let mut sub = state.subscribe();
    state.remove_device(OLT_IP).await.unwrap();
    assert_eq!(
        sub.next().await,
        Some(HubEvent::Change(ChangeEvent::DeviceRemoved {
            ip: OLT_IP.to_string()
        }))
    );
    assert!(state.device_with_terminals(OLT_IP).await.is_err());
    assert_eq!(state.stats().await.unwrap().total_terminals, 0);
    assert!(state.device_metrics(OLT_IP, 10).await.unwrap().is_empty());

    // Device is silent now, so the removal stays removed
    probe.take_down();
    let (changes, _, _) = run_scan(&state).await;
    assert!(changes.is_empty());
}
