//! Persistence surface
//!
//! ## Responsibilities
//!
//! - Device/Terminal records and their identity rules
//! - `DeviceStore` trait consumed by the reconciler and the query surface
//! - Transactional mutation batches (all-or-nothing per reconcile pass)
//!
//! Identity: a Device is keyed by its IP address; a Terminal by
//! (olt_ip, serial). Terminals never outlive their device (cascade).

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Device reachability status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
    Unknown,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "online" => Self::Online,
            "offline" => Self::Offline,
            _ => Self::Unknown,
        }
    }
}

/// Vendor-normalized terminal status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Online,
    Offline,
    /// Loss of signal
    Los,
    DyingGasp,
    Unknown,
}

impl TerminalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Los => "los",
            Self::DyingGasp => "dying_gasp",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "online" => Self::Online,
            "offline" => Self::Offline,
            "los" => Self::Los,
            "dying_gasp" => Self::DyingGasp,
            _ => Self::Unknown,
        }
    }
}

/// Persisted OLT record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Management IP, globally unique
    pub ip: String,
    /// Display name (sysName / CLI hostname)
    pub name: String,
    /// Model string as reported by the device
    pub model: String,
    /// Reference to the credential that last worked ("ssh:admin", "snmp:public")
    pub credentials_ref: String,
    pub status: DeviceStatus,
    /// Consecutive scans that failed to reach this device
    pub missed_count: u32,
    pub temperature_c: Option<f64>,
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub last_seen: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Persisted ONU record, owned by one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalRecord {
    /// Owning device IP
    pub olt_ip: String,
    /// Serial, unique within the owning device
    pub serial: String,
    /// PON interface ("gpon0/1")
    pub interface: String,
    pub slot: String,
    pub port: String,
    pub status: TerminalStatus,
    pub rx_power_dbm: Option<f64>,
    pub tx_power_dbm: Option<f64>,
    /// Consecutive successful device scans in which this terminal was absent
    pub missed_count: u32,
    pub last_seen: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// One health reading captured during a scan; devices keep a bounded
/// history of these alongside the latest values on the device row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub device_ip: String,
    pub temperature_c: Option<f64>,
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

/// Per-device metric history retention
pub const METRIC_HISTORY_LIMIT: usize = 1000;

/// Read-only snapshot of the store used for diffing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSnapshot {
    /// Devices by IP
    pub devices: BTreeMap<String, DeviceRecord>,
    /// Terminals by (olt_ip, serial)
    pub terminals: BTreeMap<(String, String), TerminalRecord>,
}

impl StoreSnapshot {
    /// Terminals belonging to one device
    pub fn terminals_of<'a>(&'a self, ip: &'a str) -> impl Iterator<Item = &'a TerminalRecord> {
        self.terminals
            .range((ip.to_string(), String::new())..)
            .take_while(move |((olt, _), _)| olt == ip)
            .map(|(_, t)| t)
    }
}

/// One store mutation, applied as part of a transactional batch
#[derive(Debug, Clone, PartialEq)]
pub enum StoreMutation {
    UpsertDevice(DeviceRecord),
    DeleteDevice { ip: String },
    UpsertTerminal(TerminalRecord),
    DeleteTerminal { olt_ip: String, serial: String },
    /// Append one health reading to the device's history
    AppendMetric(MetricSample),
}

/// Aggregate stats served from the store, never recomputed by the core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total_devices: u64,
    pub total_terminals: u64,
    pub devices_online: u64,
    pub timestamp: DateTime<Utc>,
}

/// Persistence capability the core calls; it never implements storage itself
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Current state by identity, for diffing
    async fn snapshot(&self) -> Result<StoreSnapshot>;

    /// Apply a mutation batch as a single transaction. Either every
    /// mutation commits or none do.
    async fn apply(&self, mutations: &[StoreMutation]) -> Result<()>;

    /// All devices, newest first
    async fn list_devices(&self) -> Result<Vec<DeviceRecord>>;

    /// One device with its terminals ordered by interface then serial
    async fn device_with_terminals(
        &self,
        ip: &str,
    ) -> Result<Option<(DeviceRecord, Vec<TerminalRecord>)>>;

    /// Aggregate counts
    async fn stats(&self) -> Result<StatsSnapshot>;

    /// Most recent health readings for one device, newest first
    async fn recent_metrics(&self, ip: &str, limit: usize) -> Result<Vec<MetricSample>>;
}
