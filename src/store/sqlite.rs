//! SQLite-backed store
//!
//! Schema is created at startup if missing; there is no separate
//! migration tooling. Each reconcile pass commits as one transaction.

use super::{
    DeviceRecord, DeviceStatus, DeviceStore, MetricSample, StatsSnapshot, StoreMutation,
    StoreSnapshot, TerminalRecord, TerminalStatus, METRIC_HISTORY_LIMIT,
};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create tables if they do not exist
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS devices (
                ip TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                model TEXT NOT NULL,
                credentials_ref TEXT NOT NULL,
                status TEXT NOT NULL,
                missed_count INTEGER NOT NULL DEFAULT 0,
                temperature_c REAL,
                cpu_percent REAL,
                memory_percent REAL,
                last_seen TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS terminals (
                olt_ip TEXT NOT NULL,
                serial TEXT NOT NULL,
                interface TEXT NOT NULL,
                slot TEXT NOT NULL,
                port TEXT NOT NULL,
                status TEXT NOT NULL,
                rx_power_dbm REAL,
                tx_power_dbm REAL,
                missed_count INTEGER NOT NULL DEFAULT 0,
                last_seen TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (olt_ip, serial),
                FOREIGN KEY (olt_ip) REFERENCES devices (ip) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                device_ip TEXT NOT NULL,
                temperature_c REAL,
                cpu_percent REAL,
                memory_percent REAL,
                recorded_at TEXT NOT NULL,
                FOREIGN KEY (device_ip) REFERENCES devices (ip) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

const DEVICE_COLUMNS: &str = "ip, name, model, credentials_ref, status, missed_count, \
     temperature_c, cpu_percent, memory_percent, last_seen, created_at";

const TERMINAL_COLUMNS: &str = "olt_ip, serial, interface, slot, port, status, \
     rx_power_dbm, tx_power_dbm, missed_count, last_seen, created_at";

#[async_trait]
impl DeviceStore for SqliteStore {
    async fn snapshot(&self) -> Result<StoreSnapshot> {
        let devices: Vec<DbDevice> = sqlx::query_as(&format!(
            "SELECT {} FROM devices",
            DEVICE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        let terminals: Vec<DbTerminal> = sqlx::query_as(&format!(
            "SELECT {} FROM terminals",
            TERMINAL_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut snapshot = StoreSnapshot::default();
        for row in devices {
            let record = row.into_record();
            snapshot.devices.insert(record.ip.clone(), record);
        }
        for row in terminals {
            let record = row.into_record();
            snapshot
                .terminals
                .insert((record.olt_ip.clone(), record.serial.clone()), record);
        }
        Ok(snapshot)
    }

    async fn apply(&self, mutations: &[StoreMutation]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for mutation in mutations {
            match mutation {
                StoreMutation::UpsertDevice(d) => {
                    sqlx::query(
                        r#"
                        INSERT INTO devices
                            (ip, name, model, credentials_ref, status, missed_count,
                             temperature_c, cpu_percent, memory_percent, last_seen, created_at)
                        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                        ON CONFLICT (ip) DO UPDATE SET
                            name = excluded.name,
                            model = excluded.model,
                            credentials_ref = excluded.credentials_ref,
                            status = excluded.status,
                            missed_count = excluded.missed_count,
                            temperature_c = excluded.temperature_c,
                            cpu_percent = excluded.cpu_percent,
                            memory_percent = excluded.memory_percent,
                            last_seen = excluded.last_seen
                        "#,
                    )
                    .bind(&d.ip)
                    .bind(&d.name)
                    .bind(&d.model)
                    .bind(&d.credentials_ref)
                    .bind(d.status.as_str())
                    .bind(d.missed_count as i64)
                    .bind(d.temperature_c)
                    .bind(d.cpu_percent)
                    .bind(d.memory_percent)
                    .bind(d.last_seen)
                    .bind(d.created_at)
                    .execute(&mut *tx)
                    .await?;
                }
                StoreMutation::DeleteDevice { ip } => {
                    // Cascade deletes mirror the FK rules; done explicitly
                    // so they hold even without PRAGMA foreign_keys
                    sqlx::query("DELETE FROM terminals WHERE olt_ip = ?")
                        .bind(ip)
                        .execute(&mut *tx)
                        .await?;
                    sqlx::query("DELETE FROM metrics WHERE device_ip = ?")
                        .bind(ip)
                        .execute(&mut *tx)
                        .await?;
                    sqlx::query("DELETE FROM devices WHERE ip = ?")
                        .bind(ip)
                        .execute(&mut *tx)
                        .await?;
                }
                StoreMutation::UpsertTerminal(t) => {
                    sqlx::query(
                        r#"
                        INSERT INTO terminals
                            (olt_ip, serial, interface, slot, port, status,
                             rx_power_dbm, tx_power_dbm, missed_count, last_seen, created_at)
                        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                        ON CONFLICT (olt_ip, serial) DO UPDATE SET
                            interface = excluded.interface,
                            slot = excluded.slot,
                            port = excluded.port,
                            status = excluded.status,
                            rx_power_dbm = excluded.rx_power_dbm,
                            tx_power_dbm = excluded.tx_power_dbm,
                            missed_count = excluded.missed_count,
                            last_seen = excluded.last_seen
                        "#,
                    )
                    .bind(&t.olt_ip)
                    .bind(&t.serial)
                    .bind(&t.interface)
                    .bind(&t.slot)
                    .bind(&t.port)
                    .bind(t.status.as_str())
                    .bind(t.rx_power_dbm)
                    .bind(t.tx_power_dbm)
                    .bind(t.missed_count as i64)
                    .bind(t.last_seen)
                    .bind(t.created_at)
                    .execute(&mut *tx)
                    .await?;
                }
                StoreMutation::DeleteTerminal { olt_ip, serial } => {
                    sqlx::query("DELETE FROM terminals WHERE olt_ip = ? AND serial = ?")
                        .bind(olt_ip)
                        .bind(serial)
                        .execute(&mut *tx)
                        .await?;
                }
                StoreMutation::AppendMetric(m) => {
                    sqlx::query(
                        r#"
                        INSERT INTO metrics
                            (device_ip, temperature_c, cpu_percent, memory_percent, recorded_at)
                        VALUES (?, ?, ?, ?, ?)
                        "#,
                    )
                    .bind(&m.device_ip)
                    .bind(m.temperature_c)
                    .bind(m.cpu_percent)
                    .bind(m.memory_percent)
                    .bind(m.recorded_at)
                    .execute(&mut *tx)
                    .await?;
                    // Bounded history per device
                    sqlx::query(
                        r#"
                        DELETE FROM metrics
                        WHERE device_ip = ? AND id NOT IN (
                            SELECT id FROM metrics
                            WHERE device_ip = ?
                            ORDER BY id DESC LIMIT ?
                        )
                        "#,
                    )
                    .bind(&m.device_ip)
                    .bind(&m.device_ip)
                    .bind(METRIC_HISTORY_LIMIT as i64)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_devices(&self) -> Result<Vec<DeviceRecord>> {
        let rows: Vec<DbDevice> = sqlx::query_as(&format!(
            "SELECT {} FROM devices ORDER BY created_at DESC",
            DEVICE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(DbDevice::into_record).collect())
    }

    async fn device_with_terminals(
        &self,
        ip: &str,
    ) -> Result<Option<(DeviceRecord, Vec<TerminalRecord>)>> {
        let device: Option<DbDevice> = sqlx::query_as(&format!(
            "SELECT {} FROM devices WHERE ip = ?",
            DEVICE_COLUMNS
        ))
        .bind(ip)
        .fetch_optional(&self.pool)
        .await?;

        let Some(device) = device else {
            return Ok(None);
        };

        let terminals: Vec<DbTerminal> = sqlx::query_as(&format!(
            "SELECT {} FROM terminals WHERE olt_ip = ? ORDER BY interface, serial",
            TERMINAL_COLUMNS
        ))
        .bind(ip)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some((
            device.into_record(),
            terminals.into_iter().map(DbTerminal::into_record).collect(),
        )))
    }

    async fn stats(&self) -> Result<StatsSnapshot> {
        let (total_devices,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM devices")
            .fetch_one(&self.pool)
            .await?;
        let (devices_online,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM devices WHERE status = 'online'")
                .fetch_one(&self.pool)
                .await?;
        let (total_terminals,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM terminals")
            .fetch_one(&self.pool)
            .await?;

        Ok(StatsSnapshot {
            total_devices: total_devices as u64,
            total_terminals: total_terminals as u64,
            devices_online: devices_online as u64,
            timestamp: Utc::now(),
        })
    }

    async fn recent_metrics(&self, ip: &str, limit: usize) -> Result<Vec<MetricSample>> {
        let rows: Vec<DbMetric> = sqlx::query_as(
            "SELECT device_ip, temperature_c, cpu_percent, memory_percent, recorded_at \
             FROM metrics WHERE device_ip = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(ip)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(DbMetric::into_sample).collect())
    }
}

/// Database row for one health reading
#[derive(Debug, sqlx::FromRow)]
struct DbMetric {
    device_ip: String,
    temperature_c: Option<f64>,
    cpu_percent: Option<f64>,
    memory_percent: Option<f64>,
    recorded_at: DateTime<Utc>,
}

impl DbMetric {
    fn into_sample(self) -> MetricSample {
        MetricSample {
            device_ip: self.device_ip,
            temperature_c: self.temperature_c,
            cpu_percent: self.cpu_percent,
            memory_percent: self.memory_percent,
            recorded_at: self.recorded_at,
        }
    }
}

/// Database row for a device
#[derive(Debug, sqlx::FromRow)]
struct DbDevice {
    ip: String,
    name: String,
    model: String,
    credentials_ref: String,
    status: String,
    missed_count: i64,
    temperature_c: Option<f64>,
    cpu_percent: Option<f64>,
    memory_percent: Option<f64>,
    last_seen: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl DbDevice {
    fn into_record(self) -> DeviceRecord {
        DeviceRecord {
            ip: self.ip,
            name: self.name,
            model: self.model,
            credentials_ref: self.credentials_ref,
            status: DeviceStatus::from_str(&self.status),
            missed_count: self.missed_count.max(0) as u32,
            temperature_c: self.temperature_c,
            cpu_percent: self.cpu_percent,
            memory_percent: self.memory_percent,
            last_seen: self.last_seen,
            created_at: self.created_at,
        }
    }
}

/// Database row for a terminal
#[derive(Debug, sqlx::FromRow)]
struct DbTerminal {
    olt_ip: String,
    serial: String,
    interface: String,
    slot: String,
    port: String,
    status: String,
    rx_power_dbm: Option<f64>,
    tx_power_dbm: Option<f64>,
    missed_count: i64,
    last_seen: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl DbTerminal {
    fn into_record(self) -> TerminalRecord {
        TerminalRecord {
            olt_ip: self.olt_ip,
            serial: self.serial,
            interface: self.interface,
            slot: self.slot,
            port: self.port,
            status: TerminalStatus::from_str(&self.status),
            rx_power_dbm: self.rx_power_dbm,
            tx_power_dbm: self.tx_power_dbm,
            missed_count: self.missed_count.max(0) as u32,
            last_seen: self.last_seen,
            created_at: self.created_at,
        }
    }
}
