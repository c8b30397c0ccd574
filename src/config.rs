//! Monitor configuration
//!
//! All knobs are loaded from environment variables (`.env` supported via
//! dotenvy in main). Nothing here is recomputed at scan time; the config
//! is read once at startup and shared immutably.

use crate::error::{Error, Result};
use std::time::Duration;

/// One SSH login to try against a candidate device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    /// Reference string stored on a device record ("ssh:admin")
    pub fn reference(&self) -> String {
        format!("ssh:{}", self.username)
    }
}

/// Shared credential set used for every probe in a scan
#[derive(Debug, Clone, Default)]
pub struct CredentialSet {
    /// SSH logins, tried in order
    pub ssh: Vec<Credential>,
    /// SNMP v2c community strings, tried in order
    pub snmp_communities: Vec<String>,
}

/// Top-level configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// SQLite database URL
    pub database_url: String,
    /// IP range prefixes ("10.0.0.") or CIDR blocks ("10.0.0.0/24")
    pub scan_ranges: Vec<String>,
    /// Credentials shared by all probes
    pub credentials: CredentialSet,
    /// Per-probe attempt timeout
    pub probe_timeout: Duration,
    /// Global wall-clock deadline for one scan pass
    pub scan_timeout: Duration,
    /// Maximum concurrent in-flight probes
    pub concurrency: usize,
    /// Consecutive missed scans before a device flips offline
    pub device_offline_after: u32,
    /// Consecutive absent reports before a terminal is removed
    pub terminal_remove_after: u32,
    /// Periodic scan cadence
    pub scan_interval: Duration,
    /// Aggregate stats broadcast cadence
    pub stats_interval: Duration,
    /// Event hub ring-buffer capacity per subscriber
    pub event_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://oltwatch.db".to_string(),
            scan_ranges: vec![
                "10.0.0.".to_string(),
                "172.16.0.".to_string(),
                "192.168.0.".to_string(),
                "192.168.1.".to_string(),
                "192.168.100.".to_string(),
            ],
            credentials: CredentialSet {
                ssh: vec![
                    Credential {
                        username: "admin".to_string(),
                        password: "admin".to_string(),
                    },
                    Credential {
                        username: "admin".to_string(),
                        password: "Admin123!".to_string(),
                    },
                    Credential {
                        username: "admin".to_string(),
                        password: "vsol123".to_string(),
                    },
                ],
                snmp_communities: vec!["public".to_string(), "private".to_string()],
            },
            probe_timeout: Duration::from_millis(5000),
            scan_timeout: Duration::from_secs(120),
            concurrency: 20,
            device_offline_after: 2,
            terminal_remove_after: 2,
            scan_interval: Duration::from_secs(300),
            stats_interval: Duration::from_secs(30),
            event_capacity: 256,
        }
    }
}

impl MonitorConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let scan_ranges = match std::env::var("OLTWATCH_SCAN_RANGES") {
            Ok(v) => parse_list(&v),
            Err(_) => defaults.scan_ranges,
        };
        if scan_ranges.is_empty() {
            return Err(Error::Config("OLTWATCH_SCAN_RANGES is empty".to_string()));
        }

        let ssh = match std::env::var("OLTWATCH_SSH_CREDENTIALS") {
            Ok(v) => parse_credentials(&v)?,
            Err(_) => defaults.credentials.ssh,
        };
        let snmp_communities = match std::env::var("OLTWATCH_SNMP_COMMUNITIES") {
            Ok(v) => parse_list(&v),
            Err(_) => defaults.credentials.snmp_communities,
        };

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or(defaults.database_url),
            scan_ranges,
            credentials: CredentialSet {
                ssh,
                snmp_communities,
            },
            probe_timeout: Duration::from_millis(env_u64(
                "OLTWATCH_PROBE_TIMEOUT_MS",
                defaults.probe_timeout.as_millis() as u64,
            )?),
            scan_timeout: Duration::from_secs(env_u64(
                "OLTWATCH_SCAN_TIMEOUT_SEC",
                defaults.scan_timeout.as_secs(),
            )?),
            concurrency: env_u64("OLTWATCH_CONCURRENCY", defaults.concurrency as u64)?
                .max(1) as usize,
            device_offline_after: env_u64(
                "OLTWATCH_OFFLINE_AFTER_MISSES",
                defaults.device_offline_after as u64,
            )?
            .max(1) as u32,
            terminal_remove_after: env_u64(
                "OLTWATCH_TERMINAL_REMOVE_MISSES",
                defaults.terminal_remove_after as u64,
            )?
            .max(1) as u32,
            scan_interval: Duration::from_secs(env_u64(
                "OLTWATCH_SCAN_INTERVAL_SEC",
                defaults.scan_interval.as_secs(),
            )?),
            stats_interval: Duration::from_secs(env_u64(
                "OLTWATCH_STATS_INTERVAL_SEC",
                defaults.stats_interval.as_secs(),
            )?),
            event_capacity: env_u64(
                "OLTWATCH_EVENT_CAPACITY",
                defaults.event_capacity as u64,
            )?
            .max(8) as usize,
        })
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse "user:pass,user:pass" into credentials
fn parse_credentials(value: &str) -> Result<Vec<Credential>> {
    parse_list(value)
        .into_iter()
        .map(|entry| match entry.split_once(':') {
            Some((user, pass)) if !user.is_empty() => Ok(Credential {
                username: user.to_string(),
                password: pass.to_string(),
            }),
            _ => Err(Error::Config(format!(
                "Invalid credential entry (expected user:pass): {}",
                entry
            ))),
        })
        .collect()
}

fn env_u64(key: &str, default: u64) -> Result<u64> {
    match std::env::var(key) {
        Ok(v) => v
            .trim()
            .parse::<u64>()
            .map_err(|_| Error::Config(format!("{} must be an integer, got {:?}", key, v))),
        Err(_) => Ok(default),
    }
}
