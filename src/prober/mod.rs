//! Device prober
//!
//! ## Responsibilities
//!
//! - Decide whether one address hosts a supported OLT
//! - Walk the credential ladder (SNMP communities, then SSH logins)
//! - Enumerate attached terminals with optical detail
//!
//! A probe classifies its address into exactly one outcome; it never
//! writes to the store and never emits events. Credential material
//! stays inside this module; outcomes carry only a credential
//! reference string.

pub mod vendor;

use crate::config::CredentialSet;
use crate::store::TerminalStatus;
use crate::transport::{CliSession, SessionError, Transport};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use vendor::{DeviceModel, OnuStateRow};

const SYS_DESCR_OID: &str = "1.3.6.1.2.1.1.1.0";
const SYS_NAME_OID: &str = "1.3.6.1.2.1.1.5.0";

/// Why an address did not yield a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnreachableReason {
    /// No answer within the probe timeout
    Timeout,
    /// Host refused the connection
    Refused,
    /// Something answered but it is not a supported OLT
    NotRecognized,
    /// Transport-level failure mid-conversation
    Network,
}

impl UnreachableReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Refused => "refused",
            Self::NotRecognized => "not_recognized",
            Self::Network => "network",
        }
    }
}

/// Identity and health of a probed device
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReport {
    pub ip: String,
    pub name: String,
    pub model: DeviceModel,
    /// Model string as printed by the device
    pub model_label: String,
    /// Which credential worked ("ssh:admin", "snmp:public")
    pub credentials_ref: String,
    pub temperature_c: Option<f64>,
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
}

/// One terminal observed during a probe
#[derive(Debug, Clone, PartialEq)]
pub struct TerminalReport {
    pub serial: String,
    pub interface: String,
    pub slot: String,
    pub port: String,
    pub status: TerminalStatus,
    pub rx_power_dbm: Option<f64>,
    pub tx_power_dbm: Option<f64>,
}

/// Classification of one probed address
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Reachable {
        device: DeviceReport,
        terminals: Vec<TerminalReport>,
    },
    /// Device answered but every credential was rejected
    AuthFailed,
    Unreachable(UnreachableReason),
    /// Device answered but its output could not be understood
    ParseError { snippet: String },
}

/// Probing capability consumed by the scanner
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, ip: &str) -> ProbeOutcome;
}

/// Production prober: SNMP identification first, then the SSH ladder
pub struct DeviceProber {
    transport: Arc<dyn Transport>,
    credentials: CredentialSet,
    timeout: Duration,
}

impl DeviceProber {
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: CredentialSet,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            credentials,
            timeout,
        }
    }

    /// SNMP identification across the community ladder. Returns the
    /// banner, the sysName (if any) and the community that answered.
    async fn snmp_identify(&self, ip: &str) -> Option<(String, Option<String>, String)> {
        for community in &self.credentials.snmp_communities {
            match self
                .transport
                .snmp_get(ip, community, SYS_DESCR_OID, self.timeout)
                .await
            {
                Ok(descr) => {
                    let name = self
                        .transport
                        .snmp_get(ip, community, SYS_NAME_OID, self.timeout)
                        .await
                        .ok()
                        .filter(|n| !n.trim().is_empty());
                    return Some((descr, name, community.clone()));
                }
                Err(e) => {
                    debug!(ip = %ip, community = %community, error = %e, "snmp attempt failed");
                }
            }
        }
        None
    }

    /// Full CLI interrogation of an authenticated session. `Ok(None)`
    /// means the device is not a supported OLT.
    async fn interrogate(
        &self,
        ip: &str,
        session: &mut Box<dyn CliSession>,
        credentials_ref: String,
        snmp_name: Option<&str>,
    ) -> Result<Option<(DeviceReport, Vec<TerminalReport>)>, ProbeOutcome> {
        let version = session
            .exec("show version")
            .await
            .map_err(|e| session_failure(ip, e))?;

        let Some(model) = vendor::detect_model(&version) else {
            return Ok(None);
        };

        let system = session
            .exec("show system")
            .await
            .unwrap_or_default();
        let name = vendor::parse_system_name(&system)
            .or_else(|| snmp_name.map(str::to_string))
            .unwrap_or_else(|| default_name(ip));
        let model_label =
            vendor::parse_model(&version).unwrap_or_else(|| "VSOL-OLT".to_string());

        // Health commands are best-effort; firmware variants drop some
        let temperature_c = session
            .exec("show temperature")
            .await
            .ok()
            .and_then(|out| vendor::parse_temperature(&out));
        let cpu_percent = session
            .exec("show cpu")
            .await
            .ok()
            .and_then(|out| vendor::parse_percent(&out));
        let memory_percent = session
            .exec("show memory")
            .await
            .ok()
            .and_then(|out| vendor::parse_percent(&out));

        let terminals = match model.onu_state_command() {
            Some(command) => {
                let raw = session
                    .exec(command)
                    .await
                    .map_err(|e| session_failure(ip, e))?;
                let rows = model.parse_onu_state(&raw);
                if rows.is_empty() && looks_like_onu_table(&raw) {
                    return Err(ProbeOutcome::ParseError {
                        snippet: snippet_of(&raw),
                    });
                }
                self.collect_terminals(session, model, rows).await
            }
            None => Vec::new(),
        };

        Ok(Some((
            DeviceReport {
                ip: ip.to_string(),
                name,
                model,
                model_label,
                credentials_ref,
                temperature_c,
                cpu_percent,
                memory_percent,
            },
            terminals,
        )))
    }

    async fn collect_terminals(
        &self,
        session: &mut Box<dyn CliSession>,
        model: DeviceModel,
        rows: Vec<OnuStateRow>,
    ) -> Vec<TerminalReport> {
        let mut by_serial: BTreeMap<String, TerminalReport> = BTreeMap::new();

        for row in rows {
            let mut detail = vendor::OnuDetail::default();
            for command in model.onu_detail_commands(&row.interface, &row.onu_id) {
                if let Ok(output) = session.exec(&command).await {
                    let parsed = vendor::parse_onu_detail(&output);
                    if !parsed.is_empty() {
                        detail = parsed;
                        break;
                    }
                }
            }

            // Without a serial the terminal still gets a stable identity
            let serial = detail
                .serial
                .clone()
                .unwrap_or_else(|| format!("{}:{}", row.interface, row.onu_id));

            by_serial.entry(serial.clone()).or_insert(TerminalReport {
                serial,
                interface: row.interface,
                slot: row.slot,
                port: row.port,
                status: row.status,
                rx_power_dbm: detail.rx_power_dbm,
                tx_power_dbm: detail.tx_power_dbm,
            });
        }

        by_serial.into_values().collect()
    }
}

#[async_trait]
impl Probe for DeviceProber {
    async fn probe(&self, ip: &str) -> ProbeOutcome {
        let snmp = self.snmp_identify(ip).await;
        let snmp_olt = snmp
            .as_ref()
            .filter(|(descr, _, _)| vendor::is_olt_banner(descr));

        // SSH reachability gate
        if let Err(e) = self.transport.tcp_probe(ip, 22, self.timeout).await {
            // SNMP identification alone is enough to report the device,
            // just without a terminal inventory
            if let Some((descr, name, community)) = snmp_olt {
                return ProbeOutcome::Reachable {
                    device: snmp_only_report(ip, descr, name.as_deref(), community),
                    terminals: Vec::new(),
                };
            }
            return ProbeOutcome::Unreachable(match e {
                SessionError::Refused => UnreachableReason::Refused,
                SessionError::Timeout => UnreachableReason::Timeout,
                _ => UnreachableReason::Network,
            });
        }

        let snmp_name = snmp.as_ref().and_then(|(_, name, _)| name.clone());
        let mut auth_failed = false;
        let mut not_recognized = false;
        let mut last_network: Option<UnreachableReason> = None;

        for credential in &self.credentials.ssh {
            let mut session = match self
                .transport
                .ssh_session(ip, credential, self.timeout)
                .await
            {
                Ok(session) => session,
                Err(SessionError::AuthFailed) => {
                    auth_failed = true;
                    continue;
                }
                Err(SessionError::Timeout) => {
                    last_network = Some(UnreachableReason::Timeout);
                    continue;
                }
                Err(SessionError::Refused) => {
                    last_network = Some(UnreachableReason::Refused);
                    continue;
                }
                Err(_) => {
                    last_network = Some(UnreachableReason::Network);
                    continue;
                }
            };

            let result = self
                .interrogate(ip, &mut session, credential.reference(), snmp_name.as_deref())
                .await;
            session.close().await;

            match result {
                Ok(Some((device, terminals))) => {
                    return ProbeOutcome::Reachable { device, terminals };
                }
                Ok(None) => {
                    // Logged in, but this is some other kind of box
                    not_recognized = true;
                    break;
                }
                Err(outcome) => return outcome,
            }
        }

        // SSH got nowhere; fall back to what SNMP told us
        if let Some((descr, name, community)) = snmp_olt {
            return ProbeOutcome::Reachable {
                device: snmp_only_report(ip, descr, name.as_deref(), community),
                terminals: Vec::new(),
            };
        }

        if not_recognized {
            ProbeOutcome::Unreachable(UnreachableReason::NotRecognized)
        } else if auth_failed {
            ProbeOutcome::AuthFailed
        } else {
            ProbeOutcome::Unreachable(last_network.unwrap_or(UnreachableReason::Timeout))
        }
    }
}

fn snmp_only_report(
    ip: &str,
    descr: &str,
    name: Option<&str>,
    community: &str,
) -> DeviceReport {
    DeviceReport {
        ip: ip.to_string(),
        name: name
            .map(str::to_string)
            .unwrap_or_else(|| default_name(ip)),
        model: vendor::detect_model(descr).unwrap_or(DeviceModel::GenericSnmp),
        model_label: descr.chars().take(50).collect(),
        credentials_ref: format!("snmp:{}", community),
        temperature_c: None,
        cpu_percent: None,
        memory_percent: None,
    }
}

/// "OLT-45" for 10.0.0.45
fn default_name(ip: &str) -> String {
    let last = ip.rsplit('.').next().unwrap_or(ip);
    format!("OLT-{}", last)
}

fn session_failure(ip: &str, e: SessionError) -> ProbeOutcome {
    debug!(ip = %ip, error = %e, "session dropped mid-probe");
    ProbeOutcome::Unreachable(match e {
        SessionError::Timeout => UnreachableReason::Timeout,
        SessionError::Refused => UnreachableReason::Refused,
        _ => UnreachableReason::Network,
    })
}

/// Heuristic: output that mentions terminals but parsed to nothing is a
/// format we do not understand, not an empty inventory
fn looks_like_onu_table(raw: &str) -> bool {
    let lower = raw.to_lowercase();
    if lower.trim().is_empty() {
        return false;
    }
    if lower.contains("no onu") || lower.contains("not found") {
        return false;
    }
    lower.contains("onu")
}

fn snippet_of(raw: &str) -> String {
    raw.trim().chars().take(120).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Credential, CredentialSet};
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    /// Scripted transport: canned answers per (ip, key)
    #[derive(Default)]
    struct ScriptedTransport {
        /// OIDs answered per community, keyed by "community/oid"
        snmp: HashMap<String, String>,
        /// Whether port 22 answers
        ssh_port_open: bool,
        /// Passwords that authenticate
        accepted_passwords: Vec<String>,
        /// Command outputs for an authenticated session
        cli: HashMap<String, String>,
        log: Mutex<Vec<String>>,
    }

    struct ScriptedSession {
        cli: HashMap<String, String>,
    }

    #[async_trait]
    impl CliSession for ScriptedSession {
        async fn exec(&mut self, command: &str) -> Result<String, SessionError> {
            Ok(self.cli.get(command).cloned().unwrap_or_default())
        }

        async fn close(&mut self) {}
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn tcp_probe(
            &self,
            _ip: &str,
            _port: u16,
            _deadline: Duration,
        ) -> Result<(), SessionError> {
            if self.ssh_port_open {
                Ok(())
            } else {
                Err(SessionError::Timeout)
            }
        }

        async fn ssh_session(
            &self,
            _ip: &str,
            credential: &Credential,
            _deadline: Duration,
        ) -> Result<Box<dyn CliSession>, SessionError> {
            self.log
                .lock()
                .await
                .push(format!("ssh:{}", credential.password));
            if self.accepted_passwords.contains(&credential.password) {
                Ok(Box::new(ScriptedSession {
                    cli: self.cli.clone(),
                }))
            } else {
                Err(SessionError::AuthFailed)
            }
        }

        async fn snmp_get(
            &self,
            _ip: &str,
            community: &str,
            oid: &str,
            _deadline: Duration,
        ) -> Result<String, SessionError> {
            self.snmp
                .get(&format!("{}/{}", community, oid))
                .cloned()
                .ok_or(SessionError::Timeout)
        }
    }

    fn test_credentials() -> CredentialSet {
        CredentialSet {
            ssh: vec![
                Credential {
                    username: "admin".into(),
                    password: "admin".into(),
                },
                Credential {
                    username: "admin".into(),
                    password: "vsol123".into(),
                },
            ],
            snmp_communities: vec!["public".into()],
        }
    }

    fn prober(transport: ScriptedTransport) -> DeviceProber {
        DeviceProber::new(
            Arc::new(transport),
            test_credentials(),
            Duration::from_millis(100),
        )
    }

    fn olt_cli() -> HashMap<String, String> {
        let mut cli = HashMap::new();
        cli.insert(
            "show version".to_string(),
            "V-SOL V1600G1 GPON OLT\nProduct Model: V1600G1".to_string(),
        );
        cli.insert(
            "show system".to_string(),
            "hostname OLT-NORTE\nuptime 12d".to_string(),
        );
        cli.insert(
            "show gpon onu state".to_string(),
            "gpon0/1:1 enable enable working\ngpon0/1:2 enable enable LOS\n".to_string(),
        );
        cli.insert(
            "show gpon onu detail gpon0/1 1".to_string(),
            "SN: VSOL0001\nRx Power: -19.2 dBm\nTx Power: 2.1 dBm".to_string(),
        );
        cli.insert(
            "show gpon onu detail gpon0/1 2".to_string(),
            "SN: VSOL0002\nRx Power: -27.8 dBm".to_string(),
        );
        cli
    }

    #[tokio::test]
    async fn ssh_ladder_stops_at_first_working_credential() {
        let transport = ScriptedTransport {
            ssh_port_open: true,
            accepted_passwords: vec!["vsol123".to_string()],
            cli: olt_cli(),
            ..Default::default()
        };
        let prober = prober(transport);

        let outcome = prober.probe("10.0.0.5").await;
        let ProbeOutcome::Reachable { device, terminals } = outcome else {
            panic!("expected reachable, got {:?}", outcome);
        };
        assert_eq!(device.name, "OLT-NORTE");
        assert_eq!(device.model, DeviceModel::VsolGpon);
        assert_eq!(device.credentials_ref, "ssh:admin");
        assert_eq!(terminals.len(), 2);
        assert_eq!(terminals[0].serial, "VSOL0001");
        assert_eq!(terminals[0].rx_power_dbm, Some(-19.2));
        assert_eq!(terminals[1].status, TerminalStatus::Los);
    }

    #[tokio::test]
    async fn all_credentials_rejected_is_auth_failed() {
        let transport = ScriptedTransport {
            ssh_port_open: true,
            accepted_passwords: vec![],
            cli: olt_cli(),
            ..Default::default()
        };
        let outcome = prober(transport).probe("10.0.0.5").await;
        assert_eq!(outcome, ProbeOutcome::AuthFailed);
    }

    #[tokio::test]
    async fn logged_in_non_olt_is_not_recognized() {
        let mut cli = HashMap::new();
        cli.insert(
            "show version".to_string(),
            "Linux debian 5.15.0 x86_64".to_string(),
        );
        let transport = ScriptedTransport {
            ssh_port_open: true,
            accepted_passwords: vec!["admin".to_string()],
            cli,
            ..Default::default()
        };
        let outcome = prober(transport).probe("10.0.0.5").await;
        assert_eq!(
            outcome,
            ProbeOutcome::Unreachable(UnreachableReason::NotRecognized)
        );
    }

    #[tokio::test]
    async fn silent_host_is_timeout() {
        let transport = ScriptedTransport::default();
        let outcome = prober(transport).probe("10.0.0.9").await;
        assert_eq!(
            outcome,
            ProbeOutcome::Unreachable(UnreachableReason::Timeout)
        );
    }

    #[tokio::test]
    async fn snmp_identified_device_without_ssh_is_reachable() {
        let mut snmp = HashMap::new();
        snmp.insert(
            format!("public/{}", SYS_DESCR_OID),
            "V-SOL GPON OLT V1600G2".to_string(),
        );
        snmp.insert(format!("public/{}", SYS_NAME_OID), "OLT-SUR".to_string());
        let transport = ScriptedTransport {
            snmp,
            ssh_port_open: false,
            ..Default::default()
        };
        let outcome = prober(transport).probe("192.168.1.10").await;
        let ProbeOutcome::Reachable { device, terminals } = outcome else {
            panic!("expected reachable, got {:?}", outcome);
        };
        assert_eq!(device.name, "OLT-SUR");
        assert_eq!(device.credentials_ref, "snmp:public");
        assert!(terminals.is_empty());
    }

    #[tokio::test]
    async fn garbled_onu_table_is_parse_error() {
        let mut cli = olt_cli();
        cli.insert(
            "show gpon onu state".to_string(),
            "ONU table format v9\n<<binary blob>>".to_string(),
        );
        let transport = ScriptedTransport {
            ssh_port_open: true,
            accepted_passwords: vec!["admin".to_string()],
            cli,
            ..Default::default()
        };
        let outcome = prober(transport).probe("10.0.0.5").await;
        let ProbeOutcome::ParseError { snippet } = outcome else {
            panic!("expected parse error, got {:?}", outcome);
        };
        assert!(snippet.contains("ONU table"));
    }

    #[tokio::test]
    async fn missing_serial_falls_back_to_interface_identity() {
        let mut cli = olt_cli();
        cli.remove("show gpon onu detail gpon0/1 2");
        let transport = ScriptedTransport {
            ssh_port_open: true,
            accepted_passwords: vec!["admin".to_string()],
            cli,
            ..Default::default()
        };
        let outcome = prober(transport).probe("10.0.0.5").await;
        let ProbeOutcome::Reachable { terminals, .. } = outcome else {
            panic!("expected reachable, got {:?}", outcome);
        };
        assert!(terminals.iter().any(|t| t.serial == "gpon0/1:2"));
    }
}
