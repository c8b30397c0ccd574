//! Vendor output parsing
//!
//! CLI and SNMP output from the supported OLT models is free-form text;
//! parsing is line/token based and deliberately forgiving: a malformed
//! field becomes `None`/`Unknown`, it never discards the rest of an
//! otherwise valid record.

use crate::store::TerminalStatus;
use serde::{Deserialize, Serialize};

/// Supported device models, one parser per variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceModel {
    VsolGpon,
    VsolEpon,
    /// Identified via SNMP only; no CLI terminal table
    GenericSnmp,
}

impl DeviceModel {
    /// CLI command listing attached terminals, if the model has one
    pub fn onu_state_command(&self) -> Option<&'static str> {
        match self {
            Self::VsolGpon => Some("show gpon onu state"),
            Self::VsolEpon => Some("show epon onu information"),
            Self::GenericSnmp => None,
        }
    }

    /// Per-terminal detail commands, tried in order until one parses
    pub fn onu_detail_commands(&self, interface: &str, onu_id: &str) -> Vec<String> {
        match self {
            Self::VsolGpon => vec![
                format!("show gpon onu detail {} {}", interface, onu_id),
                format!("show onu opm-diag {} {}", interface, onu_id),
                format!("show gpon onu optical-info {} {}", interface, onu_id),
            ],
            Self::VsolEpon => vec![
                format!("show epon onu detail {} {}", interface, onu_id),
                format!("show onu opm-diag {} {}", interface, onu_id),
            ],
            Self::GenericSnmp => Vec::new(),
        }
    }

    fn interface_prefix(&self) -> &'static str {
        match self {
            Self::VsolGpon => "gpon",
            Self::VsolEpon => "epon",
            Self::GenericSnmp => "",
        }
    }

    /// Parse the terminal state table for this model
    pub fn parse_onu_state(&self, raw: &str) -> Vec<OnuStateRow> {
        let prefix = self.interface_prefix();
        if prefix.is_empty() {
            return Vec::new();
        }
        raw.lines()
            .filter_map(|line| parse_state_line(line, prefix))
            .collect()
    }
}

/// One row of the terminal state table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnuStateRow {
    pub interface: String,
    pub onu_id: String,
    pub slot: String,
    pub port: String,
    pub status: TerminalStatus,
}

/// Optical/identity detail for one terminal
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OnuDetail {
    pub serial: Option<String>,
    pub rx_power_dbm: Option<f64>,
    pub tx_power_dbm: Option<f64>,
}

impl OnuDetail {
    pub fn is_empty(&self) -> bool {
        self.serial.is_none() && self.rx_power_dbm.is_none() && self.tx_power_dbm.is_none()
    }
}

/// True when a version/sysDescr string identifies a supported OLT
pub fn is_olt_banner(banner: &str) -> bool {
    let upper = banner.to_uppercase();
    ["VSOL", "V-SOL", "GPON", "EPON", "OLT"]
        .iter()
        .any(|marker| upper.contains(marker))
}

/// Pick the model variant from a version/sysDescr string
pub fn detect_model(banner: &str) -> Option<DeviceModel> {
    if !is_olt_banner(banner) {
        return None;
    }
    let upper = banner.to_uppercase();
    if upper.contains("EPON") && !upper.contains("GPON") {
        Some(DeviceModel::VsolEpon)
    } else {
        Some(DeviceModel::VsolGpon)
    }
}

/// Extract the hostname from `show system` output
pub fn parse_system_name(output: &str) -> Option<String> {
    for line in output.lines() {
        if line.to_lowercase().contains("hostname") {
            if let Some(last) = line.split_whitespace().last() {
                let name = last.trim_matches(':');
                if !name.is_empty() && !name.eq_ignore_ascii_case("hostname") {
                    return Some(name.to_string());
                }
            }
        }
    }
    None
}

/// Extract the model line from `show version` output, truncated
pub fn parse_model(output: &str) -> Option<String> {
    for line in output.lines() {
        let lower = line.to_lowercase();
        if lower.contains("model") || lower.contains("hardware") {
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.chars().take(50).collect());
            }
        }
    }
    None
}

/// Extract a temperature reading (degrees C)
pub fn parse_temperature(output: &str) -> Option<f64> {
    for line in output.lines() {
        if line.to_lowercase().contains("temperature") {
            if let Some(value) = line.split_whitespace().find_map(parse_signed_f64) {
                return Some(value);
            }
        }
    }
    None
}

/// Extract the first percentage value ("CPU usage: 23%")
pub fn parse_percent(output: &str) -> Option<f64> {
    for line in output.lines() {
        if line.contains('%') {
            for token in line.split_whitespace() {
                if let Some(stripped) = token.strip_suffix('%') {
                    if let Ok(value) = stripped.parse::<f64>() {
                        return Some(value);
                    }
                }
            }
        }
    }
    None
}

/// Parse one `show ... onu detail` output
pub fn parse_onu_detail(output: &str) -> OnuDetail {
    let mut detail = OnuDetail::default();

    for line in output.lines() {
        let lower = line.to_lowercase();
        if detail.serial.is_none()
            && (lower.contains("serial") || has_word(&lower, "sn"))
        {
            if let Some(last) = line.split_whitespace().last() {
                let serial = last.trim_matches(':');
                if serial.len() > 1 {
                    detail.serial = Some(serial.to_string());
                }
            }
        }
        if detail.rx_power_dbm.is_none() && lower.contains("rx") && lower.contains("power") {
            detail.rx_power_dbm = line.split_whitespace().find_map(parse_dbm);
        }
        if detail.tx_power_dbm.is_none() && lower.contains("tx") && lower.contains("power") {
            detail.tx_power_dbm = line.split_whitespace().find_map(parse_dbm);
        }
    }

    detail
}

/// Vendor status words to the normalized terminal status
pub fn normalize_status(raw: &str) -> TerminalStatus {
    let lower = raw.to_lowercase();
    if lower.contains("dying") {
        TerminalStatus::DyingGasp
    } else if lower.contains("los") {
        TerminalStatus::Los
    } else if lower.contains("working")
        || lower.contains("online")
        || lower == "active"
        || lower == "up"
    {
        TerminalStatus::Online
    } else if lower.contains("offline") || lower.contains("power-off") || lower == "down" {
        TerminalStatus::Offline
    } else {
        TerminalStatus::Unknown
    }
}

fn parse_state_line(line: &str, prefix: &str) -> Option<OnuStateRow> {
    let mut tokens = line.split_whitespace();
    let first = tokens.next()?;
    if !first.to_lowercase().starts_with(prefix) || !first.contains('/') {
        return None;
    }

    // Two table shapes exist: "gpon0/1:2 ... working" and
    // "gpon0/1 2 ... working"
    let (interface, onu_id) = if let Some((iface, id)) = first.split_once(':') {
        (iface.to_string(), id.to_string())
    } else {
        let id = tokens.next()?;
        // The id column must be numeric; header lines are not
        id.parse::<u32>().ok()?;
        (first.to_string(), id.to_string())
    };

    let (slot, port) = split_slot_port(&interface);
    // Column layouts vary by firmware (admin/OMCC columns may precede
    // the phase state), so take the first recognizable status word
    let status = tokens
        .map(normalize_status)
        .find(|s| *s != TerminalStatus::Unknown)
        .unwrap_or(TerminalStatus::Unknown);

    Some(OnuStateRow {
        interface,
        onu_id,
        slot,
        port,
        status,
    })
}

/// "gpon0/1/2" -> slot "1", port "2"; missing segments default to "0"
fn split_slot_port(interface: &str) -> (String, String) {
    let segments: Vec<&str> = interface.split('/').collect();
    let slot = segments.get(1).unwrap_or(&"0").to_string();
    let port = segments.get(2).unwrap_or(&"0").to_string();
    (slot, port)
}

/// Parse a signed base-10 float, tolerating a dBm unit suffix
fn parse_dbm(token: &str) -> Option<f64> {
    let cleaned = token
        .trim_end_matches("dBm")
        .trim_end_matches("dbm")
        .trim_end_matches("(dBm)");
    parse_signed_f64(cleaned)
}

fn parse_signed_f64(token: &str) -> Option<f64> {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return None;
    }
    let body = trimmed.strip_prefix('-').unwrap_or(trimmed);
    if body.is_empty() || !body.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }
    if !body.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    trimmed.parse::<f64>().ok()
}

fn has_word(haystack: &str, word: &str) -> bool {
    haystack
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|w| w == word)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GPON_STATE: &str = "\
-----------------------------------------------------------
OnuIndex      AdminState    OMCC State    Phase State
-----------------------------------------------------------
gpon0/1:1     enable        enable        working
gpon0/1:2     enable        enable        LOS
gpon0/2:1     enable        disable       DyingGasp
";

    const GPON_STATE_SPACED: &str = "\
gpon0/1   1   online
gpon0/1   2   offline
";

    #[test]
    fn parses_colon_form_state_table() {
        let rows = DeviceModel::VsolGpon.parse_onu_state(GPON_STATE);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].interface, "gpon0/1");
        assert_eq!(rows[0].onu_id, "1");
        assert_eq!(rows[0].slot, "1");
        assert_eq!(rows[0].status, TerminalStatus::Online);
        assert_eq!(rows[1].status, TerminalStatus::Los);
        assert_eq!(rows[2].status, TerminalStatus::DyingGasp);
    }

    #[test]
    fn parses_space_form_state_table() {
        let rows = DeviceModel::VsolGpon.parse_onu_state(GPON_STATE_SPACED);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].onu_id, "2");
        assert_eq!(rows[1].status, TerminalStatus::Offline);
    }

    #[test]
    fn header_and_separator_lines_are_skipped() {
        let rows = DeviceModel::VsolGpon.parse_onu_state("OnuIndex State\n----\n");
        assert!(rows.is_empty());
    }

    #[test]
    fn epon_parser_ignores_gpon_rows() {
        let rows = DeviceModel::VsolEpon.parse_onu_state(GPON_STATE);
        assert!(rows.is_empty());
    }

    #[test]
    fn parses_onu_detail_with_units() {
        let output = "\
ONU Serial Number : VSOL12345678
Rx Optical Power  : -21.35 dBm
Tx Optical Power  : 2.48 dBm
";
        let detail = parse_onu_detail(output);
        assert_eq!(detail.serial.as_deref(), Some("VSOL12345678"));
        assert_eq!(detail.rx_power_dbm, Some(-21.35));
        assert_eq!(detail.tx_power_dbm, Some(2.48));
    }

    #[test]
    fn malformed_power_field_becomes_none() {
        let output = "SN: ABC123\nRx Power: n/a\n";
        let detail = parse_onu_detail(output);
        assert_eq!(detail.serial.as_deref(), Some("ABC123"));
        assert_eq!(detail.rx_power_dbm, None);
    }

    #[test]
    fn detects_models_from_banner() {
        assert_eq!(
            detect_model("V-SOL V1600G1 GPON OLT"),
            Some(DeviceModel::VsolGpon)
        );
        assert_eq!(
            detect_model("VSOL EPON OLT V1600D"),
            Some(DeviceModel::VsolEpon)
        );
        assert_eq!(detect_model("Linux ubuntu 5.15"), None);
    }

    #[test]
    fn extracts_system_fields() {
        assert_eq!(
            parse_system_name("System info\n hostname OLT-CENTRO\n").as_deref(),
            Some("OLT-CENTRO")
        );
        assert_eq!(
            parse_model("Product Model: V1600G2\nUptime: 4d").as_deref(),
            Some("Product Model: V1600G2")
        );
        assert_eq!(parse_temperature("Board temperature 43.5 C"), Some(43.5));
        assert_eq!(parse_percent("CPU usage: 17% (1 min)"), Some(17.0));
        assert_eq!(parse_percent("CPU usage unavailable"), None);
    }

    #[test]
    fn status_normalization_covers_vendor_words() {
        assert_eq!(normalize_status("working"), TerminalStatus::Online);
        assert_eq!(normalize_status("LOS"), TerminalStatus::Los);
        assert_eq!(normalize_status("DyingGasp"), TerminalStatus::DyingGasp);
        assert_eq!(normalize_status("power-off"), TerminalStatus::Offline);
        assert_eq!(normalize_status("???"), TerminalStatus::Unknown);
    }
}
