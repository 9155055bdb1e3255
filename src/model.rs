//! Data model shared by the scheduler, network scanner, and host pipeline.
//! Mirrors the collaborator schemas in the design: rules and networks are
//! read-only inputs, scans and devices are engine-owned outputs.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How aggressive a scan should be. Determines `scan_depth` and gates which
/// pipeline stages in the host scanner run at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanType {
    Quick,
    Standard,
    Full,
    Deep,
}

impl ScanType {
    /// quick=1, standard=2, full=3, deep=5
    pub fn depth(self) -> u8 {
        match self {
            ScanType::Quick => 1,
            ScanType::Standard => 2,
            ScanType::Full => 3,
            ScanType::Deep => 5,
        }
    }
}

impl std::fmt::Display for ScanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanType::Quick => write!(f, "quick"),
            ScanType::Standard => write!(f, "standard"),
            ScanType::Full => write!(f, "full"),
            ScanType::Deep => write!(f, "deep"),
        }
    }
}

/// Shared status vocabulary for both `DiscoveryScan` and `Task`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Reachability status of a discovered device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Unknown,
    Online,
    Offline,
}

/// Externally-owned rule that drives one recurring discovery of a network.
/// Read-only to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryRule {
    pub id: String,
    pub network_id: String,
    pub scan_type: ScanType,
    pub scan_ports: bool,
    pub service_detection: bool,
    pub os_detection: bool,
    /// CIDRs or bare IPs to skip during the port sweep / host pipeline.
    pub exclude_ips: Vec<String>,
    pub scan_interval_hours: u64,
    pub enabled: bool,
}

/// Externally-owned network definition. Read-only to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub network_id: String,
    pub subnet: Ipv4Network,
}

/// Engine-owned scan record, mutated only by the network scanner and
/// emitted via the `on_update` callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryScan {
    pub id: Uuid,
    pub network_id: String,
    pub scan_type: ScanType,
    pub scan_depth: u8,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_hosts: u32,
    pub scanned_hosts: u32,
    pub found_hosts: u32,
    pub progress_percent: u8,
    pub error_message: Option<String>,
    pub duration_seconds: Option<i64>,
}

impl DiscoveryScan {
    pub fn new(network_id: impl Into<String>, scan_type: ScanType) -> Self {
        Self {
            id: new_scan_id(),
            network_id: network_id.into(),
            scan_type,
            scan_depth: scan_type.depth(),
            status: RunStatus::Pending,
            started_at: None,
            completed_at: None,
            total_hosts: 0,
            scanned_hosts: 0,
            found_hosts: 0,
            progress_percent: 0,
            error_message: None,
            duration_seconds: None,
        }
    }

    /// Recompute `progress_percent` from the current counters.
    pub fn recompute_progress(&mut self) {
        self.progress_percent = if self.total_hosts > 0 {
            ((self.scanned_hosts as u64 * 100) / self.total_hosts as u64).min(100) as u8
        } else {
            0
        };
    }
}

/// Generate a scan/task identifier. Uses UUIDv7 (time-ordered), per the
/// data model's "UUIDv7 preferred, UUIDv4 fallback" — the `v4` feature
/// stays enabled for callers/tests that want a fixed, non-time-based id.
pub fn new_scan_id() -> Uuid {
    Uuid::now_v7()
}

/// Per-port service fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub port: u16,
    pub protocol: &'static str,
    pub service: String,
    pub product: Option<String>,
    pub version: Option<String>,
    pub banner: Option<String>,
}

impl ServiceInfo {
    pub fn new(port: u16, service: impl Into<String>) -> Self {
        Self {
            port,
            protocol: "tcp",
            service: service.into(),
            product: None,
            version: None,
            banner: None,
        }
    }
}

/// Engine-produced, storage-owned device profile. Upserted per
/// `(network_id, ip)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    pub id: Uuid,
    pub network_id: String,
    pub ip: Ipv4Addr,
    pub last_scan_id: Uuid,
    pub last_seen: DateTime<Utc>,
    pub status: DeviceStatus,
    pub mac_address: Option<String>,
    pub hostname: Option<String>,
    pub open_ports: BTreeSet<u16>,
    pub services: Vec<ServiceInfo>,
    pub os_guess: Option<String>,
    pub os_family: Option<String>,
    pub confidence: u8,
}

impl DiscoveredDevice {
    pub fn new(network_id: impl Into<String>, ip: Ipv4Addr, scan_id: Uuid) -> Self {
        Self {
            id: new_scan_id(),
            network_id: network_id.into(),
            ip,
            last_scan_id: scan_id,
            last_seen: Utc::now(),
            status: DeviceStatus::Unknown,
            mac_address: None,
            hostname: None,
            open_ports: BTreeSet::new(),
            services: Vec::new(),
            os_guess: None,
            os_family: None,
            confidence: 0,
        }
    }
}

/// Whether a scheduler task fires once or repeats on its interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Recurring,
    Oneshot,
}
