//! Engine-wide options. Distinct from `DiscoveryRule`: these
//! are process-level defaults the host process configures once, while the
//! rule is per-network and externally owned.

use std::time::Duration;

use crate::scanner::port::PortSet;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub privileged: bool,
    pub ping_timeout: Duration,
    pub port_timeout: Duration,
    pub arp_timeout: Duration,
    pub port_scan_type: PortScanType,
    pub service_detection: bool,
    pub arp_scan: bool,
    pub os_detection: bool,
    pub max_concurrency: usize,
}

#[derive(Debug, Clone)]
pub enum PortScanType {
    Common,
    Full,
    Custom(Vec<u16>),
}

impl EngineOptions {
    pub fn port_set(&self) -> PortSet {
        match &self.port_scan_type {
            PortScanType::Common => PortSet::Common,
            PortScanType::Full => PortSet::Full,
            PortScanType::Custom(ports) => PortSet::Custom(ports.clone()),
        }
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            privileged: true,
            ping_timeout: Duration::from_secs(2),
            port_timeout: Duration::from_millis(500),
            arp_timeout: Duration::from_millis(500),
            port_scan_type: PortScanType::Common,
            service_detection: true,
            arp_scan: true,
            os_detection: true,
            max_concurrency: 50,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let opts = EngineOptions::default();
        assert!(opts.privileged);
        assert_eq!(opts.ping_timeout, Duration::from_secs(2));
        assert_eq!(opts.port_timeout, Duration::from_millis(500));
        assert_eq!(opts.arp_timeout, Duration::from_millis(500));
        assert_eq!(opts.max_concurrency, 50);
        assert!(opts.service_detection);
        assert!(opts.arp_scan);
        assert!(opts.os_detection);
    }
}
