//! In-memory `Storage` fake used by this crate's own `#[cfg(test)]` builds.
//! Not part of the public API: `lib.rs` only compiles this module under
//! `cfg(test)`, so it is not visible to downstream consumers.

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use ipnetwork::Ipv4Network;
use tokio::sync::RwLock;

use crate::error::{EngineError, Result};
use crate::model::{DiscoveredDevice, DiscoveryRule, Network};
use crate::storage::Storage;

#[derive(Default)]
pub struct InMemoryStorage {
    networks: RwLock<HashMap<String, Network>>,
    rules: RwLock<HashMap<String, DiscoveryRule>>,
    devices: RwLock<HashMap<(String, String), DiscoveredDevice>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_network(&self, network: Network) {
        self.networks
            .write()
            .await
            .insert(network.network_id.clone(), network);
    }

    pub async fn put_rule(&self, rule: DiscoveryRule) {
        self.rules.write().await.insert(rule.id.clone(), rule);
    }

    pub async fn devices(&self) -> Vec<DiscoveredDevice> {
        self.devices.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn get_network(&self, network_id: &str) -> Result<Network> {
        self.networks
            .read()
            .await
            .get(network_id)
            .cloned()
            .ok_or_else(|| EngineError::Storage(format!("unknown network {network_id}")))
    }

    async fn list_discovery_rules(&self, network_id: &str) -> Result<Vec<DiscoveryRule>> {
        let rules = self.rules.read().await;
        Ok(if network_id.is_empty() {
            rules.values().cloned().collect()
        } else {
            rules
                .values()
                .filter(|r| r.network_id == network_id)
                .cloned()
                .collect()
        })
    }

    async fn get_discovery_rule(&self, id: &str) -> Result<DiscoveryRule> {
        self.rules
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::Storage(format!("unknown rule {id}")))
    }

    async fn create_or_update_discovered_device(&self, device: &DiscoveredDevice) -> Result<()> {
        self.devices
            .write()
            .await
            .insert((device.network_id.clone(), device.ip.to_string()), device.clone());
        Ok(())
    }
}

/// Build a `Network` from a CIDR literal, for test fixtures only.
pub fn test_network(network_id: &str, cidr: &str) -> Network {
    Network {
        network_id: network_id.to_string(),
        subnet: Ipv4Network::from_str(cidr).expect("valid test CIDR"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScanType;

    fn rule(id: &str, network_id: &str) -> DiscoveryRule {
        DiscoveryRule {
            id: id.to_string(),
            network_id: network_id.to_string(),
            scan_type: ScanType::Quick,
            scan_ports: false,
            service_detection: false,
            os_detection: false,
            exclude_ips: vec![],
            scan_interval_hours: 24,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn unknown_network_is_an_error_not_a_panic() {
        let storage = InMemoryStorage::new();
        assert!(storage.get_network("nope").await.is_err());
    }

    #[tokio::test]
    async fn list_discovery_rules_empty_string_returns_all() {
        let storage = InMemoryStorage::new();
        storage.put_rule(rule("r1", "net-a")).await;
        storage.put_rule(rule("r2", "net-b")).await;

        assert_eq!(storage.list_discovery_rules("").await.unwrap().len(), 2);
        assert_eq!(storage.list_discovery_rules("net-a").await.unwrap().len(), 1);
    }
}
