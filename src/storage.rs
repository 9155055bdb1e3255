//! Collaborator contracts the engine consumes but does not own.
//! The host process supplies an implementation (backed by whatever database
//! it likes); the engine only ever sees this narrow trait.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{DiscoveredDevice, DiscoveryRule, Network};

/// Capability set the engine requires of its storage collaborator.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get_network(&self, network_id: &str) -> Result<Network>;

    /// `network_id = ""` lists every rule regardless of network.
    async fn list_discovery_rules(&self, network_id: &str) -> Result<Vec<DiscoveryRule>>;

    async fn get_discovery_rule(&self, id: &str) -> Result<DiscoveryRule>;

    async fn create_or_update_discovered_device(&self, device: &DiscoveredDevice) -> Result<()>;
}

/// Invoked at least at scan start, once `total_hosts` is known, every 50
/// host completions, and at terminal state. Must be fast and non-throwing;
/// the scanner tolerates this being a no-op.
pub type UpdateCallback = std::sync::Arc<dyn Fn(&crate::model::DiscoveryScan) + Send + Sync>;
