//! Thin CLI demonstrating one end-to-end discovery scan against a CIDR.
//! The storage collaborator here is a throwaway in-process map; real
//! deployments supply their own `rackd::Storage` backed by a database.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use ipnetwork::Ipv4Network;
use tokio::sync::RwLock;
use tracing_subscriber::EnvFilter;

use rackd::error::{EngineError, Result};
use rackd::model::{DiscoveredDevice, DiscoveryRule, Network, ScanType};
use rackd::{CancelToken, EngineOptions, Storage};

#[derive(Parser)]
#[command(name = "rackd-demo", about = "Run one discovery scan against a CIDR")]
struct Args {
    /// CIDR to scan, e.g. 192.168.1.0/24
    cidr: String,

    /// Run only a liveness sweep, skipping ports/services/OS guessing.
    #[arg(long)]
    quick: bool,

    /// Run with raw ICMP disabled (no root/CAP_NET_RAW required).
    #[arg(long)]
    unprivileged: bool,
}

struct SingleNetworkStorage {
    network: Network,
    devices: RwLock<HashMap<String, DiscoveredDevice>>,
}

#[async_trait]
impl Storage for SingleNetworkStorage {
    async fn get_network(&self, network_id: &str) -> Result<Network> {
        if network_id == self.network.network_id {
            Ok(self.network.clone())
        } else {
            Err(EngineError::Storage(format!("unknown network {network_id}")))
        }
    }

    async fn list_discovery_rules(&self, _network_id: &str) -> Result<Vec<DiscoveryRule>> {
        Ok(vec![])
    }

    async fn get_discovery_rule(&self, id: &str) -> Result<DiscoveryRule> {
        Err(EngineError::Storage(format!("unknown rule {id}")))
    }

    async fn create_or_update_discovered_device(&self, device: &DiscoveredDevice) -> Result<()> {
        self.devices
            .write()
            .await
            .insert(device.ip.to_string(), device.clone());
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let subnet = Ipv4Network::from_str(&args.cidr)?;

    let network_id = "demo".to_string();
    let storage = Arc::new(SingleNetworkStorage {
        network: Network {
            network_id: network_id.clone(),
            subnet,
        },
        devices: RwLock::new(HashMap::new()),
    });

    let rule = DiscoveryRule {
        id: "demo-rule".to_string(),
        network_id: network_id.clone(),
        scan_type: if args.quick { ScanType::Quick } else { ScanType::Standard },
        scan_ports: !args.quick,
        service_detection: !args.quick,
        os_detection: !args.quick,
        exclude_ips: vec![],
        scan_interval_hours: 24,
        enabled: true,
    };

    let options = EngineOptions {
        privileged: !args.unprivileged,
        ..EngineOptions::default()
    };
    let cancel = CancelToken::new();

    tracing::info!(cidr = %args.cidr, "starting scan");
    let scan = rackd::scan_network(&network_id, &rule, storage.clone(), &options, None, &cancel).await?;

    println!(
        "scan {} finished: {} hosts scanned, {} found, status={:?}",
        scan.id, scan.scanned_hosts, scan.found_hosts, scan.status
    );
    for device in storage.devices.read().await.values() {
        println!(
            "  {} status={:?} mac={:?} hostname={:?} ports={:?} os={:?} confidence={}",
            device.ip,
            device.status,
            device.mac_address,
            device.hostname,
            device.open_ports,
            device.os_guess,
            device.confidence
        );
    }

    Ok(())
}
