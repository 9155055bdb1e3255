//! Network scanner. Fans a single CIDR out to the host
//! pipeline, bounded by `max_concurrency`, and drives one shared scan
//! record to completion.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, Semaphore};

use crate::cancel::CancelToken;
use crate::cidr;
use crate::error::{EngineError, Result};
use crate::model::{DiscoveryRule, DiscoveryScan, RunStatus};
use crate::options::EngineOptions;
use crate::storage::{Storage, UpdateCallback};

use super::host::scan_host;

/// How often, in completions, to emit a progress update besides the first
/// and last.
const UPDATE_EVERY: u32 = 50;

fn emit(on_update: &Option<UpdateCallback>, scan: &DiscoveryScan) {
    if let Some(cb) = on_update {
        cb(scan);
    }
}

/// `scan_network(network_id, rule, on_update) -> scan | error`. Per-host
/// failures never surface here; only network resolution failures do.
pub async fn scan_network(
    network_id: &str,
    rule: &DiscoveryRule,
    storage: Arc<dyn Storage>,
    options: &EngineOptions,
    on_update: Option<UpdateCallback>,
    cancel: &CancelToken,
) -> Result<DiscoveryScan> {
    let mut scan = DiscoveryScan::new(network_id, rule.scan_type);
    scan.status = RunStatus::Running;
    scan.started_at = Some(Utc::now());
    emit(&on_update, &scan);

    let network = match storage.get_network(network_id).await {
        Ok(network) => network,
        Err(err) => {
            scan.status = RunStatus::Failed;
            scan.error_message = Some(err.to_string());
            scan.completed_at = Some(Utc::now());
            emit(&on_update, &scan);
            return Err(err);
        }
    };

    let hosts = cidr::expand_subnet(network.subnet);
    scan.total_hosts = hosts.len() as u32;
    emit(&on_update, &scan);

    let max_concurrent = options.max_concurrency.max(5);
    let semaphore = Arc::new(Semaphore::new(max_concurrent));
    let scan = Arc::new(Mutex::new(scan));
    let mut set = tokio::task::JoinSet::new();

    for ip in hosts {
        if cancel.is_cancelled() {
            break;
        }

        if cidr::is_excluded(ip, &rule.exclude_ips) {
            // Excluded addresses never run the host pipeline or produce a
            // device record, but they still count toward `scanned_hosts`
            // so a normally-completed scan reaches `scanned_hosts ==
            // total_hosts`.
            let scan_arc = scan.clone();
            let on_update = on_update.clone();
            set.spawn(async move {
                let mut guard = scan_arc.lock().await;
                guard.scanned_hosts += 1;
                guard.recompute_progress();
                let should_emit = guard.scanned_hosts % UPDATE_EVERY == 0
                    || guard.scanned_hosts == guard.total_hosts;
                if should_emit {
                    emit(&on_update, &guard);
                }
            });
            continue;
        }

        let sem = semaphore.clone();
        let rule = rule.clone();
        let options = options.clone();
        let cancel = cancel.clone();
        let scan_arc = scan.clone();
        let scan_id = scan_arc.lock().await.id;
        let network_id = network_id.to_string();
        let on_update = on_update.clone();
        let storage = storage.clone();

        set.spawn(async move {
            let _permit = sem.acquire_owned().await;
            if cancel.is_cancelled() {
                return;
            }

            let device = scan_host(ip, &network_id, &rule, scan_id, &options, &cancel).await;

            if let Some(device) = &device
                && let Err(err) = storage.create_or_update_discovered_device(device).await
            {
                tracing::warn!(%ip, error = %err, "device upsert failed");
            }

            let mut guard = scan_arc.lock().await;
            guard.scanned_hosts += 1;
            if device.is_some() {
                guard.found_hosts += 1;
            }
            guard.recompute_progress();
            let should_emit =
                guard.scanned_hosts % UPDATE_EVERY == 0 || guard.scanned_hosts == guard.total_hosts;
            if should_emit {
                emit(&on_update, &guard);
            }
        });
    }

    while set.join_next().await.is_some() {}

    let mut scan = Arc::try_unwrap(scan)
        .map_err(|_| EngineError::TaskFailed("scan record still referenced".to_string()))?
        .into_inner();

    // Cancellation never marks a scan failed; it also isn't a normal
    // completion, so status stays `running` and the caller decides what
    // that means
    if !cancel.is_cancelled() {
        scan.status = RunStatus::Completed;
        scan.completed_at = Some(Utc::now());
        if let (Some(started), Some(completed)) = (scan.started_at, scan.completed_at) {
            scan.duration_seconds = Some((completed - started).num_seconds());
        }
    }
    emit(&on_update, &scan);

    Ok(scan)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use ipnetwork::Ipv4Network;
    use tokio::sync::Mutex as TokioMutex;

    use super::*;
    use crate::model::{DeviceStatus, DiscoveredDevice, Network, ScanType};

    struct FakeStorage {
        network: Network,
        devices: TokioMutex<HashMap<String, DiscoveredDevice>>,
    }

    #[async_trait]
    impl Storage for FakeStorage {
        async fn get_network(&self, _network_id: &str) -> Result<Network> {
            Ok(self.network.clone())
        }

        async fn list_discovery_rules(&self, _network_id: &str) -> Result<Vec<DiscoveryRule>> {
            Ok(vec![])
        }

        async fn get_discovery_rule(&self, _id: &str) -> Result<DiscoveryRule> {
            Err(EngineError::Storage("no rule".to_string()))
        }

        async fn create_or_update_discovered_device(&self, device: &DiscoveredDevice) -> Result<()> {
            self.devices
                .lock()
                .await
                .insert(device.ip.to_string(), device.clone());
            Ok(())
        }
    }

    fn quick_rule(exclude_ips: Vec<String>) -> DiscoveryRule {
        DiscoveryRule {
            id: "rule-1".to_string(),
            network_id: "net-1".to_string(),
            scan_type: ScanType::Quick,
            scan_ports: false,
            service_detection: false,
            os_detection: false,
            exclude_ips,
            scan_interval_hours: 24,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn slash_30_scan_enumerates_two_hosts() {
        let network = Network {
            network_id: "net-1".to_string(),
            subnet: Ipv4Network::from_str("192.0.2.0/30").unwrap(),
        };
        let storage = FakeStorage {
            network,
            devices: TokioMutex::new(HashMap::new()),
        };
        let options = EngineOptions {
            arp_scan: false,
            ..EngineOptions::default()
        };
        let cancel = CancelToken::new();
        let rule = quick_rule(vec![]);

        let scan = scan_network("net-1", &rule, Arc::new(storage), &options, None, &cancel)
            .await
            .unwrap();

        assert_eq!(scan.total_hosts, 2);
        assert_eq!(scan.scanned_hosts, 2);
        assert_eq!(scan.status, RunStatus::Completed);
        assert_eq!(scan.progress_percent, 100);
    }

    #[tokio::test]
    async fn excluded_ip_counts_as_scanned_but_never_runs_the_pipeline() {
        let network = Network {
            network_id: "net-1".to_string(),
            subnet: Ipv4Network::from_str("192.0.2.0/30").unwrap(),
        };
        let storage = Arc::new(FakeStorage {
            network,
            devices: TokioMutex::new(HashMap::new()),
        });
        let options = EngineOptions {
            arp_scan: false,
            ..EngineOptions::default()
        };
        let cancel = CancelToken::new();
        let rule = quick_rule(vec!["192.0.2.1".to_string(), "192.0.2.2".to_string()]);

        let scan = scan_network("net-1", &rule, storage.clone(), &options, None, &cancel)
            .await
            .unwrap();

        // Excluded addresses still count toward scanned_hosts (invariant 2:
        // a normally-completed scan reaches scanned_hosts == total_hosts),
        // but never produce a device record.
        assert_eq!(scan.total_hosts, 2);
        assert_eq!(scan.scanned_hosts, 2);
        assert_eq!(scan.status, RunStatus::Completed);
        assert!(storage.devices.lock().await.is_empty());
    }

    #[tokio::test]
    async fn unresolvable_network_fails_the_scan_and_propagates_error() {
        struct FailingStorage;
        #[async_trait]
        impl Storage for FailingStorage {
            async fn get_network(&self, _network_id: &str) -> Result<Network> {
                Err(EngineError::Storage("not found".to_string()))
            }
            async fn list_discovery_rules(&self, _network_id: &str) -> Result<Vec<DiscoveryRule>> {
                Ok(vec![])
            }
            async fn get_discovery_rule(&self, _id: &str) -> Result<DiscoveryRule> {
                Err(EngineError::Storage("no rule".to_string()))
            }
            async fn create_or_update_discovered_device(
                &self,
                _device: &DiscoveredDevice,
            ) -> Result<()> {
                Ok(())
            }
        }

        let storage = FailingStorage;
        let options = EngineOptions::default();
        let cancel = CancelToken::new();
        let rule = quick_rule(vec![]);

        let result = scan_network("missing-net", &rule, Arc::new(storage), &options, None, &cancel).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn on_update_fires_at_least_at_start_and_completion() {
        let network = Network {
            network_id: "net-1".to_string(),
            subnet: Ipv4Network::from_str("192.0.2.0/30").unwrap(),
        };
        let storage = FakeStorage {
            network,
            devices: TokioMutex::new(HashMap::new()),
        };
        let options = EngineOptions {
            arp_scan: false,
            ..EngineOptions::default()
        };
        let cancel = CancelToken::new();
        let rule = quick_rule(vec![]);

        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let on_update: UpdateCallback = Arc::new(move |_scan: &DiscoveryScan| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        let scan = scan_network("net-1", &rule, Arc::new(storage), &options, Some(on_update), &cancel)
            .await
            .unwrap();

        assert_eq!(scan.status, RunStatus::Completed);
        assert!(calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn pre_cancelled_scan_stays_running_and_scans_nobody() {
        let network = Network {
            network_id: "net-1".to_string(),
            subnet: Ipv4Network::from_str("192.0.2.0/30").unwrap(),
        };
        let storage = FakeStorage {
            network,
            devices: TokioMutex::new(HashMap::new()),
        };
        let options = EngineOptions::default();
        let cancel = CancelToken::new();
        cancel.cancel();
        let rule = quick_rule(vec![]);

        let scan = scan_network("net-1", &rule, Arc::new(storage), &options, None, &cancel)
            .await
            .unwrap();

        assert_eq!(scan.scanned_hosts, 0);
        assert_eq!(scan.status, RunStatus::Running);
        assert!(scan.completed_at.is_none());
    }

    #[test]
    fn device_status_default_is_unknown() {
        assert_eq!(
            DiscoveredDevice::new("net-1", "192.0.2.1".parse().unwrap(), uuid::Uuid::new_v4())
                .status,
            DeviceStatus::Unknown
        );
    }
}
