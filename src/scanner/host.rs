//! Per-IP staged probe pipeline. Composes the ping, ARP,
//! reverse DNS, port, and service probers into one ordered pass and derives
//! an OS guess and confidence score from what was found. Never returns an
//! error: per-host/per-probe failures collapse into missing optional
//! fields.

use std::net::{IpAddr, Ipv4Addr};

use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::model::{DeviceStatus, DiscoveredDevice, DiscoveryRule, ScanType};
use crate::options::EngineOptions;

use super::arp::ArpResolver;
use super::ping::PingProber;
use super::port::PortProber;
use super::service::ServiceFingerprinter;

/// Reverse DNS lookup, normalized by stripping a trailing dot
async fn reverse_dns(ip: Ipv4Addr) -> Option<String> {
    tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&IpAddr::V4(ip)).ok())
        .await
        .ok()
        .flatten()
        .map(|name| name.trim_end_matches('.').to_string())
        .filter(|name| !name.is_empty())
}

/// Liveness detection for stage 1. Uses the raw ICMP prober when
/// privileged; otherwise falls back to a TCP connect probe against a
/// couple of commonly-open ports, "callers may use the
/// TCP fallback" guidance.
async fn detect_alive(prober: &PingProber, ip: Ipv4Addr, privileged: bool) -> bool {
    let (alive, _rtt) = prober.ping(ip).await;
    if alive || privileged {
        return alive;
    }
    for port in [80u16, 443, 22] {
        if prober.tcp_ping(ip, port).await {
            return true;
        }
    }
    false
}

/// has_windows/has_linux/has_unix open-port membership heuristic, plus the
/// ssh-service override step 5. Runs unconditionally
/// whenever the caller has decided OS detection is enabled; the "Unknown"
/// default is itself a concrete result, not an absence of one.
fn guess_os(open_ports: &std::collections::BTreeSet<u16>, has_ssh_service: bool) -> (String, String) {
    let has_windows = open_ports.iter().any(|p| [135, 139, 445, 3389].contains(p));
    let has_linux = open_ports.iter().any(|p| [22, 111, 2049].contains(p));
    let has_unix = open_ports.iter().any(|p| [22, 111].contains(p));

    let (mut guess, mut family) = if has_windows && !has_linux {
        ("Windows".to_string(), "Windows".to_string())
    } else if has_linux && !has_windows {
        ("Linux".to_string(), "Unix".to_string())
    } else if has_unix {
        ("Unix-like".to_string(), "Unix".to_string())
    } else {
        ("Unknown".to_string(), "Unknown".to_string())
    };

    if has_ssh_service && family == "Unknown" {
        guess = "Linux/Unix".to_string();
        family = "Unix".to_string();
    }

    (guess, family)
}

/// `scan_host(ip, network_id, rule, scan_id) -> device | nothing`.
pub async fn scan_host(
    ip: Ipv4Addr,
    network_id: &str,
    rule: &DiscoveryRule,
    scan_id: Uuid,
    options: &EngineOptions,
    cancel: &CancelToken,
) -> Option<DiscoveredDevice> {
    let mut device = DiscoveredDevice::new(network_id, ip, scan_id);

    // Stage 1: ping.
    let ping_prober = PingProber::new(options.privileged).with_timeout(options.ping_timeout);
    let alive = detect_alive(&ping_prober, ip, options.privileged).await;
    if alive {
        device.status = DeviceStatus::Online;
    }
    if rule.scan_type == ScanType::Quick && !alive {
        return None;
    }

    // Stage 2: identify (ARP + reverse DNS), concurrently.
    if alive || rule.scan_type != ScanType::Quick {
        let arp_fut = async {
            if options.arp_scan {
                let resolver = ArpResolver::new().with_timeout(options.arp_timeout);
                resolver.get_mac(ip).await
            } else {
                (String::new(), String::new())
            }
        };
        let dns_fut = reverse_dns(ip);
        let ((mac, _vendor), hostname) = tokio::join!(arp_fut, dns_fut);

        if !mac.is_empty() {
            device.mac_address = Some(mac);
        }
        if let Some(hostname) = hostname {
            device.hostname = Some(hostname);
        }
    }

    // Stage 3: port sweep.
    if rule.scan_ports && rule.scan_type != ScanType::Quick {
        let prober = PortProber::new().with_timeout(options.port_timeout);
        let (open_ports, _cancelled) = prober.scan_ports(ip, &options.port_set(), cancel).await;
        if !open_ports.is_empty() {
            device.open_ports.extend(open_ports);
            if device.status == DeviceStatus::Unknown {
                device.status = DeviceStatus::Online;
            }
        }
    }

    // Stage 4: service fingerprint.
    if options.service_detection && rule.service_detection && !device.open_ports.is_empty() {
        let ports: Vec<u16> = device.open_ports.iter().copied().collect();
        let fingerprinter = ServiceFingerprinter::new();
        device.services = fingerprinter.detect_services(ip, &ports, cancel).await;
    }

    // Stage 5: OS heuristic.
    if options.os_detection && rule.os_detection {
        let has_ssh_service = device.services.iter().any(|s| s.service == "ssh");
        let (guess, family) = guess_os(&device.open_ports, has_ssh_service);
        device.os_guess = Some(guess);
        device.os_family = Some(family);
    }

    // Stage 6: confidence.
    let mut confidence: u16 = 50;
    if device.mac_address.as_deref().is_some_and(|s| !s.is_empty()) {
        confidence += 20;
    }
    if device.hostname.as_deref().is_some_and(|s| !s.is_empty()) {
        confidence += 15;
    }
    if !device.open_ports.is_empty() {
        confidence += 10;
    }
    if device.os_guess.as_deref().is_some_and(|s| !s.is_empty()) {
        confidence += 5;
    }
    device.confidence = confidence.min(100) as u8;

    Some(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn rule(scan_type: ScanType) -> DiscoveryRule {
        DiscoveryRule {
            id: "rule-1".to_string(),
            network_id: "net-1".to_string(),
            scan_type,
            scan_ports: true,
            service_detection: true,
            os_detection: true,
            exclude_ips: vec![],
            scan_interval_hours: 24,
            enabled: true,
        }
    }

    #[test]
    fn os_heuristic_linux_like_ports() {
        let ports: BTreeSet<u16> = [22, 111].into_iter().collect();
        let (guess, family) = guess_os(&ports, false);
        assert_eq!(guess, "Linux");
        assert_eq!(family, "Unix");
    }

    #[test]
    fn os_heuristic_windows_ports() {
        let ports: BTreeSet<u16> = [135, 445, 3389].into_iter().collect();
        let (guess, family) = guess_os(&ports, false);
        assert_eq!(guess, "Windows");
        assert_eq!(family, "Windows");
    }

    #[test]
    fn os_heuristic_unix_like_fallback() {
        let ports: BTreeSet<u16> = [111].into_iter().collect();
        let (guess, family) = guess_os(&ports, false);
        assert_eq!(guess, "Unix-like");
        assert_eq!(family, "Unix");
    }

    #[test]
    fn os_heuristic_default_unknown() {
        let ports: BTreeSet<u16> = [80].into_iter().collect();
        let (guess, family) = guess_os(&ports, false);
        assert_eq!(guess, "Unknown");
        assert_eq!(family, "Unknown");
    }

    #[test]
    fn os_heuristic_ssh_service_upgrades_unknown_family() {
        let ports: BTreeSet<u16> = [80].into_iter().collect();
        let (guess, family) = guess_os(&ports, true);
        assert_eq!(guess, "Linux/Unix");
        assert_eq!(family, "Unix");
    }

    #[test]
    fn os_heuristic_is_deterministic() {
        let ports: BTreeSet<u16> = [22, 80, 443].into_iter().collect();
        let first = guess_os(&ports, false);
        let second = guess_os(&ports, false);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn quick_scan_silent_host_returns_none() {
        // 203.0.113.4 (TEST-NET-3) should never answer in a test sandbox.
        let r = rule(ScanType::Quick);
        let options = EngineOptions {
            arp_scan: false,
            ..EngineOptions::default()
        };
        let cancel = CancelToken::new();
        let device = scan_host(
            Ipv4Addr::new(203, 0, 113, 4),
            "net-1",
            &r,
            Uuid::new_v4(),
            &options,
            &cancel,
        )
        .await;
        assert!(device.is_none());
    }
}
