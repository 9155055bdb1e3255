//! Banner-based service fingerprinter. One TCP dial per
//! port, sequential over the port list; a dial failure simply omits that
//! port from the output, it is never reported as an error.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::cancel::CancelToken;
use crate::model::ServiceInfo;

/// Probe write sent to trigger a banner from services that don't send one
/// unsolicited.
const PROBE: &[u8] = b"\r\n";

/// Built-in port→service fallback table
fn fallback_service(port: u16) -> &'static str {
    match port {
        21 => "ftp",
        22 => "ssh",
        23 => "telnet",
        25 => "smtp",
        53 => "dns",
        80 => "http",
        110 => "pop3",
        111 => "rpcbind",
        135 => "msrpc",
        139 => "netbios",
        143 => "imap",
        443 => "https",
        445 => "smb",
        993 => "imaps",
        995 => "pop3s",
        1723 => "pptp",
        3306 => "mysql",
        3389 => "rdp",
        5432 => "postgresql",
        5900 => "vnc",
        6379 => "redis",
        8080 => "http-proxy",
        27017 => "mongodb",
        _ => "unknown",
    }
}

/// Return the whitespace-delimited token immediately following the first
/// case-insensitive occurrence of `needle` in `banner`.
fn token_after(banner: &str, needle: &str) -> Option<String> {
    let lower = banner.to_ascii_lowercase();
    let needle_lower = needle.to_ascii_lowercase();
    let idx = lower.find(&needle_lower)?;
    let rest = &banner[idx + needle_lower.len()..];
    rest.split_whitespace().next().map(str::to_string)
}

/// Apply the banner-parsing overrides of on top of the
/// port-table fallback service already stored in `info`.
fn apply_banner(info: &mut ServiceInfo, port: u16, banner: &str) {
    let lower = banner.to_ascii_lowercase();

    if lower.contains("ssh") || lower.contains("openssh") {
        info.service = "ssh".to_string();
        if lower.contains("openssh") {
            info.product = Some("OpenSSH".to_string());
            info.version = token_after(banner, "openssh_");
        }
    }

    if port == 80 || port == 8080 || lower.contains("http") {
        info.service = "http".to_string();
        if lower.contains("nginx") {
            info.product = Some("nginx".to_string());
        } else if lower.contains("apache") {
            info.product = Some("Apache".to_string());
        }
    }

    if port == 443 {
        info.service = "https".to_string();
    }

    if port == 21 || lower.contains("ftp") || lower.contains("vsftpd") {
        info.service = "ftp".to_string();
        if lower.contains("vsftpd") {
            info.product = Some("vsftpd".to_string());
        }
    }

    if port == 25 || lower.contains("smtp") || lower.contains("postfix") {
        info.service = "smtp".to_string();
        if lower.contains("postfix") {
            info.product = Some("Postfix".to_string());
        }
    }

    if port == 3306 || lower.contains("mysql") {
        info.service = "mysql".to_string();
    }
    if port == 5432 || lower.contains("postgresql") {
        info.service = "postgresql".to_string();
    }
    if port == 6379 {
        info.service = "redis".to_string();
    }
    if port == 27017 || lower.contains("mongodb") {
        info.service = "mongodb".to_string();
    }
}

pub struct ServiceFingerprinter {
    timeout: Duration,
}

impl ServiceFingerprinter {
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn probe_port(&self, ip: Ipv4Addr, port: u16) -> Option<ServiceInfo> {
        let addr = SocketAddr::new(IpAddr::V4(ip), port);
        let mut stream = timeout(self.timeout, TcpStream::connect(addr))
            .await
            .ok()?
            .ok()?;

        let mut info = ServiceInfo::new(port, fallback_service(port));

        let _ = timeout(self.timeout, stream.write_all(PROBE)).await;

        let mut reader = BufReader::new(&mut stream);
        let mut line = String::new();
        if let Ok(Ok(n)) = timeout(self.timeout, reader.read_line(&mut line)).await
            && n > 0
        {
            let banner = line.trim().to_string();
            if !banner.is_empty() {
                apply_banner(&mut info, port, &banner);
                info.banner = Some(banner);
            }
        }

        Some(info)
    }

    /// `detect_services(ip, ports) -> ServiceInfo[]`. Cancellation mid-list
    /// aborts and returns the prefix already collected
    pub async fn detect_services(
        &self,
        ip: Ipv4Addr,
        ports: &[u16],
        cancel: &CancelToken,
    ) -> Vec<ServiceInfo> {
        let mut results = Vec::new();
        for &port in ports {
            if cancel.is_cancelled() {
                break;
            }
            if let Some(info) = self.probe_port(ip, port).await {
                results.push(info);
            }
        }
        results
    }
}

impl Default for ServiceFingerprinter {
    fn default() -> Self {
        Self::new()
    }
}
