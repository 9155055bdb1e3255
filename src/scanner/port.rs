//! Parallel TCP connect port sweep. Open-port detection is
//! "connect succeeded; close immediately"; no retries, a refused connection
//! is a definitive closed signal.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::cancel::CancelToken;

/// Fixed 20-port list used when no more specific set applies.
pub const COMMON_PORTS: [u16; 20] = [
    21, 22, 23, 25, 53, 80, 110, 111, 135, 139, 143, 443, 445, 993, 995, 1723, 3306, 3389, 5900,
    8080,
];

/// How the caller wants the port set selected.
#[derive(Debug, Clone)]
pub enum PortSet {
    Common,
    Full,
    Custom(Vec<u16>),
}

impl PortSet {
    /// Resolve to the concrete port list and this call's concurrency cap.
    fn resolve(&self) -> (Vec<u16>, usize) {
        match self {
            PortSet::Common => (COMMON_PORTS.to_vec(), 100),
            PortSet::Full => ((1..=1000).collect(), 50),
            PortSet::Custom(ports) if !ports.is_empty() => (ports.clone(), 50),
            PortSet::Custom(_) => (COMMON_PORTS.to_vec(), 100),
        }
    }
}

pub struct PortProber {
    per_port_timeout: Duration,
}

impl PortProber {
    pub fn new() -> Self {
        Self {
            per_port_timeout: Duration::from_millis(500),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.per_port_timeout = timeout;
        self
    }

    async fn connect(ip: Ipv4Addr, port: u16, per_port_timeout: Duration) -> Option<u16> {
        let addr = SocketAddr::new(IpAddr::V4(ip), port);
        match timeout(per_port_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => Some(port),
            _ => None,
        }
    }

    /// `scan_ports(ip, port_set) -> (open_ports, cancelled)`. Cancellation
    /// short-circuits the dispatch loop; already-dispatched connects are
    /// allowed to finish (bounded by their own timeout)
    pub async fn scan_ports(
        &self,
        ip: Ipv4Addr,
        port_set: &PortSet,
        cancel: &CancelToken,
    ) -> (Vec<u16>, bool) {
        let (ports, max_concurrent) = port_set.resolve();
        let semaphore = Arc::new(Semaphore::new(max_concurrent));
        let mut set = tokio::task::JoinSet::new();
        let mut cancelled = false;

        for port in ports {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let sem = semaphore.clone();
            let per_port_timeout = self.per_port_timeout;
            set.spawn(async move {
                let _permit = sem.acquire_owned().await;
                Self::connect(ip, port, per_port_timeout).await
            });
        }

        let mut open_ports = Vec::new();
        while let Some(joined) = set.join_next().await {
            if let Ok(Some(port)) = joined {
                open_ports.push(port);
            }
        }
        open_ports.sort_unstable();
        (open_ports, cancelled)
    }
}

impl Default for PortProber {
    fn default() -> Self {
        Self::new()
    }
}
