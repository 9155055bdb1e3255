//! ICMP echo (ping) prober with a TCP-connect fallback for unprivileged
//! operation Each call opens and closes its own raw socket,
//! so pings carry no state across calls and are safe to run concurrently.

use std::mem::MaybeUninit;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::time::timeout;

/// Literal ICMP echo payload.
const PING_PAYLOAD: &[u8] = b"rackd-ping";

/// ICMP echo prober. `privileged` is detected once at construction and
/// never re-checked — an unprivileged instance degrades to `(false, 0)`
/// for every `ping` call rather than failing.
pub struct PingProber {
    privileged: bool,
    timeout: Duration,
}

impl PingProber {
    pub fn new(privileged: bool) -> Self {
        Self {
            privileged,
            timeout: Duration::from_secs(2),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// ICMPv4 echo request: type 8 (Echo Request), code 0, identifier = the
    /// low 16 bits of the process id, sequence 1, `rackd-ping` payload.
    fn build_echo_request(identifier: u16) -> Vec<u8> {
        let mut packet = vec![0u8; 8 + PING_PAYLOAD.len()];
        packet[0] = 8; // Echo Request
        packet[1] = 0; // Code
        packet[4] = (identifier >> 8) as u8;
        packet[5] = (identifier & 0xff) as u8;
        packet[6] = 0; // sequence high byte
        packet[7] = 1; // sequence low byte fixes sequence to 1
        packet[8..].copy_from_slice(PING_PAYLOAD);

        let checksum = Self::checksum(&packet);
        packet[2] = (checksum >> 8) as u8;
        packet[3] = (checksum & 0xff) as u8;
        packet
    }

    fn checksum(data: &[u8]) -> u16 {
        let mut sum: u32 = 0;
        let mut i = 0;
        while i < data.len() {
            let word = if i + 1 < data.len() {
                ((data[i] as u32) << 8) | (data[i + 1] as u32)
            } else {
                (data[i] as u32) << 8
            };
            sum = sum.wrapping_add(word);
            i += 2;
        }
        while (sum >> 16) != 0 {
            sum = (sum & 0xffff) + (sum >> 16);
        }
        !sum as u16
    }

    /// Blocking raw-socket ping of a single IPv4 address. Runs on a blocking
    /// thread from the async entry points below — raw socket send/recv has
    /// no async-aware equivalent in `socket2`.
    fn ping_blocking(ip: Ipv4Addr, timeout_dur: Duration) -> (bool, Duration) {
        let start = Instant::now();

        let Ok(socket) = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)) else {
            return (false, Duration::ZERO);
        };
        let _ = socket.set_read_timeout(Some(timeout_dur));
        let _ = socket.set_write_timeout(Some(timeout_dur));

        let identifier = std::process::id() as u16;
        let packet = Self::build_echo_request(identifier);
        let addr = SocketAddr::new(IpAddr::V4(ip), 0);

        if socket.send_to(&packet, &addr.into()).is_err() {
            return (false, Duration::ZERO);
        }

        let mut buffer: [MaybeUninit<u8>; 1024] = [MaybeUninit::uninit(); 1024];
        match socket.recv(&mut buffer) {
            Ok(len) if len >= 28 => {
                let buffer: &[u8] =
                    unsafe { std::slice::from_raw_parts(buffer.as_ptr() as *const u8, len) };
                let icmp_type = buffer[20];
                if icmp_type == 0 {
                    return (true, start.elapsed());
                }
            }
            _ => {}
        }
        (false, Duration::ZERO)
    }

    /// `ping(ip, deadline) -> (alive, rtt)`. Returns `(false, 0)` without
    /// raising an error if unprivileged, or if socket open/send/recv/parse
    /// fails for any reason
    pub async fn ping(&self, ip: Ipv4Addr) -> (bool, Duration) {
        if !self.privileged {
            return (false, Duration::ZERO);
        }
        let timeout_dur = self.timeout;
        tokio::task::spawn_blocking(move || Self::ping_blocking(ip, timeout_dur))
            .await
            .unwrap_or((false, Duration::ZERO))
    }

    /// TCP-connect fallback for unprivileged operation: alive iff a TCP
    /// connect to `ip:port` succeeds within `timeout` (default 2s).
    pub async fn tcp_ping(&self, ip: Ipv4Addr, port: u16) -> bool {
        let addr = SocketAddr::new(IpAddr::V4(ip), port);
        matches!(
            timeout(self.timeout, TcpStream::connect(addr)).await,
            Ok(Ok(_))
        )
    }

    /// `ping_batch(ips, max_concurrent) -> map ip->alive`.
    pub async fn ping_batch(
        &self,
        ips: Vec<Ipv4Addr>,
        max_concurrent: usize,
    ) -> std::collections::HashMap<Ipv4Addr, bool> {
        let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
        let mut set = tokio::task::JoinSet::new();

        for ip in ips {
            let sem = semaphore.clone();
            let privileged = self.privileged;
            let timeout_dur = self.timeout;
            set.spawn(async move {
                let _permit = sem.acquire_owned().await;
                let prober = PingProber::new(privileged).with_timeout(timeout_dur);
                (ip, prober.ping(ip).await.0)
            });
        }

        let mut results = std::collections::HashMap::new();
        while let Some(joined) = set.join_next().await {
            if let Ok((ip, alive)) = joined {
                results.insert(ip, alive);
            }
        }
        results
    }
}
