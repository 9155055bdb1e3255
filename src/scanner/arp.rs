//! ARP resolver. Issues a single ARP request on the
//! interface routing the target and waits for the first reply. Returns
//! `("", "")`, never an error, when raw L2 access isn't available or the
//! target isn't on a locally attached subnet.

use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};

use ipnetwork::Ipv4Network;
use pnet::datalink::{self, Channel, NetworkInterface};
use pnet::packet::Packet;
use pnet::packet::arp::{ArpHardwareTypes, ArpOperations, ArpPacket, MutableArpPacket};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket, MutableEthernetPacket};
use pnet::util::MacAddr;

use crate::oui;

pub struct ArpResolver {
    timeout: Duration,
}

impl ArpResolver {
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_millis(500),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Find the up, non-loopback interface whose attached subnet contains
    /// `ip`, along with that interface's own source IP/MAC.
    fn find_route(ip: Ipv4Addr) -> Option<(NetworkInterface, Ipv4Addr, MacAddr)> {
        datalink::interfaces()
            .into_iter()
            .filter(|iface| iface.is_up() && !iface.is_loopback())
            .find_map(|iface| {
                let mac = iface.mac?;
                let on_subnet = iface.ips.iter().any(|net| match net.ip() {
                    IpAddr::V4(local) => {
                        Ipv4Network::new(local, net.prefix())
                            .map(|n| n.contains(ip))
                            .unwrap_or(false)
                    }
                    _ => false,
                });
                if !on_subnet {
                    return None;
                }
                let src_ip = iface.ips.iter().find_map(|net| match net.ip() {
                    IpAddr::V4(local) => Some(local),
                    _ => None,
                })?;
                Some((iface, src_ip, mac))
            })
    }

    fn build_request(src_mac: MacAddr, src_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Option<Vec<u8>> {
        let mut ethernet_buffer = vec![0u8; 42];
        let mut ethernet_packet = MutableEthernetPacket::new(&mut ethernet_buffer)?;
        ethernet_packet.set_destination(MacAddr::broadcast());
        ethernet_packet.set_source(src_mac);
        ethernet_packet.set_ethertype(EtherTypes::Arp);

        let mut arp_buffer = vec![0u8; 28];
        let mut arp_packet = MutableArpPacket::new(&mut arp_buffer)?;
        arp_packet.set_hardware_type(ArpHardwareTypes::Ethernet);
        arp_packet.set_protocol_type(EtherTypes::Ipv4);
        arp_packet.set_hw_addr_len(6);
        arp_packet.set_proto_addr_len(4);
        arp_packet.set_operation(ArpOperations::Request);
        arp_packet.set_sender_hw_addr(src_mac);
        arp_packet.set_sender_proto_addr(src_ip);
        arp_packet.set_target_hw_addr(MacAddr::zero());
        arp_packet.set_target_proto_addr(target_ip);

        ethernet_packet.set_payload(arp_packet.packet());
        Some(ethernet_buffer)
    }

    fn resolve_blocking(ip: Ipv4Addr, deadline: Duration) -> Option<MacAddr> {
        let (interface, src_ip, src_mac) = Self::find_route(ip)?;
        if ip == src_ip {
            return None;
        }

        let Ok(Channel::Ethernet(mut tx, mut rx)) = datalink::channel(&interface, Default::default())
        else {
            return None;
        };

        let packet = Self::build_request(src_mac, src_ip, ip)?;
        match tx.send_to(&packet, None) {
            Some(Ok(())) => {}
            _ => return None,
        }

        let start = Instant::now();
        while start.elapsed() < deadline {
            match rx.next() {
                Ok(raw) => {
                    if let Some(ethernet) = EthernetPacket::new(raw)
                        && ethernet.get_ethertype() == EtherTypes::Arp
                        && let Some(arp) = ArpPacket::new(ethernet.payload())
                        && arp.get_operation() == ArpOperations::Reply
                        && arp.get_sender_proto_addr() == ip
                    {
                        return Some(arp.get_sender_hw_addr());
                    }
                }
                Err(_) => std::thread::sleep(Duration::from_millis(1)),
            }
        }
        None
    }

    /// `get_mac(ip) -> (mac, vendor)`. Empty strings mean "not resolvable",
    /// never an error.
    pub async fn get_mac(&self, ip: Ipv4Addr) -> (String, String) {
        let deadline = self.timeout;
        let mac = tokio::task::spawn_blocking(move || Self::resolve_blocking(ip, deadline))
            .await
            .ok()
            .flatten();

        match mac.and_then(|m| oui::normalize_mac(&m.to_string())) {
            Some(normalized) => {
                let vendor = oui::lookup_vendor(&normalized).to_string();
                (normalized, vendor)
            }
            None => (String::new(), String::new()),
        }
    }

    /// `batch(ips, max_concurrent) -> map ip->mac`.
    pub async fn batch(
        &self,
        ips: Vec<Ipv4Addr>,
        max_concurrent: usize,
    ) -> std::collections::HashMap<Ipv4Addr, String> {
        use tokio::sync::Semaphore;
        let semaphore = std::sync::Arc::new(Semaphore::new(max_concurrent.max(1)));
        let mut set = tokio::task::JoinSet::new();

        for ip in ips {
            let sem = semaphore.clone();
            let timeout = self.timeout;
            set.spawn(async move {
                let _permit = sem.acquire_owned().await;
                let resolver = ArpResolver::new().with_timeout(timeout);
                (ip, resolver.get_mac(ip).await.0)
            });
        }

        let mut results = std::collections::HashMap::new();
        while let Some(joined) = set.join_next().await {
            if let Ok((ip, mac)) = joined
                && !mac.is_empty()
            {
                results.insert(ip, mac);
            }
        }
        results
    }
}

impl Default for ArpResolver {
    fn default() -> Self {
        Self::new()
    }
}
