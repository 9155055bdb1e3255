//! CIDR expansion and exclusion-list matching for the network scanner.

use std::net::Ipv4Addr;
use std::str::FromStr;

use ipnetwork::Ipv4Network;

/// Expand a subnet to the list of addresses it contains. For masks ≤ /30,
/// the network address (lowest) and directed broadcast (highest) are
/// excluded; for /31 and /32, every address is included.
pub fn expand_subnet(network: Ipv4Network) -> Vec<Ipv4Addr> {
    let prefix = network.prefix();
    if prefix >= 31 {
        return network.iter().collect();
    }
    let net_addr = network.network();
    let bcast_addr = network.broadcast();
    network
        .iter()
        .filter(|ip| *ip != net_addr && *ip != bcast_addr)
        .collect()
}

/// True if `ip` matches `exclude_ips` by exact address or CIDR containment.
/// Malformed entries are ignored, never an error.
pub fn is_excluded(ip: Ipv4Addr, exclude_ips: &[String]) -> bool {
    exclude_ips.iter().any(|entry| {
        if let Ok(exact) = Ipv4Addr::from_str(entry) {
            return exact == ip;
        }
        if let Ok(network) = Ipv4Network::from_str(entry) {
            return network.contains(ip);
        }
        false
    })
}
