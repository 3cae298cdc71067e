//! Interfaces réseau de l'hôte.

use std::net::{IpAddr, Ipv4Addr};
use tracing::warn;

/// Première adresse IPv4 non-loopback de l'hôte.
///
/// C'est l'adresse annoncée à la passerelle comme `NewInternalClient` lors
/// de la création d'une redirection de port.
pub fn local_ipv4() -> Option<Ipv4Addr> {
    let ifaces = match get_if_addrs::get_if_addrs() {
        Ok(ifaces) => ifaces,
        Err(e) => {
            warn!("Failed to enumerate network interfaces: {}", e);
            return None;
        }
    };

    ifaces.into_iter().find_map(|iface| match iface.ip() {
        IpAddr::V4(ipv4) if !ipv4.is_loopback() => Some(ipv4),
        _ => None,
    })
}
