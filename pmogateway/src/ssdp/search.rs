/*!
La recherche SSDP du control point n'écoute PAS sur le port UDP 1900.

* Le port 1900 est celui des *devices* UPnP (réception des M-SEARCH).
* Le control point envoie son M-SEARCH depuis un port éphémère et reçoit
  les réponses HTTP/200 en unicast sur ce même port.

La cible est par défaut le groupe multicast SSDP; une adresse unicast
(typiquement la passerelle par défaut du réseau) peut lui être substituée
quand le multicast est filtré.
*/

use super::{SSDP_MULTICAST_ADDR, SSDP_PORT, ST_ROOTDEVICE};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, trace};

/// Erreur de recherche SSDP
#[derive(Debug, Error)]
pub enum SsdpSearchError {
    #[error("SSDP socket error: {0}")]
    Io(#[from] std::io::Error),

    /// Aucun datagramme reçu dans la fenêtre de découverte
    #[error("No SSDP response within {0:?}")]
    NoResponse(Duration),

    /// Des datagrammes sont arrivés mais aucun n'annonçait un root device
    /// avec un en-tête LOCATION exploitable
    #[error("SSDP responses received but none advertised upnp:rootdevice with a LOCATION header")]
    MalformedResponse,
}

/// Recherche M-SEARCH d'un root device UPnP
pub struct SsdpSearch {
    target: SocketAddr,
    timeout: Duration,
}

impl SsdpSearch {
    /// Cible multicast SSDP standard
    pub fn multicast_target() -> SocketAddr {
        format!("{}:{}", SSDP_MULTICAST_ADDR, SSDP_PORT)
            .parse()
            .unwrap()
    }

    pub fn new(target: SocketAddr, timeout: Duration) -> Self {
        Self { target, timeout }
    }

    /// Envoie un M-SEARCH et attend l'annonce d'un root device.
    ///
    /// Les datagrammes qui n'annoncent pas `upnp:rootdevice` sont ignorés et
    /// la lecture continue jusqu'à la fin de la fenêtre de découverte: le
    /// premier paquet entrant n'est pas forcément la réponse de la
    /// passerelle (chatter NOTIFY, autres control points...).
    pub fn search(&self) -> Result<String, SsdpSearchError> {
        let socket = self.bind_socket()?;

        let request = build_msearch(&self.target);
        socket.send_to(request.as_bytes(), self.target)?;
        info!("📤 M-SEARCH sent to {} (ST={})", self.target, ST_ROOTDEVICE);
        trace!("M-SEARCH payload:\n{}", request);

        let deadline = Instant::now() + self.timeout;
        let mut buf = [0u8; 8192];
        let mut saw_datagram = false;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            socket.set_read_timeout(Some(remaining))?;

            match socket.recv_from(&mut buf) {
                Ok((n, from)) => {
                    saw_datagram = true;
                    let data = String::from_utf8_lossy(&buf[..n]);
                    if let Some(location) = parse_search_response(&data) {
                        info!("✅ Root device announced at {} (from {})", location, from);
                        return Ok(location);
                    }
                    trace!("Ignoring non-rootdevice datagram from {}", from);
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }

        debug!(
            "SSDP search window of {:?} elapsed (datagrams seen: {})",
            self.timeout, saw_datagram
        );
        if saw_datagram {
            Err(SsdpSearchError::MalformedResponse)
        } else {
            Err(SsdpSearchError::NoResponse(self.timeout))
        }
    }

    fn bind_socket(&self) -> Result<UdpSocket, SsdpSearchError> {
        let socket2 = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket2.set_reuse_address(true)?;

        let bind_addr: SocketAddr = "0.0.0.0:0".parse().unwrap();
        socket2.bind(&bind_addr.into())?;

        let socket: UdpSocket = socket2.into();
        socket.set_broadcast(true)?;
        Ok(socket)
    }
}

fn build_msearch(target: &SocketAddr) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {}\r\n\
         ST: {}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: 3\r\n\
         \r\n",
        target, ST_ROOTDEVICE
    )
}

/// Extrait l'URL LOCATION d'une réponse M-SEARCH qualifiante.
///
/// Qualifiante = le texte contient `upnp:rootdevice` (insensible à la casse)
/// et porte un en-tête `LOCATION` non vide.
fn parse_search_response(data: &str) -> Option<String> {
    if !data.to_ascii_lowercase().contains(ST_ROOTDEVICE) {
        return None;
    }
    extract_header(data, "LOCATION")
}

/// Valeur du premier en-tête `name`, comparaison insensible à la casse.
///
/// La réponse est traitée comme du texte brut, pas comme du HTTP structuré:
/// découpage par lignes, premier `:` seulement (les URLs en contiennent).
fn extract_header(data: &str, name: &str) -> Option<String> {
    for line in data.lines() {
        if let Some((key, value)) = line.split_once(':') {
            if key.trim().eq_ignore_ascii_case(name) {
                let value = value.trim();
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}
