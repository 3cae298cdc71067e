//! Control point de la passerelle Internet (IGD).
//!
//! Orchestration découverte SSDP + résolution de description en un état
//! caché unique, et exposition des trois opérations de contrôle du service
//! WANIPConnection: ajout de redirection, suppression de redirection,
//! lecture de l'adresse IP externe.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::description::{WAN_IP_CONNECTION, resolve_description};
use crate::errors::GatewayError;
use crate::netif;
use crate::soap::SoapAction;
use crate::soap_client::{SoapCallResult, invoke_soap_action};
use crate::ssdp::{SSDP_PORT, SsdpSearch};
use crate::{DEFAULT_DISCOVERY_TIMEOUT, DEFAULT_SOAP_TIMEOUT};

/// Protocole de transport d'une redirection de port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortMappingProtocol {
    Tcp,
    Udp,
}

impl fmt::Display for PortMappingProtocol {
    /// Forme majuscule attendue par l'argument SOAP `NewProtocol`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortMappingProtocol::Tcp => write!(f, "TCP"),
            PortMappingProtocol::Udp => write!(f, "UDP"),
        }
    }
}

/// Configuration d'un [`GatewayControlPoint`].
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Destination des M-SEARCH SSDP. Par défaut le groupe multicast
    /// 239.255.255.250:1900; remplacer par l'adresse unicast de la
    /// passerelle par défaut quand le multicast est filtré.
    pub ssdp_target: SocketAddr,

    /// Fenêtre d'attente des réponses SSDP (modifiable ensuite via
    /// [`GatewayControlPoint::set_discovery_timeout`])
    pub discovery_timeout: Duration,

    /// Timeout des requêtes HTTP (description et actions SOAP)
    pub soap_timeout: Duration,

    /// Adresse IPv4 locale annoncée comme `NewInternalClient`. `None` =
    /// détection automatique via les interfaces de l'hôte.
    pub local_ip: Option<Ipv4Addr>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            ssdp_target: SsdpSearch::multicast_target(),
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            soap_timeout: DEFAULT_SOAP_TIMEOUT,
            local_ip: None,
        }
    }
}

impl GatewayConfig {
    /// Configuration interrogeant directement la passerelle `gateway` en
    /// unicast plutôt que le groupe multicast.
    pub fn with_gateway(gateway: IpAddr) -> Self {
        Self {
            ssdp_target: SocketAddr::new(gateway, SSDP_PORT),
            ..Self::default()
        }
    }
}

/// État caché de la découverte.
///
/// Invariant: `control_url.is_some()` si et seulement si `available`;
/// `available` n'est jamais vrai sans `discovered`.
#[derive(Debug, Default)]
struct GatewayState {
    discovered: bool,
    available: bool,
    description_url: Option<String>,
    control_url: Option<String>,
    event_url: Option<String>,
    last_error: Option<GatewayError>,
}

/// Control point UPnP de la passerelle Internet du réseau local.
///
/// Chaque instance possède son propre état de découverte et son verrou: pas
/// d'état global de process, plusieurs contextes de passerelle peuvent
/// coexister (tests, hôtes multi-réseaux).
pub struct GatewayControlPoint {
    config: RwLock<GatewayConfig>,
    state: RwLock<GatewayState>,
    discovery_lock: Mutex<()>,
}

impl Default for GatewayControlPoint {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayControlPoint {
    pub fn new() -> Self {
        Self::with_config(GatewayConfig::default())
    }

    pub fn with_config(config: GatewayConfig) -> Self {
        Self {
            config: RwLock::new(config),
            state: RwLock::new(GatewayState::default()),
            discovery_lock: Mutex::new(()),
        }
    }

    /// Fenêtre d'attente SSDP courante
    pub fn discovery_timeout(&self) -> Duration {
        self.config.read().discovery_timeout
    }

    /// Change la fenêtre d'attente SSDP pour les prochaines découvertes
    pub fn set_discovery_timeout(&self, timeout: Duration) {
        self.config.write().discovery_timeout = timeout;
    }

    /// Une tentative de découverte (réussie ou non) a-t-elle eu lieu?
    pub fn is_discovered(&self) -> bool {
        self.state.read().discovered
    }

    /// Une passerelle utilisable est-elle connue?
    pub fn is_available(&self) -> bool {
        self.state.read().available
    }

    /// URL de contrôle WANIPConnection cachée, si disponible
    pub fn control_url(&self) -> Option<String> {
        self.state.read().control_url.clone()
    }

    /// URL d'abonnement aux événements, si annoncée par la passerelle
    pub fn event_url(&self) -> Option<String> {
        self.state.read().event_url.clone()
    }

    /// URL de la description de device retournée par la découverte SSDP
    pub fn description_url(&self) -> Option<String> {
        self.state.read().description_url.clone()
    }

    /// Cause du dernier échec de découverte
    pub fn last_error(&self) -> Option<GatewayError> {
        self.state.read().last_error.clone()
    }

    /// Lance (ou relance) la découverte de la passerelle.
    ///
    /// Si une tentative a déjà eu lieu et que `force` est faux, retourne le
    /// résultat caché sans aucune E/S réseau: un échec est mémorisé au même
    /// titre qu'un succès, et seul `force = true` relance un cycle.
    ///
    /// Les échecs sont absorbés dans l'état (`available = false`, cause dans
    /// [`last_error`]); cette méthode ne remonte jamais d'erreur.
    ///
    /// [`last_error`]: GatewayControlPoint::last_error
    pub fn discover(&self, force: bool) -> bool {
        {
            let state = self.state.read();
            if state.discovered && !force {
                return state.available;
            }
        }

        // Sérialise les cycles de découverte: un seul échange SSDP et un
        // seul GET de description en vol à la fois.
        let _guard = self.discovery_lock.lock();

        // Un autre thread a pu terminer le même cycle pendant l'attente.
        {
            let state = self.state.read();
            if state.discovered && !force {
                return state.available;
            }
        }

        let (target, discovery_timeout, soap_timeout) = {
            let config = self.config.read();
            (
                config.ssdp_target,
                config.discovery_timeout,
                config.soap_timeout,
            )
        };

        info!("🔍 Discovering UPnP gateway via {}", target);
        match run_discovery_cycle(target, discovery_timeout, soap_timeout) {
            Ok(found) => {
                info!("✅ Gateway available, control URL {}", found.control_url);
                let mut state = self.state.write();
                *state = GatewayState {
                    discovered: true,
                    available: true,
                    description_url: Some(found.description_url),
                    control_url: Some(found.control_url),
                    event_url: found.event_url,
                    last_error: None,
                };
                true
            }
            Err(err) => {
                warn!("Gateway discovery failed: {}", err);
                let mut state = self.state.write();
                *state = GatewayState {
                    discovered: true,
                    available: false,
                    description_url: None,
                    control_url: None,
                    event_url: None,
                    last_error: Some(err),
                };
                false
            }
        }
    }

    /// Crée une redirection de port sur la passerelle.
    ///
    /// Port externe = port interne = `port`, client interne = adresse IPv4
    /// locale, bail permanent. L'opération est idempotente côté routeur:
    /// une redirection existante pour le même couple (port, protocole) est
    /// remplacée.
    ///
    /// Déclenche une découverte (`force = false`) si aucune passerelle n'est
    /// cachée; échoue avec [`GatewayError::NoGatewayAvailable`] si elle ne
    /// donne rien.
    pub fn add_port_mapping(
        &self,
        port: u16,
        protocol: PortMappingProtocol,
        description: &str,
    ) -> Result<(), GatewayError> {
        let control_url = self.require_control_url()?;
        let local_ip = self.local_ip().ok_or_else(|| {
            GatewayError::Transport("No usable local IPv4 address on this host".to_string())
        })?;

        let action = SoapAction::new(WAN_IP_CONNECTION, "AddPortMapping")
            .arg("NewRemoteHost", "")
            .arg("NewExternalPort", port.to_string())
            .arg("NewProtocol", protocol.to_string())
            .arg("NewInternalPort", port.to_string())
            .arg("NewInternalClient", local_ip.to_string())
            .arg("NewEnabled", "1")
            .arg("NewPortMappingDescription", description)
            .arg("NewLeaseDuration", "0");

        let result = invoke_soap_action(&control_url, &action, self.soap_timeout())?;
        if !result.status.is_success() {
            return Err(protocol_error("AddPortMapping", &result));
        }
        require_envelope("AddPortMapping", &result)?;

        info!(
            "✅ Port mapping added: {} {} → {}:{}",
            protocol, port, local_ip, port
        );
        Ok(())
    }

    /// Supprime une redirection de port sur la passerelle.
    ///
    /// Idempotent pour l'appelant: si la passerelle répond par un fault
    /// (typiquement UPnP 714, NoSuchEntryInArray), l'entrée est déjà
    /// absente et l'appel est un succès. Les échecs de transport remontent.
    pub fn delete_port_mapping(
        &self,
        port: u16,
        protocol: PortMappingProtocol,
    ) -> Result<(), GatewayError> {
        let control_url = self.require_control_url()?;

        let action = SoapAction::new(WAN_IP_CONNECTION, "DeletePortMapping")
            .arg("NewRemoteHost", "")
            .arg("NewExternalPort", port.to_string())
            .arg("NewProtocol", protocol.to_string());

        let result = invoke_soap_action(&control_url, &action, self.soap_timeout())?;
        if result.status.is_success() {
            require_envelope("DeletePortMapping", &result)?;
            info!("✅ Port mapping deleted: {} {}", protocol, port);
            return Ok(());
        }

        match result.fault() {
            Some(fault) => {
                // L'entrée n'existe pas (ou plus): le résultat net demandé
                // est atteint.
                debug!(
                    "DeletePortMapping fault treated as already-absent: {}",
                    fault
                );
                Ok(())
            }
            None => Err(protocol_error("DeletePortMapping", &result)),
        }
    }

    /// Adresse IP externe de la passerelle.
    ///
    /// Contrairement aux opérations de redirection, ne déclenche PAS de
    /// découverte implicite: échoue avec [`GatewayError::NotDiscovered`]
    /// tant qu'aucune découverte n'a abouti.
    pub fn external_ip(&self) -> Result<IpAddr, GatewayError> {
        let control_url = self
            .state
            .read()
            .control_url
            .clone()
            .ok_or(GatewayError::NotDiscovered)?;

        let action = SoapAction::new(WAN_IP_CONNECTION, "GetExternalIPAddress");
        let result = invoke_soap_action(&control_url, &action, self.soap_timeout())?;
        if !result.status.is_success() {
            return Err(protocol_error("GetExternalIPAddress", &result));
        }

        let envelope = result.envelope.as_ref().ok_or_else(|| {
            GatewayError::Protocol(
                "GetExternalIPAddress response is not well-formed XML".to_string(),
            )
        })?;
        let response = envelope
            .body
            .response_element("GetExternalIPAddress")
            .ok_or_else(|| {
                GatewayError::Protocol(
                    "Missing GetExternalIPAddressResponse element in SOAP body".to_string(),
                )
            })?;
        let text = crate::soap::extract_child_text(response, "NewExternalIPAddress")
            .ok_or_else(|| {
                GatewayError::Protocol(
                    "Missing NewExternalIPAddress element in SOAP response".to_string(),
                )
            })?;

        text.parse::<IpAddr>()
            .map_err(|_| GatewayError::Parse("NewExternalIPAddress".to_string(), text))
    }

    fn soap_timeout(&self) -> Duration {
        self.config.read().soap_timeout
    }

    fn local_ip(&self) -> Option<Ipv4Addr> {
        self.config.read().local_ip.or_else(netif::local_ipv4)
    }

    /// URL de contrôle cachée, en tentant une découverte non forcée si
    /// aucune ne l'est encore.
    fn require_control_url(&self) -> Result<String, GatewayError> {
        if let Some(url) = self.control_url() {
            return Ok(url);
        }
        self.discover(false);
        self.control_url().ok_or(GatewayError::NoGatewayAvailable)
    }
}

struct DiscoveredGateway {
    description_url: String,
    control_url: String,
    event_url: Option<String>,
}

fn run_discovery_cycle(
    target: SocketAddr,
    discovery_timeout: Duration,
    soap_timeout: Duration,
) -> Result<DiscoveredGateway, GatewayError> {
    let search = SsdpSearch::new(target, discovery_timeout);
    let location = search.search()?;
    debug!("Gateway description announced at {}", location);

    let endpoints = resolve_description(&location, soap_timeout)?;
    Ok(DiscoveredGateway {
        description_url: location,
        control_url: endpoints.control_url,
        event_url: endpoints.event_url,
    })
}

fn require_envelope(action: &str, result: &SoapCallResult) -> Result<(), GatewayError> {
    if result.envelope.is_none() {
        return Err(GatewayError::Protocol(format!(
            "{} response is not well-formed XML",
            action
        )));
    }
    Ok(())
}

fn protocol_error(action: &str, result: &SoapCallResult) -> GatewayError {
    match result.fault() {
        Some(fault) => {
            GatewayError::Protocol(format!("{} rejected by gateway: {}", action, fault))
        }
        None => GatewayError::Protocol(format!(
            "{} failed with HTTP status {} and body: {}",
            action, result.status, result.raw_body
        )),
    }
}
