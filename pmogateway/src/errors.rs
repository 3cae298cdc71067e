//! Erreurs publiques du control point IGD.

use thiserror::Error;

use crate::description::DescriptionError;
use crate::soap_client::SoapCallError;
use crate::ssdp::SsdpSearchError;

/// Erreurs visibles par les appelants du [`GatewayControlPoint`].
///
/// Les échecs de découverte sont absorbés dans l'état du control point
/// (`available = false`, cause mémorisée); seules les opérations de contrôle
/// remontent une erreur à l'appelant.
///
/// [`GatewayControlPoint`]: crate::gateway::GatewayControlPoint
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Échec socket/HTTP (connexion, envoi, réception, timeout)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Réponse malformée ou inattendue, à n'importe quelle couche
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Le device découvert n'est pas une passerelle Internet
    #[error("Device type '{0}' is not an InternetGatewayDevice")]
    NotGatewayDevice(String),

    /// Pas de service WANIPConnection dans la description du device
    #[error("No WANIPConnection service found in device description")]
    ServiceNotFound,

    /// Aucune passerelle UPnP utilisable après découverte
    #[error("No UPnP gateway available on this network")]
    NoGatewayAvailable,

    /// Opération de contrôle tentée avant toute découverte réussie
    #[error("Gateway not discovered, call discover() first")]
    NotDiscovered,

    /// Valeur de retour SOAP impossible à interpréter
    #[error("Invalid {0} value: {1}")]
    Parse(String, String),
}

impl From<SsdpSearchError> for GatewayError {
    fn from(err: SsdpSearchError) -> Self {
        match err {
            SsdpSearchError::Io(e) => GatewayError::Transport(format!("SSDP socket error: {}", e)),
            e @ SsdpSearchError::NoResponse(_) => GatewayError::Transport(e.to_string()),
            e @ SsdpSearchError::MalformedResponse => GatewayError::Protocol(e.to_string()),
        }
    }
}

impl From<DescriptionError> for GatewayError {
    fn from(err: DescriptionError) -> Self {
        match err {
            DescriptionError::NotGatewayDevice { device_type } => {
                GatewayError::NotGatewayDevice(device_type)
            }
            DescriptionError::ServiceNotFound => GatewayError::ServiceNotFound,
            DescriptionError::Http(e) => {
                GatewayError::Transport(format!("Description fetch failed: {}", e))
            }
            DescriptionError::HttpIo(e) => {
                GatewayError::Transport(format!("Description read failed: {}", e))
            }
            e @ (DescriptionError::Xml(_)
            | DescriptionError::MissingField(_)
            | DescriptionError::MissingAuthority(_)) => GatewayError::Protocol(e.to_string()),
        }
    }
}

impl From<SoapCallError> for GatewayError {
    fn from(err: SoapCallError) -> Self {
        match err {
            e @ SoapCallError::Envelope(_) => GatewayError::Protocol(e.to_string()),
            SoapCallError::Http(e) => GatewayError::Transport(format!("SOAP call failed: {}", e)),
            SoapCallError::Io(e) => {
                GatewayError::Transport(format!("SOAP response read failed: {}", e))
            }
        }
    }
}
