pub mod description;
pub mod errors;
pub mod gateway;
pub mod netif;
pub mod soap;
pub mod soap_client;
pub mod ssdp;

use std::time::Duration;

pub use description::{DeviceEndpoints, resolve_description};
pub use errors::GatewayError;
pub use gateway::{GatewayConfig, GatewayControlPoint, PortMappingProtocol};
pub use soap::{SoapAction, SoapEnvelope, SoapFault};
pub use soap_client::{SoapCallResult, invoke_soap_action};
pub use ssdp::SsdpSearch;

/// Fenêtre d'attente par défaut pour la découverte SSDP.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(3);

/// Timeout par défaut des requêtes HTTP SOAP vers la passerelle.
pub const DEFAULT_SOAP_TIMEOUT: Duration = Duration::from_secs(10);
