//! SOAP Faults retournés par la passerelle

use super::SoapBody;
use super::envelope::find_child_with_suffix;
use crate::soap::extract_child_text;
use std::fmt;

/// Erreur SOAP (Fault)
#[derive(Debug, Clone)]
pub struct SoapFault {
    /// Code d'erreur (ex: "s:Client")
    pub fault_code: String,

    /// Description de l'erreur
    pub fault_string: String,

    /// Détails UPnP optionnels
    pub upnp_error: Option<UpnpError>,
}

/// Erreur UPnP spécifique
#[derive(Debug, Clone)]
pub struct UpnpError {
    /// Code d'erreur UPnP (ex: "714")
    pub error_code: String,

    /// Description de l'erreur
    pub error_description: String,
}

impl SoapFault {
    /// Extrait un Fault du corps d'une réponse SOAP, s'il y en a un.
    ///
    /// Format attendu (SOAP 1.1 + UPnP control):
    /// `<s:Fault><faultcode/><faultstring/><detail><UPnPError>...</detail></s:Fault>`
    pub fn from_body(body: &SoapBody) -> Option<SoapFault> {
        let fault_elem = body.child_with_suffix("Fault")?;

        let fault_code = extract_child_text(fault_elem, "faultcode").unwrap_or_default();
        let fault_string = extract_child_text(fault_elem, "faultstring").unwrap_or_default();

        let upnp_error = find_child_with_suffix(fault_elem, "detail")
            .and_then(|detail| find_child_with_suffix(detail, "UPnPError"))
            .map(|err| UpnpError {
                error_code: extract_child_text(err, "errorCode").unwrap_or_default(),
                error_description: extract_child_text(err, "errorDescription").unwrap_or_default(),
            });

        Some(SoapFault {
            fault_code,
            fault_string,
            upnp_error,
        })
    }
}

impl fmt::Display for SoapFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.upnp_error {
            Some(err) => write!(
                f,
                "UPnP error {}: {} (faultcode {})",
                err.error_code, err.error_description, self.fault_code
            ),
            None => write!(f, "SOAP fault {}: {}", self.fault_code, self.fault_string),
        }
    }
}
