//! Exécution HTTP des actions SOAP vers la passerelle.

use std::io::Read;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, trace};
use ureq::Agent;

use crate::soap::{SoapAction, SoapEnvelope, parse_soap_envelope};

/// Erreur de transport d'un appel SOAP
#[derive(Debug, Error)]
pub enum SoapCallError {
    #[error("Failed to build SOAP envelope: {0}")]
    Envelope(#[from] xmltree::Error),

    #[error("HTTP error during SOAP call: {0}")]
    Http(#[from] ureq::Error),

    #[error("Failed to read SOAP response body: {0}")]
    Io(#[from] std::io::Error),
}

/// Résultat d'un appel SOAP:
/// - code de statut HTTP
/// - corps XML brut (toujours)
/// - enveloppe SOAP parsée si le parsing a réussi
pub struct SoapCallResult {
    pub status: ureq::http::StatusCode,
    pub raw_body: String,
    pub envelope: Option<SoapEnvelope>,
}

impl SoapCallResult {
    /// Fault SOAP contenu dans la réponse, s'il y en a un
    pub fn fault(&self) -> Option<crate::soap::SoapFault> {
        self.envelope
            .as_ref()
            .and_then(|env| crate::soap::SoapFault::from_body(&env.body))
    }
}

/// Invoque une action UPnP sur une URL de contrôle.
///
/// Un seul POST HTTP, borné par `timeout`, sans retry: un échec remonte tel
/// quel à l'appelant. Les statuts 4xx/5xx ne sont PAS traités comme des
/// erreurs de transport, pour que le corps d'un SOAP Fault (HTTP 500) reste
/// lisible par l'appelant.
pub fn invoke_soap_action(
    control_url: &str,
    action: &SoapAction,
    timeout: Duration,
) -> Result<SoapCallResult, SoapCallError> {
    let body_xml = action.to_envelope_xml()?;

    let config = Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .build();
    let agent: Agent = config.into();

    debug!("SOAP {} → {}", action.name, control_url);
    trace!("SOAP request body:\n{}", body_xml);

    let response = agent
        .post(control_url)
        .header("Content-Type", r#"text/xml; charset="utf-8""#)
        .header("SOAPACTION", &action.soapaction_header())
        .send(body_xml)?;

    let status = response.status();

    // Lire tout le corps quel que soit le statut HTTP.
    let (_parts, body) = response.into_parts();
    let mut raw_body = String::new();
    body.into_reader().read_to_string(&mut raw_body)?;

    trace!("SOAP response ({}):\n{}", status, raw_body);

    // L'enveloppe reste optionnelle: l'appelant décide quoi faire d'un
    // corps qui n'est pas du SOAP bien formé.
    let envelope = parse_soap_envelope(raw_body.as_bytes()).ok();

    Ok(SoapCallResult {
        status,
        raw_body,
        envelope,
    })
}
