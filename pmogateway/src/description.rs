//! Résolution de la description UPnP de la passerelle.
//!
//! À partir de l'URL `LOCATION` annoncée en SSDP: GET de la description
//! (UPnP Device Description v1.0), vérification du type de device, puis
//! extraction des URLs de contrôle et d'événements du service
//! WANIPConnection.

use std::io::BufReader;
use std::time::Duration;

use quick_xml::{Error as XmlError, Reader, events::Event};
use thiserror::Error;
use tracing::{debug, warn};
use ureq::Agent;

/// Marqueur du type de device attendu dans `deviceType`
pub const IGD_DEVICE_MARKER: &str = "InternetGatewayDevice";

/// URN du service de contrôle de connexion WAN
pub const WAN_IP_CONNECTION: &str = "urn:schemas-upnp-org:service:WANIPConnection:1";

/// Erreur de résolution de description
#[derive(Debug, Error)]
pub enum DescriptionError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] ureq::Error),

    #[error("Failed to read HTTP body: {0}")]
    HttpIo(#[from] std::io::Error),

    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// Le device décrit n'est pas une passerelle Internet
    #[error("Device type '{device_type}' is not an InternetGatewayDevice")]
    NotGatewayDevice { device_type: String },

    /// Pas de service WANIPConnection dans la description
    #[error("No WANIPConnection service found in device description")]
    ServiceNotFound,

    #[error("Missing required description element: {0}")]
    MissingField(&'static str),

    /// L'URL de description ne porte pas d'autorité (schéma + hôte)
    #[error("Description URL '{0}' has no authority component")]
    MissingAuthority(String),
}

/// Endpoints du service WANIPConnection, résolus en URLs absolues
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEndpoints {
    /// URL acceptant les actions SOAP
    pub control_url: String,

    /// URL d'abonnement aux événements (découverte mais jamais souscrite)
    pub event_url: Option<String>,
}

#[derive(Debug, Default)]
struct ParsedIgdDescription {
    root_device_type: Option<String>,
    wan_service_type: Option<String>,
    wan_control_url: Option<String>,
    wan_event_url: Option<String>,
}

/// Récupère et résout la description de device à `description_url`.
///
/// Échoue avec [`DescriptionError::NotGatewayDevice`] si le `deviceType`
/// racine ne désigne pas une passerelle, [`DescriptionError::ServiceNotFound`]
/// si aucun service WANIPConnection n'est déclaré.
pub fn resolve_description(
    description_url: &str,
    timeout: Duration,
) -> Result<DeviceEndpoints, DescriptionError> {
    debug!("Fetching device description at {}", description_url);

    let config = Agent::config_builder()
        .timeout_global(Some(timeout))
        .build();
    let agent: Agent = config.into();

    let response = agent.get(description_url).call()?;
    let (_parts, body) = response.into_parts();
    let body_reader = body.into_reader();

    let parsed = parse_igd_description(BufReader::new(body_reader))?;
    endpoints_from_parsed(description_url, parsed)
}

fn endpoints_from_parsed(
    description_url: &str,
    parsed: ParsedIgdDescription,
) -> Result<DeviceEndpoints, DescriptionError> {
    let device_type = parsed
        .root_device_type
        .ok_or(DescriptionError::MissingField("deviceType"))?;

    if !device_type.contains(IGD_DEVICE_MARKER) {
        warn!("Device at {} is not a gateway: {}", description_url, device_type);
        return Err(DescriptionError::NotGatewayDevice { device_type });
    }

    if parsed.wan_service_type.is_none() {
        return Err(DescriptionError::ServiceNotFound);
    }
    let raw_control = parsed
        .wan_control_url
        .ok_or(DescriptionError::MissingField("controlURL"))?;

    let control_url = resolve_service_url(description_url, &raw_control)?;
    let event_url = parsed
        .wan_event_url
        .map(|raw| resolve_service_url(description_url, &raw))
        .transpose()?;

    debug!(
        "WANIPConnection endpoints: control={} event={:?}",
        control_url, event_url
    );

    Ok(DeviceEndpoints {
        control_url,
        event_url,
    })
}

/// Scan streaming de la description.
///
/// Le premier `deviceType` rencontré est celui du device racine; le service
/// WANIPConnection est cherché dans tout l'arbre, car l'IGD l'imbrique sous
/// WANDevice/WANConnectionDevice.
fn parse_igd_description<R: std::io::BufRead>(
    reader: R,
) -> Result<ParsedIgdDescription, DescriptionError> {
    let mut reader = Reader::from_reader(reader);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut parsed = ParsedIgdDescription::default();

    let mut in_service = false;
    let mut current_tag: Option<String> = None;

    // serviceType + URLs du <service> en cours de lecture
    let mut current_service_type: Option<String> = None;
    let mut current_control_url: Option<String> = None;
    let mut current_event_url: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match name.as_str() {
                    "service" => {
                        in_service = true;
                        current_tag = None;
                        current_service_type = None;
                        current_control_url = None;
                        current_event_url = None;
                    }
                    _ => {
                        current_tag = Some(name);
                    }
                }
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if name == "service" && in_service {
                    // Fin d'un bloc <service>: si c'est WANIPConnection, on
                    // garde le premier rencontré.
                    if let Some(st) = &current_service_type {
                        if st == WAN_IP_CONNECTION && parsed.wan_service_type.is_none() {
                            parsed.wan_service_type = Some(st.clone());
                            parsed.wan_control_url = current_control_url.clone();
                            parsed.wan_event_url = current_event_url.clone();
                        }
                    }
                    in_service = false;
                    current_service_type = None;
                    current_control_url = None;
                    current_event_url = None;
                }
                current_tag = None;
            }
            Event::Text(e) => {
                if let Some(tag) = &current_tag {
                    let text = e.decode().map_err(XmlError::Encoding)?.into_owned();

                    match tag.as_str() {
                        "deviceType" => {
                            if parsed.root_device_type.is_none() {
                                parsed.root_device_type = Some(text);
                            }
                        }
                        "serviceType" if in_service => {
                            current_service_type = Some(text);
                        }
                        "controlURL" if in_service => {
                            current_control_url = Some(text);
                        }
                        "eventSubURL" if in_service => {
                            current_event_url = Some(text);
                        }
                        _ => {}
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }

        buf.clear();
    }

    Ok(parsed)
}

/// Résout une URL de service, éventuellement relative, contre l'URL de
/// description.
///
/// - Une URL déjà absolue (http:// ou https://) est retournée telle quelle.
/// - Sinon, schéma + hôte + port sont repris de l'URL de description (tout
///   ce qui précède le troisième `/`) et le chemin relatif est concaténé.
///   Pas de résolution RFC 3986 complète: les passerelles publient des
///   chemins absolus simples.
fn resolve_service_url(
    description_url: &str,
    service_url: &str,
) -> Result<String, DescriptionError> {
    if service_url.starts_with("http://") || service_url.starts_with("https://") {
        return Ok(service_url.to_string());
    }

    let (scheme, rest) = description_url
        .split_once("://")
        .ok_or_else(|| DescriptionError::MissingAuthority(description_url.to_string()))?;

    let authority = match rest.find('/') {
        Some(pos) => &rest[..pos],
        None => rest,
    };
    if authority.is_empty() {
        return Err(DescriptionError::MissingAuthority(
            description_url.to_string(),
        ));
    }

    if service_url.starts_with('/') {
        Ok(format!("{}://{}{}", scheme, authority, service_url))
    } else {
        Ok(format!("{}://{}/{}", scheme, authority, service_url))
    }
}
