//! Construction de requêtes SOAP

use xmltree::{Element, XMLNode};

/// Action UPnP à invoquer sur un service de la passerelle.
///
/// Objet transitoire: construit pour un appel de contrôle, sérialisé en
/// enveloppe SOAP 1.1 puis jeté. Les arguments sont émis dans l'ordre
/// d'insertion (l'ordre fait partie du contrat des actions WANIPConnection).
#[derive(Debug, Clone)]
pub struct SoapAction {
    /// Nom de l'action (ex: "AddPortMapping")
    pub name: String,

    /// URN du service (ex: "urn:schemas-upnp-org:service:WANIPConnection:1")
    pub service_type: String,

    /// Arguments (nom, valeur), dans l'ordre d'émission
    pub arguments: Vec<(String, String)>,
}

impl SoapAction {
    /// Crée une action sans arguments
    pub fn new(service_type: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            service_type: service_type.to_string(),
            arguments: Vec::new(),
        }
    }

    /// Ajoute un argument (chaînable)
    pub fn arg(mut self, name: &str, value: impl Into<String>) -> Self {
        self.arguments.push((name.to_string(), value.into()));
        self
    }

    /// Valeur de l'en-tête HTTP `SOAPACTION`: `"urn:service#Action"`
    pub fn soapaction_header(&self) -> String {
        format!(r#""{}#{}""#, self.service_type, self.name)
    }

    /// Sérialise l'action dans une enveloppe SOAP 1.1 complète
    pub fn to_envelope_xml(&self) -> Result<String, xmltree::Error> {
        let request_name = format!("u:{}", self.name);
        let mut request_elem = Element::new(&request_name);
        request_elem
            .attributes
            .insert("xmlns:u".to_string(), self.service_type.clone());

        for (name, value) in &self.arguments {
            let mut child = Element::new(name);
            child.children.push(XMLNode::Text(value.clone()));
            request_elem.children.push(XMLNode::Element(child));
        }

        build_soap_envelope_with_body(request_elem)
    }
}

fn build_soap_envelope_with_body(body_child: Element) -> Result<String, xmltree::Error> {
    // Body
    let mut body = Element::new("s:Body");
    body.children.push(XMLNode::Element(body_child));

    // Envelope
    let mut envelope = Element::new("s:Envelope");
    envelope.attributes.insert(
        "xmlns:s".to_string(),
        "http://schemas.xmlsoap.org/soap/envelope/".to_string(),
    );
    envelope.attributes.insert(
        "s:encodingStyle".to_string(),
        "http://schemas.xmlsoap.org/soap/encoding/".to_string(),
    );
    envelope.children.push(XMLNode::Element(body));

    let mut buf = Vec::new();
    let config = xmltree::EmitterConfig::new()
        .write_document_declaration(true)
        .perform_indent(true)
        .indent_string("  ");
    envelope.write_with_config(&mut buf, config)?;

    Ok(String::from_utf8(buf).unwrap())
}
