//! Structures de l'enveloppe SOAP

use xmltree::{Element, XMLNode};

/// Enveloppe SOAP complète
#[derive(Debug, Clone)]
pub struct SoapEnvelope {
    /// En-tête SOAP optionnel
    pub header: Option<SoapHeader>,

    /// Corps SOAP contenant la réponse ou le fault
    pub body: SoapBody,
}

/// En-tête SOAP
#[derive(Debug, Clone)]
pub struct SoapHeader {
    /// Contenu XML brut de l'en-tête
    pub content: Element,
}

/// Corps SOAP
#[derive(Debug, Clone)]
pub struct SoapBody {
    /// Contenu XML brut du corps
    pub content: Element,
}

impl SoapBody {
    /// Premier enfant direct du corps dont le nom se termine par `suffix`.
    ///
    /// Les passerelles préfixent leurs éléments de manière variable
    /// (`u:`, `m:`, pas de préfixe...), on compare donc sur le suffixe.
    pub fn child_with_suffix(&self, suffix: &str) -> Option<&Element> {
        find_child_with_suffix(&self.content, suffix)
    }

    /// Élément `<ActionResponse>` pour l'action donnée, s'il est présent.
    pub fn response_element(&self, action: &str) -> Option<&Element> {
        self.child_with_suffix(&format!("{}Response", action))
    }
}

pub(crate) fn find_child_with_suffix<'a>(parent: &'a Element, suffix: &str) -> Option<&'a Element> {
    parent.children.iter().find_map(|node| match node {
        XMLNode::Element(elem) if elem.name.ends_with(suffix) => Some(elem),
        _ => None,
    })
}

/// Texte d'un élément enfant identifié par suffixe de nom.
///
/// Retourne `None` si l'élément est absent ou vide.
pub fn extract_child_text(parent: &Element, suffix: &str) -> Option<String> {
    let child = find_child_with_suffix(parent, suffix)?;
    child
        .get_text()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}
