//! # Module SSDP - Simple Service Discovery Protocol
//!
//! Ce module implémente la recherche SSDP côté control point, utilisée pour
//! localiser la passerelle Internet (IGD) sur le réseau local.
//!
//! ## Fonctionnalités
//!
//! - ✅ Envoi de M-SEARCH pour `upnp:rootdevice` (multicast ou unicast)
//! - ✅ Lecture des réponses jusqu'à expiration de la fenêtre de découverte
//! - ✅ Extraction de l'en-tête `LOCATION` (insensible à la casse)
//!
//! ## Constants SSDP
//!
//! - **Multicast Address**: 239.255.255.250:1900
//! - **Search Target**: upnp:rootdevice

mod search;

pub use search::{SsdpSearch, SsdpSearchError};

/// Adresse multicast SSDP
pub const SSDP_MULTICAST_ADDR: &str = "239.255.255.250";

/// Port SSDP
pub const SSDP_PORT: u16 = 1900;

/// Search target identifiant un root device UPnP
pub const ST_ROOTDEVICE: &str = "upnp:rootdevice";
