// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Authorized-system registry.
//!
//! A static lookup table built once from configuration. Adapters resolve the presented
//! `(system id, key, transport kind)` triple here before doing anything else with a call.

use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AuthFailure, AuthRejection, CoreError, Result};

/// Which adapter a configured system is allowed to ingest through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SystemKind {
    /// HTTP multipart uploads (SDRTrunk "call upload" API).
    Sdrtrunk,
    /// UDP call datagrams.
    Udp,
    /// Outbound peer-link connection to a WhackerLink master.
    Whackerlink,
}

impl SystemKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sdrtrunk => "sdrtrunk",
            Self::Udp => "udp",
            Self::Whackerlink => "whackerlink",
        }
    }
}

impl SystemKind {
    /// Whether calls from this kind of system present a shared key. Peer links are outbound
    /// connections and carry none.
    pub const fn authenticates_by_key(self) -> bool {
        matches!(self, Self::Sdrtrunk | Self::Udp)
    }
}

impl fmt::Display for SystemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured radio system allowed to submit calls.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthorizedSystem {
    pub id: String,
    pub alias: String,
    pub kind: SystemKind,
    pub api_key: String,
    pub enabled: bool,
    /// Peer address, only meaningful for [`SystemKind::Whackerlink`].
    pub address: Option<String>,
    /// Peer port, only meaningful for [`SystemKind::Whackerlink`].
    pub port: Option<u16>,
}

impl AuthorizedSystem {
    /// `host:port` of the peer master, if this is a fully configured peer-link system.
    pub fn peer_endpoint(&self) -> Option<String> {
        match (&self.address, self.port) {
            (Some(address), Some(port)) => Some(format!("{address}:{port}")),
            _ => None,
        }
    }
}

// Hand-written so keys never end up in logs.
impl fmt::Debug for AuthorizedSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizedSystem")
            .field("id", &self.id)
            .field("alias", &self.alias)
            .field("kind", &self.kind)
            .field("api_key", &"<redacted>")
            .field("enabled", &self.enabled)
            .field("address", &self.address)
            .field("port", &self.port)
            .finish()
    }
}

/// Read-only registry of authorized systems, keyed by id (configuration order preserved).
#[derive(Debug, Default)]
pub struct SystemRegistry {
    systems: IndexMap<String, AuthorizedSystem>,
}

impl SystemRegistry {
    /// Builds the registry.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Configuration`] if:
    /// - Two systems share an id
    /// - A system has an empty id
    /// - A `whackerlink` system is missing its address or port
    /// - An `sdrtrunk` or `udp` system has no API key
    pub fn new(systems: impl IntoIterator<Item = AuthorizedSystem>) -> Result<Self> {
        let mut map = IndexMap::new();
        for system in systems {
            if system.id.trim().is_empty() {
                return Err(CoreError::Configuration(format!(
                    "system '{}' has an empty id",
                    system.alias
                )));
            }
            if system.kind.authenticates_by_key() && system.api_key.is_empty() {
                return Err(CoreError::Configuration(format!(
                    "{} system '{}' requires a non-empty api_key",
                    system.kind, system.id
                )));
            }
            if system.kind == SystemKind::Whackerlink && system.peer_endpoint().is_none() {
                return Err(CoreError::Configuration(format!(
                    "whackerlink system '{}' requires both address and port",
                    system.id
                )));
            }
            if map.contains_key(&system.id) {
                return Err(CoreError::Configuration(format!(
                    "duplicate system id '{}'",
                    system.id
                )));
            }
            map.insert(system.id.clone(), system);
        }
        Ok(Self { systems: map })
    }

    /// Resolves a presented credential triple.
    ///
    /// Every mismatch yields the same [`AuthFailure`]; the reason is logged here and nowhere
    /// else.
    ///
    /// # Errors
    ///
    /// Returns [`AuthFailure`] unless the id exists, the system is enabled, the key matches
    /// exactly (case-sensitive) and the system kind matches the calling adapter.
    pub fn authorize(
        &self,
        system_id: &str,
        presented_key: &str,
        kind: SystemKind,
    ) -> std::result::Result<&AuthorizedSystem, AuthFailure> {
        match self.check(system_id, presented_key, kind) {
            Ok(system) => Ok(system),
            Err(reason) => {
                tracing::warn!(
                    system_id = %system_id,
                    transport = %kind,
                    %reason,
                    "Rejected call authorization"
                );
                Err(AuthFailure)
            },
        }
    }

    fn check(
        &self,
        system_id: &str,
        presented_key: &str,
        kind: SystemKind,
    ) -> std::result::Result<&AuthorizedSystem, AuthRejection> {
        let system = self.systems.get(system_id).ok_or(AuthRejection::UnknownSystem)?;
        if !system.enabled {
            return Err(AuthRejection::Disabled);
        }
        if system.kind != kind {
            return Err(AuthRejection::KindMismatch);
        }
        if presented_key.is_empty() || system.api_key != presented_key {
            return Err(AuthRejection::KeyMismatch);
        }
        Ok(system)
    }

    pub fn get(&self, system_id: &str) -> Option<&AuthorizedSystem> {
        self.systems.get(system_id)
    }

    /// Enabled peer-link systems, in configuration order.
    pub fn peers(&self) -> impl Iterator<Item = &AuthorizedSystem> {
        self.systems.values().filter(|s| s.enabled && s.kind == SystemKind::Whackerlink)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AuthorizedSystem> {
        self.systems.values()
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn system(id: &str, kind: SystemKind, key: &str, enabled: bool) -> AuthorizedSystem {
        AuthorizedSystem {
            id: id.to_string(),
            alias: format!("alias-{id}"),
            kind,
            api_key: key.to_string(),
            enabled,
            address: None,
            port: None,
        }
    }

    fn registry() -> SystemRegistry {
        SystemRegistry::new([
            system("7", SystemKind::Sdrtrunk, "K1", true),
            system("8", SystemKind::Udp, "K2", true),
            system("9", SystemKind::Sdrtrunk, "K3", false),
        ])
        .unwrap()
    }

    #[test]
    fn exact_match_is_authorized() {
        let registry = registry();
        let system = registry.authorize("7", "K1", SystemKind::Sdrtrunk).unwrap();
        assert_eq!(system.alias, "alias-7");
        assert_eq!(registry.authorize("8", "K2", SystemKind::Udp).unwrap().id, "8");
    }

    #[test]
    fn any_single_field_change_yields_the_same_failure() {
        let registry = registry();
        let failures = [
            registry.authorize("70", "K1", SystemKind::Sdrtrunk),
            registry.authorize("7", "k1", SystemKind::Sdrtrunk),
            registry.authorize("7", "K1 ", SystemKind::Sdrtrunk),
            registry.authorize("7", "K1", SystemKind::Udp),
            registry.authorize("7", "K1", SystemKind::Whackerlink),
        ];
        for result in failures {
            assert_eq!(result.unwrap_err(), AuthFailure);
        }
    }

    #[test]
    fn disabled_systems_never_match() {
        assert_eq!(registry().authorize("9", "K3", SystemKind::Sdrtrunk), Err(AuthFailure));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = SystemRegistry::new([
            system("1", SystemKind::Sdrtrunk, "a", true),
            system("1", SystemKind::Udp, "b", true),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("duplicate system id '1'"));
    }

    #[test]
    fn peers_require_an_endpoint() {
        let err =
            SystemRegistry::new([system("p", SystemKind::Whackerlink, "", true)]).unwrap_err();
        assert!(err.to_string().contains("requires both address and port"));

        let mut peer = system("p", SystemKind::Whackerlink, "", true);
        peer.address = Some("10.0.0.5".to_string());
        peer.port = Some(3009);
        let mut disabled_peer = peer.clone();
        disabled_peer.id = "q".to_string();
        disabled_peer.enabled = false;

        let registry = SystemRegistry::new([peer, disabled_peer]).unwrap();
        let peers: Vec<_> = registry.peers().collect();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].peer_endpoint().as_deref(), Some("10.0.0.5:3009"));
    }

    #[test]
    fn keyless_systems_are_rejected_at_startup() {
        for kind in [SystemKind::Sdrtrunk, SystemKind::Udp] {
            let err = SystemRegistry::new([system("7", kind, "", true)]).unwrap_err();
            assert!(err.to_string().contains("requires a non-empty api_key"), "{kind}");
        }
        // Disabled systems are validated too.
        assert!(SystemRegistry::new([system("7", SystemKind::Sdrtrunk, "", false)]).is_err());
    }

    #[test]
    fn empty_presented_key_is_a_key_mismatch() {
        let registry = registry();
        assert_eq!(registry.check("7", "", SystemKind::Sdrtrunk), Err(AuthRejection::KeyMismatch));
        assert_eq!(registry.authorize("8", "", SystemKind::Udp), Err(AuthFailure));
    }

    #[test]
    fn debug_output_redacts_keys() {
        let rendered = format!("{:?}", system("7", SystemKind::Sdrtrunk, "secret-key", true));
        assert!(!rendered.contains("secret-key"));
        assert!(rendered.contains("<redacted>"));
    }
}
