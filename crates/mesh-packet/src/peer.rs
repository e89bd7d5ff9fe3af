use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::PacketError;

/// Identity of a mesh node as exchanged in OPEN messages and carried on
/// every peering call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub name: String,
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub domains: BTreeSet<String>,
    #[serde(
        default,
        rename = "peerToken",
        skip_serializing_if = "Option::is_none"
    )]
    pub peer_token: Option<String>,
}

impl PeerInfo {
    pub fn new(name: &str, endpoint: &str) -> Self {
        Self {
            name: name.to_string(),
            endpoint: endpoint.to_string(),
            domains: BTreeSet::new(),
            peer_token: None,
        }
    }

    pub fn with_domain(mut self, domain: &str) -> Self {
        self.domains.insert(domain.to_string());
        self
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.peer_token = Some(token.to_string());
        self
    }

    /// Value-identity snapshot stored on learned routes.
    pub fn snapshot(&self) -> PeerRef {
        PeerRef {
            name: self.name.clone(),
            endpoint: self.endpoint.clone(),
        }
    }

    /// True when the two nodes share at least one trust domain.
    pub fn shares_domain(&self, other: &BTreeSet<String>) -> bool {
        self.domains.iter().any(|d| other.contains(d))
    }

    pub fn validate(&self) -> Result<(), PacketError> {
        if self.name.is_empty() {
            return Err(PacketError::InvalidPeer("empty name".into()));
        }
        url::Url::parse(&self.endpoint)
            .map_err(|_| PacketError::InvalidEndpoint(self.endpoint.clone()))?;
        Ok(())
    }
}

/// `{name, endpoint}` snapshot of a peer, detached from the live record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRef {
    pub name: String,
    pub endpoint: String,
}
