use serde::{Deserialize, Serialize};

use mesh_packet::DataChannel;

use crate::rib::InternalRoute;

/// The RPC surface is capability-scoped: a connection holds the scopes it
/// has been granted and each method belongs to exactly one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Network,
    DataChannel,
    Ibgp,
}

impl Scope {
    pub fn parse(s: &str) -> Option<Scope> {
        match s {
            "network" => Some(Scope::Network),
            "dataChannel" => Some(Scope::DataChannel),
            "ibgp" => Some(Scope::Ibgp),
            _ => None,
        }
    }

    pub fn to_str(&self) -> &'static str {
        match self {
            Scope::Network => "network",
            Scope::DataChannel => "dataChannel",
            Scope::Ibgp => "ibgp",
        }
    }
}

/// `"network.addPeer"` → `(Network, "addPeer")`.
pub fn split_method(method: &str) -> Option<(Scope, &str)> {
    let (scope, op) = method.split_once('.')?;
    Some((Scope::parse(scope)?, op))
}

#[derive(Debug, Deserialize)]
pub struct AuthorizeParams {
    pub token: String,
    pub scope: String,
}

#[derive(Debug, Deserialize)]
pub struct NameParams {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct ListRoutesReply {
    pub local: Vec<DataChannel>,
    pub internal: Vec<InternalRoute>,
}

/// Token admission seam. The ibgp scope is checked against the shared
/// peering secret locally; management scopes consume the external auth
/// collaborator's allow/deny, which this trait stands in for.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, scope: Scope, token: &str) -> bool;
}

pub struct SecretVerifier {
    pub ibgp_secret: Option<String>,
}

impl TokenVerifier for SecretVerifier {
    fn verify(&self, scope: Scope, token: &str) -> bool {
        match scope {
            Scope::Ibgp => match &self.ibgp_secret {
                Some(secret) => token == secret,
                // No secret configured: open enrollment.
                None => true,
            },
            Scope::Network | Scope::DataChannel => !token.is_empty(),
        }
    }
}
