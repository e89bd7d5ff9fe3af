use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use mesh_packet::PeerInfo;

/// Node-wide configuration, loaded from a YAML or JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub node: NodeConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// This node's FQDN; the leaf of every node path it originates.
    #[serde(default = "default_node_name")]
    pub name: String,
    /// Trust domains this node advertises. Peers sharing none are ignored.
    #[serde(default)]
    pub domains: BTreeSet<String>,
    /// Advertised WebSocket URL peers dial to reach this node.
    #[serde(default = "default_node_endpoint")]
    pub endpoint: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: default_node_name(),
            domains: BTreeSet::new(),
            endpoint: default_node_endpoint(),
        }
    }
}

fn default_node_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

fn default_node_endpoint() -> String {
    format!("ws://{}:4222", default_node_name())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub ibgp: IbgpConfig,
    #[serde(default, rename = "envoyConfig")]
    pub envoy_config: EnvoyConfig,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    #[serde(default, rename = "gqlGatewayConfig")]
    pub gql_gateway_config: Option<GatewayConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IbgpConfig {
    /// Shared secret checked on inbound OPEN.
    #[serde(default)]
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvoyConfig {
    /// Inclusive listener port ranges handed to the allocator.
    #[serde(default = "default_port_range", rename = "portRange")]
    pub port_range: Vec<[u16; 2]>,
    /// Address proxy listeners bind to.
    #[serde(default = "default_bind_address", rename = "bindAddress")]
    pub bind_address: String,
}

impl Default for EnvoyConfig {
    fn default() -> Self {
        Self {
            port_range: default_port_range(),
            bind_address: default_bind_address(),
        }
    }
}

fn default_port_range() -> Vec<[u16; 2]> {
    vec![[10000, 10100]]
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

/// External auth collaborator; consumed only at its interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub endpoint: String,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&text)?,
            _ => serde_yaml::from_str(&text)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.node.name.is_empty() {
            return Err(anyhow!("node.name must not be empty"));
        }
        url::Url::parse(&self.node.endpoint)
            .with_context(|| format!("node.endpoint {}", self.node.endpoint))?;
        for range in &self.orchestrator.envoy_config.port_range {
            if range[0] > range[1] {
                return Err(anyhow!("portRange [{}, {}] is inverted", range[0], range[1]));
            }
        }
        Ok(())
    }

    /// This node's identity as sent in OPEN messages.
    pub fn local_info(&self) -> PeerInfo {
        PeerInfo {
            name: self.node.name.clone(),
            endpoint: self.node.endpoint.clone(),
            domains: self.node.domains.clone(),
            peer_token: None,
        }
    }

    /// `host:port` this node's RPC listener binds, derived from the
    /// advertised endpoint.
    pub fn listen_addr(&self) -> Result<String> {
        let url = url::Url::parse(&self.node.endpoint)?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| anyhow!("node.endpoint {} has no port", self.node.endpoint))?;
        Ok(format!("0.0.0.0:{port}"))
    }
}

/// 1. --config argument
/// 2. HomeDir ~/.meshd/config.yaml
/// 3. System /etc/meshd/config.yaml
pub fn config_path(arg: Option<&str>) -> Option<PathBuf> {
    if let Some(arg) = arg {
        let path = PathBuf::from(arg);
        if path.exists() {
            return Some(path);
        }
        return None;
    }
    if let Some(mut home) = dirs::home_dir() {
        home.push(".meshd");
        home.push("config.yaml");
        if home.exists() {
            return Some(home);
        }
    }
    let path = PathBuf::from("/etc/meshd/config.yaml");
    if path.exists() { Some(path) } else { None }
}
