use std::fmt;

use serde::{Deserialize, Serialize};
use strum_macros::EnumString;

use crate::PacketError;

/// Maximum length of a data channel name, per DNS name limits.
pub const CHANNEL_NAME_MAX: usize = 253;

/// Application protocol carried by a data channel.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, EnumString,
)]
pub enum Protocol {
    #[serde(rename = "http")]
    #[strum(serialize = "http")]
    Http,
    #[serde(rename = "http:graphql")]
    #[strum(serialize = "http:graphql")]
    HttpGraphql,
    #[serde(rename = "http:gql")]
    #[strum(serialize = "http:gql")]
    HttpGql,
    #[serde(rename = "http:grpc")]
    #[strum(serialize = "http:grpc")]
    HttpGrpc,
    #[serde(rename = "tcp")]
    #[strum(serialize = "tcp")]
    Tcp,
}

impl Protocol {
    pub fn to_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::HttpGraphql => "http:graphql",
            Self::HttpGql => "http:gql",
            Self::HttpGrpc => "http:grpc",
            Self::Tcp => "tcp",
        }
    }

    /// Channels that feed the GraphQL gateway as subgraphs.
    pub fn is_graphql(&self) -> bool {
        matches!(self, Self::HttpGraphql | Self::HttpGql)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

/// A service endpoint advertised into the mesh. Identity is
/// `(name, protocol)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataChannel {
    pub name: String,
    pub protocol: Protocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(
        default,
        rename = "envoyPort",
        skip_serializing_if = "Option::is_none"
    )]
    pub envoy_port: Option<u16>,
}

impl DataChannel {
    pub fn new(name: &str, protocol: Protocol) -> Self {
        Self {
            name: name.to_string(),
            protocol,
            endpoint: None,
            region: None,
            tags: Vec::new(),
            envoy_port: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = Some(endpoint.to_string());
        self
    }

    pub fn key(&self) -> ChannelKey {
        ChannelKey {
            name: self.name.clone(),
            protocol: self.protocol,
        }
    }

    pub fn validate(&self) -> Result<(), PacketError> {
        validate_channel_name(&self.name)?;
        if let Some(endpoint) = &self.endpoint {
            url::Url::parse(endpoint)
                .map_err(|_| PacketError::InvalidEndpoint(endpoint.clone()))?;
        }
        Ok(())
    }
}

/// Identity of a data channel within one advertiser.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelKey {
    pub name: String,
    pub protocol: Protocol,
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.protocol)
    }
}

/// Channel names follow DNS naming: labels of alphanumerics and hyphens
/// joined by dots, at most 253 characters overall.
pub fn validate_channel_name(name: &str) -> Result<(), PacketError> {
    if name.is_empty() || name.len() > CHANNEL_NAME_MAX {
        return Err(PacketError::InvalidName(name.to_string()));
    }
    for label in name.split('.') {
        if label.is_empty()
            || label.starts_with('-')
            || label.ends_with('-')
            || !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(PacketError::InvalidName(name.to_string()));
        }
    }
    Ok(())
}
