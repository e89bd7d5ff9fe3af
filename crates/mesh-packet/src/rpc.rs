use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ClosePacket, KeepalivePacket, OpenPacket, PacketError, UpdatePacket};

/// One logical call per WebSocket text message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    pub fn new<T: Serialize>(id: u64, method: &str, params: &T) -> Result<Self, PacketError> {
        Ok(Self {
            id,
            method: method.to_string(),
            params: serde_json::to_value(params)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    pub fn ok<T: Serialize>(id: u64, result: &T) -> Result<Self, PacketError> {
        Ok(Self {
            id,
            result: Some(serde_json::to_value(result)?),
            error: None,
        })
    }

    pub fn err(id: u64, error: &str) -> Self {
        Self {
            id,
            result: None,
            error: Some(error.to_string()),
        }
    }
}

/// Uniform result body for mutating calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResult {
    pub fn ok() -> Self {
        Self { success: true, error: None }
    }

    pub fn fail(error: &str) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
        }
    }
}

/// Peering methods as carried on the wire.
pub const METHOD_OPEN: &str = "ibgp.open";
pub const METHOD_UPDATE: &str = "ibgp.update";
pub const METHOD_KEEPALIVE: &str = "ibgp.keepalive";
pub const METHOD_CLOSE: &str = "ibgp.close";

/// A decoded peering call.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(OpenPacket),
    Update(UpdatePacket),
    Keepalive(KeepalivePacket),
    Close(ClosePacket),
}

impl Packet {
    pub fn method(&self) -> &'static str {
        match self {
            Self::Open(_) => METHOD_OPEN,
            Self::Update(_) => METHOD_UPDATE,
            Self::Keepalive(_) => METHOD_KEEPALIVE,
            Self::Close(_) => METHOD_CLOSE,
        }
    }

    pub fn from_request(method: &str, params: Value) -> Result<Self, PacketError> {
        match method {
            METHOD_OPEN => Ok(Self::Open(serde_json::from_value(params)?)),
            METHOD_UPDATE => Ok(Self::Update(serde_json::from_value(params)?)),
            METHOD_KEEPALIVE => Ok(Self::Keepalive(serde_json::from_value(params)?)),
            METHOD_CLOSE => Ok(Self::Close(serde_json::from_value(params)?)),
            other => Err(PacketError::UnknownMethod(other.to_string())),
        }
    }

    pub fn to_params(&self) -> Result<Value, PacketError> {
        let value = match self {
            Self::Open(p) => serde_json::to_value(p)?,
            Self::Update(p) => serde_json::to_value(p)?,
            Self::Keepalive(p) => serde_json::to_value(p)?,
            Self::Close(p) => serde_json::to_value(p)?,
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PeerInfo;

    #[test]
    fn test_packet_method_routing() {
        let open = Packet::Open(OpenPacket::new(
            PeerInfo::new("node-b", "wss://b:4222"),
            Some(90),
        ));
        let params = open.to_params().unwrap();
        let decoded = Packet::from_request(METHOD_OPEN, params).unwrap();
        assert_eq!(decoded, open);

        let err = Packet::from_request("ibgp.unknown", Value::Null);
        assert!(matches!(err, Err(PacketError::UnknownMethod(_))));
    }

    #[test]
    fn test_response_forms() {
        let ok = RpcResponse::ok(7, &RpcResult::ok()).unwrap();
        assert_eq!(ok.result.unwrap()["success"], true);
        let err = RpcResponse::err(7, "Route not found");
        assert_eq!(err.error.as_deref(), Some("Route not found"));
    }
}
