use serde::Serialize;

use mesh_packet::PeerInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Initializing,
    Connected,
    Disconnected,
}

impl ConnectionStatus {
    pub fn to_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }

    pub fn is_connected(&self) -> bool {
        *self == Self::Connected
    }
}

/// One registered neighbor. Timing fields are milliseconds on the node's
/// monotonic clock; `last_sent` is stamped only by update and keepalive
/// propagations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeerRecord {
    #[serde(flatten)]
    pub info: PeerInfo,
    #[serde(rename = "connectionStatus")]
    pub status: ConnectionStatus,
    #[serde(rename = "lastSent", skip_serializing_if = "Option::is_none")]
    pub last_sent: Option<u64>,
    #[serde(rename = "lastRecvKeepalive", skip_serializing_if = "Option::is_none")]
    pub last_recv: Option<u64>,
    #[serde(rename = "holdTimeSec", skip_serializing_if = "Option::is_none")]
    pub hold_time: Option<u64>,
}

impl PeerRecord {
    pub fn new(info: PeerInfo) -> Self {
        Self {
            info,
            status: ConnectionStatus::Initializing,
            last_sent: None,
            last_recv: None,
            hold_time: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_initializing() {
        let record = PeerRecord::new(PeerInfo::new("node-b", "wss://b:4222"));
        assert_eq!(record.status, ConnectionStatus::Initializing);
        assert!(record.last_sent.is_none());
        assert!(record.hold_time.is_none());
    }

    #[test]
    fn test_status_wire_form() {
        let record = PeerRecord::new(PeerInfo::new("node-b", "wss://b:4222"));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["connectionStatus"], "initializing");
        assert_eq!(value["name"], "node-b");
        assert!(value.get("lastSent").is_none());
    }
}
