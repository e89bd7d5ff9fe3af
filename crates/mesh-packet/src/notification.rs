use serde::{Deserialize, Serialize};

use crate::PeerInfo;

/// Session teardown codes.
pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_HOLD_EXPIRED: u16 = 1001;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeepalivePacket {
    #[serde(rename = "peerInfo")]
    pub peer_info: PeerInfo,
}

impl KeepalivePacket {
    pub fn new(peer_info: PeerInfo) -> Self {
        Self { peer_info }
    }
}

/// NOTIFICATION carrying the reason a session is going away.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosePacket {
    #[serde(rename = "peerInfo")]
    pub peer_info: PeerInfo,
    pub code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ClosePacket {
    pub fn new(peer_info: PeerInfo, code: u16, reason: Option<String>) -> Self {
        Self { peer_info, code, reason }
    }
}
