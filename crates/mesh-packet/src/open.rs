use serde::{Deserialize, Serialize};

use crate::PeerInfo;

/// Hold-time bounds in seconds. A proposed value outside the range is
/// clamped, an absent one takes the default.
pub const HOLD_TIME_MIN: u64 = 3;
pub const HOLD_TIME_MAX: u64 = 600;
pub const HOLD_TIME_DEFAULT: u64 = 90;

/// Session-establishment request: the caller's identity plus its proposed
/// hold time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPacket {
    #[serde(rename = "peerInfo")]
    pub peer_info: PeerInfo,
    #[serde(
        default,
        rename = "holdTime",
        skip_serializing_if = "Option::is_none"
    )]
    pub hold_time: Option<u64>,
}

impl OpenPacket {
    pub fn new(peer_info: PeerInfo, hold_time: Option<u64>) -> Self {
        Self { peer_info, hold_time }
    }
}

/// Response to an OPEN. On acceptance the responder returns its own
/// identity and the negotiated hold time so the dialing side can register
/// the session symmetrically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAck {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(
        default,
        rename = "peerInfo",
        skip_serializing_if = "Option::is_none"
    )]
    pub peer_info: Option<PeerInfo>,
    #[serde(
        default,
        rename = "holdTime",
        skip_serializing_if = "Option::is_none"
    )]
    pub hold_time: Option<u64>,
}

impl OpenAck {
    pub fn accept(peer_info: PeerInfo, hold_time: u64) -> Self {
        Self {
            accepted: true,
            reason: None,
            peer_info: Some(peer_info),
            hold_time: Some(hold_time),
        }
    }

    pub fn reject(reason: &str) -> Self {
        Self {
            accepted: false,
            reason: Some(reason.to_string()),
            peer_info: None,
            hold_time: None,
        }
    }
}

pub fn clamp_hold_time(proposed: Option<u64>) -> u64 {
    proposed
        .unwrap_or(HOLD_TIME_DEFAULT)
        .clamp(HOLD_TIME_MIN, HOLD_TIME_MAX)
}

/// Both sides run the session on the smaller of the two proposals.
pub fn negotiate_hold_time(proposed: Option<u64>) -> u64 {
    clamp_hold_time(proposed).min(HOLD_TIME_DEFAULT)
}
