use serde::{Deserialize, Serialize};

use crate::{DataChannel, PeerInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteAction {
    #[serde(rename = "add")]
    Add,
    #[serde(rename = "remove")]
    Remove,
}

/// One entry of an UPDATE. Entries apply in array order, so an add
/// followed by a remove of the same channel nets out to nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteUpdate {
    pub action: RouteAction,
    pub route: DataChannel,
    #[serde(
        default,
        rename = "nodePath",
        skip_serializing_if = "Option::is_none"
    )]
    pub node_path: Option<Vec<String>>,
}

impl RouteUpdate {
    pub fn add(route: DataChannel, node_path: Vec<String>) -> Self {
        Self {
            action: RouteAction::Add,
            route,
            node_path: Some(node_path),
        }
    }

    pub fn remove(route: DataChannel) -> Self {
        Self {
            action: RouteAction::Remove,
            route,
            node_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatePacket {
    #[serde(rename = "peerInfo")]
    pub peer_info: PeerInfo,
    pub updates: Vec<RouteUpdate>,
}

impl UpdatePacket {
    pub fn new(peer_info: PeerInfo, updates: Vec<RouteUpdate>) -> Self {
        Self { peer_info, updates }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Protocol;

    #[test]
    fn test_update_wire_shape() {
        let update = UpdatePacket::new(
            PeerInfo::new("node-b", "wss://b:4222"),
            vec![RouteUpdate::add(
                DataChannel::new("svc-x", Protocol::Http),
                vec!["node-b".into()],
            )],
        );
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value["updates"][0]["action"], "add");
        assert_eq!(value["updates"][0]["nodePath"][0], "node-b");

        let remove = RouteUpdate::remove(DataChannel::new("svc-x", Protocol::Http));
        let value = serde_json::to_value(&remove).unwrap();
        assert_eq!(value["action"], "remove");
        assert!(value.get("nodePath").is_none());
    }
}
