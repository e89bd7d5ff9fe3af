use mesh_packet::{ChannelKey, DataChannel, PacketError, PeerInfo, RouteUpdate};

/// Every mutation that can reach the RIB. Client RPC calls and inbound
/// peer messages are both expressed as actions and serialized through one
/// queue.
#[derive(Debug, Clone)]
pub enum Action {
    LocalRouteCreate(DataChannel),
    LocalRouteUpdate(DataChannel),
    LocalRouteDelete(ChannelKey),
    LocalPeerCreate(PeerInfo),
    LocalPeerUpdate(PeerInfo),
    LocalPeerDelete { name: String },
    InternalProtocolOpen {
        peer_info: PeerInfo,
        hold_time: Option<u64>,
    },
    InternalProtocolUpdate {
        peer_info: PeerInfo,
        updates: Vec<RouteUpdate>,
    },
    InternalProtocolKeepalive { peer_info: PeerInfo },
    InternalProtocolClose {
        peer_info: PeerInfo,
        code: u16,
        reason: Option<String>,
    },
    InternalProtocolTick,
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LocalRouteCreate(_) => "LocalRouteCreate",
            Self::LocalRouteUpdate(_) => "LocalRouteUpdate",
            Self::LocalRouteDelete(_) => "LocalRouteDelete",
            Self::LocalPeerCreate(_) => "LocalPeerCreate",
            Self::LocalPeerUpdate(_) => "LocalPeerUpdate",
            Self::LocalPeerDelete { .. } => "LocalPeerDelete",
            Self::InternalProtocolOpen { .. } => "InternalProtocolOpen",
            Self::InternalProtocolUpdate { .. } => "InternalProtocolUpdate",
            Self::InternalProtocolKeepalive { .. } => "InternalProtocolKeepalive",
            Self::InternalProtocolClose { .. } => "InternalProtocolClose",
            Self::InternalProtocolTick => "InternalProtocolTick",
        }
    }

    /// Boundary validation; runs before the action is queued so that a
    /// malformed payload never reaches `plan`.
    pub fn validate(&self) -> Result<(), PacketError> {
        match self {
            Self::LocalRouteCreate(channel) | Self::LocalRouteUpdate(channel) => {
                channel.validate()
            }
            Self::LocalRouteDelete(key) => mesh_packet::validate_channel_name(&key.name),
            Self::LocalPeerCreate(info) | Self::LocalPeerUpdate(info) => info.validate(),
            Self::LocalPeerDelete { name } => {
                if name.is_empty() {
                    Err(PacketError::InvalidPeer("empty name".into()))
                } else {
                    Ok(())
                }
            }
            Self::InternalProtocolOpen { peer_info, .. } => peer_info.validate(),
            Self::InternalProtocolUpdate { peer_info, updates } => {
                peer_info.validate()?;
                for update in updates {
                    update.route.validate()?;
                }
                Ok(())
            }
            Self::InternalProtocolKeepalive { peer_info }
            | Self::InternalProtocolClose { peer_info, .. } => peer_info.validate(),
            Self::InternalProtocolTick => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_packet::Protocol;

    #[test]
    fn test_validate_rejects_bad_route() {
        let action = Action::LocalRouteCreate(DataChannel::new("-bad-", Protocol::Http));
        assert!(action.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_update_entry() {
        let action = Action::InternalProtocolUpdate {
            peer_info: PeerInfo::new("node-b", "wss://b:4222"),
            updates: vec![RouteUpdate::add(
                DataChannel::new("", Protocol::Http),
                vec!["node-b".into()],
            )],
        };
        assert!(action.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_tick() {
        assert!(Action::InternalProtocolTick.validate().is_ok());
    }
}
