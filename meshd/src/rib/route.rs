use serde::Serialize;

use mesh_packet::{ChannelKey, DataChannel, PeerRef, Protocol};

/// Identity of a learned route: advertising peer plus channel identity.
pub type InternalKey = (String, ChannelKey);

/// A data channel learned from a peer. The peer reference is a value
/// snapshot taken at insert time, not a live handle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InternalRoute {
    #[serde(flatten)]
    pub channel: DataChannel,
    pub peer: PeerRef,
    #[serde(rename = "peerName")]
    pub peer_name: String,
    #[serde(rename = "nodePath")]
    pub node_path: Vec<String>,
}

impl InternalRoute {
    pub fn key(&self) -> InternalKey {
        (self.peer_name.clone(), self.channel.key())
    }
}

/// Where the best path for a route name points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathRef {
    #[serde(rename = "peerName")]
    pub peer_name: String,
    #[serde(rename = "nodePath")]
    pub node_path: Vec<String>,
}

/// Derived per-name selection result; recomputed on every commit that
/// touches the name, never stored across unrelated commits.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteMetadata {
    #[serde(rename = "bestPath")]
    pub best_path: PathRef,
    pub alternatives: Vec<PathRef>,
}

/// One candidate for best-path selection over a route name.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub is_local: bool,
    pub peer_name: String,
    pub node_path: Vec<String>,
    pub protocol: Protocol,
}

impl Candidate {
    /// Total ordering key: local beats internal, then shorter node path,
    /// then ascending peer name. The protocol component keeps the order
    /// total when one advertiser carries a name under two protocols.
    fn rank(&self) -> (u8, usize, &str, Protocol) {
        (
            if self.is_local { 0 } else { 1 },
            self.node_path.len(),
            self.peer_name.as_str(),
            self.protocol,
        )
    }

    fn path_ref(&self) -> PathRef {
        PathRef {
            peer_name: self.peer_name.clone(),
            node_path: self.node_path.clone(),
        }
    }
}

/// Select the best path among `candidates`. The result is a function of
/// the candidate multiset alone, independent of insertion order.
pub fn select_best_path(mut candidates: Vec<Candidate>) -> Option<RouteMetadata> {
    if candidates.is_empty() {
        return None;
    }
    candidates.sort_by(|a, b| a.rank().cmp(&b.rank()));
    let best = candidates.remove(0);
    Some(RouteMetadata {
        best_path: best.path_ref(),
        alternatives: candidates.iter().map(Candidate::path_ref).collect(),
    })
}

/// Node paths keep one entry per node. An empty result or a path through
/// `local_name` means the advertisement looped back and must be dropped.
pub fn sanitize_node_path(path: Vec<String>, local_name: &str) -> Option<Vec<String>> {
    let mut seen = Vec::with_capacity(path.len());
    for hop in path {
        if hop == local_name {
            return None;
        }
        if !seen.contains(&hop) {
            seen.push(hop);
        }
    }
    if seen.is_empty() { None } else { Some(seen) }
}
