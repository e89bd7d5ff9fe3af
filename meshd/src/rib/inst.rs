use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;

use mesh_packet::{
    CLOSE_HOLD_EXPIRED, ChannelKey, DataChannel, HOLD_TIME_DEFAULT, PeerInfo, RouteAction,
    RouteUpdate, negotiate_hold_time,
};

use super::action::Action;
use super::peer::{ConnectionStatus, PeerRecord};
use super::route::{Candidate, InternalKey, InternalRoute, RouteMetadata, sanitize_node_path};
use super::route::select_best_path;

/// Plan rejection reasons. The rendered strings are a closed, stable set
/// that callers and tests match on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("Peer not found")]
    PeerNotFound,
    #[error("Peer already exists")]
    PeerAlreadyExists,
    #[error("peerToken is required when creating a peer")]
    PeerTokenRequired,
    #[error("Route not found")]
    RouteNotFound,
    #[error("Route already exists")]
    RouteAlreadyExists,
    #[error("Invalid action")]
    InvalidAction,
}

/// What the dispatcher must send after a commit.
#[derive(Debug, Clone, PartialEq)]
pub enum Propagation {
    Open {
        peer: PeerInfo,
        local: PeerInfo,
    },
    Update {
        peer: PeerInfo,
        local: PeerInfo,
        updates: Vec<RouteUpdate>,
    },
    Keepalive {
        peer: PeerInfo,
        local: PeerInfo,
    },
    Close {
        peer: PeerInfo,
        local: PeerInfo,
        code: u16,
        reason: Option<String>,
    },
}

impl Propagation {
    pub fn peer_name(&self) -> &str {
        match self {
            Self::Open { peer, .. }
            | Self::Update { peer, .. }
            | Self::Keepalive { peer, .. }
            | Self::Close { peer, .. } => &peer.name,
        }
    }

    /// Update and keepalive deliveries stamp the peer's `last_sent`.
    fn stamps_last_sent(&self) -> bool {
        matches!(self, Self::Update { .. } | Self::Keepalive { .. })
    }
}

#[derive(Debug, Clone)]
enum Step {
    PutLocalRoute(DataChannel),
    DropLocalRoute(ChannelKey),
    PutPeer(PeerRecord),
    DropPeer(String),
    PutInternalRoute(InternalRoute),
    DropInternalRoute(InternalKey),
    DropPeerRoutes(String),
    SetPeerStatus(String, ConnectionStatus),
    TouchRecv(String),
}

impl Step {
    fn touches_routes(&self) -> bool {
        matches!(
            self,
            Step::PutLocalRoute(_)
                | Step::DropLocalRoute(_)
                | Step::PutInternalRoute(_)
                | Step::DropInternalRoute(_)
                | Step::DropPeerRoutes(_)
        )
    }
}

/// Validated mutation set produced by `plan`; opaque to callers, applied
/// atomically by `commit`.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    steps: Vec<Step>,
    propagations: Vec<Propagation>,
    followups: Vec<Action>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty() && self.propagations.is_empty() && self.followups.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct CommitOutcome {
    pub propagations: Vec<Propagation>,
    /// True when the local or learned route set changed, i.e. the proxy
    /// snapshot and gateway config need a rebuild.
    pub routes_changed: bool,
    /// Synthetic actions that re-enter the queue (hold-timer closes).
    pub followups: Vec<Action>,
}

/// Read-only view of the RIB, defensively copied. The canonical peer list
/// backs both the local and internal views.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RibState {
    pub local: LocalState,
    pub internal: InternalState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalState {
    pub peers: Vec<PeerRecord>,
    pub routes: Vec<DataChannel>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InternalState {
    pub peers: Vec<PeerRecord>,
    pub routes: Vec<InternalRoute>,
}

/// Routing Information Base: the single in-memory owner of peers, local
/// routes, learned routes and derived best-path metadata. `plan` never
/// mutates; `commit` applies a plan atomically and yields propagations.
#[derive(Debug)]
pub struct Rib {
    local: PeerInfo,
    peers: BTreeMap<String, PeerRecord>,
    local_routes: BTreeMap<ChannelKey, DataChannel>,
    internal_routes: BTreeMap<InternalKey, InternalRoute>,
    metadata: BTreeMap<String, RouteMetadata>,
    started: Instant,
}

impl Rib {
    pub fn new(local: PeerInfo) -> Self {
        Self {
            local,
            peers: BTreeMap::new(),
            local_routes: BTreeMap::new(),
            internal_routes: BTreeMap::new(),
            metadata: BTreeMap::new(),
            started: Instant::now(),
        }
    }

    pub fn local_name(&self) -> &str {
        &self.local.name
    }

    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Our identity as presented to one peer: the node's info carrying the
    /// token that peer expects.
    fn outbound_identity(&self, peer: &PeerRecord) -> PeerInfo {
        let mut local = self.local.clone();
        local.peer_token = peer.info.peer_token.clone();
        local
    }

    /// One add entry per local route, the full-table sync sent when a peer
    /// session is established.
    fn full_sync_updates(&self) -> Vec<RouteUpdate> {
        self.local_routes
            .values()
            .map(|channel| RouteUpdate::add(channel.clone(), vec![self.local.name.clone()]))
            .collect()
    }

    fn update_to_connected_peers(&self, entry: RouteUpdate) -> Vec<Propagation> {
        self.peers
            .values()
            .filter(|peer| peer.status.is_connected())
            .map(|peer| Propagation::Update {
                peer: peer.info.clone(),
                local: self.outbound_identity(peer),
                updates: vec![entry.clone()],
            })
            .collect()
    }

    pub fn plan(&self, action: &Action) -> Result<Plan, PlanError> {
        match action {
            Action::LocalRouteCreate(channel) => {
                if self.local_routes.contains_key(&channel.key()) {
                    return Err(PlanError::RouteAlreadyExists);
                }
                Ok(Plan {
                    steps: vec![Step::PutLocalRoute(channel.clone())],
                    propagations: self.update_to_connected_peers(RouteUpdate::add(
                        channel.clone(),
                        vec![self.local.name.clone()],
                    )),
                    followups: vec![],
                })
            }
            Action::LocalRouteUpdate(channel) => {
                if !self.local_routes.contains_key(&channel.key()) {
                    return Err(PlanError::RouteNotFound);
                }
                Ok(Plan {
                    steps: vec![Step::PutLocalRoute(channel.clone())],
                    propagations: self.update_to_connected_peers(RouteUpdate::add(
                        channel.clone(),
                        vec![self.local.name.clone()],
                    )),
                    followups: vec![],
                })
            }
            Action::LocalRouteDelete(key) => {
                let Some(channel) = self.local_routes.get(key) else {
                    return Err(PlanError::RouteNotFound);
                };
                Ok(Plan {
                    steps: vec![Step::DropLocalRoute(key.clone())],
                    propagations: self
                        .update_to_connected_peers(RouteUpdate::remove(channel.clone())),
                    followups: vec![],
                })
            }
            Action::LocalPeerCreate(info) => {
                if info.peer_token.is_none() {
                    return Err(PlanError::PeerTokenRequired);
                }
                if info.name == self.local.name {
                    return Err(PlanError::InvalidAction);
                }
                if self.peers.contains_key(&info.name) {
                    return Err(PlanError::PeerAlreadyExists);
                }
                if !self.local.domains.is_empty()
                    && !info.domains.is_empty()
                    && !info.shares_domain(&self.local.domains)
                {
                    return Err(PlanError::InvalidAction);
                }
                let record = PeerRecord::new(info.clone());
                let local = self.outbound_identity(&record);
                Ok(Plan {
                    steps: vec![Step::PutPeer(record)],
                    propagations: vec![Propagation::Open {
                        peer: info.clone(),
                        local,
                    }],
                    followups: vec![],
                })
            }
            Action::LocalPeerUpdate(info) => {
                let Some(existing) = self.peers.get(&info.name) else {
                    return Err(PlanError::PeerNotFound);
                };
                let mut updated = PeerRecord::new(info.clone());
                if updated.info.peer_token.is_none() {
                    updated.info.peer_token = existing.info.peer_token.clone();
                }
                let local = self.outbound_identity(&updated);
                Ok(Plan {
                    steps: vec![Step::PutPeer(updated.clone())],
                    propagations: vec![
                        Propagation::Close {
                            peer: existing.info.clone(),
                            local: self.outbound_identity(existing),
                            code: mesh_packet::CLOSE_NORMAL,
                            reason: Some("peer updated".to_string()),
                        },
                        Propagation::Open {
                            peer: updated.info.clone(),
                            local,
                        },
                    ],
                    followups: vec![],
                })
            }
            Action::LocalPeerDelete { name } => {
                let Some(existing) = self.peers.get(name) else {
                    return Err(PlanError::PeerNotFound);
                };
                Ok(Plan {
                    steps: vec![Step::DropPeerRoutes(name.clone()), Step::DropPeer(name.clone())],
                    propagations: vec![Propagation::Close {
                        peer: existing.info.clone(),
                        local: self.outbound_identity(existing),
                        code: mesh_packet::CLOSE_NORMAL,
                        reason: None,
                    }],
                    followups: vec![],
                })
            }
            Action::InternalProtocolOpen { peer_info, hold_time } => {
                if peer_info.name == self.local.name {
                    return Err(PlanError::InvalidAction);
                }
                if let Some(existing) = self.peers.get(&peer_info.name) {
                    if existing.status.is_connected() {
                        // Duplicate OPEN on a live session.
                        return Ok(Plan::default());
                    }
                }
                let mut record = match self.peers.get(&peer_info.name) {
                    Some(existing) => {
                        let mut record = existing.clone();
                        record.info.endpoint = peer_info.endpoint.clone();
                        record.info.domains = peer_info.domains.clone();
                        record
                    }
                    None => PeerRecord::new(peer_info.clone()),
                };
                record.status = ConnectionStatus::Connected;
                record.hold_time = Some(negotiate_hold_time(*hold_time));
                record.last_recv = Some(self.now_ms());
                let peer = record.info.clone();
                let local = self.outbound_identity(&record);
                Ok(Plan {
                    steps: vec![Step::PutPeer(record)],
                    propagations: vec![Propagation::Update {
                        peer,
                        local,
                        updates: self.full_sync_updates(),
                    }],
                    followups: vec![],
                })
            }
            Action::InternalProtocolUpdate { peer_info, updates } => {
                let Some(record) = self.peers.get(&peer_info.name) else {
                    return Err(PlanError::PeerNotFound);
                };
                let peer_ref = record.info.snapshot();
                let peer_name = record.info.name.clone();
                // Entries apply in array order against a simulated view so
                // that an add followed by a remove nets out within one
                // message.
                let mut present: BTreeSet<ChannelKey> = self
                    .internal_routes
                    .keys()
                    .filter(|(name, _)| *name == peer_name)
                    .map(|(_, key)| key.clone())
                    .collect();
                let mut steps = Vec::new();
                for entry in updates {
                    let key = entry.route.key();
                    match entry.action {
                        RouteAction::Add => {
                            let path = entry
                                .node_path
                                .clone()
                                .unwrap_or_else(|| vec![peer_name.clone()]);
                            let Some(node_path) = sanitize_node_path(path, &self.local.name)
                            else {
                                // Looped advertisement; drop the entry.
                                continue;
                            };
                            steps.push(Step::PutInternalRoute(InternalRoute {
                                channel: entry.route.clone(),
                                peer: peer_ref.clone(),
                                peer_name: peer_name.clone(),
                                node_path,
                            }));
                            present.insert(key);
                        }
                        RouteAction::Remove => {
                            if present.remove(&key) {
                                steps.push(Step::DropInternalRoute((peer_name.clone(), key)));
                            }
                        }
                    }
                }
                Ok(Plan {
                    steps,
                    propagations: vec![],
                    followups: vec![],
                })
            }
            Action::InternalProtocolKeepalive { peer_info } => {
                if !self.peers.contains_key(&peer_info.name) {
                    return Err(PlanError::PeerNotFound);
                }
                Ok(Plan {
                    steps: vec![Step::TouchRecv(peer_info.name.clone())],
                    propagations: vec![],
                    followups: vec![],
                })
            }
            Action::InternalProtocolClose { peer_info, .. } => {
                if !self.peers.contains_key(&peer_info.name) {
                    // Unknown peer; nothing to tear down.
                    return Ok(Plan::default());
                }
                Ok(Plan {
                    steps: vec![
                        Step::DropPeerRoutes(peer_info.name.clone()),
                        Step::DropPeer(peer_info.name.clone()),
                    ],
                    propagations: vec![],
                    followups: vec![],
                })
            }
            Action::InternalProtocolTick => {
                let now = self.now_ms();
                let mut plan = Plan::default();
                for record in self.peers.values() {
                    if !record.status.is_connected() {
                        continue;
                    }
                    let hold = record.hold_time.unwrap_or(HOLD_TIME_DEFAULT);
                    let silent_ms = now.saturating_sub(record.last_recv.unwrap_or(now));
                    if silent_ms > hold * 1000 {
                        plan.steps.push(Step::SetPeerStatus(
                            record.info.name.clone(),
                            ConnectionStatus::Disconnected,
                        ));
                        plan.followups.push(Action::InternalProtocolClose {
                            peer_info: record.info.clone(),
                            code: CLOSE_HOLD_EXPIRED,
                            reason: Some("hold timer expired".to_string()),
                        });
                        continue;
                    }
                    let due = record
                        .last_sent
                        .map_or(true, |sent| now.saturating_sub(sent) >= hold * 1000 / 3);
                    if due {
                        plan.propagations.push(Propagation::Keepalive {
                            peer: record.info.clone(),
                            local: self.outbound_identity(record),
                        });
                    }
                }
                Ok(plan)
            }
        }
    }

    pub fn commit(&mut self, plan: Plan) -> CommitOutcome {
        let now = self.now_ms();
        let routes_changed = plan.steps.iter().any(Step::touches_routes);
        let mut touched: BTreeSet<String> = BTreeSet::new();

        for step in plan.steps {
            match step {
                Step::PutLocalRoute(channel) => {
                    touched.insert(channel.name.clone());
                    self.local_routes.insert(channel.key(), channel);
                }
                Step::DropLocalRoute(key) => {
                    touched.insert(key.name.clone());
                    self.local_routes.remove(&key);
                }
                Step::PutPeer(record) => {
                    self.peers.insert(record.info.name.clone(), record);
                }
                Step::DropPeer(name) => {
                    self.peers.remove(&name);
                }
                Step::PutInternalRoute(route) => {
                    touched.insert(route.channel.name.clone());
                    self.internal_routes.insert(route.key(), route);
                }
                Step::DropInternalRoute(key) => {
                    touched.insert(key.1.name.clone());
                    self.internal_routes.remove(&key);
                }
                Step::DropPeerRoutes(name) => {
                    let keys: Vec<InternalKey> = self
                        .internal_routes
                        .keys()
                        .filter(|(peer, _)| *peer == name)
                        .cloned()
                        .collect();
                    for key in keys {
                        touched.insert(key.1.name.clone());
                        self.internal_routes.remove(&key);
                    }
                }
                Step::SetPeerStatus(name, status) => {
                    if let Some(record) = self.peers.get_mut(&name) {
                        record.status = status;
                    }
                }
                Step::TouchRecv(name) => {
                    if let Some(record) = self.peers.get_mut(&name) {
                        record.last_recv = Some(now);
                    }
                }
            }
        }

        for name in touched {
            self.recompute_metadata(&name);
        }

        for propagation in &plan.propagations {
            if propagation.stamps_last_sent() {
                if let Some(record) = self.peers.get_mut(propagation.peer_name()) {
                    record.last_sent = Some(now);
                }
            }
        }

        CommitOutcome {
            propagations: plan.propagations,
            routes_changed,
            followups: plan.followups,
        }
    }

    fn recompute_metadata(&mut self, name: &str) {
        let mut candidates: Vec<Candidate> = self
            .local_routes
            .values()
            .filter(|channel| channel.name == name)
            .map(|channel| Candidate {
                is_local: true,
                peer_name: self.local.name.clone(),
                node_path: vec![],
                protocol: channel.protocol,
            })
            .collect();
        candidates.extend(
            self.internal_routes
                .values()
                .filter(|route| route.channel.name == name)
                .map(|route| Candidate {
                    is_local: false,
                    peer_name: route.peer_name.clone(),
                    node_path: route.node_path.clone(),
                    protocol: route.channel.protocol,
                }),
        );
        match select_best_path(candidates) {
            Some(metadata) => {
                self.metadata.insert(name.to_string(), metadata);
            }
            None => {
                self.metadata.remove(name);
            }
        }
    }

    pub fn state(&self) -> RibState {
        let peers: Vec<PeerRecord> = self.peers.values().cloned().collect();
        RibState {
            local: LocalState {
                peers: peers.clone(),
                routes: self.local_routes.values().cloned().collect(),
            },
            internal: InternalState {
                peers,
                routes: self.internal_routes.values().cloned().collect(),
            },
        }
    }

    pub fn route_metadata(&self) -> BTreeMap<String, RouteMetadata> {
        self.metadata.clone()
    }

    pub fn peer(&self, name: &str) -> Option<&PeerRecord> {
        self.peers.get(name)
    }

    pub fn local_routes(&self) -> impl Iterator<Item = &DataChannel> {
        self.local_routes.values()
    }

    pub fn internal_routes(&self) -> impl Iterator<Item = &InternalRoute> {
        self.internal_routes.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_packet::Protocol;

    const NODE_A: &str = "node-a.somebiz.local.io";
    const NODE_B: &str = "node-b.somebiz.local.io";
    const NODE_C: &str = "node-c.somebiz.local.io";
    const NODE_D: &str = "node-d.somebiz.local.io";

    fn rib() -> Rib {
        Rib::new(PeerInfo::new(NODE_A, "wss://node-a:4222").with_domain("somebiz.local.io"))
    }

    fn peer_info(name: &str) -> PeerInfo {
        PeerInfo::new(name, &format!("wss://{}:4222", name.split('.').next().unwrap()))
            .with_domain("somebiz.local.io")
            .with_token("s3cr3t")
    }

    fn apply(rib: &mut Rib, action: Action) -> CommitOutcome {
        let plan = rib.plan(&action).expect("plan must succeed");
        rib.commit(plan)
    }

    fn connect_peer(rib: &mut Rib, name: &str) {
        apply(rib, Action::LocalPeerCreate(peer_info(name)));
        apply(
            rib,
            Action::InternalProtocolOpen {
                peer_info: peer_info(name),
                hold_time: Some(90),
            },
        );
    }

    fn advertise(rib: &mut Rib, peer: &str, channel: DataChannel, path: &[&str]) {
        apply(
            rib,
            Action::InternalProtocolUpdate {
                peer_info: peer_info(peer),
                updates: vec![RouteUpdate::add(
                    channel,
                    path.iter().map(|s| s.to_string()).collect(),
                )],
            },
        );
    }

    fn channel(name: &str) -> DataChannel {
        DataChannel::new(name, Protocol::Http).with_endpoint(&format!("http://{name}:8080"))
    }

    #[test]
    fn test_local_route_duplicate_rejected() {
        let mut rib = rib();
        apply(&mut rib, Action::LocalRouteCreate(channel("svc-x")));
        let err = rib
            .plan(&Action::LocalRouteCreate(channel("svc-x")))
            .unwrap_err();
        assert_eq!(err, PlanError::RouteAlreadyExists);
        assert_eq!(err.to_string(), "Route already exists");
    }

    #[test]
    fn test_local_route_update_requires_existing() {
        let rib = rib();
        let err = rib
            .plan(&Action::LocalRouteUpdate(channel("svc-x")))
            .unwrap_err();
        assert_eq!(err.to_string(), "Route not found");
    }

    #[test]
    fn test_peer_create_requires_token() {
        let rib = rib();
        let mut info = peer_info(NODE_B);
        info.peer_token = None;
        let err = rib.plan(&Action::LocalPeerCreate(info)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "peerToken is required when creating a peer"
        );
    }

    #[test]
    fn test_peer_create_emits_open_only() {
        let mut rib = rib();
        let outcome = apply(&mut rib, Action::LocalPeerCreate(peer_info(NODE_B)));
        assert_eq!(outcome.propagations.len(), 1);
        assert!(matches!(outcome.propagations[0], Propagation::Open { .. }));
        // Open propagations never stamp last_sent.
        assert!(rib.peer(NODE_B).unwrap().last_sent.is_none());
        assert_eq!(
            rib.peer(NODE_B).unwrap().status,
            ConnectionStatus::Initializing
        );
    }

    #[test]
    fn test_peer_create_duplicate_rejected() {
        let mut rib = rib();
        apply(&mut rib, Action::LocalPeerCreate(peer_info(NODE_B)));
        let err = rib
            .plan(&Action::LocalPeerCreate(peer_info(NODE_B)))
            .unwrap_err();
        assert_eq!(err.to_string(), "Peer already exists");
    }

    #[test]
    fn test_open_marks_connected_and_full_syncs() {
        let mut rib = rib();
        apply(&mut rib, Action::LocalRouteCreate(channel("svc-x")));
        apply(&mut rib, Action::LocalPeerCreate(peer_info(NODE_B)));
        let outcome = apply(
            &mut rib,
            Action::InternalProtocolOpen {
                peer_info: peer_info(NODE_B),
                hold_time: Some(45),
            },
        );
        assert_eq!(outcome.propagations.len(), 1);
        match &outcome.propagations[0] {
            Propagation::Update { peer, updates, .. } => {
                assert_eq!(peer.name, NODE_B);
                assert_eq!(updates.len(), 1);
                assert_eq!(updates[0].node_path.as_deref(), Some(&[NODE_A.to_string()][..]));
            }
            other => panic!("expected update, got {other:?}"),
        }
        let record = rib.peer(NODE_B).unwrap();
        assert!(record.status.is_connected());
        assert_eq!(record.hold_time, Some(45));
        // The full sync stamped last_sent.
        assert!(record.last_sent.is_some());
    }

    #[test]
    fn test_open_idempotent_when_connected() {
        let mut rib = rib();
        connect_peer(&mut rib, NODE_B);
        let before = rib.state();
        let outcome = apply(
            &mut rib,
            Action::InternalProtocolOpen {
                peer_info: peer_info(NODE_B),
                hold_time: Some(90),
            },
        );
        assert!(outcome.propagations.is_empty());
        assert_eq!(rib.state(), before);
    }

    #[test]
    fn test_local_route_fans_out_to_connected_peers_only() {
        let mut rib = rib();
        connect_peer(&mut rib, NODE_B);
        apply(&mut rib, Action::LocalPeerCreate(peer_info(NODE_C)));
        let outcome = apply(&mut rib, Action::LocalRouteCreate(channel("svc-x")));
        // NODE_C is still initializing.
        assert_eq!(outcome.propagations.len(), 1);
        assert_eq!(outcome.propagations[0].peer_name(), NODE_B);
        assert!(outcome.routes_changed);
    }

    #[test]
    fn test_peer_update_resets_session() {
        let mut rib = rib();
        connect_peer(&mut rib, NODE_B);
        assert!(rib.peer(NODE_B).unwrap().last_sent.is_some());
        let mut info = peer_info(NODE_B);
        info.endpoint = "wss://node-b-alt:4222".to_string();
        info.peer_token = None;
        let outcome = apply(&mut rib, Action::LocalPeerUpdate(info));
        assert_eq!(outcome.propagations.len(), 2);
        assert!(matches!(outcome.propagations[0], Propagation::Close { .. }));
        assert!(matches!(outcome.propagations[1], Propagation::Open { .. }));
        let record = rib.peer(NODE_B).unwrap();
        assert_eq!(record.status, ConnectionStatus::Initializing);
        assert!(record.last_sent.is_none());
        assert_eq!(record.info.endpoint, "wss://node-b-alt:4222");
        // Token survives an update that does not carry one.
        assert_eq!(record.info.peer_token.as_deref(), Some("s3cr3t"));
    }

    #[test]
    fn test_insertion_order_independence_three_way() {
        // svc-x from B, C, D with path lengths 1, 2, 3 in all six orders.
        let adverts: [(&str, Vec<&str>); 3] = [
            (NODE_B, vec![NODE_B]),
            (NODE_C, vec![NODE_C, "h2"]),
            (NODE_D, vec![NODE_D, "h2", "h3"]),
        ];
        let orders: [[usize; 3]; 6] = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        for order in orders {
            let mut rib = rib();
            connect_peer(&mut rib, NODE_B);
            connect_peer(&mut rib, NODE_C);
            connect_peer(&mut rib, NODE_D);
            for idx in order {
                let (peer, path) = &adverts[idx];
                advertise(&mut rib, peer, channel("svc-x"), path);
            }
            let metadata = rib.route_metadata();
            let meta = metadata.get("svc-x").expect("metadata for svc-x");
            assert_eq!(meta.best_path.peer_name, NODE_B);
            assert_eq!(meta.alternatives.len(), 2);
        }
    }

    #[test]
    fn test_n_way_tie_breaks_lexicographically() {
        let mut rib = rib();
        for name in [NODE_D, NODE_C, NODE_B] {
            connect_peer(&mut rib, name);
            advertise(&mut rib, name, channel("svc-x"), &[name]);
        }
        assert_eq!(rib.state().internal.routes.len(), 3);
        let metadata = rib.route_metadata();
        let meta = metadata.get("svc-x").unwrap();
        assert_eq!(meta.best_path.peer_name, NODE_B);
        assert_eq!(meta.alternatives.len(), 2);
    }

    #[test]
    fn test_implicit_withdrawal_upsert() {
        let mut rib = rib();
        connect_peer(&mut rib, NODE_B);
        advertise(
            &mut rib,
            NODE_B,
            DataChannel::new("svc-x", Protocol::Http).with_endpoint("http://old:8080"),
            &[NODE_B],
        );
        advertise(
            &mut rib,
            NODE_B,
            DataChannel::new("svc-x", Protocol::Http).with_endpoint("http://new:9090"),
            &[NODE_B],
        );
        let routes = rib.state().internal.routes;
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].channel.endpoint.as_deref(), Some("http://new:9090"));
    }

    #[test]
    fn test_remove_unknown_route_is_noop() {
        let mut rib = rib();
        connect_peer(&mut rib, NODE_B);
        let before = rib.state();
        let plan = rib
            .plan(&Action::InternalProtocolUpdate {
                peer_info: peer_info(NODE_B),
                updates: vec![RouteUpdate::remove(channel("svc-ghost"))],
            })
            .unwrap();
        let outcome = rib.commit(plan);
        assert!(outcome.propagations.is_empty());
        assert_eq!(rib.state(), before);
        assert!(rib.route_metadata().is_empty());
    }

    #[test]
    fn test_add_then_remove_in_one_update_nets_out() {
        let mut rib = rib();
        connect_peer(&mut rib, NODE_B);
        apply(
            &mut rib,
            Action::InternalProtocolUpdate {
                peer_info: peer_info(NODE_B),
                updates: vec![
                    RouteUpdate::add(channel("svc-x"), vec![NODE_B.into()]),
                    RouteUpdate::remove(channel("svc-x")),
                ],
            },
        );
        assert!(rib.state().internal.routes.is_empty());
        assert!(rib.route_metadata().is_empty());
    }

    #[test]
    fn test_looped_advertisement_dropped() {
        let mut rib = rib();
        connect_peer(&mut rib, NODE_B);
        advertise(&mut rib, NODE_B, channel("svc-x"), &[NODE_B, NODE_A]);
        assert!(rib.state().internal.routes.is_empty());
    }

    #[test]
    fn test_close_cleans_up_all_learned_state() {
        let mut rib = rib();
        for (name, svc) in [(NODE_B, "svc-b"), (NODE_C, "svc-c"), (NODE_D, "svc-d")] {
            connect_peer(&mut rib, name);
            advertise(&mut rib, name, channel(svc), &[name]);
        }
        assert_eq!(rib.route_metadata().len(), 3);
        for name in [NODE_B, NODE_C, NODE_D] {
            apply(
                &mut rib,
                Action::InternalProtocolClose {
                    peer_info: peer_info(name),
                    code: mesh_packet::CLOSE_NORMAL,
                    reason: None,
                },
            );
        }
        let state = rib.state();
        assert!(state.internal.routes.is_empty());
        assert!(state.internal.peers.is_empty());
        assert!(rib.route_metadata().is_empty());
    }

    #[test]
    fn test_close_unknown_peer_is_noop() {
        let mut rib = rib();
        let before = rib.state();
        let outcome = apply(
            &mut rib,
            Action::InternalProtocolClose {
                peer_info: peer_info(NODE_B),
                code: mesh_packet::CLOSE_NORMAL,
                reason: None,
            },
        );
        assert!(outcome.propagations.is_empty());
        assert_eq!(rib.state(), before);
    }

    #[test]
    fn test_close_keeps_other_advertisers() {
        let mut rib = rib();
        connect_peer(&mut rib, NODE_B);
        connect_peer(&mut rib, NODE_C);
        advertise(&mut rib, NODE_B, channel("svc-x"), &[NODE_B]);
        advertise(&mut rib, NODE_C, channel("svc-x"), &[NODE_C, "h2"]);
        apply(
            &mut rib,
            Action::InternalProtocolClose {
                peer_info: peer_info(NODE_B),
                code: mesh_packet::CLOSE_NORMAL,
                reason: None,
            },
        );
        let routes = rib.state().internal.routes;
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].peer_name, NODE_C);
        let metadata = rib.route_metadata();
        assert_eq!(metadata.get("svc-x").unwrap().best_path.peer_name, NODE_C);
    }

    #[test]
    fn test_churn_returns_to_initial_state() {
        let mut rib = rib();
        let empty = rib.state();
        for i in 0..100 {
            apply(&mut rib, Action::LocalPeerCreate(peer_info(NODE_B)));
            apply(
                &mut rib,
                Action::InternalProtocolOpen {
                    peer_info: peer_info(NODE_B),
                    hold_time: Some(90),
                },
            );
            advertise(&mut rib, NODE_B, channel(&format!("svc-{i}")), &[NODE_B]);
            apply(
                &mut rib,
                Action::InternalProtocolClose {
                    peer_info: peer_info(NODE_B),
                    code: mesh_packet::CLOSE_NORMAL,
                    reason: None,
                },
            );
        }
        assert_eq!(rib.state(), empty);
        assert!(rib.route_metadata().is_empty());
    }

    #[test]
    fn test_full_sync_carries_every_local_route() {
        let mut rib = rib();
        for i in 0..100 {
            apply(&mut rib, Action::LocalRouteCreate(channel(&format!("svc-{i}"))));
        }
        apply(&mut rib, Action::LocalPeerCreate(peer_info(NODE_B)));
        let outcome = apply(
            &mut rib,
            Action::InternalProtocolOpen {
                peer_info: peer_info(NODE_B),
                hold_time: Some(90),
            },
        );
        assert_eq!(outcome.propagations.len(), 1);
        match &outcome.propagations[0] {
            Propagation::Update { peer, updates, .. } => {
                assert_eq!(peer.name, NODE_B);
                assert_eq!(updates.len(), 100);
                assert!(updates.iter().all(|u| u.action == RouteAction::Add));
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn test_keepalive_touches_recv_only() {
        let mut rib = rib();
        connect_peer(&mut rib, NODE_B);
        let sent_before = rib.peer(NODE_B).unwrap().last_sent;
        apply(
            &mut rib,
            Action::InternalProtocolKeepalive {
                peer_info: peer_info(NODE_B),
            },
        );
        let record = rib.peer(NODE_B).unwrap();
        assert_eq!(record.last_sent, sent_before);
        assert!(record.last_recv.is_some());
    }

    #[test]
    fn test_tick_emits_keepalive_when_due() {
        let mut rib = rib();
        connect_peer(&mut rib, NODE_B);
        // Rewind the clock base two seconds so now is ~2000 ms, then shape
        // the record: hold 3 s, last send at t=0 (keepalive due after
        // 1000 ms), last receive recent enough to stay alive.
        rib.started -= std::time::Duration::from_secs(2);
        {
            let record = rib.peers.get_mut(NODE_B).unwrap();
            record.hold_time = Some(3);
            record.last_sent = Some(0);
            record.last_recv = Some(1950);
        }
        let outcome = apply(&mut rib, Action::InternalProtocolTick);
        assert!(outcome.followups.is_empty());
        assert_eq!(outcome.propagations.len(), 1);
        assert!(matches!(outcome.propagations[0], Propagation::Keepalive { .. }));
        // Keepalive propagation stamps last_sent.
        assert_ne!(rib.peer(NODE_B).unwrap().last_sent, Some(0));
    }

    #[test]
    fn test_tick_expires_silent_peer() {
        let mut rib = rib();
        connect_peer(&mut rib, NODE_B);
        // Rewind the clock base ten seconds: with hold 3 s and the last
        // receive at t=0, the peer has been silent past its hold timer.
        rib.started -= std::time::Duration::from_secs(10);
        {
            let record = rib.peers.get_mut(NODE_B).unwrap();
            record.hold_time = Some(3);
            record.last_recv = Some(0);
        }
        let outcome = apply(&mut rib, Action::InternalProtocolTick);
        assert_eq!(outcome.followups.len(), 1);
        match &outcome.followups[0] {
            Action::InternalProtocolClose { peer_info, code, .. } => {
                assert_eq!(peer_info.name, NODE_B);
                assert_eq!(*code, CLOSE_HOLD_EXPIRED);
            }
            other => panic!("expected close followup, got {other:?}"),
        }
        // The record is parked as disconnected until the close commits.
        assert_eq!(
            rib.peer(NODE_B).unwrap().status,
            ConnectionStatus::Disconnected
        );
        // Processing the followup removes the peer.
        let close = outcome.followups[0].clone();
        apply(&mut rib, close);
        assert!(rib.peer(NODE_B).is_none());
    }

    #[test]
    fn test_metadata_prefers_local_route() {
        let mut rib = rib();
        connect_peer(&mut rib, NODE_B);
        advertise(&mut rib, NODE_B, channel("svc-x"), &[NODE_B]);
        apply(&mut rib, Action::LocalRouteCreate(channel("svc-x")));
        let metadata = rib.route_metadata();
        let meta = metadata.get("svc-x").unwrap();
        assert_eq!(meta.best_path.peer_name, NODE_A);
        assert!(meta.best_path.node_path.is_empty());
        assert_eq!(meta.alternatives.len(), 1);
    }

    #[test]
    fn test_update_from_unknown_peer_rejected() {
        let rib = rib();
        let err = rib
            .plan(&Action::InternalProtocolUpdate {
                peer_info: peer_info(NODE_B),
                updates: vec![],
            })
            .unwrap_err();
        assert_eq!(err.to_string(), "Peer not found");
    }

    #[test]
    fn test_internal_route_peer_is_value_snapshot() {
        let mut rib = rib();
        connect_peer(&mut rib, NODE_B);
        advertise(&mut rib, NODE_B, channel("svc-x"), &[NODE_B]);
        // Mutating the peer record afterwards must not show through the
        // stored route.
        let mut info = peer_info(NODE_B);
        info.endpoint = "wss://node-b-alt:4222".to_string();
        apply(&mut rib, Action::LocalPeerUpdate(info));
        let routes = rib.state().internal.routes;
        assert_eq!(routes[0].peer.endpoint, "wss://node-b:4222");
    }
}
