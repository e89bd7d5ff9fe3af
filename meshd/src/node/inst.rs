use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use mesh_packet::{
    CLOSE_HOLD_EXPIRED, CLOSE_NORMAL, KeepalivePacket, METHOD_KEEPALIVE, METHOD_UPDATE, PeerInfo,
    UpdatePacket,
};

use crate::config::Config;
use crate::context::Timer;
use crate::ports::{PortAllocator, egress_key, local_key};
use crate::rib::inst::RibState;
use crate::rib::{Action, CommitOutcome, InternalRoute, PlanError, Propagation, Rib, RouteMetadata};
use crate::snapshot::{SnapshotCache, SnapshotInput, build_snapshot};
use crate::{ibgp_debug, ibgp_info, ibgp_warn};

use super::gateway::{GatewayClient, GatewayService};
use super::peer::{Event, Peer, fsm};
use super::timer::start_tick_timer;

#[derive(Debug, Clone, Error)]
pub enum NodeError {
    #[error("{0}")]
    Plan(#[from] PlanError),
    #[error("{0}")]
    Validation(String),
    #[error("node is shutting down")]
    Shutdown,
}

/// Everything that reaches the node's single consumer: actions (with an
/// optional completion channel), peer FSM events, read queries, shutdown.
pub enum Message {
    Action {
        action: Action,
        resp: Option<oneshot::Sender<Result<(), NodeError>>>,
    },
    Event {
        peer: String,
        event: Event,
    },
    Query {
        query: Query,
        resp: oneshot::Sender<QueryReply>,
    },
    Shutdown,
}

#[derive(Debug)]
pub enum Query {
    State,
    Metadata,
    PeerKnown(String),
}

#[derive(Debug)]
pub enum QueryReply {
    State(RibState),
    Metadata(BTreeMap<String, RouteMetadata>),
    PeerKnown(bool),
}

/// The node instance: sole owner of the RIB, the port allocator and the
/// snapshot cache. All mutation flows through its bounded queue and is
/// applied by one consumer, so state transitions are serialized and
/// propagation order matches action arrival order.
pub struct Node {
    local: PeerInfo,
    bind_address: String,
    rib: Rib,
    ports: PortAllocator,
    cache: Arc<SnapshotCache>,
    gateway: GatewayClient,
    peers: BTreeMap<String, Peer>,
    pub tx: mpsc::Sender<Message>,
    rx: mpsc::Receiver<Message>,
    version: u64,
    tick: Option<Timer>,
}

impl Node {
    pub fn new(config: &Config) -> Self {
        let (tx, rx) = mpsc::channel(8192);
        let local = config.local_info();
        Self {
            rib: Rib::new(local.clone()),
            local,
            bind_address: config.orchestrator.envoy_config.bind_address.clone(),
            ports: PortAllocator::new(config.orchestrator.envoy_config.port_range.clone()),
            cache: Arc::new(SnapshotCache::new()),
            gateway: GatewayClient::new(
                config
                    .orchestrator
                    .gql_gateway_config
                    .as_ref()
                    .map(|g| g.endpoint.clone()),
            ),
            peers: BTreeMap::new(),
            tx,
            rx,
            version: 0,
            tick: None,
        }
    }

    pub fn handle(&self) -> NodeHandle {
        NodeHandle { tx: self.tx.clone() }
    }

    pub fn snapshots(&self) -> Arc<SnapshotCache> {
        self.cache.clone()
    }

    pub async fn event_loop(&mut self) {
        self.tick = Some(start_tick_timer(self.tx.clone()));
        ibgp_info!("node {} event loop started", self.local.name);
        while let Some(msg) = self.rx.recv().await {
            match msg {
                Message::Action { action, resp } => {
                    let result = self.process_action(action).await;
                    if let Err(e) = &result {
                        ibgp_debug!("action rejected: {}", e);
                    }
                    if let Some(resp) = resp {
                        let _ = resp.send(result);
                    }
                }
                Message::Event { peer, event } => {
                    self.process_event(peer, event).await;
                }
                Message::Query { query, resp } => {
                    let _ = resp.send(self.process_query(query));
                }
                Message::Shutdown => {
                    ibgp_info!(
                        "shutting down, closing {} peer sessions",
                        self.peers.len()
                    );
                    let names: Vec<String> = self.peers.keys().cloned().collect();
                    for name in names {
                        if let Some(mut peer) = self.peers.remove(&name) {
                            peer.close_session(CLOSE_NORMAL, Some("shutting down".to_string()));
                        }
                    }
                    self.tick = None;
                    break;
                }
            }
        }
    }

    async fn process_action(&mut self, action: Action) -> Result<(), NodeError> {
        action
            .validate()
            .map_err(|e| NodeError::Validation(e.to_string()))?;
        // A route that cannot get a listener port must fail before commit.
        if let Action::LocalRouteCreate(channel) = &action {
            let key = local_key(&channel.name);
            if !self.ports.is_allocated(&key) && self.ports.available_count() == 0 {
                return Err(NodeError::Validation("port ranges exhausted".to_string()));
            }
        }
        let plan = self.rib.plan(&action)?;
        let outcome = self.rib.commit(plan);
        self.dispatch(outcome).await;
        Ok(())
    }

    async fn process_event(&mut self, name: String, event: Event) {
        let Some(peer) = self.peers.get_mut(&name) else {
            ibgp_debug!("event for unknown peer {}", name);
            return;
        };
        let was_established = peer.state.is_established();
        fsm(peer, event);
        if !was_established && peer.state.is_established() {
            self.flush_mailbox(&name).await;
        }
    }

    fn process_query(&self, query: Query) -> QueryReply {
        match query {
            Query::State => QueryReply::State(self.rib.state()),
            Query::Metadata => QueryReply::Metadata(self.rib.route_metadata()),
            Query::PeerKnown(name) => QueryReply::PeerKnown(self.peers.contains_key(&name)),
        }
    }

    async fn dispatch(&mut self, outcome: CommitOutcome) {
        for propagation in outcome.propagations {
            match propagation {
                Propagation::Open { peer, local } => {
                    let name = peer.name.clone();
                    let mut session = Peer::new(peer, local, self.tx.clone());
                    fsm(&mut session, Event::Start);
                    // Replacing an existing instance drops its tasks and
                    // pending mailbox before the new dial begins.
                    self.peers.insert(name, session);
                }
                Propagation::Close { peer, code, reason, .. } => {
                    if let Some(mut session) = self.peers.remove(&peer.name) {
                        session.close_session(code, reason);
                    }
                }
                Propagation::Update { peer, local, updates } => {
                    let packet = UpdatePacket::new(local, updates);
                    match serde_json::to_value(&packet) {
                        Ok(params) => {
                            self.send_to_peer(&peer.name, METHOD_UPDATE, params, true).await;
                        }
                        Err(e) => ibgp_warn!("update for {} not serializable: {}", peer.name, e),
                    }
                }
                Propagation::Keepalive { peer, local } => {
                    let packet = KeepalivePacket::new(local);
                    match serde_json::to_value(&packet) {
                        Ok(params) => {
                            // Keepalives are liveness signals; never queued.
                            self.send_to_peer(&peer.name, METHOD_KEEPALIVE, params, false)
                                .await;
                        }
                        Err(e) => {
                            ibgp_warn!("keepalive for {} not serializable: {}", peer.name, e)
                        }
                    }
                }
            }
        }

        for action in outcome.followups {
            if let Action::InternalProtocolClose { peer_info, code, .. } = &action {
                if *code == CLOSE_HOLD_EXPIRED {
                    if let Some(peer) = self.peers.get_mut(&peer_info.name) {
                        ibgp_warn!("peer {} hold timer expired", peer_info.name);
                        fsm(peer, Event::HoldExpired);
                    }
                }
            }
            if self
                .tx
                .try_send(Message::Action { action, resp: None })
                .is_err()
            {
                ibgp_warn!("queue full, dropping synthetic action");
            }
        }

        if outcome.routes_changed {
            self.rebuild_snapshot();
            self.push_gateway();
        }
    }

    /// Deliver one call to a peer session. With `queue` set, calls issued
    /// while the session is still coming up park in the peer's mailbox and
    /// flush in order once it establishes.
    async fn send_to_peer(&mut self, name: &str, method: &str, params: Value, queue: bool) {
        let Some(peer) = self.peers.get_mut(name) else {
            ibgp_debug!("no session for {}, dropping {}", name, method);
            return;
        };
        if !peer.state.is_established() {
            if queue {
                peer.mailbox.push((method.to_string(), params));
            }
            return;
        }
        let Some(session) = peer.session.clone() else {
            return;
        };
        if let Err(e) = session.call(method, params).await {
            ibgp_warn!("send {} to {} failed: {}", method, name, e);
            if let Some(peer) = self.peers.get_mut(name) {
                fsm(peer, Event::TransportError);
            }
        }
    }

    async fn flush_mailbox(&mut self, name: &str) {
        let queued = match self.peers.get_mut(name) {
            Some(peer) => std::mem::take(&mut peer.mailbox),
            None => return,
        };
        for (method, params) in queued {
            self.send_to_peer(name, &method, params, true).await;
        }
    }

    /// Reconcile port assignments with the committed route set and publish
    /// a fresh snapshot when its content actually changed.
    fn rebuild_snapshot(&mut self) {
        let mut desired: BTreeSet<String> = BTreeSet::new();
        for channel in self.rib.local_routes() {
            desired.insert(local_key(&channel.name));
        }
        for route in self.rib.internal_routes() {
            if route.channel.envoy_port.is_some() {
                desired.insert(egress_key(&route.channel.name, &route.peer_name));
            }
        }

        let stale: Vec<String> = self
            .ports
            .held_keys()
            .filter(|key| !desired.contains(*key))
            .cloned()
            .collect();
        for key in stale {
            self.ports.release(&key);
        }

        let mut assignments: BTreeMap<String, u16> = BTreeMap::new();
        for key in &desired {
            match self.ports.allocate(key) {
                Ok(port) => {
                    assignments.insert(key.clone(), port);
                }
                Err(e) => ibgp_warn!("no port for listener {}: {}", key, e),
            }
        }

        let snapshot = build_snapshot(SnapshotInput {
            local: self.rib.local_routes().collect(),
            internal: self.rib.internal_routes().collect(),
            ports: &assignments,
            bind_address: &self.bind_address,
            version: self.version + 1,
        });
        if snapshot.same_content(&self.cache.current()) {
            return;
        }
        self.version += 1;
        self.cache.set_snapshot(snapshot);
    }

    /// GraphQL subgraphs for the gateway: one service per route name,
    /// resolved to the local route endpoint when we host it, otherwise to
    /// the egress listener of the best advertiser.
    fn push_gateway(&self) {
        let mut services: BTreeMap<String, GatewayService> = BTreeMap::new();
        for channel in self.rib.local_routes() {
            if !channel.protocol.is_graphql() {
                continue;
            }
            let Some(endpoint) = &channel.endpoint else {
                continue;
            };
            services.insert(
                channel.name.clone(),
                GatewayService {
                    name: channel.name.clone(),
                    url: endpoint.clone(),
                    token: None,
                },
            );
        }
        let mut learned: Vec<&InternalRoute> = self
            .rib
            .internal_routes()
            .filter(|route| route.channel.protocol.is_graphql())
            .collect();
        learned.sort_by(|a, b| {
            (a.node_path.len(), &a.peer_name).cmp(&(b.node_path.len(), &b.peer_name))
        });
        for route in learned {
            if services.contains_key(&route.channel.name) {
                continue;
            }
            let key = egress_key(&route.channel.name, &route.peer_name);
            let Some(port) = self.ports.get(&key) else {
                continue;
            };
            services.insert(
                route.channel.name.clone(),
                GatewayService {
                    name: route.channel.name.clone(),
                    url: format!("http://{}:{}", self.bind_address, port),
                    token: None,
                },
            );
        }
        self.gateway.update(services.into_values().collect());
    }
}

pub fn serve(mut node: Node) {
    tokio::spawn(async move {
        node.event_loop().await;
    });
}

/// Cloneable enqueue handle. `send_action` resolves once the action has
/// been planned, committed and dispatched, which is the queue's intended
/// backpressure.
#[derive(Clone)]
pub struct NodeHandle {
    tx: mpsc::Sender<Message>,
}

impl NodeHandle {
    pub async fn send_action(&self, action: Action) -> Result<(), NodeError> {
        action
            .validate()
            .map_err(|e| NodeError::Validation(e.to_string()))?;
        let (resp, rx) = oneshot::channel();
        self.tx
            .send(Message::Action {
                action,
                resp: Some(resp),
            })
            .await
            .map_err(|_| NodeError::Shutdown)?;
        rx.await.map_err(|_| NodeError::Shutdown)?
    }

    async fn query(&self, query: Query) -> Result<QueryReply, NodeError> {
        let (resp, rx) = oneshot::channel();
        self.tx
            .send(Message::Query { query, resp })
            .await
            .map_err(|_| NodeError::Shutdown)?;
        rx.await.map_err(|_| NodeError::Shutdown)
    }

    pub async fn state(&self) -> Result<RibState, NodeError> {
        match self.query(Query::State).await? {
            QueryReply::State(state) => Ok(state),
            _ => Err(NodeError::Shutdown),
        }
    }

    pub async fn metadata(&self) -> Result<BTreeMap<String, RouteMetadata>, NodeError> {
        match self.query(Query::Metadata).await? {
            QueryReply::Metadata(metadata) => Ok(metadata),
            _ => Err(NodeError::Shutdown),
        }
    }

    pub async fn peer_known(&self, name: &str) -> Result<bool, NodeError> {
        match self.query(Query::PeerKnown(name.to_string())).await? {
            QueryReply::PeerKnown(known) => Ok(known),
            _ => Err(NodeError::Shutdown),
        }
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(Message::Shutdown).await;
    }
}
