use tokio::sync::mpsc;

use mesh_packet::{
    ClosePacket, METHOD_CLOSE, METHOD_OPEN, OpenAck, OpenPacket, PeerInfo, clamp_hold_time,
};

use crate::context::Task;
use crate::rib::Action;
use crate::{ibgp_debug, ibgp_info, ibgp_warn};

use super::inst::Message;
use super::session::RpcClient;
use super::timer::backoff_delay;

#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum State {
    Initializing,
    OpenSent,
    Established,
}

impl State {
    pub fn to_str(&self) -> &'static str {
        match self {
            Self::Initializing => "Initializing",
            Self::OpenSent => "OpenSent",
            Self::Established => "Established",
        }
    }

    pub fn is_established(&self) -> bool {
        *self == State::Established
    }
}

#[derive(Debug)]
pub enum Event {
    Start,
    Connected(RpcClient),
    ConnFail,
    OpenAccepted(OpenAck),
    OpenRejected(String),
    TransportError,
    HoldExpired,
}

#[derive(Debug, Default)]
pub struct PeerTask {
    pub connect: Option<Task<()>>,
    pub handshake: Option<Task<()>>,
}

/// Outbound session to one configured peer: dial loop, OPEN handshake and
/// the live RPC session the dispatcher sends through. RIB-side session
/// state (hold timing, connection status) lives on the peer record; this
/// struct owns the transport.
pub struct Peer {
    pub name: String,
    /// Remote identity: the endpoint we dial and the token it expects.
    pub info: PeerInfo,
    /// Our identity as presented in OPEN, carrying the remote's token.
    pub local: PeerInfo,
    pub state: State,
    /// Cleared when a malformed OPEN poisons the peer; re-created peers
    /// start active again.
    pub active: bool,
    pub attempt: u32,
    pub task: PeerTask,
    pub session: Option<RpcClient>,
    /// Updates issued while the session is still coming up; flushed in
    /// order on establishment.
    pub mailbox: Vec<(String, serde_json::Value)>,
    pub tx: mpsc::Sender<Message>,
}

impl Peer {
    pub fn new(info: PeerInfo, local: PeerInfo, tx: mpsc::Sender<Message>) -> Self {
        Self {
            name: info.name.clone(),
            info,
            local,
            state: State::Initializing,
            active: false,
            attempt: 0,
            task: PeerTask::default(),
            session: None,
            mailbox: Vec::new(),
            tx,
        }
    }

    /// Graceful teardown: a NOTIFICATION is fired into the session before
    /// the owner drops this peer and its tasks.
    pub fn close_session(&mut self, code: u16, reason: Option<String>) {
        if let Some(session) = self.session.take() {
            let packet = ClosePacket::new(self.local.clone(), code, reason);
            if let Ok(params) = serde_json::to_value(&packet) {
                session.cast(METHOD_CLOSE, params);
            }
        }
        self.task = PeerTask::default();
        self.mailbox.clear();
        self.state = State::Initializing;
    }
}

pub fn fsm(peer: &mut Peer, event: Event) {
    let prev = peer.state;
    let next = match event {
        Event::Start => fsm_start(peer),
        Event::Connected(client) => fsm_connected(peer, client),
        Event::ConnFail => fsm_conn_fail(peer),
        Event::OpenAccepted(ack) => fsm_open_accepted(peer, ack),
        Event::OpenRejected(reason) => fsm_open_rejected(peer, reason),
        Event::TransportError => fsm_transport_error(peer),
        Event::HoldExpired => fsm_hold_expired(peer),
    };
    peer.state = next;
    if prev != peer.state {
        ibgp_debug!(
            "peer {} {} -> {}",
            peer.name,
            prev.to_str(),
            peer.state.to_str()
        );
    }
}

fn fsm_start(peer: &mut Peer) -> State {
    peer.active = true;
    peer.attempt = 0;
    peer.session = None;
    peer.task.connect = Some(peer_start_connection(peer));
    State::Initializing
}

fn fsm_connected(peer: &mut Peer, client: RpcClient) -> State {
    peer.task.connect = None;
    peer.session = Some(client.clone());
    peer.task.handshake = Some(peer_start_handshake(peer, client));
    State::OpenSent
}

fn fsm_conn_fail(peer: &mut Peer) -> State {
    if !peer.active {
        return State::Initializing;
    }
    peer.session = None;
    peer.task.handshake = None;
    peer.attempt = peer.attempt.saturating_add(1);
    peer.task.connect = Some(peer_start_connection(peer));
    State::Initializing
}

fn fsm_open_accepted(peer: &mut Peer, ack: OpenAck) -> State {
    peer.task.handshake = None;
    peer.attempt = 0;

    // Register the session with the RIB; the commit emits the full-table
    // sync back through this peer's session.
    let mut peer_info = ack.peer_info.unwrap_or_else(|| peer.info.clone());
    if peer_info.name != peer.name {
        ibgp_warn!(
            "peer {} identified itself as {}, keeping configured name",
            peer.name,
            peer_info.name
        );
        peer_info.name = peer.name.clone();
    }
    peer_info.peer_token = peer.info.peer_token.clone();
    let action = Action::InternalProtocolOpen {
        peer_info,
        hold_time: ack.hold_time,
    };
    let _ = peer.tx.try_send(Message::Action { action, resp: None });
    ibgp_info!("peer {} session established", peer.name);
    State::Established
}

/// A rejected or malformed OPEN poisons the peer: the transport closes
/// and no redial happens until the peer is re-created.
fn fsm_open_rejected(peer: &mut Peer, reason: String) -> State {
    ibgp_warn!("peer {} rejected open: {}", peer.name, reason);
    peer.active = false;
    peer.session = None;
    peer.task = PeerTask::default();
    peer.mailbox.clear();
    State::Initializing
}

fn fsm_transport_error(peer: &mut Peer) -> State {
    if !peer.state.is_established() || !peer.active {
        // Already dialing or parked; the connect path owns recovery.
        return peer.state;
    }
    peer.session = None;
    peer.task.handshake = None;
    peer.attempt = 1;
    peer.task.connect = Some(peer_start_connection(peer));
    State::Initializing
}

fn fsm_hold_expired(peer: &mut Peer) -> State {
    peer.session = None;
    peer.task.handshake = None;
    // The close that follows drops the peer's RIB record; anything still
    // queued is superseded by the full sync after reconnect.
    peer.mailbox.clear();
    if peer.active {
        peer.attempt = peer.attempt.saturating_add(1);
        peer.task.connect = Some(peer_start_connection(peer));
    }
    State::Initializing
}

fn peer_start_connection(peer: &Peer) -> Task<()> {
    let name = peer.name.clone();
    let endpoint = peer.info.endpoint.clone();
    let attempt = peer.attempt;
    let tx = peer.tx.clone();
    Task::spawn(async move {
        if attempt > 0 {
            tokio::time::sleep(backoff_delay(attempt)).await;
        }
        let close_tx = tx.clone();
        let close_name = name.clone();
        let on_close = move || {
            let _ = close_tx.try_send(Message::Event {
                peer: close_name,
                event: Event::TransportError,
            });
        };
        let event = match RpcClient::connect(&endpoint, on_close).await {
            Ok(client) => Event::Connected(client),
            Err(_) => Event::ConnFail,
        };
        let _ = tx.try_send(Message::Event { peer: name, event });
    })
}

fn peer_start_handshake(peer: &Peer, client: RpcClient) -> Task<()> {
    let name = peer.name.clone();
    let tx = peer.tx.clone();
    let open = OpenPacket::new(peer.local.clone(), Some(clamp_hold_time(None)));
    Task::spawn(async move {
        let params = match serde_json::to_value(&open) {
            Ok(params) => params,
            Err(e) => {
                let _ = tx.try_send(Message::Event {
                    peer: name,
                    event: Event::OpenRejected(e.to_string()),
                });
                return;
            }
        };
        let event = match client.call(METHOD_OPEN, params).await {
            Ok(value) => match serde_json::from_value::<OpenAck>(value) {
                Ok(ack) if ack.accepted => Event::OpenAccepted(ack),
                Ok(ack) => Event::OpenRejected(
                    ack.reason.unwrap_or_else(|| "open rejected".to_string()),
                ),
                // Schema failure on the ack; do not retry.
                Err(e) => Event::OpenRejected(e.to_string()),
            },
            // Transport trouble during handshake; keep dialing.
            Err(_) => Event::ConnFail,
        };
        let _ = tx.try_send(Message::Event { peer: name, event });
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(tx: mpsc::Sender<Message>) -> Peer {
        Peer::new(
            PeerInfo::new("node-b", "ws://node-b:4222").with_token("s3cr3t"),
            PeerInfo::new("node-a", "ws://node-a:4222").with_token("s3cr3t"),
            tx,
        )
    }

    #[tokio::test]
    async fn test_open_accepted_injects_open_action() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut peer = peer(tx);
        fsm(&mut peer, Event::OpenAccepted(OpenAck::accept(
            PeerInfo::new("node-b", "ws://node-b:4222"),
            45,
        )));
        assert!(peer.state.is_established());
        match rx.try_recv().unwrap() {
            Message::Action { action, resp } => {
                assert!(resp.is_none());
                match action {
                    Action::InternalProtocolOpen { peer_info, hold_time } => {
                        assert_eq!(peer_info.name, "node-b");
                        // The configured token rides along for later opens.
                        assert_eq!(peer_info.peer_token.as_deref(), Some("s3cr3t"));
                        assert_eq!(hold_time, Some(45));
                    }
                    other => panic!("expected open action, got {}", other.kind()),
                }
            }
            _ => panic!("expected action message"),
        }
    }

    #[tokio::test]
    async fn test_rejected_open_parks_the_peer() {
        let (tx, _rx) = mpsc::channel(8);
        let mut peer = peer(tx);
        peer.active = true;
        fsm(&mut peer, Event::OpenRejected("bad token".to_string()));
        assert!(!peer.active);
        assert_eq!(peer.state, State::Initializing);
        assert!(peer.task.connect.is_none());
        // Connection failures no longer redial a parked peer.
        fsm(&mut peer, Event::ConnFail);
        assert!(peer.task.connect.is_none());
    }

    #[tokio::test]
    async fn test_conn_fail_backs_off_and_redials() {
        let (tx, _rx) = mpsc::channel(8);
        let mut peer = peer(tx);
        fsm(&mut peer, Event::Start);
        assert!(peer.task.connect.is_some());
        assert_eq!(peer.attempt, 0);
        fsm(&mut peer, Event::ConnFail);
        assert_eq!(peer.attempt, 1);
        assert!(peer.task.connect.is_some());
        fsm(&mut peer, Event::ConnFail);
        assert_eq!(peer.attempt, 2);
    }

    #[tokio::test]
    async fn test_transport_error_outside_established_is_ignored() {
        let (tx, _rx) = mpsc::channel(8);
        let mut peer = peer(tx);
        fsm(&mut peer, Event::Start);
        let before = peer.attempt;
        fsm(&mut peer, Event::TransportError);
        assert_eq!(peer.attempt, before);
        assert_eq!(peer.state, State::Initializing);
    }
}
