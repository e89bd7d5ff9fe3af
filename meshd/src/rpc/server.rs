use std::collections::{BTreeSet, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use mesh_packet::{
    ChannelKey, DataChannel, OpenAck, Packet, PeerInfo, RpcRequest, RpcResponse, RpcResult,
    decode_frame, negotiate_hold_time,
};

use crate::config::Config;
use crate::context::Task;
use crate::node::NodeHandle;
use crate::rib::Action;
use crate::{ibgp_debug, ibgp_info};

use super::api::{
    AuthorizeParams, ListRoutesReply, NameParams, Scope, SecretVerifier, TokenVerifier,
    split_method,
};

/// Shared server context: node identity, trust domains, the queue handle
/// and the token admission seam.
pub struct RpcContext {
    pub local: PeerInfo,
    pub domains: BTreeSet<String>,
    pub handle: NodeHandle,
    pub verifier: Arc<dyn TokenVerifier>,
}

impl RpcContext {
    pub fn new(config: &Config, handle: NodeHandle) -> Self {
        Self {
            local: config.local_info(),
            domains: config.node.domains.clone(),
            handle,
            verifier: Arc::new(SecretVerifier {
                ibgp_secret: config.orchestrator.ibgp.secret.clone(),
            }),
        }
    }
}

/// Per-connection progressive state: granted scopes, and the peer this
/// connection authenticated as via OPEN.
#[derive(Default)]
pub struct ConnState {
    pub scopes: HashSet<Scope>,
    pub ibgp_peer: Option<String>,
}

pub async fn serve(config: &Config, handle: NodeHandle) -> Result<Task<()>> {
    let addr = config.listen_addr()?;
    let listener = TcpListener::bind(&addr).await?;
    ibgp_info!("rpc listening on {}", addr);
    let ctx = Arc::new(RpcContext::new(config, handle));
    Ok(Task::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let ctx = ctx.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, peer_addr, ctx).await;
                    });
                }
                Err(e) => {
                    tracing::warn!("rpc accept error: {}", e);
                    // Backoff on accept errors to avoid a tight loop on FD
                    // exhaustion.
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }))
}

async fn handle_connection(stream: TcpStream, peer_addr: SocketAddr, ctx: Arc<RpcContext>) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            ibgp_debug!("handshake with {} failed: {}", peer_addr, e);
            return;
        }
    };
    let (mut sink, mut stream) = ws.split();
    let mut conn = ConnState::default();
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => {
                let response = process_request(text.as_str(), &mut conn, &ctx).await;
                let Ok(reply) = serde_json::to_string(&response) else {
                    continue;
                };
                if sink.send(WsMessage::Text(reply.into())).await.is_err() {
                    break;
                }
            }
            Ok(WsMessage::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }
    ibgp_debug!("connection from {} closed", peer_addr);
}

/// Decode one frame, dispatch it, and shape the reply. Domain failures of
/// mutating calls surface as `{success:false, error}` results; only a
/// frame that cannot be parsed at all gets a response-level error.
pub async fn process_request(text: &str, conn: &mut ConnState, ctx: &RpcContext) -> RpcResponse {
    let (_trace, payload) = decode_frame(text);
    let request: RpcRequest = match serde_json::from_str(payload) {
        Ok(request) => request,
        Err(e) => return RpcResponse::err(0, &format!("malformed request: {e}")),
    };
    let id = request.id;
    match dispatch_request(request, conn, ctx).await {
        Ok(result) => RpcResponse {
            id,
            result: Some(result),
            error: None,
        },
        Err(message) => match RpcResponse::ok(id, &RpcResult::fail(&message)) {
            Ok(response) => response,
            Err(_) => RpcResponse::err(id, &message),
        },
    }
}

fn ok_result() -> Result<Value, String> {
    serde_json::to_value(RpcResult::ok()).map_err(|e| e.to_string())
}

async fn run_action(ctx: &RpcContext, action: Action) -> Result<Value, String> {
    ctx.handle
        .send_action(action)
        .await
        .map_err(|e| e.to_string())?;
    ok_result()
}

fn require(conn: &ConnState, scope: Scope) -> Result<(), String> {
    if conn.scopes.contains(&scope) {
        Ok(())
    } else {
        Err("not authorized".to_string())
    }
}

async fn dispatch_request(
    request: RpcRequest,
    conn: &mut ConnState,
    ctx: &RpcContext,
) -> Result<Value, String> {
    if request.method == "authorize" {
        let params: AuthorizeParams =
            serde_json::from_value(request.params).map_err(|e| e.to_string())?;
        let scope = Scope::parse(&params.scope)
            .ok_or_else(|| format!("unknown scope: {}", params.scope))?;
        if scope == Scope::Ibgp {
            return Err("ibgp scope is granted by open".to_string());
        }
        if !ctx.verifier.verify(scope, &params.token) {
            return Err("not authorized".to_string());
        }
        conn.scopes.insert(scope);
        return ok_result();
    }

    let (scope, op) = split_method(&request.method)
        .ok_or_else(|| format!("unknown method: {}", request.method))?;
    match scope {
        Scope::Ibgp => dispatch_ibgp(op, request.params, conn, ctx).await,
        Scope::Network => {
            require(conn, Scope::Network)?;
            match op {
                "addPeer" => {
                    let info: PeerInfo =
                        serde_json::from_value(request.params).map_err(|e| e.to_string())?;
                    run_action(ctx, Action::LocalPeerCreate(info)).await
                }
                "updatePeer" => {
                    let info: PeerInfo =
                        serde_json::from_value(request.params).map_err(|e| e.to_string())?;
                    run_action(ctx, Action::LocalPeerUpdate(info)).await
                }
                "removePeer" => {
                    let params: NameParams =
                        serde_json::from_value(request.params).map_err(|e| e.to_string())?;
                    run_action(ctx, Action::LocalPeerDelete { name: params.name }).await
                }
                "listPeers" => {
                    let state = ctx.handle.state().await.map_err(|e| e.to_string())?;
                    serde_json::to_value(state.local.peers).map_err(|e| e.to_string())
                }
                other => Err(format!("unknown method: network.{other}")),
            }
        }
        Scope::DataChannel => {
            require(conn, Scope::DataChannel)?;
            match op {
                "addRoute" => {
                    let channel: DataChannel =
                        serde_json::from_value(request.params).map_err(|e| e.to_string())?;
                    run_action(ctx, Action::LocalRouteCreate(channel)).await
                }
                "removeRoute" => {
                    let key: ChannelKey =
                        serde_json::from_value(request.params).map_err(|e| e.to_string())?;
                    run_action(ctx, Action::LocalRouteDelete(key)).await
                }
                "listRoutes" => {
                    let state = ctx.handle.state().await.map_err(|e| e.to_string())?;
                    let reply = ListRoutesReply {
                        local: state.local.routes,
                        internal: state.internal.routes,
                    };
                    serde_json::to_value(reply).map_err(|e| e.to_string())
                }
                other => Err(format!("unknown method: dataChannel.{other}")),
            }
        }
    }
}

fn require_session(conn: &ConnState, peer_name: &str) -> Result<(), String> {
    match &conn.ibgp_peer {
        Some(name) if name == peer_name => Ok(()),
        _ => Err("session not open".to_string()),
    }
}

async fn dispatch_ibgp(
    op: &str,
    params: Value,
    conn: &mut ConnState,
    ctx: &RpcContext,
) -> Result<Value, String> {
    let packet =
        Packet::from_request(&format!("ibgp.{op}"), params).map_err(|e| e.to_string())?;
    match packet {
        Packet::Open(open) => {
            let info = &open.peer_info;
            if !ctx.domains.is_empty()
                && !info.domains.is_empty()
                && !info.shares_domain(&ctx.domains)
            {
                return reject("trust domains do not intersect");
            }
            let token = info.peer_token.as_deref().unwrap_or("");
            if !ctx.verifier.verify(Scope::Ibgp, token) {
                return reject("peer token rejected");
            }
            let known = ctx
                .handle
                .peer_known(&info.name)
                .await
                .map_err(|e| e.to_string())?;
            if !known {
                return reject("Peer not found");
            }
            let hold_time = negotiate_hold_time(open.hold_time);
            // The presented token is this node's secret, not the peer's.
            let mut peer_info = info.clone();
            peer_info.peer_token = None;
            let action = Action::InternalProtocolOpen {
                peer_info,
                hold_time: Some(hold_time),
            };
            if let Err(e) = ctx.handle.send_action(action).await {
                return reject(&e.to_string());
            }
            conn.scopes.insert(Scope::Ibgp);
            conn.ibgp_peer = Some(info.name.clone());
            ibgp_info!("peer {} opened a session", info.name);
            serde_json::to_value(OpenAck::accept(ctx.local.clone(), hold_time))
                .map_err(|e| e.to_string())
        }
        Packet::Update(update) => {
            require_session(conn, &update.peer_info.name)?;
            run_action(
                ctx,
                Action::InternalProtocolUpdate {
                    peer_info: update.peer_info,
                    updates: update.updates,
                },
            )
            .await
        }
        Packet::Keepalive(keepalive) => {
            require_session(conn, &keepalive.peer_info.name)?;
            run_action(
                ctx,
                Action::InternalProtocolKeepalive {
                    peer_info: keepalive.peer_info,
                },
            )
            .await
        }
        Packet::Close(close) => {
            require_session(conn, &close.peer_info.name)?;
            ibgp_info!(
                "peer {} closed its session (code {})",
                close.peer_info.name,
                close.code
            );
            run_action(
                ctx,
                Action::InternalProtocolClose {
                    peer_info: close.peer_info,
                    code: close.code,
                    reason: close.reason,
                },
            )
            .await
        }
    }
}

fn reject(reason: &str) -> Result<Value, String> {
    serde_json::to_value(OpenAck::reject(reason)).map_err(|e| e.to_string())
}
