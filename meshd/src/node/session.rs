use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use mesh_packet::{RpcRequest, RpcResponse, decode_frame};

use crate::context::Task;

/// Per-call delivery timeout.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("transport closed")]
    Closed,
    #[error("request timed out")]
    Timeout,
    #[error("remote error: {0}")]
    Remote(String),
    #[error("malformed message: {0}")]
    Malformed(String),
}

struct Call {
    method: String,
    params: Value,
    resp: oneshot::Sender<Result<Value, SessionError>>,
}

/// Outbound WebSocket RPC session. Calls are serialized through one
/// writer, so per-session delivery order matches call order; responses
/// are matched back by request id.
#[derive(Clone)]
pub struct RpcClient {
    tx: mpsc::UnboundedSender<Call>,
    _io: Arc<Task<()>>,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient").finish_non_exhaustive()
    }
}

impl RpcClient {
    /// Dial `endpoint` and run the session. `on_close` fires once if the
    /// transport terminates on its own; dropping the client tears the
    /// session down silently.
    pub async fn connect<F>(endpoint: &str, on_close: F) -> Result<RpcClient, SessionError>
    where
        F: FnOnce() + Send + 'static,
    {
        let (ws, _) = connect_async(endpoint)
            .await
            .map_err(|e| SessionError::Connect(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Call>();

        let io = Task::spawn(async move {
            let mut pending: HashMap<u64, oneshot::Sender<Result<Value, SessionError>>> =
                HashMap::new();
            let mut next_id: u64 = 1;
            let mut transport_down = false;
            loop {
                tokio::select! {
                    call = rx.recv() => match call {
                        Some(call) => {
                            let id = next_id;
                            next_id += 1;
                            let request = RpcRequest {
                                id,
                                method: call.method,
                                params: call.params,
                            };
                            match serde_json::to_string(&request) {
                                Ok(text) => {
                                    if sink.send(WsMessage::Text(text.into())).await.is_err() {
                                        let _ = call.resp.send(Err(SessionError::Closed));
                                        transport_down = true;
                                        break;
                                    }
                                    pending.insert(id, call.resp);
                                }
                                Err(e) => {
                                    let _ = call
                                        .resp
                                        .send(Err(SessionError::Malformed(e.to_string())));
                                }
                            }
                        }
                        // Client handle dropped; deliberate teardown.
                        None => break,
                    },
                    msg = stream.next() => match msg {
                        Some(Ok(WsMessage::Text(text))) => {
                            let (_trace, payload) = decode_frame(text.as_str());
                            if let Ok(response) = serde_json::from_str::<RpcResponse>(payload) {
                                if let Some(resp) = pending.remove(&response.id) {
                                    let result = match response.error {
                                        Some(err) => Err(SessionError::Remote(err)),
                                        None => Ok(response.result.unwrap_or(Value::Null)),
                                    };
                                    let _ = resp.send(result);
                                }
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => {
                            transport_down = true;
                            break;
                        }
                        Some(Ok(_)) => {}
                    }
                }
            }
            for (_, resp) in pending.drain() {
                let _ = resp.send(Err(SessionError::Closed));
            }
            if transport_down {
                on_close();
            }
        });

        Ok(RpcClient {
            tx,
            _io: Arc::new(io),
        })
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<Value, SessionError> {
        let (resp, rx) = oneshot::channel();
        self.tx
            .send(Call {
                method: method.to_string(),
                params,
                resp,
            })
            .map_err(|_| SessionError::Closed)?;
        match tokio::time::timeout(CALL_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SessionError::Closed),
            Err(_) => Err(SessionError::Timeout),
        }
    }

    /// Fire-and-forget call used on teardown paths where the session may
    /// already be half dead.
    pub fn cast(&self, method: &str, params: Value) {
        let client = self.clone();
        let method = method.to_string();
        tokio::spawn(async move {
            let _ = client.call(&method, params).await;
        });
    }
}
