use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;

use crate::context::Task;
use crate::{ibgp_debug, ibgp_warn};

use super::session::RpcClient;

/// One GraphQL subgraph as reported to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayService {
    pub name: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Best-effort `updateConfig` pusher. Configs are handed over through a
/// watch channel, so a burst of commits coalesces into one push of the
/// latest service set; failures are logged and superseded by the next
/// successful push.
#[derive(Debug)]
pub struct GatewayClient {
    tx: watch::Sender<Vec<GatewayService>>,
    _task: Option<Task<()>>,
}

impl GatewayClient {
    pub fn new(endpoint: Option<String>) -> Self {
        let (tx, mut rx) = watch::channel(Vec::new());
        let task = endpoint.map(|endpoint| {
            Task::spawn(async move {
                while rx.changed().await.is_ok() {
                    let services = rx.borrow_and_update().clone();
                    push_config(&endpoint, services).await;
                }
            })
        });
        Self { tx, _task: task }
    }

    /// Hand the latest service set to the pusher. Unchanged sets are not
    /// re-pushed.
    pub fn update(&self, services: Vec<GatewayService>) {
        self.tx.send_if_modified(|current| {
            if *current != services {
                *current = services;
                true
            } else {
                false
            }
        });
    }
}

async fn push_config(endpoint: &str, services: Vec<GatewayService>) {
    let count = services.len();
    match RpcClient::connect(endpoint, || {}).await {
        Ok(client) => {
            match client
                .call("updateConfig", json!({ "services": services }))
                .await
            {
                Ok(_) => {
                    ibgp_debug!("gateway config updated, {} services", count);
                }
                Err(e) => {
                    ibgp_warn!("gateway updateConfig failed: {}", e);
                }
            }
        }
        Err(e) => {
            ibgp_warn!("gateway unreachable at {}: {}", endpoint, e);
        }
    }
}
