use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;

use crate::context::Timer;
use crate::rib::Action;

use super::inst::Message;

/// Interval of the node tick that drives hold-timer expiry and keepalive
/// scheduling through the action queue.
pub const TICK_INTERVAL_SEC: u64 = 1;

/// Dial backoff bounds in seconds.
pub const BACKOFF_BASE_SEC: u64 = 1;
pub const BACKOFF_CAP_SEC: u64 = 30;

pub fn start_tick_timer(tx: mpsc::Sender<Message>) -> Timer {
    Timer::repeat(TICK_INTERVAL_SEC, move || {
        let tx = tx.clone();
        async move {
            let _ = tx
                .send(Message::Action {
                    action: Action::InternalProtocolTick,
                    resp: None,
                })
                .await;
        }
    })
}

/// Exponential backoff for dial attempt `attempt` (1-based): base 1 s
/// doubling to a 30 s cap, with ±20 % jitter.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(6);
    let base = (BACKOFF_BASE_SEC << exp).min(BACKOFF_CAP_SEC);
    let jitter = rand::rng().random_range(0.8..1.2);
    Duration::from_millis((base as f64 * 1000.0 * jitter) as u64)
}
