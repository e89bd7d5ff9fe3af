use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedSender};

/// Cancel-on-drop timer. `once` fires the callback after the interval,
/// `repeat` fires it every interval, `refresh` restarts the countdown.
#[derive(Debug)]
pub struct Timer {
    tx: UnboundedSender<TimerMessage>,
}

#[derive(Debug)]
enum TimerMessage {
    Refresh,
}

#[derive(PartialEq)]
enum TimerType {
    Once,
    Infinite,
}

impl Timer {
    fn start<F, Fut>(sec: u64, typ: TimerType, mut cb: F) -> Timer
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let duration = Duration::from_secs(sec);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(duration);
            // interval's first tick completes immediately.
            let _ = interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        (cb)().await;
                        if typ == TimerType::Once {
                            break;
                        }
                    }
                    message = rx.recv() => {
                        match message {
                            Some(TimerMessage::Refresh) => {
                                interval = tokio::time::interval(duration);
                                let _ = interval.tick().await;
                            }
                            None => break,
                        }
                    }
                }
            }
        });
        Timer { tx }
    }

    pub fn once<F, Fut>(sec: u64, cb: F) -> Timer
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        Self::start(sec, TimerType::Once, cb)
    }

    pub fn repeat<F, Fut>(sec: u64, cb: F) -> Timer
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        Self::start(sec, TimerType::Infinite, cb)
    }

    pub fn refresh(&self) {
        let _ = self.tx.send(TimerMessage::Refresh);
    }

    pub fn second(sec: u64) -> Duration {
        Duration::new(sec, 0)
    }
}
