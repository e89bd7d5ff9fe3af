use std::future::Future;

use tokio::task::JoinHandle;

/// Owned handle to a spawned task. Dropping the handle aborts the task,
/// so storing `Option<Task<()>>` on a struct ties the task's lifetime to
/// its owner.
#[derive(Debug)]
pub struct Task<T> {
    join_handle: JoinHandle<T>,
}

impl<T> Task<T> {
    pub fn spawn<Fut>(future: Fut) -> Task<T>
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        Task {
            join_handle: tokio::spawn(future),
        }
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        self.join_handle.abort();
    }
}
