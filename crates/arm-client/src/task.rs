//! Background task with a one-shot cancel handle.

use std::future::Future;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A spawned task that is cancelled exactly once, either explicitly or when
/// the handle is dropped.
#[derive(Debug)]
pub struct CancellableTask<T> {
    cancel_handle: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<T>>,
}

impl<T: Send + 'static> CancellableTask<T> {
    /// Spawn `make(cancel)`. The future must return promptly once `cancel`
    /// resolves; it also resolves if the handle is dropped.
    pub fn spawn<F, Fut>(make: F) -> Self
    where
        F: FnOnce(oneshot::Receiver<()>) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let join = tokio::spawn(make(rx));
        Self {
            cancel_handle: Some(tx),
            join: Some(join),
        }
    }

    /// Request cancellation. Returns `true` only for the call that actually
    /// signalled the task.
    pub fn cancel(&mut self) -> bool {
        match self.cancel_handle.take() {
            Some(tx) => {
                // The task may already have finished on its own.
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    /// Whether cancel has been requested or the task finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.cancel_handle.is_none() || self.join.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the task to finish. Returns `None` if it panicked or was
    /// already joined.
    pub async fn join(&mut self) -> Option<T> {
        let join = self.join.take()?;
        join.await.ok()
    }

    /// Cancel and wait.
    pub async fn shutdown(&mut self) -> Option<T> {
        self.cancel();
        self.join().await
    }
}

impl<T> Drop for CancellableTask<T> {
    fn drop(&mut self) {
        if let Some(tx) = self.cancel_handle.take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn cancel_is_delivered_once() {
        let mut task = CancellableTask::spawn(|cancel| async move {
            cancel.await.is_ok()
        });
        assert!(task.cancel());
        assert!(!task.cancel());
        assert_eq!(task.join().await, Some(true));
        assert_eq!(task.join().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_cancels() {
        let (done_tx, done_rx) = oneshot::channel();
        let task = CancellableTask::spawn(|cancel| async move {
            let _ = cancel.await;
            let _ = done_tx.send(());
        });
        drop(task);
        tokio::time::timeout(Duration::from_secs(1), done_rx)
            .await
            .unwrap()
            .unwrap();
    }
}
