//! Bounded progress streams for long-running operations.
//!
//! A producer runs as a tokio task and pushes events into a bounded channel;
//! when the consumer stops draining, the producer waits. Cancellation is
//! cooperative and observed between chunks or archives.

use std::future::Future;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{RepoError, RepoResult};

/// Producer side handed to the task body.
#[derive(Debug, Clone)]
pub struct Progress<E> {
    tx: mpsc::Sender<E>,
    cancel: CancellationToken,
}

impl<E: Send + 'static> Progress<E> {
    /// Send one event, waiting for channel space. Events sent after the
    /// consumer went away are dropped.
    pub async fn emit(&self, event: E) {
        let _ = self.tx.send(event).await;
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// `Err(RepoError::Cancelled)` once cancellation was requested.
    pub fn check_cancelled(&self) -> RepoResult<()> {
        if self.is_cancelled() {
            Err(RepoError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Consumer side: event stream, cancellation and the final result.
#[derive(Debug)]
pub struct TaskHandle<E, R> {
    events: mpsc::Receiver<E>,
    join: JoinHandle<RepoResult<R>>,
    cancel: CancellationToken,
}

impl<E, R> TaskHandle<E, R>
where
    E: Send + 'static,
    R: Send + 'static,
{
    /// Spawn `body` on the runtime with a channel of `capacity` events.
    pub fn spawn<F, Fut>(capacity: usize, body: F) -> Self
    where
        F: FnOnce(Progress<E>) -> Fut,
        Fut: Future<Output = RepoResult<R>> + Send + 'static,
    {
        let (tx, events) = mpsc::channel(capacity.max(1));
        let cancel = CancellationToken::new();
        let progress = Progress {
            tx,
            cancel: cancel.clone(),
        };
        let join = tokio::spawn(body(progress));
        Self { events, join, cancel }
    }

    /// Next event, or `None` once the producer finished.
    pub async fn next_event(&mut self) -> Option<E> {
        self.events.recv().await
    }

    /// Ask the producer to stop at the next chunk or archive boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A token that cancels this task when triggered.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Discard remaining events and wait for the result.
    pub async fn finish(self) -> RepoResult<R> {
        let (_, result) = self.collect().await;
        result
    }

    /// Drain every event, then wait for the result.
    pub async fn collect(mut self) -> (Vec<E>, RepoResult<R>) {
        let mut out = Vec::new();
        while let Some(event) = self.events.recv().await {
            out.push(event);
        }
        let result = match self.join.await {
            Ok(result) => result,
            Err(e) => Err(RepoError::from(e)),
        };
        (out, result)
    }
}
