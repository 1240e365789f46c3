//! Cooperative pause/resume between data processing and checkpointing
//!
//! The data loop holds a [`GateToken`] for each unit of work; the checkpoint taker
//! acquires the same token before snapshotting, so it waits for in-flight work to finish
//! and keeps new work out until it releases. The underlying mutex is fair, so neither
//! side starves the other.

use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

/// Held while either a unit of work or a checkpoint operation is in progress
pub type GateToken = OwnedMutexGuard<()>;

/// Shared pause/resume gate for one instance
#[derive(Debug, Clone, Default)]
pub struct ProcessingGate {
    inner: Arc<Mutex<()>>,
}

impl ProcessingGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the gate for one unit of data processing
    pub async fn enter(&self) -> GateToken {
        self.inner.clone().lock_owned().await
    }

    /// Pause processing for a checkpoint or restore
    ///
    /// Resolves once in-flight work has released the gate.
    pub async fn pause(&self) -> GateToken {
        trace!("Pausing processing");
        let token = self.inner.clone().lock_owned().await;
        trace!("Processing paused");
        token
    }

    /// Whether someone currently holds the gate
    pub fn is_held(&self) -> bool {
        self.inner.try_lock().is_err()
    }

    /// Whether `token` was handed out by this gate
    pub fn issued(&self, token: &GateToken) -> bool {
        Arc::ptr_eq(OwnedMutexGuard::mutex(token), &self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_pause_waits_for_in_flight_work() {
        let gate = ProcessingGate::new();
        let work = gate.enter().await;
        assert!(gate.is_held());

        let pauser = gate.clone();
        let paused = tokio::spawn(async move {
            let _token = pauser.pause().await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!paused.is_finished());

        drop(work);
        paused.await.unwrap();
        assert!(!gate.is_held());
    }

    #[tokio::test]
    async fn test_work_waits_while_paused() {
        let gate = ProcessingGate::new();
        let pause = gate.pause().await;

        let worker = gate.clone();
        let work = tokio::spawn(async move {
            let _token = worker.enter().await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!work.is_finished());

        drop(pause);
        work.await.unwrap();
    }

    #[tokio::test]
    async fn test_tokens_know_their_gate() {
        let gate = ProcessingGate::new();
        let other = ProcessingGate::new();
        let token = gate.pause().await;

        assert!(gate.issued(&token));
        assert!(!other.issued(&token));
        assert!(gate.clone().issued(&token));
    }
}
