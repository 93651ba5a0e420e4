//! Lifecycle Manager
//!
//! Per-session cancellation signal and task set. Every long-running loop the
//! session spawns goes through `create_task`, so `stop` can cancel all of
//! them and wait for completion deterministically. Replaces ad-hoc shutdown
//! channels scattered across services.

use std::future::Future;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::EngineError;

/// Lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Running,
    Stopping,
    Stopped,
}

/// Per-session cancellation and task tracking.
pub struct LifecycleManager {
    session_id: String,
    state: RwLock<LifecycleState>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl LifecycleManager {
    /// Create a manager in the running state.
    pub fn new(session_id: impl Into<String>) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            session_id: session_id.into(),
            state: RwLock::new(LifecycleState::Running),
            stop_tx,
            stop_rx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_running(&self) -> bool {
        *self.state.read() == LifecycleState::Running
    }

    pub fn is_stopped(&self) -> bool {
        *self.state.read() == LifecycleState::Stopped
    }

    /// Receiver that flips to `true` when the session stops.
    ///
    /// Long loops select on this at every suspension point.
    pub fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop_rx.clone()
    }

    /// Spawn a tracked task.
    ///
    /// Fails once the lifecycle has begun stopping; a task created after
    /// that point could never be cancelled.
    pub fn create_task<F>(&self, future: F) -> Result<(), EngineError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if !self.is_running() {
            return Err(EngineError::LifecycleStopped(self.session_id.clone()));
        }

        let handle = tokio::spawn(future);
        let mut tasks = self.tasks.lock();
        // Drop handles of tasks that already finished on their own.
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
        Ok(())
    }

    /// Number of still-tracked tasks. Diagnostic only.
    pub fn task_count(&self) -> usize {
        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.len()
    }

    /// Signal stop, cancel every tracked task, and await their completion.
    ///
    /// Idempotent; concurrent callers after the first return immediately.
    pub async fn stop(&self) {
        {
            let mut state = self.state.write();
            if *state != LifecycleState::Running {
                return;
            }
            *state = LifecycleState::Stopping;
        }

        tracing::debug!(session_id = %self.session_id, "lifecycle stopping");
        let _ = self.stop_tx.send(true);

        let handles: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for handle in handles {
            handle.abort();
            match handle.await {
                Ok(()) => {}
                Err(err) if err.is_cancelled() => {}
                Err(err) => {
                    tracing::error!(
                        session_id = %self.session_id,
                        error = %err,
                        "tracked task failed during stop"
                    );
                }
            }
        }

        *self.state.write() = LifecycleState::Stopped;
        tracing::debug!(session_id = %self.session_id, "lifecycle stopped");
    }
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("session_id", &self.session_id)
            .field("state", &*self.state.read())
            .finish()
    }
}
