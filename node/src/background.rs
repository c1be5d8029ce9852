// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Background tasks: the checkpoint flusher and the periodic scavenger.
//!
//! Both do their file work on the blocking pool and stop when the shared
//! cancellation token fires. A scavenge in progress sees the same token and
//! abandons its current chunk.

use crate::errors::EngineError;
use crate::store::Store;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub struct BackgroundTasks {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub(crate) fn spawn(store: Store) -> Self {
        let cancel = CancellationToken::new();
        let mut handles = vec![tokio::spawn(checkpoint_loop(store.clone(), cancel.clone()))];
        if let Some(period) = store.config().scavenge_interval {
            handles.push(tokio::spawn(scavenge_loop(store, period, cancel.clone())));
        }
        tracing::debug!("Started {} background tasks", handles.len());
        Self { cancel, handles }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancels every task and waits for them to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!("Background task failed: {}", e);
            }
        }
    }
}

async fn checkpoint_loop(store: Store, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(store.config().checkpoint_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let flusher = store.clone();
                match tokio::task::spawn_blocking(move || flusher.flush()).await {
                    Ok(Ok(position)) => tracing::trace!("Writer checkpoint at {}", position),
                    Ok(Err(EngineError::Closed)) => break,
                    Ok(Err(e)) => tracing::warn!("Checkpoint flush failed: {}", e),
                    Err(e) => tracing::error!("Checkpoint flush panicked: {}", e),
                }
            }
        }
    }
    tracing::debug!("Checkpoint flusher stopped");
}

async fn scavenge_loop(store: Store, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick fires immediately; wait a full period after open.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let scavenger = store.clone();
                let token = cancel.clone();
                match tokio::task::spawn_blocking(move || scavenger.scavenge(&token)).await {
                    Ok(Ok(report)) if report.cancelled => break,
                    Ok(Ok(_)) => {}
                    Ok(Err(EngineError::Closed)) => break,
                    Ok(Err(e)) => tracing::warn!("Scavenge pass failed: {}", e),
                    Err(e) => tracing::error!("Scavenge pass panicked: {}", e),
                }
            }
        }
    }
    tracing::debug!("Scavenger stopped");
}
