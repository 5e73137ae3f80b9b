//! Single-flight registry: at most one build in flight per cache key.
//!
//! The first caller for a key becomes the leader and owns a guard; later
//! callers subscribe to a capacity-1 broadcast channel and wait. A leader
//! that completes delivers one result to everyone; a leader dropped without
//! completing closes the channel, which followers observe as a cancelled
//! build. The registry lock is held only for map operations, never across
//! I/O.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use crate::cache::CacheKey;
use crate::deadline::Deadline;
use crate::error::EngineError;
use crate::model::ContextRecord;

pub type FlightResult = Result<Arc<ContextRecord>, EngineError>;

type FlightMap = Arc<Mutex<HashMap<CacheKey, broadcast::Sender<FlightResult>>>>;

/// What a caller became when it tried to start a build.
pub enum FlightRole {
    Leader(FlightGuard),
    Follower(broadcast::Receiver<FlightResult>),
}

/// Leader's handle. `complete` publishes the outcome; dropping without
/// completing cancels the flight for all followers.
pub struct FlightGuard {
    key: Option<CacheKey>,
    sender: broadcast::Sender<FlightResult>,
    map: FlightMap,
}

impl FlightGuard {
    /// Deliver the result to every follower and retire the flight.
    pub fn complete(mut self, result: FlightResult) {
        if let Some(key) = self.key.take() {
            let mut map = self.map.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            map.remove(&key);
            drop(map);
            // No receivers is fine: the leader was alone.
            let _ = self.sender.send(result);
        }
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            tracing::debug!(key = %key, "single-flight leader dropped without completing");
            let mut map = self.map.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            map.remove(&key);
            // Sender drops with the guard; followers see the channel close.
        }
    }
}

#[derive(Debug, Default)]
pub struct FlightRegistry {
    map: FlightMap,
}

impl FlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the flight for `key`: install a new one (leader) or attach to
    /// the one in progress (follower).
    pub fn join(&self, key: &CacheKey) -> FlightRole {
        let mut map = self.map.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(sender) = map.get(key) {
            return FlightRole::Follower(sender.subscribe());
        }
        let (sender, _) = broadcast::channel(1);
        map.insert(key.clone(), sender.clone());
        FlightRole::Leader(FlightGuard { key: Some(key.clone()), sender, map: Arc::clone(&self.map) })
    }

    /// How many flights are currently in progress.
    pub fn in_flight(&self) -> usize {
        self.map.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }
}

/// Follower wait: the leader's outcome, `BuildCancelled` when the leader
/// vanished, or the follower's own deadline error. A follower timing out
/// does not cancel the leader.
pub async fn await_leader(
    mut receiver: broadcast::Receiver<FlightResult>,
    deadline: Deadline,
) -> FlightResult {
    match tokio::time::timeout_at(deadline.instant(), receiver.recv()).await {
        Ok(Ok(result)) => result,
        Ok(Err(broadcast::error::RecvError::Closed)) => Err(EngineError::BuildCancelled),
        Ok(Err(broadcast::error::RecvError::Lagged(_))) => {
            Err(EngineError::Internal("single-flight broadcast lagged".into()))
        }
        Err(_) => Err(EngineError::DeadlineExceeded {
            elapsed_ms: deadline.remaining().as_millis() as u64,
        }),
    }
}
