//! Suspend/notify broker for approval requests.
//!
//! Each pending request owns a `oneshot` sender; the mission waiting on that
//! request holds the receiver. Resolving wakes exactly that waiter, so
//! missions waiting on different requests never contend on anything but the
//! short bookkeeping lock.

use super::{HumanInterventionRequest, InterventionResponse, Resolution};
use crate::errors::BrokerError;
use chrono::Utc;
use conductor_common::{MissionId, Phase, RequestId};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};

const NOTIFY_CAPACITY: usize = 64;
/// Settled requests kept for lookup before the oldest are forgotten.
const HISTORY_CAPACITY: usize = 1024;

struct PendingRequest {
    request: HumanInterventionRequest,
    waiter: Option<oneshot::Sender<Resolution>>,
}

#[derive(Default)]
struct BrokerState {
    pending: HashMap<RequestId, PendingRequest>,
    by_mission: HashMap<MissionId, RequestId>,
    history: History,
}

/// Resolved and withdrawn requests, bounded, in the order they left `pending`.
struct History {
    capacity: usize,
    by_id: HashMap<RequestId, HumanInterventionRequest>,
    order: VecDeque<RequestId>,
}

impl Default for History {
    fn default() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }
}

impl History {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            by_id: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn push(&mut self, request: HumanInterventionRequest) {
        while self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.by_id.remove(&oldest);
            }
        }
        self.order.push_back(request.id);
        self.by_id.insert(request.id, request);
    }

    fn get(&self, request_id: &RequestId) -> Option<&HumanInterventionRequest> {
        self.by_id.get(request_id)
    }

    fn ordered(&self) -> Vec<HumanInterventionRequest> {
        self.order
            .iter()
            .filter_map(|id| self.by_id.get(id).cloned())
            .collect()
    }
}

pub struct InterventionBroker {
    state: Mutex<BrokerState>,
    notify: broadcast::Sender<HumanInterventionRequest>,
}

impl Default for InterventionBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InterventionBroker {
    pub fn new() -> Self {
        Self::with_history_capacity(HISTORY_CAPACITY)
    }

    /// Broker that remembers at most `capacity` settled requests.
    pub fn with_history_capacity(capacity: usize) -> Self {
        let (notify, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self {
            state: Mutex::new(BrokerState {
                history: History::with_capacity(capacity),
                ..Default::default()
            }),
            notify,
        }
    }

    // Updates never panic midway, so a poisoned lock is recovered.
    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Receive every new request as it is filed.
    pub fn subscribe(&self) -> broadcast::Receiver<HumanInterventionRequest> {
        self.notify.subscribe()
    }

    /// File an approval request for `phase` and suspend until it is resolved.
    ///
    /// With a `timeout`, expiry resolves the request as an implicit pause.
    pub async fn request_approval(
        &self,
        mission_id: MissionId,
        phase: &Phase,
        phase_index: usize,
        timeout: Option<Duration>,
    ) -> Result<Resolution, BrokerError> {
        let (request, waiter) = self.submit(mission_id, phase, phase_index, None)?;
        self.wait(request.id, waiter, timeout).await
    }

    /// Register a request without waiting on it.
    pub fn submit(
        &self,
        mission_id: MissionId,
        phase: &Phase,
        phase_index: usize,
        worker_id: Option<String>,
    ) -> Result<(HumanInterventionRequest, oneshot::Receiver<Resolution>), BrokerError> {
        let request = HumanInterventionRequest::for_phase(mission_id, phase, phase_index, worker_id);
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state();
            if let Some(existing) = state.by_mission.get(&mission_id) {
                return Err(BrokerError::AlreadyPending {
                    mission_id,
                    request_id: *existing,
                });
            }
            state.by_mission.insert(mission_id, request.id);
            state.pending.insert(
                request.id,
                PendingRequest {
                    request: request.clone(),
                    waiter: Some(tx),
                },
            );
        }

        tracing::info!(
            mission = %mission_id,
            request = %request.id,
            phase = %request.context.phase,
            "approval requested"
        );
        // No subscribers is fine: someone may resolve through the HTTP API later.
        let _ = self.notify.send(request.clone());
        Ok((request, rx))
    }

    /// Wait on a receiver handed out by [`submit`](Self::submit).
    pub async fn wait(
        &self,
        request_id: RequestId,
        waiter: oneshot::Receiver<Resolution>,
        timeout: Option<Duration>,
    ) -> Result<Resolution, BrokerError> {
        let Some(limit) = timeout else {
            return waiter.await.map_err(|_| BrokerError::Withdrawn(request_id));
        };

        match tokio::time::timeout(limit, waiter).await {
            Ok(Ok(resolution)) => Ok(resolution),
            Ok(Err(_)) => Err(BrokerError::Withdrawn(request_id)),
            Err(_) => {
                tracing::warn!(request = %request_id, secs = limit.as_secs(), "approval timed out");
                match self.resolve(request_id, InterventionResponse::timed_out()) {
                    Ok(resolved) => resolved
                        .resolution
                        .ok_or(BrokerError::Withdrawn(request_id)),
                    // Lost the race against a human resolving at the deadline:
                    // their answer stands.
                    Err(BrokerError::AlreadyResolved(_)) => self
                        .get(request_id)
                        .and_then(|r| r.resolution)
                        .ok_or(BrokerError::Withdrawn(request_id)),
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Attach a response and wake the waiting mission.
    pub fn resolve(
        &self,
        request_id: RequestId,
        response: InterventionResponse,
    ) -> Result<HumanInterventionRequest, BrokerError> {
        let mut state = self.state();
        let Some(mut entry) = state.pending.remove(&request_id) else {
            return Err(match state.history.get(&request_id) {
                Some(r) if r.is_resolved() => BrokerError::AlreadyResolved(request_id),
                Some(_) => BrokerError::Withdrawn(request_id),
                None => BrokerError::UnknownRequest(request_id),
            });
        };
        state.by_mission.remove(&entry.request.mission_id);

        let resolution = Resolution {
            response,
            resolved_at: Utc::now(),
        };
        entry.request.resolution = Some(resolution.clone());
        state.history.push(entry.request.clone());

        tracing::info!(
            mission = %entry.request.mission_id,
            request = %request_id,
            action = resolution.response.action.name(),
            "approval resolved"
        );

        if let Some(waiter) = entry.waiter.take() {
            // The waiter may be gone (mission cancelled); the resolution
            // is still recorded.
            let _ = waiter.send(resolution);
        }
        Ok(entry.request)
    }

    /// Drop a pending request without resolving it; its waiter sees `Withdrawn`.
    pub fn withdraw(&self, request_id: RequestId) -> Result<HumanInterventionRequest, BrokerError> {
        let mut state = self.state();
        let Some(entry) = state.pending.remove(&request_id) else {
            return Err(if state.history.get(&request_id).is_some() {
                BrokerError::AlreadyResolved(request_id)
            } else {
                BrokerError::UnknownRequest(request_id)
            });
        };
        state.by_mission.remove(&entry.request.mission_id);
        state.history.push(entry.request.clone());
        tracing::debug!(request = %request_id, "approval request withdrawn");
        Ok(entry.request)
    }

    /// Unresolved requests, oldest first.
    pub fn pending(&self) -> Vec<HumanInterventionRequest> {
        let state = self.state();
        let mut requests: Vec<_> = state.pending.values().map(|p| p.request.clone()).collect();
        requests.sort_by_key(|r| r.created_at);
        requests
    }

    pub fn pending_for(&self, mission_id: MissionId) -> Option<HumanInterventionRequest> {
        let state = self.state();
        state
            .by_mission
            .get(&mission_id)
            .and_then(|id| state.pending.get(id))
            .map(|p| p.request.clone())
    }

    pub fn pending_count(&self, mission_id: MissionId) -> usize {
        usize::from(self.state().by_mission.contains_key(&mission_id))
    }

    /// Look up a request, pending or historical.
    pub fn get(&self, request_id: RequestId) -> Option<HumanInterventionRequest> {
        let state = self.state();
        state
            .pending
            .get(&request_id)
            .map(|p| p.request.clone())
            .or_else(|| state.history.get(&request_id).cloned())
    }

    /// Settled requests still remembered, oldest first.
    pub fn history(&self) -> Vec<HumanInterventionRequest> {
        self.state().history.ordered()
    }
}
