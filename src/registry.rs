//! Shared table of started-but-unresolved authorization flows.
//!
//! The code path that starts a flow and the code path that receives the
//! redirect never call each other directly; they meet here. Every resolution
//! goes through [`PendingFlowRegistry::take`], which removes the entry under
//! the lock, so a flow's delivery closure runs at most once no matter how many
//! redirects, cancellations or expiries race for it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::{AccessToken, FlowFailure, FlowId, FlowOutcome};

type Deliver = Box<dyn FnOnce(FlowOutcome) + Send + 'static>;

/// How redirects are matched to pending flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoutingMode {
    /// One flow at a time. Registering a flow discards any other pending
    /// flow, and a redirect resolves whichever flow is current.
    #[default]
    Exclusive,
    /// Any number of flows; a redirect must carry the flow id as `state`.
    Correlated,
}

pub struct PendingFlow {
    deliver: Deliver,
    code_verifier: Option<String>,
}

impl PendingFlow {
    pub fn new<S, E>(on_success: S, on_error: E) -> Self
    where
        S: FnOnce(AccessToken) + Send + 'static,
        E: FnOnce(FlowFailure) + Send + 'static,
    {
        Self {
            deliver: Box::new(move |outcome| match outcome {
                FlowOutcome::Success(token) => on_success(token),
                FlowOutcome::Failure(failure) => on_error(failure),
            }),
            code_verifier: None,
        }
    }

    pub fn from_sender(sender: oneshot::Sender<FlowOutcome>) -> Self {
        Self {
            deliver: Box::new(move |outcome| {
                if sender.send(outcome).is_err() {
                    debug!("flow outcome receiver dropped before delivery");
                }
            }),
            code_verifier: None,
        }
    }

    pub fn with_code_verifier(mut self, code_verifier: impl Into<String>) -> Self {
        self.code_verifier = Some(code_verifier.into());
        self
    }

    pub fn code_verifier(&self) -> Option<&str> {
        self.code_verifier.as_deref()
    }

    pub fn resolve(self, outcome: FlowOutcome) {
        (self.deliver)(outcome)
    }
}

impl std::fmt::Debug for PendingFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingFlow")
            .field("pkce", &self.code_verifier.is_some())
            .finish_non_exhaustive()
    }
}

struct Entry {
    flow: PendingFlow,
    // Set once a redirect has claimed the flow's code.
    exchanging: bool,
    expiry: Option<AbortHandle>,
}

impl Entry {
    fn into_flow(self) -> PendingFlow {
        if let Some(expiry) = self.expiry {
            expiry.abort();
        }
        self.flow
    }
}

#[derive(Default)]
struct Slots {
    flows: HashMap<FlowId, Entry>,
    latest: Option<FlowId>,
}

impl Slots {
    fn routable(&self, id: &FlowId) -> bool {
        self.flows.get(id).is_some_and(|entry| !entry.exchanging)
    }
}

#[derive(Default)]
pub struct PendingFlowRegistry {
    mode: RoutingMode,
    slots: Mutex<Slots>,
}

impl PendingFlowRegistry {
    pub fn new(mode: RoutingMode) -> Self {
        Self {
            mode,
            slots: Mutex::default(),
        }
    }

    pub fn exclusive() -> Self {
        Self::new(RoutingMode::Exclusive)
    }

    pub fn correlated() -> Self {
        Self::new(RoutingMode::Correlated)
    }

    /// Process-wide exclusive registry for hosts whose redirect entry point
    /// cannot be handed a registry explicitly.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<PendingFlowRegistry>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| Arc::new(PendingFlowRegistry::exclusive()))
            .clone()
    }

    pub fn mode(&self) -> RoutingMode {
        self.mode
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        // Callbacks never run under the lock, so a poisoned guard still holds
        // consistent data.
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers `flow` under `id`. In exclusive mode every other pending flow
    /// is dropped without being invoked; their ids are returned.
    pub fn set(&self, id: FlowId, flow: PendingFlow) -> Vec<FlowId> {
        let entry = Entry {
            flow,
            exchanging: false,
            expiry: None,
        };
        let displaced: Vec<(FlowId, Entry)> = {
            let mut slots = self.slots();
            let mut displaced: Vec<_> = match self.mode {
                RoutingMode::Exclusive => slots.flows.drain().collect(),
                RoutingMode::Correlated => Vec::new(),
            };
            if let Some(previous) = slots.flows.insert(id.clone(), entry) {
                displaced.push((id.clone(), previous));
            }
            slots.latest = Some(id);
            displaced
        };
        // Dropped outside the lock; a discarded closure may hold this registry.
        displaced
            .into_iter()
            .map(|(old, entry)| {
                warn!(flow_id = %old, "pending flow replaced before it resolved");
                drop(entry.into_flow());
                old
            })
            .collect()
    }

    /// Ties the flow's expiry task to its lifetime; the task is aborted when
    /// the flow leaves the registry.
    pub fn attach_expiry(&self, id: &FlowId, expiry: AbortHandle) {
        let mut slots = self.slots();
        match slots.flows.get_mut(id) {
            Some(entry) => entry.expiry = Some(expiry),
            None => expiry.abort(),
        }
    }

    /// Picks the flow a redirect belongs to.
    pub fn route(&self, state: Option<&str>) -> Option<FlowId> {
        let slots = self.slots();
        match self.mode {
            RoutingMode::Exclusive => slots
                .latest
                .as_ref()
                .filter(|id| slots.routable(id))
                .cloned(),
            RoutingMode::Correlated => {
                let id = FlowId::from(state?);
                slots.routable(&id).then_some(id)
            }
        }
    }

    /// Claims the flow's code for a single token exchange. Returns the code
    /// verifier to send with it, or `None` when the flow is gone or another
    /// redirect already claimed it. A claimed flow stays registered, so it can
    /// still be cancelled or expire, but no longer routes redirects.
    pub fn begin_exchange(&self, id: &FlowId) -> Option<Option<String>> {
        let mut slots = self.slots();
        let entry = slots.flows.get_mut(id).filter(|entry| !entry.exchanging)?;
        entry.exchanging = true;
        Some(entry.flow.code_verifier.clone())
    }

    pub fn code_verifier(&self, id: &FlowId) -> Option<String> {
        self.slots()
            .flows
            .get(id)
            .and_then(|entry| entry.flow.code_verifier.clone())
    }

    /// Removes and returns the flow in one step.
    pub fn take(&self, id: &FlowId) -> Option<PendingFlow> {
        let entry = {
            let mut slots = self.slots();
            let entry = slots.flows.remove(id);
            if slots.latest.as_ref() == Some(id) {
                slots.latest = None;
            }
            entry
        };
        entry.map(Entry::into_flow)
    }

    /// Delivers `outcome` to the flow if it is still pending. Returns whether
    /// a callback ran.
    pub fn resolve(&self, id: &FlowId, outcome: FlowOutcome) -> bool {
        match self.take(id) {
            Some(flow) => {
                debug!(flow_id = %id, success = outcome.is_success(), "resolving flow");
                flow.resolve(outcome);
                true
            }
            None => {
                debug!(flow_id = %id, "flow already resolved; dropping outcome");
                false
            }
        }
    }

    pub fn consume_success(&self, token: AccessToken) -> bool {
        self.resolve_current(FlowOutcome::Success(token))
    }

    pub fn consume_error(&self, failure: FlowFailure) -> bool {
        self.resolve_current(FlowOutcome::Failure(failure))
    }

    fn resolve_current(&self, outcome: FlowOutcome) -> bool {
        let current = self.slots().latest.clone();
        match current {
            Some(id) => self.resolve(&id, outcome),
            None => {
                debug!("no pending flow; dropping outcome");
                false
            }
        }
    }

    pub fn is_pending(&self, id: &FlowId) -> bool {
        self.slots().flows.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.slots().flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for PendingFlowRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingFlowRegistry")
            .field("mode", &self.mode)
            .field("pending", &self.len())
            .finish()
    }
}
