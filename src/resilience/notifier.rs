//! State-change notification dispatch.
//!
//! # Design Decisions
//! - One bounded queue and one dispatcher task per breaker
//! - Queued transitions are enqueued while the breaker lock is held, so
//!   observers see them in the order the breaker applied them
//! - A full queue drops the notification (logged and counted), the
//!   breaker never waits on an observer
//! - Without a Tokio runtime the callback runs inline after the breaker
//!   lock has been released; racing transitions may then arrive out of order

use std::fmt;
use std::sync::Arc;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::observability::metrics;
use crate::resilience::circuit_breaker::CircuitState;

/// A breaker transition, as delivered to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateTransition {
    pub instance: String,
    pub from: CircuitState,
    pub to: CircuitState,
}

/// Observer invoked for every breaker transition.
pub type StateChangeCallback = Arc<dyn Fn(&StateTransition) + Send + Sync>;

enum Dispatch {
    Queued(mpsc::Sender<StateTransition>),
    Inline(StateChangeCallback),
}

pub(crate) struct StateNotifier {
    dispatch: Dispatch,
}

impl StateNotifier {
    pub(crate) fn new(callback: StateChangeCallback, capacity: usize) -> Self {
        let dispatch = match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let (tx, mut rx) = mpsc::channel::<StateTransition>(capacity.max(1));
                handle.spawn(async move {
                    while let Some(transition) = rx.recv().await {
                        callback(&transition);
                    }
                });
                Dispatch::Queued(tx)
            }
            Err(_) => Dispatch::Inline(callback),
        };
        Self { dispatch }
    }

    /// Queue a transition for the dispatcher. Never blocks. In inline mode
    /// the transition is handed back for `deliver_inline`.
    pub(crate) fn enqueue(&self, transition: StateTransition) -> Option<StateTransition> {
        match &self.dispatch {
            Dispatch::Queued(tx) => match tx.try_send(transition) {
                Ok(()) => None,
                Err(TrySendError::Full(transition)) => {
                    tracing::warn!(
                        instance = %transition.instance,
                        from = %transition.from,
                        to = %transition.to,
                        "State-change queue full, notification dropped"
                    );
                    metrics::record_notification_dropped(&transition.instance);
                    None
                }
                Err(TrySendError::Closed(transition)) => {
                    tracing::warn!(
                        instance = %transition.instance,
                        "State-change dispatcher stopped, notification dropped"
                    );
                    metrics::record_notification_dropped(&transition.instance);
                    None
                }
            },
            Dispatch::Inline(_) => Some(transition),
        }
    }

    pub(crate) fn deliver_inline(&self, transition: &StateTransition) {
        if let Dispatch::Inline(callback) = &self.dispatch {
            callback(transition);
        }
    }
}

impl fmt::Debug for StateNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.dispatch {
            Dispatch::Queued(_) => "queued",
            Dispatch::Inline(_) => "inline",
        };
        f.debug_struct("StateNotifier").field("dispatch", &mode).finish()
    }
}
