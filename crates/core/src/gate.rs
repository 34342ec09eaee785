use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::event::InboundEvent;

/// Outcome of offering an event to the gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Duplicate,
}

/// Duplicate-delivery gate. Chat platforms redeliver events on slow or failed
/// acknowledgments; the gate ensures each delivery identity is processed once.
///
/// The tracking set is swept as a whole on a fixed interval rather than
/// expiring entries individually, so protection is weakest immediately after
/// a sweep boundary. Duplicates arriving across a sweep are re-admitted.
pub struct EventGate {
    sweep_interval: Duration,
    state: Mutex<GateState>,
}

struct GateState {
    seen: HashSet<String>,
    last_sweep: Instant,
}

impl EventGate {
    pub fn new(sweep_interval: Duration) -> Self {
        Self {
            sweep_interval,
            state: Mutex::new(GateState { seen: HashSet::new(), last_sweep: Instant::now() }),
        }
    }

    /// Admit or drop one event. Duplicates are not errors: the caller drops
    /// them silently with no reply.
    pub fn admit(&self, event: &InboundEvent) -> Admission {
        self.admit_key(&event.dedup_key())
    }

    pub fn admit_key(&self, key: &str) -> Admission {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if state.last_sweep.elapsed() >= self.sweep_interval {
            state.seen.clear();
            state.last_sweep = Instant::now();
        }

        if state.seen.insert(key.to_owned()) {
            Admission::Accepted
        } else {
            Admission::Duplicate
        }
    }

    /// Number of delivery identities currently tracked.
    pub fn tracked(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).seen.len()
    }
}
