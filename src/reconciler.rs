// Counter reconciliation: raw kernel/firewall counters reset to zero when an interface, a firewall
// rule or the host restarts. A scope's raw reading is made of several such counters (interfaces,
// tcp/udp rules), each of which can reset on its own, so every component is tracked separately and
// only the accumulated deltas are summed. The stored series never decreases.
//
// Accuracy bound: when a component resets, the bytes it counted between its last observed value and
// the reset are lost. A component seen for the first time after seeding contributes only what it
// counts from then on.

use std::collections::HashMap;

use crate::models::{CounterPair, CounterReading, Scope};

/// Bytes a single counter moved from `last` to `raw`. A drop means the counter restarted from zero.
fn counter_delta(last: u64, raw: u64) -> u64 {
    if raw >= last { raw - last } else { raw }
}

#[derive(Debug, Clone, Default)]
struct ScopeState {
    /// Reconciled cumulative value last returned.
    total: CounterPair,
    /// Last raw value of every component seen so far, including ones that have since vanished.
    last_raw: HashMap<String, CounterPair>,
}

impl ScopeState {
    fn seeded(raw: &CounterReading, stored: Option<CounterPair>) -> Self {
        let sum = raw.total();
        let total = match stored {
            Some(stored) => CounterPair::new(sum.tx.max(stored.tx), sum.rx.max(stored.rx)),
            None => sum,
        };
        Self {
            total,
            last_raw: raw
                .components()
                .map(|(key, counters)| (key.to_string(), counters))
                .collect(),
        }
    }

    fn advance(&mut self, raw: &CounterReading) -> CounterPair {
        for (key, counters) in raw.components() {
            match self.last_raw.get_mut(key) {
                Some(last) => {
                    self.total = self.total.saturating_add(CounterPair::new(
                        counter_delta(last.tx, counters.tx),
                        counter_delta(last.rx, counters.rx),
                    ));
                    *last = counters;
                }
                None => {
                    self.last_raw.insert(key.to_string(), counters);
                }
            }
        }
        self.total
    }
}

/// Per-scope reconciliation state. Owned by the traffic sampler; no interior locking.
#[derive(Debug, Default)]
pub struct CounterReconciler {
    scopes: HashMap<Scope, ScopeState>,
}

impl CounterReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the scope has a baseline (seeded or reconciled at least once).
    pub fn is_tracking(&self, scope: &Scope) -> bool {
        self.scopes.contains_key(scope)
    }

    /// Establish the baseline for a scope from the first raw reading since process start and the most
    /// recently stored (already reconciled) value. The series resumes from whichever is higher per
    /// direction, so a source that restarted while we were down does not rewind it.
    pub fn seed(
        &mut self,
        scope: &Scope,
        raw: impl Into<CounterReading>,
        last_stored: Option<CounterPair>,
    ) {
        self.scopes
            .insert(*scope, ScopeState::seeded(&raw.into(), last_stored));
    }

    /// Fold one raw reading into the scope's state and return the monotonic value to store.
    /// An unseeded scope starts from the reading's own sum.
    pub fn reconcile(&mut self, scope: &Scope, raw: impl Into<CounterReading>) -> CounterPair {
        let raw = raw.into();
        match self.scopes.get_mut(scope) {
            Some(state) => state.advance(&raw),
            None => {
                let state = ScopeState::seeded(&raw, None);
                let total = state.total;
                self.scopes.insert(*scope, state);
                total
            }
        }
    }

    pub fn forget(&mut self, scope: &Scope) {
        self.scopes.remove(scope);
    }
}
