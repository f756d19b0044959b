use crate::error::{Result, StorageError};
use crate::{AggregateState, MetricStore};
use statmon_common::types::{CounterSet, GaugeSet, MetricKind, MetricValue};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// In-memory backing. One lock guards both maps so a reader never sees half
/// of an [`MetricStore::update_all`].
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<AggregateState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, AggregateState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, AggregateState> {
        self.state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn add_checked(current: i64, name: &str, delta: i64) -> Result<i64> {
    current
        .checked_add(delta)
        .ok_or_else(|| StorageError::CounterOverflow {
            name: name.to_string(),
        })
}

impl MetricStore for MemoryStore {
    fn update_gauge(&self, name: &str, value: f64) -> Result<()> {
        self.write().gauges.insert(name.to_string(), value);
        Ok(())
    }

    fn update_counter(&self, name: &str, delta: i64) -> Result<()> {
        let mut state = self.write();
        let current = state.counters.get(name).copied().unwrap_or(0);
        let next = add_checked(current, name, delta)?;
        state.counters.insert(name.to_string(), next);
        Ok(())
    }

    fn update_all(&self, gauges: &GaugeSet, counters: &CounterSet) -> Result<()> {
        let mut state = self.write();
        // Compute every new counter total before touching either map so an
        // overflow leaves the state untouched.
        let mut totals = Vec::with_capacity(counters.len());
        for (name, delta) in counters {
            let current = state.counters.get(name).copied().unwrap_or(0);
            totals.push((name, add_checked(current, name, *delta)?));
        }
        for (name, value) in gauges {
            state.gauges.insert(name.clone(), *value);
        }
        for (name, total) in totals {
            state.counters.insert(name.clone(), total);
        }
        Ok(())
    }

    fn get(&self, kind: MetricKind, name: &str) -> Result<Option<MetricValue>> {
        let state = self.read();
        Ok(match kind {
            MetricKind::Gauge => state.gauges.get(name).copied().map(MetricValue::Gauge),
            MetricKind::Counter => state.counters.get(name).copied().map(MetricValue::Counter),
        })
    }

    fn get_all(&self) -> Result<AggregateState> {
        Ok(self.read().clone())
    }

    fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
