//! Server-side aggregation of gauges and counters.
//!
//! [`MetricStore`] is the aggregation contract. Two backings implement it
//! identically: [`memory::MemoryStore`] (paired with a
//! [`snapshot::SnapshotStore`] for durability) and [`sqlite::SqliteStore`]
//! (durable by itself). [`backend::Durability`] picks one at startup.

pub mod backend;
pub mod error;
pub mod memory;
pub mod snapshot;
pub mod sqlite;


use error::Result;
use statmon_common::types::{CounterSet, GaugeSet, Metric, MetricKind, MetricValue};

/// Full aggregate state at one point in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateState {
    pub gauges: GaugeSet,
    pub counters: CounterSet,
}

impl AggregateState {
    pub fn is_empty(&self) -> bool {
        self.gauges.is_empty() && self.counters.is_empty()
    }

    /// Flattens the state into metric records, gauges first, each kind in
    /// name order.
    pub fn to_metrics(&self) -> Vec<Metric> {
        self.gauges
            .iter()
            .map(|(name, v)| Metric::gauge(name.clone(), *v))
            .chain(
                self.counters
                    .iter()
                    .map(|(name, d)| Metric::counter(name.clone(), *d)),
            )
            .collect()
    }
}

/// The aggregation contract shared by every backing.
///
/// Gauges are last-write-wins; counters are additive and start at zero.
/// All mutation goes through these methods, and implementations serialize
/// it so that [`MetricStore::update_all`] is observed as all-or-nothing.
pub trait MetricStore: Send + Sync {
    /// Overwrites the gauge `name`.
    fn update_gauge(&self, name: &str, value: f64) -> Result<()>;

    /// Adds `delta` to the counter `name`, creating it at zero if absent.
    ///
    /// # Errors
    ///
    /// [`error::StorageError::CounterOverflow`] if the sum does not fit in
    /// an `i64`; the stored value is unchanged.
    fn update_counter(&self, name: &str, delta: i64) -> Result<()>;

    /// Applies a batch of gauge overwrites and counter additions as one
    /// unit. Either every entry is applied or none is.
    fn update_all(&self, gauges: &GaugeSet, counters: &CounterSet) -> Result<()>;

    /// Looks up one metric. `Ok(None)` means no such metric.
    fn get(&self, kind: MetricKind, name: &str) -> Result<Option<MetricValue>>;

    fn get_all(&self) -> Result<AggregateState>;

    /// Checks the backing is reachable.
    fn ping(&self) -> Result<()>;

    /// Short name for logs (`"memory"`, `"sqlite"`).
    fn backend_name(&self) -> &'static str;

    /// Applies a single metric according to its kind.
    fn apply(&self, metric: &Metric) -> Result<()> {
        match metric.value {
            MetricValue::Gauge(v) => self.update_gauge(&metric.id, v),
            MetricValue::Counter(d) => self.update_counter(&metric.id, d),
        }
    }
}
