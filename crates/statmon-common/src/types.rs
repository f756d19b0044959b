use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Gauge values keyed by metric name.
pub type GaugeSet = BTreeMap<String, f64>;

/// Counter deltas (or totals, depending on context) keyed by metric name.
pub type CounterSet = BTreeMap<String, i64>;

/// Name of the counter the agent uses to report how many polls ran.
pub const POLL_COUNT: &str = "PollCount";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetricError {
    #[error("unknown metric kind: {0}")]
    UnknownKind(String),

    #[error("metric id must not be empty")]
    EmptyId,

    #[error("metric '{id}' of kind {kind} requires field '{field}'")]
    MissingField {
        id: String,
        kind: MetricKind,
        field: &'static str,
    },

    #[error("metric '{id}' of kind {kind} must not carry field '{field}'")]
    UnexpectedField {
        id: String,
        kind: MetricKind,
        field: &'static str,
    },

    #[error("invalid {kind} value: {raw:?}")]
    InvalidNumber { kind: MetricKind, raw: String },

    #[error("counter '{0}' overflowed")]
    CounterOverflow(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = MetricError;

    /// Accepts `gauge`/`counter` in any letter case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("gauge") {
            Ok(MetricKind::Gauge)
        } else if s.eq_ignore_ascii_case("counter") {
            Ok(MetricKind::Counter)
        } else {
            Err(MetricError::UnknownKind(s.to_string()))
        }
    }
}

/// The numeric payload of a metric. The variant fixes the kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Gauge(f64),
    Counter(i64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Gauge(_) => MetricKind::Gauge,
            MetricValue::Counter(_) => MetricKind::Counter,
        }
    }

    /// Parses the scalar from a URL segment such as `/update/gauge/Alloc/12.5`.
    pub fn parse(kind: MetricKind, raw: &str) -> Result<Self, MetricError> {
        let invalid = || MetricError::InvalidNumber {
            kind,
            raw: raw.to_string(),
        };
        match kind {
            MetricKind::Gauge => {
                let v: f64 = raw.trim().parse().map_err(|_| invalid())?;
                if !v.is_finite() {
                    return Err(invalid());
                }
                Ok(MetricValue::Gauge(v))
            }
            MetricKind::Counter => raw
                .trim()
                .parse()
                .map(MetricValue::Counter)
                .map_err(|_| invalid()),
        }
    }
}

impl fmt::Display for MetricValue {
    /// Gauges print in shortest round-trip form (`120.5`, not `120.500000`).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Gauge(v) => write!(f, "{v}"),
            MetricValue::Counter(d) => write!(f, "{d}"),
        }
    }
}

/// The unit of transport and storage.
///
/// On the wire a metric is `{"id", "type", "value"?, "delta"?, "hash"?}`;
/// deserialization rejects records where the present field does not match
/// `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMetric", into = "RawMetric")]
pub struct Metric {
    pub id: String,
    pub value: MetricValue,
    pub hash: Option<String>,
}

impl Metric {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            value: MetricValue::Gauge(value),
            hash: None,
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            value: MetricValue::Counter(delta),
            hash: None,
        }
    }

    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }
}

/// A metric record as it appears on the wire, before validation.
///
/// Decode into this when the caller needs to tell an unknown `type` apart
/// from other malformed input; [`Metric::try_from`] does the validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMetric {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl TryFrom<RawMetric> for Metric {
    type Error = MetricError;

    fn try_from(wire: RawMetric) -> Result<Self, Self::Error> {
        if wire.id.is_empty() {
            return Err(MetricError::EmptyId);
        }
        let kind: MetricKind = wire.kind.parse()?;
        let value = match (kind, wire.value, wire.delta) {
            (MetricKind::Gauge, Some(v), None) => MetricValue::Gauge(v),
            (MetricKind::Counter, None, Some(d)) => MetricValue::Counter(d),
            (MetricKind::Gauge, None, _) => {
                return Err(MetricError::MissingField {
                    id: wire.id,
                    kind,
                    field: "value",
                })
            }
            (MetricKind::Gauge, Some(_), Some(_)) => {
                return Err(MetricError::UnexpectedField {
                    id: wire.id,
                    kind,
                    field: "delta",
                })
            }
            (MetricKind::Counter, _, None) => {
                return Err(MetricError::MissingField {
                    id: wire.id,
                    kind,
                    field: "delta",
                })
            }
            (MetricKind::Counter, Some(_), Some(_)) => {
                return Err(MetricError::UnexpectedField {
                    id: wire.id,
                    kind,
                    field: "value",
                })
            }
        };
        Ok(Metric {
            id: wire.id,
            value,
            hash: wire.hash.filter(|h| !h.is_empty()),
        })
    }
}

impl From<Metric> for RawMetric {
    fn from(m: Metric) -> Self {
        let (value, delta) = match m.value {
            MetricValue::Gauge(v) => (Some(v), None),
            MetricValue::Counter(d) => (None, Some(d)),
        };
        RawMetric {
            id: m.id,
            kind: m.value.kind().as_str().to_string(),
            delta,
            value,
            hash: m.hash,
        }
    }
}

/// A read-back request: names a metric without carrying a value.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricQuery {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Folds a batch into per-kind sets: gauges keep the last value seen,
/// counters sum their deltas.
pub fn fold_batch(batch: &[Metric]) -> Result<(GaugeSet, CounterSet), MetricError> {
    let mut gauges = GaugeSet::new();
    let mut counters = CounterSet::new();
    for metric in batch {
        match metric.value {
            MetricValue::Gauge(v) => {
                gauges.insert(metric.id.clone(), v);
            }
            MetricValue::Counter(d) => {
                let slot = counters.entry(metric.id.clone()).or_insert(0);
                *slot = slot
                    .checked_add(d)
                    .ok_or_else(|| MetricError::CounterOverflow(metric.id.clone()))?;
            }
        }
    }
    Ok((gauges, counters))
}
