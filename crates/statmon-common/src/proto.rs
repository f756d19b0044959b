//! Protobuf messages for the gRPC bulk-report service, plus the generated
//! `Metrics` client and server.
//!
//! A record carries either `value` (gauges) or `delta` (counters), exactly
//! like the JSON form; [`Metric`]'s validation applies to both.

use crate::types::{Metric, MetricError, MetricKind, RawMetric};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum MetricType {
    Unknown = 0,
    Gauge = 1,
    Counter = 2,
}

impl From<MetricKind> for MetricType {
    fn from(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Gauge => MetricType::Gauge,
            MetricKind::Counter => MetricType::Counter,
        }
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MetricRecord {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(enumeration = "MetricType", tag = "2")]
    pub r#type: i32,
    #[prost(int64, optional, tag = "3")]
    pub delta: Option<i64>,
    #[prost(double, optional, tag = "4")]
    pub value: Option<f64>,
    #[prost(string, optional, tag = "5")]
    pub hash: Option<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct BulkSaveRequest {
    #[prost(message, repeated, tag = "1")]
    pub metrics: Vec<MetricRecord>,
}

/// Distinct names applied per kind, after folding.
#[derive(Clone, PartialEq, prost::Message)]
pub struct BulkSaveResponse {
    #[prost(uint32, tag = "1")]
    pub gauges: u32,
    #[prost(uint32, tag = "2")]
    pub counters: u32,
}

impl From<&Metric> for MetricRecord {
    fn from(metric: &Metric) -> Self {
        let raw = RawMetric::from(metric.clone());
        MetricRecord {
            id: raw.id,
            r#type: MetricType::from(metric.kind()) as i32,
            delta: raw.delta,
            value: raw.value,
            hash: raw.hash,
        }
    }
}

impl TryFrom<MetricRecord> for Metric {
    type Error = MetricError;

    fn try_from(record: MetricRecord) -> Result<Self, Self::Error> {
        let kind = match MetricType::try_from(record.r#type) {
            Ok(MetricType::Gauge) => MetricKind::Gauge.as_str().to_string(),
            Ok(MetricType::Counter) => MetricKind::Counter.as_str().to_string(),
            Ok(MetricType::Unknown) | Err(_) => {
                return Err(MetricError::UnknownKind(format!("enum value {}", record.r#type)))
            }
        };
        Metric::try_from(RawMetric {
            id: record.id,
            kind,
            delta: record.delta,
            value: record.value,
            hash: record.hash,
        })
    }
}

include!(concat!(env!("OUT_DIR"), "/statmon.Metrics.rs"));

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MetricValue;
    use prost::Message;

    #[test]
    fn test_record_carries_kind_and_hash() {
        let mut metric = Metric::counter("PollCount", 4);
        metric.hash = Some("ab12".to_string());
        let record = MetricRecord::from(&metric);
        assert_eq!(record.r#type, MetricType::Counter as i32);
        assert_eq!(record.delta, Some(4));
        assert_eq!(record.value, None);

        let bytes = BulkSaveRequest {
            metrics: vec![record],
        }
        .encode_to_vec();
        let decoded = BulkSaveRequest::decode(bytes.as_slice()).unwrap();
        let back = Metric::try_from(decoded.metrics[0].clone()).unwrap();
        assert_eq!(back, metric);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let record = MetricRecord {
            id: "Alloc".to_string(),
            r#type: MetricType::Unknown as i32,
            value: Some(1.0),
            ..Default::default()
        };
        assert!(matches!(
            Metric::try_from(record.clone()),
            Err(MetricError::UnknownKind(_))
        ));
        let record = MetricRecord { r#type: 9, ..record };
        assert!(Metric::try_from(record).is_err());
    }

    #[test]
    fn test_gauge_without_value_rejected() {
        let record = MetricRecord {
            id: "Alloc".to_string(),
            r#type: MetricType::Gauge as i32,
            delta: Some(1),
            ..Default::default()
        };
        assert!(matches!(
            Metric::try_from(record),
            Err(MetricError::MissingField { field: "value", .. })
        ));
        let ok = MetricRecord {
            id: "Alloc".to_string(),
            r#type: MetricType::Gauge as i32,
            value: Some(2.5),
            ..Default::default()
        };
        assert_eq!(Metric::try_from(ok).unwrap().value, MetricValue::Gauge(2.5));
    }
}
