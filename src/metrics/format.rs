//! OTLP/HTTP JSON envelope for a single metric record.
//!
//! ```text
//! resourceMetrics[0].scopeMetrics[0].metrics[0] = {
//!   name, unit,
//!   sum:   { dataPoints: [{ timeUnixNano, attributes, asInt }],
//!            aggregationTemporality, isMonotonic }
//!   gauge: { dataPoints: [{ timeUnixNano, attributes, asDouble }] }
//! }
//! ```

use serde::Serialize;

use super::{MetricKind, MetricRecord};

const CUMULATIVE: &str = "AGGREGATION_TEMPORALITY_CUMULATIVE";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<'a> {
    resource_metrics: [ResourceMetrics<'a>; 1],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResourceMetrics<'a> {
    scope_metrics: [ScopeMetrics<'a>; 1],
}

#[derive(Debug, Serialize)]
struct ScopeMetrics<'a> {
    metrics: [Metric<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Metric<'a> {
    name: &'a str,
    unit: &'a str,
    #[serde(flatten)]
    data: MetricData<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum MetricData<'a> {
    Sum(SumData<'a>),
    Gauge(GaugeData<'a>),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SumData<'a> {
    data_points: [DataPoint<'a>; 1],
    aggregation_temporality: &'static str,
    is_monotonic: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GaugeData<'a> {
    data_points: [DataPoint<'a>; 1],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DataPoint<'a> {
    time_unix_nano: u64,
    attributes: Vec<KeyValue<'a>>,
    #[serde(flatten)]
    value: PointValue,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum PointValue {
    AsInt(i64),
    AsDouble(f64),
}

#[derive(Debug, Serialize)]
struct KeyValue<'a> {
    key: &'a str,
    value: AnyValue<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnyValue<'a> {
    string_value: &'a str,
}

/// Wrap one record in its own resource/scope/metric envelope, stamped at
/// `time_unix_nano`.
pub fn format_record(record: &MetricRecord, time_unix_nano: u64) -> Envelope<'_> {
    let attributes = record
        .attributes
        .iter()
        .map(|(k, v)| KeyValue {
            key: k,
            value: AnyValue { string_value: v },
        })
        .collect();

    let data = match record.kind {
        MetricKind::Sum => MetricData::Sum(SumData {
            data_points: [DataPoint {
                time_unix_nano,
                attributes,
                value: PointValue::AsInt(record.value.as_i64()),
            }],
            aggregation_temporality: CUMULATIVE,
            is_monotonic: true,
        }),
        // Whole-number gauges still go out as doubles.
        MetricKind::Gauge => MetricData::Gauge(GaugeData {
            data_points: [DataPoint {
                time_unix_nano,
                attributes,
                value: PointValue::AsDouble(record.value.as_f64()),
            }],
        }),
    };

    Envelope {
        resource_metrics: [ResourceMetrics {
            scope_metrics: [ScopeMetrics {
                metrics: [Metric {
                    name: &record.name,
                    unit: &record.unit,
                    data,
                }],
            }],
        }],
    }
}

/// One envelope per record, all sharing the same timestamp.
pub fn format_snapshot(records: &[MetricRecord], time_unix_nano: u64) -> Vec<Envelope<'_>> {
    records
        .iter()
        .map(|r| format_record(r, time_unix_nano))
        .collect()
}

/// Wall-clock nanoseconds since the Unix epoch.
pub fn now_unix_nano() -> u64 {
    chrono::Utc::now()
        .timestamp_nanos_opt()
        .and_then(|n| u64::try_from(n).ok())
        .unwrap_or_default()
}
