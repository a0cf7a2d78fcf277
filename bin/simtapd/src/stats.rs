//! ---
//! simtap_section: "02-daemon"
//! simtap_subsection: "module"
//! simtap_type: "source"
//! simtap_scope: "code"
//! simtap_description: "Per-field min/max tracking and the end-of-run summary."
//! simtap_version: "v0.0.0-prealpha"
//! simtap_owner: "tbd"
//! ---
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use simtap_core::{ClientMetricsSnapshot, DataSample};

/// Running statistics for one field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldStats {
    /// Reply slot the value was decoded from.
    pub slot: usize,
    pub name: String,
    pub unit: String,
    pub samples: u64,
    pub last: f64,
    pub min: f64,
    pub max: f64,
}

impl FieldStats {
    fn new(slot: usize, name: &str, unit: String, value: f64) -> Self {
        Self {
            slot,
            name: name.to_owned(),
            unit,
            samples: 1,
            last: value,
            min: value,
            max: value,
        }
    }

    fn observe(&mut self, value: f64) {
        self.samples += 1;
        self.last = value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }
}

/// Statistics over everything the daemon received.
///
/// Fields are keyed by reply slot and declaration, so a datum declared twice
/// keeps two entries.
#[derive(Debug, Default)]
pub struct TelemetryStatistics {
    fields: IndexMap<(usize, String), FieldStats>,
    ticks: u64,
    connects: u64,
    disconnects: u64,
    unknown_replies: u64,
    last_sample_at: Option<DateTime<Utc>>,
}

impl TelemetryStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sample(&mut self, sample: &DataSample) {
        self.ticks += 1;
        self.last_sample_at = Some(Utc::now());
        for (slot, field) in sample.fields.iter().enumerate() {
            let key = (slot, field.declaration.to_string());
            match self.fields.get_mut(&key) {
                Some(stats) => stats.observe(field.value),
                None => {
                    let stats =
                        FieldStats::new(slot, field.name(), field.unit().to_string(), field.value);
                    self.fields.insert(key, stats);
                }
            }
        }
    }

    pub fn record_connect(&mut self) {
        self.connects += 1;
    }

    pub fn record_disconnect(&mut self) {
        self.disconnects += 1;
    }

    pub fn record_unknown_reply(&mut self) {
        self.unknown_replies += 1;
    }

    /// Decoded samples seen so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Stats for `declaration` (`NAME [UNIT]`) decoded from reply slot `slot`.
    pub fn field(&self, slot: usize, declaration: &str) -> Option<&FieldStats> {
        self.fields.get(&(slot, declaration.to_owned()))
    }

    pub fn summary(&self, metrics: &ClientMetricsSnapshot) -> RunSummary {
        RunSummary {
            ticks: self.ticks,
            connects: self.connects,
            disconnects: self.disconnects,
            unknown_replies: self.unknown_replies,
            last_sample_at: self.last_sample_at,
            last_latency_ms: millis(metrics.last_latency),
            max_latency_ms: millis(metrics.max_latency),
            requests_sent: metrics.requests_sent,
            decode_failures: metrics.decode_failures,
            registration_failures: metrics.registration_failures,
            host_exceptions: metrics.host_exceptions,
            transport_faults: metrics.transport_faults,
            fields: self.fields.values().cloned().collect(),
        }
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_micros() as f64 / 1_000.0
}

/// End-of-run report, logged and optionally written as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub ticks: u64,
    pub connects: u64,
    pub disconnects: u64,
    pub unknown_replies: u64,
    pub last_sample_at: Option<DateTime<Utc>>,
    pub last_latency_ms: f64,
    pub max_latency_ms: f64,
    pub requests_sent: u64,
    pub decode_failures: u64,
    pub registration_failures: u64,
    pub host_exceptions: u64,
    pub transport_faults: u64,
    pub fields: Vec<FieldStats>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use simtap_core::{FieldDeclaration, FieldValue, Unit};

    fn sample(sequence: u64, airspeed: f64, altitude: f64) -> DataSample {
        DataSample {
            sequence,
            fields: vec![
                FieldValue {
                    declaration: FieldDeclaration::new("AIRSPEED INDICATED", Unit::Knots),
                    value: airspeed,
                },
                FieldValue {
                    declaration: FieldDeclaration::new("PLANE ALTITUDE", Unit::Feet),
                    value: altitude,
                },
            ],
            latency: Some(Duration::from_millis(4)),
        }
    }

    #[test]
    fn tracks_min_max_and_last() {
        let mut stats = TelemetryStatistics::new();
        stats.record_sample(&sample(1, 90.0, 1000.0));
        stats.record_sample(&sample(2, 110.0, 800.0));
        stats.record_sample(&sample(3, 100.0, 900.0));

        let airspeed = stats.field(0, "AIRSPEED INDICATED [KNOTS]").expect("tracked");
        assert_eq!(airspeed.samples, 3);
        assert_eq!((airspeed.min, airspeed.max, airspeed.last), (90.0, 110.0, 100.0));
        let altitude = stats.field(1, "PLANE ALTITUDE [FEET]").expect("tracked");
        assert_eq!((altitude.min, altitude.max), (800.0, 1000.0));
        assert_eq!(stats.ticks(), 3);
    }

    #[test]
    fn duplicate_declarations_keep_separate_stats() {
        let declaration = FieldDeclaration::new("PLANE ALTITUDE", Unit::Feet);
        let duplicated = DataSample {
            sequence: 1,
            fields: vec![
                FieldValue {
                    declaration: declaration.clone(),
                    value: 1000.0,
                },
                FieldValue {
                    declaration,
                    value: 1200.0,
                },
            ],
            latency: None,
        };
        let mut stats = TelemetryStatistics::new();
        stats.record_sample(&duplicated);

        let first = stats.field(0, "PLANE ALTITUDE [FEET]").expect("first slot");
        let second = stats.field(1, "PLANE ALTITUDE [FEET]").expect("second slot");
        assert_eq!((first.samples, first.last), (1, 1000.0));
        assert_eq!((second.samples, second.last), (1, 1200.0));
        assert_eq!(stats.summary(&ClientMetricsSnapshot::default()).fields.len(), 2);
    }

    #[test]
    fn summary_keeps_declaration_order_and_serializes() {
        let mut stats = TelemetryStatistics::new();
        stats.record_connect();
        stats.record_sample(&sample(1, 90.0, 1000.0));
        let metrics = ClientMetricsSnapshot {
            requests_sent: 1,
            max_latency: Duration::from_millis(4),
            ..ClientMetricsSnapshot::default()
        };
        let summary = stats.summary(&metrics);
        assert_eq!(summary.fields[0].name, "AIRSPEED INDICATED");
        assert_eq!(summary.fields[1].unit, "FEET");
        assert_eq!(summary.max_latency_ms, 4.0);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["connects"], 1);
        assert_eq!(json["fields"][0]["max"], 90.0);
    }
}
