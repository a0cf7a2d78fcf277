//! ---
//! simtap_section: "01-telemetry-client"
//! simtap_subsection: "module"
//! simtap_type: "source"
//! simtap_scope: "code"
//! simtap_description: "Client counters, round-trip latency and the Prometheus exporter."
//! simtap_version: "v0.0.0-prealpha"
//! simtap_owner: "tbd"
//! ---
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry};

/// Counted client activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCounter {
    SessionsOpened,
    RequestsSent,
    SamplesDecoded,
    UnknownReplies,
    DecodeFailures,
    RegistrationFailures,
    HostExceptions,
    TransportFaults,
}

impl ClientCounter {
    const ALL: [ClientCounter; 8] = [
        ClientCounter::SessionsOpened,
        ClientCounter::RequestsSent,
        ClientCounter::SamplesDecoded,
        ClientCounter::UnknownReplies,
        ClientCounter::DecodeFailures,
        ClientCounter::RegistrationFailures,
        ClientCounter::HostExceptions,
        ClientCounter::TransportFaults,
    ];

    fn index(self) -> usize {
        self as usize
    }

    fn metric(self) -> (&'static str, &'static str) {
        match self {
            ClientCounter::SessionsOpened => {
                ("simtap_sessions_opened_total", "Host sessions confirmed by the host")
            }
            ClientCounter::RequestsSent => {
                ("simtap_requests_sent_total", "Data requests handed to the transport")
            }
            ClientCounter::SamplesDecoded => {
                ("simtap_samples_decoded_total", "Replies decoded and published")
            }
            ClientCounter::UnknownReplies => (
                "simtap_unknown_replies_total",
                "Replies carrying a request id the client never issued",
            ),
            ClientCounter::DecodeFailures => (
                "simtap_decode_failures_total",
                "Replies too short for the registered layout",
            ),
            ClientCounter::RegistrationFailures => (
                "simtap_registration_failures_total",
                "Fields refused by the host during registration",
            ),
            ClientCounter::HostExceptions => {
                ("simtap_host_exceptions_total", "Exceptions reported by the host")
            }
            ClientCounter::TransportFaults => (
                "simtap_transport_faults_total",
                "Corrupted-state faults downgraded to a disconnect",
            ),
        }
    }
}

/// Snapshot of client counters used by dashboards and the daemon summary.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClientMetricsSnapshot {
    /// Sessions confirmed by the host.
    pub sessions_opened: u64,
    /// Data requests handed to the transport.
    pub requests_sent: u64,
    /// Replies decoded and published.
    pub samples_decoded: u64,
    /// Replies carrying an unexpected request id.
    pub unknown_replies: u64,
    /// Replies too short for the registered layout.
    pub decode_failures: u64,
    /// Fields the host refused during registration.
    pub registration_failures: u64,
    /// Exceptions reported by the host.
    pub host_exceptions: u64,
    /// Corrupted-state faults downgraded to a disconnect.
    pub transport_faults: u64,
    /// Round trip of the most recent matched reply.
    pub last_latency: Duration,
    /// Longest observed round trip.
    pub max_latency: Duration,
}

/// Prometheus metric handles mirroring [`ClientMetrics`].
pub struct ClientMetricsExporter {
    counters: Vec<IntCounter>,
    latency: Histogram,
}

impl fmt::Debug for ClientMetricsExporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientMetricsExporter")
            .field("counters", &self.counters.len())
            .finish_non_exhaustive()
    }
}

impl ClientMetricsExporter {
    /// Register the client metrics with the provided registry.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let mut counters = Vec::with_capacity(ClientCounter::ALL.len());
        for counter in ClientCounter::ALL {
            let (name, help) = counter.metric();
            let handle = IntCounter::with_opts(Opts::new(name, help))?;
            registry.register(Box::new(handle.clone()))?;
            counters.push(handle);
        }
        let latency = Histogram::with_opts(
            HistogramOpts::new(
                "simtap_request_roundtrip_latency_seconds",
                "Time between a data request and its matched reply",
            )
            .buckets(prometheus::exponential_buckets(0.0005, 2.0, 14)?),
        )?;
        registry.register(Box::new(latency.clone()))?;
        Ok(Self { counters, latency })
    }

    fn inc(&self, counter: ClientCounter) {
        self.counters[counter.index()].inc();
    }

    fn observe_latency(&self, latency: Duration) {
        self.latency.observe(latency.as_secs_f64());
    }
}

/// Monotonic counters updated by the client.
///
/// Always kept in process for [`ClientMetrics::snapshot`]; mirrored into
/// Prometheus once an exporter is attached.
#[derive(Debug, Default)]
pub struct ClientMetrics {
    counters: [AtomicU64; 8],
    last_latency_us: AtomicU64,
    max_latency_us: AtomicU64,
    exporter: Option<ClientMetricsExporter>,
}

impl ClientMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mirror every later update into `exporter`.
    pub fn attach_exporter(&mut self, exporter: ClientMetricsExporter) {
        self.exporter = Some(exporter);
    }

    pub(crate) fn incr(&self, counter: ClientCounter) {
        self.counters[counter.index()].fetch_add(1, Ordering::Relaxed);
        if let Some(exporter) = &self.exporter {
            exporter.inc(counter);
        }
    }

    pub(crate) fn observe_latency(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.last_latency_us.store(micros, Ordering::Relaxed);
        self.max_latency_us.fetch_max(micros, Ordering::Relaxed);
        if let Some(exporter) = &self.exporter {
            exporter.observe_latency(latency);
        }
    }

    /// Current value of one counter.
    pub fn count(&self, counter: ClientCounter) -> u64 {
        self.counters[counter.index()].load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ClientMetricsSnapshot {
        ClientMetricsSnapshot {
            sessions_opened: self.count(ClientCounter::SessionsOpened),
            requests_sent: self.count(ClientCounter::RequestsSent),
            samples_decoded: self.count(ClientCounter::SamplesDecoded),
            unknown_replies: self.count(ClientCounter::UnknownReplies),
            decode_failures: self.count(ClientCounter::DecodeFailures),
            registration_failures: self.count(ClientCounter::RegistrationFailures),
            host_exceptions: self.count(ClientCounter::HostExceptions),
            transport_faults: self.count(ClientCounter::TransportFaults),
            last_latency: Duration::from_micros(self.last_latency_us.load(Ordering::Relaxed)),
            max_latency: Duration::from_micros(self.max_latency_us.load(Ordering::Relaxed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_tracks_last_and_max() {
        let metrics = ClientMetrics::new();
        metrics.observe_latency(Duration::from_millis(12));
        metrics.observe_latency(Duration::from_millis(3));
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.last_latency, Duration::from_millis(3));
        assert_eq!(snapshot.max_latency, Duration::from_millis(12));
    }

    #[test]
    fn counters_start_at_zero() {
        let metrics = ClientMetrics::new();
        metrics.incr(ClientCounter::RequestsSent);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_sent, 1);
        assert_eq!(snapshot.samples_decoded, 0);
    }

    #[test]
    fn exporter_mirrors_counters_and_latency() {
        let registry = Registry::new();
        let mut metrics = ClientMetrics::new();
        metrics.attach_exporter(ClientMetricsExporter::register(&registry).expect("register metrics"));
        metrics.incr(ClientCounter::HostExceptions);
        metrics.incr(ClientCounter::HostExceptions);
        metrics.observe_latency(Duration::from_millis(10));

        let families = registry.gather();
        let exceptions = families
            .iter()
            .find(|f| f.get_name() == "simtap_host_exceptions_total")
            .expect("exceptions counter registered");
        assert_eq!(exceptions.get_metric()[0].get_counter().get_value(), 2.0);
        let latency = families
            .iter()
            .find(|f| f.get_name() == "simtap_request_roundtrip_latency_seconds")
            .expect("latency histogram registered");
        assert_eq!(latency.get_metric()[0].get_histogram().get_sample_count(), 1);
        assert_eq!(metrics.count(ClientCounter::HostExceptions), 2);
    }

    #[test]
    fn registering_twice_on_one_registry_fails() {
        let registry = Registry::new();
        ClientMetricsExporter::register(&registry).expect("first registration");
        assert!(ClientMetricsExporter::register(&registry).is_err());
    }
}
