use std::{collections::BTreeMap, fmt::Debug, time::Duration};

use serde::{Serialize, de::DeserializeOwned};

use crate::{
    Metric,
    macros::aggregate,
    metric::{RequestMetric, SessionMetric},
};

/// The `Aggregate` trait defines how raw [`Metric`] values are collected and
/// combined into a compact, mergeable representation.
///
/// Every worker owns its own aggregate and feeds it the metrics produced by the
/// scenario action. When the run ends the executor merges all worker-local
/// aggregates into one.
///
/// Aggregates keep counters, sums and extremes only. Derived values such as
/// averages and ratios belong in a [`crate::Report`], which is built from the
/// final aggregate.
///
/// # Implementor notes
/// - `merge` must be **associative** and **commutative**: worker aggregates are
///   merged in arbitrary order.
/// - `new` must return the identity element of `merge`.
pub trait Aggregate
where
    Self: Serialize + DeserializeOwned + PartialOrd + PartialEq + Send + Sync + Debug + Clone,
{
    /// The metric type this aggregate summarizes.
    type Metric: Metric;

    /// Create a new, empty instance of the aggregate.
    fn new() -> Self;

    /// Aggregate multiple metrics into the current instance.
    fn aggregate(&mut self, metrics: &[Self::Metric]) {
        metrics.iter().for_each(|m| self.consume(m));
    }

    /// Incorporate a single metric into the aggregate.
    fn consume(&mut self, metric: &Self::Metric);

    /// Combine two different aggregates into one.
    fn merge(&mut self, other: Self);
}

/// Counters for a single endpoint (`METHOD path`).
#[aggregate]
#[derive(Default)]
pub struct EndpointStats {
    pub requests: u64,
    pub failures: u64,
    pub total_latency: Duration,
    /// `None` until the first request is recorded.
    pub min_latency: Option<Duration>,
    pub max_latency: Duration,
    pub total_bytes: u64,
    /// Responses received, keyed by status code. Transport errors have no entry.
    pub status_codes: BTreeMap<u16, u64>,
}

impl EndpointStats {
    pub fn record(&mut self, metric: &RequestMetric) {
        self.requests += 1;
        if !metric.success {
            self.failures += 1;
        }
        self.total_latency += metric.latency;
        self.min_latency = Some(match self.min_latency {
            Some(min) => min.min(metric.latency),
            None => metric.latency,
        });
        self.max_latency = self.max_latency.max(metric.latency);
        self.total_bytes += metric.bytes as u64;
        if let Some(status) = metric.status {
            *self.status_codes.entry(status).or_default() += 1;
        }
    }

    pub fn merge(&mut self, other: Self) {
        self.requests += other.requests;
        self.failures += other.failures;
        self.total_latency += other.total_latency;
        self.min_latency = match (self.min_latency, other.min_latency) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max_latency = self.max_latency.max(other.max_latency);
        self.total_bytes += other.total_bytes;
        for (status, count) in other.status_codes {
            *self.status_codes.entry(status).or_default() += count;
        }
    }
}

/// Aggregate of [`SessionMetric`]s: session totals plus per-endpoint stats.
///
/// Endpoints are keyed by `METHOD path`, so a path requested twice per session
/// accumulates twice the requests of the others.
#[aggregate]
#[derive(Default)]
pub struct SessionAggregate {
    pub sessions: u64,
    pub failed_sessions: u64,
    pub total_session_latency: Duration,
    pub endpoints: BTreeMap<String, EndpointStats>,
}

impl Aggregate for SessionAggregate {
    type Metric = SessionMetric;

    fn new() -> Self {
        SessionAggregate::default()
    }

    fn consume(&mut self, metric: &Self::Metric) {
        self.sessions += 1;
        if !metric.success() {
            self.failed_sessions += 1;
        }
        self.total_session_latency += metric.latency;
        for request in &metric.requests {
            self.endpoints
                .entry(request.endpoint())
                .or_default()
                .record(request);
        }
    }

    fn merge(&mut self, other: Self) {
        self.sessions += other.sessions;
        self.failed_sessions += other.failed_sessions;
        self.total_session_latency += other.total_session_latency;
        for (endpoint, stats) in other.endpoints {
            self.endpoints.entry(endpoint).or_default().merge(stats);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str, millis: u64, status: Option<u16>) -> RequestMetric {
        RequestMetric {
            method: "GET".into(),
            name: name.into(),
            latency: Duration::from_millis(millis),
            status,
            success: matches!(status, Some(s) if s < 400),
            bytes: 10,
        }
    }

    fn session(requests: Vec<RequestMetric>) -> SessionMetric {
        let latency = requests.iter().map(|r| r.latency).sum();
        SessionMetric { requests, latency }
    }

    #[test]
    fn consume_counts_duplicate_paths_per_request() {
        let mut agg = SessionAggregate::new();
        agg.consume(&session(vec![
            request("/gvtest123/1703107258813712473", 5, Some(200)),
            request("/gvtest123/1703107258813712473", 7, Some(200)),
        ]));

        let stats = &agg.endpoints["GET /gvtest123/1703107258813712473"];
        assert_eq!(agg.sessions, 1);
        assert_eq!(stats.requests, 2);
        assert_eq!(stats.min_latency, Some(Duration::from_millis(5)));
        assert_eq!(stats.max_latency, Duration::from_millis(7));
        assert_eq!(stats.total_bytes, 20);
        assert_eq!(stats.status_codes[&200], 2);
    }

    #[test]
    fn failures_are_tracked_per_endpoint_and_session() {
        let mut agg = SessionAggregate::new();
        agg.consume(&session(vec![
            request("/health", 1, Some(200)),
            request("/hjerte/0", 2, Some(500)),
        ]));
        agg.consume(&session(vec![
            request("/health", 1, None),
            request("/hjerte/0", 2, Some(200)),
        ]));

        assert_eq!(agg.sessions, 2);
        assert_eq!(agg.failed_sessions, 2);
        assert_eq!(agg.endpoints["GET /health"].failures, 1);
        assert_eq!(agg.endpoints["GET /health"].status_codes.get(&200), Some(&1));
        assert_eq!(agg.endpoints["GET /hjerte/0"].failures, 1);
        assert_eq!(agg.endpoints["GET /hjerte/0"].status_codes[&500], 1);
    }

    #[test]
    fn merge_is_commutative() {
        let mut a = SessionAggregate::new();
        a.consume(&session(vec![request("/health", 4, Some(200))]));
        let mut b = SessionAggregate::new();
        b.consume(&session(vec![
            request("/health", 9, Some(503)),
            request("/gvtest123/0", 2, Some(200)),
        ]));

        let mut ab = a.clone();
        ab.merge(b.clone());
        let mut ba = b;
        ba.merge(a);

        assert_eq!(ab, ba);
        assert_eq!(ab.sessions, 2);
        assert_eq!(
            ab.endpoints["GET /health"].min_latency,
            Some(Duration::from_millis(4))
        );
    }

    #[test]
    fn merging_empty_is_identity() {
        let mut agg = SessionAggregate::new();
        agg.consume(&session(vec![request("/health", 4, Some(200))]));
        let before = agg.clone();
        agg.merge(SessionAggregate::new());
        assert_eq!(agg, before);
    }
}
