use std::{
    fmt::{self, Debug},
    future::Future,
    io::Write,
    time::Duration,
};

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    Aggregate,
    aggregate::{EndpointStats, SessionAggregate},
    error::Result,
};

/// A [`Report`] is the processed form of an [`Aggregate`].
///
/// Reports derive the final statistics (averages, ratios) from the raw
/// counters of an aggregate. They are plain data with no I/O; a [`Reporter`]
/// decides where they go.
pub trait Report<A>
where
    Self: Send + Sync + Debug + From<A> + Serialize + DeserializeOwned,
    A: Aggregate,
{
}

/// A [`Reporter`] takes a [`Report`] somewhere: stdout, a file, a service.
pub trait Reporter<A: Aggregate, R: Report<A>> {
    fn report(&self, report: &R) -> impl Future<Output = Result<()>>;
}

/// Statistics for one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointReport {
    /// `METHOD path`, e.g. `GET /hjerte/0`.
    pub endpoint: String,
    pub requests: u64,
    pub failures: u64,
    /// Percentage of failed requests, `0.0..=100.0`.
    pub failure_ratio: f64,
    pub average_latency: Duration,
    pub min_latency: Duration,
    pub max_latency: Duration,
    pub average_bytes: u64,
    pub status_codes: Vec<(u16, u64)>,
}

impl EndpointReport {
    fn new(endpoint: String, stats: EndpointStats) -> Self {
        Self {
            endpoint,
            requests: stats.requests,
            failures: stats.failures,
            failure_ratio: percentage(stats.failures, stats.requests),
            average_latency: average(stats.total_latency, stats.requests),
            min_latency: stats.min_latency.unwrap_or_default(),
            max_latency: stats.max_latency,
            average_bytes: stats.total_bytes.checked_div(stats.requests).unwrap_or(0),
            status_codes: stats.status_codes.into_iter().collect(),
        }
    }
}

/// Summary of a session run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub sessions: u64,
    pub failed_sessions: u64,
    pub average_session_latency: Duration,
    pub total_requests: u64,
    pub total_failures: u64,
    /// Percentage of failed requests across every endpoint.
    pub failure_ratio: f64,
    /// Sorted by endpoint.
    pub endpoints: Vec<EndpointReport>,
}

impl From<SessionAggregate> for SessionReport {
    fn from(value: SessionAggregate) -> Self {
        let endpoints: Vec<_> = value
            .endpoints
            .into_iter()
            .map(|(endpoint, stats)| EndpointReport::new(endpoint, stats))
            .collect();
        let total_requests = endpoints.iter().map(|e| e.requests).sum();
        let total_failures = endpoints.iter().map(|e| e.failures).sum();

        Self {
            sessions: value.sessions,
            failed_sessions: value.failed_sessions,
            average_session_latency: average(value.total_session_latency, value.sessions),
            total_requests,
            total_failures,
            failure_ratio: percentage(total_failures, total_requests),
            endpoints,
        }
    }
}

impl Report<SessionAggregate> for SessionReport {}

fn average(total: Duration, count: u64) -> Duration {
    if count == 0 {
        Duration::ZERO
    } else {
        Duration::from_nanos((total.as_nanos() / u128::from(count)) as u64)
    }
}

fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<44} {:>9} {:>9} {:>9} {:>9} {:>9} {:>9}",
            "Endpoint", "# reqs", "# fails", "avg ms", "min ms", "max ms", "avg B"
        )?;
        writeln!(f, "{}", "-".repeat(104))?;
        for e in &self.endpoints {
            writeln!(
                f,
                "{:<44} {:>9} {:>9} {:>9.1} {:>9.1} {:>9.1} {:>9}",
                e.endpoint,
                e.requests,
                e.failures,
                millis(e.average_latency),
                millis(e.min_latency),
                millis(e.max_latency),
                e.average_bytes
            )?;
        }
        writeln!(f, "{}", "-".repeat(104))?;
        writeln!(
            f,
            "{:<44} {:>9} {:>9} ({:.2}% failed)",
            "Aggregated", self.total_requests, self.total_failures, self.failure_ratio
        )?;
        write!(
            f,
            "Sessions: {} ({} failed), average session time {:.1} ms",
            self.sessions,
            self.failed_sessions,
            millis(self.average_session_latency)
        )
    }
}

/// Prints a [`SessionReport`] as a text table.
pub struct TableReporter;

impl Reporter<SessionAggregate, SessionReport> for TableReporter {
    async fn report(&self, report: &SessionReport) -> Result<()> {
        let mut out = std::io::stdout().lock();
        writeln!(out, "{report}")?;
        Ok(())
    }
}

/// Prints any report as a single JSON document.
#[derive(Default)]
pub struct JsonReporter {
    pub pretty: bool,
}

impl JsonReporter {
    pub fn render<A: Aggregate, R: Report<A>>(&self, report: &R) -> Result<String> {
        let json = if self.pretty {
            serde_json::to_string_pretty(report)?
        } else {
            serde_json::to_string(report)?
        };
        Ok(json)
    }
}

impl<A: Aggregate, R: Report<A>> Reporter<A, R> for JsonReporter {
    async fn report(&self, report: &R) -> Result<()> {
        let json = self.render::<A, R>(report)?;
        let mut out = std::io::stdout().lock();
        writeln!(out, "{json}")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{RequestMetric, SessionMetric};

    fn request(name: &str, millis: u64, status: Option<u16>) -> RequestMetric {
        RequestMetric {
            method: "GET".into(),
            name: name.into(),
            latency: Duration::from_millis(millis),
            status,
            success: matches!(status, Some(s) if s < 400),
            bytes: 100,
        }
    }

    fn sample() -> SessionAggregate {
        let mut agg = SessionAggregate::new();
        agg.consume(&SessionMetric {
            requests: vec![request("/health", 10, Some(200)), request("/hjerte/0", 30, Some(200))],
            latency: Duration::from_millis(40),
        });
        agg.consume(&SessionMetric {
            requests: vec![request("/health", 20, Some(200)), request("/hjerte/0", 50, None)],
            latency: Duration::from_millis(70),
        });
        agg
    }

    #[test]
    fn derives_averages_and_ratios() {
        let report = SessionReport::from(sample());

        assert_eq!(report.sessions, 2);
        assert_eq!(report.failed_sessions, 1);
        assert_eq!(report.average_session_latency, Duration::from_millis(55));
        assert_eq!(report.total_requests, 4);
        assert_eq!(report.total_failures, 1);
        assert_eq!(report.failure_ratio, 25.0);

        let health = &report.endpoints[0];
        assert_eq!(health.endpoint, "GET /health");
        assert_eq!(health.average_latency, Duration::from_millis(15));
        assert_eq!(health.min_latency, Duration::from_millis(10));
        assert_eq!(health.max_latency, Duration::from_millis(20));
        assert_eq!(health.average_bytes, 100);
        assert_eq!(health.status_codes, vec![(200, 2)]);

        let hjerte = &report.endpoints[1];
        assert_eq!(hjerte.failure_ratio, 50.0);
        assert_eq!(hjerte.status_codes, vec![(200, 1)]);
    }

    #[test]
    fn empty_aggregate_reports_zeroes() {
        let report = SessionReport::from(SessionAggregate::new());
        assert_eq!(report.sessions, 0);
        assert_eq!(report.average_session_latency, Duration::ZERO);
        assert_eq!(report.failure_ratio, 0.0);
        assert!(report.endpoints.is_empty());
    }

    #[test]
    fn table_lists_every_endpoint() {
        let table = SessionReport::from(sample()).to_string();
        assert!(table.contains("GET /health"));
        assert!(table.contains("GET /hjerte/0"));
        assert!(table.contains("Sessions: 2 (1 failed)"));
    }

    #[test]
    fn json_round_trips() {
        let report = SessionReport::from(sample());
        let json = JsonReporter::default()
            .render::<SessionAggregate, _>(&report)
            .unwrap();
        let parsed: SessionReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, report);
    }
}
