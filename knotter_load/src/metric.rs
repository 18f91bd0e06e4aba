use std::{fmt::Debug, time::Duration};

use serde::{Serialize, de::DeserializeOwned};

use crate::macros::metric;

/// A single observation produced by a scenario action.
///
/// Metrics are collected by an [`crate::Aggregate`] inside each worker and are
/// never retained individually once consumed. They may be composed of other
/// metrics: a [`SessionMetric`] carries one [`RequestMetric`] per request it
/// issued.
///
/// Use the [`crate::macros::metric`] attribute to derive the required bounds
/// and implement this trait in one go.
pub trait Metric
where
    Self: Serialize + DeserializeOwned + PartialOrd + PartialEq + Send + Sync + Debug + Clone,
{
}

/// Outcome of one HTTP request issued by a session.
#[metric]
pub struct RequestMetric {
    /// HTTP method, as sent on the wire.
    pub method: String,
    /// Path the request was issued against, e.g. `/hjerte/0`.
    pub name: String,
    pub latency: Duration,
    /// `None` when no response was received (timeout, refused connection).
    pub status: Option<u16>,
    pub success: bool,
    /// Size of the response body. Zero when the body could not be read.
    pub bytes: usize,
}

impl RequestMetric {
    /// Key under which this request is aggregated, e.g. `GET /health`.
    pub fn endpoint(&self) -> String {
        format!("{} {}", self.method, self.name)
    }
}

/// Outcome of one full session: every request in issue order plus the wall
/// clock time of the whole sequence.
#[metric]
pub struct SessionMetric {
    pub requests: Vec<RequestMetric>,
    pub latency: Duration,
}

impl SessionMetric {
    /// A session succeeds only if every one of its requests did.
    pub fn success(&self) -> bool {
        self.requests.iter().all(|r| r.success)
    }
}
