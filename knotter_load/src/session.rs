//! The scripted user session replayed against the knotter API.
//!
//! A session is a fixed, ordered list of GET requests. Every virtual user
//! replays the same list start to finish, one request at a time. Nothing in
//! the list is randomised or de-duplicated: `/gvtest123/1703107258813712473`
//! is requested twice in a row on purpose.

use std::{fmt, sync::Arc, time::Instant};

use futures::future::BoxFuture;
use reqwest::{Client, Method};
use url::Url;

use crate::{
    error::{LoadError, Result},
    metric::{RequestMetric, SessionMetric},
};

/// HTTP verbs a session can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
        }
    }
}

impl From<HttpMethod> for Method {
    fn from(value: HttpMethod) -> Self {
        match value {
            HttpMethod::Get => Method::GET,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestSpec {
    pub method: HttpMethod,
    pub path: &'static str,
}

impl RequestSpec {
    pub const fn get(path: &'static str) -> Self {
        Self {
            method: HttpMethod::Get,
            path,
        }
    }
}

impl fmt::Display for RequestSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// The full user session.
pub const FULL_SESSION: &[RequestSpec] = &[
    RequestSpec::get("/health"),
    RequestSpec::get("/gvtest123/0"),
    RequestSpec::get("/gvtest123/1703018725690920482"),
    RequestSpec::get("/gvtest123/1703019365846429131"),
    RequestSpec::get("/gvtest123/1703090860610908919"),
    RequestSpec::get("/gvtest123/1703107258813712473"),
    RequestSpec::get("/gvtest123/1703107258813712473"),
    RequestSpec::get("/hjerte/0"),
    RequestSpec::get("/hjerte/1703020154617762028"),
    RequestSpec::get("/hjerte/1703083098460936447"),
];

/// Lightweight smoke variant: the first two requests of [`FULL_SESSION`].
pub const SMOKE_SESSION: &[RequestSpec] = &[
    RequestSpec::get("/health"),
    RequestSpec::get("/gvtest123/0"),
];

/// Which request list a [`Session`] replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionKind {
    #[default]
    Full,
    Smoke,
}

impl SessionKind {
    pub fn requests(&self) -> &'static [RequestSpec] {
        match self {
            SessionKind::Full => FULL_SESSION,
            SessionKind::Smoke => SMOKE_SESSION,
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKind::Full => f.write_str("full"),
            SessionKind::Smoke => f.write_str("smoke"),
        }
    }
}

#[derive(Debug)]
struct Target {
    spec: RequestSpec,
    url: Url,
}

/// A [`SessionKind`] bound to a target host.
///
/// Every path is resolved to an absolute URL when the session is created, so
/// running it does no parsing. Clones share the resolved list.
#[derive(Debug, Clone)]
pub struct Session {
    kind: SessionKind,
    targets: Arc<[Target]>,
}

impl Session {
    /// Resolves `kind`'s request list against `host`.
    ///
    /// Paths are appended to the host verbatim (minus any trailing `/` on the
    /// host), so a host with a base path such as `http://gw/api` keeps it.
    pub fn new(kind: SessionKind, host: &str) -> Result<Self> {
        let base = validate_host(host)?;
        let base = base.as_str().trim_end_matches('/');

        let targets = kind
            .requests()
            .iter()
            .map(|spec| {
                let url = Url::parse(&format!("{base}{}", spec.path)).map_err(|e| {
                    LoadError::InvalidHost {
                        host: host.to_owned(),
                        reason: format!("cannot resolve `{}`: {e}", spec.path),
                    }
                })?;
                Ok(Target { spec: *spec, url })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            kind,
            targets: targets.into(),
        })
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    /// Number of requests issued per run.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Absolute URLs in issue order.
    pub fn urls(&self) -> impl Iterator<Item = &Url> {
        self.targets.iter().map(|t| &t.url)
    }

    /// Issues every request of the session in order and records the outcome.
    ///
    /// Each request, body included, completes before the next one is sent.
    /// Failures are recorded and never stop the sequence.
    pub async fn run(&self, client: &Client) -> SessionMetric {
        let start = Instant::now();
        let mut requests = Vec::with_capacity(self.targets.len());
        for target in self.targets.iter() {
            requests.push(issue(client, target).await);
        }
        SessionMetric {
            requests,
            latency: start.elapsed(),
        }
    }

    /// Turns the session into an executor action.
    ///
    /// Build the client once and pass it here; it is cloned per invocation,
    /// which only bumps a reference count on its connection pool.
    pub fn action(
        self,
        client: Client,
    ) -> impl Fn() -> BoxFuture<'static, SessionMetric> + Send + Sync + Clone + 'static {
        move || {
            let session = self.clone();
            let client = client.clone();
            Box::pin(async move { session.run(&client).await })
        }
    }
}

fn validate_host(host: &str) -> Result<Url> {
    let invalid = |reason: String| LoadError::InvalidHost {
        host: host.to_owned(),
        reason,
    };

    let url = Url::parse(host).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme `{}`", url.scheme())));
    }
    if url.host().is_none() {
        return Err(invalid("missing host".to_owned()));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(invalid("query strings and fragments are not allowed".to_owned()));
    }
    Ok(url)
}

async fn issue(client: &Client, target: &Target) -> RequestMetric {
    let start = Instant::now();

    let (status, bytes, success) = match client
        .request(target.spec.method.into(), target.url.clone())
        .send()
        .await
    {
        Ok(response) => {
            let status = response.status();
            let failed = status.is_client_error() || status.is_server_error();
            match response.bytes().await {
                Ok(body) => (Some(status.as_u16()), body.len(), !failed),
                Err(e) => {
                    tracing::debug!(url = %target.url, error = %e, "failed to read response body");
                    (Some(status.as_u16()), 0, false)
                }
            }
        }
        Err(e) => {
            tracing::debug!(url = %target.url, error = %e, "request failed");
            (e.status().map(|s| s.as_u16()), 0, false)
        }
    };

    RequestMetric {
        method: target.spec.method.as_str().to_owned(),
        name: target.spec.path.to_owned(),
        latency: start.elapsed(),
        status,
        success,
        bytes,
    }
}
