//! Periodically rechecked upstream inputs.
//!
//! A [`Resource`] answers "has the artifact changed, and if so what is the new
//! content" while keeping I/O to a minimum:
//!
//! - within the recheck period, [`Resource::check`] returns
//!   [`Freshness::Unchanged`] without touching the network or disk;
//! - after it, a cheap probe (HTTP `HEAD` validators, file mtime) decides
//!   whether a full fetch is needed;
//! - the version marker only moves when content was actually fetched.
//!
//! The two transports are picked once from the location string, see
//! [`Location::parse`] and [`open`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{ETAG, LAST_MODIFIED};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{BoxError, ResourceError};
use crate::fetch::{self, BasicClient, HttpClient};

/// Where an input lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Remote(String),
    Local(PathBuf),
}

impl Location {
    /// Classifies `location` by its scheme prefix; anything that is not
    /// `http://` or `https://` is a filesystem path.
    pub fn parse(location: &str) -> Self {
        if location.starts_with("http://") || location.starts_with("https://") {
            Location::Remote(location.to_string())
        } else {
            Location::Local(PathBuf::from(location))
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Location::Remote(_))
    }

    /// Reads the whole artifact once, without any freshness bookkeeping.
    pub async fn load<C: HttpClient + ?Sized>(&self, client: &C) -> Result<Bytes, ResourceError> {
        let fetched = match self {
            Location::Remote(url) => fetch::fetch_bytes(client, url).await.map_err(BoxError::from),
            Location::Local(path) => tokio::fs::read(path)
                .await
                .map(Bytes::from)
                .map_err(BoxError::from),
        };

        fetched.map_err(|source| ResourceError::Fetch {
            location: self.to_string(),
            source,
        })
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Remote(url) => write!(f, "{url}"),
            Location::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Result of a freshness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    Unchanged,
    Changed(Bytes),
}

/// Opaque version of the last fetched content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker {
    /// HTTP `ETag`, or `Last-Modified` when no `ETag` is sent.
    Validator(String),
    /// Filesystem modification time.
    Modified(SystemTime),
}

/// What to do when a probe fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbePolicy {
    /// Every probe failure is fatal.
    pub strict: bool,
    /// Outside strict mode, give up after this many consecutive failures.
    /// Zero tolerates failures forever.
    pub max_failures: u32,
}

impl ProbePolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            strict: config.strict,
            max_failures: config.max_probe_failures,
        }
    }
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            strict: false,
            max_failures: crate::config::DEFAULT_MAX_PROBE_FAILURES,
        }
    }
}

/// A periodically rechecked handle to externally owned data.
#[async_trait]
pub trait Resource: Send {
    /// Checks for a new version, fetching it only when needed.
    ///
    /// The very first successful check always reports [`Freshness::Changed`].
    /// Until a version is known there is nothing to compare against, so the
    /// content is fetched without probing first.
    ///
    /// # Errors
    ///
    /// Fetch failures always propagate. Probe failures propagate in strict
    /// mode or once the configured number of consecutive failures is reached;
    /// otherwise they count as unchanged.
    async fn check(&mut self) -> Result<Freshness, ResourceError>;

    fn location(&self) -> &Location;

    /// Version of the most recently fetched content.
    fn marker(&self) -> Option<&Marker>;

    /// Number of full fetches performed so far.
    fn fetch_count(&self) -> u64;
}

/// Bookkeeping shared by both transports.
#[derive(Debug)]
struct CheckState {
    period: Duration,
    policy: ProbePolicy,
    last_check: Option<Instant>,
    marker: Option<Marker>,
    failures: u32,
    fetches: u64,
}

impl CheckState {
    fn new(period: Duration, policy: ProbePolicy) -> Self {
        Self {
            period,
            policy,
            last_check: None,
            marker: None,
            failures: 0,
            fetches: 0,
        }
    }

    /// Records a check attempt at `now`; `false` when still inside the period.
    fn begin(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_check
            && now.duration_since(last) < self.period
        {
            return false;
        }
        self.last_check = Some(now);
        true
    }

    /// An unknown version on either side counts as a change.
    fn is_stale(&self, probed: Option<&Marker>) -> bool {
        match (probed, &self.marker) {
            (Some(probed), Some(known)) => probed != known,
            _ => true,
        }
    }

    fn probe_succeeded(&mut self) {
        self.failures = 0;
    }

    fn probe_failed(
        &mut self,
        location: &Location,
        source: BoxError,
    ) -> Result<Freshness, ResourceError> {
        self.failures += 1;

        if self.policy.strict {
            return Err(ResourceError::Probe {
                location: location.to_string(),
                source,
            });
        }

        if self.policy.max_failures > 0 && self.failures >= self.policy.max_failures {
            return Err(ResourceError::ProbeExhausted {
                location: location.to_string(),
                failures: self.failures,
            });
        }

        warn!(
            location = %location,
            failures = self.failures,
            error = %source,
            "Probe failed, assuming unchanged until the next check"
        );
        Ok(Freshness::Unchanged)
    }

    fn fetched(&mut self, marker: Option<Marker>) {
        self.fetches += 1;
        self.marker = marker;
    }
}

/// A resource served over HTTP(S).
///
/// Probes with `HEAD` and compares the `ETag` (or `Last-Modified`) header.
/// Servers sending neither are refetched every period without a probe.
pub struct HttpResource<C> {
    client: C,
    location: Location,
    url: reqwest::Url,
    state: CheckState,
}

impl<C: HttpClient> HttpResource<C> {
    pub fn new(
        client: C,
        url: &str,
        period: Duration,
        policy: ProbePolicy,
    ) -> Result<Self, ResourceError> {
        let parsed = reqwest::Url::parse(url).map_err(|e| ResourceError::InvalidUrl {
            url: url.to_string(),
            source: Box::new(e),
        })?;

        Ok(Self {
            client,
            location: Location::Remote(url.to_string()),
            url: parsed,
            state: CheckState::new(period, policy),
        })
    }

    async fn probe(&self) -> reqwest::Result<Option<Marker>> {
        let req = reqwest::Request::new(reqwest::Method::HEAD, self.url.clone());
        let resp = self.client.execute(req).await?.error_for_status()?;
        Ok(validator(resp.headers()))
    }

    async fn fetch(&self) -> reqwest::Result<(Bytes, Option<Marker>)> {
        let req = reqwest::Request::new(reqwest::Method::GET, self.url.clone());
        let resp = self.client.execute(req).await?.error_for_status()?;
        let marker = validator(resp.headers());
        Ok((resp.bytes().await?, marker))
    }
}

fn validator(headers: &reqwest::header::HeaderMap) -> Option<Marker> {
    headers
        .get(ETAG)
        .or_else(|| headers.get(LAST_MODIFIED))
        .and_then(|value| value.to_str().ok())
        .map(|value| Marker::Validator(value.to_string()))
}

#[async_trait]
impl<C: HttpClient> Resource for HttpResource<C> {
    async fn check(&mut self) -> Result<Freshness, ResourceError> {
        if !self.state.begin(Instant::now()) {
            return Ok(Freshness::Unchanged);
        }

        // Without a known version any probe result means a refetch.
        if self.state.marker.is_some() {
            let probed = match self.probe().await {
                Ok(marker) => {
                    self.state.probe_succeeded();
                    marker
                }
                Err(err) => return self.state.probe_failed(&self.location, Box::new(err)),
            };

            if !self.state.is_stale(probed.as_ref()) {
                debug!(url = %self.url, "Remote resource unchanged");
                return Ok(Freshness::Unchanged);
            }
        }

        let (content, fetched) = self.fetch().await.map_err(|e| ResourceError::Fetch {
            location: self.location.to_string(),
            source: Box::new(e),
        })?;

        self.state.fetched(fetched);
        debug!(url = %self.url, bytes = content.len(), "Remote resource fetched");
        Ok(Freshness::Changed(content))
    }

    fn location(&self) -> &Location {
        &self.location
    }

    fn marker(&self) -> Option<&Marker> {
        self.state.marker.as_ref()
    }

    fn fetch_count(&self) -> u64 {
        self.state.fetches
    }
}

/// A resource on the local filesystem, versioned by modification time.
pub struct LocalResource {
    location: Location,
    path: PathBuf,
    state: CheckState,
}

impl LocalResource {
    pub fn new(path: impl AsRef<Path>, period: Duration, policy: ProbePolicy) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            location: Location::Local(path.clone()),
            path,
            state: CheckState::new(period, policy),
        }
    }

    async fn probe(&self) -> std::io::Result<Marker> {
        let metadata = tokio::fs::metadata(&self.path).await?;
        Ok(Marker::Modified(metadata.modified()?))
    }

    /// Content plus the modification time observed just before reading it.
    async fn read(&self) -> std::io::Result<(Bytes, Marker)> {
        let marker = self.probe().await?;
        let content = tokio::fs::read(&self.path).await?;
        Ok((Bytes::from(content), marker))
    }
}

#[async_trait]
impl Resource for LocalResource {
    async fn check(&mut self) -> Result<Freshness, ResourceError> {
        if !self.state.begin(Instant::now()) {
            return Ok(Freshness::Unchanged);
        }

        if self.state.marker.is_some() {
            let probed = match self.probe().await {
                Ok(marker) => {
                    self.state.probe_succeeded();
                    marker
                }
                Err(err) => return self.state.probe_failed(&self.location, Box::new(err)),
            };

            if !self.state.is_stale(Some(&probed)) {
                debug!(path = %self.path.display(), "Local resource unchanged");
                return Ok(Freshness::Unchanged);
            }
        }

        let (content, marker) = self.read().await.map_err(|e| ResourceError::Fetch {
            location: self.location.to_string(),
            source: Box::new(e),
        })?;

        self.state.fetched(Some(marker));
        debug!(path = %self.path.display(), bytes = content.len(), "Local resource read");
        Ok(Freshness::Changed(content))
    }

    fn location(&self) -> &Location {
        &self.location
    }

    fn marker(&self) -> Option<&Marker> {
        self.state.marker.as_ref()
    }

    fn fetch_count(&self) -> u64 {
        self.state.fetches
    }
}

/// Opens the resource variant matching `location`.
///
/// Remote resources share `client`'s connection pool.
pub fn open(
    location: &Location,
    client: &BasicClient,
    period: Duration,
    policy: ProbePolicy,
) -> Result<Box<dyn Resource>, ResourceError> {
    Ok(match location {
        Location::Remote(url) => Box::new(HttpResource::new(client.clone(), url, period, policy)?),
        Location::Local(path) => Box::new(LocalResource::new(path, period, policy)),
    })
}
