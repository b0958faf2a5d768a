//! Process-wide configuration, built once at startup and passed by reference.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::mode::{self, LoopConfig, ModeRequest};

pub const DEFAULT_GTFS_FILE: &str = "https://mkuran.pl/gtfs/warsaw.zip";
pub const DEFAULT_BRIGADES_FILE: &str = "https://mkuran.pl/gtfs/warsaw/brigades.json";
pub const DEFAULT_TARGET: &str = "data_rt";

/// How often the static inputs are re-probed for changes (30 minutes).
pub const DEFAULT_CHECK_EVERY: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_PROBE_FAILURES: u32 = 5;

/// Immutable run configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub modes: ModeRequest,
    /// Key for api.um.warszawa.pl.
    pub apikey: Option<String>,
    /// Path or URL of the static GTFS archive.
    pub gtfs_file: String,
    /// Path or URL of brigades.json.
    pub brigades_file: String,
    /// Directory receiving all generated files.
    pub target: PathBuf,
    pub json: bool,
    pub readable: bool,
    pub strict: bool,
    /// Zero means one-shot.
    pub loop_every: Duration,
    pub check_every: Duration,
    /// Consecutive tolerated probe failures in non-strict mode; 0 tolerates forever.
    pub max_probe_failures: u32,
    pub regenerate_unchanged: bool,
    pub http_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            modes: ModeRequest::default(),
            apikey: None,
            gtfs_file: DEFAULT_GTFS_FILE.to_string(),
            brigades_file: DEFAULT_BRIGADES_FILE.to_string(),
            target: PathBuf::from(DEFAULT_TARGET),
            json: false,
            readable: false,
            strict: false,
            loop_every: Duration::ZERO,
            check_every: DEFAULT_CHECK_EVERY,
            max_probe_failures: DEFAULT_MAX_PROBE_FAILURES,
            regenerate_unchanged: false,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

impl Config {
    /// Validated mode and cadence for this run.
    pub fn loop_config(&self) -> Result<LoopConfig, ConfigError> {
        mode::select(self.modes, self.loop_every)
    }

    /// The API key, treating an empty string as absent.
    pub fn apikey(&self) -> Option<&str> {
        self.apikey.as_deref().filter(|key| !key.is_empty())
    }
}

/// Parses durations such as `0`, `90s`, `30m`, `1h30m` or `250ms`.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidDuration {
        input: input.to_string(),
        reason: reason.to_string(),
    };

    let mut rest = input.trim();
    if rest.is_empty() {
        return Err(invalid("empty"));
    }
    if rest == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| invalid("missing unit"))?;
        if digits == 0 {
            return Err(invalid("expected a number"));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|_| invalid("number too large"))?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let part = match &rest[..unit_len] {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.saturating_mul(60)),
            "h" => Duration::from_secs(value.saturating_mul(3600)),
            _ => return Err(invalid("unknown unit, use ms, s, m or h")),
        };
        rest = &rest[unit_len..];
        total = total.saturating_add(part);
    }

    Ok(total)
}
