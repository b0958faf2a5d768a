//! Error types shared by the orchestration core.
//!
//! Generators report failures as [`anyhow::Error`]; everything the control
//! loop needs to branch on is typed here.

use thiserror::Error;

use crate::mode::Mode;

/// Boxed transport error (HTTP or filesystem) carried as an error source.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Invalid operator intent, always detected before any I/O happens.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("exactly one of the -a, -b or -p flags has to be provided")]
    ModeCount,

    #[error("loop mode is only available for alerts, not for {0}")]
    LoopNotSupported(Mode),

    #[error("key for api.um.warszawa.pl needs to be provided for {0}")]
    MissingApiKey(Mode),

    #[error("invalid duration {input:?}: {reason}")]
    InvalidDuration { input: String, reason: String },
}

/// Failure to observe or obtain an upstream input.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("invalid URL {url}")]
    InvalidUrl {
        url: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to probe {location}")]
    Probe {
        location: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to fetch {location}")]
    Fetch {
        location: String,
        #[source]
        source: BoxError,
    },

    #[error("{location} could not be probed {failures} times in a row")]
    ProbeExhausted { location: String, failures: u32 },
}

/// Malformed or incomplete static GTFS dataset.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("invalid GTFS archive")]
    Archive(#[from] zip::result::ZipError),

    #[error("no file {0} in the GTFS")]
    MissingFile(&'static str),

    #[error("malformed {file}")]
    Malformed {
        file: &'static str,
        #[source]
        source: csv::Error,
    },

    #[error("invalid date {value:?} in {file}")]
    InvalidDate { file: &'static str, value: String },

    #[error("GTFS has neither calendar.txt nor calendar_dates.txt")]
    NoCalendar,
}

/// Top-level error of a generation run.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error("failed to build the HTTP client")]
    HttpClient(#[source] reqwest::Error),

    #[error("generation failed: {0:#}")]
    Generation(anyhow::Error),
}

impl Error {
    /// Wraps a generator failure.
    pub fn generation(err: anyhow::Error) -> Self {
        Error::Generation(err)
    }
}
