//! Per-mode generation options.
//!
//! Options are assembled from the immutable [`Config`] once per run and never
//! mutated afterwards; a continuous run reuses the bundle built at startup.

use std::path::PathBuf;

use crate::config::Config;
use crate::error::ConfigError;
use crate::mode::Mode;
use crate::resource::Location;

/// Encoding of a GTFS-Realtime output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFormat {
    /// Protobuf wire format.
    Binary,
    /// Human-readable text rendering.
    Readable,
}

impl FeedFormat {
    pub fn from_readable(readable: bool) -> Self {
        if readable {
            FeedFormat::Readable
        } else {
            FeedFormat::Binary
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            FeedFormat::Binary => "pb",
            FeedFormat::Readable => "txt",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertsOptions {
    pub feed_target: PathBuf,
    pub json_target: Option<PathBuf>,
    pub format: FeedFormat,
    /// Fail on any error while scraping alert pages.
    pub strict: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrigadesOptions {
    pub json_target: PathBuf,
    pub apikey: String,
    /// Fail on API errors and on data mismatches instead of skipping them.
    pub strict: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionsOptions {
    pub feed_target: PathBuf,
    pub json_target: Option<PathBuf>,
    pub format: FeedFormat,
    pub apikey: String,
    pub brigades: Location,
}

/// Everything a generator needs, for exactly one mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOptions {
    Alerts(AlertsOptions),
    Brigades(BrigadesOptions),
    Positions(PositionsOptions),
}

impl GenerationOptions {
    /// Builds the options bundle for `mode`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::MissingApiKey`] when the mode calls api.um.warszawa.pl
    /// and no key was configured.
    pub fn build(config: &Config, mode: Mode) -> Result<Self, ConfigError> {
        let format = FeedFormat::from_readable(config.readable);
        let target = |name: &str| config.target.join(name);
        let sidecar = |name: &str| config.json.then(|| target(&format!("{name}.json")));
        let apikey = || {
            config
                .apikey()
                .map(str::to_string)
                .ok_or(ConfigError::MissingApiKey(mode))
        };

        Ok(match mode {
            Mode::Alerts => GenerationOptions::Alerts(AlertsOptions {
                feed_target: target(&format!("alerts.{}", format.extension())),
                json_target: sidecar("alerts"),
                format,
                strict: config.strict,
            }),
            Mode::Brigades => GenerationOptions::Brigades(BrigadesOptions {
                json_target: target("brigades.json"),
                apikey: apikey()?,
                strict: config.strict,
            }),
            Mode::Positions => GenerationOptions::Positions(PositionsOptions {
                feed_target: target(&format!("positions.{}", format.extension())),
                json_target: sidecar("positions"),
                format,
                apikey: apikey()?,
                brigades: Location::parse(&config.brigades_file),
            }),
        })
    }

    pub fn mode(&self) -> Mode {
        match self {
            GenerationOptions::Alerts(_) => Mode::Alerts,
            GenerationOptions::Brigades(_) => Mode::Brigades,
            GenerationOptions::Positions(_) => Mode::Positions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn config() -> Config {
        Config {
            target: PathBuf::from("out"),
            apikey: Some("key".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_alerts_binary_without_sidecar() {
        let GenerationOptions::Alerts(opts) = GenerationOptions::build(&config(), Mode::Alerts).unwrap() else {
            panic!("expected alerts options");
        };
        assert_eq!(opts.feed_target, Path::new("out/alerts.pb"));
        assert_eq!(opts.json_target, None);
        assert_eq!(opts.format, FeedFormat::Binary);
        assert!(!opts.strict);
    }

    #[test]
    fn test_positions_readable_with_sidecar() {
        let cfg = Config {
            json: true,
            readable: true,
            brigades_file: "brigades.json".into(),
            ..config()
        };
        let GenerationOptions::Positions(opts) = GenerationOptions::build(&cfg, Mode::Positions).unwrap() else {
            panic!("expected positions options");
        };
        assert_eq!(opts.feed_target, Path::new("out/positions.txt"));
        assert_eq!(opts.json_target.as_deref(), Some(Path::new("out/positions.json")));
        assert_eq!(opts.brigades, Location::Local(PathBuf::from("brigades.json")));
        assert_eq!(opts.apikey, "key");
    }

    #[test]
    fn test_brigades_always_json() {
        let cfg = Config {
            strict: true,
            ..config()
        };
        let opts = GenerationOptions::build(&cfg, Mode::Brigades).unwrap();
        assert_eq!(
            opts,
            GenerationOptions::Brigades(BrigadesOptions {
                json_target: PathBuf::from("out/brigades.json"),
                apikey: "key".into(),
                strict: true,
            })
        );
        assert_eq!(opts.mode(), Mode::Brigades);
    }

    #[test]
    fn test_missing_apikey() {
        let cfg = Config {
            apikey: None,
            ..config()
        };
        for mode in [Mode::Brigades, Mode::Positions] {
            assert_eq!(
                GenerationOptions::build(&cfg, mode),
                Err(ConfigError::MissingApiKey(mode))
            );
        }
        assert!(GenerationOptions::build(&cfg, Mode::Alerts).is_ok());
    }

    #[test]
    fn test_build_is_deterministic() {
        let cfg = Config {
            json: true,
            ..config()
        };
        for mode in [Mode::Alerts, Mode::Brigades, Mode::Positions] {
            assert_eq!(
                GenerationOptions::build(&cfg, mode).unwrap(),
                GenerationOptions::build(&cfg, mode).unwrap()
            );
        }
    }
}
