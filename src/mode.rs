//! Output mode selection.
//!
//! Exactly one output kind is produced per process run. Continuous
//! regeneration is only defined for alerts.

use std::fmt;
use std::time::Duration;

use crate::error::ConfigError;

/// The single active output kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Alerts,
    Brigades,
    Positions,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Alerts => write!(f, "alerts"),
            Mode::Brigades => write!(f, "brigades"),
            Mode::Positions => write!(f, "positions"),
        }
    }
}

/// Raw operator intent, one flag per mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModeRequest {
    pub alerts: bool,
    pub brigades: bool,
    pub positions: bool,
}

/// A validated mode plus its optional regeneration cadence.
///
/// `cadence` is `None` for one-shot runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopConfig {
    pub mode: Mode,
    pub cadence: Option<Duration>,
}

/// Validates operator intent.
///
/// # Errors
///
/// [`ConfigError::ModeCount`] unless exactly one mode is requested, and
/// [`ConfigError::LoopNotSupported`] when a non-zero `loop_every` is paired
/// with anything but alerts.
pub fn select(request: ModeRequest, loop_every: Duration) -> Result<LoopConfig, ConfigError> {
    let requested: Vec<Mode> = [
        (request.alerts, Mode::Alerts),
        (request.brigades, Mode::Brigades),
        (request.positions, Mode::Positions),
    ]
    .into_iter()
    .filter_map(|(wanted, mode)| wanted.then_some(mode))
    .collect();

    let &[mode] = requested.as_slice() else {
        return Err(ConfigError::ModeCount);
    };

    if loop_every.is_zero() {
        return Ok(LoopConfig {
            mode,
            cadence: None,
        });
    }

    if mode != Mode::Alerts {
        return Err(ConfigError::LoopNotSupported(mode));
    }

    Ok(LoopConfig {
        mode,
        cadence: Some(loop_every),
    })
}
