//! Continuous regeneration loop.
//!
//! A single task alternates between sleeping until the next tick and running
//! one cycle: check the [`Resource`], reload on change, regenerate. Cycles
//! never overlap because the next tick is only awaited after the previous
//! cycle returned.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Error;
use crate::resource::{Freshness, Resource};

/// One generator bound to its input, driven by [`LoopDriver`].
#[async_trait]
pub trait Cycle: Send {
    /// Replaces the working data with freshly fetched input content.
    async fn reload(&mut self, content: Bytes) -> Result<(), Error>;

    /// Produces the outputs from the current working data.
    async fn regenerate(&mut self) -> Result<(), Error>;
}

/// What a single [`LoopDriver::step`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Input unchanged, nothing regenerated.
    Unchanged,
    Regenerated,
    /// Reload or regeneration failed and the failure was tolerated.
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverPolicy {
    /// Reload and regeneration failures stop the loop.
    pub strict: bool,
    /// Regenerate every cycle, even when the input did not change.
    pub regenerate_unchanged: bool,
}

impl DriverPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            strict: config.strict,
            regenerate_unchanged: config.regenerate_unchanged,
        }
    }
}

pub struct LoopDriver<C> {
    resource: Box<dyn Resource>,
    cycle: C,
    cadence: Duration,
    policy: DriverPolicy,
    loaded: bool,
    cycles: u64,
}

impl<C: Cycle> LoopDriver<C> {
    pub fn new(
        resource: Box<dyn Resource>,
        cycle: C,
        cadence: Duration,
        policy: DriverPolicy,
    ) -> Self {
        Self {
            resource,
            cycle,
            // interval() panics on a zero period
            cadence: cadence.max(Duration::from_millis(1)),
            policy,
            loaded: false,
            cycles: 0,
        }
    }

    /// Runs exactly one cycle.
    ///
    /// # Errors
    ///
    /// Resource errors always propagate. Reload and regeneration errors
    /// propagate in strict mode and when the very first load fails; otherwise
    /// they are logged and reported as [`CycleOutcome::Failed`]. A failed
    /// reload keeps the previous working data.
    pub async fn step(&mut self) -> Result<CycleOutcome, Error> {
        self.cycles += 1;

        let content = match self.resource.check().await? {
            Freshness::Changed(content) => content,
            Freshness::Unchanged if self.policy.regenerate_unchanged && self.loaded => {
                return self.regenerate().await;
            }
            Freshness::Unchanged => {
                debug!(cycle = self.cycles, "Input unchanged, skipping regeneration");
                return Ok(CycleOutcome::Unchanged);
            }
        };

        info!(
            cycle = self.cycles,
            location = %self.resource.location(),
            bytes = content.len(),
            "Input changed, reloading"
        );
        if let Err(err) = self.cycle.reload(content).await {
            if !self.loaded {
                return Err(err);
            }
            return self.tolerate(err, "Reload failed, keeping previous data");
        }
        self.loaded = true;

        self.regenerate().await
    }

    async fn regenerate(&mut self) -> Result<CycleOutcome, Error> {
        match self.cycle.regenerate().await {
            Ok(()) => Ok(CycleOutcome::Regenerated),
            Err(err) => self.tolerate(err, "Regeneration failed, previous outputs kept"),
        }
    }

    fn tolerate(&self, err: Error, message: &str) -> Result<CycleOutcome, Error> {
        if self.policy.strict {
            return Err(err);
        }
        warn!(cycle = self.cycles, error = %err, "{message}");
        Ok(CycleOutcome::Failed)
    }

    /// Cycles every `cadence` until `shutdown` resolves or a cycle fails
    /// fatally. The first cycle starts immediately.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<(), Error> {
        let mut ticker = tokio::time::interval(self.cadence);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            cadence_ms = self.cadence.as_millis() as u64,
            location = %self.resource.location(),
            "Loop started"
        );

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!(cycles = self.cycles, "Shutdown requested, loop stopped");
                    return Ok(());
                }

                _ = ticker.tick() => {
                    self.step().await?;
                }
            }
        }
    }

    pub fn cycle(&self) -> &C {
        &self.cycle
    }

    /// Number of cycles started so far.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }
}
