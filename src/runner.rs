//! Top-level orchestration: turns a [`Config`] into one generation run.

use std::future::Future;
use std::time::Duration;

use tracing::info;

use crate::config::Config;
use crate::driver::{Cycle, DriverPolicy, LoopDriver};
use crate::error::{ConfigError, Error};
use crate::fetch::{BasicClient, HttpClient};
use crate::generate::alerts::AlertsCycle;
use crate::generate::brigades::BrigadesCycle;
use crate::generate::positions::PositionsCycle;
use crate::infra::wtp::client::WtpClient;
use crate::infra::ztm::client::ZtmClient;
use crate::mode::Mode;
use crate::options::GenerationOptions;
use crate::resource::{self, Location, ProbePolicy};

/// A validated run, decided before any I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub options: GenerationOptions,
    /// The artifact the generator is bound to: the static GTFS for alerts
    /// and brigades, brigades.json for positions.
    pub input: Location,
    /// `None` for a one-shot run.
    pub cadence: Option<Duration>,
}

impl Plan {
    pub fn mode(&self) -> Mode {
        self.options.mode()
    }
}

/// Validates the mode selection and builds the frozen options.
///
/// # Errors
///
/// Any [`ConfigError`]; nothing has been read or fetched at that point.
pub fn plan(config: &Config) -> Result<Plan, ConfigError> {
    let selected = config.loop_config()?;
    let options = GenerationOptions::build(config, selected.mode)?;

    let input = match &options {
        GenerationOptions::Positions(positions) => positions.brigades.clone(),
        _ => Location::parse(&config.gtfs_file),
    };

    Ok(Plan {
        options,
        input,
        cadence: selected.cadence,
    })
}

/// Loads `input` once and runs a single generation.
pub async fn one_shot<C, H>(input: &Location, client: &H, cycle: &mut C) -> Result<(), Error>
where
    C: Cycle,
    H: HttpClient + ?Sized,
{
    let content = input.load(client).await?;
    info!(location = %input, bytes = content.len(), "Input loaded");
    cycle.reload(content).await?;
    cycle.regenerate().await
}

/// Runs `cycle` once or in a loop, as `plan` says.
pub async fn drive<C: Cycle>(
    config: &Config,
    plan: &Plan,
    client: &BasicClient,
    mut cycle: C,
    shutdown: impl Future<Output = ()>,
) -> Result<(), Error> {
    let Some(cadence) = plan.cadence else {
        return one_shot(&plan.input, client, &mut cycle).await;
    };

    let resource = resource::open(
        &plan.input,
        client,
        config.check_every,
        ProbePolicy::from_config(config),
    )?;
    LoopDriver::new(resource, cycle, cadence, DriverPolicy::from_config(config))
        .run(shutdown)
        .await
}

/// Runs whatever `config` asks for until it is done, fails, or `shutdown`
/// resolves.
pub async fn run(config: &Config, shutdown: impl Future<Output = ()>) -> Result<(), Error> {
    let plan = plan(config)?;
    info!(
        mode = %plan.mode(),
        input = %plan.input,
        continuous = plan.cadence.is_some(),
        target = %config.target.display(),
        "Starting"
    );

    let client = BasicClient::with_timeout(config.http_timeout).map_err(Error::HttpClient)?;

    match &plan.options {
        GenerationOptions::Alerts(options) => {
            let cycle = AlertsCycle::new(WtpClient::new(client.clone()), options.clone());
            drive(config, &plan, &client, cycle, shutdown).await
        }
        GenerationOptions::Brigades(options) => {
            let api = ZtmClient::new(client.clone(), &options.apikey);
            let cycle = BrigadesCycle::new(api, options.clone());
            drive(config, &plan, &client, cycle, shutdown).await
        }
        GenerationOptions::Positions(options) => {
            let api = ZtmClient::new(client.clone(), &options.apikey);
            let cycle = PositionsCycle::new(api, options.clone());
            drive(config, &plan, &client, cycle, shutdown).await
        }
    }
}
