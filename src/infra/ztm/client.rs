use std::collections::HashMap;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::fetch::auth::UrlParam;
use crate::fetch::{self, BasicClient, HttpClient};
use crate::services::vehicle_api::{Departure, VehicleApi, VehicleKind, VehicleRecord};

const BASE_URL: &str = "https://api.um.warszawa.pl/api/action";
const POSITIONS_RESOURCE: &str = "f2e5503e-927d-4ad3-9500-4ab9e55deb59";
const TIMETABLE_RESOURCE: &str = "e923fa0e-d96c-43f9-ae6e-60518c9f3238";

/// Client for api.um.warszawa.pl.
pub struct ZtmClient<C = UrlParam<BasicClient>> {
    client: C,
}

impl ZtmClient {
    /// Wraps `client` so every request carries `apikey`.
    pub fn new(client: BasicClient, apikey: &str) -> Self {
        Self::with_client(UrlParam::new(client, "apikey", apikey))
    }
}

impl<C: HttpClient> ZtmClient<C> {
    pub fn with_client(client: C) -> Self {
        Self { client }
    }

    fn positions_url(&self, kind: VehicleKind) -> String {
        format!(
            "{BASE_URL}/busestrams_get/?resource_id={POSITIONS_RESOURCE}&type={}",
            kind.api_type()
        )
    }

    fn timetable_url(&self, stop_id: &str, route_id: &str) -> Result<String> {
        let (Some(stop), Some(post)) = (stop_id.get(..4), stop_id.get(4..6)) else {
            bail!("stop id {stop_id:?} is not a 6-digit ZTM stop code");
        };
        Ok(format!(
            "{BASE_URL}/dbtimetable_get/?id={TIMETABLE_RESOURCE}&busstopId={stop}&busstopNr={post}&line={route_id}"
        ))
    }
}

#[derive(Deserialize)]
struct Envelope {
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct KeyValue {
    key: Option<String>,
    value: Option<String>,
}

#[derive(Deserialize)]
struct ValuesRow {
    values: Vec<KeyValue>,
}

/// Returns the `result` list, or an error describing what came back instead.
fn result_list(envelope: Envelope) -> Result<Vec<Value>> {
    match envelope.result {
        Value::Array(items) => Ok(items),
        other => Err(match envelope.error {
            Some(error) => anyhow!("api.um.warszawa.pl error: {error}"),
            None => anyhow!("api.um.warszawa.pl result is not a list: {other}"),
        }),
    }
}

/// Decodes a `busestrams_get` response.
///
/// Records that do not decode (missing brigade, textual coordinates) are
/// dropped.
pub fn parse_positions(body: &[u8]) -> Result<Vec<VehicleRecord>> {
    let envelope: Envelope = serde_json::from_slice(body).context("invalid positions response")?;
    Ok(result_list(envelope)?
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(record) => Some(record),
            Err(err) => {
                debug!(error = %err, "Skipping malformed vehicle record");
                None
            }
        })
        .collect())
}

/// Decodes a `dbtimetable_get` response.
///
/// Each row is a list of `{key, value}` pairs where JSON null is spelled
/// `"null"`; rows without both `brygada` and `czas` are dropped.
pub fn parse_timetable(body: &[u8]) -> Result<Vec<Departure>> {
    let envelope: Envelope = serde_json::from_slice(body).context("invalid timetable response")?;

    let mut departures = Vec::new();
    for item in result_list(envelope)? {
        let row: ValuesRow = serde_json::from_value(item).context("invalid timetable row")?;
        let mut fields: HashMap<String, String> = row
            .values
            .into_iter()
            .filter_map(|kv| match (kv.key, kv.value) {
                (Some(key), Some(value)) if value != "null" => Some((key, value)),
                _ => None,
            })
            .collect();

        if let (Some(brigade), Some(time)) = (fields.remove("brygada"), fields.remove("czas")) {
            departures.push(Departure { brigade, time });
        }
    }
    Ok(departures)
}

#[async_trait]
impl<C: HttpClient> VehicleApi for ZtmClient<C> {
    async fn positions(&self, kind: VehicleKind) -> Result<Vec<VehicleRecord>> {
        let body = fetch::fetch_bytes(&self.client, &self.positions_url(kind))
            .await
            .with_context(|| format!("failed to fetch {kind:?} positions"))?;
        parse_positions(&body)
    }

    async fn timetable(&self, stop_id: &str, route_id: &str) -> Result<Vec<Departure>> {
        let url = self.timetable_url(stop_id, route_id)?;
        let body = fetch::fetch_bytes(&self.client, &url)
            .await
            .with_context(|| format!("failed to fetch timetable of {route_id} at {stop_id}"))?;
        parse_timetable(&body)
    }
}
