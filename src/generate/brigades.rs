//! Brigade table: which scheduled trips each vehicle duty ("brygada") runs.
//!
//! The static GTFS has no notion of brigades, so every active trip is matched
//! against the per-stop timetables of api.um.warszawa.pl, which do.

use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::driver::Cycle;
use crate::error::Error;
use crate::gtfs::{self, DatasetScope, RouteKind, StaticDataset, StopTime};
use crate::options::BrigadesOptions;
use crate::output;
use crate::services::vehicle_api::{Departure, VehicleApi};

/// One trip of a brigade, with where and when it ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrigadeTrip {
    pub trip_id: String,
    pub last_stop_id: String,
    #[serde(deserialize_with = "lenient_latlon")]
    pub last_stop_latlon: [f64; 2],
    pub last_stop_timepoint: String,
}

/// `route_id -> brigade -> trips`, trips ordered by departure.
pub type BrigadeMap = BTreeMap<String, BTreeMap<String, Vec<BrigadeTrip>>>;

/// Older brigade files store coordinates as strings.
fn lenient_latlon<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[f64; 2], D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Coordinate {
        Number(f64),
        Text(String),
    }

    let [lat, lon] = <[Coordinate; 2]>::deserialize(deserializer)?;
    let value = |c: Coordinate| -> Result<f64, D::Error> {
        match c {
            Coordinate::Number(n) => Ok(n),
            Coordinate::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
        }
    };
    Ok([value(lat)?, value(lon)?])
}

/// A stop_time or timetable problem that strict mode refuses to skip.
fn mismatch(strict: bool, message: String) -> Result<()> {
    if strict {
        return Err(anyhow!(message));
    }
    debug!("{message}");
    Ok(())
}

/// Matches the trips running on `date` to brigades.
///
/// Only tram and bus routes are considered. Timetables are fetched once per
/// `(route, stop)` pair; in non-strict mode a failed fetch counts as an empty
/// timetable.
#[instrument(skip_all, fields(%date))]
pub async fn match_brigades<V: VehicleApi + ?Sized>(
    api: &V,
    dataset: &StaticDataset,
    date: NaiveDate,
    strict: bool,
) -> Result<BrigadeMap> {
    let services = dataset.calendar.active_services(date);
    let routes: HashSet<&str> = dataset
        .routes
        .of_kind(RouteKind::Tram)
        .chain(dataset.routes.of_kind(RouteKind::Bus))
        .collect();

    let mut last_points: HashMap<&str, &StopTime> = HashMap::new();
    let mut first_departures: HashMap<&str, u32> = HashMap::new();
    let mut matched: HashMap<&str, String> = HashMap::new();
    let mut timetables: HashMap<(&str, &str), Vec<Departure>> = HashMap::new();

    for stop_time in &dataset.stop_times {
        let trip_id = stop_time.trip_id.as_str();
        let Some(trip) = dataset.trips.get(trip_id) else {
            mismatch(strict, format!("stop_time references unknown trip {trip_id}"))?;
            continue;
        };
        if !routes.contains(trip.route_id.as_str()) || !services.contains(&trip.service_id) {
            continue;
        }

        last_points
            .entry(trip_id)
            .and_modify(|last| {
                if last.stop_sequence < stop_time.stop_sequence {
                    *last = stop_time;
                }
            })
            .or_insert(stop_time);
        if let Some(secs) = gtfs::parse_gtfs_time(&stop_time.departure_time) {
            first_departures
                .entry(trip_id)
                .and_modify(|first| *first = (*first).min(secs))
                .or_insert(secs);
        }

        if matched.contains_key(trip_id) {
            continue;
        }

        let key = (trip.route_id.as_str(), stop_time.stop_id.as_str());
        if !timetables.contains_key(&key) {
            let departures = match api.timetable(key.1, key.0).await {
                Ok(departures) => departures,
                Err(err) if strict => return Err(err),
                Err(err) => {
                    warn!(
                        route = key.0,
                        stop = key.1,
                        error = %format!("{err:#}"),
                        "Timetable unavailable"
                    );
                    Vec::new()
                }
            };
            timetables.insert(key, departures);
        }

        let brigade = timetables[&key]
            .iter()
            .find(|departure| departure.time == stop_time.departure_time)
            .map(|departure| departure.brigade.trim_start_matches('0'))
            .filter(|brigade| !brigade.is_empty());
        if let Some(brigade) = brigade {
            matched.insert(trip_id, brigade.to_string());
        }
    }

    debug!(
        trips = last_points.len(),
        matched = matched.len(),
        api_calls = timetables.len(),
        "Matched stop_times to brigades"
    );

    let mut brigades = BrigadeMap::new();
    for (trip_id, brigade) in matched {
        let last = last_points[trip_id];
        let Some(stop) = dataset.stops.get(&last.stop_id) else {
            mismatch(strict, format!("trip {trip_id} ends at unknown stop {}", last.stop_id))?;
            continue;
        };

        brigades
            .entry(dataset.trips[trip_id].route_id.clone())
            .or_default()
            .entry(brigade)
            .or_default()
            .push(BrigadeTrip {
                trip_id: trip_id.to_string(),
                last_stop_id: last.stop_id.clone(),
                last_stop_latlon: [stop.lat, stop.lon],
                last_stop_timepoint: last.departure_time.clone(),
            });
    }

    for trips in brigades.values_mut().flat_map(BTreeMap::values_mut) {
        trips.sort_by(|a, b| {
            let departure = |t: &BrigadeTrip| first_departures.get(t.trip_id.as_str()).copied();
            departure(a)
                .cmp(&departure(b))
                .then_with(|| a.trip_id.cmp(&b.trip_id))
        });
    }

    Ok(brigades)
}

/// Generates `brigades.json` for the Warsaw date of `now`, returning the
/// number of matched trips.
#[instrument(skip_all, fields(target = %options.json_target.display()))]
pub async fn make<V: VehicleApi + ?Sized>(
    api: &V,
    dataset: &StaticDataset,
    options: &BrigadesOptions,
    now: DateTime<Tz>,
) -> Result<usize> {
    let brigades = match_brigades(api, dataset, now.date_naive(), options.strict).await?;
    output::write_json(&options.json_target, &brigades)?;

    let trips: usize = brigades
        .values()
        .flat_map(BTreeMap::values)
        .map(Vec::len)
        .sum();
    info!(routes = brigades.len(), trips, "Brigades generated");
    Ok(trips)
}

/// Brigades bound to the full static GTFS archive.
pub struct BrigadesCycle<V> {
    api: V,
    options: BrigadesOptions,
    dataset: Option<StaticDataset>,
}

impl<V: VehicleApi> BrigadesCycle<V> {
    pub fn new(api: V, options: BrigadesOptions) -> Self {
        Self {
            api,
            options,
            dataset: None,
        }
    }
}

#[async_trait]
impl<V: VehicleApi> Cycle for BrigadesCycle<V> {
    async fn reload(&mut self, content: Bytes) -> Result<(), Error> {
        self.dataset = Some(gtfs::load(content, DatasetScope::Full)?);
        Ok(())
    }

    async fn regenerate(&mut self) -> Result<(), Error> {
        let dataset = self
            .dataset
            .as_ref()
            .ok_or_else(|| Error::generation(anyhow!("GTFS not loaded")))?;
        make(&self.api, dataset, &self.options, super::warsaw_now())
            .await
            .map(drop)
            .map_err(Error::generation)
    }
}
