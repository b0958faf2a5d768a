//! GTFS-Realtime vehicle positions, matched to trips through brigades.json.

use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, TimeDelta, TimeZone, Timelike};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::driver::Cycle;
use crate::error::Error;
use crate::gtfs;
use crate::gtfs_rt::{
    FeedEntity, FeedMessage, Position, TripDescriptor, VehicleDescriptor, VehiclePosition,
};
use crate::options::PositionsOptions;
use crate::output;
use crate::services::vehicle_api::{VehicleApi, VehicleKind, VehicleRecord};

use super::LOCAL_TIME_FORMAT;
use super::brigades::{BrigadeMap, BrigadeTrip};

/// Positions older than this are ignored.
const MAX_AGE: TimeDelta = TimeDelta::minutes(10);

/// A vehicle matched to the trip it is most likely running.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchedPosition {
    pub id: String,
    pub route_id: String,
    pub trip_id: String,
    pub timestamp: DateTime<Tz>,
    pub lat: f64,
    pub lon: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vehicle_number: Option<String>,
}

#[derive(Serialize)]
struct PositionsJson<'a> {
    time: String,
    positions: Vec<&'a MatchedPosition>,
}

/// Whether the GTFS `timepoint` lies after `now_secs` (seconds since local
/// midnight).
///
/// Timepoints past 24:00 belong to the previous service day; shortly after
/// midnight the current time is shifted by a day to compare against them.
pub fn is_later(now_secs: u32, timepoint: &str) -> bool {
    const DAY: u32 = 24 * 3600;

    let Some(timepoint) = gtfs::parse_gtfs_time(timepoint) else {
        return false;
    };
    let now = if timepoint >= DAY && now_secs < 4 * 3600 {
        now_secs + DAY
    } else {
        now_secs
    };
    timepoint > now
}

/// The first trip not yet finished at `now_secs`, or the last one when every
/// trip is over.
pub fn pick_trip(trips: &[BrigadeTrip], now_secs: u32) -> Option<&BrigadeTrip> {
    trips
        .iter()
        .find(|trip| is_later(now_secs, &trip.last_stop_timepoint))
        .or_else(|| trips.last())
}

/// Matches raw positions to trips.
///
/// Vehicles without brigade trips, with unparsable timestamps or reported
/// more than ten minutes before `now` are dropped. When a vehicle is reported
/// twice, the newer report wins.
pub fn match_positions(
    records: &[VehicleRecord],
    brigades: &BrigadeMap,
    now: &DateTime<Tz>,
) -> BTreeMap<String, MatchedPosition> {
    let now_secs = now.num_seconds_from_midnight();
    let mut matched: BTreeMap<String, MatchedPosition> = BTreeMap::new();

    for record in records {
        let brigade = record.brigade.trim().trim_start_matches('0');
        let route = record.line.trim();
        let Some(trips) = brigades.get(route).and_then(|b| b.get(brigade)) else {
            continue;
        };

        let Some(timestamp) = NaiveDateTime::parse_from_str(&record.time, LOCAL_TIME_FORMAT)
            .ok()
            .and_then(|local| now.timezone().from_local_datetime(&local).earliest())
        else {
            debug!(time = %record.time, route, brigade, "Unparsable vehicle timestamp");
            continue;
        };
        if *now - timestamp > MAX_AGE {
            continue;
        }

        let Some(trip) = pick_trip(trips, now_secs) else {
            continue;
        };

        let id = format!("V/{route}/{brigade}");
        if matched.get(&id).is_some_and(|known| known.timestamp >= timestamp) {
            continue;
        }
        matched.insert(
            id.clone(),
            MatchedPosition {
                id,
                route_id: route.to_string(),
                trip_id: trip.trip_id.clone(),
                timestamp,
                lat: record.lat,
                lon: record.lon,
                vehicle_number: record.vehicle_number.clone(),
            },
        );
    }

    matched
}

/// Builds the GTFS-Realtime vehicle positions feed.
pub fn build_feed<'a>(
    positions: impl IntoIterator<Item = &'a MatchedPosition>,
    now: &DateTime<Tz>,
) -> FeedMessage {
    let entity = positions
        .into_iter()
        .map(|position| FeedEntity {
            id: position.id.clone(),
            vehicle: Some(VehiclePosition {
                trip: Some(TripDescriptor {
                    trip_id: Some(position.trip_id.clone()),
                    route_id: Some(position.route_id.clone()),
                    ..Default::default()
                }),
                vehicle: Some(VehicleDescriptor {
                    id: Some(position.id.clone()),
                    label: position.vehicle_number.clone(),
                    ..Default::default()
                }),
                position: Some(Position {
                    latitude: position.lat as f32,
                    longitude: position.lon as f32,
                    ..Default::default()
                }),
                timestamp: Some(position.timestamp.timestamp().max(0) as u64),
                ..Default::default()
            }),
            ..Default::default()
        })
        .collect();

    FeedMessage {
        header: output::feed_header(now),
        entity,
    }
}

/// Fetches bus and tram positions and writes the outputs, returning the
/// number of matched vehicles.
#[instrument(skip_all, fields(target = %options.feed_target.display()))]
pub async fn make<V: VehicleApi + ?Sized>(
    api: &V,
    brigades: &BrigadeMap,
    options: &PositionsOptions,
    now: DateTime<Tz>,
) -> Result<usize> {
    let mut records = Vec::new();
    for kind in VehicleKind::ALL {
        let batch = api
            .positions(kind)
            .await
            .with_context(|| format!("failed to read {kind:?} positions"))?;
        debug!(?kind, vehicles = batch.len(), "Read positions");
        records.extend(batch);
    }

    let matched = match_positions(&records, brigades, &now);

    output::write_feed(&options.feed_target, &build_feed(matched.values(), &now), options.format)?;
    if let Some(json_target) = &options.json_target {
        let json = PositionsJson {
            time: now.format(LOCAL_TIME_FORMAT).to_string(),
            positions: matched.values().collect(),
        };
        output::write_json(json_target, &json)?;
    }

    info!(received = records.len(), matched = matched.len(), "Positions generated");
    Ok(matched.len())
}

/// Positions bound to the brigades file.
pub struct PositionsCycle<V> {
    api: V,
    options: PositionsOptions,
    brigades: Option<BrigadeMap>,
}

impl<V: VehicleApi> PositionsCycle<V> {
    pub fn new(api: V, options: PositionsOptions) -> Self {
        Self {
            api,
            options,
            brigades: None,
        }
    }
}

#[async_trait]
impl<V: VehicleApi> Cycle for PositionsCycle<V> {
    async fn reload(&mut self, content: Bytes) -> Result<(), Error> {
        let brigades: BrigadeMap = serde_json::from_slice(&content)
            .with_context(|| format!("invalid brigades file {}", self.options.brigades))
            .map_err(Error::generation)?;
        self.brigades = Some(brigades);
        Ok(())
    }

    async fn regenerate(&mut self) -> Result<(), Error> {
        let brigades = self
            .brigades
            .as_ref()
            .ok_or_else(|| Error::generation(anyhow!("brigades not loaded")))?;
        make(&self.api, brigades, &self.options, super::warsaw_now())
            .await
            .map(drop)
            .map_err(Error::generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::FeedFormat;
    use crate::resource::Location;
    use crate::services::vehicle_api::Departure;
    use chrono_tz::Europe::Warsaw;
    use prost::Message;

    fn trip(trip_id: &str, timepoint: &str) -> BrigadeTrip {
        BrigadeTrip {
            trip_id: trip_id.to_string(),
            last_stop_id: "100101".to_string(),
            last_stop_latlon: [52.25, 21.04],
            last_stop_timepoint: timepoint.to_string(),
        }
    }

    fn brigades() -> BrigadeMap {
        let mut map = BrigadeMap::new();
        map.entry("523".into()).or_default().insert(
            "3".into(),
            vec![trip("523/1", "06:00:00"), trip("523/2", "08:00:00")],
        );
        map.entry("N01".into())
            .or_default()
            .insert("1".into(), vec![trip("N01/1", "24:10:00"), trip("N01/2", "25:10:00")]);
        map
    }

    fn record(line: &str, brigade: &str, time: &str) -> VehicleRecord {
        VehicleRecord {
            line: line.to_string(),
            brigade: brigade.to_string(),
            lat: 52.2,
            lon: 21.0,
            time: time.to_string(),
            vehicle_number: Some("1000".into()),
        }
    }

    fn at(h: u32, m: u32) -> DateTime<Tz> {
        Warsaw.with_ymd_and_hms(2024, 5, 1, h, m, 0).unwrap()
    }

    #[test]
    fn test_is_later() {
        let seven = 7 * 3600;
        assert!(is_later(seven, "08:00:00"));
        assert!(!is_later(seven, "06:00:00"));
        assert!(!is_later(seven, "07:00:00"));
        // 00:30 is before 24:40 of the previous service day...
        assert!(is_later(1800, "24:40:00"));
        // ...but after 24:10.
        assert!(!is_later(1800, "24:10:00"));
        assert!(is_later(22 * 3600, "24:10:00"));
        assert!(!is_later(seven, "bad"));
    }

    #[test]
    fn test_pick_trip() {
        let trips = [trip("a", "06:00:00"), trip("b", "08:00:00")];
        assert_eq!(pick_trip(&trips, 5 * 3600).unwrap().trip_id, "a");
        assert_eq!(pick_trip(&trips, 7 * 3600).unwrap().trip_id, "b");
        assert_eq!(pick_trip(&trips, 9 * 3600).unwrap().trip_id, "b");
        assert!(pick_trip(&[], 0).is_none());
    }

    #[test]
    fn test_match_positions() {
        let records = [
            record("523", "03", "2024-05-01 06:58:00"),
            record("523", "3", "2024-05-01 06:59:00"),
            record("523", "4", "2024-05-01 06:59:00"),
            record("N01", "1", "2024-05-01 06:40:00"),
            record("999", "1", "garbage"),
        ];

        let matched = match_positions(&records, &brigades(), &at(7, 0));

        assert_eq!(matched.keys().collect::<Vec<_>>(), ["V/523/3"]);
        let position = &matched["V/523/3"];
        assert_eq!(position.trip_id, "523/2");
        assert_eq!(position.timestamp, at(6, 59));
    }

    #[test]
    fn test_after_midnight_trip() {
        let records = [record("N01", "01", "2024-05-01 00:20:00")];
        let matched = match_positions(&records, &brigades(), &at(0, 25));
        assert_eq!(matched["V/N01/1"].trip_id, "N01/2");
    }

    struct MockApi(Vec<VehicleRecord>);

    #[async_trait]
    impl VehicleApi for MockApi {
        async fn positions(&self, kind: VehicleKind) -> Result<Vec<VehicleRecord>> {
            match kind {
                VehicleKind::Bus => Ok(self.0.clone()),
                VehicleKind::Tram => Ok(Vec::new()),
            }
        }

        async fn timetable(&self, _stop_id: &str, _route_id: &str) -> Result<Vec<Departure>> {
            Err(anyhow!("not used"))
        }
    }

    #[tokio::test]
    async fn test_make_writes_feed_and_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let options = PositionsOptions {
            feed_target: dir.path().join("positions.pb"),
            json_target: Some(dir.path().join("positions.json")),
            format: FeedFormat::Binary,
            apikey: "key".into(),
            brigades: Location::parse("brigades.json"),
        };
        let api = MockApi(vec![record("523", "3", "2024-05-01 06:59:00")]);

        assert_eq!(make(&api, &brigades(), &options, at(7, 0)).await.unwrap(), 1);

        let bytes = std::fs::read(&options.feed_target).unwrap();
        let feed = FeedMessage::decode(bytes.as_slice()).unwrap();
        let vehicle = feed.entity[0].vehicle.as_ref().unwrap();
        assert_eq!(feed.entity[0].id, "V/523/3");
        assert_eq!(vehicle.trip.as_ref().unwrap().trip_id.as_deref(), Some("523/2"));
        assert_eq!(vehicle.vehicle.as_ref().unwrap().label.as_deref(), Some("1000"));
        assert_eq!(vehicle.timestamp, Some(at(6, 59).timestamp() as u64));

        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("positions.json")).unwrap()).unwrap();
        assert_eq!(json["positions"][0]["trip_id"], "523/2");
        assert_eq!(json["positions"][0]["timestamp"], "2024-05-01T06:59:00+02:00");
    }

    #[tokio::test]
    async fn test_cycle_reload_rejects_invalid_brigades() {
        let options = PositionsOptions {
            feed_target: "positions.pb".into(),
            json_target: None,
            format: FeedFormat::Binary,
            apikey: "key".into(),
            brigades: Location::parse("brigades.json"),
        };
        let mut cycle = PositionsCycle::new(MockApi(Vec::new()), options);

        assert!(cycle.reload(Bytes::from_static(b"[1, 2]")).await.is_err());
        cycle.reload(Bytes::from_static(b"{}")).await.unwrap();
        assert_eq!(cycle.brigades, Some(BrigadeMap::new()));
    }
}
