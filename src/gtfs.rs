//! Static Warsaw GTFS loading.
//!
//! Only the tables needed to correlate realtime data with the schedule are
//! read: `routes.txt` for alerts, plus trips, stops, stop times and calendars
//! for brigades.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io::Cursor;

use bytes::Bytes;
use chrono::{Datelike, NaiveDate};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};
use zip::ZipArchive;
use zip::result::ZipError;

use crate::error::DatasetError;

type Archive = ZipArchive<Cursor<Bytes>>;

/// How much of the dataset to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetScope {
    RoutesOnly,
    Full,
}

/// Route categories by GTFS `route_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RouteKind {
    Tram,
    Metro,
    Rail,
    Bus,
}

impl RouteKind {
    pub fn from_route_type(route_type: u16) -> Option<Self> {
        match route_type {
            0 => Some(RouteKind::Tram),
            1 => Some(RouteKind::Metro),
            2 => Some(RouteKind::Rail),
            3 => Some(RouteKind::Bus),
            _ => None,
        }
    }
}

/// Route ids grouped by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Routes {
    by_kind: BTreeMap<RouteKind, BTreeSet<String>>,
}

impl Routes {
    pub fn insert(&mut self, kind: RouteKind, route_id: impl Into<String>) {
        self.by_kind.entry(kind).or_default().insert(route_id.into());
    }

    pub fn contains(&self, route_id: &str) -> bool {
        self.by_kind.values().any(|ids| ids.contains(route_id))
    }

    pub fn of_kind(&self, kind: RouteKind) -> impl Iterator<Item = &str> {
        self.by_kind
            .get(&kind)
            .into_iter()
            .flat_map(|ids| ids.iter().map(String::as_str))
    }

    pub fn len(&self) -> usize {
        self.by_kind.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trip {
    pub route_id: String,
    pub service_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stop {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StopTime {
    pub trip_id: String,
    pub stop_id: String,
    pub stop_sequence: u32,
    pub departure_time: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CalendarRule {
    weekdays: [bool; 7],
    start: NaiveDate,
    end: NaiveDate,
}

/// Service calendar from `calendar.txt` and `calendar_dates.txt`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Calendar {
    rules: HashMap<String, CalendarRule>,
    /// `true` adds the service on that date, `false` removes it.
    exceptions: HashMap<NaiveDate, Vec<(String, bool)>>,
}

impl Calendar {
    /// Services running on `date`.
    pub fn active_services(&self, date: NaiveDate) -> HashSet<String> {
        let weekday = date.weekday().num_days_from_monday() as usize;
        let mut active: HashSet<String> = self
            .rules
            .iter()
            .filter(|(_, rule)| rule.weekdays[weekday] && rule.start <= date && date <= rule.end)
            .map(|(service_id, _)| service_id.clone())
            .collect();

        for (service_id, added) in self.exceptions.get(&date).into_iter().flatten() {
            if *added {
                active.insert(service_id.clone());
            } else {
                active.remove(service_id);
            }
        }

        active
    }
}

/// The parsed reference dataset. With [`DatasetScope::RoutesOnly`] every
/// field other than `routes` is empty.
#[derive(Debug, Clone, Default)]
pub struct StaticDataset {
    pub routes: Routes,
    pub trips: HashMap<String, Trip>,
    pub stops: HashMap<String, Stop>,
    pub stop_times: Vec<StopTime>,
    pub calendar: Calendar,
}

#[derive(Deserialize)]
struct RouteRow {
    route_id: String,
    route_type: u16,
}

#[derive(Deserialize)]
struct TripRow {
    route_id: String,
    service_id: String,
    trip_id: String,
}

#[derive(Deserialize)]
struct StopRow {
    stop_id: String,
    stop_lat: Option<f64>,
    stop_lon: Option<f64>,
}

#[derive(Deserialize)]
struct CalendarRow {
    service_id: String,
    monday: u8,
    tuesday: u8,
    wednesday: u8,
    thursday: u8,
    friday: u8,
    saturday: u8,
    sunday: u8,
    start_date: String,
    end_date: String,
}

#[derive(Deserialize)]
struct CalendarDateRow {
    service_id: String,
    date: String,
    exception_type: u8,
}

/// Parses a GTFS zip archive.
///
/// # Errors
///
/// [`DatasetError::MissingFile`] when a required table is absent and
/// [`DatasetError::Malformed`] when a table does not parse.
pub fn load(content: Bytes, scope: DatasetScope) -> Result<StaticDataset, DatasetError> {
    let mut archive = ZipArchive::new(Cursor::new(content))?;
    let mut dataset = StaticDataset {
        routes: read_routes(&mut archive)?,
        ..Default::default()
    };
    debug!(routes = dataset.routes.len(), "Loaded routes.txt");

    if scope == DatasetScope::RoutesOnly {
        return Ok(dataset);
    }

    dataset.trips = read_table::<TripRow>(&mut archive, "trips.txt")?
        .into_iter()
        .map(|row| {
            let trip = Trip {
                route_id: row.route_id,
                service_id: row.service_id,
            };
            (row.trip_id, trip)
        })
        .collect();

    dataset.stops = read_table::<StopRow>(&mut archive, "stops.txt")?
        .into_iter()
        .filter_map(|row| match (row.stop_lat, row.stop_lon) {
            (Some(lat), Some(lon)) => Some((row.stop_id, Stop { lat, lon })),
            _ => None,
        })
        .collect();

    dataset.stop_times = read_table(&mut archive, "stop_times.txt")?;
    dataset.calendar = read_calendar(&mut archive)?;

    info!(
        routes = dataset.routes.len(),
        trips = dataset.trips.len(),
        stops = dataset.stops.len(),
        stop_times = dataset.stop_times.len(),
        "Loaded full GTFS"
    );
    Ok(dataset)
}

fn read_routes(archive: &mut Archive) -> Result<Routes, DatasetError> {
    let mut routes = Routes::default();
    for row in read_table::<RouteRow>(archive, "routes.txt")? {
        if let Some(kind) = RouteKind::from_route_type(row.route_type) {
            routes.insert(kind, row.route_id);
        }
    }
    Ok(routes)
}

fn read_calendar(archive: &mut Archive) -> Result<Calendar, DatasetError> {
    let has_rules = archive.index_for_name("calendar.txt").is_some();
    let has_dates = archive.index_for_name("calendar_dates.txt").is_some();
    if !has_rules && !has_dates {
        return Err(DatasetError::NoCalendar);
    }

    let mut calendar = Calendar::default();

    if has_rules {
        for row in read_table::<CalendarRow>(archive, "calendar.txt")? {
            let weekdays = [
                row.monday,
                row.tuesday,
                row.wednesday,
                row.thursday,
                row.friday,
                row.saturday,
                row.sunday,
            ]
            .map(|flag| flag == 1);
            let rule = CalendarRule {
                weekdays,
                start: parse_date("calendar.txt", &row.start_date)?,
                end: parse_date("calendar.txt", &row.end_date)?,
            };
            calendar.rules.insert(row.service_id, rule);
        }
    }

    if has_dates {
        for row in read_table::<CalendarDateRow>(archive, "calendar_dates.txt")? {
            let date = parse_date("calendar_dates.txt", &row.date)?;
            calendar
                .exceptions
                .entry(date)
                .or_default()
                .push((row.service_id, row.exception_type == 1));
        }
    }

    Ok(calendar)
}

fn read_table<T: DeserializeOwned>(
    archive: &mut Archive,
    file: &'static str,
) -> Result<Vec<T>, DatasetError> {
    let entry = match archive.by_name(file) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Err(DatasetError::MissingFile(file)),
        Err(err) => return Err(err.into()),
    };

    csv::Reader::from_reader(entry)
        .deserialize()
        .collect::<Result<Vec<T>, _>>()
        .map_err(|source| DatasetError::Malformed { file, source })
}

fn parse_date(file: &'static str, value: &str) -> Result<NaiveDate, DatasetError> {
    NaiveDate::parse_from_str(value, "%Y%m%d").map_err(|_| DatasetError::InvalidDate {
        file,
        value: value.to_string(),
    })
}

/// Seconds since midnight of a GTFS `HH:MM:SS` time; hours may exceed 23.
pub fn parse_gtfs_time(value: &str) -> Option<u32> {
    let mut parts = value.trim().splitn(3, ':');
    let hours: u32 = parts.next()?.parse().ok()?;
    let minutes: u32 = parts.next()?.parse().ok()?;
    let seconds: u32 = parts.next()?.parse().ok()?;
    if minutes >= 60 || seconds >= 60 {
        return None;
    }
    Some(hours * 3600 + minutes * 60 + seconds)
}
