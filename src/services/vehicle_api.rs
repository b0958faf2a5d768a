//! Trait and types for the Warsaw open-data vehicle API.

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Vehicle category as understood by `busestrams_get`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VehicleKind {
    Bus,
    Tram,
}

impl VehicleKind {
    pub const ALL: [VehicleKind; 2] = [VehicleKind::Bus, VehicleKind::Tram];

    /// Value of the API's `type` parameter.
    pub fn api_type(self) -> &'static str {
        match self {
            VehicleKind::Bus => "1",
            VehicleKind::Tram => "2",
        }
    }
}

/// A single live vehicle position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleRecord {
    #[serde(rename = "Lines")]
    pub line: String,
    #[serde(rename = "Brigade")]
    pub brigade: String,
    #[serde(rename = "Lat")]
    pub lat: f64,
    #[serde(rename = "Lon")]
    pub lon: f64,
    /// Local Warsaw time, `YYYY-MM-DD HH:MM:SS`.
    #[serde(rename = "Time")]
    pub time: String,
    #[serde(rename = "VehicleNumber", default)]
    pub vehicle_number: Option<String>,
}

/// A scheduled departure from one stop of one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub brigade: String,
    /// `HH:MM:SS`, comparable with GTFS `departure_time`.
    pub time: String,
}

/// Access to live positions and per-stop timetables.
#[async_trait::async_trait]
pub trait VehicleApi: Send + Sync {
    async fn positions(&self, kind: VehicleKind) -> Result<Vec<VehicleRecord>>;

    /// Departures of `route_id` from the 6-digit GTFS `stop_id`.
    async fn timetable(&self, stop_id: &str, route_id: &str) -> Result<Vec<Departure>>;
}
