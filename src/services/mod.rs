//! Upstream data sources behind traits, so generators can be driven by
//! test doubles.

pub mod alert_feed;
pub mod vehicle_api;
