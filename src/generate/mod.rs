//! The three generators, each with a [`Cycle`](crate::driver::Cycle)
//! adapter binding it to its input.

pub mod alerts;
pub mod brigades;
pub mod positions;

use chrono::{DateTime, Utc};
use chrono_tz::{Europe::Warsaw, Tz};

/// Current wall-clock time in Warsaw, where every upstream timestamp lives.
pub fn warsaw_now() -> DateTime<Tz> {
    Utc::now().with_timezone(&Warsaw)
}

/// Timestamp format of the JSON sidecars and the vehicle API.
pub(crate) const LOCAL_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
