pub mod config;
pub mod driver;
pub mod error;
pub mod fetch;
pub mod generate;
pub mod gtfs;
pub mod infra;
pub mod markup;
pub mod mode;
pub mod options;
pub mod output;
pub mod resource;
pub mod runner;
pub mod services;

pub mod gtfs_rt {
    include!(concat!(env!("OUT_DIR"), "/transit_realtime.rs"));
}

pub use config::Config;
pub use error::Error;
