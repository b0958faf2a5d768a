//! Instrumented collaborators shared by the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;
use warsaw_gtfs_rt::driver::Cycle;
use warsaw_gtfs_rt::error::{Error, ResourceError};
use warsaw_gtfs_rt::resource::{Freshness, Location, Marker, Resource};

/// Everything the fakes observed, in order.
#[derive(Debug, Default)]
pub struct Journal {
    pub checks: Vec<Instant>,
    pub reloads: Vec<Bytes>,
    /// Data each regeneration ran with.
    pub regenerations: Vec<Bytes>,
    /// `(start, end)` of every check and every regeneration.
    pub busy: Vec<(Instant, Instant)>,
    in_flight: bool,
    pub overlaps: usize,
}

impl Journal {
    fn enter(&mut self) -> Instant {
        if self.in_flight {
            self.overlaps += 1;
        }
        self.in_flight = true;
        Instant::now()
    }

    fn leave(&mut self, started: Instant) {
        self.in_flight = false;
        self.busy.push((started, Instant::now()));
    }
}

pub type SharedJournal = Arc<Mutex<Journal>>;

/// A cycle that remembers the data it was given and can take a while.
pub struct RecordingCycle {
    pub journal: SharedJournal,
    pub work: Duration,
    data: Option<Bytes>,
}

impl RecordingCycle {
    pub fn new(journal: SharedJournal) -> Self {
        Self {
            journal,
            work: Duration::ZERO,
            data: None,
        }
    }

    pub fn taking(mut self, work: Duration) -> Self {
        self.work = work;
        self
    }
}

#[async_trait]
impl Cycle for RecordingCycle {
    async fn reload(&mut self, content: Bytes) -> Result<(), Error> {
        self.journal.lock().unwrap().reloads.push(content.clone());
        self.data = Some(content);
        Ok(())
    }

    async fn regenerate(&mut self) -> Result<(), Error> {
        let started = self.journal.lock().unwrap().enter();
        if !self.work.is_zero() {
            tokio::time::sleep(self.work).await;
        }
        let mut journal = self.journal.lock().unwrap();
        journal
            .regenerations
            .push(self.data.clone().unwrap_or_default());
        journal.leave(started);
        Ok(())
    }
}

/// A resource replaying a script of check results, then reporting
/// `Unchanged` forever.
pub struct ScriptedResource {
    pub journal: SharedJournal,
    location: Location,
    script: VecDeque<Freshness>,
    pub work: Duration,
}

impl ScriptedResource {
    pub fn new(journal: SharedJournal, script: impl IntoIterator<Item = Freshness>) -> Self {
        Self {
            journal,
            location: Location::Local("warsaw.zip".into()),
            script: script.into_iter().collect(),
            work: Duration::ZERO,
        }
    }

    pub fn taking(mut self, work: Duration) -> Self {
        self.work = work;
        self
    }
}

#[async_trait]
impl Resource for ScriptedResource {
    async fn check(&mut self) -> Result<Freshness, ResourceError> {
        let started = {
            let mut journal = self.journal.lock().unwrap();
            journal.checks.push(Instant::now());
            journal.enter()
        };
        if !self.work.is_zero() {
            tokio::time::sleep(self.work).await;
        }
        self.journal.lock().unwrap().leave(started);
        Ok(self.script.pop_front().unwrap_or(Freshness::Unchanged))
    }

    fn location(&self) -> &Location {
        &self.location
    }

    fn marker(&self) -> Option<&Marker> {
        None
    }

    fn fetch_count(&self) -> u64 {
        0
    }
}

pub fn changed(content: &'static str) -> Freshness {
    Freshness::Changed(Bytes::from_static(content.as_bytes()))
}

/// An in-memory zip archive.
pub fn archive(files: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in files {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub const ROUTES: &str = "\
route_id,agency_id,route_short_name,route_type
4,0,4,0
M1,0,M1,1
523,0,523,3
";
