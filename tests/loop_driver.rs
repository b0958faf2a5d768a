mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use filetime::FileTime;
use warsaw_gtfs_rt::driver::{CycleOutcome, DriverPolicy, LoopDriver};
use warsaw_gtfs_rt::resource::{LocalResource, ProbePolicy};

use common::{Journal, RecordingCycle, ScriptedResource, changed};

const CADENCE: Duration = Duration::from_secs(60);

fn local_driver(path: &std::path::Path, journal: &Arc<Mutex<Journal>>) -> LoopDriver<RecordingCycle> {
    let resource = LocalResource::new(path, CADENCE, ProbePolicy::default());
    LoopDriver::new(
        Box::new(resource),
        RecordingCycle::new(journal.clone()),
        CADENCE,
        DriverPolicy::default(),
    )
}

fn write_version(path: &std::path::Path, content: &str, mtime: i64) {
    std::fs::write(path, content).unwrap();
    filetime::set_file_mtime(path, FileTime::from_unix_time(mtime, 0)).unwrap();
}

#[tokio::test(start_paused = true)]
async fn unchanged_checks_do_not_regenerate() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("warsaw.zip");
    write_version(&path, "v1", 1_000);
    let journal = Arc::new(Mutex::new(Journal::default()));
    let mut driver = local_driver(&path, &journal);

    // Initial load.
    assert_eq!(driver.step().await.unwrap(), CycleOutcome::Regenerated);

    for _ in 0..5 {
        tokio::time::advance(CADENCE).await;
        assert_eq!(driver.step().await.unwrap(), CycleOutcome::Unchanged);
    }

    let journal = journal.lock().unwrap();
    assert_eq!(journal.reloads.len(), 1);
    assert_eq!(journal.regenerations.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn change_between_checks_regenerates_once_with_new_data() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("warsaw.zip");
    write_version(&path, "v1", 1_000);
    let journal = Arc::new(Mutex::new(Journal::default()));
    let mut driver = local_driver(&path, &journal);
    driver.step().await.unwrap();

    let mut outcomes = Vec::new();
    for check in 1..=5 {
        if check == 4 {
            write_version(&path, "v2", 2_000);
        }
        tokio::time::advance(CADENCE).await;
        outcomes.push(driver.step().await.unwrap());
    }

    assert_eq!(
        outcomes,
        [
            CycleOutcome::Unchanged,
            CycleOutcome::Unchanged,
            CycleOutcome::Unchanged,
            CycleOutcome::Regenerated,
            CycleOutcome::Unchanged,
        ]
    );
    let journal = journal.lock().unwrap();
    assert_eq!(
        journal.regenerations,
        [Bytes::from_static(b"v1"), Bytes::from_static(b"v2")]
    );
}

#[tokio::test(start_paused = true)]
async fn cycles_never_overlap() {
    let journal = Arc::new(Mutex::new(Journal::default()));
    // Every regeneration outlasts the cadence.
    let resource = ScriptedResource::new(journal.clone(), [changed("v1"), changed("v2")])
        .taking(Duration::from_secs(5));
    let cycle = RecordingCycle::new(journal.clone()).taking(Duration::from_secs(90));
    let policy = DriverPolicy {
        regenerate_unchanged: true,
        ..Default::default()
    };
    let driver = LoopDriver::new(Box::new(resource), cycle, CADENCE, policy);

    driver
        .run(tokio::time::sleep(Duration::from_secs(600)))
        .await
        .unwrap();

    let journal = journal.lock().unwrap();
    assert_eq!(journal.overlaps, 0);
    assert!(journal.regenerations.len() >= 3);
    for pair in journal.busy.windows(2) {
        assert!(pair[0].1 <= pair[1].0, "{pair:?} overlap");
    }
    // Delayed ticks: each check starts a full cadence after the previous
    // cycle began, never in a burst.
    for pair in journal.checks.windows(2) {
        assert!(pair[1] - pair[0] >= CADENCE);
    }
}

#[tokio::test(start_paused = true)]
async fn shutdown_between_cycles_ends_the_loop() {
    let journal = Arc::new(Mutex::new(Journal::default()));
    let resource = ScriptedResource::new(journal.clone(), [changed("v1")]);
    let driver = LoopDriver::new(
        Box::new(resource),
        RecordingCycle::new(journal.clone()),
        CADENCE,
        DriverPolicy::default(),
    );

    driver
        .run(tokio::time::sleep(Duration::from_secs(150)))
        .await
        .unwrap();

    let journal = journal.lock().unwrap();
    // Ticks at 0s, 60s and 120s.
    assert_eq!(journal.checks.len(), 3);
    assert_eq!(journal.regenerations.len(), 1);
}
