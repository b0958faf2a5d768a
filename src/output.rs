//! Output formatting and persistence for generated feeds.
//!
//! Every file is written to a temporary sibling and renamed over the target,
//! so a failed run never leaves a truncated output behind.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone};
use prost::Message;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::gtfs_rt::{FeedHeader, FeedMessage, feed_header::Incrementality};
use crate::options::FeedFormat;

/// Header for a full-dataset GTFS-Realtime 2.0 feed produced at `now`.
pub fn feed_header<Tz: TimeZone>(now: &DateTime<Tz>) -> FeedHeader {
    FeedHeader {
        gtfs_realtime_version: "2.0".to_string(),
        incrementality: Some(Incrementality::FullDataset as i32),
        timestamp: Some(now.timestamp().max(0) as u64),
        feed_version: None,
    }
}

/// Renders a feed in the requested format.
///
/// The readable format is the message's pretty-printed debug representation.
pub fn render_feed(feed: &FeedMessage, format: FeedFormat) -> Vec<u8> {
    match format {
        FeedFormat::Binary => feed.encode_to_vec(),
        FeedFormat::Readable => format!("{feed:#?}\n").into_bytes(),
    }
}

/// Writes a feed to `path`, replacing any previous version atomically.
pub fn write_feed(path: &Path, feed: &FeedMessage, format: FeedFormat) -> Result<()> {
    write_atomic(path, &render_feed(feed, format))
}

/// Writes `value` as pretty-printed JSON to `path`, atomically.
pub fn write_json(path: &Path, value: &impl Serialize) -> Result<()> {
    let body = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &body)
}

/// Writes `bytes` to a temporary file next to `path` and renames it into place.
///
/// Creates the parent directory if it does not exist.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create output directory {}", dir.display()))?;

    let mut file = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create a temporary file in {}", dir.display()))?;
    file.write_all(bytes)?;
    file.flush()?;
    file.persist(path)
        .with_context(|| format!("failed to replace {}", path.display()))?;

    debug!(path = %path.display(), bytes = bytes.len(), "Output written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtfs_rt::FeedEntity;
    use chrono::Utc;
    use std::fs;

    fn sample_feed() -> FeedMessage {
        FeedMessage {
            header: feed_header(&Utc.timestamp_opt(1_700_000_000, 0).unwrap()),
            entity: vec![FeedEntity {
                id: "A/CHANGE/1".to_string(),
                ..Default::default()
            }],
        }
    }

    #[test]
    fn test_feed_header() {
        let header = sample_feed().header;
        assert_eq!(header.gtfs_realtime_version, "2.0");
        assert_eq!(header.timestamp, Some(1_700_000_000));
        assert_eq!(header.incrementality, Some(Incrementality::FullDataset as i32));
    }

    #[test]
    fn test_write_binary_feed_decodes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.pb");

        write_feed(&path, &sample_feed(), FeedFormat::Binary).unwrap();

        let decoded = FeedMessage::decode(fs::read(&path).unwrap().as_slice()).unwrap();
        assert_eq!(decoded, sample_feed());
    }

    #[test]
    fn test_write_readable_feed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.txt");

        write_feed(&path, &sample_feed(), FeedFormat::Readable).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("gtfs_realtime_version: \"2.0\""));
        assert!(content.contains("A/CHANGE/1"));
    }

    #[test]
    fn test_write_atomic_creates_parent_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("brigades.json");

        write_atomic(&path, b"old").unwrap();
        write_atomic(&path, b"new").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"new");
        let leftovers = fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_write_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("positions.json");

        write_json(&path, &serde_json::json!({ "positions": [] })).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["positions"], serde_json::json!([]));
    }
}
