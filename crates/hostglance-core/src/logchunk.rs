//! Hour-rotated log chunker (C9, log side). Appends one Prometheus-format
//! scrape per write to a file named for the wall-clock hour it was
//! written in, rotating to a new file when the hour changes.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::buffers::SnapshotBuffers;
use crate::prometheus::{read_snapshot, serialize};

fn chunk_file_name(at: DateTime<Utc>) -> String {
    format!("hostglance_{:04}-{:02}-{:02}_{:02}.prom", at.year(), at.month(), at.day(), at.hour())
}

/// Appends hour-rotated `.prom` chunks under `dir`. Refuses to write
/// until the producer has published at least once, so a freshly started
/// daemon never logs an all-zero warm-up snapshot.
pub struct LogChunker {
    dir: PathBuf,
    current_hour_file: Option<(String, File)>,
}

impl LogChunker {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), current_hour_file: None }
    }

    fn file_for(&mut self, at: DateTime<Utc>) -> io::Result<&mut File> {
        let name = chunk_file_name(at);
        let needs_new = match &self.current_hour_file {
            Some((existing, _)) => existing != &name,
            None => true,
        };
        if needs_new {
            std::fs::create_dir_all(&self.dir)?;
            let path: &Path = &self.dir.join(&name);
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            self.current_hour_file = Some((name, file));
        }
        Ok(&mut self.current_hour_file.as_mut().unwrap().1)
    }

    /// Writes one scrape if the buffers have published at least once.
    /// Returns `Ok(false)` (not an error) when skipped because the
    /// producer hasn't warmed up yet.
    pub fn write_tick(&mut self, buffers: &SnapshotBuffers, at: DateTime<Utc>) -> io::Result<bool> {
        if buffers.seq() == 0 {
            return Ok(false);
        }
        let snapshot = read_snapshot(buffers);
        let body = serialize(&snapshot);
        let file = self.file_for(at)?;
        writeln!(file, "# hostglance_scrape_timestamp_ms {}", at.timestamp_millis())?;
        file.write_all(body.as_bytes())?;
        file.flush()?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn chunk_name_is_hour_stamped() {
        let at = Utc.with_ymd_and_hms(2026, 7, 28, 14, 0, 0).unwrap();
        assert_eq!(chunk_file_name(at), "hostglance_2026-07-28_14.prom");
    }

    #[test]
    fn refuses_to_write_before_first_publish() {
        let dir = tempfile::tempdir().unwrap();
        let mut chunker = LogChunker::new(dir.path());
        let buffers = SnapshotBuffers::new();
        let at = Utc.with_ymd_and_hms(2026, 7, 28, 14, 0, 0).unwrap();
        let wrote = chunker.write_tick(&buffers, at).unwrap();
        assert!(!wrote);
        assert!(!dir.path().join("hostglance_2026-07-28_14.prom").exists());
    }

    #[test]
    fn writes_and_rotates_on_hour_change() {
        let dir = tempfile::tempdir().unwrap();
        let mut chunker = LogChunker::new(dir.path());
        let buffers = SnapshotBuffers::new();
        buffers.publish();

        let hour14 = Utc.with_ymd_and_hms(2026, 7, 28, 14, 59, 0).unwrap();
        chunker.write_tick(&buffers, hour14).unwrap();
        assert!(dir.path().join("hostglance_2026-07-28_14.prom").exists());

        let hour15 = Utc.with_ymd_and_hms(2026, 7, 28, 15, 0, 0).unwrap();
        chunker.write_tick(&buffers, hour15).unwrap();
        assert!(dir.path().join("hostglance_2026-07-28_15.prom").exists());

        let contents = std::fs::read_to_string(dir.path().join("hostglance_2026-07-28_14.prom")).unwrap();
        assert!(contents.contains("hostglance_scrape_timestamp_ms"));
        assert!(contents.contains("hostglance_snapshot_sequence_number"));
    }
}
