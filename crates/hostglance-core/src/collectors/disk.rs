//! Disk collector: `/proc/diskstats`, rate + utilization derivation.

use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

use crate::churn::{ChurnCounter, ChurnKind};
use crate::fs::FileSystem;
use crate::model::{Disk, DiskDevice};

const SECTOR_BYTES: u64 = 512;
const EXCLUDED_PREFIXES: &[&str] = &["loop", "ram"];

fn is_excluded(name: &str) -> bool {
    EXCLUDED_PREFIXES.iter().any(|p| name.starts_with(p))
}

#[derive(Clone, Copy)]
struct Counters {
    read_sectors: u64,
    write_sectors: u64,
    io_time_ms: u64,
}

fn parse_diskstats(contents: &str) -> Vec<(String, Counters)> {
    let mut out = Vec::new();
    for line in contents.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        // major minor name reads ... read_sectors(5+1=idx5) ... writes ... write_sectors(idx9) ... io_in_progress io_time(idx12)
        if fields.len() < 13 {
            continue;
        }
        let name = fields[2].to_string();
        let Ok(read_sectors) = fields[5].parse() else { continue };
        let Ok(write_sectors) = fields[9].parse() else { continue };
        let Ok(io_time_ms) = fields[12].parse() else { continue };
        out.push((name, Counters { read_sectors, write_sectors, io_time_ms }));
    }
    out
}

pub struct DiskCollector {
    prev: Option<(HashMap<String, Counters>, Instant)>,
}

impl DiskCollector {
    pub fn new() -> Self {
        Self { prev: None }
    }

    pub fn sample(&mut self, fs: &dyn FileSystem, churn: &ChurnCounter) -> Disk {
        let contents = match fs.read_to_string(Path::new("/proc/diskstats")) {
            Ok(c) => c,
            Err(_) => {
                churn.note(ChurnKind::SystemSource);
                return Disk::default();
            }
        };

        let now = Instant::now();
        let parsed: Vec<(String, Counters)> = parse_diskstats(&contents).into_iter().filter(|(n, _)| !is_excluded(n)).collect();

        let mut out = Disk::default();
        let wall_secs = self.prev.as_ref().map(|(_, at)| now.duration_since(*at).as_secs_f64()).unwrap_or(0.0).max(0.0);

        for (name, counters) in &parsed {
            let prev_counters = self.prev.as_ref().and_then(|(map, _)| map.get(name));
            let (read_bps, write_bps, util_pct) = match (prev_counters, wall_secs > 0.0) {
                (Some(prev), true)
                    if counters.read_sectors >= prev.read_sectors && counters.write_sectors >= prev.write_sectors =>
                {
                    let read_bps = (counters.read_sectors - prev.read_sectors) as f64 * SECTOR_BYTES as f64 / wall_secs;
                    let write_bps = (counters.write_sectors - prev.write_sectors) as f64 * SECTOR_BYTES as f64 / wall_secs;
                    let io_delta_ms = counters.io_time_ms.saturating_sub(prev.io_time_ms) as f64;
                    let wall_ms = wall_secs * 1000.0;
                    let util = if wall_ms > 0.0 { (io_delta_ms / wall_ms * 100.0).min(100.0) } else { 0.0 };
                    (read_bps, write_bps, util)
                }
                _ => (0.0, 0.0, 0.0),
            };
            out.read_bytes_per_sec += read_bps;
            out.write_bytes_per_sec += write_bps;
            out.devices.push(DiskDevice {
                name: name.clone(),
                read_sectors: counters.read_sectors,
                write_sectors: counters.write_sectors,
                io_time_ms: counters.io_time_ms,
                read_bytes_per_sec: read_bps,
                write_bytes_per_sec: write_bps,
                util_pct,
            });
        }

        let map: HashMap<String, Counters> = parsed.into_iter().collect();
        self.prev = Some((map, now));
        out
    }
}

impl Default for DiskCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MockFs;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn disk_rate_scenario() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/diskstats", "   8       0 sda 100 0 1000 0 200 0 2000 0 0 100 0\n");
        let mut collector = DiskCollector::new();
        collector.sample(&fs, &ChurnCounter::new());

        sleep(Duration::from_millis(120));
        fs.add_file("/proc/diskstats", "   8       0 sda 150 0 2000 0 260 0 2600 0 0 160 0\n");
        let disk = collector.sample(&fs, &ChurnCounter::new());
        assert!(disk.read_bytes_per_sec > 0.0);
        assert!(disk.devices[0].util_pct > 0.0);
        assert!(disk.devices[0].util_pct <= 100.0);
    }

    #[test]
    fn excludes_loop_and_ram_devices() {
        let mut fs = MockFs::new();
        fs.add_file(
            "/proc/diskstats",
            "   7       0 loop0 1 0 2 0 0 0 0 0 0 0 0\n 1 0 ram0 1 0 2 0 0 0 0 0 0 0 0\n 8 0 sda 1 0 2 0 0 0 0 0 0 0 0\n",
        );
        let mut collector = DiskCollector::new();
        let disk = collector.sample(&fs, &ChurnCounter::new());
        assert_eq!(disk.devices.len(), 1);
        assert_eq!(disk.devices[0].name, "sda");
    }
}
