//! Memory collector: `/proc/meminfo`.

use std::path::Path;

use crate::churn::{ChurnCounter, ChurnKind};
use crate::fs::FileSystem;
use crate::model::Memory;

fn parse_meminfo(contents: &str) -> Memory {
    let mut total = 0u64;
    let mut free = 0u64;
    let mut available = None;
    let mut buffers = 0u64;
    let mut cached = 0u64;
    let mut swap_total = 0u64;
    let mut swap_free = 0u64;

    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            total = parse_kb_value(rest);
        } else if let Some(rest) = line.strip_prefix("MemFree:") {
            free = parse_kb_value(rest);
        } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
            available = Some(parse_kb_value(rest));
        } else if let Some(rest) = line.strip_prefix("Buffers:") {
            buffers = parse_kb_value(rest);
        } else if let Some(rest) = line.strip_prefix("Cached:") {
            cached = parse_kb_value(rest);
        } else if let Some(rest) = line.strip_prefix("SwapTotal:") {
            swap_total = parse_kb_value(rest);
        } else if let Some(rest) = line.strip_prefix("SwapFree:") {
            swap_free = parse_kb_value(rest);
        }
    }

    let available_kb = available.unwrap_or(free + buffers + cached);
    let used_kb = total.saturating_sub(available_kb);
    let swap_used_kb = swap_total.saturating_sub(swap_free);
    let used_pct = if total == 0 { 0.0 } else { used_kb as f64 / total as f64 * 100.0 };

    Memory {
        total_kb: total,
        used_kb,
        available_kb,
        cached_kb: cached,
        buffers_kb: buffers,
        swap_total_kb: swap_total,
        swap_used_kb,
        used_pct,
    }
}

fn parse_kb_value(rest: &str) -> u64 {
    rest.trim().split_whitespace().next().and_then(|n| n.parse().ok()).unwrap_or(0)
}

pub struct MemoryCollector;

impl MemoryCollector {
    pub fn new() -> Self {
        Self
    }

    pub fn sample(&mut self, fs: &dyn FileSystem, churn: &ChurnCounter) -> Memory {
        match fs.read_to_string(Path::new("/proc/meminfo")) {
            Ok(contents) => parse_meminfo(&contents),
            Err(_) => {
                churn.note(ChurnKind::SystemSource);
                Memory::default()
            }
        }
    }
}

impl Default for MemoryCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MockFs;

    #[test]
    fn memory_parse_scenario() {
        let mut fs = MockFs::new();
        fs.add_file(
            "/proc/meminfo",
            "MemTotal:       2097152 kB\nMemFree:         524288 kB\nMemAvailable:   1048576 kB\nBuffers:         131072 kB\nCached:          262144 kB\n",
        );
        let mut collector = MemoryCollector::new();
        let mem = collector.sample(&fs, &ChurnCounter::new());
        assert_eq!(mem.total_kb, 2097152);
        assert_eq!(mem.used_kb, 1048576);
        assert!(mem.used_pct > 49.5 && mem.used_pct < 50.5);
    }

    #[test]
    fn falls_back_when_mem_available_missing() {
        let contents = "MemTotal:  1000 kB\nMemFree:  200 kB\nBuffers:  100 kB\nCached:  100 kB\n";
        let mem = parse_meminfo(contents);
        assert_eq!(mem.available_kb, 400);
        assert_eq!(mem.used_kb, 600);
    }
}
