//! Straightforward process-source directory scanner.

use std::collections::HashMap;
use std::path::Path;

use crate::churn::{ChurnCounter, ChurnKind};
use crate::fs::FileSystem;
use crate::model::{ChurnReason, ProcessRow, Processes};

use super::CollectParams;

const PAGE_SIZE_BYTES: u64 = 4096;

struct StatFields {
    state: char,
    ppid: u32,
    utime: u64,
    stime: u64,
    rss_pages: u64,
}

/// Parses `/proc/<pid>/stat`, handling a command name that may itself
/// contain spaces or parentheses by matching on the last `)`.
fn parse_stat_line(line: &str) -> Option<StatFields> {
    let open = line.find('(')?;
    let close = line.rfind(')')?;
    if close <= open {
        return None;
    }
    let rest = line[close + 1..].trim_start();
    let mut fields = rest.split_whitespace();

    let state = fields.next()?.chars().next()?;
    let ppid: u32 = fields.next()?.parse().ok()?;
    // pgrp, session, tty_nr, tpgid, flags, minflt, cminflt, majflt, cmajflt
    for _ in 0..9 {
        fields.next();
    }
    let utime: u64 = fields.next()?.parse().ok()?;
    let stime: u64 = fields.next()?.parse().ok()?;
    // cutime, cstime, priority, nice, num_threads, itrealvalue, starttime, vsize
    for _ in 0..8 {
        fields.next();
    }
    let rss_pages: u64 = fields.next()?.parse().ok()?;

    Some(StatFields { state, ppid, utime, stime, rss_pages })
}

fn read_cmdline(fs: &dyn FileSystem, pid: u32) -> Option<String> {
    let bytes = fs.read_to_bytes(Path::new(&format!("/proc/{pid}/cmdline"))).ok()?;
    let mut s: String = bytes.split(|b| *b == 0).filter(|part| !part.is_empty()).map(|part| String::from_utf8_lossy(part)).collect::<Vec<_>>().join(" ");
    if s.is_empty() {
        s = String::new();
    }
    Some(s)
}

fn read_exe_path(fs: &dyn FileSystem, pid: u32) -> String {
    fs.read_link(Path::new(&format!("/proc/{pid}/exe"))).ok().map(|p| p.display().to_string()).unwrap_or_default()
}

struct StatusInfo {
    uid: u32,
    threads: u32,
}

fn parse_status(contents: &str) -> Option<StatusInfo> {
    let mut uid = None;
    let mut threads = None;
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("Uid:") {
            uid = rest.split_whitespace().next().and_then(|v| v.parse().ok());
        } else if let Some(rest) = line.strip_prefix("Threads:") {
            threads = rest.trim().parse().ok();
        }
    }
    Some(StatusInfo { uid: uid?, threads: threads.unwrap_or(1) })
}

fn resolve_user_name(fs: &dyn FileSystem, uid: u32, cache: &mut HashMap<u32, String>) -> String {
    if let Some(name) = cache.get(&uid) {
        return name.clone();
    }
    let name = fs
        .read_to_string(Path::new("/etc/passwd"))
        .ok()
        .and_then(|contents| {
            contents.lines().find_map(|line| {
                let mut fields = line.split(':');
                let name = fields.next()?;
                fields.next()?; // password
                let line_uid: u32 = fields.next()?.parse().ok()?;
                (line_uid == uid).then(|| name.to_string())
            })
        })
        .unwrap_or_else(|| uid.to_string());
    cache.insert(uid, name.clone());
    name
}

pub struct Procfs {
    prev_jiffies: HashMap<u32, u64>,
    prev_total: u64,
    user_cache: HashMap<u32, String>,
    logical_threads: u32,
}

impl Procfs {
    pub fn new() -> Self {
        Self { prev_jiffies: HashMap::new(), prev_total: 0, user_cache: HashMap::new(), logical_threads: 1 }
    }

    pub fn init(&mut self) -> bool {
        true
    }

    pub fn shutdown(&mut self) {}

    pub fn name(&self) -> &'static str {
        "procfs"
    }

    fn cpu_total(&self, fs: &dyn FileSystem) -> u64 {
        fs.read_to_string(Path::new("/proc/stat"))
            .ok()
            .and_then(|contents| contents.lines().find(|l| l.starts_with("cpu ")).map(|l| l.to_string()))
            .and_then(|line| {
                let sum: u64 = line.split_whitespace().skip(1).take(8).filter_map(|v| v.parse::<u64>().ok()).sum();
                Some(sum)
            })
            .unwrap_or(0)
    }

    fn cpu_count(&self, fs: &dyn FileSystem) -> u32 {
        fs.read_to_string(Path::new("/proc/stat"))
            .map(|contents| contents.lines().filter(|l| l.starts_with("cpu") && l.as_bytes().get(3).is_some_and(u8::is_ascii_digit)).count() as u32)
            .unwrap_or(1)
            .max(1)
    }

    fn thread_cap(&self, fs: &dyn FileSystem) -> u32 {
        fs.read_to_string(Path::new("/sys/kernel/threads-max")).ok().and_then(|s| s.trim().parse().ok()).unwrap_or(0)
    }

    pub fn sample(&mut self, fs: &dyn FileSystem, params: &CollectParams, churn: &ChurnCounter) -> Processes {
        self.logical_threads = self.cpu_count(fs);
        let total_now = self.cpu_total(fs);
        let total_delta = total_now.saturating_sub(self.prev_total);

        let Ok(entries) = fs.read_dir(Path::new("/proc")) else {
            churn.note(ChurnKind::ProcessSource);
            return Processes::default();
        };

        let mut rows = Vec::new();
        let mut running = 0u32;
        let mut sleeping = 0u32;
        let mut zombie = 0u32;
        let mut total_threads = 0u32;
        let mut next_prev_jiffies = HashMap::new();

        for entry in &entries {
            let Some(pid) = entry.file_name().and_then(|n| n.to_str()).and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };

            let stat_contents = match fs.read_to_string(&entry.join("stat")) {
                Ok(c) => c,
                Err(_) => {
                    churn.note(ChurnKind::ProcessSource);
                    rows.push(ProcessRow { pid, churn_reason: Some(ChurnReason::ReadFailed), ..Default::default() });
                    continue;
                }
            };
            let Some(fields) = parse_stat_line(&stat_contents) else {
                churn.note(ChurnKind::ProcessSource);
                rows.push(ProcessRow { pid, churn_reason: Some(ChurnReason::ReadFailed), ..Default::default() });
                continue;
            };

            match fields.state {
                'R' => running += 1,
                'Z' => zombie += 1,
                _ => sleeping += 1,
            }

            let jiffies_now = fields.utime + fields.stime;
            let jiffies_delta = jiffies_now.saturating_sub(*self.prev_jiffies.get(&pid).unwrap_or(&jiffies_now));
            let cpu_pct = if total_delta == 0 {
                0.0
            } else {
                (jiffies_delta as f64 / total_delta as f64) * 100.0 * self.logical_threads as f64
            };
            next_prev_jiffies.insert(pid, jiffies_now);

            total_threads += 1; // conservative estimate; enrichment overwrites below

            rows.push(ProcessRow {
                pid,
                ppid: fields.ppid,
                rss_kb: fields.rss_pages * PAGE_SIZE_BYTES / 1024,
                utime: fields.utime,
                stime: fields.stime,
                cpu_pct,
                ..Default::default()
            });
        }

        // Captured before top-K truncation: §8 requires this to reflect every
        // enumerated PID, not just the rows that survive selection.
        let total_processes = rows.len() as u32;

        rows.sort_by(|a, b| b.cpu_pct.partial_cmp(&a.cpu_pct).unwrap().then(a.pid.cmp(&b.pid)));
        rows.truncate(params.max_procs);

        let mut enriched_count = 0u32;
        for row in rows.iter_mut().take(params.enrich_top_n) {
            if row.churn_reason.is_some() {
                continue;
            }
            let status = fs.read_to_string(Path::new(&format!("/proc/{}/status", row.pid))).ok().and_then(|c| parse_status(&c));
            if let Some(status) = status {
                row.user_name = resolve_user_name(fs, status.uid, &mut self.user_cache);
                total_threads = total_threads.saturating_sub(1) + status.threads;
            }
            row.cmd = read_cmdline(fs, row.pid).unwrap_or_default();
            row.exe_path = read_exe_path(fs, row.pid);
            enriched_count += 1;
        }

        self.prev_jiffies = next_prev_jiffies;
        self.prev_total = total_now;

        let tracked_count = rows.len() as u32;
        Processes {
            total_processes,
            running,
            sleeping,
            zombie,
            total_threads,
            thread_cap: self.thread_cap(fs),
            enriched_count,
            tracked_count,
            rows,
        }
    }
}

impl Default for Procfs {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MockFs;

    fn stat_line(pid: u32, comm: &str, state: char, ppid: u32, utime: u64, stime: u64) -> String {
        format!("{pid} ({comm}) {state} {ppid} 1 1 0 -1 0 0 0 0 0 {utime} {stime} 0 0 20 0 1 0 0 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0")
    }

    #[test]
    fn parses_stat_with_spaces_in_comm() {
        let line = "42 (my cool proc) S 1 1 1 0 -1 0 0 0 0 0 10 5 0 0 20 0 1 0 0 0 2048 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0";
        let fields = parse_stat_line(line).unwrap();
        assert_eq!(fields.state, 'S');
        assert_eq!(fields.ppid, 1);
        assert_eq!(fields.utime, 10);
        assert_eq!(fields.stime, 5);
        assert_eq!(fields.rss_pages, 2048);
    }

    #[test]
    fn first_call_yields_zero_cpu_pct() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/stat", "cpu 100 0 100 1000 0 0 0 0\n");
        fs.add_dir("/proc");
        fs.add_file("/proc/42/stat", stat_line(42, "bash", 'S', 1, 10, 5));

        let mut collector = Procfs::new();
        let processes = collector.sample(&fs, &CollectParams::default(), &ChurnCounter::new());
        assert_eq!(processes.rows.len(), 1);
        assert_eq!(processes.rows[0].cpu_pct, 0.0);
    }

    #[test]
    fn missing_pid_on_second_read_becomes_churn_row() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/stat", "cpu 100 0 100 1000 0 0 0 0\n");
        fs.add_dir("/proc/42");

        let mut collector = Procfs::new();
        let churn = ChurnCounter::new();
        let processes = collector.sample(&fs, &CollectParams::default(), &churn);
        assert_eq!(processes.rows[0].churn_reason, Some(ChurnReason::ReadFailed));
        assert_eq!(processes.total_processes, processes.rows.len() as u32);
    }

    #[test]
    fn sorted_descending_by_cpu_pct_with_pid_tiebreak() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/stat", "cpu 200 0 200 2000 0 0 0 0\n");
        fs.add_file("/proc/10/stat", stat_line(10, "a", 'S', 1, 5, 5));
        fs.add_file("/proc/20/stat", stat_line(20, "b", 'S', 1, 50, 50));

        let mut collector = Procfs::new();
        collector.sample(&fs, &CollectParams::default(), &ChurnCounter::new());

        fs.add_file("/proc/stat", "cpu 300 0 300 3000 0 0 0 0\n");
        fs.add_file("/proc/10/stat", stat_line(10, "a", 'S', 1, 15, 15));
        fs.add_file("/proc/20/stat", stat_line(20, "b", 'S', 1, 150, 150));

        let processes = collector.sample(&fs, &CollectParams::default(), &ChurnCounter::new());
        assert!(processes.rows[0].cpu_pct >= processes.rows[1].cpu_pct);
        assert_eq!(processes.rows[0].pid, 20);
    }
}
