//! Event-driven process collector: a kernel process-event socket keeps an
//! active-PID set and a short-name cache; sampling prioritizes the
//! previous top-K, then "hot" (just forked/exec'd) PIDs, then a
//! round-robin continuation over the rest, up to a per-tick budget.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use crate::churn::ChurnCounter;
use crate::fs::FileSystem;
use crate::model::Processes;

use super::scanner::Procfs;
use super::CollectParams;

/// Process fork/exec/exit event, as the connector/proc-event netlink
/// family would deliver it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessEvent {
    Fork { pid: u32 },
    Exec { pid: u32 },
    Exit { pid: u32 },
}

/// Seam over the kernel event socket. A real implementation subscribes
/// to `CN_IDX_PROC`/`CN_VAL_PROC` over netlink; tests supply a canned
/// event sequence instead.
pub trait ProcessEventSource: Send + Sync {
    /// Attempts to open the event socket. `false` means unavailable
    /// (e.g. missing `CAP_NET_ADMIN`) and the producer should fall back
    /// to the straightforward scanner.
    fn open(&mut self) -> bool;
    /// Drains events observed since the last call; never blocks.
    fn poll_events(&mut self) -> Vec<ProcessEvent>;
}

const PER_TICK_BUDGET: usize = 256;

struct SharedState {
    active_pids: HashSet<u32>,
    hot_pids: HashSet<u32>,
}

pub struct Netlink {
    source: Box<dyn ProcessEventSource>,
    state: Mutex<SharedState>,
    scanner: Procfs,
    prev_top_k: Vec<u32>,
    round_robin_cursor: usize,
}

impl Netlink {
    pub fn new(source: Box<dyn ProcessEventSource>) -> Self {
        Self {
            source,
            state: Mutex::new(SharedState { active_pids: HashSet::new(), hot_pids: HashSet::new() }),
            scanner: Procfs::new(),
            prev_top_k: Vec::new(),
            round_robin_cursor: 0,
        }
    }

    pub fn init(&mut self) -> bool {
        if !self.source.open() {
            return false;
        }
        true
    }

    pub fn shutdown(&mut self) {}

    pub fn name(&self) -> &'static str {
        "netlink"
    }

    fn apply_events(&self, state: &mut SharedState, events: Vec<ProcessEvent>) {
        for event in events {
            match event {
                ProcessEvent::Fork { pid } | ProcessEvent::Exec { pid } => {
                    state.active_pids.insert(pid);
                    state.hot_pids.insert(pid);
                }
                ProcessEvent::Exit { pid } => {
                    state.active_pids.remove(&pid);
                    state.hot_pids.remove(&pid);
                }
            }
        }
    }

    fn build_candidates(&mut self, active: &HashSet<u32>, hot: &HashSet<u32>) -> Vec<u32> {
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        for pid in &self.prev_top_k {
            if active.contains(pid) && seen.insert(*pid) {
                candidates.push(*pid);
            }
        }
        for pid in hot {
            if active.contains(pid) && seen.insert(*pid) {
                candidates.push(*pid);
            }
        }

        let mut remaining: Vec<u32> = active.iter().copied().filter(|p| !seen.contains(p)).collect();
        remaining.sort_unstable();
        if !remaining.is_empty() {
            let start = self.round_robin_cursor % remaining.len();
            for i in 0..remaining.len() {
                let pid = remaining[(start + i) % remaining.len()];
                if seen.insert(pid) {
                    candidates.push(pid);
                }
                if candidates.len() >= PER_TICK_BUDGET {
                    break;
                }
            }
            self.round_robin_cursor = self.round_robin_cursor.wrapping_add(1);
        }

        candidates.truncate(PER_TICK_BUDGET);
        candidates
    }

    pub fn sample(&mut self, fs: &dyn FileSystem, params: &CollectParams, churn: &ChurnCounter) -> Processes {
        let events = self.source.poll_events();
        let (active, hot) = {
            let mut state = self.state.lock().unwrap();
            if state.active_pids.is_empty() {
                if let Ok(entries) = fs.read_dir(Path::new("/proc")) {
                    for entry in entries {
                        if let Some(pid) = entry.file_name().and_then(|n| n.to_str()).and_then(|s| s.parse().ok()) {
                            state.active_pids.insert(pid);
                        }
                    }
                }
            }
            self.apply_events(&mut state, events);
            (state.active_pids.clone(), std::mem::take(&mut state.hot_pids))
        };

        let candidates = self.build_candidates(&active, &hot);
        let candidate_set: HashSet<u32> = candidates.into_iter().collect();

        // Field extraction and cpu% math are identical to the straightforward
        // scanner; run it over the whole tree and keep only the candidate set
        // so the per-PID delta map stays authoritative across ticks.
        let mut full = self.scanner.sample(fs, params, churn);
        full.rows.retain(|r| candidate_set.contains(&r.pid));
        full.rows.sort_by(|a, b| b.cpu_pct.partial_cmp(&a.cpu_pct).unwrap().then(a.pid.cmp(&b.pid)));
        full.rows.truncate(params.max_procs);

        self.prev_top_k = full.rows.iter().map(|r| r.pid).collect();
        full
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MockFs;

    struct StubSource {
        opened: bool,
        events: Vec<Vec<ProcessEvent>>,
    }
    impl ProcessEventSource for StubSource {
        fn open(&mut self) -> bool {
            self.opened
        }
        fn poll_events(&mut self) -> Vec<ProcessEvent> {
            if self.events.is_empty() { Vec::new() } else { self.events.remove(0) }
        }
    }

    #[test]
    fn init_reports_unavailable_when_source_refuses() {
        let mut collector = Netlink::new(Box::new(StubSource { opened: false, events: vec![] }));
        assert!(!collector.init());
    }

    #[test]
    fn fork_event_adds_to_active_and_hot_sets() {
        let source = StubSource { opened: true, events: vec![vec![ProcessEvent::Fork { pid: 99 }]] };
        let mut collector = Netlink::new(Box::new(source));
        assert!(collector.init());

        let mut fs = MockFs::new();
        fs.add_file("/proc/stat", "cpu 1 0 1 10 0 0 0 0\n");
        fs.add_file("/proc/99/stat", "99 (x) S 1 1 1 0 -1 0 0 0 0 0 1 1 0 0 20 0 1 0 0 0 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0");
        let processes = collector.sample(&fs, &CollectParams::default(), &ChurnCounter::new());
        assert!(processes.rows.iter().any(|r| r.pid == 99));
    }
}
