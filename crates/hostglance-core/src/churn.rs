//! Process-wide churn counter (C6).
//!
//! A thread-safe rolling list of read-failure events, keyed by source
//! kind. The producer reads recent counts just before publishing and
//! writes them into `ChurnDiagnostics`; the security evaluator reads the
//! same counts to spot an "auth crashloop" pattern.

use std::sync::Mutex;
use std::time::{Duration, Instant};

const PRUNE_WINDOW: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChurnKind {
    ProcessSource,
    SystemSource,
}

struct Event {
    kind: ChurnKind,
    at: Instant,
}

/// Global rolling churn counter. Construct one and share it behind an `Arc`.
pub struct ChurnCounter {
    events: Mutex<Vec<Event>>,
}

impl ChurnCounter {
    pub fn new() -> Self {
        Self { events: Mutex::new(Vec::new()) }
    }

    /// Records a churn event of the given kind at the current instant.
    pub fn note(&self, kind: ChurnKind) {
        let mut events = self.events.lock().unwrap();
        events.push(Event { kind, at: Instant::now() });
        Self::prune(&mut events);
    }

    /// Counts all events within `window` of now, across all kinds.
    pub fn count_recent(&self, window: Duration) -> u32 {
        let mut events = self.events.lock().unwrap();
        Self::prune(&mut events);
        let cutoff = Instant::now().checked_sub(window).unwrap_or_else(Instant::now);
        events.iter().filter(|e| e.at >= cutoff).count() as u32
    }

    /// Counts events of a given kind within `window` of now.
    pub fn count_recent_kind(&self, kind: ChurnKind, window: Duration) -> u32 {
        let mut events = self.events.lock().unwrap();
        Self::prune(&mut events);
        let cutoff = Instant::now().checked_sub(window).unwrap_or_else(Instant::now);
        events.iter().filter(|e| e.at >= cutoff && e.kind == kind).count() as u32
    }

    fn prune(events: &mut Vec<Event>) {
        let cutoff = Instant::now().checked_sub(PRUNE_WINDOW).unwrap_or_else(Instant::now);
        events.retain(|e| e.at >= cutoff);
    }
}

impl Default for ChurnCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_recent_events_by_kind() {
        let c = ChurnCounter::new();
        c.note(ChurnKind::ProcessSource);
        c.note(ChurnKind::SystemSource);
        c.note(ChurnKind::ProcessSource);

        assert_eq!(c.count_recent(Duration::from_secs(2)), 3);
        assert_eq!(c.count_recent_kind(ChurnKind::ProcessSource, Duration::from_secs(2)), 2);
        assert_eq!(c.count_recent_kind(ChurnKind::SystemSource, Duration::from_secs(2)), 1);
    }

    #[test]
    fn old_events_do_not_count() {
        let c = ChurnCounter::new();
        c.note(ChurnKind::ProcessSource);
        assert_eq!(c.count_recent(Duration::from_millis(0)), 0);
    }
}
