//! CPU collector: aggregate + per-core utilization from `/proc/stat`,
//! model/topology from `/proc/cpuinfo`.

use std::path::Path;
use std::time::Instant;

use crate::churn::{ChurnCounter, ChurnKind};
use crate::fs::FileSystem;
use crate::model::Cpu;

#[derive(Debug, Clone, Copy, Default)]
struct Jiffies {
    user: u64,
    nice: u64,
    system: u64,
    idle: u64,
    iowait: u64,
    irq: u64,
    softirq: u64,
    steal: u64,
}

impl Jiffies {
    fn total(&self) -> u64 {
        self.user + self.nice + self.system + self.idle + self.iowait + self.irq + self.softirq + self.steal
    }

    fn work(&self) -> u64 {
        self.user + self.nice + self.system + self.irq + self.softirq + self.steal
    }
}

fn parse_cpu_line(line: &str) -> Option<Jiffies> {
    let mut fields = line.split_whitespace();
    fields.next()?; // "cpu" or "cpuN"
    let mut v = [0u64; 8];
    for slot in v.iter_mut() {
        *slot = fields.next()?.parse().ok()?;
    }
    Some(Jiffies {
        user: v[0],
        nice: v[1],
        system: v[2],
        idle: v[3],
        iowait: v[4],
        irq: v[5],
        softirq: v[6],
        steal: v[7],
    })
}

struct ParsedStat {
    total: Jiffies,
    per_core: Vec<Jiffies>,
    ctxt: u64,
    intr: u64,
}

fn parse_proc_stat(contents: &str) -> Option<ParsedStat> {
    let mut total = None;
    let mut per_core = Vec::new();
    let mut ctxt = 0u64;
    let mut intr = 0u64;
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("cpu") {
            if rest.starts_with(char::is_numeric) {
                per_core.push(parse_cpu_line(line)?);
            } else if total.is_none() {
                total = parse_cpu_line(line);
            }
        } else if let Some(rest) = line.strip_prefix("ctxt ") {
            ctxt = rest.trim().parse().unwrap_or(0);
        } else if let Some(rest) = line.strip_prefix("intr ") {
            intr = rest.split_whitespace().next().unwrap_or("0").parse().unwrap_or(0);
        }
    }
    Some(ParsedStat { total: total?, per_core, ctxt, intr })
}

/// Physical-core and logical-thread counts plus model string, parsed
/// once from `/proc/cpuinfo` (grouping `physical id` and `cpu cores`).
fn parse_cpuinfo(contents: &str) -> (String, u32, u32) {
    let mut model_name = String::new();
    let mut physical_ids: Vec<(u32, u32)> = Vec::new(); // (physical id, cpu cores)
    let mut current_physical: Option<u32> = None;
    let mut current_cores: Option<u32> = None;
    let mut logical_threads = 0u32;

    for line in contents.lines() {
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim();
            let value = value.trim();
            match key {
                "model name" if model_name.is_empty() => model_name = value.to_string(),
                "physical id" => current_physical = value.parse().ok(),
                "cpu cores" => current_cores = value.parse().ok(),
                "processor" => logical_threads += 1,
                _ => {}
            }
        } else if line.trim().is_empty() {
            if let (Some(pid), Some(cores)) = (current_physical, current_cores) {
                if !physical_ids.iter().any(|(id, _)| *id == pid) {
                    physical_ids.push((pid, cores));
                }
            }
            current_physical = None;
            current_cores = None;
        }
    }
    if let (Some(pid), Some(cores)) = (current_physical, current_cores) {
        if !physical_ids.iter().any(|(id, _)| *id == pid) {
            physical_ids.push((pid, cores));
        }
    }

    let physical_cores: u32 = if physical_ids.is_empty() {
        logical_threads.max(1)
    } else {
        physical_ids.iter().map(|(_, c)| c).sum()
    };

    (model_name, physical_cores, logical_threads.max(1))
}

pub struct CpuCollector {
    prev: Option<(Jiffies, Vec<Jiffies>, u64, u64, Instant)>,
    topology: Option<(String, u32, u32)>,
}

impl CpuCollector {
    pub fn new() -> Self {
        Self { prev: None, topology: None }
    }

    pub fn sample(&mut self, fs: &dyn FileSystem, churn: &ChurnCounter) -> Cpu {
        let mut out = Cpu::default();

        if self.topology.is_none() {
            match fs.read_to_string(Path::new("/proc/cpuinfo")) {
                Ok(contents) => self.topology = Some(parse_cpuinfo(&contents)),
                Err(_) => churn.note(ChurnKind::SystemSource),
            }
        }
        if let Some((name, phys, threads)) = &self.topology {
            out.model_name = name.clone();
            out.physical_cores = *phys;
            out.logical_threads = *threads;
        }

        let contents = match fs.read_to_string(Path::new("/proc/stat")) {
            Ok(c) => c,
            Err(_) => {
                churn.note(ChurnKind::SystemSource);
                return out;
            }
        };
        let Some(parsed) = parse_proc_stat(&contents) else {
            churn.note(ChurnKind::SystemSource);
            return out;
        };

        out.user = parsed.total.user;
        out.nice = parsed.total.nice;
        out.system = parsed.total.system;
        out.idle = parsed.total.idle;
        out.iowait = parsed.total.iowait;
        out.irq = parsed.total.irq;
        out.softirq = parsed.total.softirq;
        out.steal = parsed.total.steal;

        let now = Instant::now();
        match &self.prev {
            None => {
                out.per_core_pct = vec![0.0; parsed.per_core.len()];
            }
            Some((prev_total, prev_cores, prev_ctxt, prev_intr, prev_at)) => {
                let total_delta = parsed.total.total().saturating_sub(prev_total.total());
                let work_delta = parsed.total.work().saturating_sub(prev_total.work());
                out.total_pct = pct(work_delta, total_delta);
                out.user_pct = pct(parsed.total.user.saturating_sub(prev_total.user), total_delta);
                out.system_pct = pct(parsed.total.system.saturating_sub(prev_total.system), total_delta);
                out.iowait_pct = pct(parsed.total.iowait.saturating_sub(prev_total.iowait), total_delta);
                out.irq_pct = pct(
                    parsed.total.irq.saturating_sub(prev_total.irq) + parsed.total.softirq.saturating_sub(prev_total.softirq),
                    total_delta,
                );
                out.steal_pct = pct(parsed.total.steal.saturating_sub(prev_total.steal), total_delta);

                out.per_core_pct = parsed
                    .per_core
                    .iter()
                    .zip(prev_cores.iter().chain(std::iter::repeat(&Jiffies::default())))
                    .map(|(now, prev)| {
                        let td = now.total().saturating_sub(prev.total());
                        let wd = now.work().saturating_sub(prev.work());
                        pct(wd, td)
                    })
                    .collect();

                let wall_secs = now.duration_since(*prev_at).as_secs_f64().max(f64::EPSILON);
                out.ctxt_per_sec = parsed.ctxt.saturating_sub(*prev_ctxt) as f64 / wall_secs;
                out.intr_per_sec = parsed.intr.saturating_sub(*prev_intr) as f64 / wall_secs;
            }
        }

        self.prev = Some((parsed.total, parsed.per_core, parsed.ctxt, parsed.intr, now));
        out
    }
}

impl Default for CpuCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn pct(delta: u64, total_delta: u64) -> f64 {
    if total_delta == 0 {
        0.0
    } else {
        (delta as f64 / total_delta as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MockFs;

    #[test]
    fn first_call_yields_zero_rate_with_absolutes() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/stat", "cpu  100 0 100 1000 0 0 0 0\ncpu0 100 0 100 1000 0 0 0 0\nctxt 500\nintr 900 0\n");
        let mut collector = CpuCollector::new();
        let cpu = collector.sample(&fs, &ChurnCounter::new());
        assert_eq!(cpu.user, 100);
        assert_eq!(cpu.total_pct, 0.0);
        assert_eq!(cpu.per_core_pct, vec![0.0]);
    }

    #[test]
    fn second_call_yields_delta_based_percent() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/stat", "cpu 100 0 100 1000 0 0 0 0\n");
        let mut collector = CpuCollector::new();
        collector.sample(&fs, &ChurnCounter::new());

        fs.add_file("/proc/stat", "cpu 150 0 150 1100 0 0 0 0\n");
        let cpu = collector.sample(&fs, &ChurnCounter::new());
        assert!(cpu.total_pct > 40.0 && cpu.total_pct < 60.0);
    }

    #[test]
    fn cpuinfo_groups_physical_cores() {
        let contents = "\
processor\t: 0\nphysical id\t: 0\ncpu cores\t: 4\nmodel name\t: Test CPU\n\n\
processor\t: 1\nphysical id\t: 0\ncpu cores\t: 4\nmodel name\t: Test CPU\n\n";
        let (name, phys, threads) = parse_cpuinfo(contents);
        assert_eq!(name, "Test CPU");
        assert_eq!(phys, 4);
        assert_eq!(threads, 2);
    }
}
