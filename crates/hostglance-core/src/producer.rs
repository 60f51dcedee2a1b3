//! Producer loop (C8): a single dedicated thread that drives every
//! collector on its own cadence, composes the back buffer, and publishes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::alerts::AlertEngine;
use crate::buffers::SnapshotBuffers;
use crate::churn::ChurnCounter;
use crate::collectors::cpu::CpuCollector;
use crate::collectors::disk::DiskCollector;
use crate::collectors::filesystem::FilesystemCollector;
use crate::collectors::gpu_device::GpuDeviceCollector;
use crate::collectors::memory::MemoryCollector;
use crate::collectors::network::NetworkCollector;
use crate::collectors::process::{CollectParams, ProcessCollector};
use crate::collectors::thermal::ThermalCollector;
use crate::fs::FileSystem;
use crate::gpu_attributor::GpuAttributor;

const CPU_PERIOD: Duration = Duration::from_millis(500);
const MEMORY_PERIOD: Duration = Duration::from_millis(500);
const GPU_DEVICE_PERIOD: Duration = Duration::from_millis(1000);
const NETWORK_PERIOD: Duration = Duration::from_millis(1000);
const DISK_PERIOD: Duration = Duration::from_millis(1000);
const PROCESSES_PERIOD: Duration = Duration::from_millis(1000);
const THERMAL_PERIOD: Duration = Duration::from_millis(2000);
const GPU_ATTRIBUTION_PERIOD: Duration = Duration::from_millis(1000);
const PUBLISH_PERIOD: Duration = Duration::from_millis(250);
const FILESYSTEM_PERIOD: Duration = Duration::from_millis(2000);

const WARMUP_BUDGET: Duration = Duration::from_millis(200);
const SLEEP_MIN: Duration = Duration::from_millis(20);
const SLEEP_MAX: Duration = Duration::from_millis(100);

struct DueTimes {
    cpu: Instant,
    memory: Instant,
    gpu_device: Instant,
    network: Instant,
    disk: Instant,
    processes: Instant,
    thermal: Instant,
    filesystem: Instant,
    gpu_attribution: Instant,
    publish: Instant,
}

impl DueTimes {
    fn now(at: Instant) -> Self {
        Self {
            cpu: at,
            memory: at,
            gpu_device: at,
            network: at,
            disk: at,
            processes: at,
            thermal: at,
            filesystem: at,
            gpu_attribution: at,
            publish: at,
        }
    }
}

/// Owns every per-domain collector and the process-collector backend.
/// Constructed once at startup and driven entirely by [`run`].
pub struct Producer<F: FileSystem> {
    fs: F,
    churn: Arc<ChurnCounter>,
    buffers: Arc<SnapshotBuffers>,
    cpu: CpuCollector,
    memory: MemoryCollector,
    gpu_device: GpuDeviceCollector,
    network: NetworkCollector,
    disk: DiskCollector,
    filesystem: FilesystemCollector,
    thermal: ThermalCollector,
    processes: ProcessCollector,
    gpu_attributor: GpuAttributor,
    alerts: AlertEngine,
    params: CollectParams,
    /// Set after every publish: the next loop iteration must copy the new
    /// front into the new back before any collector touches it, or domains
    /// that aren't due this tick would publish whatever the back buffer
    /// held two publishes ago instead of the latest known values.
    needs_back_sync: bool,
}

impl<F: FileSystem> Producer<F> {
    pub fn new(fs: F, churn: Arc<ChurnCounter>, buffers: Arc<SnapshotBuffers>, mut processes: ProcessCollector, params: CollectParams, alerts: AlertEngine) -> Self {
        if !processes.init() {
            warn!("process collector '{}' failed to initialize; falling back to procfs scanner", processes.name());
            processes = ProcessCollector::procfs();
            processes.init();
        }

        Self {
            fs,
            churn,
            buffers,
            cpu: CpuCollector::new(),
            memory: MemoryCollector::new(),
            gpu_device: GpuDeviceCollector::new(),
            network: NetworkCollector::new(),
            disk: DiskCollector::new(),
            filesystem: FilesystemCollector::new(),
            thermal: ThermalCollector::new(),
            processes,
            gpu_attributor: GpuAttributor::new(),
            alerts,
            params,
            needs_back_sync: false,
        }
    }

    /// Copies the just-published front into the new back buffer so that
    /// domains not due this tick keep publishing their latest sampled
    /// values instead of stale ones from two publishes ago.
    fn sync_back_from_front(&self) {
        *self.buffers.back_mut() = self.buffers.read();
    }

    /// Short burst of samples so the first publish has non-zero rates.
    fn warmup(&mut self, stop: &AtomicBool) {
        let start = Instant::now();
        for _ in 0..3 {
            if stop.load(Ordering::Relaxed) || start.elapsed() > WARMUP_BUDGET {
                break;
            }
            self.sample_cpu_and_processes();
            std::thread::sleep(Duration::from_millis(10));
        }
        for _ in 0..2 {
            if stop.load(Ordering::Relaxed) || start.elapsed() > WARMUP_BUDGET {
                break;
            }
            self.sample_net_and_disk();
            std::thread::sleep(Duration::from_millis(60));
        }
        self.sample_memory();
        self.sample_thermal();
        self.sample_gpu_device();
        self.run_alerts_and_publish(Instant::now());
    }

    fn sample_cpu_and_processes(&mut self) {
        let cpu = self.cpu.sample(&self.fs, &self.churn);
        let processes = self.processes.sample(&self.fs, &self.params, &self.churn);
        let back = self.buffers.back_mut();
        back.cpu = cpu;
        back.processes = processes;
        back.collector_name = self.processes.name().to_string();
    }

    fn sample_net_and_disk(&mut self) {
        let network = self.network.sample(&self.fs, &self.churn);
        let disk = self.disk.sample(&self.fs, &self.churn);
        let back = self.buffers.back_mut();
        back.network = network;
        back.disk = disk;
    }

    fn sample_memory(&mut self) {
        let memory = self.memory.sample(&self.fs, &self.churn);
        self.buffers.back_mut().memory = memory;
    }

    fn sample_thermal(&mut self) {
        let thermal = self.thermal.sample(&self.fs, &self.churn);
        self.buffers.back_mut().thermal = thermal;
    }

    fn sample_gpu_device(&mut self) {
        let gpu = self.gpu_device.sample(&self.fs);
        self.buffers.back_mut().gpu_device = gpu;
    }

    fn sample_filesystem(&mut self) {
        let filesystem = self.filesystem.sample(&self.fs, &self.churn);
        self.buffers.back_mut().filesystem = filesystem;
    }

    fn run_gpu_attribution(&mut self) {
        let now = Instant::now();
        let back = self.buffers.back_mut();
        let pids: Vec<u32> = back.processes.rows.iter().map(|r| r.pid).collect();

        let mut raw = self.gpu_attributor.sample_fdinfo(&self.fs, &pids);

        let back = self.buffers.back_mut();
        self.gpu_attributor.apply_fallback_heuristics(&self.fs, &mut raw, &back.processes.rows, &back.gpu_device);
        self.gpu_attributor.enrich(now, &mut back.processes.rows, &raw);
    }

    fn run_alerts_and_publish(&mut self, now: Instant) {
        let back = self.buffers.back_mut();
        back.churn_diagnostics.recent_process_source = self.churn.count_recent_kind(crate::churn::ChurnKind::ProcessSource, Duration::from_secs(2));
        back.churn_diagnostics.recent_system_source = self.churn.count_recent_kind(crate::churn::ChurnKind::SystemSource, Duration::from_secs(2));
        back.churn_diagnostics.recent_total = self.churn.count_recent(Duration::from_secs(2));

        back.nvml_diagnostics = self.gpu_attributor.diagnostics(now, &back.gpu_device);

        let snapshot_copy = back.clone();
        let alerts = self.alerts.evaluate(&snapshot_copy, now);
        self.buffers.back_mut().alerts = alerts;
        self.buffers.publish();
        self.needs_back_sync = true;
    }

    /// Runs the producer loop until `stop` is set. Returns once the loop
    /// has exited cleanly and dropped its own collector state.
    pub fn run(&mut self, stop: Arc<AtomicBool>) {
        self.warmup(&stop);

        let now = Instant::now();
        let mut due = DueTimes::now(now);

        while !stop.load(Ordering::Relaxed) {
            let now = Instant::now();
            let mut any_ran = false;

            if self.needs_back_sync {
                self.sync_back_from_front();
                self.needs_back_sync = false;
            }

            if now >= due.cpu {
                self.sample_cpu_and_processes();
                due.cpu = now + CPU_PERIOD;
                any_ran = true;
            }
            if now >= due.memory {
                self.sample_memory();
                due.memory = now + MEMORY_PERIOD;
                any_ran = true;
            }
            if now >= due.gpu_device {
                self.sample_gpu_device();
                due.gpu_device = now + GPU_DEVICE_PERIOD;
                any_ran = true;
            }
            if now >= due.network {
                self.sample_net_and_disk();
                due.network = now + NETWORK_PERIOD;
                due.disk = now + DISK_PERIOD;
                any_ran = true;
            }
            if now >= due.processes {
                due.processes = now + PROCESSES_PERIOD;
            }
            if now >= due.thermal {
                self.sample_thermal();
                due.thermal = now + THERMAL_PERIOD;
                any_ran = true;
            }
            if now >= due.filesystem {
                self.sample_filesystem();
                due.filesystem = now + FILESYSTEM_PERIOD;
                any_ran = true;
            }
            if now >= due.gpu_attribution {
                self.run_gpu_attribution();
                due.gpu_attribution = now + GPU_ATTRIBUTION_PERIOD;
                any_ran = true;
            }

            if now >= due.publish || any_ran {
                self.run_alerts_and_publish(now);
                due.publish = now + PUBLISH_PERIOD;
            }

            let next_due = [due.cpu, due.memory, due.gpu_device, due.network, due.processes, due.thermal, due.filesystem, due.gpu_attribution, due.publish]
                .into_iter()
                .min()
                .unwrap_or(now + SLEEP_MIN);
            let sleep_for = next_due.saturating_duration_since(now).clamp(SLEEP_MIN, SLEEP_MAX);
            std::thread::sleep(sleep_for);
        }

        debug!("producer loop stopped");
        self.processes.shutdown();
    }
}
