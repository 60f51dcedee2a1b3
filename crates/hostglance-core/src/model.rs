//! Flat snapshot data model — the single published record.
//!
//! Every collector fills in one piece of [`Snapshot`]; nothing downstream
//! ever sees a partially-filled value, since the producer only publishes
//! once the whole back buffer has been composed for a tick.

use serde::{Deserialize, Serialize};

/// The atomic unit of publication. Copied field-wise out of the snapshot
/// buffers under a seqlock retry (see `buffers.rs`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    /// Monotone counter; increments on every publish.
    pub sequence_number: u64,
    pub cpu: Cpu,
    pub memory: Memory,
    pub gpu_device: GpuDevices,
    pub network: Network,
    pub disk: Disk,
    pub filesystem: Vec<FilesystemMount>,
    pub processes: Processes,
    pub alerts: Vec<Alert>,
    pub thermal: Thermal,
    pub nvml_diagnostics: NvmlDiagnostics,
    pub churn_diagnostics: ChurnDiagnostics,
    /// Human-readable name of the active process collector (`"procfs"`, `"netlink"`, `"kernel"`).
    pub collector_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cpu {
    /// Source: `/proc/stat` "cpu " line, aggregate jiffies.
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
    /// Per-core utilization percent, index = core id.
    pub per_core_pct: Vec<f64>,
    /// Aggregate utilization percent across all cores.
    pub total_pct: f64,
    pub model_name: String,
    pub physical_cores: u32,
    pub logical_threads: u32,
    pub ctxt_per_sec: f64,
    pub intr_per_sec: f64,
    pub user_pct: f64,
    pub system_pct: f64,
    pub iowait_pct: f64,
    pub irq_pct: f64,
    pub steal_pct: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Memory {
    pub total_kb: u64,
    pub used_kb: u64,
    pub available_kb: u64,
    pub cached_kb: u64,
    pub buffers_kb: u64,
    pub swap_total_kb: u64,
    pub swap_used_kb: u64,
    pub used_pct: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GpuDevices {
    pub devices: Vec<GpuDevice>,
    pub total_vram_total_mib: u64,
    pub total_vram_used_mib: u64,
    pub summary_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GpuDevice {
    pub name: String,
    pub vram_total_mib: u64,
    pub vram_used_mib: u64,
    pub temp_edge_c: Option<f64>,
    pub temp_hotspot_c: Option<f64>,
    pub temp_memory_c: Option<f64>,
    pub temp_warning_c: Option<f64>,
    pub fan_pct: Option<f64>,
    pub power_watts: Option<f64>,
    pub power_limit_watts: Option<f64>,
    pub perf_state: Option<String>,
    pub core_util_pct: Option<f64>,
    pub mem_util_pct: Option<f64>,
    pub encoder_util_pct: Option<f64>,
    pub decoder_util_pct: Option<f64>,
    pub mig_enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Network {
    pub interfaces: Vec<NetworkInterface>,
    pub rx_bytes_per_sec: f64,
    pub tx_bytes_per_sec: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub name: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_bytes_per_sec: f64,
    pub tx_bytes_per_sec: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Disk {
    pub devices: Vec<DiskDevice>,
    pub read_bytes_per_sec: f64,
    pub write_bytes_per_sec: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiskDevice {
    pub name: String,
    pub read_sectors: u64,
    pub write_sectors: u64,
    pub io_time_ms: u64,
    pub read_bytes_per_sec: f64,
    pub write_bytes_per_sec: f64,
    pub util_pct: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilesystemMount {
    pub device: String,
    pub mountpoint: String,
    pub fstype: String,
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub avail_bytes: u64,
    pub used_pct: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Processes {
    pub rows: Vec<ProcessRow>,
    pub total_processes: u32,
    pub running: u32,
    pub sleeping: u32,
    pub zombie: u32,
    pub total_threads: u32,
    pub thread_cap: u32,
    pub enriched_count: u32,
    pub tracked_count: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessRow {
    pub pid: u32,
    pub ppid: u32,
    pub user_name: String,
    pub cmd: String,
    pub exe_path: String,
    pub rss_kb: u64,
    pub utime: u64,
    pub stime: u64,
    pub cpu_pct: f64,
    pub has_gpu_util: bool,
    pub gpu_util_pct: f64,
    pub gpu_util_raw_pct: f64,
    pub gpu_vram_kb: u64,
    pub churn_reason: Option<ChurnReason>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChurnReason {
    ReadFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Thermal {
    pub cpu_max_temp_c: Option<f64>,
    pub warning_temp_c: Option<f64>,
    pub fan_rpm: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NvmlDiagnostics {
    pub available: bool,
    pub device_count: u32,
    pub running_pid_count: u32,
    pub sampled_pid_count: u32,
    pub sample_age_ms: u64,
    pub mig_enabled: bool,
    pub driver_version: String,
    pub nvml_version: String,
    pub cuda_version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChurnDiagnostics {
    pub recent_total: u32,
    pub recent_process_source: u32,
    pub recent_system_source: u32,
}

/// Severity ranking, high to low — used to sort security findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FindingSeverity {
    Caution,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityFinding {
    pub severity: FindingSeverity,
    pub reason: String,
    pub pid: Option<u32>,
}
