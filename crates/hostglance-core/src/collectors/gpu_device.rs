//! GPU device collector: discovers devices through up to three backends,
//! tried in order — NVML, the NVIDIA `/proc` driver tree, then DRM sysfs.

use std::path::{Path, PathBuf};

use crate::fs::FileSystem;
use crate::model::{GpuDevice, GpuDevices};

/// Per-device sample a real NVML binding would return. Runtime `dlopen`
/// of the vendor library is out of scope here; this trait is the seam a
/// real NVML binding would implement, and the fusion logic around it
/// below is fully exercised against a stub in tests.
pub trait NvmlBackend: Send + Sync {
    fn available(&self) -> bool;
    fn devices(&self) -> Vec<GpuDevice>;
}

/// Always-unavailable stand-in used whenever no real NVML binding is wired up.
pub struct UnavailableNvml;

impl NvmlBackend for UnavailableNvml {
    fn available(&self) -> bool {
        false
    }
    fn devices(&self) -> Vec<GpuDevice> {
        Vec::new()
    }
}

fn extract_labeled_int(contents: &str, label: &str) -> Option<u64> {
    contents.lines().find_map(|line| {
        let line = line.trim();
        if !line.starts_with(label) {
            return None;
        }
        line.chars().filter(|c| c.is_ascii_digit()).collect::<String>().parse().ok()
    })
}

fn extract_model_name(contents: &str) -> Option<String> {
    contents.lines().find_map(|line| line.trim().strip_prefix("Model:").map(|v| v.trim().to_string()))
}

/// Parses the NVIDIA vendor `/proc` driver tree: one directory per
/// device under `/proc/driver/nvidia/gpus/`, each with `fb_memory_usage`
/// (Total/Used in KiB) and an `information` file (friendly model name).
fn read_nvidia_proc(fs: &dyn FileSystem) -> Vec<GpuDevice> {
    let Ok(device_dirs) = fs.read_dir(Path::new("/proc/driver/nvidia/gpus")) else {
        return Vec::new();
    };

    let mut devices = Vec::new();
    for dir in device_dirs {
        let Ok(fb) = fs.read_to_string(&dir.join("fb_memory_usage")) else { continue };
        let total_kib = extract_labeled_int(&fb, "Total").unwrap_or(0);
        let used_kib = extract_labeled_int(&fb, "Used").unwrap_or(0);
        let name = fs.read_to_string(&dir.join("information")).ok().and_then(|c| extract_model_name(&c)).unwrap_or_default();

        devices.push(GpuDevice {
            name,
            vram_total_mib: total_kib / 1024,
            vram_used_mib: used_kib / 1024,
            ..Default::default()
        });
    }
    devices
}

/// Parses DRM sysfs (`/sys/class/drm/cardN/device`) for AMD/Intel devices.
fn read_drm_sysfs(fs: &dyn FileSystem) -> Vec<GpuDevice> {
    let Ok(entries) = fs.read_dir(Path::new("/sys/class/drm")) else {
        return Vec::new();
    };

    let mut devices = Vec::new();
    for entry in entries {
        let Some(name) = entry.file_name().and_then(|n| n.to_str()) else { continue };
        if !name.starts_with("card") || name.contains('-') {
            continue;
        }
        let device_dir = entry.join("device");
        if !fs.exists(&device_dir) {
            continue;
        }

        let vram_total_bytes: u64 =
            fs.read_to_string(&device_dir.join("mem_info_vram_total")).ok().and_then(|s| s.trim().parse().ok()).unwrap_or(0);
        let vram_used_bytes: u64 =
            fs.read_to_string(&device_dir.join("mem_info_vram_used")).ok().and_then(|s| s.trim().parse().ok()).unwrap_or(0);
        let core_util_pct: Option<f64> =
            fs.read_to_string(&device_dir.join("gpu_busy_percent")).ok().and_then(|s| s.trim().parse().ok());

        let hwmon_dir = device_dir.join("hwmon");
        let (temp_edge_c, power_watts) = read_drm_hwmon(fs, &hwmon_dir);

        devices.push(GpuDevice {
            name: format!("drm:{name}"),
            vram_total_mib: vram_total_bytes / 1024 / 1024,
            vram_used_mib: vram_used_bytes / 1024 / 1024,
            core_util_pct,
            temp_edge_c,
            power_watts,
            ..Default::default()
        });
    }
    devices
}

fn read_drm_hwmon(fs: &dyn FileSystem, hwmon_dir: &Path) -> (Option<f64>, Option<f64>) {
    let Ok(hwmon_subdirs) = fs.read_dir(hwmon_dir) else {
        return (None, None);
    };
    let Some(hwmon0) = hwmon_subdirs.into_iter().next() else {
        return (None, None);
    };

    let temp = fs
        .read_to_string(&hwmon0.join("temp1_input"))
        .ok()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .map(|v| v / 1000.0);
    let power = fs
        .read_to_string(&hwmon0.join("power1_average"))
        .or_else(|_| fs.read_to_string(&hwmon0.join("power1_input")))
        .ok()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .map(|v| v / 1_000_000.0);
    (temp, power)
}

fn aggregate_name(devices: &[GpuDevice]) -> String {
    if devices.is_empty() {
        return String::new();
    }
    let first = &devices[0].name;
    if devices.iter().all(|d| &d.name == first) {
        if devices.len() == 1 {
            first.clone()
        } else {
            format!("{} x{}", first, devices.len())
        }
    } else {
        format!("{} +{} more", first, devices.len() - 1)
    }
}

pub struct GpuDeviceCollector {
    nvml: Box<dyn NvmlBackend>,
}

impl GpuDeviceCollector {
    pub fn new() -> Self {
        Self { nvml: Box::new(UnavailableNvml) }
    }

    pub fn with_nvml(nvml: Box<dyn NvmlBackend>) -> Self {
        Self { nvml }
    }

    pub fn sample(&mut self, fs: &dyn FileSystem) -> GpuDevices {
        let devices = if self.nvml.available() {
            self.nvml.devices()
        } else {
            let nvidia = read_nvidia_proc(fs);
            if !nvidia.is_empty() {
                nvidia
            } else {
                read_drm_sysfs(fs)
            }
        };

        let total_vram_total_mib = devices.iter().map(|d| d.vram_total_mib).sum();
        let total_vram_used_mib = devices.iter().map(|d| d.vram_used_mib).sum();
        let summary_name = aggregate_name(&devices);

        GpuDevices { devices, total_vram_total_mib, total_vram_used_mib, summary_name }
    }
}

impl Default for GpuDeviceCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MockFs;

    struct StubNvml(Vec<GpuDevice>);
    impl NvmlBackend for StubNvml {
        fn available(&self) -> bool {
            true
        }
        fn devices(&self) -> Vec<GpuDevice> {
            self.0.clone()
        }
    }

    #[test]
    fn falls_back_through_backends_when_nvml_unavailable_and_no_nvidia_proc() {
        let mut fs = MockFs::new();
        fs.add_file("/sys/class/drm/card0/device/mem_info_vram_total", "8589934592"); // 8 GiB
        fs.add_file("/sys/class/drm/card0/device/mem_info_vram_used", "1073741824"); // 1 GiB
        fs.add_file("/sys/class/drm/card0/device/gpu_busy_percent", "42");

        let mut collector = GpuDeviceCollector::new();
        let gpus = collector.sample(&fs);
        assert_eq!(gpus.devices.len(), 1);
        assert_eq!(gpus.devices[0].vram_total_mib, 8192);
        assert_eq!(gpus.devices[0].core_util_pct, Some(42.0));
    }

    #[test]
    fn prefers_nvidia_proc_tree_over_drm() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/driver/nvidia/gpus/0000:01:00.0/fb_memory_usage", "Total                     : 24576 MiB\nUsed                      : 1024 MiB\n");
        fs.add_file("/proc/driver/nvidia/gpus/0000:01:00.0/information", "Model: \t\t NVIDIA GeForce RTX 4090\n");

        let mut collector = GpuDeviceCollector::new();
        let gpus = collector.sample(&fs);
        assert_eq!(gpus.devices.len(), 1);
        assert_eq!(gpus.devices[0].name, "NVIDIA GeForce RTX 4090");
    }

    #[test]
    fn nvml_backend_preempts_everything_else() {
        let fs = MockFs::new();
        let nvml = StubNvml(vec![GpuDevice { name: "nvml-gpu".into(), vram_total_mib: 100, vram_used_mib: 10, ..Default::default() }]);
        let mut collector = GpuDeviceCollector::with_nvml(Box::new(nvml));
        let gpus = collector.sample(&fs);
        assert_eq!(gpus.devices[0].name, "nvml-gpu");
    }

    #[test]
    fn aggregate_name_groups_identical_models() {
        let devices = vec![
            GpuDevice { name: "A100".into(), ..Default::default() },
            GpuDevice { name: "A100".into(), ..Default::default() },
        ];
        assert_eq!(aggregate_name(&devices), "A100 x2");
    }
}
