//! Thermal collector: `/sys/class/hwmon` scan, falls back to `/sys/class/thermal`.

use std::path::{Path, PathBuf};

use crate::churn::{ChurnCounter, ChurnKind};
use crate::fs::FileSystem;
use crate::model::Thermal;

const THRESHOLD_SUFFIXES: &[&str] = &["_crit", "_max", "_emergency"];

fn read_millidegrees(fs: &dyn FileSystem, path: &Path) -> Option<f64> {
    fs.read_to_string(path).ok()?.trim().parse::<f64>().ok().map(|v| v / 1000.0)
}

fn read_rpm(fs: &dyn FileSystem, path: &Path) -> Option<u32> {
    fs.read_to_string(path).ok()?.trim().parse().ok()
}

fn scan_hwmon(fs: &dyn FileSystem, churn: &ChurnCounter) -> Thermal {
    let mut out = Thermal::default();
    let mut max_temp: Option<f64> = None;
    let mut min_threshold: Option<f64> = None;
    let mut max_rpm: Option<u32> = None;

    let Ok(hwmon_dirs) = fs.read_dir(Path::new("/sys/class/hwmon")) else {
        return out;
    };

    for hwmon_dir in hwmon_dirs {
        let Ok(entries) = fs.read_dir(&hwmon_dir) else {
            churn.note(ChurnKind::SystemSource);
            continue;
        };
        for entry in &entries {
            let Some(file_name) = entry.file_name().and_then(|n| n.to_str()) else { continue };

            if let Some(stripped) = file_name.strip_suffix("_input") {
                if stripped.starts_with("temp") {
                    match read_millidegrees(fs, entry) {
                        Some(temp) => {
                            if max_temp.is_none_or(|m| temp > m) {
                                max_temp = Some(temp);
                            }
                            let base: PathBuf = hwmon_dir.join(stripped);
                            for suffix in THRESHOLD_SUFFIXES {
                                let threshold_path = PathBuf::from(format!("{}{}", base.display(), suffix));
                                if let Some(threshold) = read_millidegrees(fs, &threshold_path) {
                                    if min_threshold.is_none_or(|m| threshold < m) {
                                        min_threshold = Some(threshold);
                                    }
                                    break;
                                }
                            }
                        }
                        None => churn.note(ChurnKind::SystemSource),
                    }
                } else if stripped.starts_with("fan") {
                    match read_rpm(fs, entry) {
                        Some(rpm) => {
                            if max_rpm.is_none_or(|m| rpm > m) {
                                max_rpm = Some(rpm);
                            }
                        }
                        None => churn.note(ChurnKind::SystemSource),
                    }
                }
            }
        }
    }

    out.cpu_max_temp_c = max_temp;
    out.warning_temp_c = min_threshold;
    out.fan_rpm = max_rpm;
    out
}

fn scan_thermal_zones(fs: &dyn FileSystem) -> Option<f64> {
    let entries = fs.read_dir(Path::new("/sys/class/thermal")).ok()?;
    let mut max_temp = None;
    for entry in entries {
        let Some(name) = entry.file_name().and_then(|n| n.to_str()) else { continue };
        if !name.starts_with("thermal_zone") {
            continue;
        }
        if let Some(temp) = read_millidegrees(fs, &entry.join("temp")) {
            if max_temp.is_none_or(|m| temp > m) {
                max_temp = Some(temp);
            }
        }
    }
    max_temp
}

pub struct ThermalCollector;

impl ThermalCollector {
    pub fn new() -> Self {
        Self
    }

    pub fn sample(&mut self, fs: &dyn FileSystem, churn: &ChurnCounter) -> Thermal {
        let mut out = scan_hwmon(fs, churn);
        if out.cpu_max_temp_c.is_none() {
            out.cpu_max_temp_c = scan_thermal_zones(fs);
        }
        out
    }
}

impl Default for ThermalCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MockFs;

    #[test]
    fn picks_max_temp_min_threshold_max_rpm() {
        let mut fs = MockFs::new();
        fs.add_file("/sys/class/hwmon/hwmon0/temp1_input", "45000");
        fs.add_file("/sys/class/hwmon/hwmon0/temp1_crit", "90000");
        fs.add_file("/sys/class/hwmon/hwmon0/temp2_input", "60000");
        fs.add_file("/sys/class/hwmon/hwmon0/temp2_max", "80000");
        fs.add_file("/sys/class/hwmon/hwmon0/fan1_input", "1200");
        fs.add_file("/sys/class/hwmon/hwmon0/fan2_input", "900");

        let mut collector = ThermalCollector::new();
        let thermal = collector.sample(&fs, &ChurnCounter::new());
        assert_eq!(thermal.cpu_max_temp_c, Some(60.0));
        assert_eq!(thermal.warning_temp_c, Some(80.0));
        assert_eq!(thermal.fan_rpm, Some(1200));
    }

    #[test]
    fn falls_back_to_thermal_zone() {
        let mut fs = MockFs::new();
        fs.add_dir("/sys/class/hwmon");
        fs.add_file("/sys/class/thermal/thermal_zone0/temp", "55000");

        let mut collector = ThermalCollector::new();
        let thermal = collector.sample(&fs, &ChurnCounter::new());
        assert_eq!(thermal.cpu_max_temp_c, Some(55.0));
    }
}
