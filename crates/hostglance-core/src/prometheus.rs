//! Prometheus text-exposition serializer (C9, read side). Pure function
//! from a snapshot to the 0.0.4 text format: no I/O, no locking beyond
//! what the caller already did to obtain the snapshot.

use std::fmt::Write as _;

use crate::buffers::SnapshotBuffers;
use crate::model::Snapshot;

const MAX_PROCESS_ROWS: usize = 64;
const MAX_CMD_LEN: usize = 32;

/// Copies the current published snapshot and truncates its process rows
/// to a bounded count before serialization — readers never pay for the
/// full process table when only a handful of rows will be rendered.
pub fn read_snapshot(buffers: &SnapshotBuffers) -> Snapshot {
    let mut snapshot = buffers.read();
    snapshot.processes.rows.truncate(MAX_PROCESS_ROWS);
    snapshot
}

fn escape_label_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn truncate_cmd(cmd: &str) -> String {
    if cmd.chars().count() <= MAX_CMD_LEN {
        cmd.to_string()
    } else {
        cmd.chars().take(MAX_CMD_LEN).collect()
    }
}

fn push_gauge(out: &mut String, name: &str, help: &str, samples: &[(Vec<(&str, String)>, f64)]) {
    if samples.is_empty() {
        return;
    }
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} gauge");
    for (labels, value) in samples {
        if labels.is_empty() {
            let _ = writeln!(out, "{name} {value}");
        } else {
            let rendered = labels.iter().map(|(k, v)| format!("{k}=\"{}\"", escape_label_value(v))).collect::<Vec<_>>().join(",");
            let _ = writeln!(out, "{name}{{{rendered}}} {value}");
        }
    }
}

/// Renders a snapshot as Prometheus text-exposition format 0.0.4. The
/// metric names below are the stable contract readers (Grafana,
/// `hostglanced-dump`) depend on.
pub fn serialize(snapshot: &Snapshot) -> String {
    let mut out = String::new();

    push_gauge(&mut out, "hostglance_cpu_total_usage_percent", "Aggregate CPU utilization across all cores.", &[(vec![], snapshot.cpu.total_pct)]);

    let core_samples: Vec<_> = snapshot
        .cpu
        .per_core_pct
        .iter()
        .enumerate()
        .map(|(i, pct)| (vec![("core", i.to_string())], *pct))
        .collect();
    push_gauge(&mut out, "hostglance_cpu_core_usage_percent", "Per-core CPU utilization.", &core_samples);

    push_gauge(&mut out, "hostglance_cpu_user_percent", "CPU time in user mode.", &[(vec![], snapshot.cpu.user_pct)]);
    push_gauge(&mut out, "hostglance_cpu_system_percent", "CPU time in kernel mode.", &[(vec![], snapshot.cpu.system_pct)]);
    push_gauge(&mut out, "hostglance_cpu_iowait_percent", "CPU time waiting on I/O.", &[(vec![], snapshot.cpu.iowait_pct)]);
    push_gauge(&mut out, "hostglance_cpu_ctxt_per_second", "Context switches per second.", &[(vec![], snapshot.cpu.ctxt_per_sec)]);
    push_gauge(&mut out, "hostglance_cpu_intr_per_second", "Interrupts per second.", &[(vec![], snapshot.cpu.intr_per_sec)]);

    push_gauge(&mut out, "hostglance_memory_total_bytes", "Total physical memory.", &[(vec![], (snapshot.memory.total_kb * 1024) as f64)]);
    push_gauge(&mut out, "hostglance_memory_used_bytes", "Used physical memory.", &[(vec![], (snapshot.memory.used_kb * 1024) as f64)]);
    push_gauge(&mut out, "hostglance_memory_available_bytes", "Available physical memory.", &[(vec![], (snapshot.memory.available_kb * 1024) as f64)]);
    push_gauge(&mut out, "hostglance_memory_used_percent", "Used memory percentage.", &[(vec![], snapshot.memory.used_pct)]);
    push_gauge(&mut out, "hostglance_memory_swap_used_bytes", "Used swap space.", &[(vec![], (snapshot.memory.swap_used_kb * 1024) as f64)]);

    let net_samples: Vec<_> = snapshot
        .network
        .interfaces
        .iter()
        .flat_map(|iface| {
            [
                (vec![("iface", iface.name.clone()), ("direction", "rx".to_string())], iface.rx_bytes_per_sec),
                (vec![("iface", iface.name.clone()), ("direction", "tx".to_string())], iface.tx_bytes_per_sec),
            ]
        })
        .collect();
    push_gauge(&mut out, "hostglance_network_bytes_per_second", "Per-interface network throughput.", &net_samples);

    let disk_samples: Vec<_> = snapshot
        .disk
        .devices
        .iter()
        .map(|d| (vec![("device", d.name.clone())], d.util_pct))
        .collect();
    push_gauge(&mut out, "hostglance_disk_util_percent", "Per-device disk utilization percentage.", &disk_samples);

    let disk_rate_samples: Vec<_> = snapshot
        .disk
        .devices
        .iter()
        .flat_map(|d| {
            [
                (vec![("device", d.name.clone()), ("direction", "read".to_string())], d.read_bytes_per_sec),
                (vec![("device", d.name.clone()), ("direction", "write".to_string())], d.write_bytes_per_sec),
            ]
        })
        .collect();
    push_gauge(&mut out, "hostglance_disk_bytes_per_second", "Per-device disk throughput.", &disk_rate_samples);

    let fs_samples: Vec<_> = snapshot
        .filesystem
        .iter()
        .map(|m| (vec![("mountpoint", m.mountpoint.clone()), ("fstype", m.fstype.clone())], m.used_pct))
        .collect();
    push_gauge(&mut out, "hostglance_filesystem_used_percent", "Per-mount filesystem usage percentage.", &fs_samples);

    if !snapshot.gpu_device.devices.is_empty() {
        let gpu_util: Vec<_> = snapshot
            .gpu_device
            .devices
            .iter()
            .enumerate()
            .filter_map(|(i, d)| d.core_util_pct.map(|pct| (vec![("gpu", i.to_string()), ("name", d.name.clone())], pct)))
            .collect();
        push_gauge(&mut out, "hostglance_gpu_core_usage_percent", "Per-device GPU core utilization.", &gpu_util);

        let gpu_vram: Vec<_> = snapshot
            .gpu_device
            .devices
            .iter()
            .enumerate()
            .map(|(i, d)| (vec![("gpu", i.to_string()), ("name", d.name.clone())], (d.vram_used_mib * 1024 * 1024) as f64))
            .collect();
        push_gauge(&mut out, "hostglance_gpu_vram_used_bytes", "Per-device GPU VRAM used.", &gpu_vram);
    }

    if snapshot.thermal.cpu_max_temp_c.is_some() {
        push_gauge(&mut out, "hostglance_thermal_cpu_max_celsius", "Maximum reported CPU-related temperature.", &[(vec![], snapshot.thermal.cpu_max_temp_c.unwrap())]);
    }
    if let Some(fan_rpm) = snapshot.thermal.fan_rpm {
        push_gauge(&mut out, "hostglance_thermal_fan_rpm", "Highest reported fan speed.", &[(vec![], fan_rpm as f64)]);
    }

    let proc_cpu_samples: Vec<_> = snapshot
        .processes
        .rows
        .iter()
        .map(|row| (vec![("pid", row.pid.to_string()), ("cmd", truncate_cmd(&row.cmd))], row.cpu_pct))
        .collect();
    push_gauge(&mut out, "hostglance_process_cpu_percent", "Per-process CPU utilization.", &proc_cpu_samples);

    let proc_rss_samples: Vec<_> = snapshot
        .processes
        .rows
        .iter()
        .map(|row| (vec![("pid", row.pid.to_string()), ("cmd", truncate_cmd(&row.cmd))], (row.rss_kb * 1024) as f64))
        .collect();
    push_gauge(&mut out, "hostglance_process_rss_bytes", "Per-process resident set size.", &proc_rss_samples);

    let proc_gpu_samples: Vec<_> = snapshot
        .processes
        .rows
        .iter()
        .filter(|row| row.has_gpu_util)
        .map(|row| (vec![("pid", row.pid.to_string()), ("cmd", truncate_cmd(&row.cmd))], row.gpu_util_pct))
        .collect();
    push_gauge(&mut out, "hostglance_process_gpu_util_percent", "Per-process attributed GPU utilization.", &proc_gpu_samples);

    push_gauge(&mut out, "hostglance_process_total_count", "Total observed process count.", &[(vec![], snapshot.processes.total_processes as f64)]);
    push_gauge(&mut out, "hostglance_process_running_count", "Processes currently running.", &[(vec![], snapshot.processes.running as f64)]);
    push_gauge(&mut out, "hostglance_process_zombie_count", "Processes in zombie state.", &[(vec![], snapshot.processes.zombie as f64)]);

    push_gauge(&mut out, "hostglance_churn_recent_total", "Read/parse failures counted in the last window.", &[(vec![], snapshot.churn_diagnostics.recent_total as f64)]);

    push_gauge(&mut out, "hostglance_snapshot_sequence_number", "Monotone publish counter.", &[(vec![], snapshot.sequence_number as f64)]);

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_core_samples_carry_core_label() {
        let mut snapshot = Snapshot::default();
        snapshot.cpu.per_core_pct = vec![10.0, 20.0, 30.0, 40.0];
        let body = serialize(&snapshot);
        assert!(body.contains("# TYPE hostglance_cpu_core_usage_percent gauge"));
        assert!(body.contains("hostglance_cpu_core_usage_percent{core=\"0\"} 10"));
        assert!(body.contains("hostglance_cpu_core_usage_percent{core=\"3\"} 40"));
    }

    #[test]
    fn absent_gpu_and_thermal_groups_are_omitted() {
        let snapshot = Snapshot::default();
        let body = serialize(&snapshot);
        assert!(!body.contains("hostglance_gpu_core_usage_percent"));
        assert!(!body.contains("hostglance_thermal_cpu_max_celsius"));
        assert!(!body.contains("hostglance_thermal_fan_rpm"));
    }

    #[test]
    fn label_values_are_escaped() {
        let mut snapshot = Snapshot::default();
        snapshot.processes.rows.push(crate::model::ProcessRow { pid: 1, cmd: "echo \"hi\"".to_string(), ..Default::default() });
        let body = serialize(&snapshot);
        assert!(body.contains("cmd=\"echo \\\"hi\\\"\""));
    }

    #[test]
    fn long_cmd_is_truncated_to_32_chars() {
        let mut snapshot = Snapshot::default();
        let long_cmd = "a".repeat(100);
        snapshot.processes.rows.push(crate::model::ProcessRow { pid: 2, cmd: long_cmd, ..Default::default() });
        let body = serialize(&snapshot);
        assert!(body.contains(&format!("cmd=\"{}\"", "a".repeat(32))));
        assert!(!body.contains(&"a".repeat(33)));
    }
}
