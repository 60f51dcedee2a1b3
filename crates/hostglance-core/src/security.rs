//! Security evaluator (C10): a pure function from a snapshot to a
//! bounded list of findings. No I/O, no state across calls.

use crate::model::{ChurnReason, FindingSeverity, ProcessRow, SecurityFinding, Snapshot};

const MAX_FINDINGS: usize = 100;
const USER_WRITABLE_PREFIXES: &[&str] = &["/tmp/", "/var/tmp/", "/dev/shm/", "/run/user/", "/home/"];
const CHURN_THRESHOLD: u32 = 3;

fn starts_with_any(path: &str, prefixes: &[&str]) -> Option<&'static str> {
    prefixes.iter().find(|p| path.starts_with(**p)).copied()
}

fn is_fake_kernel_thread(row: &ProcessRow) -> bool {
    row.cmd.starts_with('[') && row.cmd.ends_with(']') && !row.exe_path.is_empty()
}

fn is_script_download(row: &ProcessRow) -> bool {
    let cmd = row.cmd.to_lowercase().replace(' ', "");
    (cmd.contains("curl") || cmd.contains("wget")) && (cmd.contains("|sh") || cmd.contains("|bash"))
}

fn is_home_python_script(row: &ProcessRow) -> bool {
    row.cmd.contains("python") && row.cmd.contains("/home/")
}

fn is_shell_on_writable_script(row: &ProcessRow) -> bool {
    let cmd = row.cmd.trim_start();
    let script = cmd
        .strip_prefix("/bin/bash ")
        .or_else(|| cmd.strip_prefix("/bin/sh "))
        .or_else(|| cmd.strip_prefix("bash "))
        .or_else(|| cmd.strip_prefix("sh "));
    let Some(script) = script else { return false };
    starts_with_any(script.trim_start(), USER_WRITABLE_PREFIXES).is_some()
}

fn is_auth_process(row: &ProcessRow) -> bool {
    ["ssh", "sudo", "login", "pam"].iter().any(|name| row.cmd.contains(name) || row.exe_path.contains(name))
}

pub fn evaluate(snapshot: &Snapshot) -> Vec<SecurityFinding> {
    let mut findings = Vec::new();

    for row in &snapshot.processes.rows {
        if row.user_name == "root" {
            if let Some(dir) = starts_with_any(&row.exe_path, USER_WRITABLE_PREFIXES) {
                findings.push(SecurityFinding {
                    severity: FindingSeverity::Warning,
                    reason: format!("root exec in {dir}"),
                    pid: Some(row.pid),
                });
            }
        }

        if is_fake_kernel_thread(row) {
            findings.push(SecurityFinding { severity: FindingSeverity::Warning, reason: "fake kernel thread".to_string(), pid: Some(row.pid) });
        }

        if is_script_download(row) {
            findings.push(SecurityFinding { severity: FindingSeverity::Caution, reason: "script download".to_string(), pid: Some(row.pid) });
        }

        if is_home_python_script(row) {
            findings.push(SecurityFinding { severity: FindingSeverity::Caution, reason: "python script from home directory".to_string(), pid: Some(row.pid) });
        }

        if is_shell_on_writable_script(row) {
            findings.push(SecurityFinding { severity: FindingSeverity::Warning, reason: "shell invoked on user-writable script".to_string(), pid: Some(row.pid) });
        }

        if row.churn_reason == Some(ChurnReason::ReadFailed)
            && is_auth_process(row)
            && snapshot.churn_diagnostics.recent_total >= CHURN_THRESHOLD
        {
            findings.push(SecurityFinding { severity: FindingSeverity::Warning, reason: "auth crashloop".to_string(), pid: Some(row.pid) });
        }
    }

    if snapshot.network.rx_bytes_per_sec >= 500.0 * 1024.0 {
        let has_owner = snapshot.processes.rows.iter().any(|r| r.has_gpu_util || r.cpu_pct > 0.0);
        if !has_owner {
            findings.push(SecurityFinding { severity: FindingSeverity::Caution, reason: "possible exfil".to_string(), pid: None });
        }
    }

    findings.sort_by(|a, b| b.severity.cmp(&a.severity));
    findings.truncate(MAX_FINDINGS);
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Processes;

    #[test]
    fn root_exec_in_tmp_produces_one_warning() {
        let mut snapshot = Snapshot::default();
        snapshot.processes = Processes {
            rows: vec![ProcessRow { user_name: "root".into(), exe_path: "/tmp/.kworkerd".into(), cmd: "/tmp/.kworkerd".into(), ..Default::default() }],
            ..Default::default()
        };
        let findings = evaluate(&snapshot);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, FindingSeverity::Warning);
        assert!(findings[0].reason.contains("root exec in /tmp"));
    }

    #[test]
    fn shell_on_writable_script_is_matched_against_the_argument() {
        let mut snapshot = Snapshot::default();
        snapshot.processes = Processes {
            rows: vec![ProcessRow { cmd: "/bin/bash /tmp/update.sh".into(), ..Default::default() }],
            ..Default::default()
        };
        let findings = evaluate(&snapshot);
        assert!(findings.iter().any(|f| f.reason.contains("shell invoked")));
    }

    #[test]
    fn pure_function_is_deterministic() {
        let mut snapshot = Snapshot::default();
        snapshot.processes = Processes { rows: vec![ProcessRow { cmd: "[kworker/0:1]".into(), exe_path: "/x".into(), ..Default::default() }], ..Default::default() };
        let first = evaluate(&snapshot);
        let second = evaluate(&snapshot);
        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].reason, second[0].reason);
    }
}
