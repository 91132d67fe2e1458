//! Detection rule constants and the dangerous-sudo heuristic.

/// Trailing window scanned by the brute-force detector, in minutes.
pub const BRUTE_FORCE_WINDOW_MINUTES: i64 = 60;
/// Failed attempts from one IP against one host required to alert.
pub const BRUTE_FORCE_THRESHOLD: i64 = 5;

/// Lookback from a successful login within which prior failures count.
pub const SUSPICIOUS_WINDOW_MINUTES: i64 = 15;
/// Failures from the same IP required before a success is suspicious.
pub const SUSPICIOUS_FAILED_BEFORE_SUCCESS: i64 = 3;

/// Trailing window scanned by the dangerous-sudo detector, in minutes.
pub const SUDO_WINDOW_MINUTES: i64 = 60;

/// Detector tick cadence and per-run deadline.
pub const DETECTOR_INTERVAL_SECS: u64 = 60;
pub const DETECTOR_DEADLINE_SECS: u64 = 30;

/// Substrings flagging a sudo command as dangerous: shell invocation,
/// network transfer tools, permission/ownership changes, user management
/// and raw socket tools. Matching is case-insensitive and unanchored,
/// a deliberately coarse heuristic.
const DANGEROUS_SUDO_SUBSTRINGS: &[&str] = &[
    "bash -c", "sh -c", " nc ", "ncat ", "socat", "useradd", "usermod", "passwd", "chmod 777",
    "chown ", "chgrp ", "curl ", "wget ", "scp ", "sftp ",
];

pub fn is_dangerous_sudo_command(command: &str) -> bool {
    let lower = command.to_lowercase();
    DANGEROUS_SUDO_SUBSTRINGS
        .iter()
        .any(|sub| lower.contains(sub))
}

/// Severity label attached to brute-force alerts on the read path.
pub fn brute_force_severity(failed_count: i64) -> &'static str {
    if failed_count >= 20 {
        "critical"
    } else if failed_count >= 10 {
        "high"
    } else {
        "medium"
    }
}

pub fn brute_force_message(failed_count: i64, window_minutes: i64, remote_ip: &str) -> String {
    format!("{failed_count} failed SSH attempts in {window_minutes} min from {remote_ip}")
}
