//! Periodic detection workers.
//!
//! Three independent loops, one per rule, each on its own one-minute
//! timer with a 30 second per-run deadline. A failed run is logged and
//! skipped; a run that exceeds the deadline is interrupted at the store
//! and drained before the loop continues, so scans never pile up on the
//! shared connection. The next tick rescans with fresh window bounds.

use std::time::Duration;

use chrono::Utc;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{info, warn};

use authwatch_core::rules::{
    is_dangerous_sudo_command, BRUTE_FORCE_THRESHOLD, BRUTE_FORCE_WINDOW_MINUTES,
    DETECTOR_DEADLINE_SECS, DETECTOR_INTERVAL_SECS, SUDO_WINDOW_MINUTES,
    SUSPICIOUS_FAILED_BEFORE_SUCCESS, SUSPICIOUS_WINDOW_MINUTES,
};
use authwatch_core::CoreError;

use crate::db::{to_ms, Database};
use crate::login_index::LoginIndex;
use crate::SharedState;

pub fn spawn_detectors(state: SharedState) {
    spawn_worker("ssh_bruteforce", state.clone(), run_brute_force_scan);
    spawn_worker("ssh_suspicious_login", state.clone(), run_suspicious_login_scan);
    spawn_worker("sudo_dangerous_command", state, run_sudo_scan);
}

fn spawn_worker(
    name: &'static str,
    state: SharedState,
    scan: fn(&Database) -> Result<usize, CoreError>,
) {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(DETECTOR_INTERVAL_SECS));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let deadline = Duration::from_secs(DETECTOR_DEADLINE_SECS);
            match scan_with_deadline(&state, deadline, scan).await {
                Some(Ok(created)) => {
                    if created > 0 {
                        info!(detector = name, created, "alerts created");
                    }
                }
                Some(Err(e)) => warn!(detector = name, error = %e, "scan failed, run skipped"),
                None => warn!(detector = name, "scan exceeded deadline, interrupted"),
            }
        }
    });
}

/// Run one scan on the blocking pool under a deadline. On timeout the
/// store is interrupted, which aborts the scan's running statement and
/// rolls back its transaction, and the task is drained before returning;
/// no run ever outlives its tick. Returns `None` for a timed-out run.
pub async fn scan_with_deadline(
    state: &SharedState,
    deadline: Duration,
    scan: fn(&Database) -> Result<usize, CoreError>,
) -> Option<Result<usize, CoreError>> {
    let st = state.clone();
    let mut run = tokio::task::spawn_blocking(move || scan(&st.db));
    match timeout(deadline, &mut run).await {
        Ok(Ok(result)) => Some(result),
        Ok(Err(e)) => Some(Err(CoreError::StoreUnavailable(format!(
            "scan task panicked: {e}"
        )))),
        Err(_) => {
            state.db.interrupt();
            let _ = run.await;
            None
        }
    }
}

/// Brute-force rule; the whole scan is one store statement.
pub fn run_brute_force_scan(db: &Database) -> Result<usize, CoreError> {
    db.brute_force_scan(
        BRUTE_FORCE_WINDOW_MINUTES,
        BRUTE_FORCE_THRESHOLD,
        Utc::now(),
    )
}

/// Successful-login-after-failures rule; likewise a single statement.
pub fn run_suspicious_login_scan(db: &Database) -> Result<usize, CoreError> {
    db.suspicious_login_scan(
        SUSPICIOUS_WINDOW_MINUTES,
        SUSPICIOUS_FAILED_BEFORE_SUCCESS,
        Utc::now(),
    )
}

/// Dangerous-sudo rule: fetch the window's sudo events, test each command
/// against the blocklist, attribute a source IP by predecessor search
/// over successful logins, and insert if the identity key is absent.
pub fn run_sudo_scan(db: &Database) -> Result<usize, CoreError> {
    let now = Utc::now();
    let candidates = db.sudo_candidates(SUDO_WINDOW_MINUTES, now)?;
    if candidates.is_empty() {
        return Ok(0);
    }
    let index = LoginIndex::build(db.success_login_rows(SUDO_WINDOW_MINUTES, now)?);
    let mut created = 0;
    for cand in candidates {
        if !is_dangerous_sudo_command(&cand.command) {
            continue;
        }
        let remote_ip = index
            .source_ip_at(&cand.agent_id, to_ms(cand.ts))
            .unwrap_or("");
        if db.insert_sudo_alert_if_absent(&cand, remote_ip, SUDO_WINDOW_MINUTES, now)? {
            created += 1;
            info!(
                host = %cand.hostname,
                sudo_user = %cand.sudo_user,
                target_user = %cand.target_user,
                command = %cand.command,
                "sudo alert created"
            );
        }
    }
    Ok(created)
}
