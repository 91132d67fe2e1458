// Persistence layer over SQLite: event log, alert stores, ban snapshots.
//
// Timestamps are stored as integer unix milliseconds so window arithmetic
// and ordering are exact. Alert deduplication is enforced in-store: the
// suspicious-login and sudo identity keys are UNIQUE constraints hit with
// INSERT OR IGNORE, and the brute-force windowed guard is folded into a
// single INSERT ... SELECT ... WHERE NOT EXISTS statement, so concurrent
// detector runs cannot double-insert.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, InterruptHandle, OptionalExtension};
use serde::{Deserialize, Serialize};

use authwatch_core::event::{EVENT_SSH_FAILED_LOGIN, EVENT_SSH_LOGIN_SUCCESS, EVENT_SUDO_COMMAND};
use authwatch_core::rules::{brute_force_message, brute_force_severity};
use authwatch_core::{AlertStatus, CoreError};

pub(crate) fn to_ms(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

fn store_err(e: rusqlite::Error) -> CoreError {
    CoreError::StoreUnavailable(e.to_string())
}

// ============================================================================
// Row types
// ============================================================================

/// Registration result; the secret is shown once, at creation.
#[derive(Debug, Clone, Serialize)]
pub struct Agent {
    pub id: String,
    pub secret: String,
    pub hostname: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentInfo {
    pub id: String,
    pub hostname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

/// A validated event ready for the append-only log.
#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub ts: DateTime<Utc>,
    pub source: String,
    pub event_type: String,
    pub severity: i64,
    pub payload: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SshAlert {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub hostname: String,
    pub remote_ip: String,
    pub username: String,
    pub failed_count: i64,
    pub window_minutes: i64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub status: String,
    pub rule: String,
    pub severity: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuspiciousLogin {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub hostname: String,
    pub username: String,
    pub remote_ip: String,
    pub failed_count_before_success: i64,
    pub window_minutes: i64,
    pub first_failed_at: DateTime<Utc>,
    pub success_at: DateTime<Utc>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SudoAlert {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub hostname: String,
    pub sudo_user: String,
    pub target_user: String,
    pub remote_ip: String,
    pub tty: String,
    pub pwd: String,
    pub command: String,
    pub window_minutes: i64,
    pub sudo_ts: DateTime<Utc>,
    pub status: String,
}

/// One entry of a ban snapshot as reported by a collector.
#[derive(Debug, Clone, Deserialize)]
pub struct BanEntry {
    pub ip: String,
    #[serde(default)]
    pub jail: Option<String>,
    #[serde(default)]
    pub banned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SshBan {
    pub hostname: String,
    pub ip: String,
    pub jail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banned_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HostSummary {
    pub hostname: String,
    pub failed: i64,
    pub success: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopIp {
    pub remote_ip: String,
    pub failed: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopUser {
    pub username: String,
    pub failed: i64,
    pub success: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IpActivity {
    pub remote_ip: String,
    pub failed: i64,
    pub success: i64,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SshTimelineEvent {
    pub ts: DateTime<Utc>,
    pub hostname: String,
    pub event_type: String,
    pub username: String,
    pub remote_ip: String,
    pub auth_method: String,
    pub is_root: bool,
    pub dst_port: i64,
    pub raw_line: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SudoTimelineEvent {
    pub ts: DateTime<Utc>,
    pub hostname: String,
    pub sudo_user: String,
    pub target_user: String,
    pub tty: String,
    pub pwd: String,
    pub command: String,
    pub remote_ip: String,
    pub is_sudo_root: bool,
    pub is_target_root: bool,
    pub raw_line: String,
}

/// Sudo event awaiting the dangerous-command check and IP attribution.
#[derive(Debug, Clone)]
pub struct SudoCandidate {
    pub agent_id: String,
    pub hostname: String,
    pub ts: DateTime<Utc>,
    pub sudo_user: String,
    pub target_user: String,
    pub tty: String,
    pub pwd: String,
    pub command: String,
}

// ============================================================================
// List filters
// ============================================================================

#[derive(Debug, Default)]
pub struct SshAlertFilter {
    pub status: Option<String>,
    pub ip: Option<String>,
    pub hostname: Option<String>,
    pub window_minutes: i64,
    pub limit: i64,
}

#[derive(Debug, Default)]
pub struct SuspiciousLoginFilter {
    pub status: Option<String>,
    pub ip: Option<String>,
    pub hostname: Option<String>,
    pub username: Option<String>,
    pub window_minutes: i64,
    pub limit: i64,
}

#[derive(Debug, Default)]
pub struct SudoAlertFilter {
    pub status: Option<String>,
    pub sudo_user: Option<String>,
    pub target_user: Option<String>,
    pub ip: Option<String>,
    pub hostname: Option<String>,
    pub window_minutes: i64,
    pub limit: i64,
}

// ============================================================================
// Database
// ============================================================================

pub struct Database {
    conn: Mutex<Connection>,
    interrupt: InterruptHandle,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, CoreError> {
        let conn = Connection::open(path).map_err(store_err)?;
        let interrupt = conn.get_interrupt_handle();
        let db = Self {
            conn: Mutex::new(conn),
            interrupt,
        };
        db.init_schema()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, CoreError> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        let interrupt = conn.get_interrupt_handle();
        let db = Self {
            conn: Mutex::new(conn),
            interrupt,
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Abort the statement currently executing on the connection; it fails
    /// with SQLITE_INTERRUPT and any open transaction rolls back. Does not
    /// take the connection lock, so it works while a scan holds it. No-op
    /// when the connection is idle.
    pub fn interrupt(&self) {
        self.interrupt.interrupt();
    }

    fn init_schema(&self) -> Result<(), CoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                secret TEXT NOT NULL UNIQUE,
                hostname TEXT NOT NULL,
                last_seen INTEGER
            );

            CREATE TABLE IF NOT EXISTS raw_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_id TEXT NOT NULL REFERENCES agents(id),
                ts INTEGER NOT NULL,
                source TEXT NOT NULL,
                event_type TEXT NOT NULL,
                severity INTEGER NOT NULL,
                payload TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_raw_events_type_ts
                ON raw_events(event_type, ts);

            CREATE INDEX IF NOT EXISTS idx_raw_events_agent_ts
                ON raw_events(agent_id, ts);

            CREATE TABLE IF NOT EXISTS ssh_alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_id TEXT NOT NULL,
                hostname TEXT NOT NULL,
                remote_ip TEXT NOT NULL,
                failed_count INTEGER NOT NULL,
                window_minutes INTEGER NOT NULL,
                first_seen INTEGER NOT NULL,
                last_seen INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'new',
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_ssh_alerts_identity
                ON ssh_alerts(agent_id, remote_ip, created_at);

            CREATE TABLE IF NOT EXISTS ssh_suspicious_logins (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_id TEXT NOT NULL,
                hostname TEXT NOT NULL,
                username TEXT NOT NULL,
                remote_ip TEXT NOT NULL,
                failed_count_before_success INTEGER NOT NULL,
                window_minutes INTEGER NOT NULL,
                first_failed_at INTEGER NOT NULL,
                success_at INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'new',
                created_at INTEGER NOT NULL,
                UNIQUE (agent_id, remote_ip, username, success_at)
            );

            CREATE TABLE IF NOT EXISTS sudo_alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_id TEXT NOT NULL,
                hostname TEXT NOT NULL,
                sudo_user TEXT NOT NULL,
                target_user TEXT NOT NULL,
                remote_ip TEXT NOT NULL,
                tty TEXT NOT NULL,
                pwd TEXT NOT NULL,
                command TEXT NOT NULL,
                window_minutes INTEGER NOT NULL,
                sudo_ts INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'new',
                created_at INTEGER NOT NULL,
                UNIQUE (agent_id, sudo_user, target_user, command, sudo_ts)
            );

            CREATE TABLE IF NOT EXISTS ssh_bans_state (
                agent_id TEXT NOT NULL,
                ip TEXT NOT NULL,
                jail TEXT NOT NULL DEFAULT 'sshd',
                banned_at INTEGER,
                reason TEXT,
                source TEXT,
                synced_at INTEGER NOT NULL,
                PRIMARY KEY (agent_id, ip, jail)
            );
        "#,
        )
        .map_err(store_err)
    }

    // ------------------------------------------------------------------
    // Agents
    // ------------------------------------------------------------------

    pub fn register_agent(&self, hostname: &str) -> Result<Agent, CoreError> {
        let agent = Agent {
            id: uuid::Uuid::new_v4().to_string(),
            secret: uuid::Uuid::new_v4().to_string(),
            hostname: hostname.to_string(),
        };
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO agents (id, secret, hostname) VALUES (?1, ?2, ?3)",
            params![agent.id, agent.secret, agent.hostname],
        )
        .map_err(store_err)?;
        Ok(agent)
    }

    pub fn list_agents(&self) -> Result<Vec<AgentInfo>, CoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT id, hostname, last_seen FROM agents ORDER BY last_seen DESC")
            .map_err(store_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(AgentInfo {
                    id: row.get(0)?,
                    hostname: row.get(1)?,
                    last_seen: row.get::<_, Option<i64>>(2)?.map(from_ms),
                })
            })
            .map_err(store_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(store_err)
    }

    /// Resolve an agent secret to (id, hostname); `Unauthorized` on miss.
    pub fn authenticate(&self, secret: &str) -> Result<(String, String), CoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, hostname FROM agents WHERE secret = ?1",
            params![secret],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(store_err)?
        .ok_or(CoreError::Unauthorized)
    }

    pub fn touch_agent(&self, agent_id: &str, now: DateTime<Utc>) -> Result<(), CoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE agents SET last_seen = ?1 WHERE id = ?2",
            params![to_ms(now), agent_id],
        )
        .map_err(store_err)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Event log
    // ------------------------------------------------------------------

    /// Append a whole batch in one transaction; either every event lands
    /// or none does. The log itself never deduplicates.
    pub fn insert_event_batch(
        &self,
        agent_id: &str,
        events: &[StoredEvent],
    ) -> Result<(), CoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(store_err)?;
        for ev in events {
            tx.execute(
                "INSERT INTO raw_events (agent_id, ts, source, event_type, severity, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    agent_id,
                    to_ms(ev.ts),
                    ev.source,
                    ev.event_type,
                    ev.severity,
                    ev.payload
                ],
            )
            .map_err(store_err)?;
        }
        tx.commit().map_err(store_err)
    }

    pub fn raw_event_count(&self) -> Result<i64, CoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM raw_events", [], |row| row.get(0))
            .map_err(store_err)
    }

    // ------------------------------------------------------------------
    // Detector scans
    // ------------------------------------------------------------------

    /// Brute-force rule: one statement groups trailing-window failures by
    /// (agent, remote_ip) and inserts an alert for every group at or over
    /// the threshold that has no alert created within the window. The
    /// windowed dedupe guard lives inside the same statement.
    pub fn brute_force_scan(
        &self,
        window_minutes: i64,
        threshold: i64,
        now: DateTime<Utc>,
    ) -> Result<usize, CoreError> {
        let cutoff = to_ms(now - Duration::minutes(window_minutes));
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO ssh_alerts (agent_id, hostname, remote_ip, failed_count,
                                     window_minutes, first_seen, last_seen, status, created_at)
             SELECT e.agent_id,
                    a.hostname,
                    json_extract(e.payload, '$.remote_ip') AS rip,
                    COUNT(*),
                    ?2,
                    MIN(e.ts),
                    MAX(e.ts),
                    'new',
                    ?3
             FROM raw_events e
             JOIN agents a ON a.id = e.agent_id
             WHERE e.source = 'auth'
               AND e.event_type = ?4
               AND e.ts >= ?1
               AND json_extract(e.payload, '$.remote_ip') IS NOT NULL
               AND NOT EXISTS (
                   SELECT 1 FROM ssh_alerts sa
                   WHERE sa.agent_id = e.agent_id
                     AND sa.remote_ip = json_extract(e.payload, '$.remote_ip')
                     AND sa.created_at >= ?1
               )
             GROUP BY e.agent_id, rip
             HAVING COUNT(*) >= ?5",
            params![
                cutoff,
                window_minutes,
                to_ms(now),
                EVENT_SSH_FAILED_LOGIN,
                threshold
            ],
        )
        .map_err(store_err)
    }

    /// Suspicious-login rule: temporal self-join of successes against the
    /// failures that preceded them from the same (agent, remote_ip). The
    /// identity key is a UNIQUE constraint, so re-scans are no-ops.
    pub fn suspicious_login_scan(
        &self,
        window_minutes: i64,
        threshold: i64,
        now: DateTime<Utc>,
    ) -> Result<usize, CoreError> {
        let window_ms = window_minutes * 60_000;
        let cutoff = to_ms(now) - window_ms;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO ssh_suspicious_logins
                 (agent_id, hostname, username, remote_ip, failed_count_before_success,
                  window_minutes, first_failed_at, success_at, status, created_at)
             SELECT se.agent_id,
                    a.hostname,
                    json_extract(se.payload, '$.username'),
                    json_extract(se.payload, '$.remote_ip'),
                    COUNT(fe.id),
                    ?2,
                    MIN(fe.ts),
                    se.ts,
                    'new',
                    ?4
             FROM raw_events se
             JOIN agents a ON a.id = se.agent_id
             JOIN raw_events fe ON fe.agent_id = se.agent_id
                AND fe.source = 'auth'
                AND fe.event_type = ?5
                AND json_extract(fe.payload, '$.remote_ip') =
                    json_extract(se.payload, '$.remote_ip')
                AND fe.ts BETWEEN se.ts - ?3 AND se.ts
             WHERE se.source = 'auth'
               AND se.event_type = ?6
               AND se.ts >= ?1
             GROUP BY se.id
             HAVING COUNT(fe.id) >= ?7",
            params![
                cutoff,
                window_minutes,
                window_ms,
                to_ms(now),
                EVENT_SSH_FAILED_LOGIN,
                EVENT_SSH_LOGIN_SUCCESS,
                threshold
            ],
        )
        .map_err(store_err)
    }

    /// Sudo events in the trailing window, oldest first. The dangerous
    /// command check and IP attribution happen in the detector.
    pub fn sudo_candidates(
        &self,
        window_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<SudoCandidate>, CoreError> {
        let cutoff = to_ms(now - Duration::minutes(window_minutes));
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT e.agent_id, a.hostname, e.ts,
                        COALESCE(json_extract(e.payload, '$.sudo_user'), ''),
                        COALESCE(json_extract(e.payload, '$.target_user'), ''),
                        COALESCE(json_extract(e.payload, '$.tty'), ''),
                        COALESCE(json_extract(e.payload, '$.pwd'), ''),
                        COALESCE(json_extract(e.payload, '$.command'), '')
                 FROM raw_events e
                 JOIN agents a ON a.id = e.agent_id
                 WHERE e.source = 'auth' AND e.event_type = ?1 AND e.ts >= ?2
                 ORDER BY e.ts",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![EVENT_SUDO_COMMAND, cutoff], |row| {
                Ok(SudoCandidate {
                    agent_id: row.get(0)?,
                    hostname: row.get(1)?,
                    ts: from_ms(row.get(2)?),
                    sudo_user: row.get(3)?,
                    target_user: row.get(4)?,
                    tty: row.get(5)?,
                    pwd: row.get(6)?,
                    command: row.get(7)?,
                })
            })
            .map_err(store_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(store_err)
    }

    /// Successful logins feeding the as-of attribution index, ordered by
    /// agent then time. Bounded: the window's logins plus the single most
    /// recent pre-window login per agent, which is all a predecessor
    /// search over in-window candidates can ever reach. The pre-window arm
    /// relies on SQLite's bare-column-with-MAX row selection.
    pub fn success_login_rows(
        &self,
        window_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<(String, i64, String)>, CoreError> {
        let cutoff = to_ms(now - Duration::minutes(window_minutes));
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT agent_id, ts, json_extract(payload, '$.remote_ip') AS rip
                 FROM raw_events
                 WHERE source = 'auth' AND event_type = ?1
                   AND json_extract(payload, '$.remote_ip') IS NOT NULL
                   AND ts BETWEEN ?2 AND ?3
                 UNION ALL
                 SELECT agent_id, MAX(ts), json_extract(payload, '$.remote_ip')
                 FROM raw_events
                 WHERE source = 'auth' AND event_type = ?1
                   AND json_extract(payload, '$.remote_ip') IS NOT NULL
                   AND ts < ?2
                 GROUP BY agent_id
                 ORDER BY agent_id, ts",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map(
                params![EVENT_SSH_LOGIN_SUCCESS, cutoff, to_ms(now)],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(store_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(store_err)
    }

    /// Insert a sudo alert unless its identity key already exists.
    /// Returns whether a row was created.
    pub fn insert_sudo_alert_if_absent(
        &self,
        cand: &SudoCandidate,
        remote_ip: &str,
        window_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let conn = self.conn.lock().unwrap();
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO sudo_alerts
                     (agent_id, hostname, sudo_user, target_user, remote_ip,
                      tty, pwd, command, window_minutes, sudo_ts, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'new', ?11)",
                params![
                    cand.agent_id,
                    cand.hostname,
                    cand.sudo_user,
                    cand.target_user,
                    remote_ip,
                    cand.tty,
                    cand.pwd,
                    cand.command,
                    window_minutes,
                    to_ms(cand.ts),
                    to_ms(now)
                ],
            )
            .map_err(store_err)?;
        Ok(inserted > 0)
    }

    // ------------------------------------------------------------------
    // Alert listings and status transitions
    // ------------------------------------------------------------------

    pub fn list_ssh_alerts(
        &self,
        filter: &SshAlertFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<SshAlert>, CoreError> {
        let mut sql = String::from(SSH_ALERT_SELECT);
        sql.push_str(" WHERE sa.created_at >= ?");
        let mut args: Vec<Value> = vec![Value::Integer(to_ms(
            now - Duration::minutes(filter.window_minutes),
        ))];
        if let Some(status) = &filter.status {
            sql.push_str(" AND sa.status = ?");
            args.push(Value::Text(status.clone()));
        }
        if let Some(ip) = &filter.ip {
            sql.push_str(" AND sa.remote_ip = ?");
            args.push(Value::Text(ip.clone()));
        }
        if let Some(host) = &filter.hostname {
            sql.push_str(" AND sa.hostname = ?");
            args.push(Value::Text(host.clone()));
        }
        sql.push_str(" ORDER BY sa.created_at DESC LIMIT ?");
        args.push(Value::Integer(filter.limit));

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql).map_err(store_err)?;
        let rows = stmt
            .query_map(params_from_iter(args), ssh_alert_from_row)
            .map_err(store_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(store_err)
    }

    pub fn update_ssh_alert_status(
        &self,
        id: i64,
        status: AlertStatus,
    ) -> Result<SshAlert, CoreError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn
            .execute(
                "UPDATE ssh_alerts SET status = ?1 WHERE id = ?2",
                params![status.as_str(), id],
            )
            .map_err(store_err)?;
        if changed == 0 {
            return Err(CoreError::NotFound("ssh alert"));
        }
        let sql = format!("{SSH_ALERT_SELECT} WHERE sa.id = ?1");
        conn.query_row(&sql, params![id], ssh_alert_from_row)
            .map_err(store_err)
    }

    pub fn list_suspicious_logins(
        &self,
        filter: &SuspiciousLoginFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<SuspiciousLogin>, CoreError> {
        let mut sql = String::from(
            "SELECT id, created_at, hostname, username, remote_ip,
                    failed_count_before_success, window_minutes,
                    first_failed_at, success_at, status
             FROM ssh_suspicious_logins
             WHERE created_at >= ?",
        );
        let mut args: Vec<Value> = vec![Value::Integer(to_ms(
            now - Duration::minutes(filter.window_minutes),
        ))];
        if let Some(status) = &filter.status {
            sql.push_str(" AND status = ?");
            args.push(Value::Text(status.clone()));
        }
        if let Some(ip) = &filter.ip {
            sql.push_str(" AND remote_ip = ?");
            args.push(Value::Text(ip.clone()));
        }
        if let Some(host) = &filter.hostname {
            sql.push_str(" AND hostname = ?");
            args.push(Value::Text(host.clone()));
        }
        if let Some(user) = &filter.username {
            sql.push_str(" AND username = ?");
            args.push(Value::Text(user.clone()));
        }
        sql.push_str(" ORDER BY success_at DESC LIMIT ?");
        args.push(Value::Integer(filter.limit));

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql).map_err(store_err)?;
        let rows = stmt
            .query_map(params_from_iter(args), suspicious_login_from_row)
            .map_err(store_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(store_err)
    }

    pub fn update_suspicious_login_status(
        &self,
        id: i64,
        status: AlertStatus,
    ) -> Result<SuspiciousLogin, CoreError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn
            .execute(
                "UPDATE ssh_suspicious_logins SET status = ?1 WHERE id = ?2",
                params![status.as_str(), id],
            )
            .map_err(store_err)?;
        if changed == 0 {
            return Err(CoreError::NotFound("suspicious login"));
        }
        conn.query_row(
            "SELECT id, created_at, hostname, username, remote_ip,
                    failed_count_before_success, window_minutes,
                    first_failed_at, success_at, status
             FROM ssh_suspicious_logins WHERE id = ?1",
            params![id],
            suspicious_login_from_row,
        )
        .map_err(store_err)
    }

    pub fn list_sudo_alerts(
        &self,
        filter: &SudoAlertFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<SudoAlert>, CoreError> {
        let mut sql = String::from(
            "SELECT id, created_at, hostname, sudo_user, target_user, remote_ip,
                    tty, pwd, command, window_minutes, sudo_ts, status
             FROM sudo_alerts
             WHERE created_at >= ?",
        );
        let mut args: Vec<Value> = vec![Value::Integer(to_ms(
            now - Duration::minutes(filter.window_minutes),
        ))];
        if let Some(status) = &filter.status {
            sql.push_str(" AND status = ?");
            args.push(Value::Text(status.clone()));
        }
        if let Some(user) = &filter.sudo_user {
            sql.push_str(" AND sudo_user = ?");
            args.push(Value::Text(user.clone()));
        }
        if let Some(user) = &filter.target_user {
            sql.push_str(" AND target_user = ?");
            args.push(Value::Text(user.clone()));
        }
        if let Some(ip) = &filter.ip {
            sql.push_str(" AND remote_ip = ?");
            args.push(Value::Text(ip.clone()));
        }
        if let Some(host) = &filter.hostname {
            sql.push_str(" AND hostname = ?");
            args.push(Value::Text(host.clone()));
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ?");
        args.push(Value::Integer(filter.limit));

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql).map_err(store_err)?;
        let rows = stmt
            .query_map(params_from_iter(args), sudo_alert_from_row)
            .map_err(store_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(store_err)
    }

    pub fn update_sudo_alert_status(
        &self,
        id: i64,
        status: AlertStatus,
    ) -> Result<SudoAlert, CoreError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn
            .execute(
                "UPDATE sudo_alerts SET status = ?1 WHERE id = ?2",
                params![status.as_str(), id],
            )
            .map_err(store_err)?;
        if changed == 0 {
            return Err(CoreError::NotFound("sudo alert"));
        }
        conn.query_row(
            "SELECT id, created_at, hostname, sudo_user, target_user, remote_ip,
                    tty, pwd, command, window_minutes, sudo_ts, status
             FROM sudo_alerts WHERE id = ?1",
            params![id],
            sudo_alert_from_row,
        )
        .map_err(store_err)
    }

    // ------------------------------------------------------------------
    // Ban snapshots
    // ------------------------------------------------------------------

    /// Replace an agent's ban set wholesale: delete the prior snapshot and
    /// insert the new one in a single transaction. Entries without an IP
    /// are skipped; a missing jail defaults to `sshd`.
    pub fn replace_ban_snapshot(
        &self,
        agent_id: &str,
        bans: &[BanEntry],
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(store_err)?;
        tx.execute(
            "DELETE FROM ssh_bans_state WHERE agent_id = ?1",
            params![agent_id],
        )
        .map_err(store_err)?;
        for ban in bans {
            if ban.ip.is_empty() {
                continue;
            }
            let jail = ban
                .jail
                .clone()
                .filter(|j| !j.is_empty())
                .unwrap_or_else(|| "sshd".to_string());
            tx.execute(
                "INSERT OR REPLACE INTO ssh_bans_state
                     (agent_id, ip, jail, banned_at, reason, source, synced_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    agent_id,
                    ban.ip,
                    jail,
                    ban.banned_at.map(to_ms),
                    ban.reason,
                    ban.source,
                    to_ms(now)
                ],
            )
            .map_err(store_err)?;
        }
        tx.commit().map_err(store_err)
    }

    pub fn list_bans(
        &self,
        window_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<SshBan>, CoreError> {
        let cutoff = to_ms(now - Duration::minutes(window_minutes));
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT a.hostname, b.ip, b.jail, b.banned_at, b.reason, b.source, b.synced_at
                 FROM ssh_bans_state b
                 JOIN agents a ON a.id = b.agent_id
                 WHERE b.synced_at >= ?1
                 ORDER BY COALESCE(b.banned_at, b.synced_at) DESC",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![cutoff], |row| {
                Ok(SshBan {
                    hostname: row.get(0)?,
                    ip: row.get(1)?,
                    jail: row.get(2)?,
                    banned_at: row.get::<_, Option<i64>>(3)?.map(from_ms),
                    reason: row.get(4)?,
                    source: row.get(5)?,
                    synced_at: from_ms(row.get(6)?),
                })
            })
            .map_err(store_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(store_err)
    }

    // ------------------------------------------------------------------
    // Windowed aggregations for the dashboard
    // ------------------------------------------------------------------

    pub fn host_summary(
        &self,
        window_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<HostSummary>, CoreError> {
        let cutoff = to_ms(now - Duration::minutes(window_minutes));
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT a.hostname,
                        SUM(CASE WHEN e.event_type = ?1 THEN 1 ELSE 0 END),
                        SUM(CASE WHEN e.event_type = ?2 THEN 1 ELSE 0 END)
                 FROM raw_events e
                 JOIN agents a ON a.id = e.agent_id
                 WHERE e.source = 'auth'
                   AND e.event_type IN (?1, ?2)
                   AND e.ts >= ?3
                 GROUP BY a.hostname
                 ORDER BY a.hostname",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map(
                params![EVENT_SSH_FAILED_LOGIN, EVENT_SSH_LOGIN_SUCCESS, cutoff],
                |row| {
                    Ok(HostSummary {
                        hostname: row.get(0)?,
                        failed: row.get(1)?,
                        success: row.get(2)?,
                    })
                },
            )
            .map_err(store_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(store_err)
    }

    pub fn top_failed_ips(
        &self,
        window_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<TopIp>, CoreError> {
        let cutoff = to_ms(now - Duration::minutes(window_minutes));
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT json_extract(e.payload, '$.remote_ip') AS rip, COUNT(*)
                 FROM raw_events e
                 WHERE e.source = 'auth'
                   AND e.event_type = ?1
                   AND e.ts >= ?2
                   AND json_extract(e.payload, '$.remote_ip') IS NOT NULL
                 GROUP BY rip
                 ORDER BY COUNT(*) DESC
                 LIMIT 10",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![EVENT_SSH_FAILED_LOGIN, cutoff], |row| {
                Ok(TopIp {
                    remote_ip: row.get(0)?,
                    failed: row.get(1)?,
                })
            })
            .map_err(store_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(store_err)
    }

    pub fn top_users(
        &self,
        window_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<TopUser>, CoreError> {
        let cutoff = to_ms(now - Duration::minutes(window_minutes));
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT json_extract(e.payload, '$.username') AS usr,
                        SUM(CASE WHEN e.event_type = ?1 THEN 1 ELSE 0 END) AS failed,
                        SUM(CASE WHEN e.event_type = ?2 THEN 1 ELSE 0 END) AS success
                 FROM raw_events e
                 WHERE e.source = 'auth'
                   AND e.event_type IN (?1, ?2)
                   AND e.ts >= ?3
                   AND json_extract(e.payload, '$.username') IS NOT NULL
                 GROUP BY usr
                 ORDER BY failed DESC, success DESC
                 LIMIT 10",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map(
                params![EVENT_SSH_FAILED_LOGIN, EVENT_SSH_LOGIN_SUCCESS, cutoff],
                |row| {
                    Ok(TopUser {
                        username: row.get(0)?,
                        failed: row.get(1)?,
                        success: row.get(2)?,
                    })
                },
            )
            .map_err(store_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(store_err)
    }

    pub fn ip_activity(
        &self,
        window_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<IpActivity>, CoreError> {
        let cutoff = to_ms(now - Duration::minutes(window_minutes));
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT json_extract(e.payload, '$.remote_ip') AS rip,
                        SUM(CASE WHEN e.event_type = ?1 THEN 1 ELSE 0 END),
                        SUM(CASE WHEN e.event_type = ?2 THEN 1 ELSE 0 END),
                        MAX(e.ts)
                 FROM raw_events e
                 WHERE e.source = 'auth'
                   AND e.event_type IN (?1, ?2)
                   AND e.ts >= ?3
                   AND json_extract(e.payload, '$.remote_ip') IS NOT NULL
                 GROUP BY rip
                 ORDER BY MAX(e.ts) DESC",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map(
                params![EVENT_SSH_FAILED_LOGIN, EVENT_SSH_LOGIN_SUCCESS, cutoff],
                |row| {
                    Ok(IpActivity {
                        remote_ip: row.get(0)?,
                        failed: row.get(1)?,
                        success: row.get(2)?,
                        last_seen: from_ms(row.get(3)?),
                    })
                },
            )
            .map_err(store_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(store_err)
    }

    /// Most recent SSH events in the window, newest first.
    pub fn recent_ssh_events(
        &self,
        window_minutes: i64,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<SshTimelineEvent>, CoreError> {
        let cutoff = to_ms(now - Duration::minutes(window_minutes));
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!(
                "{SSH_TIMELINE_SELECT}
                 WHERE e.source = 'auth'
                   AND e.event_type IN (?1, ?2)
                   AND e.ts >= ?3
                 ORDER BY e.ts DESC
                 LIMIT ?4"
            ))
            .map_err(store_err)?;
        let rows = stmt
            .query_map(
                params![EVENT_SSH_FAILED_LOGIN, EVENT_SSH_LOGIN_SUCCESS, cutoff, limit],
                ssh_timeline_from_row,
            )
            .map_err(store_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(store_err)
    }

    /// Deduplicated SSH events for one IP, ascending by time.
    pub fn ssh_timeline(
        &self,
        ip: &str,
        username: Option<&str>,
        window_minutes: i64,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<SshTimelineEvent>, CoreError> {
        let cutoff = to_ms(now - Duration::minutes(window_minutes));
        let mut sql = format!(
            "{SSH_TIMELINE_SELECT}
             WHERE e.source = 'auth'
               AND e.event_type IN (?, ?)
               AND e.ts >= ?
               AND json_extract(e.payload, '$.remote_ip') = ?"
        );
        let mut args: Vec<Value> = vec![
            Value::Text(EVENT_SSH_FAILED_LOGIN.to_string()),
            Value::Text(EVENT_SSH_LOGIN_SUCCESS.to_string()),
            Value::Integer(cutoff),
            Value::Text(ip.to_string()),
        ];
        if let Some(user) = username {
            sql.push_str(" AND json_extract(e.payload, '$.username') = ?");
            args.push(Value::Text(user.to_string()));
        }
        sql.push_str(" ORDER BY e.ts ASC LIMIT ?");
        args.push(Value::Integer(limit));

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql).map_err(store_err)?;
        let rows = stmt
            .query_map(params_from_iter(args), ssh_timeline_from_row)
            .map_err(store_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(store_err)
    }

    /// Deduplicated sudo events ascending by time, keyed by the agent that
    /// reported them so the caller can attribute a source IP.
    pub fn sudo_timeline(
        &self,
        sudo_user: Option<&str>,
        target_user: Option<&str>,
        window_minutes: i64,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<(String, SudoTimelineEvent)>, CoreError> {
        let cutoff = to_ms(now - Duration::minutes(window_minutes));
        let mut sql = String::from(
            "SELECT DISTINCT e.agent_id, e.ts, a.hostname,
                    COALESCE(json_extract(e.payload, '$.sudo_user'), ''),
                    COALESCE(json_extract(e.payload, '$.target_user'), ''),
                    COALESCE(json_extract(e.payload, '$.tty'), ''),
                    COALESCE(json_extract(e.payload, '$.pwd'), ''),
                    COALESCE(json_extract(e.payload, '$.command'), ''),
                    COALESCE(json_extract(e.payload, '$.is_sudo_root'), 0),
                    COALESCE(json_extract(e.payload, '$.is_target_root'), 0),
                    COALESCE(json_extract(e.payload, '$.raw_line'), '')
             FROM raw_events e
             JOIN agents a ON a.id = e.agent_id
             WHERE e.source = 'auth'
               AND e.event_type = ?
               AND e.ts >= ?",
        );
        let mut args: Vec<Value> = vec![
            Value::Text(EVENT_SUDO_COMMAND.to_string()),
            Value::Integer(cutoff),
        ];
        if let Some(user) = sudo_user {
            sql.push_str(" AND json_extract(e.payload, '$.sudo_user') = ?");
            args.push(Value::Text(user.to_string()));
        }
        if let Some(user) = target_user {
            sql.push_str(" AND json_extract(e.payload, '$.target_user') = ?");
            args.push(Value::Text(user.to_string()));
        }
        sql.push_str(" ORDER BY e.ts ASC LIMIT ?");
        args.push(Value::Integer(limit));

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql).map_err(store_err)?;
        let rows = stmt
            .query_map(params_from_iter(args), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    SudoTimelineEvent {
                        ts: from_ms(row.get(1)?),
                        hostname: row.get(2)?,
                        sudo_user: row.get(3)?,
                        target_user: row.get(4)?,
                        tty: row.get(5)?,
                        pwd: row.get(6)?,
                        command: row.get(7)?,
                        remote_ip: String::new(),
                        is_sudo_root: row.get(8)?,
                        is_target_root: row.get(9)?,
                        raw_line: row.get(10)?,
                    },
                ))
            })
            .map_err(store_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(store_err)
    }
}

// ============================================================================
// Row mapping
// ============================================================================

// The username column is the most frequent one among the failures that
// produced the alert, resolved by a correlated subquery.
const SSH_ALERT_SELECT: &str = "
    SELECT sa.id, sa.created_at, sa.hostname, sa.remote_ip,
           COALESCE((
               SELECT json_extract(f.payload, '$.username')
               FROM raw_events f
               WHERE f.agent_id = sa.agent_id
                 AND f.source = 'auth'
                 AND f.event_type = 'ssh_failed_login'
                 AND json_extract(f.payload, '$.remote_ip') = sa.remote_ip
                 AND f.ts BETWEEN sa.first_seen AND sa.last_seen
               GROUP BY json_extract(f.payload, '$.username')
               ORDER BY COUNT(*) DESC, MAX(f.ts) DESC
               LIMIT 1
           ), '') AS username,
           sa.failed_count, sa.window_minutes, sa.first_seen, sa.last_seen, sa.status
    FROM ssh_alerts sa";

fn ssh_alert_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SshAlert> {
    let remote_ip: String = row.get(3)?;
    let failed_count: i64 = row.get(5)?;
    let window_minutes: i64 = row.get(6)?;
    Ok(SshAlert {
        id: row.get(0)?,
        created_at: from_ms(row.get(1)?),
        hostname: row.get(2)?,
        username: row.get(4)?,
        failed_count,
        window_minutes,
        first_seen: from_ms(row.get(7)?),
        last_seen: from_ms(row.get(8)?),
        status: row.get(9)?,
        rule: "ssh_bruteforce".to_string(),
        severity: brute_force_severity(failed_count).to_string(),
        message: brute_force_message(failed_count, window_minutes, &remote_ip),
        remote_ip,
    })
}

fn suspicious_login_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SuspiciousLogin> {
    Ok(SuspiciousLogin {
        id: row.get(0)?,
        created_at: from_ms(row.get(1)?),
        hostname: row.get(2)?,
        username: row.get(3)?,
        remote_ip: row.get(4)?,
        failed_count_before_success: row.get(5)?,
        window_minutes: row.get(6)?,
        first_failed_at: from_ms(row.get(7)?),
        success_at: from_ms(row.get(8)?),
        status: row.get(9)?,
    })
}

fn sudo_alert_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SudoAlert> {
    Ok(SudoAlert {
        id: row.get(0)?,
        created_at: from_ms(row.get(1)?),
        hostname: row.get(2)?,
        sudo_user: row.get(3)?,
        target_user: row.get(4)?,
        remote_ip: row.get(5)?,
        tty: row.get(6)?,
        pwd: row.get(7)?,
        command: row.get(8)?,
        window_minutes: row.get(9)?,
        sudo_ts: from_ms(row.get(10)?),
        status: row.get(11)?,
    })
}

const SSH_TIMELINE_SELECT: &str = "
    SELECT DISTINCT e.ts, a.hostname, e.event_type,
           COALESCE(json_extract(e.payload, '$.username'), ''),
           COALESCE(json_extract(e.payload, '$.remote_ip'), ''),
           COALESCE(json_extract(e.payload, '$.auth_method'), ''),
           COALESCE(json_extract(e.payload, '$.is_root'), 0),
           COALESCE(json_extract(e.payload, '$.dst_port'), 0),
           COALESCE(json_extract(e.payload, '$.raw_line'), '')
    FROM raw_events e
    JOIN agents a ON a.id = e.agent_id";

fn ssh_timeline_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SshTimelineEvent> {
    Ok(SshTimelineEvent {
        ts: from_ms(row.get(0)?),
        hostname: row.get(1)?,
        event_type: row.get(2)?,
        username: row.get(3)?,
        remote_ip: row.get(4)?,
        auth_method: row.get(5)?,
        is_root: row.get(6)?,
        dst_port: row.get(7)?,
        raw_line: row.get(8)?,
    })
}
