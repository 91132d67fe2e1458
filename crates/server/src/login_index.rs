//! Per-agent time-ordered index over successful SSH logins, used to
//! attribute a source IP to later actions (sudo invocations) by
//! predecessor search: the most recent login at or before a timestamp.

use std::collections::HashMap;

/// Built once per detector run or query from `Database::success_login_rows`.
pub struct LoginIndex {
    // (ts_ms, remote_ip), ascending by ts per agent
    by_agent: HashMap<String, Vec<(i64, String)>>,
}

impl LoginIndex {
    /// `rows` must be ordered by (agent_id, ts), which is how the store
    /// hands them out.
    pub fn build(rows: Vec<(String, i64, String)>) -> Self {
        let mut by_agent: HashMap<String, Vec<(i64, String)>> = HashMap::new();
        for (agent_id, ts, remote_ip) in rows {
            by_agent.entry(agent_id).or_default().push((ts, remote_ip));
        }
        Self { by_agent }
    }

    /// Source IP of the most recent successful login on `agent_id` with a
    /// timestamp at or before `ts_ms`. Attribution is best-effort: `None`
    /// when the agent has no prior login.
    pub fn source_ip_at(&self, agent_id: &str, ts_ms: i64) -> Option<&str> {
        let logins = self.by_agent.get(agent_id)?;
        let idx = logins.partition_point(|(ts, _)| *ts <= ts_ms);
        if idx == 0 {
            None
        } else {
            Some(logins[idx - 1].1.as_str())
        }
    }
}
