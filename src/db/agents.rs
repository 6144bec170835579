use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use super::{encode_ts, opt_ts_column, AgentStatus, Store, StoreResult};

impl Store {
    /// Insert or update the status row for one agent.
    #[cfg(test)]
    pub(crate) fn upsert_agent_status(
        &self,
        agent_name: &str,
        running: bool,
        current_task: Option<&str>,
    ) -> StoreResult<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO agent_status (agent_name, status, current_task, last_updated)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(agent_name) DO UPDATE SET
                status = excluded.status,
                current_task = excluded.current_task,
                last_updated = excluded.last_updated",
            params![agent_name, running, current_task, encode_ts(&Utc::now())],
        )?;
        Ok(())
    }

    /// Set the running flag of every named agent in one transaction.
    ///
    /// The current task label is cleared: a lifecycle transition starts the
    /// agent idle or stops it.
    pub fn set_agents_running(&self, agent_names: &[String], running: bool) -> StoreResult<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let now = encode_ts(&Utc::now());
        for name in agent_names {
            tx.execute(
                "INSERT INTO agent_status (agent_name, status, current_task, last_updated)
                 VALUES (?1, ?2, NULL, ?3)
                 ON CONFLICT(agent_name) DO UPDATE SET
                    status = excluded.status,
                    current_task = NULL,
                    last_updated = excluded.last_updated",
                params![name, running, now],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Read the persisted status row of one agent.
    pub fn agent_status(&self, agent_name: &str) -> StoreResult<Option<AgentStatus>> {
        let conn = self.connect()?;
        let status = conn
            .query_row(
                "SELECT agent_name, status, current_task, last_updated
                 FROM agent_status WHERE agent_name = ?1",
                params![agent_name],
                |row| {
                    Ok(AgentStatus {
                        agent_name: row.get(0)?,
                        running: row.get(1)?,
                        current_task: row.get(2)?,
                        last_updated: opt_ts_column(row, 3)?,
                        initialized: true,
                    })
                },
            )
            .optional()?;
        Ok(status)
    }

    /// Statuses for the given agents, in order. Agents without a row get the
    /// default "not initialized" status.
    pub fn agent_statuses(&self, agent_names: &[String]) -> StoreResult<Vec<AgentStatus>> {
        agent_names
            .iter()
            .map(|name| {
                Ok(self
                    .agent_status(name)?
                    .unwrap_or_else(|| AgentStatus::not_initialized(name.as_str())))
            })
            .collect()
    }
}
