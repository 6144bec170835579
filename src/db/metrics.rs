use rusqlite::params;

use super::{encode_ts, ts_column, Store, StoreResult, SystemSnapshot};

impl Store {
    /// Append one system snapshot.
    pub fn insert_snapshot(&self, snapshot: &SystemSnapshot) -> StoreResult<i64> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO system_metrics (timestamp, cpu_usage, memory_usage, service_status)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                encode_ts(&snapshot.timestamp),
                snapshot.cpu_usage,
                snapshot.memory_usage,
                snapshot.service_running,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent snapshots first.
    pub fn snapshots(&self, limit: usize) -> StoreResult<Vec<SystemSnapshot>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT timestamp, cpu_usage, memory_usage, service_status
             FROM system_metrics ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(SystemSnapshot {
                timestamp: ts_column(row, 0)?,
                cpu_usage: row.get(1)?,
                memory_usage: row.get(2)?,
                service_running: row.get(3)?,
            })
        })?;

        let mut snapshots = Vec::new();
        for row in rows {
            snapshots.push(row?);
        }
        Ok(snapshots)
    }

    /// Delete all but the newest `keep` snapshots. Returns the number removed.
    pub fn prune_snapshots(&self, keep: usize) -> StoreResult<usize> {
        let conn = self.connect()?;
        let removed = conn.execute(
            "DELETE FROM system_metrics
             WHERE id NOT IN (SELECT id FROM system_metrics ORDER BY id DESC LIMIT ?1)",
            params![keep as i64],
        )?;
        Ok(removed)
    }
}
