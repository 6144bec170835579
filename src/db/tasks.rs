//! Scheduled tasks and the execution log.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::{
    encode_ts, enum_column, opt_ts_column, ts_column, ExecutionStatus, NewScheduledTask,
    ScheduledTask, Store, StoreError, StoreResult, TaskExecutionRecord, TaskParameters,
};
use crate::scheduler::{Advance, ScheduleKind};

/// Task type recorded for executions created by the scheduler.
pub const SCHEDULED_TASK_TYPE: &str = "scheduled";

const TASK_COLUMNS: &str = "id, agent_name, task_name, task_description, schedule_type, \
     schedule_time, parameters, is_active, created_at, last_run, next_run";

const EXECUTION_COLUMNS: &str =
    "id, agent_name, task_type, task_status, result, created_at, completed_at";

/// One task fired during a sweep.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FiredTask {
    pub task_id: i64,
    pub execution_id: i64,
    pub agent_name: String,
    pub task_name: String,
    /// `None` when the task was retired.
    pub next_run: Option<DateTime<Utc>>,
}

/// Outcome of one due-task sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub fired: Vec<FiredTask>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.fired.is_empty()
    }
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<ScheduledTask> {
    let raw_parameters: String = row.get(6)?;
    let parameters: TaskParameters = serde_json::from_str(&raw_parameters).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(ScheduledTask {
        id: row.get(0)?,
        agent_name: row.get(1)?,
        task_name: row.get(2)?,
        task_description: row.get(3)?,
        schedule_kind: enum_column(row, 4)?,
        schedule_time: ts_column(row, 5)?,
        parameters,
        is_active: row.get(7)?,
        created_at: ts_column(row, 8)?,
        last_run: opt_ts_column(row, 9)?,
        next_run: ts_column(row, 10)?,
    })
}

fn execution_from_row(row: &Row<'_>) -> rusqlite::Result<TaskExecutionRecord> {
    Ok(TaskExecutionRecord {
        id: row.get(0)?,
        agent_name: row.get(1)?,
        task_type: row.get(2)?,
        status: enum_column(row, 3)?,
        result: row.get(4)?,
        created_at: ts_column(row, 5)?,
        completed_at: opt_ts_column(row, 6)?,
    })
}

fn insert_execution(
    conn: &Connection,
    agent_name: &str,
    task_type: &str,
    status: ExecutionStatus,
    result: Option<&str>,
    created_at: &DateTime<Utc>,
) -> StoreResult<i64> {
    conn.execute(
        "INSERT INTO agent_tasks (agent_name, task_type, task_status, result, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![agent_name, task_type, status.as_str(), result, encode_ts(created_at)],
    )?;
    Ok(conn.last_insert_rowid())
}

impl Store {
    // ==================== Scheduled tasks ====================

    /// Insert a new active task whose first run is its schedule time.
    pub fn insert_scheduled_task(&self, task: &NewScheduledTask) -> StoreResult<i64> {
        let parameters = serde_json::to_string(&task.parameters)?;
        let schedule_time = encode_ts(&task.schedule_time);
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO task_schedules (agent_name, task_name, task_description, schedule_type,
                schedule_time, parameters, is_active, created_at, next_run)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?5)",
            params![
                task.agent_name,
                task.task_name,
                task.task_description,
                task.schedule_kind.as_str(),
                schedule_time,
                parameters,
                encode_ts(&Utc::now()),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn scheduled_task(&self, id: i64) -> StoreResult<Option<ScheduledTask>> {
        let conn = self.connect()?;
        let task = conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM task_schedules WHERE id = ?1"),
                params![id],
                task_from_row,
            )
            .optional()?;
        Ok(task)
    }

    /// All tasks ordered by next run, optionally limited to one agent.
    pub fn scheduled_tasks(&self, agent_name: Option<&str>) -> StoreResult<Vec<ScheduledTask>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM task_schedules
             WHERE (?1 IS NULL OR agent_name = ?1)
             ORDER BY next_run, id"
        ))?;
        let rows = stmt.query_map(params![agent_name], task_from_row)?;

        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }

    /// Active tasks whose next run is at or before `now`.
    #[cfg(test)]
    pub(crate) fn due_tasks(&self, now: DateTime<Utc>) -> StoreResult<Vec<ScheduledTask>> {
        let conn = self.connect()?;
        query_due(&conn, now)
    }

    /// Fire every due task in one transaction.
    ///
    /// For each due task an execution record is appended, `last_run` is set to
    /// `now` and the schedule is advanced. If anything fails the transaction is
    /// rolled back and no task row or log entry is changed.
    pub fn fire_due_tasks(&self, now: DateTime<Utc>) -> StoreResult<SweepReport> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;

        let due = query_due(&tx, now)?;
        let mut report = SweepReport::default();
        let fire_time = encode_ts(&now);

        for task in due {
            let execution_id = insert_execution(
                &tx,
                &task.agent_name,
                SCHEDULED_TASK_TYPE,
                ExecutionStatus::Running,
                Some(&format!("Executing scheduled task: {}", task.task_name)),
                &now,
            )?;

            let next_run = match task.schedule_kind.advance(now) {
                Advance::Reschedule(next) => {
                    tx.execute(
                        "UPDATE task_schedules SET last_run = ?1, next_run = ?2 WHERE id = ?3",
                        params![fire_time, encode_ts(&next), task.id],
                    )?;
                    Some(next)
                }
                Advance::Retire => {
                    tx.execute(
                        "UPDATE task_schedules SET last_run = ?1, is_active = 0 WHERE id = ?2",
                        params![fire_time, task.id],
                    )?;
                    None
                }
            };

            // Only touches agents that already have a status row.
            tx.execute(
                "UPDATE agent_status SET current_task = ?1, last_updated = ?2 WHERE agent_name = ?3",
                params![task.task_name, fire_time, task.agent_name],
            )?;

            report.fired.push(FiredTask {
                task_id: task.id,
                execution_id,
                agent_name: task.agent_name,
                task_name: task.task_name,
                next_run,
            });
        }

        tx.commit()?;
        Ok(report)
    }

    // ==================== Execution log ====================

    /// Append an execution record.
    pub fn record_execution(
        &self,
        agent_name: &str,
        task_type: &str,
        status: ExecutionStatus,
        result: Option<&str>,
    ) -> StoreResult<i64> {
        let conn = self.connect()?;
        insert_execution(&conn, agent_name, task_type, status, result, &Utc::now())
    }

    /// Write the completion fields of an execution record.
    ///
    /// Completion is write-once: a record that already has `completed_at`
    /// is left untouched and `Ok(false)` is returned.
    pub fn complete_execution(
        &self,
        id: i64,
        status: ExecutionStatus,
        result: Option<&str>,
    ) -> StoreResult<bool> {
        let conn = self.connect()?;
        let updated = conn.execute(
            "UPDATE agent_tasks
             SET task_status = ?1, result = COALESCE(?2, result), completed_at = ?3
             WHERE id = ?4 AND completed_at IS NULL",
            params![status.as_str(), result, encode_ts(&Utc::now()), id],
        )?;
        if updated == 0 && self.execution(id)?.is_none() {
            return Err(StoreError::NotFound(format!("Execution {}", id)));
        }
        Ok(updated > 0)
    }

    pub fn execution(&self, id: i64) -> StoreResult<Option<TaskExecutionRecord>> {
        let conn = self.connect()?;
        let record = conn
            .query_row(
                &format!("SELECT {EXECUTION_COLUMNS} FROM agent_tasks WHERE id = ?1"),
                params![id],
                execution_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Newest execution records first.
    pub fn executions(
        &self,
        agent_name: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<TaskExecutionRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM agent_tasks
             WHERE (?1 IS NULL OR agent_name = ?1)
             ORDER BY id DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![agent_name, limit as i64], execution_from_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}

fn query_due(conn: &Connection, now: DateTime<Utc>) -> StoreResult<Vec<ScheduledTask>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TASK_COLUMNS} FROM task_schedules
         WHERE is_active = 1 AND next_run <= ?1
         ORDER BY id"
    ))?;
    let rows = stmt.query_map(params![encode_ts(&now)], task_from_row)?;

    let mut tasks = Vec::new();
    for row in rows {
        tasks.push(row?);
    }
    Ok(tasks)
}
