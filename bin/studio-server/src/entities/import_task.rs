use std::future::Future;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use studio_import_logs::{ImportTask, LogError, TaskDirectory, TaskId, TaskStatus};
use tracing::warn;

use super::SqliteStore;

/// Read access to the `import_tasks` table.
///
/// Rows are written by the import executor; this server never mutates them
/// outside of tests.
pub trait ImportTaskStore: Send + Sync + 'static {
    fn get_import_task(
        &self,
        id: &TaskId,
    ) -> impl Future<Output = Result<Option<ImportTask>, sqlx::Error>> + Send;
}

type ImportTaskRow = (String, Option<String>, String, String, String);

impl ImportTaskStore for SqliteStore {
    async fn get_import_task(&self, id: &TaskId) -> Result<Option<ImportTask>, sqlx::Error> {
        let row: Option<ImportTaskRow> = sqlx::query_as(
            "SELECT id, name, status, created_at, updated_at FROM import_tasks WHERE id = ?1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| from_row(id, row)))
    }
}

fn from_row(
    id: &TaskId,
    (raw_id, name, status, created_at, updated_at): ImportTaskRow,
) -> ImportTask {
    let status = TaskStatus::from_str(&status).unwrap_or_else(|_| {
        warn!(task_id = %raw_id, raw = %status, "unknown import task status; treating as interrupted");
        TaskStatus::Interrupted
    });
    ImportTask {
        id: id.clone(),
        name,
        status,
        created_at: parse_time(&raw_id, "created_at", &created_at),
        updated_at: parse_time(&raw_id, "updated_at", &updated_at),
    }
}

fn parse_time(task_id: &str, column: &str, raw: &str) -> DateTime<Utc> {
    raw.parse().unwrap_or_else(|e: chrono::ParseError| {
        warn!(task_id, column, raw, error = %e, "failed to parse import task timestamp; using now");
        Utc::now()
    })
}

#[async_trait]
impl TaskDirectory for SqliteStore {
    async fn find_task(&self, task_id: &TaskId) -> Result<Option<ImportTask>, LogError> {
        self.get_import_task(task_id).await.map_err(|e| {
            warn!(task_id = %task_id, error = %e, "import task lookup failed");
            LogError::StorageUnavailable {
                message: "import task table unavailable".to_owned(),
                source: None,
            }
        })
    }
}

#[cfg(test)]
impl SqliteStore {
    pub async fn insert_import_task(&self, task: &ImportTask) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO import_tasks (id, name, status, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(task.id.as_str())
        .bind(&task.name)
        .bind(task.status.to_string())
        .bind(task.created_at.to_rfc3339())
        .bind(task.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_raw_import_task(
        &self,
        id: &str,
        status: &str,
        created_at: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO import_tasks (id, name, status, created_at, updated_at) \
             VALUES (?1, NULL, ?2, ?3, ?3)",
        )
        .bind(id)
        .bind(status)
        .bind(created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
