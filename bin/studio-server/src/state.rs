//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use studio_import_logs::{FsLogStore, LogStore, TaskDirectory, TaskLogService};

use crate::config::Config;
use crate::entities::SqliteStore;

/// State shared across all HTTP handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Import-task log retrieval.
    pub logs: TaskLogService,
}

impl AppState {
    /// Wire the log service to the task table and an explicit log store.
    pub fn new(config: Config, tasks: Arc<dyn TaskDirectory>, store: Arc<dyn LogStore>) -> Self {
        let logs = TaskLogService::new(tasks, store, config.log_service());
        Self {
            config: Arc::new(config),
            logs,
        }
    }

    /// Production wiring: tasks from SQLite, segments from `task_log_root`.
    pub fn with_sqlite(config: Config, db: SqliteStore) -> Self {
        let store = FsLogStore::new(config.task_log_root.clone());
        Self::new(config, Arc::new(db), Arc::new(store))
    }
}
