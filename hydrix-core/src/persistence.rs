use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hydrix_model::{
    PluginDescriptor, PluginFilter, PluginKind, ScanTaskId, ScanTaskRecord, ScanTaskStatus,
};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};

use crate::error::{Result, ScanError};
use crate::plugins::PluginCatalog;
use crate::store::TaskStore;

/// Opens a connection pool against the given Postgres URL.
pub async fn connect(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Task records persisted in Postgres.
///
/// Counters are stored as BIGINT, so values are cast through i64 at the
/// boundary; list fields ride in JSONB columns.
#[derive(Clone, Debug)]
pub struct PostgresTaskStore {
    pool: PgPool,
}

impl PostgresTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the task and plugin tables when missing.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS hybrid_scan_tasks (
                task_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                reason TEXT,
                plugins JSONB NOT NULL DEFAULT '[]'::jsonb,
                targets JSONB NOT NULL DEFAULT '[]'::jsonb,
                survival_indexes JSONB NOT NULL DEFAULT '[]'::jsonb,
                dispatched_tasks BIGINT NOT NULL DEFAULT 0,
                total_targets BIGINT NOT NULL DEFAULT 0,
                total_plugins BIGINT NOT NULL DEFAULT 0,
                total_tasks BIGINT NOT NULL DEFAULT 0,
                finished_targets BIGINT NOT NULL DEFAULT 0,
                finished_tasks BIGINT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scan_plugins (
                name TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                content TEXT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        tracing::debug!(target: "scan::store", "schema ready");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TaskStore for PostgresTaskStore {
    async fn get(&self, task_id: &ScanTaskId) -> Result<Option<ScanTaskRecord>> {
        let row = sqlx::query(
            "SELECT task_id, status, reason, plugins, targets, survival_indexes, \
             dispatched_tasks, total_targets, total_plugins, total_tasks, \
             finished_targets, finished_tasks, created_at, updated_at \
             FROM hybrid_scan_tasks WHERE task_id = $1",
        )
        .bind(task_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| record_from_row(&row)).transpose()
    }

    async fn upsert(&self, record: &ScanTaskRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO hybrid_scan_tasks (task_id, status, reason, plugins, targets, \
             survival_indexes, dispatched_tasks, total_targets, total_plugins, total_tasks, \
             finished_targets, finished_tasks, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             ON CONFLICT (task_id) DO UPDATE SET \
             status = EXCLUDED.status, \
             reason = EXCLUDED.reason, \
             plugins = EXCLUDED.plugins, \
             targets = EXCLUDED.targets, \
             survival_indexes = EXCLUDED.survival_indexes, \
             dispatched_tasks = EXCLUDED.dispatched_tasks, \
             total_targets = EXCLUDED.total_targets, \
             total_plugins = EXCLUDED.total_plugins, \
             total_tasks = EXCLUDED.total_tasks, \
             finished_targets = EXCLUDED.finished_targets, \
             finished_tasks = EXCLUDED.finished_tasks, \
             updated_at = EXCLUDED.updated_at",
        )
        .bind(record.task_id.as_str())
        .bind(record.status.as_str())
        .bind(record.reason.as_deref())
        .bind(serde_json::to_value(&record.plugins)?)
        .bind(serde_json::to_value(&record.targets)?)
        .bind(serde_json::to_value(&record.survival_indexes)?)
        .bind(record.dispatched_tasks as i64)
        .bind(record.total_targets as i64)
        .bind(record.total_plugins as i64)
        .bind(record.total_tasks as i64)
        .bind(record.finished_targets as i64)
        .bind(record.finished_tasks as i64)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, task_id: &ScanTaskId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM hybrid_scan_tasks WHERE task_id = $1")
            .bind(task_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn record_from_row(row: &PgRow) -> Result<ScanTaskRecord> {
    let status: String = row.try_get("status")?;
    let status = ScanTaskStatus::from_str(&status).map_err(ScanError::Internal)?;

    Ok(ScanTaskRecord {
        task_id: ScanTaskId::new(row.try_get::<String, _>("task_id")?),
        status,
        reason: row.try_get("reason")?,
        plugins: serde_json::from_value(row.try_get("plugins")?)?,
        targets: serde_json::from_value(row.try_get("targets")?)?,
        survival_indexes: serde_json::from_value(row.try_get("survival_indexes")?)?,
        dispatched_tasks: row.try_get::<i64, _>("dispatched_tasks")? as u64,
        total_targets: row.try_get::<i64, _>("total_targets")? as u64,
        total_plugins: row.try_get::<i64, _>("total_plugins")? as u64,
        total_tasks: row.try_get::<i64, _>("total_tasks")? as u64,
        finished_targets: row.try_get::<i64, _>("finished_targets")? as u64,
        finished_tasks: row.try_get::<i64, _>("finished_tasks")? as u64,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

/// Plugin catalog persisted alongside the task records.
#[derive(Clone, Debug)]
pub struct PostgresPluginCatalog {
    pool: PgPool,
}

impl PostgresPluginCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PluginCatalog for PostgresPluginCatalog {
    async fn get(&self, name: &str) -> Result<Option<PluginDescriptor>> {
        let row = sqlx::query("SELECT name, kind, content FROM scan_plugins WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| plugin_from_row(&row)).transpose()
    }

    async fn query(&self, filter: &PluginFilter) -> Result<Vec<PluginDescriptor>> {
        let rows = sqlx::query("SELECT name, kind, content FROM scan_plugins ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        let mut matched = Vec::with_capacity(rows.len());
        for row in &rows {
            let plugin = plugin_from_row(row)?;
            if filter.matches(&plugin) {
                matched.push(plugin);
            }
        }
        Ok(matched)
    }

    async fn upsert(&self, plugin: &PluginDescriptor) -> Result<()> {
        sqlx::query(
            "INSERT INTO scan_plugins (name, kind, content, updated_at) \
             VALUES ($1, $2, $3, now()) \
             ON CONFLICT (name) DO UPDATE SET \
             kind = EXCLUDED.kind, content = EXCLUDED.content, updated_at = now()",
        )
        .bind(&plugin.name)
        .bind(plugin.kind.as_str())
        .bind(&plugin.content)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<PluginDescriptor>> {
        self.query(&PluginFilter::default()).await
    }
}

fn plugin_from_row(row: &PgRow) -> Result<PluginDescriptor> {
    let kind: String = row.try_get("kind")?;
    Ok(PluginDescriptor {
        name: row.try_get("name")?,
        kind: PluginKind::from_str(&kind)?,
        content: row.try_get("content")?,
    })
}
