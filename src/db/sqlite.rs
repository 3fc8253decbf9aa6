use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::{Path, PathBuf};

use super::pool::DbPool;
use super::registry::{InstanceRegistry, RegistryError};
use super::run_migrations;
use crate::instance::{
    Instance, InstanceId, InstanceStatus, NewInstance, ProcessState, Recipe, next_restart_stamp,
};

const COLUMNS: &str = "id, name, kind, external_token, display_name, workspace_path, \
    log_file_path, status, pid, source_url, branch, start_command, build_command, extra_env, \
    restart_count, last_restart_at, created_at, last_deployed_at";

/// SQLite-backed instance registry.
pub struct SqliteRegistry {
    pool: DbPool,
}

impl SqliteRegistry {
    /// Open (or create) the registry database and apply pending migrations.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let pool = DbPool::open(path, 2)?;
        run_migrations(&pool)?;
        Ok(Self { pool })
    }
}

// ── Row mapping ────────────────────────────────────────────────

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_instance(row: &Row<'_>) -> rusqlite::Result<Instance> {
    let status: String = row.get(7)?;
    let pid: Option<u32> = row.get(8)?;
    let process = match (status.as_str(), pid) {
        ("running", Some(pid)) => ProcessState::Running { pid },
        _ => ProcessState::Stopped,
    };

    let extra_env_raw: String = row.get(13)?;
    let extra_env: Vec<(String, String)> = serde_json::from_str(&extra_env_raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(13, Type::Text, Box::new(e)))?;

    let last_restart_at = match row.get::<_, Option<String>>(15)? {
        Some(raw) => Some(parse_ts(15, &raw)?),
        None => None,
    };

    Ok(Instance {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: row.get(2)?,
        external_token: row.get(3)?,
        display_name: row.get(4)?,
        workspace_path: PathBuf::from(row.get::<_, String>(5)?),
        log_file_path: PathBuf::from(row.get::<_, String>(6)?),
        process,
        recipe: Recipe {
            source_url: row.get(9)?,
            branch: row.get(10)?,
            start_command: row.get(11)?,
            build_command: row.get(12)?,
            extra_env,
        },
        restart_count: row.get(14)?,
        last_restart_at,
        created_at: parse_ts(16, &row.get::<_, String>(16)?)?,
        last_deployed_at: parse_ts(17, &row.get::<_, String>(17)?)?,
    })
}

fn fetch(conn: &Connection, id: InstanceId) -> anyhow::Result<Instance> {
    let instance = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM instances WHERE id = ?1"),
            params![id],
            row_to_instance,
        )
        .optional()?;
    instance.ok_or_else(|| RegistryError::NotFound(id).into())
}

fn query_instances(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> anyhow::Result<Vec<Instance>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, row_to_instance)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn token_held(conn: &Connection, token: &str, excluding: Option<InstanceId>) -> anyhow::Result<bool> {
    let held: bool = conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM instances
            WHERE external_token = ?1 AND status = 'running' AND (?2 IS NULL OR id != ?2)
        )",
        params![token, excluding],
        |row| row.get(0),
    )?;
    Ok(held)
}

/// Recover the typed error from an `anyhow` chain. A unique-index violation
/// on the token column is the database-level form of `DuplicateToken`.
fn classify(e: anyhow::Error) -> RegistryError {
    let e = match e.downcast::<RegistryError>() {
        Ok(typed) => return typed,
        Err(e) => e,
    };
    if let Some(rusqlite::Error::SqliteFailure(err, Some(msg))) = e.downcast_ref::<rusqlite::Error>()
    {
        if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
            && msg.contains("external_token")
        {
            return RegistryError::DuplicateToken;
        }
    }
    RegistryError::Storage(e)
}

// ── Registry impl ──────────────────────────────────────────────

impl InstanceRegistry for SqliteRegistry {
    fn insert(&self, new: NewInstance) -> Result<Instance, RegistryError> {
        let now = format_ts(Utc::now());
        let extra_env =
            serde_json::to_string(&new.recipe.extra_env).context("failed to encode extra env")?;

        self.pool
            .write(|conn| {
                if let Some(token) = new.external_token.as_deref() {
                    if token_held(conn, token, None)? {
                        return Err(RegistryError::DuplicateToken.into());
                    }
                }
                conn.execute(
                    "INSERT INTO instances (name, kind, external_token, display_name,
                        workspace_path, log_file_path, status, pid, source_url, branch,
                        start_command, build_command, extra_env, created_at, last_deployed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'running', ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
                    params![
                        new.name,
                        new.kind,
                        new.external_token,
                        new.display_name,
                        new.workspace_path.to_string_lossy(),
                        new.log_file_path.to_string_lossy(),
                        new.pid,
                        new.recipe.source_url,
                        new.recipe.branch,
                        new.recipe.start_command,
                        new.recipe.build_command,
                        extra_env,
                        now,
                    ],
                )?;
                fetch(conn, conn.last_insert_rowid())
            })
            .map_err(classify)
    }

    fn get(&self, id: InstanceId) -> Result<Instance, RegistryError> {
        self.pool.read(|conn| fetch(conn, id)).map_err(classify)
    }

    fn token_in_use(
        &self,
        token: &str,
        excluding: Option<InstanceId>,
    ) -> Result<bool, RegistryError> {
        self.pool
            .read(|conn| token_held(conn, token, excluding))
            .map_err(classify)
    }

    fn list(&self) -> Result<Vec<Instance>, RegistryError> {
        self.pool
            .read(|conn| {
                query_instances(
                    conn,
                    &format!("SELECT {COLUMNS} FROM instances ORDER BY created_at DESC, id DESC"),
                    [],
                )
            })
            .map_err(classify)
    }

    fn list_by_status(&self, status: InstanceStatus) -> Result<Vec<Instance>, RegistryError> {
        self.pool
            .read(|conn| {
                query_instances(
                    conn,
                    &format!(
                        "SELECT {COLUMNS} FROM instances WHERE status = ?1
                         ORDER BY created_at DESC, id DESC"
                    ),
                    params![status.as_str()],
                )
            })
            .map_err(classify)
    }

    fn mark_stopped(&self, id: InstanceId) -> Result<Instance, RegistryError> {
        self.pool
            .write(|conn| {
                let changed = conn.execute(
                    "UPDATE instances SET status = 'stopped', pid = NULL WHERE id = ?1",
                    params![id],
                )?;
                if changed == 0 {
                    return Err(RegistryError::NotFound(id).into());
                }
                fetch(conn, id)
            })
            .map_err(classify)
    }

    fn record_restart(
        &self,
        id: InstanceId,
        pid: u32,
        at: DateTime<Utc>,
    ) -> Result<Instance, RegistryError> {
        self.pool
            .write(|conn| {
                let previous: Option<Option<String>> = conn
                    .query_row(
                        "SELECT last_restart_at FROM instances WHERE id = ?1",
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()?;
                let Some(previous) = previous else {
                    return Err(RegistryError::NotFound(id).into());
                };
                let previous = match previous {
                    Some(raw) => Some(parse_ts(0, &raw)?),
                    None => None,
                };
                let stamp = next_restart_stamp(previous, at);

                conn.execute(
                    "UPDATE instances
                     SET status = 'running', pid = ?2, restart_count = restart_count + 1,
                         last_restart_at = ?3
                     WHERE id = ?1",
                    params![id, pid, format_ts(stamp)],
                )?;
                fetch(conn, id)
            })
            .map_err(classify)
    }

    fn stop_all_running(&self) -> Result<usize, RegistryError> {
        self.pool
            .write(|conn| {
                let changed = conn.execute(
                    "UPDATE instances SET status = 'stopped', pid = NULL WHERE status = 'running'",
                    [],
                )?;
                Ok(changed)
            })
            .map_err(classify)
    }
}
