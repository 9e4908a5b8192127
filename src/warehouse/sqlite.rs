use std::{
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU8, Ordering}
    }
};

use async_trait::async_trait;
use rusqlite::{Connection, InterruptHandle, OpenFlags, types::ValueRef};
use serde_json::Value;
use tracing::debug;

use super::{QueryExecutor, QueryOutput, Row};
use crate::{
    dialect::SqlDialect,
    error::{AppError, AppResult, execution_error, schema_load_error},
    guardrail::{GuardrailConfig, ensure_read_only},
    schema::{SchemaProvider, SchemaSnapshot}
};

const COLUMNS_QUERY: &str = "SELECT m.name, p.name, p.type \
     FROM sqlite_master AS m JOIN pragma_table_info(m.name) AS p \
     WHERE m.type IN ('table', 'view') AND m.name NOT LIKE 'sqlite_%' \
     ORDER BY m.name, p.cid";

/// SQLite database used as a read-only analytics warehouse.
///
/// Also acts as the schema provider by introspecting its own catalog.
pub struct SqliteWarehouse {
    conn:       Arc<Mutex<Connection>>,
    interrupt:  Arc<InterruptHandle>,
    row_limit:  usize,
    guardrails: Option<GuardrailConfig>
}

impl SqliteWarehouse {
    /// Open a database file read-only.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened as a SQLite database.
    pub fn open(path: &Path) -> AppResult<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags).map_err(|e| {
            execution_error(format!(
                "cannot open warehouse '{}': {}",
                path.display(),
                e
            ))
        })?;
        Ok(Self::from_connection(conn))
    }

    /// Wrap an existing connection; read-only enforcement then relies on the
    /// statement checks alone.
    pub fn from_connection(conn: Connection) -> Self {
        let interrupt = Arc::new(conn.get_interrupt_handle());
        Self {
            conn: Arc::new(Mutex::new(conn)),
            interrupt,
            row_limit: 200,
            guardrails: None
        }
    }

    pub fn with_row_limit(mut self, row_limit: usize) -> Self {
        self.row_limit = row_limit;
        self
    }

    /// Only expose whitelisted tables through [`SchemaProvider`]
    pub fn restricted_to(mut self, guardrails: GuardrailConfig) -> Self {
        self.guardrails = Some(guardrails);
        self
    }

    /// Run a blocking closure on the connection.
    ///
    /// If the caller stops waiting, a running statement is interrupted and a
    /// closure still queued for the connection never starts.
    async fn with_connection<T, F>(&self, work: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> AppResult<T> + Send + 'static
    {
        let conn = Arc::clone(&self.conn);
        let stage = Arc::new(AtomicU8::new(QUEUED));
        let guard = CancelOnDrop {
            handle: Arc::clone(&self.interrupt),
            stage:  Arc::clone(&stage),
            armed:  true
        };
        let result = tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| execution_error("warehouse connection is poisoned"))?;
            if stage
                .compare_exchange(QUEUED, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return Err(execution_error("warehouse call abandoned before it started"));
            }
            let result = work(&conn);
            stage.store(FINISHED, Ordering::SeqCst);
            result
        })
        .await
        .map_err(|e| execution_error(format!("warehouse task failed: {}", e)));
        guard.disarm();
        result?
    }
}

const QUEUED: u8 = 0;
const RUNNING: u8 = 1;
const FINISHED: u8 = 2;
const CANCELLED: u8 = 3;

/// Cancels a warehouse call when its future is dropped
struct CancelOnDrop {
    handle: Arc<InterruptHandle>,
    stage:  Arc<AtomicU8>,
    armed:  bool
}

impl CancelOnDrop {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let previous = self
            .stage
            .compare_exchange(QUEUED, CANCELLED, Ordering::SeqCst, Ordering::SeqCst);
        if previous == Err(RUNNING) {
            self.handle.interrupt();
        }
    }
}

#[async_trait]
impl QueryExecutor for SqliteWarehouse {
    async fn execute(&self, sql: &str) -> AppResult<QueryOutput> {
        ensure_read_only(sql, SqlDialect::SQLite)?;
        let sql = sql.to_string();
        let row_limit = self.row_limit;
        let output = self
            .with_connection(move |conn| query_rows(conn, &sql, row_limit))
            .await?;
        debug!(
            rows = output.row_count(),
            truncated = output.truncated,
            "warehouse query finished"
        );
        Ok(output)
    }
}

#[async_trait]
impl SchemaProvider for SqliteWarehouse {
    async fn load_schema(&self) -> AppResult<SchemaSnapshot> {
        let mut snapshot = self
            .with_connection(load_columns)
            .await
            .map_err(|e| schema_load_error(e.to_string()))?;
        if let Some(guardrails) = &self.guardrails {
            snapshot.retain_allowed(guardrails);
            if snapshot.is_empty() {
                return Err(schema_load_error(
                    "warehouse exposes none of the allowed tables"
                ));
            }
        }
        Ok(snapshot)
    }
}

fn sqlite_error(err: rusqlite::Error) -> AppError {
    execution_error(err.to_string())
}

fn query_rows(conn: &Connection, sql: &str, row_limit: usize) -> AppResult<QueryOutput> {
    let mut stmt = conn.prepare(sql).map_err(sqlite_error)?;
    if !stmt.readonly() {
        return Err(execution_error(
            "refusing to execute: statement would modify the database"
        ));
    }
    let columns: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(String::from)
        .collect();

    let mut output = QueryOutput {
        columns: columns.clone(),
        ..Default::default()
    };
    let mut rows = stmt.query([]).map_err(sqlite_error)?;
    while let Some(row) = rows.next().map_err(sqlite_error)? {
        if output.rows.len() == row_limit {
            output.truncated = true;
            break;
        }
        let mut record = Row::with_capacity(columns.len());
        for (index, name) in columns.iter().enumerate() {
            let value = row.get_ref(index).map_err(sqlite_error)?;
            record.insert(name.clone(), to_json(value));
        }
        output.rows.push(record);
    }
    Ok(output)
}

fn load_columns(conn: &Connection) -> AppResult<SchemaSnapshot> {
    let mut stmt = conn.prepare(COLUMNS_QUERY).map_err(sqlite_error)?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?
            ))
        })
        .map_err(sqlite_error)?;
    let columns = rows.collect::<Result<Vec<_>, _>>().map_err(sqlite_error)?;
    Ok(SchemaSnapshot::from_columns(columns))
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(format!("<blob {} bytes>", bytes.len()))
    }
}
