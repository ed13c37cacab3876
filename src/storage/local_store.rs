// Embedded DuckDB store: destination for federated results and raw
// per-source ingestion, plus the ad-hoc SQL surface over both.
use std::sync::mpsc::Receiver;
use std::sync::Mutex;

use duckdb::{params_from_iter, types::TimeUnit, types::Value as DuckValue, Connection};

use crate::api::middleware::AppError;
use crate::models::{FinalResult, Row, Value};

/// Appender flush cadence, in rows. Bounds memory during long bulk loads.
pub const APPEND_FLUSH_INTERVAL: usize = 1_000_000;

/// Message on a bulk-append channel. `Done` is the sentinel terminator that
/// closes the append handle.
#[derive(Debug)]
pub enum RowMessage {
    Row(Row),
    Done,
}

/// Handle to the embedded analytical store. The connection is wrapped in a
/// mutex: concurrent loads into different tables queue up on it, and loads
/// into the same table are serialized by it (single-writer discipline).
pub struct LocalStore {
    conn: Mutex<Connection>,
}

impl LocalStore {
    pub fn open(path: &str) -> Result<Self, AppError> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(path)
        }
        .map_err(|e| AppError::Storage(format!("Failed to open local store: {}", e)))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Idempotent destination-table creation from canonical column types.
    pub fn create_or_replace_table(
        &self,
        name: &str,
        columns: &[(String, String)],
    ) -> Result<(), AppError> {
        if columns.is_empty() {
            return Err(AppError::Validation(format!(
                "Cannot create table '{}': no columns",
                name
            )));
        }

        let col_defs: Vec<String> = columns
            .iter()
            .map(|(col, canonical)| format!("\"{}\" {}", col, ddl_type(canonical)))
            .collect();

        let sql = format!(
            "CREATE OR REPLACE TABLE \"{}\" ({})",
            name,
            col_defs.join(", ")
        );

        let conn = self.lock()?;
        conn.execute_batch(&sql)
            .map_err(|e| AppError::Storage(format!("Failed to create table '{}': {}", name, e)))?;

        Ok(())
    }

    /// Streams rows from the channel into the table through DuckDB's bulk
    /// appender, flushing every APPEND_FLUSH_INTERVAL rows. Returns the
    /// total row count once the Done sentinel arrives.
    ///
    /// Blocking: run it on a blocking-capable thread.
    pub fn bulk_append(
        &self,
        table: &str,
        columns: &[String],
        receiver: Receiver<RowMessage>,
    ) -> Result<u64, AppError> {
        let conn = self.lock()?;
        let mut appender = conn.appender(table).map_err(|e| {
            AppError::Storage(format!("Failed to open appender for '{}': {}", table, e))
        })?;

        let mut total = 0u64;
        let mut since_flush = 0usize;

        while let Ok(message) = receiver.recv() {
            match message {
                RowMessage::Row(row) => {
                    let values: Vec<DuckValue> = columns
                        .iter()
                        .map(|column| {
                            value_to_duckdb(row.get(column).unwrap_or(&Value::Null))
                        })
                        .collect();

                    appender
                        .append_row(params_from_iter(values.iter()))
                        .map_err(|e| {
                            AppError::Storage(format!("Append into '{}' failed: {}", table, e))
                        })?;

                    total += 1;
                    since_flush += 1;
                    if since_flush >= APPEND_FLUSH_INTERVAL {
                        appender.flush().map_err(|e| {
                            AppError::Storage(format!("Flush of '{}' failed: {}", table, e))
                        })?;
                        since_flush = 0;
                    }
                }
                RowMessage::Done => break,
            }
        }

        appender
            .flush()
            .map_err(|e| AppError::Storage(format!("Flush of '{}' failed: {}", table, e)))?;

        tracing::info!("Appended {} rows into {}", total, table);
        Ok(total)
    }

    /// Ad-hoc SQL against the store.
    pub fn query(&self, sql: &str) -> Result<FinalResult, AppError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| AppError::Storage(format!("Local query failed: {}", e)))?;

        let column_count = stmt.column_count();
        let names: Vec<String> = (0..column_count)
            .map(|i| {
                stmt.column_name(i)
                    .map(|s| s.to_string())
                    .unwrap_or_else(|_| format!("col_{}", i))
            })
            .collect();

        let rows_iter = stmt
            .query_map([], |row| {
                let mut out = Row::with_capacity(column_count);
                for (idx, name) in names.iter().enumerate() {
                    out.push(name.clone(), duckdb_to_value(row, idx));
                }
                Ok(out)
            })
            .map_err(|e| AppError::Storage(format!("Local query failed: {}", e)))?;

        let mut rows = Vec::new();
        for row_result in rows_iter {
            rows.push(
                row_result
                    .map_err(|e| AppError::Storage(format!("Row fetch failed: {}", e)))?,
            );
        }

        Ok(FinalResult {
            columns: names,
            rows,
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, AppError> {
        self.conn
            .lock()
            .map_err(|_| AppError::Storage("Local store lock poisoned".to_string()))
    }
}

/// Maps a canonical column type onto the store's DDL vocabulary.
fn ddl_type(canonical: &str) -> &'static str {
    match canonical {
        "bigint" => "BIGINT",
        "double" => "DOUBLE",
        "boolean" => "BOOLEAN",
        "date" => "DATE",
        "timestamp" => "TIMESTAMP",
        _ => "VARCHAR",
    }
}

fn value_to_duckdb(value: &Value) -> DuckValue {
    match value {
        Value::Null => DuckValue::Null,
        Value::Bool(b) => DuckValue::Boolean(*b),
        Value::Int(i) => DuckValue::BigInt(*i),
        Value::Float(f) => DuckValue::Double(*f),
        Value::Text(s) => DuckValue::Text(s.clone()),
        Value::Timestamp(ts) => {
            DuckValue::Timestamp(TimeUnit::Microsecond, ts.and_utc().timestamp_micros())
        }
    }
}

/// Extracts a column from a DuckDB result row, trying types in order of
/// likelihood.
fn duckdb_to_value(row: &duckdb::Row<'_>, idx: usize) -> Value {
    if let Ok(v) = row.get::<_, Option<i64>>(idx) {
        return match v {
            Some(i) => Value::Int(i),
            None => Value::Null,
        };
    }
    if let Ok(v) = row.get::<_, Option<f64>>(idx) {
        return match v {
            Some(f) => Value::Float(f),
            None => Value::Null,
        };
    }
    if let Ok(v) = row.get::<_, Option<bool>>(idx) {
        return match v {
            Some(b) => Value::Bool(b),
            None => Value::Null,
        };
    }
    if let Ok(v) = row.get::<_, Option<String>>(idx) {
        return match v {
            Some(s) => Value::Text(s),
            None => Value::Null,
        };
    }
    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    fn store() -> LocalStore {
        LocalStore::open(":memory:").unwrap()
    }

    fn columns() -> Vec<(String, String)> {
        vec![
            ("_source".to_string(), "varchar".to_string()),
            ("id".to_string(), "bigint".to_string()),
            ("name".to_string(), "varchar".to_string()),
        ]
    }

    #[test]
    fn test_ddl_type_covers_canonical_vocabulary() {
        assert_eq!(ddl_type("varchar"), "VARCHAR");
        assert_eq!(ddl_type("bigint"), "BIGINT");
        assert_eq!(ddl_type("double"), "DOUBLE");
        assert_eq!(ddl_type("boolean"), "BOOLEAN");
        assert_eq!(ddl_type("date"), "DATE");
        assert_eq!(ddl_type("timestamp"), "TIMESTAMP");
    }

    #[test]
    fn test_create_or_replace_is_idempotent() {
        let store = store();
        store.create_or_replace_table("users", &columns()).unwrap();
        store.create_or_replace_table("users", &columns()).unwrap();
    }

    #[test]
    fn test_bulk_append_counts_rows_until_sentinel() {
        let store = store();
        store.create_or_replace_table("users", &columns()).unwrap();

        let (tx, rx) = channel();
        for i in 0..3i64 {
            let mut row = Row::new();
            row.push("_source", Value::Text("pg_main".to_string()));
            row.push("id", Value::Int(i));
            row.push("name", Value::Text(format!("user-{}", i)));
            tx.send(RowMessage::Row(row)).unwrap();
        }
        tx.send(RowMessage::Done).unwrap();

        let column_names: Vec<String> = columns().iter().map(|(n, _)| n.clone()).collect();
        let count = store.bulk_append("users", &column_names, rx).unwrap();
        assert_eq!(count, 3);

        let result = store.query("SELECT id, name FROM users ORDER BY id").unwrap();
        assert_eq!(result.rows.len(), 3);
        assert_eq!(result.columns, vec!["id", "name"]);
        assert_eq!(result.rows[0].get("id"), Some(&Value::Int(0)));
        assert_eq!(
            result.rows[2].get("name"),
            Some(&Value::Text("user-2".to_string()))
        );
    }

    #[test]
    fn test_append_fills_missing_fields_with_null() {
        let store = store();
        store.create_or_replace_table("users", &columns()).unwrap();

        let (tx, rx) = channel();
        let mut row = Row::new();
        row.push("_source", Value::Text("mongo_events".to_string()));
        row.push("id", Value::Int(7));
        tx.send(RowMessage::Row(row)).unwrap();
        tx.send(RowMessage::Done).unwrap();

        let column_names: Vec<String> = columns().iter().map(|(n, _)| n.clone()).collect();
        store.bulk_append("users", &column_names, rx).unwrap();

        let result = store.query("SELECT name FROM users").unwrap();
        assert_eq!(result.rows[0].get("name"), Some(&Value::Null));
    }

    #[test]
    fn test_query_rejects_unknown_table() {
        let store = store();
        assert!(store.query("SELECT * FROM missing").is_err());
    }

    #[test]
    fn test_file_backed_store_persists_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.duckdb");
        let path = path.to_str().unwrap();

        {
            let store = LocalStore::open(path).unwrap();
            store
                .create_or_replace_table("t", &[("id".to_string(), "bigint".to_string())])
                .unwrap();

            let (tx, rx) = channel();
            let mut row = Row::new();
            row.push("id", Value::Int(42));
            tx.send(RowMessage::Row(row)).unwrap();
            tx.send(RowMessage::Done).unwrap();
            store.bulk_append("t", &["id".to_string()], rx).unwrap();
        }

        let reopened = LocalStore::open(path).unwrap();
        let result = reopened.query("SELECT id FROM t").unwrap();
        assert_eq!(result.rows[0].get("id"), Some(&Value::Int(42)));
    }
}
