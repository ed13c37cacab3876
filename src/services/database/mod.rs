// Database abstraction layer for the supported source engines
pub mod mongodb;
pub mod mysql;
pub mod postgres;
pub mod s3;

pub use mongodb::MongoDriver;
pub use mysql::MySqlDriver;
pub use postgres::PostgresDriver;
pub use s3::S3Driver;

use std::sync::Arc;
use std::time::Duration;

use crate::api::middleware::AppError;
use crate::config::FederationConfig;
use crate::models::{
    AggregateFn, DecomposedQuery, EngineKind, QueryShape, Row, Source, Value,
};
use crate::services::connection_pool::ConnectionPoolManager;

/// Per-operation timeouts handed to every driver. Catalog scans are cheap
/// and bounded tightly; data queries get the longer timeout.
#[derive(Debug, Clone, Copy)]
pub struct DriverOptions {
    pub catalog_timeout: Duration,
    pub query_timeout: Duration,
}

impl DriverOptions {
    pub fn from_config(config: &FederationConfig) -> Self {
        Self {
            catalog_timeout: Duration::from_secs(config.catalog_timeout_secs),
            query_timeout: Duration::from_secs(config.query_timeout_secs),
        }
    }
}

/// Minimal capability surface every source engine implements.
#[async_trait::async_trait]
pub trait SourceDriver: Send + Sync {
    /// Column names and native types for one served table, in the source's
    /// declared column order.
    async fn catalog(&self, table: &str) -> Result<Vec<(String, String)>, AppError>;

    /// Execute one decomposed fragment, returning rows normalized to the
    /// common value set.
    async fn query(&self, fragment: &DecomposedQuery) -> Result<Vec<Row>, AppError>;

    fn kind(&self) -> EngineKind;
}

/// Factory: build the driver for one registered source.
pub async fn create_driver(
    source: &Source,
    pools: &Arc<ConnectionPoolManager>,
    options: DriverOptions,
) -> Result<Arc<dyn SourceDriver>, AppError> {
    match source.kind {
        EngineKind::Postgres => {
            let pool = pools.get_or_create_pool(&source.url).await?;
            Ok(Arc::new(PostgresDriver::new(pool, &source.url, options)?))
        }
        EngineKind::MySql => Ok(Arc::new(MySqlDriver::new(&source.url, options)?)),
        EngineKind::MongoDb => Ok(Arc::new(MongoDriver::connect(&source.url, options).await?)),
        EngineKind::S3 => Ok(Arc::new(S3Driver::connect(&source.url, options).await?)),
    }
}

/// Renames plain projected columns to their output aliases. Engines without
/// a SQL surface fetch by native name; relational fragments alias in SQL.
pub(crate) fn apply_aliases(fragment: &DecomposedQuery, mut rows: Vec<Row>) -> Vec<Row> {
    if !matches!(fragment.shape, QueryShape::Plain) {
        return rows;
    }

    let renames: Vec<(&str, &str)> = fragment
        .columns
        .iter()
        .filter(|c| c.aggregate.is_none() && c.expr.is_none() && c.alias != c.name)
        .map(|c| (c.name.as_str(), c.alias.as_str()))
        .collect();
    if renames.is_empty() {
        return rows;
    }

    for row in &mut rows {
        for (from, to) in &renames {
            row.rename(from, to);
        }
    }
    rows
}

/// Folds fetched rows into the single partial-aggregate row a relational
/// source would have produced. Used by engines with no SQL surface of their
/// own (document store, object store).
pub(crate) fn fold_local_aggregate(
    fragment: &DecomposedQuery,
    rows: Vec<Row>,
) -> Result<Vec<Row>, AppError> {
    if !matches!(fragment.shape, QueryShape::Aggregate) {
        return Ok(rows);
    }
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let mut out = Row::with_capacity(fragment.columns.len());
    for column in &fragment.columns {
        let value = match column.aggregate {
            Some(AggregateFn::Count) => {
                let count = rows
                    .iter()
                    .filter(|r| r.get(&column.name).map(|v| !v.is_null()).unwrap_or(false))
                    .count();
                Value::Int(count as i64)
            }
            Some(AggregateFn::Sum) => {
                let mut total = 0i64;
                for row in &rows {
                    match row.get(&column.name) {
                        None | Some(Value::Null) => {}
                        Some(value) => {
                            total += value.as_int().ok_or_else(|| {
                                AppError::Data(format!(
                                    "Non-integer value under sum({}.{})",
                                    column.table, column.name
                                ))
                            })?;
                        }
                    }
                }
                Value::Int(total)
            }
            Some(func @ (AggregateFn::Min | AggregateFn::Max)) => {
                let mut best: Option<Value> = None;
                for row in &rows {
                    let Some(value) = row.get(&column.name) else {
                        continue;
                    };
                    if value.is_null() {
                        continue;
                    }
                    best = match best {
                        None => Some(value.clone()),
                        Some(current) => {
                            let ordering = current.compare(value).ok_or_else(|| {
                                AppError::Data(format!(
                                    "Incomparable values under {}({}.{})",
                                    func.as_str(),
                                    column.table,
                                    column.name
                                ))
                            })?;
                            let keep_incoming = match func {
                                AggregateFn::Min => ordering == std::cmp::Ordering::Greater,
                                AggregateFn::Max => ordering == std::cmp::Ordering::Less,
                                _ => unreachable!(),
                            };
                            Some(if keep_incoming {
                                value.clone()
                            } else {
                                current
                            })
                        }
                    };
                }
                best.unwrap_or(Value::Null)
            }
            None => rows[0].get(&column.name).cloned().unwrap_or(Value::Null),
        };
        out.push(column.alias.clone(), value);
    }

    Ok(vec![out])
}
