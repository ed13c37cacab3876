// PostgreSQL driver using connection pooling
use deadpool_postgres::Pool;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio_postgres::types::Type;
use url::Url;

use crate::api::middleware::AppError;
use crate::models::{DecomposedQuery, EngineKind, Row, Value};
use crate::services::database::{DriverOptions, SourceDriver};

const CATALOG_SQL: &str = r#"
    SELECT column_name, data_type
    FROM information_schema.columns
    WHERE table_schema = 'public' AND table_name = $1
    ORDER BY ordinal_position
"#;

pub struct PostgresDriver {
    pool: Pool,
    options: DriverOptions,
}

impl PostgresDriver {
    pub fn new(pool: Pool, connection_url: &str, options: DriverOptions) -> Result<Self, AppError> {
        let url = Url::parse(connection_url)
            .map_err(|e| AppError::Validation(format!("Invalid PostgreSQL URL: {}", e)))?;

        if url.scheme() != "postgresql" && url.scheme() != "postgres" {
            return Err(AppError::Validation(
                "URL must use postgresql:// or postgres:// scheme".to_string(),
            ));
        }

        Ok(Self { pool, options })
    }

    fn convert_row(row: &tokio_postgres::Row) -> Row {
        let mut out = Row::with_capacity(row.columns().len());
        for (idx, column) in row.columns().iter().enumerate() {
            let value = match *column.type_() {
                Type::INT2 => row
                    .try_get::<_, Option<i16>>(idx)
                    .ok()
                    .flatten()
                    .map(|v| Value::Int(v as i64)),
                Type::INT4 => row
                    .try_get::<_, Option<i32>>(idx)
                    .ok()
                    .flatten()
                    .map(|v| Value::Int(v as i64)),
                Type::INT8 => row
                    .try_get::<_, Option<i64>>(idx)
                    .ok()
                    .flatten()
                    .map(Value::Int),
                Type::FLOAT4 => row
                    .try_get::<_, Option<f32>>(idx)
                    .ok()
                    .flatten()
                    .map(|v| Value::Float(v as f64)),
                Type::FLOAT8 => row
                    .try_get::<_, Option<f64>>(idx)
                    .ok()
                    .flatten()
                    .map(Value::Float),
                Type::NUMERIC => row
                    .try_get::<_, Option<Decimal>>(idx)
                    .ok()
                    .flatten()
                    .and_then(|d| d.to_f64())
                    .map(Value::Float),
                Type::BOOL => row
                    .try_get::<_, Option<bool>>(idx)
                    .ok()
                    .flatten()
                    .map(Value::Bool),
                Type::DATE => row
                    .try_get::<_, Option<chrono::NaiveDate>>(idx)
                    .ok()
                    .flatten()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(Value::Timestamp),
                Type::TIMESTAMP => row
                    .try_get::<_, Option<chrono::NaiveDateTime>>(idx)
                    .ok()
                    .flatten()
                    .map(Value::Timestamp),
                Type::TIMESTAMPTZ => row
                    .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)
                    .ok()
                    .flatten()
                    .map(|ts| Value::Timestamp(ts.naive_utc())),
                _ => match row.try_get::<_, Option<String>>(idx) {
                    Ok(v) => v.map(Value::Text),
                    Err(_) => {
                        tracing::warn!(
                            "Unsupported PostgreSQL type {} for column {}, using NULL",
                            column.type_().name(),
                            column.name()
                        );
                        None
                    }
                },
            };
            out.push(column.name().to_string(), value.unwrap_or(Value::Null));
        }
        out
    }
}

#[async_trait::async_trait]
impl SourceDriver for PostgresDriver {
    async fn catalog(&self, table: &str) -> Result<Vec<(String, String)>, AppError> {
        let client = self.pool.get().await.map_err(|e| {
            AppError::Connection(format!("Failed to get connection from pool: {}", e))
        })?;

        let rows = tokio::time::timeout(self.options.catalog_timeout, client.query(CATALOG_SQL, &[&table]))
            .await
            .map_err(|_| {
                AppError::Database(format!(
                    "Catalog query for table {} timed out after {:?}",
                    table, self.options.catalog_timeout
                ))
            })?
            .map_err(|e| AppError::Database(format!("Catalog query failed: {}", e)))?;

        if rows.is_empty() {
            return Err(AppError::Schema(format!(
                "Table {} not found in source catalog",
                table
            )));
        }

        Ok(rows
            .iter()
            .map(|row| (row.get::<_, String>(0), row.get::<_, String>(1)))
            .collect())
    }

    async fn query(&self, fragment: &DecomposedQuery) -> Result<Vec<Row>, AppError> {
        let client = self.pool.get().await.map_err(|e| {
            AppError::Connection(format!("Failed to get connection from pool: {}", e))
        })?;

        let rows = tokio::time::timeout(self.options.query_timeout, client.query(&fragment.sql, &[]))
            .await
            .map_err(|_| {
                AppError::Database(format!(
                    "Query timed out after {:?}",
                    self.options.query_timeout
                ))
            })?
            .map_err(|e| {
                let error_details = if let Some(db_error) = e.as_db_error() {
                    format!(
                        "Code: {}, Message: {}",
                        db_error.code().code(),
                        db_error.message()
                    )
                } else {
                    format!("{}", e)
                };
                AppError::Database(format!("Query execution failed: {}", error_details))
            })?;

        Ok(rows.iter().map(Self::convert_row).collect())
    }

    fn kind(&self) -> EngineKind {
        EngineKind::Postgres
    }
}
