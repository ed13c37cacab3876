// MySQL driver using mysql_async's built-in pool
use mysql_async::{prelude::*, Conn, Pool, Value as MySqlValue};
use url::Url;

use crate::api::middleware::AppError;
use crate::models::{DecomposedQuery, EngineKind, Row, Value};
use crate::services::database::{DriverOptions, SourceDriver};

const CATALOG_SQL: &str = r#"
    SELECT COLUMN_NAME, DATA_TYPE
    FROM information_schema.COLUMNS
    WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
    ORDER BY ORDINAL_POSITION
"#;

pub struct MySqlDriver {
    pool: Pool,
    options: DriverOptions,
}

impl MySqlDriver {
    pub fn new(connection_url: &str, options: DriverOptions) -> Result<Self, AppError> {
        let url = Url::parse(connection_url)
            .map_err(|e| AppError::Validation(format!("Invalid MySQL URL: {}", e)))?;

        if url.scheme() != "mysql" && url.scheme() != "mariadb" {
            return Err(AppError::Validation(
                "URL must use mysql:// or mariadb:// scheme".to_string(),
            ));
        }

        let pool = Pool::from_url(connection_url)
            .map_err(|e| AppError::Connection(format!("Failed to create MySQL pool: {}", e)))?;

        Ok(Self { pool, options })
    }

    async fn get_conn(&self) -> Result<Conn, AppError> {
        self.pool.get_conn().await.map_err(|e| {
            AppError::Connection(format!("Failed to get MySQL connection from pool: {}", e))
        })
    }

    fn convert_value(mysql_val: MySqlValue) -> Value {
        match mysql_val {
            MySqlValue::NULL => Value::Null,
            MySqlValue::Bytes(bytes) => match String::from_utf8(bytes) {
                Ok(s) => Value::Text(s),
                Err(_) => Value::Null,
            },
            MySqlValue::Int(i) => Value::Int(i),
            MySqlValue::UInt(u) => {
                if u <= i64::MAX as u64 {
                    Value::Int(u as i64)
                } else {
                    Value::Float(u as f64)
                }
            }
            MySqlValue::Float(f) => Value::Float(f as f64),
            MySqlValue::Double(d) => Value::Float(d),
            MySqlValue::Date(y, m, d, h, min, s, micros) => {
                let date = chrono::NaiveDate::from_ymd_opt(y as i32, m as u32, d as u32);
                let ts = date.and_then(|date| {
                    date.and_hms_micro_opt(h as u32, min as u32, s as u32, micros)
                });
                match ts {
                    Some(ts) => Value::Timestamp(ts),
                    None => Value::Null,
                }
            }
            MySqlValue::Time(is_neg, days, h, m, s, _) => {
                let sign = if is_neg { "-" } else { "" };
                let total_hours = days * 24 + h as u32;
                Value::Text(format!("{}{}:{:02}:{:02}", sign, total_hours, m, s))
            }
        }
    }

    fn convert_row(row: mysql_async::Row) -> Row {
        let mut out = Row::with_capacity(row.len());
        let columns = row.columns();
        for (idx, column) in columns.iter().enumerate() {
            let value = match row.get_opt::<MySqlValue, usize>(idx) {
                Some(Ok(mysql_val)) => Self::convert_value(mysql_val),
                _ => Value::Null,
            };
            out.push(column.name_str().to_string(), value);
        }
        out
    }
}

#[async_trait::async_trait]
impl SourceDriver for MySqlDriver {
    async fn catalog(&self, table: &str) -> Result<Vec<(String, String)>, AppError> {
        let mut conn = self.get_conn().await?;

        let rows: Vec<(String, String)> =
            tokio::time::timeout(self.options.catalog_timeout, conn.exec(CATALOG_SQL, (table,)))
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

        Ok(rows)
    }

    async fn query(&self, fragment: &DecomposedQuery) -> Result<Vec<Row>, AppError> {
        let mut conn = self.get_conn().await?;

        let rows: Vec<mysql_async::Row> =
            tokio::time::timeout(self.options.query_timeout, conn.query(&fragment.sql))
                .await
                .map_err(|_| {
                    AppError::Database(format!(
                        "Query timed out after {:?}",
                        self.options.query_timeout
                    ))
                })?
                .map_err(|e| AppError::Database(format!("Query execution failed: {}", e)))?;

        Ok(rows.into_iter().map(Self::convert_row).collect())
    }

    fn kind(&self) -> EngineKind {
        EngineKind::MySql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_value_normalizes_numerics() {
        assert_eq!(MySqlDriver::convert_value(MySqlValue::Int(7)), Value::Int(7));
        assert_eq!(
            MySqlDriver::convert_value(MySqlValue::UInt(7)),
            Value::Int(7)
        );
        assert_eq!(
            MySqlDriver::convert_value(MySqlValue::Double(2.5)),
            Value::Float(2.5)
        );
        assert_eq!(MySqlDriver::convert_value(MySqlValue::NULL), Value::Null);
    }

    #[test]
    fn test_convert_value_date() {
        let value = MySqlDriver::convert_value(MySqlValue::Date(2024, 3, 1, 12, 30, 0, 0));
        match value {
            Value::Timestamp(ts) => assert_eq!(ts.to_string(), "2024-03-01 12:30:00"),
            other => panic!("expected timestamp, got {:?}", other),
        }
    }
}
