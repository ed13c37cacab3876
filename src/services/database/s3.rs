// S3 object-store driver. A logical table maps to a JSON-lines object
// `<prefix>/<table>.jsonl`; the schema is inferred from the first record.
use aws_sdk_s3::Client;
use url::Url;

use crate::api::middleware::AppError;
use crate::models::{DecomposedQuery, EngineKind, Row, Value};
use crate::services::database::{apply_aliases, fold_local_aggregate, DriverOptions, SourceDriver};

pub struct S3Driver {
    client: Client,
    bucket: String,
    prefix: String,
    options: DriverOptions,
}

impl S3Driver {
    pub async fn connect(url: &str, options: DriverOptions) -> Result<Self, AppError> {
        let parsed = Url::parse(url)
            .map_err(|e| AppError::Validation(format!("Invalid S3 URL: {}", e)))?;

        if parsed.scheme() != "s3" {
            return Err(AppError::Validation(
                "URL must use s3://bucket/prefix scheme".to_string(),
            ));
        }

        let bucket = parsed
            .host_str()
            .ok_or_else(|| AppError::Validation("S3 URL must name a bucket".to_string()))?
            .to_string();
        let prefix = parsed.path().trim_matches('/').to_string();

        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;

        Ok(Self {
            client: Client::new(&config),
            bucket,
            prefix,
            options,
        })
    }

    fn object_key(&self, table: &str) -> String {
        if self.prefix.is_empty() {
            format!("{}.jsonl", table)
        } else {
            format!("{}/{}.jsonl", self.prefix, table)
        }
    }

    async fn fetch_object(&self, table: &str) -> Result<String, AppError> {
        let key = self.object_key(table);

        let body = tokio::time::timeout(self.options.query_timeout, async {
            let output = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(&key)
                .send()
                .await
                .map_err(|e| {
                    AppError::Database(format!(
                        "Failed to fetch s3://{}/{}: {}",
                        self.bucket, key, e
                    ))
                })?;
            output.body.collect().await.map_err(|e| {
                AppError::Database(format!("Failed to read s3://{}/{}: {}", self.bucket, key, e))
            })
        })
        .await
        .map_err(|_| {
            AppError::Database(format!(
                "Object fetch timed out after {:?}",
                self.options.query_timeout
            ))
        })??;

        String::from_utf8(body.into_bytes().to_vec()).map_err(|e| {
            AppError::Data(format!("Object s3://{}/{} is not UTF-8: {}", self.bucket, key, e))
        })
    }

    fn json_type_name(value: &serde_json::Value) -> &'static str {
        match value {
            serde_json::Value::Bool(_) => "boolean",
            serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => "long",
            serde_json::Value::Number(_) => "double",
            serde_json::Value::String(_) => "string",
            serde_json::Value::Null => "null",
            _ => "string",
        }
    }

    fn convert_json(value: serde_json::Value) -> Value {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::Text(s),
            other => Value::Text(other.to_string()),
        }
    }

    fn parse_record(line: &str, table: &str) -> Result<serde_json::Map<String, serde_json::Value>, AppError> {
        let value: serde_json::Value = serde_json::from_str(line).map_err(|e| {
            AppError::Data(format!("Malformed record in object for table {}: {}", table, e))
        })?;
        match value {
            serde_json::Value::Object(map) => Ok(map),
            _ => Err(AppError::Data(format!(
                "Records for table {} must be JSON objects",
                table
            ))),
        }
    }
}

#[async_trait::async_trait]
impl SourceDriver for S3Driver {
    async fn catalog(&self, table: &str) -> Result<Vec<(String, String)>, AppError> {
        let body = self.fetch_object(table).await?;

        let first = body
            .lines()
            .find(|line| !line.trim().is_empty())
            .ok_or_else(|| {
                AppError::Schema(format!("Cannot infer schema: object for table {} is empty", table))
            })?;

        let record = Self::parse_record(first, table)?;
        Ok(record
            .iter()
            .map(|(key, value)| (key.clone(), Self::json_type_name(value).to_string()))
            .collect())
    }

    async fn query(&self, fragment: &DecomposedQuery) -> Result<Vec<Row>, AppError> {
        if fragment.columns.iter().any(|c| c.expr.is_some()) {
            return Err(AppError::Database(
                "CASE expressions cannot be executed by s3 sources".to_string(),
            ));
        }

        let body = self.fetch_object(&fragment.table).await?;

        let mut rows = Vec::new();
        for line in body.lines() {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(limit) = fragment.limit {
                if rows.len() as u64 >= limit {
                    break;
                }
            }

            let mut record = Self::parse_record(line, &fragment.table)?;
            let row = if fragment.projection.is_empty() {
                record
                    .into_iter()
                    .map(|(key, value)| (key, Self::convert_json(value)))
                    .collect()
            } else {
                let mut row = Row::with_capacity(fragment.projection.len());
                for column in &fragment.projection {
                    let value = record
                        .remove(column)
                        .map(Self::convert_json)
                        .unwrap_or(Value::Null);
                    row.push(column.clone(), value);
                }
                row
            };
            rows.push(row);
        }

        let rows = fold_local_aggregate(fragment, rows)?;
        Ok(apply_aliases(fragment, rows))
    }

    fn kind(&self) -> EngineKind {
        EngineKind::S3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_type_names() {
        assert_eq!(S3Driver::json_type_name(&serde_json::json!(1)), "long");
        assert_eq!(S3Driver::json_type_name(&serde_json::json!(1.5)), "double");
        assert_eq!(S3Driver::json_type_name(&serde_json::json!("x")), "string");
        assert_eq!(S3Driver::json_type_name(&serde_json::json!(true)), "boolean");
    }

    #[test]
    fn test_convert_json_values() {
        assert_eq!(S3Driver::convert_json(serde_json::json!(3)), Value::Int(3));
        assert_eq!(
            S3Driver::convert_json(serde_json::json!(2.5)),
            Value::Float(2.5)
        );
        assert_eq!(S3Driver::convert_json(serde_json::Value::Null), Value::Null);
        assert_eq!(
            S3Driver::convert_json(serde_json::json!({"a": 1})),
            Value::Text("{\"a\":1}".to_string())
        );
    }

    #[test]
    fn test_parse_record_rejects_non_objects() {
        assert!(S3Driver::parse_record("[1,2]", "events").is_err());
        assert!(S3Driver::parse_record("{\"a\": 1}", "events").is_ok());
    }
}
