// MongoDB driver. Collections stand in for logical tables; the schema is
// inferred by sampling one document per collection.
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, Bson, Document},
    options::ClientOptions,
    Client, Database,
};

use crate::api::middleware::AppError;
use crate::models::{DecomposedQuery, EngineKind, Row, Value};
use crate::services::database::{apply_aliases, fold_local_aggregate, DriverOptions, SourceDriver};

pub struct MongoDriver {
    database: Database,
    options: DriverOptions,
}

impl MongoDriver {
    pub async fn connect(url: &str, options: DriverOptions) -> Result<Self, AppError> {
        let client_options = ClientOptions::parse(url).await.map_err(|e| {
            AppError::Connection(format!("Failed to parse MongoDB URL: {}", e))
        })?;

        let db_name = client_options
            .default_database
            .clone()
            .ok_or_else(|| {
                AppError::Validation(
                    "MongoDB URL must name a database (mongodb://host/db)".to_string(),
                )
            })?;

        let client = Client::with_options(client_options).map_err(|e| {
            AppError::Connection(format!("Failed to create MongoDB client: {}", e))
        })?;

        Ok(Self {
            database: client.database(&db_name),
            options,
        })
    }

    fn bson_type_name(value: &Bson) -> &'static str {
        match value {
            Bson::Double(_) | Bson::Decimal128(_) => "double",
            Bson::String(_) => "string",
            Bson::Boolean(_) => "bool",
            Bson::Int32(_) => "int",
            Bson::Int64(_) => "long",
            Bson::DateTime(_) => "date",
            Bson::ObjectId(_) => "objectId",
            Bson::Null => "null",
            _ => "string",
        }
    }

    fn convert_value(value: Bson) -> Value {
        match value {
            Bson::Null => Value::Null,
            Bson::Double(d) => Value::Float(d),
            Bson::String(s) => Value::Text(s),
            Bson::Boolean(b) => Value::Bool(b),
            Bson::Int32(i) => Value::Int(i as i64),
            Bson::Int64(i) => Value::Int(i),
            Bson::DateTime(dt) => Value::Timestamp(dt.to_chrono().naive_utc()),
            Bson::ObjectId(oid) => Value::Text(oid.to_hex()),
            Bson::Decimal128(d) => match d.to_string().parse::<f64>() {
                Ok(f) => Value::Float(f),
                Err(_) => Value::Text(d.to_string()),
            },
            other => Value::Text(other.to_string()),
        }
    }

    fn convert_document(document: Document) -> Row {
        let mut row = Row::with_capacity(document.len());
        for (key, value) in document {
            row.push(key, Self::convert_value(value));
        }
        row
    }
}

#[async_trait::async_trait]
impl SourceDriver for MongoDriver {
    async fn catalog(&self, table: &str) -> Result<Vec<(String, String)>, AppError> {
        let collection = self.database.collection::<Document>(table);

        let sample = tokio::time::timeout(self.options.catalog_timeout, collection.find_one(doc! {}))
            .await
            .map_err(|_| {
                AppError::Database(format!(
                    "Catalog sampling for collection {} timed out after {:?}",
                    table, self.options.catalog_timeout
                ))
            })?
            .map_err(|e| AppError::Database(format!("Catalog sampling failed: {}", e)))?;

        let sample = sample.ok_or_else(|| {
            AppError::Schema(format!(
                "Cannot infer schema: collection {} is empty or missing",
                table
            ))
        })?;

        Ok(sample
            .iter()
            .map(|(key, value)| (key.clone(), Self::bson_type_name(value).to_string()))
            .collect())
    }

    async fn query(&self, fragment: &DecomposedQuery) -> Result<Vec<Row>, AppError> {
        if fragment.columns.iter().any(|c| c.expr.is_some()) {
            return Err(AppError::Database(
                "CASE expressions cannot be executed by mongodb sources".to_string(),
            ));
        }

        let collection = self.database.collection::<Document>(&fragment.table);

        let mut find = collection.find(doc! {});
        if !fragment.projection.is_empty() {
            let mut projection = Document::new();
            for column in &fragment.projection {
                projection.insert(column.clone(), 1);
            }
            if !fragment.projection.iter().any(|c| c == "_id") {
                projection.insert("_id", 0);
            }
            find = find.projection(projection);
        }
        if let Some(limit) = fragment.limit {
            find = find.limit(limit as i64);
        }

        let mut cursor = tokio::time::timeout(self.options.query_timeout, find)
            .await
            .map_err(|_| {
                AppError::Database(format!(
                    "Query timed out after {:?}",
                    self.options.query_timeout
                ))
            })?
            .map_err(|e| AppError::Database(format!("Query execution failed: {}", e)))?;

        let mut rows = Vec::new();
        loop {
            let next = tokio::time::timeout(self.options.query_timeout, cursor.try_next())
                .await
                .map_err(|_| {
                    AppError::Database(format!(
                        "Cursor fetch timed out after {:?}",
                        self.options.query_timeout
                    ))
                })?
                .map_err(|e| AppError::Database(format!("Cursor fetch failed: {}", e)))?;

            match next {
                Some(document) => rows.push(Self::convert_document(document)),
                None => break,
            }
        }

        let rows = fold_local_aggregate(fragment, rows)?;
        Ok(apply_aliases(fragment, rows))
    }

    fn kind(&self) -> EngineKind {
        EngineKind::MongoDb
    }
}
