// Federation pipeline facade: wires registry, drivers, reconciler,
// decomposer, executor, reducer and the local store into the three
// operations exposed to callers. One instance per process; every operation
// builds its own per-invocation state and shares nothing mutable.
use std::sync::mpsc::channel;
use std::sync::Arc;

use crate::api::middleware::AppError;
use crate::config::{Config, FederationConfig};
use crate::models::{
    BuildReport, ColumnMetadata, DecomposedQuery, FinalResult, QueryShape, SourceRegistry,
    TableLoad, Value, SOURCE_COLUMN,
};
use crate::services::connection_pool::ConnectionPoolManager;
use crate::services::database::{create_driver, DriverOptions, SourceDriver};
use crate::services::decomposer::StatementDecomposer;
use crate::services::{executor, reconciler, reducer};
use crate::storage::{LocalStore, RowMessage};
use crate::validation::sql_validator::SqlValidator;

pub struct FederationService {
    registry: Arc<SourceRegistry>,
    pools: Arc<ConnectionPoolManager>,
    store: Arc<LocalStore>,
    options: FederationConfig,
    concurrency: usize,
}

impl FederationService {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        let store = LocalStore::open(&config.store.path)?;

        Ok(Self {
            registry: Arc::new(config.registry()),
            pools: Arc::new(ConnectionPoolManager::new()),
            store: Arc::new(store),
            options: config.federation.clone(),
            concurrency: config.concurrency(),
        })
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    async fn drivers(&self) -> Result<Vec<Arc<dyn SourceDriver>>, AppError> {
        let options = DriverOptions::from_config(&self.options);
        let mut drivers = Vec::with_capacity(self.registry.len());
        for (_, source) in self.registry.iter() {
            drivers.push(create_driver(source, &self.pools, options).await?);
        }
        Ok(drivers)
    }

    /// Runs the schema reconciliation pass and returns the metadata.
    pub async fn validate(&self) -> Result<ColumnMetadata, AppError> {
        if self.registry.is_empty() {
            return Err(AppError::Validation(
                "No sources configured; nothing to validate".to_string(),
            ));
        }

        let drivers = self.drivers().await?;
        reconciler::reconcile(&self.registry, &drivers).await
    }

    /// Ingests whole logical tables (all of them, or the named one) into
    /// the local store, one destination table per logical table, with the
    /// reserved source column prepended to every row.
    pub async fn build_model(&self, target: Option<&str>) -> Result<BuildReport, AppError> {
        if self.registry.is_empty() {
            return Err(AppError::Validation(
                "No sources configured; nothing to build".to_string(),
            ));
        }

        let drivers = self.drivers().await?;
        let metadata = reconciler::reconcile(&self.registry, &drivers).await?;

        let tables: Vec<String> = match target {
            Some(table) => {
                if !metadata.has_table(table) {
                    return Err(AppError::NotFound(format!(
                        "Model {} is not served by any registered source",
                        table
                    )));
                }
                vec![table.to_string()]
            }
            None => self.registry.tables(),
        };

        let mut report = BuildReport { tables: Vec::new() };
        for table in tables {
            let load = self.build_table(&table, &metadata, &drivers).await?;
            report.tables.push(load);
        }

        Ok(report)
    }

    async fn build_table(
        &self,
        table: &str,
        metadata: &ColumnMetadata,
        drivers: &[Arc<dyn SourceDriver>],
    ) -> Result<TableLoad, AppError> {
        let reconciled = metadata.columns_of(table).ok_or_else(|| {
            AppError::NotFound(format!("No reconciled schema for table {}", table))
        })?;

        let mut ddl = vec![(SOURCE_COLUMN.to_string(), "varchar".to_string())];
        for (name, column_type) in reconciled {
            if !column_type.is_resolved() {
                return Err(AppError::Schema(format!(
                    "Column {}.{} has no majority type; cannot build model",
                    table, name
                )));
            }
            ddl.push((name.clone(), column_type.majority.clone()));
        }

        let participants = self.registry.sources_for_table(table);
        let fragments: Vec<DecomposedQuery> = participants
            .iter()
            .map(|&source_index| DecomposedQuery {
                source_index,
                table: table.to_string(),
                sql: format!("SELECT * FROM {}", table),
                projection: Vec::new(),
                columns: Vec::new(),
                limit: None,
                shape: QueryShape::Plain,
            })
            .collect();

        let node_results =
            executor::execute(fragments, drivers, &self.registry, self.concurrency).await?;

        let (tx, rx) = channel();
        for node in node_results {
            for row in node.rows {
                tx.send(RowMessage::Row(row))
                    .map_err(|_| AppError::Internal("Row channel closed".to_string()))?;
            }
        }
        tx.send(RowMessage::Done)
            .map_err(|_| AppError::Internal("Row channel closed".to_string()))?;

        let store = self.store.clone();
        let table_name = table.to_string();
        let column_names: Vec<String> = ddl.iter().map(|(name, _)| name.clone()).collect();

        let rows = tokio::task::spawn_blocking(move || -> Result<u64, AppError> {
            store.create_or_replace_table(&table_name, &ddl)?;
            store.bulk_append(&table_name, &column_names, rx)
        })
        .await
        .map_err(|e| AppError::Internal(format!("Load task failed: {}", e)))??;

        Ok(TableLoad {
            table: table.to_string(),
            rows,
            sources: participants.len(),
        })
    }

    /// The full federated query pipeline: reconcile, decompose, map, reduce.
    pub async fn execute(&self, sql: &str) -> Result<FinalResult, AppError> {
        let drivers = self.drivers().await?;
        let metadata = reconciler::reconcile(&self.registry, &drivers).await?;

        let decomposition = StatementDecomposer::new(&self.registry, &metadata).decompose(sql)?;
        let limit = decomposition.limit;
        let shape = decomposition.shape.clone();
        let columns = decomposition.columns.clone();

        tracing::info!(
            "Executing federated query across {} fragment(s)",
            decomposition.fragments.len()
        );

        let node_results = executor::execute(
            decomposition.fragments,
            &drivers,
            &self.registry,
            self.concurrency,
        )
        .await?;

        let mut result = reducer::reduce(&shape, &columns, node_results)?;

        // The statement LIMIT of a join query applies to the joined result,
        // not to the side fetches.
        if let (QueryShape::Join(_), Some(limit)) = (&shape, limit) {
            result.rows.truncate(limit as usize);
        }

        if self.options.store_results && !result.rows.is_empty() {
            self.store_result(&result).await?;
        }

        Ok(result)
    }

    /// Loads the reduced result into the configured destination table, with
    /// column types inferred from the first row.
    async fn store_result(&self, result: &FinalResult) -> Result<(), AppError> {
        let first = &result.rows[0];
        let ddl: Vec<(String, String)> = first
            .iter()
            .map(|(name, value)| (name.clone(), infer_canonical(value).to_string()))
            .collect();
        let column_names: Vec<String> = ddl.iter().map(|(name, _)| name.clone()).collect();

        let (tx, rx) = channel();
        for row in &result.rows {
            tx.send(RowMessage::Row(row.clone()))
                .map_err(|_| AppError::Internal("Row channel closed".to_string()))?;
        }
        tx.send(RowMessage::Done)
            .map_err(|_| AppError::Internal("Row channel closed".to_string()))?;

        let store = self.store.clone();
        let table = self.options.result_table.clone();

        let rows = tokio::task::spawn_blocking(move || -> Result<u64, AppError> {
            store.create_or_replace_table(&table, &ddl)?;
            store.bulk_append(&table, &column_names, rx)
        })
        .await
        .map_err(|e| AppError::Internal(format!("Load task failed: {}", e)))??;

        tracing::debug!(
            "Stored {} result rows into {}",
            rows,
            self.options.result_table
        );
        Ok(())
    }

    /// Ad-hoc SQL against the local store.
    pub async fn store_query(&self, sql: &str) -> Result<FinalResult, AppError> {
        SqlValidator::validate_select_only(sql)?;

        let store = self.store.clone();
        let sql = sql.to_string();
        tokio::task::spawn_blocking(move || store.query(&sql))
            .await
            .map_err(|e| AppError::Internal(format!("Store query task failed: {}", e)))?
    }
}

/// Canonical type of a destination column, from an example value.
fn infer_canonical(value: &Value) -> &'static str {
    match value {
        Value::Int(_) => "bigint",
        Value::Float(_) => "double",
        Value::Bool(_) => "boolean",
        Value::Timestamp(_) => "timestamp",
        Value::Null | Value::Text(_) => "varchar",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_canonical() {
        assert_eq!(infer_canonical(&Value::Int(1)), "bigint");
        assert_eq!(infer_canonical(&Value::Float(1.5)), "double");
        assert_eq!(infer_canonical(&Value::Bool(true)), "boolean");
        assert_eq!(infer_canonical(&Value::Null), "varchar");
    }
}
