// Schema reconciler: queries every source's catalog for the tables it
// serves and settles one canonical type per (table, column) by majority
// vote across sources.
use futures::future::join_all;
use std::sync::Arc;

use crate::api::middleware::AppError;
use crate::models::{ColumnMetadata, ColumnType, SourceRegistry};
use crate::services::database::SourceDriver;

/// One catalog observation: a column of a table as reported by one source.
#[derive(Debug, Clone)]
struct Observation {
    table: String,
    column: String,
    canonical_type: String,
    source_index: usize,
}

/// Runs the full reconciliation pass.
///
/// Fans out one task per source, waits for every task to finish, and only
/// then inspects results: the first error aborts the pass and no partial
/// metadata is ever published.
pub async fn reconcile(
    registry: &SourceRegistry,
    drivers: &[Arc<dyn SourceDriver>],
) -> Result<ColumnMetadata, AppError> {
    let mut tasks = Vec::with_capacity(registry.len());

    for (index, source) in registry.iter() {
        let driver = drivers[index].clone();
        let source_name = source.name.clone();
        let tables = source.tables.clone();

        tasks.push(tokio::spawn(async move {
            let mut observations = Vec::new();
            for table in tables {
                let columns = driver.catalog(&table).await.map_err(|e| {
                    AppError::Connection(format!("Source {}: {}", source_name, e))
                })?;

                for (column, native) in columns {
                    let canonical = canonical_observation(&native).ok_or_else(|| {
                        AppError::Schema(format!(
                            "Source {}: unmapped native type '{}' for {}.{}",
                            source_name, native, table, column
                        ))
                    })?;
                    observations.push(Observation {
                        table: table.clone(),
                        column,
                        canonical_type: canonical.to_string(),
                        source_index: index,
                    });
                }
            }
            Ok::<_, AppError>(observations)
        }));
    }

    let joined = join_all(tasks).await;

    let mut observations = Vec::new();
    for result in joined {
        let task_observations =
            result.map_err(|e| AppError::Internal(format!("Catalog task failed: {}", e)))??;
        observations.extend(task_observations);
    }

    Ok(build_metadata(registry, &observations))
}

fn build_metadata(registry: &SourceRegistry, observations: &[Observation]) -> ColumnMetadata {
    let mut metadata = ColumnMetadata::new();

    for table in registry.tables() {
        let participants = registry.sources_for_table(&table);

        let mut columns: Vec<&str> = Vec::new();
        for obs in observations.iter().filter(|o| o.table == table) {
            if !columns.contains(&obs.column.as_str()) {
                columns.push(&obs.column);
            }
        }

        for column in columns {
            let observed: Vec<String> = participants
                .iter()
                .map(|&source_index| {
                    observations
                        .iter()
                        .find(|o| {
                            o.table == table
                                && o.column == column
                                && o.source_index == source_index
                        })
                        .map(|o| o.canonical_type.clone())
                        .unwrap_or_default()
                })
                .collect();

            let majority = resolve_majority(&table, column, &observed);
            metadata.insert(&table, column, ColumnType { observed, majority });
        }
    }

    metadata
}

/// Majority decision for one column given the ordered per-source type list
/// (empty slots where a source lacks the column).
fn resolve_majority(table: &str, column: &str, observed: &[String]) -> String {
    let candidate = majority_candidate(observed);

    let Some(candidate) = candidate.filter(|c| !c.is_empty()) else {
        tracing::warn!(
            "Column {}.{} is missing from the majority of sources, leaving type unresolved",
            table,
            column
        );
        return String::new();
    };

    let occurrences = observed.iter().filter(|t| t.as_str() == candidate).count();
    let total = observed.len();

    if occurrences * 2 <= total {
        tracing::warn!(
            "No majority type for {}.{} (observed: {:?}), leaving type unresolved",
            table,
            column,
            observed
        );
        return String::new();
    }

    if occurrences == total {
        tracing::debug!("Column {}.{} agreed on type {} unanimously", table, column, candidate);
    } else {
        tracing::warn!(
            "Column {}.{} resolved to {} by majority ({}/{}), observed: {:?}",
            table,
            column,
            candidate,
            occurrences,
            total,
            observed
        );
    }

    candidate.to_string()
}

/// Boyer-Moore streaming majority candidate. The caller still has to count
/// occurrences: the candidate is only a majority if it wins a recount.
fn majority_candidate(values: &[String]) -> Option<&str> {
    let mut candidate: Option<&str> = None;
    let mut count = 0usize;

    for value in values {
        if count == 0 {
            candidate = Some(value.as_str());
            count = 1;
        } else if candidate == Some(value.as_str()) {
            count += 1;
        } else {
            count -= 1;
        }
    }

    candidate
}

/// Maps one engine-native type name onto the canonical local-store
/// vocabulary. Returns None for types the federation layer cannot carry.
/// A sampled null (document/object sources) counts as a missing slot.
fn canonical_observation(native: &str) -> Option<&'static str> {
    let lower = native.to_lowercase();
    let normalized = lower.trim();
    if normalized == "null" {
        return Some("");
    }

    // Parameterized types like varchar(255) or numeric(10,2)
    let base = normalized.split('(').next().unwrap_or(normalized).trim();

    match base {
        "character varying" | "varchar" | "char" | "character" | "bpchar" | "text" | "citext"
        | "name" | "tinytext" | "mediumtext" | "longtext" | "enum" | "set" | "string"
        | "objectid" | "uuid" | "json" | "jsonb" => Some("varchar"),

        "smallint" | "int2" | "integer" | "int" | "int4" | "bigint" | "int8" | "serial"
        | "smallserial" | "bigserial" | "tinyint" | "mediumint" | "long" | "int32" | "int64" => {
            Some("bigint")
        }

        "real" | "float4" | "float" | "double precision" | "double" | "float8" | "numeric"
        | "decimal" | "money" => Some("double"),

        "boolean" | "bool" => Some("boolean"),

        "date" => Some("date"),

        "timestamp" | "timestamp without time zone" | "timestamp with time zone"
        | "timestamptz" | "datetime" => Some("timestamp"),

        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DecomposedQuery, EngineKind, Row, Source};

    fn observed(types: &[&str]) -> Vec<String> {
        types.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_majority_with_discrepancy() {
        assert_eq!(
            resolve_majority("users", "id", &observed(&["bigint", "bigint", "varchar"])),
            "bigint"
        );
    }

    #[test]
    fn test_no_majority_left_unresolved() {
        assert_eq!(
            resolve_majority("users", "id", &observed(&["bigint", "varchar"])),
            ""
        );
    }

    #[test]
    fn test_unanimous_majority() {
        assert_eq!(
            resolve_majority("users", "id", &observed(&["bigint", "bigint"])),
            "bigint"
        );
    }

    #[test]
    fn test_missing_column_dominates() {
        assert_eq!(resolve_majority("users", "spare", &observed(&["", "", "bigint"])), "");
    }

    #[test]
    fn test_canonical_observation() {
        assert_eq!(canonical_observation("character varying"), Some("varchar"));
        assert_eq!(canonical_observation("varchar(255)"), Some("varchar"));
        assert_eq!(canonical_observation("INT"), Some("bigint"));
        assert_eq!(canonical_observation("numeric(10,2)"), Some("double"));
        assert_eq!(canonical_observation("datetime"), Some("timestamp"));
        assert_eq!(canonical_observation("geometry"), None);
    }

    struct StubDriver {
        catalog: Vec<(String, String)>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl SourceDriver for StubDriver {
        async fn catalog(&self, table: &str) -> Result<Vec<(String, String)>, AppError> {
            if self.fail {
                return Err(AppError::Database(format!("catalog refused for {}", table)));
            }
            Ok(self.catalog.clone())
        }

        async fn query(&self, _fragment: &DecomposedQuery) -> Result<Vec<Row>, AppError> {
            Ok(Vec::new())
        }

        fn kind(&self) -> EngineKind {
            EngineKind::Postgres
        }
    }

    fn stub_registry() -> SourceRegistry {
        SourceRegistry::new(vec![
            Source {
                name: "pg_main".to_string(),
                kind: EngineKind::Postgres,
                url: "postgres://localhost/app".to_string(),
                tables: vec!["users".to_string()],
            },
            Source {
                name: "mysql_replica".to_string(),
                kind: EngineKind::MySql,
                url: "mysql://localhost/app".to_string(),
                tables: vec!["users".to_string()],
            },
        ])
    }

    fn stub(catalog: &[(&str, &str)], fail: bool) -> Arc<dyn SourceDriver> {
        Arc::new(StubDriver {
            catalog: catalog
                .iter()
                .map(|(c, t)| (c.to_string(), t.to_string()))
                .collect(),
            fail,
        })
    }

    #[tokio::test]
    async fn test_reconcile_agreeing_sources() {
        let registry = stub_registry();
        let drivers = vec![
            stub(&[("id", "bigint"), ("name", "text")], false),
            stub(&[("id", "int"), ("name", "varchar")], false),
        ];

        let metadata = reconcile(&registry, &drivers).await.unwrap();
        assert_eq!(metadata.majority_type("users", "id"), Some("bigint"));
        assert_eq!(metadata.majority_type("users", "name"), Some("varchar"));
    }

    #[tokio::test]
    async fn test_reconcile_fails_fast_on_catalog_error() {
        let registry = stub_registry();
        let drivers = vec![
            stub(&[("id", "bigint")], false),
            stub(&[("id", "int")], true),
        ];

        let result = reconcile(&registry, &drivers).await;
        assert!(matches!(result, Err(AppError::Connection(_))));
    }

    #[tokio::test]
    async fn test_reconcile_errors_on_unmapped_type() {
        let registry = stub_registry();
        let drivers = vec![
            stub(&[("shape", "geometry")], false),
            stub(&[("shape", "geometry")], false),
        ];

        let result = reconcile(&registry, &drivers).await;
        assert!(matches!(result, Err(AppError::Schema(_))));
    }

    #[tokio::test]
    async fn test_reconcile_disagreeing_sources_left_unresolved() {
        let registry = stub_registry();
        let drivers = vec![
            stub(&[("flags", "int")], false),
            stub(&[("flags", "text")], false),
        ];

        let metadata = reconcile(&registry, &drivers).await.unwrap();
        assert_eq!(metadata.majority_type("users", "flags"), None);
        let column_type = metadata.column_type("users", "flags").unwrap();
        assert_eq!(column_type.observed, vec!["bigint", "varchar"]);
    }
}
