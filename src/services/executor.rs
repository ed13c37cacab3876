// Source executor: runs decomposed fragments against their owning sources
// under a bounded fan-out, tagging every row with its origin.
use futures::stream::{self, StreamExt};
use std::sync::Arc;

use crate::api::middleware::AppError;
use crate::models::{DecomposedQuery, NodeResult, SourceRegistry, Value, SOURCE_COLUMN};
use crate::services::database::SourceDriver;

/// Executes every fragment concurrently (at most `concurrency` in flight).
///
/// This is a barrier: all fragments run to completion before any result is
/// inspected, and the first error wins — partial results are discarded,
/// never surfaced as a complete result set.
pub async fn execute(
    fragments: Vec<DecomposedQuery>,
    drivers: &[Arc<dyn SourceDriver>],
    registry: &SourceRegistry,
    concurrency: usize,
) -> Result<Vec<NodeResult>, AppError> {
    let concurrency = concurrency.max(1);

    let tasks = fragments.into_iter().enumerate().map(|(position, fragment)| {
        let driver = drivers.get(fragment.source_index).cloned();
        let source_name = registry
            .get(fragment.source_index)
            .map(|s| s.name.clone());

        async move {
            let driver = driver.ok_or_else(|| {
                AppError::Internal(format!(
                    "No driver for source index {}",
                    fragment.source_index
                ))
            })?;
            let source_name = source_name.ok_or_else(|| {
                AppError::Internal(format!(
                    "No registered source at index {}",
                    fragment.source_index
                ))
            })?;

            tracing::debug!("Executing fragment on {}: {}", source_name, fragment.sql);

            let mut rows = driver
                .query(&fragment)
                .await
                .map_err(|e| contextualize(&source_name, e))?;

            for row in &mut rows {
                row.prepend(SOURCE_COLUMN, Value::Text(source_name.clone()));
            }

            Ok::<_, AppError>((position, NodeResult { source_name, rows }))
        }
    });

    let results: Vec<Result<(usize, NodeResult), AppError>> = stream::iter(tasks)
        .buffer_unordered(concurrency)
        .collect()
        .await;

    let mut collected = Vec::with_capacity(results.len());
    for result in results {
        collected.push(result?);
    }

    // buffer_unordered yields by completion time; restore fragment order so
    // join sides stay left/right.
    collected.sort_by_key(|(position, _)| *position);
    Ok(collected.into_iter().map(|(_, node)| node).collect())
}

/// Prefixes the failing source's name while keeping the error class.
fn contextualize(source: &str, error: AppError) -> AppError {
    match error {
        AppError::Database(msg) => AppError::Database(format!("Source {}: {}", source, msg)),
        AppError::Connection(msg) => AppError::Connection(format!("Source {}: {}", source, msg)),
        AppError::Data(msg) => AppError::Data(format!("Source {}: {}", source, msg)),
        AppError::Schema(msg) => AppError::Schema(format!("Source {}: {}", source, msg)),
        other => other,
    }
}
