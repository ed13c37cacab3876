// Result reducer: combines per-source row streams into the final result,
// picking the strategy from the query shape.
use crate::api::middleware::AppError;
use crate::models::{
    AggregateFn, Column, FinalResult, JoinClause, NodeResult, QueryShape, Row, Value,
    SOURCE_COLUMN,
};

/// Reduces all node results of one logical query.
pub fn reduce(
    shape: &QueryShape,
    columns: &[Column],
    node_results: Vec<NodeResult>,
) -> Result<FinalResult, AppError> {
    match shape {
        QueryShape::Join(clause) => reduce_join(clause, node_results),
        QueryShape::Aggregate => reduce_aggregate(columns, node_results),
        QueryShape::Plain => Ok(concatenate(columns, node_results)),
    }
}

/// Nested-loop equality join over the two sides.
///
/// No index is built: every left row is compared against every right row,
/// an O(n*m) pass that is acceptable at the row counts this system targets.
/// Output order follows left-row arrival order, with right matches appended
/// in right-row arrival order.
fn reduce_join(clause: &JoinClause, node_results: Vec<NodeResult>) -> Result<FinalResult, AppError> {
    let mut iter = node_results.into_iter();
    let (Some(left), Some(right)) = (iter.next(), iter.next()) else {
        return Err(AppError::Internal(
            "Join reduction requires exactly two node results".to_string(),
        ));
    };

    let mut rows = Vec::new();
    for left_row in &left.rows {
        let Some(left_key) = left_row.get(&clause.left_column) else {
            continue;
        };
        for right_row in &right.rows {
            let Some(right_key) = right_row.get(&clause.right_column) else {
                continue;
            };
            if left_key.key_eq(right_key) {
                let mut merged = left_row.clone();
                merged.merge(right_row);
                rows.push(merged);
            }
        }
    }

    let columns = rows
        .first()
        .map(Row::column_names)
        .unwrap_or_default();

    Ok(FinalResult { columns, rows })
}

/// Folds every row from every source into a single accumulator row, column
/// by column, seeded from the first row seen.
fn reduce_aggregate(
    columns: &[Column],
    node_results: Vec<NodeResult>,
) -> Result<FinalResult, AppError> {
    let mut accumulator: Option<Row> = None;

    for node in node_results {
        for row in node.rows {
            match accumulator.as_mut() {
                None => {
                    let mut seed = Row::with_capacity(columns.len());
                    for column in columns {
                        let value = row.get(&column.alias).cloned().unwrap_or(Value::Null);
                        // The seed is subject to the same typing rules as
                        // folded values: a lone non-integer partial under
                        // sum/count is a data error, not a pass-through.
                        if let Some(func @ (AggregateFn::Sum | AggregateFn::Count)) =
                            column.aggregate
                        {
                            if !value.is_null() && value.as_int().is_none() {
                                return Err(data_error(func, column, &value));
                            }
                        }
                        seed.push(column.alias.clone(), value);
                    }
                    accumulator = Some(seed);
                }
                Some(acc) => {
                    for column in columns {
                        fold_column(acc, &row, column)?;
                    }
                }
            }
        }
    }

    let output_columns: Vec<String> = columns.iter().map(|c| c.alias.clone()).collect();
    Ok(FinalResult {
        columns: output_columns,
        rows: accumulator.into_iter().collect(),
    })
}

fn fold_column(accumulator: &mut Row, incoming: &Row, column: &Column) -> Result<(), AppError> {
    let Some(func) = column.aggregate else {
        // Non-aggregated columns keep the seeded value.
        return Ok(());
    };

    let incoming_value = match incoming.get(&column.alias) {
        Some(value) if !value.is_null() => value.clone(),
        _ => return Ok(()),
    };

    let current = accumulator.get(&column.alias).cloned().unwrap_or(Value::Null);

    let next = match func {
        AggregateFn::Sum | AggregateFn::Count => {
            let current = if current.is_null() {
                0
            } else {
                current.as_int().ok_or_else(|| data_error(func, column, &current))?
            };
            let incoming = incoming_value
                .as_int()
                .ok_or_else(|| data_error(func, column, &incoming_value))?;
            Value::Int(current + incoming)
        }
        AggregateFn::Min | AggregateFn::Max => {
            if current.is_null() {
                incoming_value
            } else {
                let ordering = current.compare(&incoming_value).ok_or_else(|| {
                    data_error(func, column, &incoming_value)
                })?;
                let keep_incoming = match func {
                    AggregateFn::Min => ordering == std::cmp::Ordering::Greater,
                    AggregateFn::Max => ordering == std::cmp::Ordering::Less,
                    _ => unreachable!(),
                };
                if keep_incoming {
                    incoming_value
                } else {
                    current
                }
            }
        }
    };

    accumulator.set(&column.alias, next);
    Ok(())
}

fn data_error(func: AggregateFn, column: &Column, value: &Value) -> AppError {
    AppError::Data(format!(
        "Cannot fold {:?} into {}({}.{})",
        value,
        func.as_str(),
        column.table,
        column.name
    ))
}

/// No join, no aggregates: the result is the node results concatenated in
/// arrival order. Cross-source ordering is not otherwise defined.
fn concatenate(columns: &[Column], node_results: Vec<NodeResult>) -> FinalResult {
    let mut output_columns = vec![SOURCE_COLUMN.to_string()];
    output_columns.extend(columns.iter().map(|c| c.alias.clone()));

    let mut rows = Vec::new();
    for node in node_results {
        rows.extend(node.rows);
    }

    FinalResult {
        columns: output_columns,
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(fields: &[(&str, Value)]) -> Row {
        let mut row = Row::new();
        for (name, value) in fields {
            row.push(*name, value.clone());
        }
        row
    }

    fn node(source: &str, rows: Vec<Row>) -> NodeResult {
        NodeResult {
            source_name: source.to_string(),
            rows,
        }
    }

    fn agg_column(func: AggregateFn, name: &str) -> Column {
        Column {
            table: "t".to_string(),
            name: name.to_string(),
            expr: None,
            aggregate: Some(func),
            position: 0,
            alias: name.to_string(),
            is_join_key: false,
        }
    }

    #[test]
    fn test_join_matches_and_merges_without_duplicate_keys() {
        let clause = JoinClause {
            left_table: "users".to_string(),
            left_column: "id".to_string(),
            right_table: "orders".to_string(),
            right_column: "id".to_string(),
        };

        let left = node(
            "pg",
            vec![row(&[
                ("id", Value::Int(1)),
                ("a", Value::Text("x".to_string())),
            ])],
        );
        let right = node(
            "mysql",
            vec![
                row(&[("id", Value::Int(1)), ("b", Value::Text("y".to_string()))]),
                row(&[("id", Value::Int(2)), ("b", Value::Text("z".to_string()))]),
            ],
        );

        let result = reduce_join(&clause, vec![left, right]).unwrap();
        assert_eq!(result.rows.len(), 1);

        let merged = &result.rows[0];
        assert_eq!(merged.column_names(), vec!["id", "a", "b"]);
        assert_eq!(merged.get("a"), Some(&Value::Text("x".to_string())));
        assert_eq!(merged.get("b"), Some(&Value::Text("y".to_string())));
    }

    #[test]
    fn test_aggregate_sum_over_sources() {
        let columns = vec![agg_column(AggregateFn::Sum, "count")];
        let results = vec![
            node("a", vec![row(&[("count", Value::Int(3))])]),
            node("b", vec![row(&[("count", Value::Int(5))])]),
            node("c", vec![row(&[("count", Value::Int(2))])]),
        ];

        let result = reduce_aggregate(&columns, results).unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].get("count"), Some(&Value::Int(10)));
    }

    #[test]
    fn test_aggregate_min_max() {
        let values = vec![
            node("a", vec![row(&[("v", Value::Int(5))])]),
            node("b", vec![row(&[("v", Value::Int(2))])]),
            node("c", vec![row(&[("v", Value::Int(9))])]),
        ];

        let min = reduce_aggregate(&[agg_column(AggregateFn::Min, "v")], values).unwrap();
        assert_eq!(min.rows[0].get("v"), Some(&Value::Int(2)));

        let values = vec![
            node("a", vec![row(&[("v", Value::Int(5))])]),
            node("b", vec![row(&[("v", Value::Int(2))])]),
            node("c", vec![row(&[("v", Value::Int(9))])]),
        ];
        let max = reduce_aggregate(&[agg_column(AggregateFn::Max, "v")], values).unwrap();
        assert_eq!(max.rows[0].get("v"), Some(&Value::Int(9)));
    }

    #[test]
    fn test_aggregate_rejects_non_integer_sum() {
        let columns = vec![agg_column(AggregateFn::Sum, "v")];
        let results = vec![
            node("a", vec![row(&[("v", Value::Int(1))])]),
            node("b", vec![row(&[("v", Value::Text("nope".to_string()))])]),
        ];

        let result = reduce_aggregate(&columns, results);
        assert!(matches!(result, Err(AppError::Data(_))));
    }

    #[test]
    fn test_aggregate_rejects_non_integer_seed() {
        // A single partial row must be type-checked too, not passed through.
        let columns = vec![agg_column(AggregateFn::Sum, "v")];
        let results = vec![node(
            "a",
            vec![row(&[("v", Value::Text("nope".to_string()))])],
        )];

        let result = reduce_aggregate(&columns, results);
        assert!(matches!(result, Err(AppError::Data(_))));
    }

    #[test]
    fn test_aggregate_emits_single_row() {
        let columns = vec![agg_column(AggregateFn::Sum, "v")];
        let results = vec![node(
            "a",
            vec![
                row(&[("v", Value::Int(1))]),
                row(&[("v", Value::Int(2))]),
                row(&[("v", Value::Int(3))]),
            ],
        )];

        let result = reduce_aggregate(&columns, results).unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].get("v"), Some(&Value::Int(6)));
    }

    #[test]
    fn test_concatenate_preserves_arrival_order() {
        let columns = vec![Column {
            table: "t".to_string(),
            name: "id".to_string(),
            expr: None,
            aggregate: None,
            position: 0,
            alias: "id".to_string(),
            is_join_key: false,
        }];
        let results = vec![
            node("a", vec![row(&[("id", Value::Int(1))])]),
            node("b", vec![row(&[("id", Value::Int(2))])]),
        ];

        let result = concatenate(&columns, results);
        assert_eq!(result.columns, vec![SOURCE_COLUMN, "id"]);
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[0].get("id"), Some(&Value::Int(1)));
        assert_eq!(result.rows[1].get("id"), Some(&Value::Int(2)));
    }
}
