// Statement decomposer: parses one federated SELECT, validates the
// supported shape, and emits one executable fragment per participating
// source. Joins are split into two single-table fetches and recombined by
// the reducer; LIMIT is redistributed across a table's sources.
use std::collections::HashMap;

use sqlparser::ast::{
    BinaryOperator, Expr, FunctionArg, FunctionArgExpr, FunctionArguments, GroupByExpr,
    JoinConstraint, JoinOperator, ObjectNamePart, Select, SelectItem, TableFactor,
};

use crate::api::middleware::AppError;
use crate::models::{
    AggregateFn, Column, ColumnMetadata, DecomposedQuery, Decomposition, JoinClause, QueryShape,
    SourceRegistry,
};
use crate::validation::sql_validator::SqlValidator;

pub struct StatementDecomposer<'a> {
    registry: &'a SourceRegistry,
    metadata: &'a ColumnMetadata,
}

/// One table reference in the FROM clause, alias resolved.
#[derive(Debug, Clone)]
struct TableRef {
    table: String,
    alias: Option<String>,
}

impl<'a> StatementDecomposer<'a> {
    pub fn new(registry: &'a SourceRegistry, metadata: &'a ColumnMetadata) -> Self {
        Self { registry, metadata }
    }

    pub fn decompose(&self, sql: &str) -> Result<Decomposition, AppError> {
        let (select, limit) = SqlValidator::parse_single_select(sql)?;

        Self::check_supported_clauses(&select)?;

        let (tables, join) = self.extract_from(&select)?;
        let aliases = Self::alias_map(&tables);

        let (mut columns, refs) = self.parse_projection(&select, &aliases)?;
        self.check_metadata(&refs)?;

        match join {
            Some(clause) => {
                if columns.iter().any(|c| c.aggregate.is_some()) {
                    return Err(AppError::Decompose(
                        "Aggregate functions are not supported in join queries".to_string(),
                    ));
                }
                self.check_metadata(&[
                    (clause.left_table.clone(), clause.left_column.clone()),
                    (clause.right_table.clone(), clause.right_column.clone()),
                ])?;
                for column in &mut columns {
                    column.is_join_key = (column.table == clause.left_table
                        && column.name == clause.left_column)
                        || (column.table == clause.right_table
                            && column.name == clause.right_column);
                }
                self.split_join(clause, columns, limit)
            }
            None => self.project_single(&tables[0].table, columns, refs, limit),
        }
    }

    /// Clauses the fragment generator cannot carry are rejected up front:
    /// silently stripping them would return wrong results.
    fn check_supported_clauses(select: &Select) -> Result<(), AppError> {
        if select.distinct.is_some() {
            return Err(AppError::Decompose(
                "DISTINCT is not supported in federated queries".to_string(),
            ));
        }
        if select.selection.is_some() {
            return Err(AppError::Decompose(
                "WHERE clauses are not supported in federated queries".to_string(),
            ));
        }
        match &select.group_by {
            GroupByExpr::Expressions(exprs, modifiers)
                if exprs.is_empty() && modifiers.is_empty() => {}
            _ => {
                return Err(AppError::Decompose(
                    "GROUP BY is not supported in federated queries".to_string(),
                ))
            }
        }
        if select.having.is_some() {
            return Err(AppError::Decompose(
                "HAVING is not supported in federated queries".to_string(),
            ));
        }
        Ok(())
    }

    /// Validates the FROM clause: one table, or exactly one two-table join
    /// with a single equality ON condition.
    fn extract_from(
        &self,
        select: &Select,
    ) -> Result<(Vec<TableRef>, Option<JoinClause>), AppError> {
        if select.from.len() != 1 {
            return Err(AppError::Decompose(
                "Exactly one FROM target is supported".to_string(),
            ));
        }

        let from = &select.from[0];
        let mut tables = vec![Self::table_ref(&from.relation)?];

        if from.joins.is_empty() {
            return Ok((tables, None));
        }

        if from.joins.len() > 1 {
            return Err(AppError::Decompose(
                "Multi-way joins are not supported; join at most two tables".to_string(),
            ));
        }

        let join = &from.joins[0];
        tables.push(Self::table_ref(&join.relation)?);

        let constraint = match &join.join_operator {
            JoinOperator::Join(constraint) | JoinOperator::Inner(constraint) => constraint,
            _ => {
                return Err(AppError::Decompose(
                    "Only inner equality joins are supported".to_string(),
                ))
            }
        };

        let on_expr = match constraint {
            JoinConstraint::On(expr) => expr,
            _ => {
                return Err(AppError::Decompose(
                    "Joins require an explicit ON equality condition".to_string(),
                ))
            }
        };

        let aliases = Self::alias_map(&tables);
        let clause = self.parse_join_condition(on_expr, &aliases)?;
        Ok((tables, Some(clause)))
    }

    fn table_ref(factor: &TableFactor) -> Result<TableRef, AppError> {
        match factor {
            TableFactor::Table { name, alias, .. } => {
                let parts: Vec<String> = name.0.iter().map(part_value).collect();
                if parts.len() != 1 {
                    return Err(AppError::Decompose(format!(
                        "Qualified table names are not supported: {}",
                        parts.join(".")
                    )));
                }
                Ok(TableRef {
                    table: parts[0].clone(),
                    alias: alias.as_ref().map(|a| a.name.value.clone()),
                })
            }
            _ => Err(AppError::Decompose(
                "FROM targets must be plain tables".to_string(),
            )),
        }
    }

    fn alias_map(tables: &[TableRef]) -> HashMap<String, String> {
        let mut aliases = HashMap::new();
        for table_ref in tables {
            aliases.insert(table_ref.table.clone(), table_ref.table.clone());
            if let Some(alias) = &table_ref.alias {
                aliases.insert(alias.clone(), table_ref.table.clone());
            }
        }
        aliases
    }

    fn resolve_qualifier(
        qualifier: &str,
        aliases: &HashMap<String, String>,
    ) -> Result<String, AppError> {
        aliases.get(qualifier).cloned().ok_or_else(|| {
            AppError::Decompose(format!(
                "Unknown table or alias '{}' in column reference",
                qualifier
            ))
        })
    }

    /// The join condition must be a single equality between one column of
    /// each side. AND chains and non-equality operators are rejected.
    fn parse_join_condition(
        &self,
        expr: &Expr,
        aliases: &HashMap<String, String>,
    ) -> Result<JoinClause, AppError> {
        let Expr::BinaryOp { left, op, right } = expr else {
            return Err(AppError::Decompose(
                "Join conditions must be a single equality comparison".to_string(),
            ));
        };

        if matches!(op, BinaryOperator::And) {
            return Err(AppError::Decompose(
                "Compound join conditions are not supported; use a single equality".to_string(),
            ));
        }
        if !matches!(op, BinaryOperator::Eq) {
            return Err(AppError::Decompose(format!(
                "Only equality join conditions are supported, found: {}",
                op
            )));
        }

        let (left_table, left_column) = Self::qualified_column(left, aliases)?;
        let (right_table, right_column) = Self::qualified_column(right, aliases)?;

        if left_table == right_table {
            return Err(AppError::Decompose(
                "Join condition must compare columns of the two joined tables".to_string(),
            ));
        }

        Ok(JoinClause {
            left_table,
            left_column,
            right_table,
            right_column,
        })
    }

    fn qualified_column(
        expr: &Expr,
        aliases: &HashMap<String, String>,
    ) -> Result<(String, String), AppError> {
        match expr {
            Expr::CompoundIdentifier(idents) if idents.len() == 2 => {
                let table = Self::resolve_qualifier(&idents[0].value, aliases)?;
                Ok((table, idents[1].value.clone()))
            }
            Expr::Identifier(ident) => Err(AppError::Decompose(format!(
                "Unqualified column '{}': fully-qualified table.column references are required",
                ident.value
            ))),
            other => Err(AppError::Decompose(format!(
                "Expected a qualified column reference, found: {}",
                other
            ))),
        }
    }

    /// Parses the select list into attributed columns plus the flat list of
    /// (table, column) references that must exist in the reconciled schema.
    fn parse_projection(
        &self,
        select: &Select,
        aliases: &HashMap<String, String>,
    ) -> Result<(Vec<Column>, Vec<(String, String)>), AppError> {
        if select.projection.is_empty() {
            return Err(AppError::Decompose("Empty select list".to_string()));
        }

        let mut columns = Vec::with_capacity(select.projection.len());
        let mut refs = Vec::new();

        for (position, item) in select.projection.iter().enumerate() {
            let (expr, alias) = match item {
                SelectItem::UnnamedExpr(expr) => (expr, None),
                SelectItem::ExprWithAlias { expr, alias } => (expr, Some(alias.value.clone())),
                SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(..) => {
                    return Err(AppError::Decompose(
                        "Star expressions are not supported; list columns explicitly".to_string(),
                    ))
                }
            };

            let column = self.parse_projection_item(expr, alias, position, aliases, &mut refs)?;
            columns.push(column);
        }

        Ok((columns, refs))
    }

    fn parse_projection_item(
        &self,
        expr: &Expr,
        alias: Option<String>,
        position: usize,
        aliases: &HashMap<String, String>,
        refs: &mut Vec<(String, String)>,
    ) -> Result<Column, AppError> {
        match expr {
            Expr::CompoundIdentifier(_) | Expr::Identifier(_) => {
                let (table, name) = Self::qualified_column(expr, aliases)?;
                refs.push((table.clone(), name.clone()));
                Ok(Column {
                    table,
                    alias: alias.unwrap_or_else(|| name.clone()),
                    name,
                    expr: None,
                    aggregate: None,
                    position,
                    is_join_key: false,
                })
            }
            Expr::Function(func) => {
                let func_name = func
                    .name
                    .0
                    .iter()
                    .map(part_value)
                    .collect::<Vec<_>>()
                    .join(".");
                let aggregate = AggregateFn::from_name(&func_name).ok_or_else(|| {
                    AppError::Decompose(format!("Unknown function '{}'", func_name))
                })?;

                let (table, name) = Self::aggregate_argument(func, aliases)?;
                refs.push((table.clone(), name.clone()));
                Ok(Column {
                    table,
                    alias: alias.unwrap_or_else(|| name.clone()),
                    name,
                    expr: None,
                    aggregate: Some(aggregate),
                    position,
                    is_join_key: false,
                })
            }
            Expr::Case { .. } => {
                let mut case_refs = Vec::new();
                collect_case_refs(expr, aliases, &mut case_refs)?;

                let table = match case_refs.first() {
                    Some((table, _)) => table.clone(),
                    None => {
                        return Err(AppError::Decompose(
                            "CASE expressions must reference at least one qualified column"
                                .to_string(),
                        ))
                    }
                };
                if case_refs.iter().any(|(t, _)| t != &table) {
                    return Err(AppError::Decompose(
                        "CASE expressions may only reference columns of one table".to_string(),
                    ));
                }
                refs.extend(case_refs.iter().cloned());

                let mut stripped = expr.clone();
                strip_qualifiers(&mut stripped);
                let alias = alias.unwrap_or_else(|| format!("case_{}", position));

                Ok(Column {
                    table,
                    name: alias.clone(),
                    expr: Some(stripped.to_string()),
                    aggregate: None,
                    position,
                    alias,
                    is_join_key: false,
                })
            }
            other => Err(AppError::Decompose(format!(
                "Unsupported projection expression: {}",
                other
            ))),
        }
    }

    fn aggregate_argument(
        func: &sqlparser::ast::Function,
        aliases: &HashMap<String, String>,
    ) -> Result<(String, String), AppError> {
        let FunctionArguments::List(arg_list) = &func.args else {
            return Err(AppError::Decompose(
                "Aggregate functions take exactly one column argument".to_string(),
            ));
        };

        if arg_list.args.len() != 1 {
            return Err(AppError::Decompose(
                "Aggregate functions take exactly one column argument".to_string(),
            ));
        }

        match &arg_list.args[0] {
            FunctionArg::Unnamed(FunctionArgExpr::Expr(expr)) => {
                Self::qualified_column(expr, aliases)
            }
            FunctionArg::Unnamed(FunctionArgExpr::Wildcard) => Err(AppError::Decompose(
                "Star expressions are not supported; aggregate a named column".to_string(),
            )),
            _ => Err(AppError::Decompose(
                "Aggregate arguments must be qualified column references".to_string(),
            )),
        }
    }

    /// Every referenced column must resolve to a served table with a
    /// reconciled majority type.
    fn check_metadata(&self, refs: &[(String, String)]) -> Result<(), AppError> {
        for (table, column) in refs {
            if self.registry.sources_for_table(table).is_empty() {
                return Err(AppError::Schema(format!(
                    "No registered source serves table {}",
                    table
                )));
            }
            if self.metadata.majority_type(table, column).is_none() {
                return Err(AppError::Schema(format!(
                    "Column {}.{} is missing from the reconciled schema or has no majority type",
                    table, column
                )));
            }
        }
        Ok(())
    }

    fn project_single(
        &self,
        table: &str,
        columns: Vec<Column>,
        refs: Vec<(String, String)>,
        limit: Option<u64>,
    ) -> Result<Decomposition, AppError> {
        let participants = self.registry.sources_for_table(table);
        if participants.is_empty() {
            return Err(AppError::Schema(format!(
                "No registered source serves table {}",
                table
            )));
        }

        let shape = if columns.iter().any(|c| c.aggregate.is_some()) {
            QueryShape::Aggregate
        } else {
            QueryShape::Plain
        };

        // A plain column next to an aggregate would render per-source SQL no
        // relational engine accepts (non-aggregated column without GROUP BY).
        if shape == QueryShape::Aggregate && columns.iter().any(|c| c.aggregate.is_none()) {
            return Err(AppError::Decompose(
                "Select lists mixing aggregate functions and plain columns are not supported"
                    .to_string(),
            ));
        }

        // Native column names referenced by the fragment, select-list order.
        let mut projection: Vec<String> = Vec::new();
        for (_, column) in &refs {
            if !projection.contains(column) {
                projection.push(column.clone());
            }
        }

        let select_list = columns
            .iter()
            .map(Column::render)
            .collect::<Vec<_>>()
            .join(", ");

        // Aggregates produce one row per source; the statement LIMIT is not
        // spread over them.
        let shares: Vec<Option<u64>> = match (&shape, limit) {
            (QueryShape::Plain, Some(l)) => redistribute_limit(l, participants.len())
                .into_iter()
                .map(Some)
                .collect(),
            _ => vec![None; participants.len()],
        };

        let mut fragments = Vec::new();
        for (i, source_index) in participants.iter().enumerate() {
            let share = shares[i];
            // Zero-share sources contribute no rows and are dropped, except
            // source 0 which always carries the remainder.
            if i != 0 && share == Some(0) {
                tracing::debug!(
                    "Dropping fragment for source index {} (zero limit share)",
                    source_index
                );
                continue;
            }

            let mut sql = format!("SELECT {} FROM {}", select_list, table);
            if let Some(share) = share {
                sql.push_str(&format!(" LIMIT {}", share));
            }

            fragments.push(DecomposedQuery {
                source_index: *source_index,
                table: table.to_string(),
                sql,
                projection: projection.clone(),
                columns: columns.clone(),
                limit: share,
                shape: shape.clone(),
            });
        }

        Ok(Decomposition {
            fragments,
            columns,
            shape,
            limit,
        })
    }

    /// Join decomposition: two whole-table fetches, one per side, with the
    /// equality condition carried forward for the reducer.
    fn split_join(
        &self,
        clause: JoinClause,
        columns: Vec<Column>,
        limit: Option<u64>,
    ) -> Result<Decomposition, AppError> {
        let shape = QueryShape::Join(clause.clone());
        let mut fragments = Vec::with_capacity(2);

        for table in [&clause.left_table, &clause.right_table] {
            let participants = self.registry.sources_for_table(table);
            let Some(source_index) = participants.first() else {
                return Err(AppError::Schema(format!(
                    "No registered source serves table {}",
                    table
                )));
            };
            if participants.len() > 1 {
                tracing::warn!(
                    "Table {} is served by {} sources; join side fetches from the first",
                    table,
                    participants.len()
                );
            }

            fragments.push(DecomposedQuery {
                source_index: *source_index,
                table: table.clone(),
                sql: format!("SELECT * FROM {}", table),
                projection: Vec::new(),
                columns: columns.clone(),
                limit: None,
                shape: shape.clone(),
            });
        }

        Ok(Decomposition {
            fragments,
            columns,
            shape,
            limit,
        })
    }
}

/// Redistributes LIMIT l across n sources: everyone gets the integer share,
/// source 0 additionally takes the remainder, so the shares sum to l.
pub(crate) fn redistribute_limit(limit: u64, sources: usize) -> Vec<u64> {
    let n = sources as u64;
    let share = limit / n;
    let remainder = limit % n;

    let mut shares = vec![share; sources];
    shares[0] += remainder;
    shares
}

fn part_value(part: &ObjectNamePart) -> String {
    match part {
        ObjectNamePart::Identifier(ident) => ident.value.clone(),
        _ => String::new(),
    }
}

/// Collects every column reference inside a CASE expression, requiring all
/// of them to be table-qualified.
fn collect_case_refs(
    expr: &Expr,
    aliases: &HashMap<String, String>,
    refs: &mut Vec<(String, String)>,
) -> Result<(), AppError> {
    match expr {
        Expr::CompoundIdentifier(idents) if idents.len() == 2 => {
            let table = StatementDecomposer::resolve_qualifier(&idents[0].value, aliases)?;
            refs.push((table, idents[1].value.clone()));
            Ok(())
        }
        Expr::CompoundIdentifier(idents) => Err(AppError::Decompose(format!(
            "Unsupported column reference: {}",
            idents
                .iter()
                .map(|i| i.value.clone())
                .collect::<Vec<_>>()
                .join(".")
        ))),
        Expr::Identifier(ident) => Err(AppError::Decompose(format!(
            "Unqualified column '{}' inside CASE expression",
            ident.value
        ))),
        Expr::Value(_) => Ok(()),
        Expr::BinaryOp { left, right, .. } => {
            collect_case_refs(left, aliases, refs)?;
            collect_case_refs(right, aliases, refs)
        }
        Expr::UnaryOp { expr, .. } | Expr::Nested(expr) => collect_case_refs(expr, aliases, refs),
        Expr::IsNull(expr) | Expr::IsNotNull(expr) => collect_case_refs(expr, aliases, refs),
        Expr::Between {
            expr, low, high, ..
        } => {
            collect_case_refs(expr, aliases, refs)?;
            collect_case_refs(low, aliases, refs)?;
            collect_case_refs(high, aliases, refs)
        }
        Expr::InList { expr, list, .. } => {
            collect_case_refs(expr, aliases, refs)?;
            for item in list {
                collect_case_refs(item, aliases, refs)?;
            }
            Ok(())
        }
        Expr::Case {
            operand,
            conditions,
            else_result,
            ..
        } => {
            if let Some(operand) = operand {
                collect_case_refs(operand, aliases, refs)?;
            }
            for case_when in conditions {
                collect_case_refs(&case_when.condition, aliases, refs)?;
                collect_case_refs(&case_when.result, aliases, refs)?;
            }
            if let Some(else_result) = else_result {
                collect_case_refs(else_result, aliases, refs)?;
            }
            Ok(())
        }
        other => Err(AppError::Decompose(format!(
            "Unsupported expression inside CASE: {}",
            other
        ))),
    }
}

/// Rewrites qualified column references to bare column names so the
/// expression can run against a single source table.
fn strip_qualifiers(expr: &mut Expr) {
    match expr {
        Expr::CompoundIdentifier(idents) if idents.len() == 2 => {
            *expr = Expr::Identifier(idents[1].clone());
        }
        Expr::BinaryOp { left, right, .. } => {
            strip_qualifiers(left);
            strip_qualifiers(right);
        }
        Expr::UnaryOp { expr: inner, .. } | Expr::Nested(inner) => strip_qualifiers(inner),
        Expr::IsNull(inner) | Expr::IsNotNull(inner) => strip_qualifiers(inner),
        Expr::Between {
            expr: inner,
            low,
            high,
            ..
        } => {
            strip_qualifiers(inner);
            strip_qualifiers(low);
            strip_qualifiers(high);
        }
        Expr::InList { expr: inner, list, .. } => {
            strip_qualifiers(inner);
            for item in list {
                strip_qualifiers(item);
            }
        }
        Expr::Case {
            operand,
            conditions,
            else_result,
            ..
        } => {
            if let Some(operand) = operand {
                strip_qualifiers(operand);
            }
            for case_when in conditions {
                strip_qualifiers(&mut case_when.condition);
                strip_qualifiers(&mut case_when.result);
            }
            if let Some(else_result) = else_result {
                strip_qualifiers(else_result);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnType, EngineKind, Source};

    fn registry() -> SourceRegistry {
        SourceRegistry::new(vec![
            Source {
                name: "pg_main".to_string(),
                kind: EngineKind::Postgres,
                url: "postgres://localhost/app".to_string(),
                tables: vec!["users".to_string(), "orders".to_string()],
            },
            Source {
                name: "mysql_replica".to_string(),
                kind: EngineKind::MySql,
                url: "mysql://localhost/app".to_string(),
                tables: vec!["users".to_string()],
            },
            Source {
                name: "mongo_events".to_string(),
                kind: EngineKind::MongoDb,
                url: "mongodb://localhost/app".to_string(),
                tables: vec!["users".to_string()],
            },
        ])
    }

    fn metadata() -> ColumnMetadata {
        let mut meta = ColumnMetadata::new();
        for (table, column, ty) in [
            ("users", "id", "bigint"),
            ("users", "name", "varchar"),
            ("users", "count", "bigint"),
            ("orders", "id", "bigint"),
            ("orders", "user_id", "bigint"),
            ("orders", "amount", "double"),
        ] {
            meta.insert(
                table,
                column,
                ColumnType {
                    observed: vec![ty.to_string()],
                    majority: ty.to_string(),
                },
            );
        }
        meta
    }

    fn decompose(sql: &str) -> Result<Decomposition, AppError> {
        let registry = registry();
        let metadata = metadata();
        StatementDecomposer::new(&registry, &metadata).decompose(sql)
    }

    #[test]
    fn test_redistribute_limit_sums_exactly() {
        assert_eq!(redistribute_limit(10, 3), vec![4, 3, 3]);
        assert_eq!(redistribute_limit(2, 5), vec![2, 0, 0, 0, 0]);
        assert_eq!(redistribute_limit(9, 3), vec![3, 3, 3]);
        assert_eq!(redistribute_limit(1, 1), vec![1]);
    }

    #[test]
    fn test_single_table_fans_out_to_all_sources() {
        let plan = decompose("SELECT users.id, users.name FROM users").unwrap();
        assert_eq!(plan.fragments.len(), 3);
        assert_eq!(plan.shape, QueryShape::Plain);
        assert_eq!(plan.fragments[0].sql, "SELECT id, name FROM users");
        assert_eq!(plan.fragments[0].projection, vec!["id", "name"]);
    }

    #[test]
    fn test_limit_redistribution_drops_zero_share_fragments() {
        let plan = decompose("SELECT users.id FROM users LIMIT 2").unwrap();
        // 3 sources, limit 2: source 0 takes it all, the rest are dropped.
        assert_eq!(plan.fragments.len(), 1);
        assert_eq!(plan.fragments[0].limit, Some(2));
        assert_eq!(plan.fragments[0].sql, "SELECT id FROM users LIMIT 2");
    }

    #[test]
    fn test_limit_redistribution_remainder_to_source_zero() {
        let plan = decompose("SELECT users.id FROM users LIMIT 10").unwrap();
        let limits: Vec<Option<u64>> = plan.fragments.iter().map(|f| f.limit).collect();
        assert_eq!(limits, vec![Some(4), Some(3), Some(3)]);
        let total: u64 = limits.iter().map(|l| l.unwrap()).sum();
        assert_eq!(total, 10);
    }

    #[test]
    fn test_unqualified_column_rejected() {
        let err = decompose("SELECT name FROM users").unwrap_err();
        assert!(matches!(err, AppError::Decompose(_)));

        assert!(decompose("SELECT users.name FROM users").is_ok());
    }

    #[test]
    fn test_star_expression_rejected() {
        let err = decompose("SELECT * FROM users").unwrap_err();
        assert!(matches!(err, AppError::Decompose(_)));
    }

    #[test]
    fn test_unknown_function_rejected() {
        let err = decompose("SELECT median(users.count) FROM users").unwrap_err();
        match err {
            AppError::Decompose(msg) => assert!(msg.contains("median")),
            other => panic!("expected decompose error, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_column_is_schema_error() {
        let err = decompose("SELECT users.missing FROM users").unwrap_err();
        match err {
            AppError::Schema(msg) => assert!(msg.contains("users.missing")),
            other => panic!("expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn test_aggregate_shape_and_alias_defaults() {
        let plan = decompose("SELECT sum(users.count) FROM users").unwrap();
        assert_eq!(plan.shape, QueryShape::Aggregate);
        assert_eq!(plan.columns[0].alias, "count");
        assert_eq!(plan.columns[0].aggregate, Some(AggregateFn::Sum));
        assert_eq!(
            plan.fragments[0].sql,
            "SELECT sum(count) AS count FROM users"
        );
        // Aggregates are not limit-redistributed: every source participates.
        assert_eq!(plan.fragments.len(), 3);
    }

    #[test]
    fn test_join_splits_into_two_whole_table_fetches() {
        let plan = decompose(
            "SELECT users.id, orders.amount FROM users \
             JOIN orders ON users.id = orders.user_id",
        )
        .unwrap();

        assert_eq!(plan.fragments.len(), 2);
        assert_eq!(plan.fragments[0].sql, "SELECT * FROM users");
        assert_eq!(plan.fragments[1].sql, "SELECT * FROM orders");
        match &plan.shape {
            QueryShape::Join(clause) => {
                assert_eq!(clause.left_table, "users");
                assert_eq!(clause.left_column, "id");
                assert_eq!(clause.right_table, "orders");
                assert_eq!(clause.right_column, "user_id");
            }
            other => panic!("expected join shape, got {:?}", other),
        }
        assert!(plan.columns[0].is_join_key);
    }

    #[test]
    fn test_join_with_aliases() {
        let plan = decompose(
            "SELECT u.name, o.amount FROM users u JOIN orders o ON u.id = o.user_id",
        )
        .unwrap();
        assert_eq!(plan.fragments[0].table, "users");
        assert_eq!(plan.fragments[1].table, "orders");
    }

    #[test]
    fn test_multi_way_join_rejected() {
        let err = decompose(
            "SELECT u.id FROM users u \
             JOIN orders o ON u.id = o.user_id \
             JOIN orders o2 ON u.id = o2.user_id",
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Decompose(_)));
    }

    #[test]
    fn test_compound_join_condition_rejected() {
        let err = decompose(
            "SELECT u.id FROM users u JOIN orders o \
             ON u.id = o.user_id AND u.name = o.id",
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Decompose(_)));
    }

    #[test]
    fn test_case_expression_rendered_without_qualifiers() {
        let plan = decompose(
            "SELECT CASE WHEN users.count > 10 THEN 'high' ELSE 'low' END AS bucket FROM users",
        )
        .unwrap();
        let column = &plan.columns[0];
        assert_eq!(column.alias, "bucket");
        let expr = column.expr.as_ref().unwrap();
        assert!(expr.contains("CASE WHEN count > 10"), "got: {}", expr);
        assert!(!expr.contains("users."), "got: {}", expr);
    }

    #[test]
    fn test_unknown_table_is_schema_error() {
        let err = decompose("SELECT ghosts.id FROM ghosts").unwrap_err();
        assert!(matches!(err, AppError::Schema(_)));
    }

    #[test]
    fn test_where_clause_rejected_not_stripped() {
        let err = decompose("SELECT users.id FROM users WHERE users.id = 5").unwrap_err();
        match err {
            AppError::Decompose(msg) => assert!(msg.contains("WHERE"), "got: {}", msg),
            other => panic!("expected decompose error, got {:?}", other),
        }
    }

    #[test]
    fn test_group_by_and_having_rejected() {
        let err =
            decompose("SELECT users.count FROM users GROUP BY users.count").unwrap_err();
        match err {
            AppError::Decompose(msg) => assert!(msg.contains("GROUP BY"), "got: {}", msg),
            other => panic!("expected decompose error, got {:?}", other),
        }

        // HAVING without GROUP BY still parses; it must be rejected too.
        let err =
            decompose("SELECT users.count FROM users HAVING users.count > 1").unwrap_err();
        assert!(matches!(err, AppError::Decompose(_)));
    }

    #[test]
    fn test_distinct_rejected() {
        let err = decompose("SELECT DISTINCT users.name FROM users").unwrap_err();
        match err {
            AppError::Decompose(msg) => assert!(msg.contains("DISTINCT"), "got: {}", msg),
            other => panic!("expected decompose error, got {:?}", other),
        }
    }

    #[test]
    fn test_order_by_rejected() {
        let err = decompose("SELECT users.id FROM users ORDER BY users.id").unwrap_err();
        assert!(matches!(err, AppError::InvalidSql(_)));
    }

    #[test]
    fn test_mixed_aggregate_and_plain_columns_rejected() {
        let err = decompose("SELECT users.name, sum(users.count) FROM users").unwrap_err();
        match err {
            AppError::Decompose(msg) => assert!(msg.contains("mixing"), "got: {}", msg),
            other => panic!("expected decompose error, got {:?}", other),
        }
    }

    #[test]
    fn test_aggregate_in_join_rejected() {
        let err = decompose(
            "SELECT sum(o.amount) FROM users u JOIN orders o ON u.id = o.user_id",
        )
        .unwrap_err();
        match err {
            AppError::Decompose(msg) => assert!(msg.contains("join"), "got: {}", msg),
            other => panic!("expected decompose error, got {:?}", other),
        }
    }
}
