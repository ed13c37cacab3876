// Per-query planning structures produced by the statement decomposer and
// consumed by the executor and reducer. All of these are owned by a single
// query invocation and discarded when it completes.
use serde::Serialize;

use crate::models::row::Row;

/// Aggregate functions the reducer knows how to fold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    Sum,
    Count,
    Min,
    Max,
}

impl AggregateFn {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "sum" => Some(AggregateFn::Sum),
            "count" => Some(AggregateFn::Count),
            "min" => Some(AggregateFn::Min),
            "max" => Some(AggregateFn::Max),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateFn::Sum => "sum",
            AggregateFn::Count => "count",
            AggregateFn::Min => "min",
            AggregateFn::Max => "max",
        }
    }
}

/// One projected item of the select list, attributed to its owning table.
#[derive(Debug, Clone)]
pub struct Column {
    /// Logical table the column belongs to (aliases already resolved).
    pub table: String,
    /// Native column name; for CASE projections this is the derived alias.
    pub name: String,
    /// Rendered source-side expression for CASE projections; plain columns
    /// and aggregates carry None and are rendered from `name`.
    pub expr: Option<String>,
    pub aggregate: Option<AggregateFn>,
    /// Ordinal position in the original select list.
    pub position: usize,
    /// Output name in result rows.
    pub alias: String,
    pub is_join_key: bool,
}

impl Column {
    /// How this item appears in a per-source fragment's select list.
    pub fn render(&self) -> String {
        match (&self.expr, self.aggregate) {
            (Some(expr), _) => format!("{} AS {}", expr, self.alias),
            (None, Some(func)) => format!("{}({}) AS {}", func.as_str(), self.name, self.alias),
            (None, None) if self.alias != self.name => {
                format!("{} AS {}", self.name, self.alias)
            }
            (None, None) => self.name.clone(),
        }
    }
}

/// Equality join condition carried from decomposition to the reducer; never
/// pushed down to a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinClause {
    pub left_table: String,
    pub left_column: String,
    pub right_table: String,
    pub right_column: String,
}

/// Which reduction strategy the query calls for.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryShape {
    Plain,
    Aggregate,
    Join(JoinClause),
}

/// One executable fragment of the original statement, owned by one source.
#[derive(Debug, Clone)]
pub struct DecomposedQuery {
    pub source_index: usize,
    /// Logical table the fragment reads.
    pub table: String,
    /// SQL text for relational sources; structural drivers use `projection`
    /// and `limit` instead.
    pub sql: String,
    /// Native column names referenced by the fragment; empty means all.
    pub projection: Vec<String>,
    pub columns: Vec<Column>,
    pub limit: Option<u64>,
    pub shape: QueryShape,
}

/// Full decomposition of one logical query: the per-source fragments plus
/// the query-level facts the reducer and loader need.
#[derive(Debug, Clone)]
pub struct Decomposition {
    pub fragments: Vec<DecomposedQuery>,
    pub columns: Vec<Column>,
    pub shape: QueryShape,
    /// Original statement-level LIMIT. For join queries it is applied to
    /// the reduced result rather than redistributed to the sides.
    pub limit: Option<u64>,
}

/// Row stream returned by one source's execution of one fragment.
#[derive(Debug)]
pub struct NodeResult {
    pub source_name: String,
    pub rows: Vec<Row>,
}

/// Merged/aggregated output of a federated query.
#[derive(Debug, Serialize)]
pub struct FinalResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl FinalResult {
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }
}

/// Outcome of a model build: rows ingested per destination table.
#[derive(Debug, Serialize)]
pub struct BuildReport {
    pub tables: Vec<TableLoad>,
}

#[derive(Debug, Serialize)]
pub struct TableLoad {
    pub table: String,
    pub rows: u64,
    pub sources: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_fn_lookup() {
        assert_eq!(AggregateFn::from_name("SUM"), Some(AggregateFn::Sum));
        assert_eq!(AggregateFn::from_name("min"), Some(AggregateFn::Min));
        assert_eq!(AggregateFn::from_name("avg"), None);
    }

    #[test]
    fn test_column_render() {
        let plain = Column {
            table: "users".to_string(),
            name: "name".to_string(),
            expr: None,
            aggregate: None,
            position: 0,
            alias: "name".to_string(),
            is_join_key: false,
        };
        assert_eq!(plain.render(), "name");

        let agg = Column {
            table: "orders".to_string(),
            name: "amount".to_string(),
            expr: None,
            aggregate: Some(AggregateFn::Sum),
            position: 1,
            alias: "amount".to_string(),
            is_join_key: false,
        };
        assert_eq!(agg.render(), "sum(amount) AS amount");

        let aliased = Column {
            table: "users".to_string(),
            name: "name".to_string(),
            expr: None,
            aggregate: None,
            position: 2,
            alias: "user_name".to_string(),
            is_join_key: false,
        };
        assert_eq!(aliased.render(), "name AS user_name");
    }
}
