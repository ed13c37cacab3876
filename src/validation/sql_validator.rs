use sqlparser::ast::{Expr, LimitClause, Select, SetExpr, Statement, Value as SqlValue};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::api::middleware::AppError;

/// SQL validation service for ensuring queries are safe and valid
pub struct SqlValidator;

impl SqlValidator {
    /// Validate that the text is exactly one SELECT statement. Used by the
    /// local-store surface before handing SQL to the embedded engine.
    pub fn validate_select_only(sql: &str) -> Result<(), AppError> {
        let statements = Self::parse(sql)?;

        if statements.len() != 1 {
            return Err(AppError::InvalidSql(
                "Expected a single SQL statement".to_string(),
            ));
        }

        match &statements[0] {
            Statement::Query(_) => Ok(()),
            other => Err(AppError::InvalidSql(format!(
                "Only SELECT statements are permitted, found: {}",
                statement_kind(other)
            ))),
        }
    }

    /// Parse one SELECT statement into its bare `Select` body plus the LIMIT
    /// literal, rejecting everything outside the supported federation shape
    /// (multiple statements, CTEs, set operations, non-numeric LIMIT).
    pub fn parse_single_select(sql: &str) -> Result<(Select, Option<u64>), AppError> {
        let mut statements = Self::parse(sql)?;

        if statements.len() != 1 {
            return Err(AppError::InvalidSql(
                "Expected a single SQL statement".to_string(),
            ));
        }

        let query = match statements.remove(0) {
            Statement::Query(query) => query,
            other => {
                return Err(AppError::InvalidSql(format!(
                    "Only SELECT statements can be federated, found: {}",
                    statement_kind(&other)
                )))
            }
        };

        if query.with.is_some() {
            return Err(AppError::InvalidSql(
                "WITH clauses are not supported".to_string(),
            ));
        }

        if query.order_by.is_some() {
            return Err(AppError::InvalidSql(
                "ORDER BY is not supported in federated queries".to_string(),
            ));
        }

        let limit = Self::extract_limit(query.limit_clause.as_ref())?;

        match *query.body {
            SetExpr::Select(select) => Ok((*select, limit)),
            _ => Err(AppError::InvalidSql(
                "Set operations are not supported".to_string(),
            )),
        }
    }

    fn parse(sql: &str) -> Result<Vec<Statement>, AppError> {
        Parser::parse_sql(&GenericDialect {}, sql.trim())
            .map_err(|e| AppError::InvalidSql(format!("SQL parsing error: {}", e)))
    }

    /// Pull the LIMIT row count out of the parsed clause. Only plain numeric
    /// literals are accepted.
    fn extract_limit(clause: Option<&LimitClause>) -> Result<Option<u64>, AppError> {
        let expr = match clause {
            None => return Ok(None),
            Some(LimitClause::LimitOffset { limit: None, .. }) => return Ok(None),
            Some(LimitClause::LimitOffset {
                limit: Some(expr), ..
            }) => expr,
            Some(LimitClause::OffsetCommaLimit { limit, .. }) => limit,
        };

        match expr {
            Expr::Value(value) => match &value.value {
                SqlValue::Number(n, _) => n.parse::<u64>().map(Some).map_err(|_| {
                    AppError::InvalidSql(format!("Invalid LIMIT value: {}", n))
                }),
                other => Err(AppError::InvalidSql(format!(
                    "LIMIT must be a numeric literal, found: {}",
                    other
                ))),
            },
            other => Err(AppError::InvalidSql(format!(
                "LIMIT must be a numeric literal, found: {}",
                other
            ))),
        }
    }
}

fn statement_kind(statement: &Statement) -> &'static str {
    match statement {
        Statement::Insert { .. } => "INSERT",
        Statement::Update { .. } => "UPDATE",
        Statement::Delete { .. } => "DELETE",
        Statement::Drop { .. } => "DROP",
        Statement::CreateTable { .. } => "CREATE TABLE",
        Statement::AlterTable { .. } => "ALTER TABLE",
        _ => "unsupported statement",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_select_only() {
        assert!(SqlValidator::validate_select_only("SELECT * FROM users").is_ok());
        assert!(SqlValidator::validate_select_only("INSERT INTO users VALUES (1)").is_err());
        assert!(SqlValidator::validate_select_only("UPDATE users SET name = 'x'").is_err());
        assert!(SqlValidator::validate_select_only("DELETE FROM users").is_err());
        assert!(
            SqlValidator::validate_select_only("SELECT 1; SELECT 2").is_err(),
            "multiple statements must be rejected"
        );
    }

    #[test]
    fn test_parse_single_select_extracts_limit() {
        let (_, limit) =
            SqlValidator::parse_single_select("SELECT users.id FROM users LIMIT 10").unwrap();
        assert_eq!(limit, Some(10));

        let (_, limit) = SqlValidator::parse_single_select("SELECT users.id FROM users").unwrap();
        assert_eq!(limit, None);
    }

    #[test]
    fn test_parse_single_select_rejects_unsupported_shapes() {
        assert!(SqlValidator::parse_single_select("DELETE FROM users").is_err());
        assert!(SqlValidator::parse_single_select(
            "WITH u AS (SELECT 1) SELECT * FROM u"
        )
        .is_err());
        assert!(SqlValidator::parse_single_select(
            "SELECT a.id FROM a UNION SELECT b.id FROM b"
        )
        .is_err());
    }

    #[test]
    fn test_parse_single_select_rejects_order_by() {
        let err =
            SqlValidator::parse_single_select("SELECT users.id FROM users ORDER BY users.id")
                .unwrap_err();
        match err {
            AppError::InvalidSql(msg) => assert!(msg.contains("ORDER BY"), "got: {}", msg),
            other => panic!("expected invalid-sql error, got {:?}", other),
        }
    }

    #[test]
    fn test_limit_detection_ignores_lookalike_names() {
        // Column and table names containing "limit" are not LIMIT clauses.
        let (_, limit) =
            SqlValidator::parse_single_select("SELECT t.limit_value FROM t").unwrap();
        assert_eq!(limit, None);
    }
}
