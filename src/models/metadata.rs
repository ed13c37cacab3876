// Reconciled schema metadata: the per-column type each source reported and
// the majority type the federation layer settled on.
use serde::Serialize;
use std::collections::BTreeMap;

/// Per-column reconciliation result.
///
/// `observed` holds one canonical type string per source serving the table,
/// in registry order, with an empty slot where the source lacks the column.
/// `majority` is empty when no strict majority exists.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ColumnType {
    pub observed: Vec<String>,
    pub majority: String,
}

impl ColumnType {
    pub fn is_resolved(&self) -> bool {
        !self.majority.is_empty()
    }
}

/// Table → column → reconciled type. Built as a single barrier result by the
/// schema reconciler; read-only afterwards.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ColumnMetadata {
    tables: BTreeMap<String, BTreeMap<String, ColumnType>>,
}

impl ColumnMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table: &str, column: &str, column_type: ColumnType) {
        self.tables
            .entry(table.to_string())
            .or_default()
            .insert(column.to_string(), column_type);
    }

    pub fn column_type(&self, table: &str, column: &str) -> Option<&ColumnType> {
        self.tables.get(table).and_then(|cols| cols.get(column))
    }

    /// The reconciled type, only when a strict majority exists.
    pub fn majority_type(&self, table: &str, column: &str) -> Option<&str> {
        self.column_type(table, column)
            .filter(|ct| ct.is_resolved())
            .map(|ct| ct.majority.as_str())
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub fn columns_of(&self, table: &str) -> Option<&BTreeMap<String, ColumnType>> {
        self.tables.get(table)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &String> {
        self.tables.keys()
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_majority_type_filters_unresolved() {
        let mut meta = ColumnMetadata::new();
        meta.insert(
            "users",
            "id",
            ColumnType {
                observed: vec!["bigint".to_string(), "bigint".to_string()],
                majority: "bigint".to_string(),
            },
        );
        meta.insert(
            "users",
            "flags",
            ColumnType {
                observed: vec!["bigint".to_string(), "varchar".to_string()],
                majority: String::new(),
            },
        );

        assert_eq!(meta.majority_type("users", "id"), Some("bigint"));
        assert_eq!(meta.majority_type("users", "flags"), None);
        assert_eq!(meta.majority_type("users", "missing"), None);
        assert!(meta.has_table("users"));
        assert!(!meta.has_table("orders"));
    }
}
