// Source registry: static description of the external systems participating
// in federation. Built once from configuration, read-only afterwards.
use serde::{Deserialize, Serialize};

/// Engine families the federation layer knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    #[serde(alias = "mariadb")]
    MySql,
    #[serde(alias = "postgresql")]
    Postgres,
    #[serde(alias = "mongo")]
    MongoDb,
    S3,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::MySql => "mysql",
            EngineKind::Postgres => "postgres",
            EngineKind::MongoDb => "mongodb",
            EngineKind::S3 => "s3",
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One external data source: engine kind, connection URL and the logical
/// tables it serves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    pub kind: EngineKind,
    pub url: String,
    #[serde(default)]
    pub tables: Vec<String>,
}

impl Source {
    pub fn serves(&self, table: &str) -> bool {
        self.tables.iter().any(|t| t == table)
    }
}

/// Ordered collection of sources. Source index is stable for the process
/// lifetime and is how per-source observations and fragments are keyed.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<Source>,
}

impl SourceRegistry {
    pub fn new(sources: Vec<Source>) -> Self {
        Self { sources }
    }

    pub fn get(&self, index: usize) -> Option<&Source> {
        self.sources.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Source)> {
        self.sources.iter().enumerate()
    }

    /// Sources serving a logical table, in registry order.
    pub fn sources_for_table(&self, table: &str) -> Vec<usize> {
        self.sources
            .iter()
            .enumerate()
            .filter(|(_, s)| s.serves(table))
            .map(|(i, _)| i)
            .collect()
    }

    /// Every logical table served by at least one source, first-seen order.
    pub fn tables(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for source in &self.sources {
            for table in &source.tables {
                if !seen.iter().any(|t: &String| t == table) {
                    seen.push(table.clone());
                }
            }
        }
        seen
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
        ])
    }

    #[test]
    fn test_sources_for_table() {
        let reg = registry();
        assert_eq!(reg.sources_for_table("users"), vec![0, 1]);
        assert_eq!(reg.sources_for_table("orders"), vec![0]);
        assert!(reg.sources_for_table("missing").is_empty());
    }

    #[test]
    fn test_tables_dedup_preserves_order() {
        assert_eq!(registry().tables(), vec!["users", "orders"]);
    }

    #[test]
    fn test_engine_kind_aliases() {
        let kind: EngineKind = serde_json::from_str("\"postgresql\"").unwrap();
        assert_eq!(kind, EngineKind::Postgres);
        let kind: EngineKind = serde_json::from_str("\"s3\"").unwrap();
        assert_eq!(kind, EngineKind::S3);
    }
}
