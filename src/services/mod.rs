pub mod connection_pool;
pub mod database; // Per-engine source drivers
pub mod decomposer; // Statement decomposition
pub mod executor; // Concurrent fragment execution (map)
pub mod federation; // Pipeline facade
pub mod reconciler; // Cross-source schema reconciliation
pub mod reducer; // Join/aggregate result reduction

pub use connection_pool::*;
pub use decomposer::StatementDecomposer;
pub use federation::FederationService;
