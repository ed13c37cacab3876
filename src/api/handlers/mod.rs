pub mod metadata;
pub mod model;
pub mod query;

use std::sync::Arc;

use crate::services::FederationService;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<FederationService>,
}
