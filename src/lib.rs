pub mod analyzer;
pub mod config;
pub mod correlator;
pub mod detector;
pub mod error;
pub mod handlers;
pub mod incident_manager;
pub mod models;
pub mod notify;
pub mod observability;
pub mod pipeline;
pub mod runbooks;
pub mod store;

use std::sync::Arc;

use store::IncidentStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<IncidentStore>,
}
