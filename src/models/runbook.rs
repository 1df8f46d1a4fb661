use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A historical incident document matched from the runbook index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunbookMatch {
    pub title: String,
    pub incident_date: DateTime<Utc>,
    pub services_affected: Vec<String>,
    pub root_cause: String,
    pub resolution_steps: Vec<String>,
    pub tags: Vec<String>,
    /// Backend relevance score, higher is better.
    pub score: f64,
}
