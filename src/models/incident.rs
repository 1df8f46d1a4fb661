use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::analysis::Analysis;
use crate::models::anomaly::{Anomaly, Metric, Severity};
use crate::models::event::CorrelatedEvent;
use crate::models::runbook::RunbookMatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Active,
    Cooling,
}

/// One emitted incident. Mutation is owned by the incident manager; the
/// store hands out copies so readers cannot touch retained records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub severity: Severity,
    pub title: String,
    pub services: Vec<String>,
    pub anomalies: Vec<Anomaly>,
    pub correlated_events: Vec<CorrelatedEvent>,
    pub matched_runbooks: Vec<RunbookMatch>,
    pub analysis: Option<Analysis>,
    pub dedup_key: String,
    pub status: IncidentStatus,
    /// When an anomaly last matched this incident's dedup key; drives the
    /// lazy active -> cooling transition.
    pub last_matched_at: DateTime<Utc>,
}

impl Incident {
    pub fn summary(&self) -> IncidentSummary {
        IncidentSummary {
            id: self.id.clone(),
            created_at: self.created_at,
            severity: self.severity,
            title: self.title.clone(),
            services: self.services.clone(),
            status: self.status,
            anomaly_count: self.anomalies.len(),
            has_analysis: self.analysis.is_some(),
        }
    }
}

/// Trimmed incident shape for list endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct IncidentSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub severity: Severity,
    pub title: String,
    pub services: Vec<String>,
    pub status: IncidentStatus,
    pub anomaly_count: usize,
    pub has_analysis: bool,
}

/// Deterministic digest of `(sorted services, sorted metrics, severity)`.
/// Identical anomaly groupings within the cooldown window hash to the same
/// key and are suppressed to a single alert.
pub fn dedup_key(services: &[String], metrics: &[Metric], severity: Severity) -> String {
    let mut services: Vec<&str> = services.iter().map(String::as_str).collect();
    services.sort_unstable();
    services.dedup();

    let mut metrics: Vec<&str> = metrics.iter().map(Metric::as_str).collect();
    metrics.sort_unstable();
    metrics.dedup();

    let canonical = format!(
        "{}|{}|{}",
        services.join(","),
        metrics.join(","),
        severity.as_str()
    );
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_key_is_order_insensitive() {
        let a = dedup_key(
            &["payment".into(), "order".into()],
            &[Metric::ErrorRate, Metric::LatencyP99],
            Severity::P1,
        );
        let b = dedup_key(
            &["order".into(), "payment".into()],
            &[Metric::LatencyP99, Metric::ErrorRate],
            Severity::P1,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn dedup_key_ignores_repeated_members() {
        let a = dedup_key(
            &["payment".into(), "payment".into()],
            &[Metric::ErrorRate, Metric::ErrorRate],
            Severity::P2,
        );
        let b = dedup_key(&["payment".into()], &[Metric::ErrorRate], Severity::P2);
        assert_eq!(a, b);
    }

    #[test]
    fn dedup_key_distinguishes_severity_and_members() {
        let base = dedup_key(&["payment".into()], &[Metric::ErrorRate], Severity::P1);
        assert_ne!(
            base,
            dedup_key(&["payment".into()], &[Metric::ErrorRate], Severity::P2)
        );
        assert_ne!(
            base,
            dedup_key(&["order".into()], &[Metric::ErrorRate], Severity::P1)
        );
        assert_ne!(
            base,
            dedup_key(&["payment".into()], &[Metric::LatencyP99], Severity::P1)
        );
    }
}
