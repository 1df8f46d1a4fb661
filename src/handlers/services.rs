use axum::{Json, extract::State, response::IntoResponse};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::AppState;
use crate::models::anomaly::{Anomaly, Metric, Severity};
use crate::models::incident::Incident;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Critical,
    Warning,
    Degraded,
    Healthy,
}

#[derive(Debug, Serialize)]
pub struct ServiceAnomaly {
    pub metric: Metric,
    pub z_score: f64,
}

#[derive(Debug, Serialize)]
pub struct ServiceEntry {
    pub service: String,
    pub status: ServiceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worst_severity: Option<Severity>,
    pub incident_count: usize,
    pub anomalies: Vec<ServiceAnomaly>,
}

#[derive(Debug, Serialize)]
pub struct ServicesResponse {
    pub services: Vec<ServiceEntry>,
}

pub async fn list_services(State(state): State<AppState>) -> impl IntoResponse {
    let anomalies = state.store.recent_anomalies();
    let incidents = state.store.list(state.store.count(), 0, Utc::now());
    Json(ServicesResponse {
        services: derive_services(&anomalies, &incidents),
    })
}

/// Per-service view over the latest tick's anomaly snapshot plus retained
/// incidents. Status derives from the worst anomaly severity in the last
/// window: critical for P1, warning for P2, degraded for P3/P4, healthy
/// otherwise.
pub(crate) fn derive_services(anomalies: &[Anomaly], incidents: &[Incident]) -> Vec<ServiceEntry> {
    let mut entries: BTreeMap<&str, (Option<Severity>, Vec<ServiceAnomaly>)> = BTreeMap::new();

    for anomaly in anomalies {
        let entry = entries.entry(anomaly.service.as_str()).or_default();
        entry.0 = Some(match entry.0 {
            Some(worst) => worst.worst(anomaly.severity),
            None => anomaly.severity,
        });
        entry.1.push(ServiceAnomaly {
            metric: anomaly.metric,
            z_score: anomaly.z_score,
        });
    }
    for incident in incidents {
        for service in &incident.services {
            entries.entry(service.as_str()).or_default();
        }
    }

    let mut incident_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for incident in incidents {
        for service in &incident.services {
            *incident_counts.entry(service.as_str()).or_default() += 1;
        }
    }

    entries
        .into_iter()
        .map(|(service, (worst_severity, anomalies))| ServiceEntry {
            service: service.to_string(),
            status: match worst_severity {
                Some(Severity::P1) => ServiceStatus::Critical,
                Some(Severity::P2) => ServiceStatus::Warning,
                Some(Severity::P3) | Some(Severity::P4) => ServiceStatus::Degraded,
                None => ServiceStatus::Healthy,
            },
            worst_severity,
            incident_count: incident_counts.get(service).copied().unwrap_or(0),
            anomalies,
        })
        .collect()
}
