use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;

use crate::analyzer::Analyzer;
use crate::config::IncidentConfig;
use crate::models::analysis::Analysis;
use crate::models::anomaly::{Anomaly, Metric, Severity};
use crate::models::event::CorrelatedEvent;
use crate::models::incident::{dedup_key, Incident, IncidentStatus};
use crate::models::runbook::RunbookMatch;
use crate::notify::Notifier;
use crate::observability::ObservabilityClient;
use crate::runbooks::match_runbooks;
use crate::store::IncidentStore;

/// A group of anomalies that will become at most one incident.
#[derive(Debug)]
pub(crate) struct Candidate {
    pub anomalies: Vec<Anomaly>,
    /// Formed by intersecting the correlated-event service set; carries the
    /// full event window instead of a per-service slice.
    pub clustered: bool,
}

impl Candidate {
    pub fn services(&self) -> Vec<String> {
        let mut services: Vec<String> =
            self.anomalies.iter().map(|a| a.service.clone()).collect();
        services.sort_unstable();
        services.dedup();
        services
    }

    pub fn metrics(&self) -> Vec<Metric> {
        let mut metrics: Vec<Metric> = self.anomalies.iter().map(|a| a.metric).collect();
        metrics.sort_unstable();
        metrics.dedup();
        metrics
    }

    pub fn severity(&self) -> Severity {
        self.anomalies
            .iter()
            .map(|a| a.severity)
            .fold(Severity::P4, Severity::worst)
    }

    pub fn dedup_key(&self) -> String {
        dedup_key(&self.services(), &self.metrics(), self.severity())
    }
}

/// Split one tick's anomalies into incident candidates. Anomalies whose
/// services appear in the correlated-event set form a single cross-service
/// candidate; the rest group per service. Candidate order follows the
/// deterministic anomaly processing order.
pub(crate) fn group_candidates(
    anomalies: Vec<Anomaly>,
    events: &[CorrelatedEvent],
) -> Vec<Candidate> {
    let event_services: HashSet<&str> = events.iter().map(|e| e.service.as_str()).collect();

    let mut candidates: Vec<Candidate> = Vec::new();
    let mut cluster_idx: Option<usize> = None;
    let mut service_idx: Vec<(String, usize)> = Vec::new();

    for anomaly in anomalies {
        if event_services.contains(anomaly.service.as_str()) {
            match cluster_idx {
                Some(i) => candidates[i].anomalies.push(anomaly),
                None => {
                    cluster_idx = Some(candidates.len());
                    candidates.push(Candidate {
                        anomalies: vec![anomaly],
                        clustered: true,
                    });
                }
            }
        } else {
            let existing = service_idx
                .iter()
                .find(|(s, _)| s == &anomaly.service)
                .map(|&(_, i)| i);
            match existing {
                Some(i) => candidates[i].anomalies.push(anomaly),
                None => {
                    service_idx.push((anomaly.service.clone(), candidates.len()));
                    candidates.push(Candidate {
                        anomalies: vec![anomaly],
                        clustered: false,
                    });
                }
            }
        }
    }
    candidates
}

/// The slice of the event window an incident carries: everything for a
/// clustered candidate, the candidate's own services otherwise.
pub(crate) fn candidate_events(
    candidate: &Candidate,
    events: &[CorrelatedEvent],
) -> Vec<CorrelatedEvent> {
    if candidate.clustered {
        return events.to_vec();
    }
    let services: HashSet<&str> = candidate
        .anomalies
        .iter()
        .map(|a| a.service.as_str())
        .collect();
    events
        .iter()
        .filter(|e| services.contains(e.service.as_str()))
        .cloned()
        .collect()
}

/// Deterministic title when the analyzer produced nothing.
pub(crate) fn fallback_title(candidate: &Candidate) -> String {
    let metrics: Vec<&str> = candidate.metrics().iter().map(|m| m.as_str()).collect();
    format!(
        "{}: {} anomaly on {}",
        candidate.severity(),
        metrics.join(", "),
        candidate.services().join(", ")
    )
}

/// Owns incident creation end to end: grouping, dedup against the store,
/// enrichment, the store commit, and best-effort notification fan-out.
pub struct IncidentManager {
    store: Arc<IncidentStore>,
    analyzer: Option<Analyzer>,
    chat: Option<Box<dyn Notifier>>,
    paging: Option<Box<dyn Notifier>>,
    cfg: IncidentConfig,
}

impl IncidentManager {
    pub fn new(
        store: Arc<IncidentStore>,
        analyzer: Option<Analyzer>,
        chat: Option<Box<dyn Notifier>>,
        paging: Option<Box<dyn Notifier>>,
        cfg: IncidentConfig,
    ) -> Self {
        Self {
            store,
            analyzer,
            chat,
            paging,
            cfg,
        }
    }

    /// Consume one tick's detection output. Returns the number of incidents
    /// created.
    pub async fn process(
        &self,
        obs: &ObservabilityClient,
        anomalies: Vec<Anomaly>,
        events: Vec<CorrelatedEvent>,
        now: DateTime<Utc>,
    ) -> usize {
        let mut created = 0;
        for candidate in group_candidates(anomalies, &events) {
            if self.suppress_duplicate(&candidate, now) {
                continue;
            }

            let runbooks = match_runbooks(obs, &candidate.services(), &candidate.metrics()).await;
            let incident_events = candidate_events(&candidate, &events);
            let analysis = match &self.analyzer {
                Some(analyzer) => {
                    analyzer
                        .analyze(&candidate.anomalies, &incident_events, &runbooks)
                        .await
                }
                None => None,
            };

            let incident = self.build_incident(candidate, incident_events, runbooks, analysis, now);
            tracing::info!(
                "incident {} created: {} [{}] ({} anomalies, {} events, {} runbooks)",
                incident.id,
                incident.title,
                incident.severity,
                incident.anomalies.len(),
                incident.correlated_events.len(),
                incident.matched_runbooks.len(),
            );
            // Commit before notifying: a notifier failure never loses the
            // incident.
            self.store.put(incident.clone());
            created += 1;
            self.dispatch(&incident).await;
        }
        created
    }

    /// Dedup step: an identical grouping within the cooldown window is
    /// suppressed and recorded against the existing incident.
    pub(crate) fn suppress_duplicate(&self, candidate: &Candidate, now: DateTime<Utc>) -> bool {
        let key = candidate.dedup_key();
        let cooldown = Duration::minutes(self.cfg.dedup_cooldown_minutes);
        match self.store.find_active_by_dedup_key(&key, cooldown, now) {
            Some(existing) => {
                self.store.record_dedup_hit(&existing.id, now);
                tracing::info!(
                    "incident suppressed: dedup key matches {} within {}m cooldown",
                    existing.id,
                    self.cfg.dedup_cooldown_minutes,
                );
                true
            }
            None => false,
        }
    }

    pub(crate) fn build_incident(
        &self,
        candidate: Candidate,
        events: Vec<CorrelatedEvent>,
        runbooks: Vec<RunbookMatch>,
        analysis: Option<Analysis>,
        now: DateTime<Utc>,
    ) -> Incident {
        let title = analysis
            .as_ref()
            .map(|a| a.summary.clone())
            .unwrap_or_else(|| fallback_title(&candidate));
        Incident {
            id: self.allocate_id(now),
            created_at: now,
            severity: candidate.severity(),
            title,
            services: candidate.services(),
            dedup_key: candidate.dedup_key(),
            anomalies: candidate.anomalies,
            correlated_events: events,
            matched_runbooks: runbooks,
            analysis,
            status: IncidentStatus::Active,
            last_matched_at: now,
        }
    }

    /// Wallclock-formatted id; same-second collisions take the smallest free
    /// `-n` suffix.
    fn allocate_id(&self, now: DateTime<Utc>) -> String {
        let base = format!("INC-{}", now.format("%Y%m%d%H%M%S"));
        if !self.store.contains_id(&base) {
            return base;
        }
        let mut n = 1u32;
        loop {
            let id = format!("{base}-{n}");
            if !self.store.contains_id(&id) {
                return id;
            }
            n += 1;
        }
    }

    /// Chat first, then paging for the configured severities. Chat failure
    /// never skips paging.
    pub(crate) async fn dispatch(&self, incident: &Incident) {
        if let Some(chat) = &self.chat {
            if let Err(e) = chat.notify(incident).await {
                tracing::warn!("{e}");
            }
        }
        if self.cfg.pagerduty_severities.contains(&incident.severity) {
            if let Some(paging) = &self.paging {
                if let Err(e) = paging.notify(incident).await {
                    tracing::warn!("{e}");
                }
            }
        }
    }
}
