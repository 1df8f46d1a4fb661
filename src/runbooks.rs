use crate::models::anomaly::Metric;
use crate::models::runbook::RunbookMatch;
use crate::observability::ObservabilityClient;

pub(crate) const MAX_RUNBOOK_MATCHES: usize = 3;

/// Historical runbook entries whose affected services or metric tags overlap
/// the incident candidate. A missing index or query error degrades to an
/// empty list; runbook lookup never aborts the pipeline.
pub async fn match_runbooks(
    obs: &ObservabilityClient,
    services: &[String],
    metrics: &[Metric],
) -> Vec<RunbookMatch> {
    let tags: Vec<String> = metrics.iter().map(|m| m.as_str().to_string()).collect();
    match obs
        .search_runbooks(services, &tags, MAX_RUNBOOK_MATCHES)
        .await
    {
        Ok(matches) => rank(matches),
        Err(e) => {
            tracing::warn!("runbooks: search failed, continuing without history: {e}");
            vec![]
        }
    }
}

/// Relevance descending, incident date descending as tiebreaker, capped at
/// the top K. The backend already ranks; this re-asserts the contract
/// locally.
pub(crate) fn rank(mut matches: Vec<RunbookMatch>) -> Vec<RunbookMatch> {
    matches.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.incident_date.cmp(&a.incident_date))
    });
    matches.truncate(MAX_RUNBOOK_MATCHES);
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn runbook(title: &str, score: f64, day: u32) -> RunbookMatch {
        RunbookMatch {
            title: title.to_string(),
            incident_date: Utc.with_ymd_and_hms(2025, 6, day, 0, 0, 0).unwrap(),
            services_affected: vec!["payment".into()],
            root_cause: "connection pool exhaustion".to_string(),
            resolution_steps: vec!["scale the pool".to_string()],
            tags: vec!["error_rate".into()],
            score,
        }
    }

    #[test]
    fn ranking_is_score_then_recency() {
        let ranked = rank(vec![
            runbook("older-high", 4.0, 1),
            runbook("low", 1.0, 20),
            runbook("newer-high", 4.0, 10),
        ]);
        let titles: Vec<&str> = ranked.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["newer-high", "older-high", "low"]);
    }

    #[test]
    fn ranking_caps_at_top_k() {
        let ranked = rank((0..6).map(|i| runbook("rb", i as f64, 1)).collect());
        assert_eq!(ranked.len(), MAX_RUNBOOK_MATCHES);
        assert_eq!(ranked[0].score, 5.0);
    }
}
