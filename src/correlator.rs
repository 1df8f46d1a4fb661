use chrono::Duration;
use std::collections::HashSet;

use crate::config::CorrelationConfig;
use crate::models::anomaly::Anomaly;
use crate::models::event::CorrelatedEvent;
use crate::observability::ObservabilityClient;

/// Related error/warning events across all services within ±window of the
/// earliest anomaly. Failure degrades to an empty list after one retry; the
/// incident proceeds without correlated evidence.
pub async fn correlate(
    obs: &ObservabilityClient,
    anomalies: &[Anomaly],
    cfg: &CorrelationConfig,
) -> Vec<CorrelatedEvent> {
    let Some(pivot) = anomalies.iter().map(|a| a.detected_at).min() else {
        return vec![];
    };
    let window = Duration::minutes(cfg.window_minutes);
    let (from, to) = (pivot - window, pivot + window);

    // Over-fetch so post-dedup truncation still fills max_events.
    let fetch_limit = cfg.max_events * 2;
    let raw = match obs.error_events(from, to, fetch_limit).await {
        Ok(events) => events,
        Err(first) => {
            tracing::debug!("correlator: retrying after transient backend error: {first}");
            match obs.error_events(from, to, fetch_limit).await {
                Ok(events) => events,
                Err(e) => {
                    tracing::warn!("correlator: event query failed, continuing without: {e}");
                    return vec![];
                }
            }
        }
    };

    let events = normalize_events(raw, cfg.max_events);
    tracing::debug!(
        "correlator: {} event(s) in ±{}m window around {}",
        events.len(),
        cfg.window_minutes,
        pivot
    );
    events
}

/// Dedup by (timestamp, service, message), then stable (timestamp, service)
/// order, then deterministic truncation to the chronologically-first
/// `max_events`.
pub(crate) fn normalize_events(
    raw: Vec<CorrelatedEvent>,
    max_events: usize,
) -> Vec<CorrelatedEvent> {
    let mut seen = HashSet::new();
    let mut events: Vec<CorrelatedEvent> = raw
        .into_iter()
        .filter(|e| seen.insert((e.timestamp, e.service.clone(), e.message.clone())))
        .collect();
    events.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.service.cmp(&b.service))
    });
    events.truncate(max_events);
    events
}
