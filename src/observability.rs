use chrono::{DateTime, Utc};
use clickhouse::Client;

use crate::config::IndexConfig;
use crate::error::SentinelError;
use crate::models::anomaly::Metric;
use crate::models::event::{CorrelatedEvent, EventLevel};
use crate::models::runbook::RunbookMatch;

#[derive(clickhouse::Row, serde::Deserialize)]
struct PingRow {
    #[allow(dead_code)]
    one: u8,
}

#[derive(clickhouse::Row, serde::Deserialize)]
struct ServiceRow {
    service: String,
}

#[derive(clickhouse::Row, serde::Deserialize)]
struct SeriesBucket {
    #[allow(dead_code)]
    bucket: u32,
    value: f64,
}

#[derive(clickhouse::Row, serde::Deserialize)]
struct AggregateRow {
    samples: u64,
    value: f64,
}

#[derive(clickhouse::Row, serde::Deserialize)]
struct EventRow {
    ts: u32,
    service: String,
    level: String,
    message: String,
    trace_id: String,
    status_code: u16,
}

#[derive(clickhouse::Row, serde::Deserialize)]
struct RunbookRow {
    title: String,
    incident_date: u32,
    services_affected: Vec<String>,
    root_cause: String,
    resolution_steps: Vec<String>,
    tags: Vec<String>,
    score: f64,
}

fn escape(s: &str) -> String {
    s.replace('\'', "''")
}

fn fmt_ts(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn quoted_list(items: &[String]) -> String {
    items
        .iter()
        .map(|s| format!("'{}'", escape(s)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Stateless query adapter over the document-store backend. Log and request
/// documents live in separate tables; runbooks in a third. All queries are
/// time-bounded.
#[derive(Clone)]
pub struct ObservabilityClient {
    ch: Client,
    indexes: IndexConfig,
}

impl ObservabilityClient {
    pub fn new(ch: Client, indexes: IndexConfig) -> Self {
        Self { ch, indexes }
    }

    /// Startup connectivity probe.
    pub async fn ping(&self) -> Result<(), SentinelError> {
        self.ch
            .query("SELECT toUInt8(1) AS one")
            .fetch_one::<PingRow>()
            .await?;
        Ok(())
    }

    /// Distinct service ids with any log or request activity in the window.
    pub async fn distinct_services(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<String>, SentinelError> {
        let (from, to) = (fmt_ts(from), fmt_ts(to));
        let sql = format!(
            "SELECT DISTINCT service FROM ( \
                SELECT service FROM {metrics} \
                WHERE timestamp >= parseDateTimeBestEffort('{from}') \
                  AND timestamp <= parseDateTimeBestEffort('{to}') \
                UNION ALL \
                SELECT service FROM {logs} \
                WHERE timestamp >= parseDateTimeBestEffort('{from}') \
                  AND timestamp <= parseDateTimeBestEffort('{to}') \
             ) ORDER BY service",
            metrics = self.indexes.metrics,
            logs = self.indexes.logs,
        );
        let rows = self.ch.query(&sql).fetch_all::<ServiceRow>().await?;
        Ok(rows.into_iter().map(|r| r.service).collect())
    }

    /// Per-minute bucketed series for one service and metric. Minutes with no
    /// documents produce no bucket; callers treat absent buckets as null.
    pub async fn metric_series(
        &self,
        service: &str,
        metric: Metric,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<f64>, SentinelError> {
        let (from, to) = (fmt_ts(from), fmt_ts(to));
        let service = escape(service);
        let sql = match metric {
            Metric::ErrorRate => format!(
                "SELECT toUnixTimestamp(toStartOfMinute(timestamp)) AS bucket, \
                        toFloat64(countIf(level = 'error')) AS value \
                 FROM {logs} \
                 WHERE service = '{service}' \
                   AND timestamp >= parseDateTimeBestEffort('{from}') \
                   AND timestamp < parseDateTimeBestEffort('{to}') \
                 GROUP BY bucket ORDER BY bucket",
                logs = self.indexes.logs,
            ),
            Metric::LatencyP99 => format!(
                "SELECT toUnixTimestamp(toStartOfMinute(timestamp)) AS bucket, \
                        quantile(0.99)(duration_ms) AS value \
                 FROM {metrics} \
                 WHERE service = '{service}' \
                   AND timestamp >= parseDateTimeBestEffort('{from}') \
                   AND timestamp < parseDateTimeBestEffort('{to}') \
                 GROUP BY bucket ORDER BY bucket",
                metrics = self.indexes.metrics,
            ),
        };
        let rows = self.ch.query(&sql).fetch_all::<SeriesBucket>().await?;
        Ok(rows.into_iter().map(|r| r.value).collect())
    }

    /// Aggregate value of one metric over the lookback window. `None` means
    /// the window had no documents to aggregate.
    pub async fn metric_aggregate(
        &self,
        service: &str,
        metric: Metric,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<f64>, SentinelError> {
        let (from, to) = (fmt_ts(from), fmt_ts(to));
        let service = escape(service);
        let sql = match metric {
            Metric::ErrorRate => format!(
                "SELECT count() AS samples, toFloat64(countIf(level = 'error')) AS value \
                 FROM {logs} \
                 WHERE service = '{service}' \
                   AND timestamp >= parseDateTimeBestEffort('{from}') \
                   AND timestamp <= parseDateTimeBestEffort('{to}')",
                logs = self.indexes.logs,
            ),
            Metric::LatencyP99 => format!(
                "SELECT count() AS samples, quantile(0.99)(duration_ms) AS value \
                 FROM {metrics} \
                 WHERE service = '{service}' \
                   AND timestamp >= parseDateTimeBestEffort('{from}') \
                   AND timestamp <= parseDateTimeBestEffort('{to}')",
                metrics = self.indexes.metrics,
            ),
        };
        let row = self.ch.query(&sql).fetch_one::<AggregateRow>().await?;
        if row.samples == 0 {
            return Ok(None);
        }
        Ok(Some(row.value))
    }

    /// Error and warning documents across all services in the window,
    /// timestamp ascending with service as tiebreaker. Malformed documents
    /// are logged and skipped, never aborting the query.
    pub async fn error_events(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CorrelatedEvent>, SentinelError> {
        let (from, to) = (fmt_ts(from), fmt_ts(to));
        let sql = format!(
            "SELECT toUnixTimestamp(timestamp) AS ts, \
                    service, level, message, trace_id, \
                    toUInt16(status_code) AS status_code \
             FROM {logs} \
             WHERE level IN ('error', 'warn') \
               AND timestamp >= parseDateTimeBestEffort('{from}') \
               AND timestamp <= parseDateTimeBestEffort('{to}') \
             ORDER BY ts ASC, service ASC \
             LIMIT {limit}",
            logs = self.indexes.logs,
        );
        let rows = self.ch.query(&sql).fetch_all::<EventRow>().await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(timestamp) = DateTime::from_timestamp(row.ts as i64, 0) else {
                tracing::warn!(
                    "{}",
                    SentinelError::MalformedDocument(format!(
                        "log document with unrepresentable timestamp {} (service={})",
                        row.ts, row.service
                    ))
                );
                continue;
            };
            let Some(level) = EventLevel::parse(&row.level) else {
                tracing::warn!(
                    "{}",
                    SentinelError::MalformedDocument(format!(
                        "log document with unknown level '{}' (service={})",
                        row.level, row.service
                    ))
                );
                continue;
            };
            events.push(CorrelatedEvent {
                timestamp,
                service: row.service,
                level,
                message: row.message,
                trace_id: (!row.trace_id.is_empty()).then_some(row.trace_id),
                status_code: (row.status_code != 0).then_some(row.status_code),
            });
        }
        Ok(events)
    }

    /// Runbook entries whose affected services or tags overlap the query,
    /// scored by the backend (service overlap weighs double), relevance
    /// descending then incident date descending.
    pub async fn search_runbooks(
        &self,
        services: &[String],
        tags: &[String],
        limit: usize,
    ) -> Result<Vec<RunbookMatch>, SentinelError> {
        if services.is_empty() && tags.is_empty() {
            return Ok(vec![]);
        }
        let services = quoted_list(services);
        let tags = quoted_list(tags);
        let sql = format!(
            "SELECT title, toUnixTimestamp(incident_date) AS incident_date, \
                    services_affected, root_cause, resolution_steps, tags, \
                    toFloat64(length(arrayIntersect(services_affected, [{services}])) * 2 \
                              + length(arrayIntersect(tags, [{tags}]))) AS score \
             FROM {runbooks} \
             WHERE hasAny(services_affected, [{services}]) OR hasAny(tags, [{tags}]) \
             ORDER BY score DESC, incident_date DESC \
             LIMIT {limit}",
            runbooks = self.indexes.runbooks,
        );
        let rows = self.ch.query(&sql).fetch_all::<RunbookRow>().await?;
        Ok(rows
            .into_iter()
            .filter_map(|r| {
                let incident_date = DateTime::from_timestamp(r.incident_date as i64, 0)?;
                Some(RunbookMatch {
                    title: r.title,
                    incident_date,
                    services_affected: r.services_affected,
                    root_cause: r.root_cause,
                    resolution_steps: r.resolution_steps,
                    tags: r.tags,
                    score: r.score,
                })
            })
            .collect())
    }
}
