use chrono::{DateTime, Duration, Utc};
use futures_util::future::join_all;

use crate::config::{DetectionConfig, SentinelConfig};
use crate::error::SentinelError;
use crate::models::anomaly::{Anomaly, Metric};
use crate::observability::ObservabilityClient;

/// One pipeline tick's detection pass: for every active service and metric,
/// compare the lookback window against the rolling baseline that ends where
/// the lookback begins. Results come back ordered (service, metric) so ticks
/// are reproducible.
pub async fn detect_anomalies(
    obs: &ObservabilityClient,
    cfg: &SentinelConfig,
    now: DateTime<Utc>,
) -> Result<Vec<Anomaly>, SentinelError> {
    let lookback_start = now - Duration::minutes(cfg.polling.lookback_minutes);
    let baseline_start = lookback_start - Duration::minutes(cfg.detection.baseline_window_minutes);

    let services = obs
        .distinct_services(baseline_start, now)
        .await
        .map_err(|e| SentinelError::BackendUnavailable(e.to_string()))?;
    if services.is_empty() {
        tracing::debug!("detector: no active services in window");
        return Ok(vec![]);
    }

    let evaluations = services.iter().map(|service| {
        evaluate_service(obs, cfg, service, baseline_start, lookback_start, now)
    });
    let per_service = join_all(evaluations).await;

    let mut anomalies = Vec::new();
    let mut queries = 0usize;
    let mut failures = 0usize;
    for results in per_service {
        for result in results {
            queries += 1;
            match result {
                Ok(Some(anomaly)) => anomalies.push(anomaly),
                Ok(None) => {}
                Err(_) => failures += 1,
            }
        }
    }

    // A wholesale outage aborts the tick; partial failures were already
    // logged per pair and the tick continues.
    if queries > 0 && failures == queries {
        return Err(SentinelError::BackendUnavailable(format!(
            "all {queries} detector queries failed"
        )));
    }

    tracing::info!(
        "detector: {} service(s) evaluated, {} anomaly(s)",
        services.len(),
        anomalies.len(),
    );
    Ok(anomalies)
}

async fn evaluate_service(
    obs: &ObservabilityClient,
    cfg: &SentinelConfig,
    service: &str,
    baseline_start: DateTime<Utc>,
    lookback_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Vec<Result<Option<Anomaly>, SentinelError>> {
    let mut out = Vec::with_capacity(Metric::ALL.len());
    for metric in Metric::ALL {
        let result = evaluate_service_metric(
            obs,
            cfg,
            service,
            metric,
            baseline_start,
            lookback_start,
            now,
        )
        .await;
        if let Err(e) = &result {
            tracing::warn!("detector: {service}/{metric}: query failed, skipping: {e}");
        }
        out.push(result);
    }
    out
}

async fn evaluate_service_metric(
    obs: &ObservabilityClient,
    cfg: &SentinelConfig,
    service: &str,
    metric: Metric,
    baseline_start: DateTime<Utc>,
    lookback_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Option<Anomaly>, SentinelError> {
    let baseline = retry_once(|| obs.metric_series(service, metric, baseline_start, lookback_start))
        .await?;
    let Some(current) =
        retry_once(|| obs.metric_aggregate(service, metric, lookback_start, now)).await?
    else {
        return Ok(None);
    };
    Ok(evaluate_metric(
        service,
        metric,
        &baseline,
        current,
        &cfg.detection,
        now,
    ))
}

/// One retry per transient backend error, then the error propagates to the
/// caller to be skipped.
async fn retry_once<T, F, Fut>(mut query: F) -> Result<T, SentinelError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SentinelError>>,
{
    match query().await {
        Ok(v) => Ok(v),
        Err(first) => {
            tracing::debug!("detector: retrying after transient backend error: {first}");
            query().await
        }
    }
}

/// Mean and population standard deviation of the non-null baseline buckets.
pub(crate) fn baseline_stats(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Standard-deviations distance above the baseline mean. Negative deviations
/// are not anomalies, and a zero-variance baseline yields no signal at all.
pub(crate) fn zscore(current: f64, mean: f64, stddev: f64) -> f64 {
    if stddev == 0.0 {
        return 0.0;
    }
    ((current - mean) / stddev).max(0.0)
}

/// Pure decision for one service-metric pair. `baseline` holds the non-null
/// per-minute bucket values of the baseline window.
pub(crate) fn evaluate_metric(
    service: &str,
    metric: Metric,
    baseline: &[f64],
    current: f64,
    detection: &DetectionConfig,
    now: DateTime<Utc>,
) -> Option<Anomaly> {
    if baseline.len() < detection.min_data_points {
        tracing::debug!(
            "detector: {service}/{metric}: only {} baseline bucket(s), need {}",
            baseline.len(),
            detection.min_data_points
        );
        return None;
    }

    let (mean, stddev) = baseline_stats(baseline);
    let z = zscore(current, mean, stddev);
    let severity = detection.thresholds.classify(z)?;

    tracing::info!(
        "detector: {service}/{metric}: current={current:.2} baseline={mean:.2}±{stddev:.2} z={z:.1} severity={severity}"
    );
    Some(Anomaly {
        service: service.to_string(),
        metric,
        current_value: current,
        baseline_mean: mean,
        baseline_stddev: stddev,
        z_score: z,
        severity,
        detected_at: now,
        sample_count: Some(baseline.len()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::anomaly::Severity;

    fn detection() -> DetectionConfig {
        DetectionConfig::default()
    }

    /// 60 buckets alternating 1 and 3: mean 2, population stddev 1.
    fn steady_baseline() -> Vec<f64> {
        (0..60).map(|i| if i % 2 == 0 { 1.0 } else { 3.0 }).collect()
    }

    #[test]
    fn baseline_stats_mean_and_stddev() {
        let (mean, stddev) = baseline_stats(&steady_baseline());
        assert!((mean - 2.0).abs() < 1e-9);
        assert!((stddev - 1.0).abs() < 1e-9);

        let (mean, stddev) = baseline_stats(&[]);
        assert_eq!((mean, stddev), (0.0, 0.0));
    }

    #[test]
    fn zscore_clamps_negative_deviation() {
        assert_eq!(zscore(1.0, 5.0, 2.0), 0.0);
        assert!((zscore(9.0, 5.0, 2.0) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn zero_stddev_yields_zero_zscore() {
        assert_eq!(zscore(100.0, 2.0, 0.0), 0.0);
        // Flat baseline, huge spike: discarded rather than divided by zero.
        let flat = vec![2.0; 60];
        let anomaly = evaluate_metric(
            "payment-service",
            Metric::ErrorRate,
            &flat,
            100.0,
            &detection(),
            Utc::now(),
        );
        assert!(anomaly.is_none());
    }

    #[test]
    fn error_spike_is_p1() {
        let anomaly = evaluate_metric(
            "payment-service",
            Metric::ErrorRate,
            &steady_baseline(),
            50.0,
            &detection(),
            Utc::now(),
        )
        .expect("spike must be anomalous");
        assert_eq!(anomaly.service, "payment-service");
        assert_eq!(anomaly.metric, Metric::ErrorRate);
        assert!((anomaly.z_score - 48.0).abs() < 1e-9);
        assert_eq!(anomaly.severity, Severity::P1);
        assert_eq!(anomaly.sample_count, Some(60));
    }

    #[test]
    fn sparse_baseline_is_suppressed() {
        // 6 non-null buckets with min_data_points=10: the spike is ignored.
        let sparse = vec![2.0, 1.0, 3.0, 2.0, 1.0, 3.0];
        let anomaly = evaluate_metric(
            "payment-service",
            Metric::ErrorRate,
            &sparse,
            500.0,
            &detection(),
            Utc::now(),
        );
        assert!(anomaly.is_none());
    }

    #[test]
    fn severity_transitions_at_threshold_boundaries() {
        let baseline = steady_baseline(); // mean 2, stddev 1
        let cases = [
            (3.99, None),
            (4.0, Some(Severity::P4)),  // z = 2.0
            (4.5, Some(Severity::P3)),  // z = 2.5
            (5.5, Some(Severity::P2)),  // z = 3.5
            (7.0, Some(Severity::P1)),  // z = 5.0
            (12.0, Some(Severity::P1)), // z = 10.0
        ];
        for (current, expected) in cases {
            let got = evaluate_metric(
                "svc",
                Metric::LatencyP99,
                &baseline,
                current,
                &detection(),
                Utc::now(),
            )
            .map(|a| a.severity);
            assert_eq!(got, expected, "current={current}");
        }
    }
}
