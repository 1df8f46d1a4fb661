use serde::Deserialize;
use std::path::Path;

use crate::error::SentinelError;
use crate::models::anomaly::Severity;

/// Top-level config loaded from `sentinel.toml`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SentinelConfig {
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub correlation: CorrelationConfig,
    #[serde(default)]
    pub incidents: IncidentConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub indexes: IndexConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    #[serde(default = "default_lookback_minutes")]
    pub lookback_minutes: i64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            lookback_minutes: default_lookback_minutes(),
        }
    }
}

fn default_interval_seconds() -> u64 {
    30
}

fn default_lookback_minutes() -> i64 {
    5
}

/// Z-score thresholds, descending: clearing a higher band wins.
#[derive(Debug, Clone, Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_p1")]
    pub p1: f64,
    #[serde(default = "default_p2")]
    pub p2: f64,
    #[serde(default = "default_p3")]
    pub p3: f64,
    #[serde(default = "default_p4")]
    pub p4: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            p1: default_p1(),
            p2: default_p2(),
            p3: default_p3(),
            p4: default_p4(),
        }
    }
}

impl Thresholds {
    /// Highest severity band the z-score clears, inclusive at the boundary.
    /// Below the P4 threshold there is no anomaly.
    pub fn classify(&self, z: f64) -> Option<Severity> {
        if z >= self.p1 {
            Some(Severity::P1)
        } else if z >= self.p2 {
            Some(Severity::P2)
        } else if z >= self.p3 {
            Some(Severity::P3)
        } else if z >= self.p4 {
            Some(Severity::P4)
        } else {
            None
        }
    }
}

fn default_p1() -> f64 {
    5.0
}

fn default_p2() -> f64 {
    3.5
}

fn default_p3() -> f64 {
    2.5
}

fn default_p4() -> f64 {
    2.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default = "default_baseline_window")]
    pub baseline_window_minutes: i64,
    #[serde(default = "default_min_data_points")]
    pub min_data_points: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            baseline_window_minutes: default_baseline_window(),
            min_data_points: default_min_data_points(),
        }
    }
}

fn default_baseline_window() -> i64 {
    60
}

fn default_min_data_points() -> usize {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorrelationConfig {
    #[serde(default = "default_correlation_window")]
    pub window_minutes: i64,
    #[serde(default = "default_max_events")]
    pub max_events: usize,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            window_minutes: default_correlation_window(),
            max_events: default_max_events(),
        }
    }
}

fn default_correlation_window() -> i64 {
    5
}

fn default_max_events() -> usize {
    50
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncidentConfig {
    #[serde(default = "default_dedup_cooldown")]
    pub dedup_cooldown_minutes: i64,
    #[serde(default = "default_pagerduty_severities")]
    pub pagerduty_severities: Vec<Severity>,
    #[serde(default = "default_max_incidents")]
    pub max_incidents: usize,
}

impl Default for IncidentConfig {
    fn default() -> Self {
        Self {
            dedup_cooldown_minutes: default_dedup_cooldown(),
            pagerduty_severities: default_pagerduty_severities(),
            max_incidents: default_max_incidents(),
        }
    }
}

fn default_dedup_cooldown() -> i64 {
    30
}

fn default_pagerduty_severities() -> Vec<Severity> {
    vec![Severity::P1, Severity::P2]
}

fn default_max_incidents() -> usize {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzerConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_analyzer_timeout")]
    pub timeout_seconds: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tokens: default_max_tokens(),
            timeout_seconds: default_analyzer_timeout(),
        }
    }
}

fn default_model() -> String {
    // Opaque identifier, passed through to the endpoint unvalidated.
    "claude-sonnet-4-6".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_analyzer_timeout() -> u64 {
    30
}

/// Backend table names for the three document indexes.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_logs_index")]
    pub logs: String,
    #[serde(default = "default_metrics_index")]
    pub metrics: String,
    #[serde(default = "default_runbooks_index")]
    pub runbooks: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            logs: default_logs_index(),
            metrics: default_metrics_index(),
            runbooks: default_runbooks_index(),
        }
    }
}

fn default_logs_index() -> String {
    "app_logs".to_string()
}

fn default_metrics_index() -> String {
    "app_metrics".to_string()
}

fn default_runbooks_index() -> String {
    "runbooks".to_string()
}

impl SentinelConfig {
    /// Load config from a TOML file. Returns defaults if the file doesn't
    /// exist. Malformed or inconsistent config is fatal.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SentinelError> {
        let path = path.as_ref();
        let config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| SentinelError::Config(format!("{}: {e}", path.display())))?;
            let config: SentinelConfig = toml::from_str(&contents)
                .map_err(|e| SentinelError::Config(format!("{}: {e}", path.display())))?;
            tracing::info!("loaded config from {}", path.display());
            config
        } else {
            tracing::info!("config file not found at {}, using defaults", path.display());
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), SentinelError> {
        if self.polling.interval_seconds == 0 {
            return Err(SentinelError::Config(
                "polling.interval_seconds must be positive".into(),
            ));
        }
        if self.polling.lookback_minutes <= 0 || self.detection.baseline_window_minutes <= 0 {
            return Err(SentinelError::Config(
                "lookback and baseline windows must be positive".into(),
            ));
        }
        let t = &self.detection.thresholds;
        if !(t.p1 > t.p2 && t.p2 > t.p3 && t.p3 > t.p4) {
            return Err(SentinelError::Config(format!(
                "detection.thresholds must be strictly descending (p1={} p2={} p3={} p4={})",
                t.p1, t.p2, t.p3, t.p4
            )));
        }
        if t.p4 <= 0.0 {
            return Err(SentinelError::Config(
                "detection.thresholds.p4 must be positive".into(),
            ));
        }
        if self.correlation.window_minutes <= 0 || self.correlation.max_events == 0 {
            return Err(SentinelError::Config(
                "correlation window and max_events must be positive".into(),
            ));
        }
        if self.incidents.dedup_cooldown_minutes <= 0 || self.incidents.max_incidents == 0 {
            return Err(SentinelError::Config(
                "incidents.dedup_cooldown_minutes and max_incidents must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = SentinelConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.polling.interval_seconds, 30);
        assert_eq!(cfg.detection.baseline_window_minutes, 60);
        assert_eq!(cfg.detection.min_data_points, 10);
        assert_eq!(cfg.incidents.max_incidents, 1000);
        assert_eq!(
            cfg.incidents.pagerduty_severities,
            vec![Severity::P1, Severity::P2]
        );
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let cfg: SentinelConfig = toml::from_str(
            r#"
            [polling]
            interval_seconds = 15

            [detection.thresholds]
            p1 = 6.0

            [incidents]
            pagerduty_severities = ["P1"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.polling.interval_seconds, 15);
        assert_eq!(cfg.polling.lookback_minutes, 5);
        assert_eq!(cfg.detection.thresholds.p1, 6.0);
        assert_eq!(cfg.detection.thresholds.p4, 2.0);
        assert_eq!(cfg.incidents.pagerduty_severities, vec![Severity::P1]);
        assert_eq!(cfg.indexes.logs, "app_logs");
    }

    #[test]
    fn rejects_non_descending_thresholds() {
        let mut cfg = SentinelConfig::default();
        cfg.detection.thresholds.p2 = cfg.detection.thresholds.p1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn classify_is_inclusive_at_band_edges() {
        let t = Thresholds::default();
        assert_eq!(t.classify(5.0), Some(Severity::P1));
        assert_eq!(t.classify(4.99), Some(Severity::P2));
        assert_eq!(t.classify(3.5), Some(Severity::P2));
        assert_eq!(t.classify(2.5), Some(Severity::P3));
        assert_eq!(t.classify(2.0), Some(Severity::P4));
        assert_eq!(t.classify(1.999), None);
    }
}
