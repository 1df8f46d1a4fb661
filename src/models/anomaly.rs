use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two metrics the detector watches per service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    ErrorRate,
    LatencyP99,
}

impl Metric {
    pub const ALL: [Metric; 2] = [Metric::ErrorRate, Metric::LatencyP99];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::ErrorRate => "error_rate",
            Metric::LatencyP99 => "latency_p99",
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Incident priority, P1 most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    P1,
    P2,
    P3,
    P4,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::P1 => "P1",
            Severity::P2 => "P2",
            Severity::P3 => "P3",
            Severity::P4 => "P4",
        }
    }

    /// The more severe of two priorities. P1 sorts lowest in derived order,
    /// so "worst" is `min`.
    pub fn worst(self, other: Severity) -> Severity {
        self.min(other)
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "P1" => Ok(Severity::P1),
            "P2" => Ok(Severity::P2),
            "P3" => Ok(Severity::P3),
            "P4" => Ok(Severity::P4),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

/// A statistical deviation of one metric of one service in the current
/// lookback window. Immutable after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub service: String,
    pub metric: Metric,
    pub current_value: f64,
    pub baseline_mean: f64,
    pub baseline_stddev: f64,
    pub z_score: f64,
    pub severity: Severity,
    pub detected_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_count: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worst_severity_is_p1() {
        assert_eq!(Severity::P1.worst(Severity::P3), Severity::P1);
        assert_eq!(Severity::P4.worst(Severity::P2), Severity::P2);
        assert_eq!(Severity::P3.worst(Severity::P3), Severity::P3);
    }

    #[test]
    fn severity_round_trips_through_str() {
        for s in [Severity::P1, Severity::P2, Severity::P3, Severity::P4] {
            assert_eq!(s.as_str().parse::<Severity>().unwrap(), s);
        }
        assert!("P5".parse::<Severity>().is_err());
    }

    #[test]
    fn metric_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&Metric::ErrorRate).unwrap(),
            "\"error_rate\""
        );
        assert_eq!(
            serde_json::to_string(&Metric::LatencyP99).unwrap(),
            "\"latency_p99\""
        );
    }
}
