use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    #[default]
    Low,
}

/// Structured output of the language-model analyzer. Parsing is tolerant:
/// unknown keys are ignored and missing optional keys fall back to defaults,
/// but an empty `summary` rejects the whole analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub summary: String,
    #[serde(default)]
    pub root_cause: String,
    #[serde(default)]
    pub confidence: Confidence,
    #[serde(default)]
    pub affected_services: Vec<String>,
    #[serde(default)]
    pub remediation_steps: Vec<String>,
}
