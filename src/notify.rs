use async_trait::async_trait;

use crate::error::SentinelError;
use crate::models::anomaly::Severity;
use crate::models::incident::Incident;

const PAGERDUTY_EVENTS_URL: &str = "https://events.pagerduty.com/v2/enqueue";

/// One outbound notification channel. Dispatch is best-effort: the incident
/// is already committed to the store before any notifier runs.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;
    async fn notify(&self, incident: &Incident) -> Result<(), SentinelError>;
}

/// Chat channel: a Slack-style incoming webhook receiving every incident.
pub struct SlackNotifier {
    http: reqwest::Client,
    webhook_url: String,
}

impl SlackNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            webhook_url: webhook_url.into(),
        }
    }

    pub fn from_env() -> Option<Self> {
        std::env::var("SLACK_WEBHOOK_URL").ok().map(Self::new)
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    fn name(&self) -> &'static str {
        "slack"
    }

    async fn notify(&self, incident: &Incident) -> Result<(), SentinelError> {
        let payload = serde_json::json!({ "text": format_chat_message(incident) });
        let resp = self
            .http
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| SentinelError::Notifier {
                channel: self.name().to_string(),
                reason: e.to_string(),
            })?;
        if !resp.status().is_success() {
            return Err(SentinelError::Notifier {
                channel: self.name().to_string(),
                reason: format!("webhook returned {}", resp.status()),
            });
        }
        Ok(())
    }
}

/// Paging channel: PagerDuty Events API v2, high severities only (the
/// incident manager applies the severity filter).
pub struct PagerDutyNotifier {
    http: reqwest::Client,
    api_url: String,
    routing_key: String,
}

impl PagerDutyNotifier {
    pub fn new(api_url: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.into(),
            routing_key: routing_key.into(),
        }
    }

    pub fn from_env() -> Option<Self> {
        let routing_key = std::env::var("PAGERDUTY_ROUTING_KEY").ok()?;
        Some(Self::new(PAGERDUTY_EVENTS_URL, routing_key))
    }
}

#[async_trait]
impl Notifier for PagerDutyNotifier {
    fn name(&self) -> &'static str {
        "pagerduty"
    }

    async fn notify(&self, incident: &Incident) -> Result<(), SentinelError> {
        let payload = serde_json::json!({
            "routing_key": self.routing_key,
            "event_action": "trigger",
            "dedup_key": incident.dedup_key,
            "payload": {
                "summary": incident.title,
                "source": incident.services.join(","),
                "severity": pagerduty_severity(incident.severity),
                "custom_details": {
                    "incident_id": incident.id,
                    "services": incident.services,
                    "anomaly_count": incident.anomalies.len(),
                },
            },
        });
        let resp = self
            .http
            .post(&self.api_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| SentinelError::Notifier {
                channel: self.name().to_string(),
                reason: e.to_string(),
            })?;
        if !resp.status().is_success() {
            return Err(SentinelError::Notifier {
                channel: self.name().to_string(),
                reason: format!("events API returned {}", resp.status()),
            });
        }
        Ok(())
    }
}

fn pagerduty_severity(severity: Severity) -> &'static str {
    match severity {
        Severity::P1 => "critical",
        Severity::P2 => "error",
        Severity::P3 => "warning",
        Severity::P4 => "info",
    }
}

/// Human-readable incident digest for the chat channel: title, anomaly
/// numbers, and remediation steps when the analysis produced any.
pub(crate) fn format_chat_message(incident: &Incident) -> String {
    let mut msg = format!(
        ":rotating_light: *{}* [{}] {}\nServices: {}\n",
        incident.id,
        incident.severity,
        incident.title,
        incident.services.join(", ")
    );
    for a in &incident.anomalies {
        msg.push_str(&format!(
            "• {} {}: {:.2} vs baseline {:.2}±{:.2} (z={:.1})\n",
            a.service, a.metric, a.current_value, a.baseline_mean, a.baseline_stddev, a.z_score
        ));
    }
    if let Some(analysis) = &incident.analysis {
        if !analysis.root_cause.is_empty() {
            msg.push_str(&format!("Likely cause: {}\n", analysis.root_cause));
        }
        if !analysis.remediation_steps.is_empty() {
            msg.push_str("Remediation:\n");
            for (i, step) in analysis.remediation_steps.iter().enumerate() {
                msg.push_str(&format!("{}. {step}\n", i + 1));
            }
        }
    }
    msg
}
