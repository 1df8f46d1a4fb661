use std::time::Duration;

use crate::config::AnalyzerConfig;
use crate::error::SentinelError;
use crate::models::analysis::Analysis;
use crate::models::anomaly::Anomaly;
use crate::models::event::CorrelatedEvent;
use crate::models::runbook::RunbookMatch;

/// Character budget for correlated events rendered into the prompt.
const EVENT_CHAR_BUDGET: usize = 4000;

/// Maximum length of the analysis summary used as an incident title.
const SUMMARY_MAX_CHARS: usize = 120;

const SYSTEM_PROMPT: &str = "You are an incident-response engineer analyzing a production anomaly. \
    Given anomaly statistics, correlated log events, and historical runbooks, respond with a single \
    JSON object and nothing else, using exactly these keys:\n\
    {\"summary\": \"one-sentence incident title (max 120 chars)\", \
    \"root_cause\": \"most likely root cause\", \
    \"confidence\": \"high|medium|low\", \
    \"affected_services\": [\"service\", ...], \
    \"remediation_steps\": [\"step\", ...]}\n\
    Be specific: reference services, metrics, and log evidence.";

/// One-shot language-model enrichment. Holds the single in-flight request
/// budget for a tick; never retries. Any failure degrades to a null analysis
/// and the incident proceeds without it.
pub struct Analyzer {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    timeout: Duration,
}

impl Analyzer {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, cfg: &AnalyzerConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: cfg.model.clone(),
            max_tokens: cfg.max_tokens,
            timeout: Duration::from_secs(cfg.timeout_seconds),
        }
    }

    /// Build from `LLM_BASE_URL`/`LLM_API_KEY`. Returns `None` when no key is
    /// configured; incidents are then created unenriched.
    pub fn from_env(cfg: &AnalyzerConfig) -> Option<Self> {
        let api_key = std::env::var("LLM_API_KEY").ok()?;
        let base_url = std::env::var("LLM_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com".to_string());
        Some(Self::new(base_url, api_key, cfg))
    }

    pub async fn analyze(
        &self,
        anomalies: &[Anomaly],
        events: &[CorrelatedEvent],
        runbooks: &[RunbookMatch],
    ) -> Option<Analysis> {
        match self.request(anomalies, events, runbooks).await {
            Ok(analysis) => analysis,
            Err(e) => {
                tracing::warn!("{}", SentinelError::Analyzer(e.to_string()));
                None
            }
        }
    }

    async fn request(
        &self,
        anomalies: &[Anomaly],
        events: &[CorrelatedEvent],
        runbooks: &[RunbookMatch],
    ) -> anyhow::Result<Option<Analysis>> {
        let url = format!(
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        );
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": build_user_prompt(anomalies, events, runbooks) }
            ],
            "max_completion_tokens": self.max_tokens,
        });

        let resp = self
            .http
            .post(&url)
            .timeout(self.timeout)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("endpoint returned {status}: {body}");
        }

        let resp_json: serde_json::Value = resp.json().await?;
        let Some(content) = resp_json["choices"][0]["message"]["content"].as_str() else {
            anyhow::bail!(
                "response had no extractable content (keys: {:?})",
                resp_json.as_object().map(|o| o.keys().collect::<Vec<_>>())
            );
        };
        Ok(parse_analysis(content))
    }
}

/// Markdown payload conveying the incident context: anomaly numbers in full,
/// events truncated to a character budget, runbooks as title + root cause.
pub(crate) fn build_user_prompt(
    anomalies: &[Anomaly],
    events: &[CorrelatedEvent],
    runbooks: &[RunbookMatch],
) -> String {
    let mut msg = String::from("## Anomalies\n");
    for a in anomalies {
        msg.push_str(&format!(
            "- **{}** {}: current={:.2}, baseline={:.2}±{:.2}, z={:.1}, severity={}\n",
            a.service, a.metric, a.current_value, a.baseline_mean, a.baseline_stddev, a.z_score,
            a.severity,
        ));
    }

    if !events.is_empty() {
        msg.push_str("\n## Correlated Events\n");
        let mut used = 0usize;
        for e in events {
            let line = format!(
                "- [{}] [{}] **{}**: {}\n",
                e.timestamp.format("%Y-%m-%dT%H:%M:%SZ"),
                e.level.as_str(),
                e.service,
                e.message
            );
            if used + line.len() > EVENT_CHAR_BUDGET {
                msg.push_str("- (further events truncated)\n");
                break;
            }
            used += line.len();
            msg.push_str(&line);
        }
    }

    if !runbooks.is_empty() {
        msg.push_str("\n## Historical Runbooks\n");
        for r in runbooks {
            msg.push_str(&format!("- **{}**: {}\n", r.title, r.root_cause));
        }
    }

    msg
}

/// Tolerant parse of the model's reply: code fences stripped, anything
/// around the outermost JSON object ignored, unknown keys ignored, missing
/// optional keys defaulted. An empty summary rejects the analysis.
pub(crate) fn parse_analysis(content: &str) -> Option<Analysis> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end < start {
        return None;
    }
    let mut analysis: Analysis = match serde_json::from_str(&content[start..=end]) {
        Ok(a) => a,
        Err(e) => {
            tracing::warn!("analyzer: unparseable analysis body: {e}");
            return None;
        }
    };
    analysis.summary = analysis.summary.trim().to_string();
    if analysis.summary.is_empty() {
        tracing::warn!("analyzer: analysis missing summary, rejecting");
        return None;
    }
    if analysis.summary.chars().count() > SUMMARY_MAX_CHARS {
        analysis.summary = analysis.summary.chars().take(SUMMARY_MAX_CHARS).collect();
    }
    Some(analysis)
}
