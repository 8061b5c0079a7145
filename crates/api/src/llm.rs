//! AI-written session summaries
//!
//! Builds the observation-summary and coach-trend prompts and sends them to an
//! OpenAI-compatible chat completions endpoint.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Config;

const SUMMARY_SYSTEM_MESSAGE: &str = "You are a supportive coach educator assistant that helps \
    coaches reflect on their practice. Your feedback is always constructive, specific, and focused \
    on development rather than judgment. Never use asterisks or markdown formatting in your responses.";

const TRENDS_SYSTEM_MESSAGE: &str = "You are a supportive coach educator assistant that helps \
    identify development trends and patterns. Your feedback is always constructive and focused on \
    growth. Never use asterisks or markdown formatting.";

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM API key not configured")]
    NotConfigured,
    #[error("{0}")]
    Upstream(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionSummaryRequest {
    pub session_name: String,
    /// Seconds
    pub total_duration: i64,
    pub total_events: i64,
    pub ball_rolling_time: i64,
    pub ball_not_rolling_time: i64,
    #[serde(default)]
    pub event_breakdown: BTreeMap<String, i64>,
    pub descriptor1_name: String,
    #[serde(default)]
    pub descriptor1_breakdown: BTreeMap<String, i64>,
    pub descriptor2_name: String,
    #[serde(default)]
    pub descriptor2_breakdown: BTreeMap<String, i64>,
    #[serde(default)]
    pub session_parts: Vec<Value>,
    #[serde(default)]
    pub user_notes: Option<String>,
    #[serde(default)]
    pub coach_name: Option<String>,
    #[serde(default)]
    pub coach_targets: Option<Vec<String>>,
    #[serde(default)]
    pub previous_sessions_summary: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoachTrendRequest {
    pub coach_name: String,
    #[serde(default)]
    pub sessions_data: Vec<Value>,
    #[serde(default)]
    pub current_targets: Vec<String>,
}

/// `"{m}m {s}s"`
pub fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    format!("{}m {}s", seconds / 60, seconds % 60)
}

/// Whole-number share of `part` in `part + rest`. Negative inputs count as zero.
pub fn rounded_pct(part: i64, rest: i64) -> i64 {
    let (part, rest) = (part.max(0) as f64, rest.max(0) as f64);
    let total = part + rest;
    if total == 0.0 {
        return 0;
    }
    (part / total * 100.0).round() as i64
}

pub fn strip_asterisks(text: &str) -> String {
    text.replace('*', "")
}

fn value_text(value: Option<&Value>, default: &str) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => default.to_string(),
        Some(other) => other.to_string(),
    }
}

fn breakdown_lines(breakdown: &BTreeMap<String, i64>, suffix: &str) -> String {
    breakdown
        .iter()
        .map(|(k, v)| format!("{}: {}{}", k, v, suffix))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn build_summary_prompt(req: &SessionSummaryRequest) -> String {
    let rolling_pct = rounded_pct(req.ball_rolling_time, req.ball_not_rolling_time);

    let parts = req
        .session_parts
        .iter()
        .map(|p| {
            format!(
                "{}: {} events, Ball rolling {}%",
                value_text(p.get("name"), "Part"),
                value_text(p.get("events"), "0"),
                value_text(p.get("ballRollingPct"), "0"),
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let mut prompt = format!(
        "You are a coach educator assistant. Analyze this coaching observation session data and \
write a constructive, developmental summary suitable for coach reflection and mentoring conversations.

IMPORTANT FORMATTING RULES:
- Do NOT use asterisks, bullet points with *, or markdown formatting
- Write in clear paragraphs with natural flow
- Use numbered lists only where specifically asked
- Keep language conversational and professional

SESSION: {name}
DURATION: {duration}
TOTAL EVENTS LOGGED: {events}

BALL IN PLAY:
Ball Rolling: {rolling} ({rolling_pct}%)
Ball Stopped: {stopped} ({stopped_pct}%)

COACHING INTERVENTIONS:
{interventions}

{d1_name}:
{d1}

{d2_name}:
{d2}

SESSION PARTS USED:
{parts}
",
        name = req.session_name,
        duration = format_duration(req.total_duration),
        events = req.total_events,
        rolling = format_duration(req.ball_rolling_time),
        stopped = format_duration(req.ball_not_rolling_time),
        rolling_pct = rolling_pct,
        stopped_pct = 100 - rolling_pct,
        interventions = breakdown_lines(&req.event_breakdown, " times"),
        d1_name = req.descriptor1_name.to_uppercase(),
        d1 = breakdown_lines(&req.descriptor1_breakdown, ""),
        d2_name = req.descriptor2_name.to_uppercase(),
        d2 = breakdown_lines(&req.descriptor2_breakdown, ""),
        parts = parts,
    );

    if let Some(coach) = req.coach_name.as_deref().filter(|s| !s.is_empty()) {
        let _ = write!(prompt, "\nCOACH: {}\n", coach);
    }

    if let Some(targets) = req.coach_targets.as_ref().filter(|t| !t.is_empty()) {
        prompt.push_str("\nCOACH'S CURRENT DEVELOPMENT TARGETS:\n");
        for (i, target) in targets.iter().enumerate() {
            let _ = writeln!(prompt, "{}. {}", i + 1, target);
        }
        prompt.push_str("\nPlease reference these targets in your analysis where relevant.\n");
    }

    if let Some(previous) = req
        .previous_sessions_summary
        .as_deref()
        .filter(|s| !s.is_empty())
    {
        let _ = write!(prompt, "\nPREVIOUS SESSIONS CONTEXT:\n{}\n", previous);
        prompt.push_str("\nNote any changes or progress compared to previous observations.\n");
    }

    if let Some(notes) = req.user_notes.as_deref().filter(|s| !s.is_empty()) {
        let _ = write!(prompt, "\nOBSERVER'S NOTES:\n{}\n", notes);
    }

    prompt.push_str(
        "
Please provide your response in this structure (use plain text, no markdown):

OVERVIEW
Write 1-2 paragraphs summarizing the key patterns observed in this session.

STRENGTHS OBSERVED
Write 1 paragraph highlighting what the coach did well.

AREAS FOR REFLECTION
Write 1 paragraph with constructive areas the coach might consider developing.

REFLECTIVE QUESTIONS
Write 3-4 questions (numbered 1, 2, 3, 4) the coach might consider for self-reflection.

SUGGESTED DEVELOPMENT TARGETS
Based on this observation, suggest 2-3 specific, actionable development targets (numbered 1, 2, 3) the coach could work on.

Keep the tone professional, supportive, and non-judgmental throughout.",
    );

    prompt
}

pub fn build_trends_prompt(req: &CoachTrendRequest) -> String {
    let mut sessions_text = String::new();
    for (i, session) in req.sessions_data.iter().enumerate() {
        let _ = write!(
            sessions_text,
            "\nSession {}: {} ({})\nDuration: {}\nEvents: {}\nBall Rolling: {}%\nKey interventions: {}\n",
            i + 1,
            value_text(session.get("name"), "Unnamed"),
            value_text(session.get("date"), "Unknown date"),
            value_text(session.get("duration"), "Unknown"),
            value_text(session.get("events"), "0"),
            value_text(session.get("ballRollingPct"), "0"),
            value_text(session.get("interventions"), "Not recorded"),
        );
    }

    let targets_text = if req.current_targets.is_empty() {
        String::new()
    } else {
        let numbered = req
            .current_targets
            .iter()
            .enumerate()
            .map(|(i, t)| format!("{}. {}", i + 1, t))
            .collect::<Vec<_>>()
            .join("\n");
        format!("\nCURRENT DEVELOPMENT TARGETS:\n{}", numbered)
    };

    format!(
        "You are a coach educator assistant. Analyze the observation data across multiple sessions \
for {coach} and identify trends, patterns, and development over time.

IMPORTANT FORMATTING RULES:
- Do NOT use asterisks, bullet points with *, or markdown formatting
- Write in clear paragraphs with natural flow
- Use numbered lists only where appropriate
- Keep language conversational and professional

COACH: {coach}
TOTAL SESSIONS OBSERVED: {count}

SESSION HISTORY:
{sessions}
{targets}

Please provide your response in this structure (use plain text, no markdown):

OVERALL SUMMARY
Write 1-2 paragraphs summarizing this coach's observation history.

PATTERNS AND TRENDS
Write 1-2 paragraphs identifying consistent patterns or changes over time in their coaching approach.

PROGRESS ON TARGETS
If targets are listed, comment on observable progress or areas still needing attention.

DEVELOPMENT RECOMMENDATIONS
Write 1 paragraph with 2-3 specific recommendations for continued development.

Keep the tone professional, supportive, and developmental throughout.",
        coach = req.coach_name,
        count = req.sessions_data.len(),
        sessions = sessions_text,
        targets = targets_text,
    )
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    api_key: Option<String>,
    api_url: String,
    model: String,
}

impl LlmClient {
    pub fn from_config(http: Client, config: &Config) -> Self {
        Self {
            http,
            api_key: config.llm_api_key.clone(),
            api_url: config.llm_api_url.trim_end_matches('/').to_string(),
            model: config.llm_model.clone(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    pub async fn session_summary(&self, req: &SessionSummaryRequest) -> Result<String, LlmError> {
        let prompt = build_summary_prompt(req);
        let text = self.complete(SUMMARY_SYSTEM_MESSAGE, &prompt).await?;
        Ok(strip_asterisks(&text))
    }

    pub async fn coach_trends(&self, req: &CoachTrendRequest) -> Result<String, LlmError> {
        let prompt = build_trends_prompt(req);
        let text = self.complete(TRENDS_SYSTEM_MESSAGE, &prompt).await?;
        Ok(strip_asterisks(&text))
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, LlmError> {
        let api_key = self.api_key.as_deref().ok_or(LlmError::NotConfigured)?;

        tracing::debug!(model = %self.model, prompt_len = prompt.len(), "Requesting completion");

        let response = self
            .http
            .post(format!("{}/chat/completions", self.api_url))
            .bearer_auth(api_key)
            .json(&ChatRequest {
                model: &self.model,
                messages: vec![
                    ChatMessage {
                        role: "system",
                        content: system,
                    },
                    ChatMessage {
                        role: "user",
                        content: prompt,
                    },
                ],
            })
            .timeout(Duration::from_secs(120))
            .send()
            .await
            .map_err(|e| LlmError::Upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Upstream(format!(
                "upstream returned {}: {}",
                status.as_u16(),
                body
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Upstream(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::Upstream("empty completion".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn summary_request() -> SessionSummaryRequest {
        serde_json::from_value(json!({
            "session_name": "U12 Tuesday",
            "total_duration": 3725,
            "total_events": 42,
            "ball_rolling_time": 2000,
            "ball_not_rolling_time": 1000,
            "event_breakdown": {"Command": 10, "Q&A": 5},
            "descriptor1_name": "Content",
            "descriptor1_breakdown": {"Technical": 7},
            "descriptor2_name": "Delivery",
            "descriptor2_breakdown": {"Individual": 3},
            "session_parts": [{"name": "Warm up", "events": 4, "ballRollingPct": 55}],
            "coach_targets": ["Use more questioning", "Reduce stoppages"]
        }))
        .unwrap()
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0m 0s");
        assert_eq!(format_duration(3725), "62m 5s");
        assert_eq!(format_duration(-5), "0m 0s");
    }

    #[test]
    fn test_rounded_pct() {
        assert_eq!(rounded_pct(2000, 1000), 67);
        assert_eq!(rounded_pct(0, 0), 0);
        assert_eq!(rounded_pct(1, 1), 50);
        assert_eq!(rounded_pct(i64::MAX, 1), 100);
        assert_eq!(rounded_pct(i64::MAX, i64::MAX), 50);
        assert_eq!(rounded_pct(1, i64::MAX), 0);
        assert_eq!(rounded_pct(-5, 10), 0);
        assert_eq!(rounded_pct(10, -5), 100);
        assert_eq!(rounded_pct(-1, -1), 0);
    }

    #[test]
    fn test_summary_prompt_sections() {
        let prompt = build_summary_prompt(&summary_request());
        assert!(prompt.contains("DURATION: 62m 5s"));
        assert!(prompt.contains("Ball Rolling: 33m 20s (67%)"));
        assert!(prompt.contains("Ball Stopped: 16m 40s (33%)"));
        assert!(prompt.contains("Command: 10 times"));
        assert!(prompt.contains("CONTENT:\nTechnical: 7"));
        assert!(prompt.contains("Warm up: 4 events, Ball rolling 55%"));
        assert!(prompt.contains("1. Use more questioning\n2. Reduce stoppages"));
        assert!(prompt.contains("SUGGESTED DEVELOPMENT TARGETS"));
        assert!(!prompt.contains("PREVIOUS SESSIONS CONTEXT"));
    }

    #[test]
    fn test_trends_prompt() {
        let req: CoachTrendRequest = serde_json::from_value(json!({
            "coach_name": "Sam",
            "sessions_data": [{"name": "Session A", "events": 12}],
            "current_targets": ["Praise effort"]
        }))
        .unwrap();
        let prompt = build_trends_prompt(&req);
        assert!(prompt.contains("TOTAL SESSIONS OBSERVED: 1"));
        assert!(prompt.contains("Session 1: Session A (Unknown date)"));
        assert!(prompt.contains("Events: 12"));
        assert!(prompt.contains("CURRENT DEVELOPMENT TARGETS:\n1. Praise effort"));
        assert!(prompt.contains("DEVELOPMENT RECOMMENDATIONS"));
    }

    #[test]
    fn test_strip_asterisks() {
        assert_eq!(strip_asterisks("**OVERVIEW** *done*"), "OVERVIEW done");
    }

    #[tokio::test]
    async fn test_not_configured() {
        let client = LlmClient::from_config(Client::new(), &Config::for_tests());
        let err = client.session_summary(&summary_request()).await.unwrap_err();
        assert_eq!(err.to_string(), "LLM API key not configured");
    }

    #[tokio::test]
    async fn test_completion_is_cleaned() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"**OVERVIEW**\nGood."}}]}"#)
            .create_async()
            .await;

        let mut config = Config::for_tests();
        config.llm_api_key = Some("sk-test".to_string());
        config.llm_api_url = server.url();
        let client = LlmClient::from_config(Client::new(), &config);

        let text = client.session_summary(&summary_request()).await.unwrap();
        assert_eq!(text, "OVERVIEW\nGood.");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_upstream_failure() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body("rate limited")
            .create_async()
            .await;

        let mut config = Config::for_tests();
        config.llm_api_key = Some("sk-test".to_string());
        config.llm_api_url = server.url();
        let client = LlmClient::from_config(Client::new(), &config);

        let err = client.session_summary(&summary_request()).await.unwrap_err();
        assert!(matches!(err, LlmError::Upstream(_)));
        assert!(err.to_string().contains("429"));
    }
}
