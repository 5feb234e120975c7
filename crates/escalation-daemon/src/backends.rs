//! HTTP collaborators: OpenAI-compatible chat endpoints for Tier 2 and
//! Tier 3, and a JSON context assembly service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use escalation_router::{
    BackendAnswer, BackendError, ContextAssembler, ContextBundle, ContextMap, EscalationRouter,
    InferenceBackend, InferenceRequest, Query, ReasoningBackend, ReasoningRequest,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{ContextServiceConfig, DaemonConfig, EndpointConfig};

/// Appended to every system prompt so answers carry a parseable score.
const CONFIDENCE_INSTRUCTION: &str = "End your reply with a final line of the form \
     `confidence: <number between 0 and 1>` stating how sure you are.";

const TIER2_SYSTEM_PROMPT: &str = "You are a fast operations assistant. Answer briefly and \
     directly. If you are unsure, say so.";

const TIER3_SYSTEM_PROMPT: &str = "You are a careful senior engineer. Use the supplied context \
     to reason step by step, then give a clear final answer.";

/// Phrases that signal an unsure answer.
const HEDGES: &[&str] = &[
    "i'm not sure",
    "i am not sure",
    "not certain",
    "i don't know",
    "i do not know",
    "unclear",
    "it depends",
    "might be",
    "may be",
    "possibly",
    "probably",
    "perhaps",
    "i think",
    "cannot determine",
    "can't determine",
    "insufficient information",
];

/// Confidence for answers that report none, from the wording alone.
///
/// Starts at 0.85, loses 0.15 per distinct hedge phrase and 0.1 for
/// answers under four words. Empty answers score 0.
pub fn estimate_confidence(answer: &str) -> f32 {
    let text = answer.trim().to_lowercase();
    if text.is_empty() {
        return 0.0;
    }
    let hedges = HEDGES.iter().filter(|h| text.contains(*h)).count();
    let mut score = 0.85 - 0.15 * hedges as f32;
    if text.split_whitespace().count() < 4 {
        score -= 0.1;
    }
    score.clamp(0.05, 0.95)
}

/// Split a trailing `confidence: x` line from the answer body.
pub fn split_confidence(content: &str) -> (String, Option<f32>) {
    let trimmed = content.trim_end();
    if let Some((body, last)) = trimmed.rsplit_once('\n') {
        if let Some(value) = parse_confidence_line(last) {
            return (body.trim_end().to_string(), Some(value));
        }
    } else if let Some(value) = parse_confidence_line(trimmed) {
        return (String::new(), Some(value));
    }
    (trimmed.to_string(), None)
}

fn parse_confidence_line(line: &str) -> Option<f32> {
    let line = line.trim().trim_matches(|c| c == '*' || c == '`');
    let (label, value) = line.split_once(':')?;
    if !label.trim().eq_ignore_ascii_case("confidence") {
        return None;
    }
    let value = value.trim().trim_matches(|c| c == '*' || c == '`').trim();
    let parsed = match value.strip_suffix('%') {
        Some(pct) => pct.trim().parse::<f32>().ok()? / 100.0,
        None => value.parse::<f32>().ok()?,
    };
    parsed.is_finite().then(|| parsed.clamp(0.0, 1.0))
}

fn context_lines(context: &ContextMap) -> String {
    context
        .iter()
        .map(|(k, v)| format!("{k}: {v}\n"))
        .collect()
}

fn map_reqwest(err: reqwest::Error, timeout: Duration) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout(timeout)
    } else if err.is_connect() {
        BackendError::Unavailable(err.to_string())
    } else if err.is_decode() {
        BackendError::Parse(err.to_string())
    } else {
        BackendError::Request(err.to_string())
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Minimal chat completions client shared by both tiers.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    endpoint: EndpointConfig,
}

impl ChatClient {
    pub fn new(http: reqwest::Client, endpoint: EndpointConfig) -> Self {
        Self { http, endpoint }
    }

    pub fn endpoint(&self) -> &EndpointConfig {
        &self.endpoint
    }

    /// One completion, abandoned when `cancel` fires.
    pub async fn complete(
        &self,
        system: &str,
        user: &str,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<BackendAnswer, BackendError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(BackendError::Cancelled),
            result = self.send(system, user, timeout) => result,
        }
    }

    async fn send(
        &self,
        system: &str,
        user: &str,
        timeout: Duration,
    ) -> Result<BackendAnswer, BackendError> {
        let system = format!("{system}\n\n{CONFIDENCE_INSTRUCTION}");
        let body = ChatRequest {
            model: &self.endpoint.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            max_tokens: self.endpoint.max_tokens,
            temperature: self.endpoint.temperature,
        };

        let mut request = self
            .http
            .post(self.endpoint.completions_url())
            .timeout(timeout)
            .json(&body);
        if let Some(key) = &self.endpoint.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(|e| map_reqwest(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = format!("HTTP {status}: {text}");
            return Err(if status.is_server_error() {
                BackendError::Unavailable(message)
            } else {
                BackendError::Request(message)
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| BackendError::Parse("response has no message content".into()))?;

        let (answer, reported) = split_confidence(&content);
        let confidence = reported.unwrap_or_else(|| estimate_confidence(&answer));
        debug!(
            model = %self.endpoint.model,
            confidence,
            reported = reported.is_some(),
            "completion received"
        );
        Ok(BackendAnswer::new(answer, confidence))
    }
}

/// Tier 2 over a chat endpoint.
#[derive(Debug, Clone)]
pub struct HttpInferenceBackend {
    client: ChatClient,
}

impl HttpInferenceBackend {
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }

    pub fn prompt(request: &InferenceRequest) -> String {
        match &request.context {
            Some(context) if !context.is_empty() => {
                format!("Context:\n{}\nQuestion: {}", context_lines(context), request.query)
            }
            _ => request.query.clone(),
        }
    }
}

#[async_trait]
impl InferenceBackend for HttpInferenceBackend {
    async fn invoke(
        &self,
        request: &InferenceRequest,
        cancel: CancellationToken,
    ) -> Result<BackendAnswer, BackendError> {
        self.client
            .complete(TIER2_SYSTEM_PROMPT, &Self::prompt(request), request.timeout, cancel)
            .await
    }
}

/// Tier 3 over a chat endpoint.
#[derive(Debug, Clone)]
pub struct HttpReasoningBackend {
    client: ChatClient,
}

impl HttpReasoningBackend {
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }

    pub fn prompt(request: &ReasoningRequest) -> String {
        let mut prompt = String::new();
        if !request.caller_context.is_empty() {
            prompt.push_str("Caller context:\n");
            prompt.push_str(&context_lines(&request.caller_context));
            prompt.push('\n');
        }
        if !request.bundle.is_empty() {
            prompt.push_str("Reference material:\n");
            prompt.push_str(&request.bundle.render());
            prompt.push('\n');
        }
        prompt.push_str("Question: ");
        prompt.push_str(&request.query);
        prompt
    }
}

#[async_trait]
impl ReasoningBackend for HttpReasoningBackend {
    async fn invoke(
        &self,
        request: &ReasoningRequest,
        cancel: CancellationToken,
    ) -> Result<BackendAnswer, BackendError> {
        self.client
            .complete(TIER3_SYSTEM_PROMPT, &Self::prompt(request), request.timeout, cancel)
            .await
    }
}

#[derive(Serialize)]
struct AssembleRequest<'a> {
    query: &'a str,
    context: &'a ContextMap,
}

/// Context assembly service: `POST {query, context}` returning a
/// [`ContextBundle`] as JSON.
#[derive(Debug, Clone)]
pub struct HttpContextAssembler {
    http: reqwest::Client,
    url: String,
}

impl HttpContextAssembler {
    pub fn new(http: reqwest::Client, config: &ContextServiceConfig) -> Self {
        Self {
            http,
            url: config.url.clone(),
        }
    }

    async fn fetch(&self, query: &Query) -> Result<ContextBundle, BackendError> {
        let timeout = query.timeout();
        let response = self
            .http
            .post(&self.url)
            .timeout(timeout)
            .json(&AssembleRequest {
                query: query.text(),
                context: query.context(),
            })
            .send()
            .await
            .map_err(|e| map_reqwest(e, timeout))?;
        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Unavailable(format!(
                "context service returned HTTP {status}"
            )));
        }
        response
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))
    }
}

#[async_trait]
impl ContextAssembler for HttpContextAssembler {
    async fn assemble(
        &self,
        query: &Query,
        cancel: CancellationToken,
    ) -> Result<ContextBundle, BackendError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(BackendError::Cancelled),
            result = self.fetch(query) => result,
        }
    }
}

/// Wire the HTTP collaborators from `config` into a router.
pub fn build_router(config: &DaemonConfig) -> anyhow::Result<EscalationRouter> {
    let http = reqwest::Client::builder()
        .pool_idle_timeout(Duration::from_secs(90))
        .build()?;
    let backends = &config.backends;

    let mut builder = EscalationRouter::builder()
        .config(config.router.clone())
        .inference(Arc::new(HttpInferenceBackend::new(ChatClient::new(
            http.clone(),
            backends.tier2.clone(),
        ))))
        .reasoning(Arc::new(HttpReasoningBackend::new(ChatClient::new(
            http.clone(),
            backends.tier3.clone(),
        ))));
    if let Some(context) = &backends.context {
        builder = builder.context_assembler(Arc::new(HttpContextAssembler::new(http, context)));
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_confidence_penalizes_hedging() {
        let sure = estimate_confidence("Service X is running on all three nodes.");
        let unsure = estimate_confidence("I'm not sure, it might be running on some nodes.");
        assert!(sure > 0.7);
        assert!(unsure < 0.7);
        assert_eq!(estimate_confidence("   "), 0.0);
        assert!(estimate_confidence("yes") < sure);
    }

    #[test]
    fn test_split_confidence() {
        let (body, c) = split_confidence("The pod restarted.\nconfidence: 0.82\n");
        assert_eq!(body, "The pod restarted.");
        assert_eq!(c, Some(0.82));

        let (_, c) = split_confidence("Done.\n**Confidence:** 90%");
        assert!((c.unwrap() - 0.9).abs() < 1e-6);

        let (body, c) = split_confidence("No score here.\nJust text.");
        assert_eq!(body, "No score here.\nJust text.");
        assert_eq!(c, None);
    }

    #[test]
    fn test_inference_prompt_includes_context_only_when_present() {
        let mut request = InferenceRequest {
            correlation_id: "c".into(),
            query: "restart the api".into(),
            context: None,
            timeout: Duration::from_secs(1),
        };
        assert_eq!(HttpInferenceBackend::prompt(&request), "restart the api");

        let mut ctx = ContextMap::new();
        ctx.insert("environment".into(), "prod".into());
        request.context = Some(ctx);
        let prompt = HttpInferenceBackend::prompt(&request);
        assert!(prompt.starts_with("Context:\nenvironment: prod\n"));
        assert!(prompt.ends_with("Question: restart the api"));
    }

    #[test]
    fn test_reasoning_prompt_orders_sections() {
        let mut caller_context = ContextMap::new();
        caller_context.insert("asset".into(), "db-1".into());
        let mut bundle = ContextBundle::default();
        bundle.documents.push(escalation_router::ContextDocument {
            source: "runbook".into(),
            content: "failover takes 30s".into(),
        });
        let request = ReasoningRequest {
            correlation_id: "c".into(),
            query: "plan the failover".into(),
            caller_context,
            bundle,
            timeout: Duration::from_secs(5),
        };
        let prompt = HttpReasoningBackend::prompt(&request);
        let caller = prompt.find("Caller context").unwrap();
        let reference = prompt.find("Reference material").unwrap();
        let question = prompt.find("Question: plan the failover").unwrap();
        assert!(caller < reference && reference < question);
    }

    #[test]
    fn test_build_router_from_defaults() {
        let router = build_router(&DaemonConfig::default()).unwrap();
        assert!(router.store().is_empty());
    }
}
