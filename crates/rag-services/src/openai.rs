//! OpenAI-compatible chat-completions reasoner
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use rag_core::config::ReasonerConfig;
use rag_core::{CompletionRequest, ModelTier, Reasoner, ServiceError};

pub struct OpenAiReasoner {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    fast_model: String,
    reasoning_model: String,
    max_tokens: u32,
}

impl OpenAiReasoner {
    pub fn new(config: &ReasonerConfig) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::ReasonerUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            fast_model: config.fast_model.clone(),
            reasoning_model: config.reasoning_model.clone(),
            max_tokens: config.max_tokens,
        })
    }

    fn model(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Fast => &self.fast_model,
            ModelTier::Reasoning => &self.reasoning_model,
        }
    }

    fn body<'a>(&'a self, request: &'a CompletionRequest) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system_prompt {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });
        ChatRequest {
            model: self.model(request.tier),
            messages,
            temperature: request.temperature,
            max_tokens: self.max_tokens,
            response_format: request
                .structured
                .then_some(ResponseFormat { kind: "json_object" }),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

#[async_trait]
impl Reasoner for OpenAiReasoner {
    async fn complete(&self, request: CompletionRequest) -> Result<String, ServiceError> {
        let url = format!("{}/chat/completions", self.endpoint);
        let body = self.body(&request);
        debug!(purpose = %request.purpose, model = body.model, "chat completion");

        let mut http = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }
        let response = http
            .send()
            .await
            .map_err(|e| ServiceError::ReasonerUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            warn!(purpose = %request.purpose, %status, "chat completion rejected");
            return Err(ServiceError::ReasonerUnavailable(format!(
                "status {status}: {detail}"
            )));
        }

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::ReasonerMalformed(e.to_string()))?;
        reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ServiceError::ReasonerMalformed("reply carried no content".into()))
    }
}
