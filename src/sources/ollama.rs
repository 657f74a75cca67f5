use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SummarizerSettings;
use crate::error::FdaError;

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
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
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct OllamaErrorBody {
    error: String,
}

/// Blocking client for a local Ollama daemon or Ollama Cloud.
pub struct OllamaClient {
    client: reqwest::blocking::Client,
    settings: SummarizerSettings,
}

impl OllamaClient {
    pub fn new(settings: &SummarizerSettings) -> Result<Self, FdaError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            settings: settings.clone(),
        })
    }

    pub fn endpoint(&self) -> String {
        match &self.settings {
            SummarizerSettings::Local { host, .. } => {
                format!("{}/api/generate", host.trim_end_matches('/'))
            }
            SummarizerSettings::Cloud { base, .. } => {
                format!("{}/api/chat", base.trim_end_matches('/'))
            }
        }
    }

    pub fn model(&self) -> &str {
        match &self.settings {
            SummarizerSettings::Local { model, .. } | SummarizerSettings::Cloud { model, .. } => {
                model
            }
        }
    }

    fn unavailable(&self, reason: impl Into<String>) -> FdaError {
        FdaError::Summarizer {
            endpoint: self.endpoint(),
            reason: reason.into(),
        }
    }

    fn transport_reason(&self, err: &reqwest::Error) -> String {
        let local = matches!(self.settings, SummarizerSettings::Local { .. });
        if err.is_timeout() {
            if local {
                format!("timed out ({err}); try a smaller model via OLLAMA_MODEL or raise OLLAMA_TIMEOUT")
            } else {
                format!("timed out ({err})")
            }
        } else if err.is_connect() && local {
            format!("connection failed ({err}); is `ollama serve` running?")
        } else {
            format!("request failed ({err})")
        }
    }

    /// Asks the model for a narrative. Empty output counts as a failure.
    pub fn summarize(&self, system_prompt: &str, user_prompt: &str) -> Result<String, FdaError> {
        let endpoint = self.endpoint();
        debug!(endpoint = %endpoint, model = self.model(), "summarizer request");

        let request = match &self.settings {
            SummarizerSettings::Local { model, timeout, .. } => self
                .client
                .post(&endpoint)
                .timeout(*timeout)
                .json(&GenerateRequest {
                    model,
                    prompt: format!("{system_prompt}\n\n---\n\n{user_prompt}"),
                    stream: false,
                }),
            SummarizerSettings::Cloud {
                token,
                model,
                timeout,
                ..
            } => self
                .client
                .post(&endpoint)
                .timeout(*timeout)
                .bearer_auth(token)
                .json(&ChatRequest {
                    model,
                    messages: vec![
                        ChatMessage {
                            role: "system",
                            content: system_prompt,
                        },
                        ChatMessage {
                            role: "user",
                            content: user_prompt,
                        },
                    ],
                    stream: false,
                }),
        };

        let resp = request
            .send()
            .map_err(|err| self.unavailable(self.transport_reason(&err)))?;
        let status = resp.status();
        let body = crate::sources::read_limited_body(resp, "ollama")
            .map_err(|err| self.unavailable(format!("failed reading response ({err})")))?;

        if !status.is_success() {
            let detail = serde_json::from_slice::<OllamaErrorBody>(&body)
                .map(|e| e.error)
                .unwrap_or_else(|_| crate::sources::body_excerpt(&body));
            let mut reason = format!("HTTP {}: {detail}", status.as_u16());
            if status.as_u16() == 404 && matches!(self.settings, SummarizerSettings::Local { .. })
            {
                reason.push_str(&format!(" (try: ollama pull {})", self.model()));
            }
            return Err(self.unavailable(reason));
        }

        let text = match &self.settings {
            SummarizerSettings::Local { .. } => serde_json::from_slice::<GenerateResponse>(&body)
                .map(|r| r.response),
            SummarizerSettings::Cloud { .. } => {
                serde_json::from_slice::<ChatResponse>(&body).map(|r| r.message.content)
            }
        }
        .map_err(|err| self.unavailable(format!("unexpected response body: {err}")))?;

        let text = text.trim();
        if text.is_empty() {
            return Err(self.unavailable("model returned an empty response"));
        }
        Ok(text.to_string())
    }
}
