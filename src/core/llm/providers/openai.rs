use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::core::llm::{ChatMessage, LlmBackend};

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

/// Backend speaking the OpenAI-compatible chat-completions wire format.
/// `base_url` points at the full completions endpoint, which lets one type
/// cover OpenAI itself and every compatible vendor or local proxy.
pub struct OpenAiCompatBackend {
    id: String,
    base_url: String,
    model: String,
    api_key: String,
    client: Client,
}

impl OpenAiCompatBackend {
    pub fn new(id: String, base_url: String, model: String, api_key: String) -> Self {
        Self {
            id,
            base_url,
            model,
            api_key,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl LlmBackend for OpenAiCompatBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        let wire_messages = messages
            .iter()
            .map(|m| WireMessage {
                role: &m.role,
                content: &m.content,
            })
            .collect();

        let req = ChatRequest {
            model: &self.model,
            messages: wire_messages,
        };
        let res = self
            .client
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&req)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(anyhow!(
                "chat API error from [{}]: {}",
                self.id,
                res.text().await.unwrap_or_default()
            ));
        }
        let parsed: ChatResponse = res.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow!("chat API reply from [{}] had no choices", self.id))
    }
}
