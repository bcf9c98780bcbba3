// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! OpenAI-compatible chat completion and embedding client

use crate::client::{Completion, CompletionProvider, CompletionRequest, EmbeddingProvider, TokenUsage};
use crate::error::{LlmError, LlmResult};
use async_trait::async_trait;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI client implementation
pub struct OpenAIClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAIClient {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    async fn post(
        &self,
        path: &str,
        body: &serde_json::Value,
        timeout: Option<std::time::Duration>,
    ) -> LlmResult<serde_json::Value> {
        let mut request = self
            .client
            .post(format!("{}/{}", self.base_url, path))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await?;
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(LlmError::RateLimited);
            }
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: error_text,
            });
        }

        Ok(response.json().await?)
    }
}

/// `openai/gpt-4.1-mini` -> `gpt-4.1-mini`
pub fn provider_model_name(target: &str) -> &str {
    target.split_once('/').map(|(_, name)| name).unwrap_or(target)
}

fn parse_usage(usage: &serde_json::Value) -> TokenUsage {
    TokenUsage {
        input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
        output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
        cached_tokens: usage["prompt_tokens_details"]["cached_tokens"]
            .as_u64()
            .unwrap_or(0) as u32,
    }
}

#[async_trait]
impl CompletionProvider for OpenAIClient {
    async fn complete(&self, request: &CompletionRequest) -> LlmResult<Completion> {
        let mut body = serde_json::json!({
            "model": provider_model_name(&request.model),
            "messages": request.messages,
            "temperature": 0.0,
            "max_tokens": request.max_output_tokens,
        });
        if request.json_mode {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }

        let response_data = self
            .post("chat/completions", &body, Some(request.timeout))
            .await?;

        let content = response_data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| LlmError::InvalidResponse("Missing content".to_string()))?
            .to_string();

        Ok(Completion {
            content,
            model: request.model.clone(),
            usage: parse_usage(&response_data["usage"]),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIClient {
    async fn embed(&self, model: &str, texts: &[String]) -> LlmResult<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": provider_model_name(model),
            "input": texts,
        });
        let response_data = self.post("embeddings", &body, None).await?;

        let data = response_data["data"]
            .as_array()
            .ok_or_else(|| LlmError::InvalidResponse("Missing data".to_string()))?;

        let mut embeddings = Vec::with_capacity(data.len());
        for item in data {
            let vector = item["embedding"]
                .as_array()
                .ok_or_else(|| LlmError::InvalidResponse("Missing embedding".to_string()))?;
            embeddings.push(
                vector
                    .iter()
                    .filter_map(|v| v.as_f64())
                    .map(|v| v as f32)
                    .collect(),
            );
        }
        Ok(embeddings)
    }
}
