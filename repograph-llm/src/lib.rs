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

//! Model access for repograph: provider traits, an OpenAI-compatible
//! client, breaker-guarded calls with model fallback, embedding batching
//! and usage accounting.

pub mod client;
pub mod embedding;
pub mod error;
pub mod guarded;
pub mod openai;
pub mod usage;

pub use client::{
    strip_code_fence, ChatMessage, Completion, CompletionProvider, CompletionRequest,
    EmbeddingProvider, Role, TokenUsage,
};
pub use embedding::{embed_texts, estimate_tokens};
pub use error::{LlmError, LlmResult};
pub use guarded::GuardedModels;
pub use openai::OpenAIClient;
pub use usage::{ModelPricing, ModelUsage, UsageTracker};
