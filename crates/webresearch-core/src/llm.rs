//! Language-model seam. The wire protocol is an external concern; the engine
//! only needs chat completion with optional tool-call requests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::state::ChatMessage;

/// Structured request from the model to invoke a named capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// One model reply: free text plus zero or more tool-call requests.
#[derive(Debug, Clone, Default)]
pub struct LlmReply {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl LlmReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_tool_call(mut self, call: ToolCallRequest) -> Self {
        self.tool_calls.push(call);
        self
    }
}

/// Opaque chat-completion capability.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn ask(&self, messages: &[ChatMessage]) -> anyhow::Result<LlmReply>;
}
