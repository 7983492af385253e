pub mod error;
pub mod grok;
pub mod sse;
pub mod types;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

pub use error::ProviderError;
pub use grok::GrokProvider;
pub use types::{
    ChatRequest, ChatResponse, ContentPart, Message, MessageContent, Role, StreamEvent,
    ToolChoice, ToolDefinition, Usage,
};

/// A streaming chat endpoint. The agent core depends only on this trait so
/// tests can script conversations without a network.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    fn default_model(&self) -> &str;
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse>;
    async fn chat_stream(
        &self,
        request: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>>;
}
