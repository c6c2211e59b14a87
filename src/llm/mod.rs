pub mod openai;

pub use openai::OpenAiChat;

use async_trait::async_trait;

/// A single chat completion against a language-model service.
///
/// The API key is an argument on every call: callers bring their own
/// credentials, and nothing derived from a key outlives the call.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, api_key: &str, system: &str, prompt: &str)
    -> anyhow::Result<String>;

    fn name(&self) -> &str;
}
