use std::time::Instant;

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
        ChatCompletionRequestUserMessageContent, CreateChatCompletionRequest,
    },
};
use async_trait::async_trait;
use opentelemetry::KeyValue;
use tracing::Instrument;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use super::ChatModel;
use crate::telemetry::metrics::{
    GEN_AI_ERROR_COUNT, GEN_AI_OPERATION_DURATION, GEN_AI_TOKEN_USAGE,
};

// low temperature keeps the narrative wording stable across runs
pub const SUMMARY_TEMPERATURE: f32 = 0.2;

// Model and optional API base come from configuration; the key comes from
// the caller on every call, so the client itself holds no secrets.
pub struct OpenAiChat {
    model: String,
    api_base: Option<String>,
}

impl OpenAiChat {
    pub fn new(model: &str, api_base: Option<&str>) -> Self {
        Self {
            model: model.to_string(),
            api_base: api_base.map(str::to_string),
        }
    }

    // Construction is cheap; a per-call client keeps the key request-scoped.
    fn client(&self, api_key: &str) -> Client<OpenAIConfig> {
        let mut config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(base) = &self.api_base {
            config = config.with_api_base(base);
        }
        Client::with_config(config)
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(
        &self,
        api_key: &str,
        system: &str,
        prompt: &str,
    ) -> anyhow::Result<String> {
        let start = Instant::now();
        let span = tracing::info_span!(
            "gen_ai.chat",
            otel.name = %format!("gen_ai.chat {}", self.model),
            gen_ai.operation.name = "chat",
            gen_ai.provider.name = "openai",
            gen_ai.request.model = %self.model,
            gen_ai.request.temperature = SUMMARY_TEMPERATURE,
            gen_ai.response.model = tracing::field::Empty,
            gen_ai.usage.input_tokens = tracing::field::Empty,
            gen_ai.usage.output_tokens = tracing::field::Empty,
            gen_ai.response.finish_reasons = tracing::field::Empty,
            otel.status_code = tracing::field::Empty,
            error.type = tracing::field::Empty,
        );
        span.add_event(
            "gen_ai.user.message",
            vec![KeyValue::new("gen_ai.prompt", truncate(prompt, 1000))],
        );

        let messages = vec![
            ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                content: ChatCompletionRequestSystemMessageContent::Text(system.to_string()),
                name: None,
            }),
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(prompt.to_string()),
                name: None,
            }),
        ];

        #[allow(deprecated)]
        let request = CreateChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: Some(SUMMARY_TEMPERATURE),
            ..Default::default()
        };

        let result = self
            .client(api_key)
            .chat()
            .create(request)
            .instrument(span.clone())
            .await;

        let duration = start.elapsed().as_secs_f64();
        let model_kv = KeyValue::new("gen_ai.request.model", self.model.clone());

        match result {
            Ok(response) => {
                let content = response
                    .choices
                    .first()
                    .and_then(|c| c.message.content.clone())
                    .unwrap_or_default();
                let finish_reason = response
                    .choices
                    .first()
                    .and_then(|c| c.finish_reason)
                    .map(|r| format!("{r:?}").to_lowercase());

                span.record("gen_ai.response.model", response.model.as_str());
                if let Some(reason) = &finish_reason {
                    span.record("gen_ai.response.finish_reasons", reason.as_str());
                }
                if let Some(usage) = &response.usage {
                    span.record("gen_ai.usage.input_tokens", i64::from(usage.prompt_tokens));
                    span.record(
                        "gen_ai.usage.output_tokens",
                        i64::from(usage.completion_tokens),
                    );
                    GEN_AI_TOKEN_USAGE.record(
                        f64::from(usage.prompt_tokens),
                        &[
                            KeyValue::new("gen_ai.token.type", "input"),
                            model_kv.clone(),
                        ],
                    );
                    GEN_AI_TOKEN_USAGE.record(
                        f64::from(usage.completion_tokens),
                        &[
                            KeyValue::new("gen_ai.token.type", "output"),
                            model_kv.clone(),
                        ],
                    );
                }
                GEN_AI_OPERATION_DURATION.record(duration, &[model_kv]);

                Ok(content)
            }
            Err(error) => {
                let error = anyhow::Error::from(error);
                span.record("otel.status_code", "ERROR");
                span.record("error.type", classify_error(&error));
                GEN_AI_ERROR_COUNT.add(1, &[model_kv]);
                Err(error)
            }
        }
    }

    fn name(&self) -> &str {
        "openai"
    }
}

fn classify_error(err: &anyhow::Error) -> &'static str {
    let msg = err.to_string().to_lowercase();
    if msg.contains("rate limit") || msg.contains("429") {
        "rate_limit"
    } else if msg.contains("timeout") || msg.contains("timed out") {
        "timeout"
    } else if msg.contains("401")
        || msg.contains("403")
        || msg.contains("auth")
        || msg.contains("api key")
    {
        "auth_error"
    } else if msg.contains("500") || msg.contains("502") || msg.contains("503") {
        "server_error"
    } else if msg.contains("connect") || msg.contains("dns") || msg.contains("reset") {
        "network_error"
    } else {
        "unknown_error"
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        s.char_indices()
            .take_while(|&(i, _)| i < max)
            .map(|(_, c)| c)
            .collect()
    }
}
