//! OpenAI Chat Completions client implementing `LlmClient` (ChatOpenAI).
//!
//! One tenant maps to one `LlmConfig`; the API key is read from the
//! environment variable the config names, so keys never live in the
//! database. Tool specs are converted to function-calling tools per request
//! because the exposed set changes with the conversation state.

use async_trait::async_trait;
use tracing::debug;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionMessageToolCall, ChatCompletionMessageToolCalls,
        ChatCompletionRequestAssistantMessage, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessage, ChatCompletionRequestToolMessage,
        ChatCompletionRequestUserMessage, ChatCompletionTool, ChatCompletionToolChoiceOption,
        ChatCompletionTools, CreateChatCompletionRequestArgs, FunctionCall, FunctionObject,
        ToolChoiceOptions,
    },
    Client,
};

use crate::error::LlmError;
use crate::tools::ToolSpec;

use super::{ChatMessage, LlmClient, LlmConfig, LlmResponse, LlmUsage, ToolCall};

pub struct ChatOpenAI {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl ChatOpenAI {
    /// Build client with default config (API key from `OPENAI_API_KEY` env).
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            model: model.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    /// Build client with custom config (e.g. custom API key or base URL).
    pub fn with_config(config: OpenAIConfig, model: impl Into<String>) -> Self {
        Self {
            client: Client::with_config(config),
            model: model.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    /// Build a client from a tenant's [`LlmConfig`]; the API key comes from
    /// the environment variable the config names.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            LlmError::Config(format!(
                "api key env var {} is not set for llm config {}",
                config.api_key_env, config.name
            ))
        })?;
        let openai_config = OpenAIConfig::new().with_api_key(api_key);
        Ok(Self::with_config(openai_config, config.model_name.clone())
            .with_temperature(config.temperature)
            .with_max_tokens(config.max_tokens))
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    fn request_tool_call(tc: &ToolCall) -> ChatCompletionMessageToolCalls {
        ChatCompletionMessageToolCalls::Function(ChatCompletionMessageToolCall {
            id: tc.id.clone(),
            function: FunctionCall {
                name: tc.name.clone(),
                arguments: tc.arguments.clone(),
            },
        })
    }

    fn messages_to_request(messages: &[ChatMessage]) -> Vec<ChatCompletionRequestMessage> {
        messages
            .iter()
            .map(|m| match m {
                ChatMessage::System(s) => ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessage::from(s.as_str()),
                ),
                ChatMessage::User(s) => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessage::from(s.as_str()),
                ),
                ChatMessage::Assistant {
                    content,
                    tool_calls,
                } if tool_calls.is_empty() => {
                    ChatCompletionRequestMessage::Assistant(content.as_str().into())
                }
                ChatMessage::Assistant {
                    content,
                    tool_calls,
                } => ChatCompletionRequestMessage::Assistant(ChatCompletionRequestAssistantMessage {
                    content: if content.is_empty() {
                        None
                    } else {
                        Some(content.as_str().into())
                    },
                    tool_calls: Some(tool_calls.iter().map(Self::request_tool_call).collect()),
                    ..Default::default()
                }),
                ChatMessage::Tool {
                    tool_call_id,
                    content,
                } => ChatCompletionRequestMessage::Tool(ChatCompletionRequestToolMessage {
                    content: content.as_str().into(),
                    tool_call_id: tool_call_id.clone(),
                }),
            })
            .collect()
    }

    fn map_error(e: OpenAIError) -> LlmError {
        match e {
            OpenAIError::Reqwest(inner) => LlmError::Connection(inner.to_string()),
            other => LlmError::Provider(other.to_string()),
        }
    }
}

#[async_trait]
impl LlmClient for ChatOpenAI {
    async fn invoke(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<LlmResponse, LlmError> {
        let openai_messages = Self::messages_to_request(messages);
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(self.model.clone());
        args.messages(openai_messages);

        if !tools.is_empty() {
            let chat_tools: Vec<ChatCompletionTools> = tools
                .iter()
                .map(|t| {
                    ChatCompletionTools::Function(ChatCompletionTool {
                        function: FunctionObject {
                            name: t.name.clone(),
                            description: Some(t.description.clone()),
                            parameters: Some(t.input_schema.clone()),
                            ..Default::default()
                        },
                    })
                })
                .collect();
            args.tools(chat_tools);
            args.tool_choice(ChatCompletionToolChoiceOption::Mode(ToolChoiceOptions::Auto));
        }

        if let Some(t) = self.temperature {
            args.temperature(t);
        }
        if let Some(m) = self.max_tokens {
            args.max_tokens(m);
        }

        let request = args
            .build()
            .map_err(|e| LlmError::Provider(format!("request build failed: {e}")))?;

        debug!(
            model = %self.model,
            message_count = messages.len(),
            tools_count = tools.len(),
            "chat completion request"
        );

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(Self::map_error)?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Provider("no choices in response".to_string()))?;

        let msg = choice.message;
        let content = msg.content.unwrap_or_default();
        let tool_calls: Vec<ToolCall> = msg
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .filter_map(|tc| match tc {
                ChatCompletionMessageToolCalls::Function(f) => Some(ToolCall {
                    id: f.id,
                    name: f.function.name,
                    arguments: f.function.arguments,
                }),
                _ => None,
            })
            .collect();

        let usage = response.usage.map(|u| LlmUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(LlmResponse {
            content,
            tool_calls,
            usage,
        })
    }
}
