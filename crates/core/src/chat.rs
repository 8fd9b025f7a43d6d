use anyhow::{Context, Result};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

/// A conversational backend able to open independent chat contexts.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Opens a new chat context primed with the given system instruction.
    async fn start_session(&self, system_instruction: &str) -> Result<Box<dyn ChatSession>>;
}

/// One open chat context. Replies come back as a single text blob.
#[async_trait]
pub trait ChatSession: Send + Sync {
    async fn send_turn(&self, text: &str) -> Result<String>;
}

/// A `ChatBackend` for any OpenAI-compatible API.
pub struct OpenAICompatibleChat {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAICompatibleChat {
    /// Creates a backend for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - API key and base URL of the service.
    /// * `model` - The model identifier used for every turn (e.g., "gemini-2.5-flash").
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }
}

#[async_trait]
impl ChatBackend for OpenAICompatibleChat {
    async fn start_session(&self, system_instruction: &str) -> Result<Box<dyn ChatSession>> {
        let system: ChatCompletionRequestMessage = ChatCompletionRequestSystemMessageArgs::default()
            .content(system_instruction)
            .build()?
            .into();
        Ok(Box::new(OpenAIChatSession {
            client: self.client.clone(),
            model: self.model.clone(),
            history: Mutex::new(vec![system]),
        }))
    }
}

struct OpenAIChatSession {
    client: Client<OpenAIConfig>,
    model: String,
    history: Mutex<Vec<ChatCompletionRequestMessage>>,
}

#[async_trait]
impl ChatSession for OpenAIChatSession {
    async fn send_turn(&self, text: &str) -> Result<String> {
        let user: ChatCompletionRequestMessage = ChatCompletionRequestUserMessageArgs::default()
            .content(text)
            .build()?
            .into();

        let mut messages = self.history.lock().await.clone();
        messages.push(user.clone());

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .build()?;
        let response = self.client.chat().create(request).await?;

        let reply = response
            .choices
            .first()
            .context("No response choice from LLM")?
            .message
            .content
            .clone()
            .unwrap_or_default();
        debug!(chars = reply.len(), "Received model reply");

        // Only completed exchanges become part of the context.
        let assistant: ChatCompletionRequestMessage =
            ChatCompletionRequestAssistantMessageArgs::default()
                .content(reply.clone())
                .build()?
                .into();
        let mut history = self.history.lock().await;
        history.push(user);
        history.push(assistant);

        Ok(reply)
    }
}
