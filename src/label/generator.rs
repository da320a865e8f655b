use std::time::Duration;

use async_openai::Client;
use async_openai::config::{Config, OpenAIConfig};
use async_openai::types::evals::InputTextContent;
use async_openai::types::responses::{
    CreateResponse, InputContent, InputItem, InputMessage, InputParam, InputRole, Item,
    MessageItem, OutputItem, OutputMessageContent, Reasoning, ReasoningEffort, RefusalContent,
    ResponseFormatJsonSchema, ResponseTextParam, TextResponseFormatConfiguration, Truncation,
};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, trace};

use crate::{AppError, AppResult};

/// Structured-output schema the model should follow, when it supports one.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonReplySchema {
    pub name: String,
    pub description: String,
    pub schema: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerateTextRequest {
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub schema: Option<JsonReplySchema>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateTextResponse {
    pub response: String,
}

/// Optional text-generation backend. Any call may fail or hang; callers
/// bound it with a timeout and fall back.
pub trait TextGenerator: Send + Sync {
    fn generate_text(
        &self,
        request: GenerateTextRequest,
    ) -> BoxFuture<'_, AppResult<GenerateTextResponse>>;
}

/// Connection settings for an OpenAI-compatible server.
#[derive(Debug, Clone)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
    pub api_version: String,
    pub secure: bool,
}

impl ServerAddress {
    pub fn api_base(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!(
            "{scheme}://{}:{}/{}",
            self.host,
            self.port,
            self.api_version.trim_matches('/')
        )
    }
}

/// [`TextGenerator`] backed by the Responses API of an OpenAI-compatible server.
pub struct OpenAiTextGenerator {
    client: Client<Box<dyn Config>>,
    timeout: Duration,
}

impl OpenAiTextGenerator {
    pub fn new(client: Client<Box<dyn Config>>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Build a client pointed at a local LM Studio-compatible server.
    #[tracing::instrument(name = "Connecting to text generation server", level = "debug")]
    pub fn connect(address: &ServerAddress, timeout: Duration) -> Self {
        let config =
            Box::new(OpenAIConfig::default().with_api_base(address.api_base())) as Box<dyn Config>;
        Self::new(Client::with_config(config), timeout)
    }

    fn build_request(request: GenerateTextRequest) -> CreateResponse {
        let input = vec![InputItem::Item(Item::Message(MessageItem::Input(
            InputMessage {
                content: vec![InputContent::InputText(InputTextContent {
                    text: request.prompt,
                })],
                role: InputRole::User,
                status: None,
            },
        )))];
        let text = request.schema.map(|s| ResponseTextParam {
            format: TextResponseFormatConfiguration::JsonSchema(ResponseFormatJsonSchema {
                description: Some(s.description),
                schema: Some(s.schema),
                name: s.name,
                strict: None,
            }),
            verbosity: None,
        });
        CreateResponse {
            model: Some(request.model),
            input: InputParam::Items(input),
            background: Some(false),
            max_output_tokens: Some(request.max_tokens),
            reasoning: Some(Reasoning {
                effort: Some(ReasoningEffort::Low),
                summary: None,
            }),
            store: Some(false),
            stream: Some(false),
            temperature: Some(0.2),
            text,
            truncation: Some(Truncation::Disabled),
            ..Default::default()
        }
    }
}

impl TextGenerator for OpenAiTextGenerator {
    fn generate_text(
        &self,
        request: GenerateTextRequest,
    ) -> BoxFuture<'_, AppResult<GenerateTextResponse>> {
        async move {
            let request = Self::build_request(request);
            let response =
                tokio::time::timeout(self.timeout, self.client.responses().create(request))
                    .await??;
            debug!("AI Response: {:?}", response.id);

            let mut content = String::new();
            let mut refused = None;
            for out in &response.output {
                if let OutputItem::Message(msg) = out {
                    for part in &msg.content {
                        match part {
                            OutputMessageContent::OutputText(text) => content.push_str(&text.text),
                            OutputMessageContent::Refusal(RefusalContent { refusal }) => {
                                error!("AI refused prompt: {}", refusal);
                                refused = Some(refusal.clone());
                            }
                        }
                    }
                }
            }
            trace!("Raw response content: {content}");
            match refused {
                Some(refusal) if content.trim().is_empty() => Err(AppError::Collaborator(
                    format!("model refused the request: {refusal}"),
                )),
                _ => Ok(GenerateTextResponse { response: content }),
            }
        }
        .boxed()
    }
}
