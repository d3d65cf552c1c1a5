use std::future::Future;

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionNamedToolChoice, ChatCompletionRequestMessage, ChatCompletionTool,
        ChatCompletionToolChoiceOption, ChatCompletionToolType, CreateChatCompletionRequestArgs,
        CreateChatCompletionResponse, CreateImageRequestArgs, FunctionName, FunctionObject, Image,
        ImageModel, ImageResponseFormat, ImageSize,
    },
};
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::{
    config::ProviderConfig,
    error::{Error, Result},
};

/// Chapter text beyond this many characters never reaches the model.
pub const MAX_CHAPTER_CHARS: usize = 15_000;

/// Structured output requested from the model, exactly these two fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ChapterAnalogy {
    /// Una analogía clara y visual que explica los conceptos principales del capítulo en español
    pub analogy: String,
    /// A detailed prompt in English for generating an image that represents this analogy
    pub image_prompt: String,
}

/// Input of the image generation step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRequest {
    pub chapter_id: i64,
    pub book_id: i64,
    pub prompt: String,
}

pub trait AnalogyGenerator: Send + Sync {
    /// `text` is expected to be truncated already.
    fn generate_analogy(
        &self,
        title: &str,
        text: &str,
    ) -> impl Future<Output = Result<ChapterAnalogy>> + Send;
}

pub trait ImageGenerator: Send + Sync {
    /// Returns the URL of the generated image.
    fn generate_image(&self, request: &ImageRequest) -> impl Future<Output = Result<String>> + Send;
}

/// First `max` characters of `text`, on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub fn analogy_prompt(title: &str, text: &str) -> String {
    format!(
        "Eres un experto en hacer comprensibles los temas complejos mediante analogías visuales.\n\n\
         Analiza este capítulo y crea:\n\
         1. Una analogía clara y memorable EN ESPAÑOL que explique sus conceptos principales en términos sencillos\n\
         2. Un prompt detallado EN INGLÉS para generar una imagen que represente visualmente esa analogía\n\n\
         Título del capítulo: {title}\n\n\
         Contenido del capítulo:\n{text}\n\n\
         La analogía debe:\n\
         - Usar objetos o situaciones cotidianas con las que cualquiera pueda identificarse\n\
         - Capturar la esencia de las ideas principales\n\
         - Ser visual y fácil de recordar\n\
         - Estar escrita completamente en español\n\n\
         Para el prompt de imagen (en inglés):\n\
         - Sé específico sobre los elementos visuales, los colores y la composición\n\
         - Describe una escena que represente la analogía\n\
         - Mantenlo artístico y conceptual, sin texto literal en la imagen\n\
         - Estilo: moderno, minimalista, ilustración educativa"
    )
}

/// Validates the tool call arguments against the two-field shape.
pub fn parse_analogy(arguments: &str) -> Result<ChapterAnalogy> {
    let analogy: ChapterAnalogy = serde_json::from_str(arguments)
        .map_err(|e| Error::MalformedOutput(format!("{e}: {arguments}")))?;
    if analogy.analogy.trim().is_empty() {
        return Err(Error::MalformedOutput("empty analogy".to_string()));
    }
    if analogy.image_prompt.trim().is_empty() {
        return Err(Error::MalformedOutput("empty image prompt".to_string()));
    }
    Ok(analogy)
}

/// Arguments of the first tool call of the first choice.
pub fn tool_call_arguments(response: &CreateChatCompletionResponse) -> Result<&str> {
    let message = &response
        .choices
        .first()
        .ok_or_else(|| Error::MalformedOutput("no choices in response".to_string()))?
        .message;
    let call = message
        .tool_calls
        .as_ref()
        .and_then(|tool_calls| tool_calls.first())
        .ok_or_else(|| Error::MalformedOutput("no tool call in response".to_string()))?;
    Ok(&call.function.arguments)
}

pub fn extract_tool<T: JsonSchema>(strict: Option<bool>) -> ChatCompletionTool {
    ChatCompletionTool {
        r#type: ChatCompletionToolType::Function,
        function: FunctionObject {
            name: T::schema_name(),
            description: None,
            parameters: Some(json!(schema_for!(T))),
            strict,
        },
    }
}

/// OpenAI-compatible provider for both generation steps.
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    chat_model: String,
    image_model: String,
}

impl OpenAiClient {
    pub fn new(config: ProviderConfig) -> Self {
        let openai = OpenAIConfig::default()
            .with_api_base(config.base_url)
            .with_api_key(config.api_key);
        Self {
            client: Client::with_config(openai),
            chat_model: config.chat_model,
            image_model: config.image_model,
        }
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self::new(ProviderConfig::from_env()?))
    }

    async fn request_analogy(&self, title: &str, text: &str) -> Result<ChapterAnalogy> {
        let tool = extract_tool::<ChapterAnalogy>(Some(true));
        let tool_choice = ChatCompletionToolChoiceOption::Named(ChatCompletionNamedToolChoice {
            r#type: ChatCompletionToolType::Function,
            function: FunctionName {
                name: tool.function.name.clone(),
            },
        });
        let prompt = analogy_prompt(title, text);
        let request = CreateChatCompletionRequestArgs::default()
            .model(self.chat_model.as_str())
            .messages(vec![ChatCompletionRequestMessage::User(prompt.into())])
            .tools(vec![tool])
            .tool_choice(tool_choice)
            .build()
            .map_err(|e| Error::Generation(e.to_string()))?;
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| Error::Generation(e.to_string()))?;
        let arguments = tool_call_arguments(&response)?;
        debug!(title, "analogy tool call received");
        parse_analogy(arguments)
    }

    async fn request_image(&self, request: &ImageRequest) -> Result<String> {
        let image_request = CreateImageRequestArgs::default()
            .prompt(request.prompt.as_str())
            .model(ImageModel::Other(self.image_model.clone()))
            .size(ImageSize::S1024x1024)
            .response_format(ImageResponseFormat::Url)
            .n(1)
            .build()
            .map_err(|e| Error::ImageGeneration(e.to_string()))?;
        let response = self
            .client
            .images()
            .create(image_request)
            .await
            .map_err(|e| Error::ImageGeneration(e.to_string()))?;
        let image = response
            .data
            .first()
            .ok_or_else(|| Error::ImageGeneration("no image in response".to_string()))?;
        let url = match image.as_ref() {
            Image::Url { url, .. } => url.clone(),
            Image::B64Json { b64_json, .. } => format!("data:image/png;base64,{}", b64_json),
        };
        Ok(url)
    }
}

impl AnalogyGenerator for OpenAiClient {
    fn generate_analogy(
        &self,
        title: &str,
        text: &str,
    ) -> impl Future<Output = Result<ChapterAnalogy>> + Send {
        self.request_analogy(title, text)
    }
}

impl ImageGenerator for OpenAiClient {
    fn generate_image(&self, request: &ImageRequest) -> impl Future<Output = Result<String>> + Send {
        self.request_image(request)
    }
}
