use async_openai::types::{
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
    ResponseFormat, ResponseFormatJsonSchema,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use common::{
    error::ServiceError,
    storage::{
        store::StorageManager,
        types::{visual_asset::VisualType, word_context::WordContext},
    },
    utils::config::AppConfig,
};
use reqwest::Response;
use serde::{Deserialize, Serialize};

use super::{content_draft::ContentDraft, profiles::StyleProfile};
use crate::utils::llm_instructions::{
    content_user_message, get_visual_content_schema, VISUAL_CONTENT_SYSTEM_MESSAGE,
};

const ERROR_BODY_LIMIT: usize = 512;

/// External calls made while producing one visual. Each call is a single attempt; retries and
/// pacing happen around it.
#[async_trait]
pub trait GenerationServices: Send + Sync {
    async fn synthesize_content(
        &self,
        visual_type: VisualType,
        word: &WordContext,
    ) -> Result<ContentDraft, ServiceError>;

    /// Returns the bytes of one square image.
    async fn synthesize_image(
        &self,
        prompt: &str,
        profile: &StyleProfile,
    ) -> Result<Bytes, ServiceError>;

    /// Stores the bytes under `key` and returns the public URL.
    async fn upload_asset(&self, key: &str, bytes: Bytes) -> Result<String, ServiceError>;
}

#[derive(Debug, Serialize)]
struct ImageGenerationRequest<'a> {
    model: &'a str,
    prompt: String,
    negative_prompt: &'a str,
    n: u8,
    size: String,
    response_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct ImageGenerationResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    #[serde(default)]
    b64_json: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

pub struct DefaultGenerationServices {
    http: reqwest::Client,
    config: AppConfig,
    storage: StorageManager,
}

impl DefaultGenerationServices {
    pub fn new(config: AppConfig, storage: StorageManager) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            storage,
        }
    }

    fn endpoint(base: &str, path: &str) -> String {
        format!("{}/{}", base.trim_end_matches('/'), path)
    }

    fn prepare_llm_request(
        &self,
        visual_type: VisualType,
        word: &WordContext,
    ) -> Result<CreateChatCompletionRequest, ServiceError> {
        let user_message = content_user_message(
            visual_type,
            word,
            &self.config.primary_locale,
            &self.config.secondary_locale,
        );

        let response_format = ResponseFormat::JsonSchema {
            json_schema: ResponseFormatJsonSchema {
                description: Some("Image prompt and bilingual captions for a vocabulary visual".into()),
                name: "visual_content".into(),
                schema: Some(get_visual_content_schema()),
                strict: Some(true),
            },
        };

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.config.content_model)
            .messages([
                ChatCompletionRequestSystemMessage::from(VISUAL_CONTENT_SYSTEM_MESSAGE).into(),
                ChatCompletionRequestUserMessage::from(user_message).into(),
            ])
            .response_format(response_format)
            .build()?;

        Ok(request)
    }

    fn image_request(&self, prompt: &str, profile: &StyleProfile) -> ImageGenerationRequest<'_> {
        let size = self.config.image_size;
        ImageGenerationRequest {
            model: &self.config.image_model,
            prompt: format!(
                "{prompt}\n\nStyle: {}\nAvoid: {}",
                profile.style, profile.negative_prompt
            ),
            negative_prompt: profile.negative_prompt,
            n: 1,
            size: format!("{size}x{size}"),
            response_format: "b64_json",
        }
    }

    async fn fetch_image_url(&self, url: &str) -> Result<Bytes, ServiceError> {
        let response = self.http.get(url).send().await?;
        let response = ensure_success(response).await?;
        Ok(response.bytes().await?)
    }
}

/// Turns non-2xx responses into `ServiceError::Status` carrying a trimmed body.
async fn ensure_success(response: Response) -> Result<Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ServiceError::Status {
        status: status.as_u16(),
        body: body.chars().take(ERROR_BODY_LIMIT).collect(),
    })
}

#[async_trait]
impl GenerationServices for DefaultGenerationServices {
    async fn synthesize_content(
        &self,
        visual_type: VisualType,
        word: &WordContext,
    ) -> Result<ContentDraft, ServiceError> {
        let request = self.prepare_llm_request(visual_type, word)?;
        let response = self
            .http
            .post(Self::endpoint(&self.config.openai_base_url, "chat/completions"))
            .bearer_auth(&self.config.openai_api_key)
            .json(&request)
            .send()
            .await?;
        let body = ensure_success(response).await?.text().await?;
        let completion: CreateChatCompletionResponse = serde_json::from_str(&body)?;

        let content = completion
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
            .ok_or_else(|| ServiceError::Parse("no content in completion".into()))?;

        ContentDraft::from_llm_response(content)
    }

    async fn synthesize_image(
        &self,
        prompt: &str,
        profile: &StyleProfile,
    ) -> Result<Bytes, ServiceError> {
        let request = self.image_request(prompt, profile);
        let response = self
            .http
            .post(Self::endpoint(&self.config.image_base_url, "images/generations"))
            .bearer_auth(self.config.image_api_key())
            .json(&request)
            .send()
            .await?;
        let body = ensure_success(response).await?.text().await?;
        let parsed: ImageGenerationResponse = serde_json::from_str(&body)?;

        let datum = parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::Parse("image response contained no images".into()))?;

        let bytes = match (datum.b64_json, datum.url) {
            (Some(encoded), _) => STANDARD
                .decode(encoded.trim())
                .map(Bytes::from)
                .map_err(|e| ServiceError::Parse(format!("image payload is not base64: {e}")))?,
            (None, Some(url)) => self.fetch_image_url(&url).await?,
            (None, None) => {
                return Err(ServiceError::Parse(
                    "image response had neither b64_json nor url".into(),
                ));
            }
        };

        if bytes.is_empty() {
            return Err(ServiceError::Parse("image service returned an empty image".into()));
        }
        Ok(bytes)
    }

    async fn upload_asset(&self, key: &str, bytes: Bytes) -> Result<String, ServiceError> {
        self.storage.put(key, bytes).await?;
        Ok(self.storage.public_url(key))
    }
}
