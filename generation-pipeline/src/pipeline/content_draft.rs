use common::error::ServiceError;
use serde::{Deserialize, Serialize};

/// Prompt and captions for one visual, either from the content service or a local template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContentDraft {
    #[serde(alias = "prompt")]
    pub image_prompt: String,
    #[serde(alias = "captionA")]
    pub caption_primary: String,
    #[serde(alias = "captionB")]
    pub caption_secondary: String,
}

impl ContentDraft {
    /// Parses the untrusted model output. Blank fields count as malformed.
    pub fn from_llm_response(raw: &str) -> Result<Self, ServiceError> {
        let draft: ContentDraft = serde_json::from_str(strip_code_fence(raw))
            .map_err(|e| ServiceError::Parse(format!("content response is not a draft: {e}")))?;

        let draft = ContentDraft {
            image_prompt: draft.image_prompt.trim().to_string(),
            caption_primary: draft.caption_primary.trim().to_string(),
            caption_secondary: draft.caption_secondary.trim().to_string(),
        };

        if draft.image_prompt.is_empty()
            || draft.caption_primary.is_empty()
            || draft.caption_secondary.is_empty()
        {
            return Err(ServiceError::Parse(
                "content response left prompt or captions empty".into(),
            ));
        }
        Ok(draft)
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = body.strip_prefix("json").unwrap_or(body);
    body.strip_suffix("```").unwrap_or(body).trim()
}
