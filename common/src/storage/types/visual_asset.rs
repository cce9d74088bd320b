use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

use super::StoredObject;

/// Image category generated for a word. Each drives its own prompt and style profile.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum VisualType {
    Concept,
    Mnemonic,
    Rhyme,
}

impl VisualType {
    pub const ALL: [VisualType; 3] = [VisualType::Concept, VisualType::Mnemonic, VisualType::Rhyme];

    pub fn as_str(&self) -> &'static str {
        match self {
            VisualType::Concept => "concept",
            VisualType::Mnemonic => "mnemonic",
            VisualType::Rhyme => "rhyme",
        }
    }
}

impl fmt::Display for VisualType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VisualType {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "concept" | "meaning" => Ok(VisualType::Concept),
            "mnemonic" | "memory" => Ok(VisualType::Mnemonic),
            "rhyme" | "sound" => Ok(VisualType::Rhyme),
            other => Err(AppError::Validation(format!("unknown visual type '{other}'"))),
        }
    }
}

/// Natural identity of a unit of work and of the asset it produces.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemKey {
    pub word_id: String,
    pub visual_type: VisualType,
}

impl ItemKey {
    pub fn new(word_id: impl Into<String>, visual_type: VisualType) -> Self {
        Self {
            word_id: word_id.into(),
            visual_type,
        }
    }

    /// Record id used for the upsert target; stable across retries and regenerations.
    pub fn record_id(&self) -> String {
        format!("{}__{}", self.word_id, self.visual_type)
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.word_id, self.visual_type)
    }
}

/// A generated visual attached to a word: image reference, the prompt that produced it and
/// captions in the primary and secondary locale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VisualAsset {
    pub word_id: String,
    pub visual_type: VisualType,
    pub image_url: String,
    pub storage_key: String,
    pub prompt: String,
    pub caption_primary: String,
    pub caption_secondary: String,
    #[serde(default)]
    pub fallback_used: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VisualAsset {
    pub fn key(&self) -> ItemKey {
        ItemKey::new(self.word_id.clone(), self.visual_type)
    }
}

impl StoredObject for VisualAsset {
    fn table_name() -> &'static str {
        "visual_asset"
    }

    fn record_id(&self) -> String {
        self.key().record_id()
    }
}
