use serde::{Deserialize, Serialize};

use super::StoredObject;

/// Hints already attached to a word by editors; reused when building prompts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExistingHints {
    #[serde(default)]
    pub mnemonic: Option<String>,
    #[serde(default)]
    pub rhyme: Option<String>,
}

/// Everything the pipeline needs to know about a vocabulary entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WordContext {
    pub word_id: String,
    pub headword: String,
    #[serde(default)]
    pub part_of_speech: Option<String>,
    /// Definitions in the primary locale.
    #[serde(default)]
    pub definitions: Vec<String>,
    /// Glosses in the secondary locale.
    #[serde(default)]
    pub translations: Vec<String>,
    #[serde(default)]
    pub examples: Vec<String>,
    #[serde(default)]
    pub hints: ExistingHints,
}

impl WordContext {
    pub fn new(word_id: impl Into<String>, headword: impl Into<String>) -> Self {
        Self {
            word_id: word_id.into(),
            headword: headword.into(),
            part_of_speech: None,
            definitions: Vec::new(),
            translations: Vec::new(),
            examples: Vec::new(),
            hints: ExistingHints::default(),
        }
    }

    pub fn primary_definition(&self) -> Option<&str> {
        self.definitions
            .iter()
            .map(String::as_str)
            .find(|d| !d.trim().is_empty())
    }

    pub fn primary_translation(&self) -> Option<&str> {
        self.translations
            .iter()
            .map(String::as_str)
            .find(|t| !t.trim().is_empty())
    }

    pub fn first_example(&self) -> Option<&str> {
        self.examples
            .iter()
            .map(String::as_str)
            .find(|e| !e.trim().is_empty())
    }
}

impl StoredObject for WordContext {
    fn table_name() -> &'static str {
        "word_context"
    }

    fn record_id(&self) -> String {
        self.word_id.clone()
    }
}
