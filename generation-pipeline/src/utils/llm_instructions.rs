use common::storage::types::{visual_asset::VisualType, word_context::WordContext};
use serde_json::json;

pub static VISUAL_CONTENT_SYSTEM_MESSAGE: &str = "You design study visuals for language learners. \
For the given vocabulary entry and visual type, write one prompt for an image model and two short captions. \
The image prompt describes a single square illustration with no text in the picture. \
caption_primary is written in the primary locale, caption_secondary in the secondary locale. \
Captions are at most 80 characters. Answer with JSON only.";

fn visual_type_brief(visual_type: VisualType) -> &'static str {
    match visual_type {
        VisualType::Concept => {
            "concept: depict the core meaning of the word as directly as possible"
        }
        VisualType::Mnemonic => {
            "mnemonic: build a vivid, slightly absurd scene that links the look or sound of the word to its meaning"
        }
        VisualType::Rhyme => {
            "rhyme: pair the word with a familiar rhyming word and show both in one scene"
        }
    }
}

pub fn content_user_message(
    visual_type: VisualType,
    word: &WordContext,
    primary_locale: &str,
    secondary_locale: &str,
) -> String {
    let part_of_speech = word.part_of_speech.as_deref().unwrap_or("unknown");
    let mnemonic_hint = word.hints.mnemonic.as_deref().unwrap_or("none");
    let rhyme_hint = word.hints.rhyme.as_deref().unwrap_or("none");

    format!(
        "Visual type: {brief}\n\
         Headword: {headword}\n\
         Part of speech: {part_of_speech}\n\
         Definitions: {definitions:?}\n\
         Translations: {translations:?}\n\
         Examples: {examples:?}\n\
         Existing mnemonic hint: {mnemonic_hint}\n\
         Existing rhyme hint: {rhyme_hint}\n\
         Primary locale: {primary_locale}\n\
         Secondary locale: {secondary_locale}",
        brief = visual_type_brief(visual_type),
        headword = word.headword,
        definitions = word.definitions,
        translations = word.translations,
        examples = word.examples,
    )
}

pub fn get_visual_content_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "image_prompt": { "type": "string" },
            "caption_primary": { "type": "string" },
            "caption_secondary": { "type": "string" }
        },
        "required": ["image_prompt", "caption_primary", "caption_secondary"],
        "additionalProperties": false
    })
}
