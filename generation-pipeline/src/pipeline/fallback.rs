use common::storage::types::{visual_asset::VisualType, word_context::WordContext};

use super::content_draft::ContentDraft;

/// Builds a prompt and captions from the stored word record alone.
pub fn template_draft(visual_type: VisualType, word: &WordContext) -> ContentDraft {
    let headword = word.headword.trim();
    let meaning = word
        .primary_definition()
        .map_or_else(|| format!("the word \"{headword}\""), str::to_string);
    let gloss = word.primary_translation().unwrap_or(meaning.as_str());

    let image_prompt = match visual_type {
        VisualType::Concept => {
            let scene = word
                .first_example()
                .map(|example| format!(" Scene inspired by: {example}"))
                .unwrap_or_default();
            format!("A clear, simple illustration showing the meaning of \"{headword}\": {meaning}.{scene}")
        }
        VisualType::Mnemonic => match word.hints.mnemonic.as_deref().filter(|h| !h.trim().is_empty()) {
            Some(hint) => format!(
                "A memorable, exaggerated scene that helps recall \"{headword}\" ({meaning}). Memory hook: {hint}"
            ),
            None => format!(
                "A memorable, exaggerated scene that makes \"{headword}\" ({meaning}) impossible to forget"
            ),
        },
        VisualType::Rhyme => match word.hints.rhyme.as_deref().filter(|h| !h.trim().is_empty()) {
            Some(rhyme) => format!(
                "A playful scene linking the sound of \"{headword}\" with {rhyme}, while showing {meaning}"
            ),
            None => format!(
                "A playful scene where the sound of \"{headword}\" is acted out, while showing {meaning}"
            ),
        },
    };

    let caption_primary = match visual_type {
        VisualType::Concept => format!("{headword}: {meaning}"),
        VisualType::Mnemonic => word
            .hints
            .mnemonic
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map_or_else(|| format!("Remember {headword}: {meaning}"), str::to_string),
        VisualType::Rhyme => word
            .hints
            .rhyme
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map_or_else(
                || format!("{headword} sounds like what it means: {meaning}"),
                |rhyme| format!("{headword} rhymes with {rhyme}"),
            ),
    };

    ContentDraft {
        image_prompt,
        caption_primary,
        caption_secondary: format!("{headword}: {gloss}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word() -> WordContext {
        let mut ctx = WordContext::new("w-7", "lantern");
        ctx.definitions = vec!["a lamp with a protective case".into()];
        ctx.translations = vec!["灯笼".into()];
        ctx.examples = vec!["She carried a lantern through the garden.".into()];
        ctx
    }

    #[test]
    fn every_visual_type_yields_a_complete_draft() {
        for visual_type in VisualType::ALL {
            let draft = template_draft(visual_type, &word());
            assert!(draft.image_prompt.contains("lantern"));
            assert!(!draft.caption_primary.is_empty());
            assert_eq!(draft.caption_secondary, "lantern: 灯笼");
        }
    }

    #[test]
    fn hints_are_reused_when_present() {
        let mut ctx = word();
        ctx.hints.mnemonic = Some("LANd + TERN: a tern landing with a lamp".into());
        ctx.hints.rhyme = Some("pattern".into());

        let mnemonic = template_draft(VisualType::Mnemonic, &ctx);
        assert!(mnemonic.image_prompt.contains("a tern landing"));
        assert_eq!(mnemonic.caption_primary, "LANd + TERN: a tern landing with a lamp");

        let rhyme = template_draft(VisualType::Rhyme, &ctx);
        assert_eq!(rhyme.caption_primary, "lantern rhymes with pattern");
    }

    #[test]
    fn sparse_records_still_produce_text() {
        let ctx = WordContext::new("w-8", "quixotic");
        let draft = template_draft(VisualType::Concept, &ctx);
        assert!(draft.image_prompt.contains("\"quixotic\""));
        assert_eq!(draft.caption_secondary, "quixotic: the word \"quixotic\"");
    }
}
