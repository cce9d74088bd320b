use common::storage::types::visual_asset::VisualType;

/// Fixed rendering style per visual type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StyleProfile {
    pub visual_type: VisualType,
    pub style: &'static str,
    pub negative_prompt: &'static str,
}

const SHARED_NEGATIVE: &str =
    "text, letters, watermark, signature, logo, blurry, distorted hands, extra limbs, gore";

pub static CONCEPT_PROFILE: StyleProfile = StyleProfile {
    visual_type: VisualType::Concept,
    style: "clean flat illustration, soft pastel palette, single clear subject, plain background, \
            educational picture-book look",
    negative_prompt: SHARED_NEGATIVE,
};

pub static MNEMONIC_PROFILE: StyleProfile = StyleProfile {
    visual_type: VisualType::Mnemonic,
    style: "playful cartoon, exaggerated proportions, bold outlines, vivid colours, \
            one memorable absurd scene",
    negative_prompt: SHARED_NEGATIVE,
};

pub static RHYME_PROFILE: StyleProfile = StyleProfile {
    visual_type: VisualType::Rhyme,
    style: "whimsical storybook watercolour, two linked subjects side by side, warm light, \
            gentle humour",
    negative_prompt: SHARED_NEGATIVE,
};

impl StyleProfile {
    pub fn for_visual_type(visual_type: VisualType) -> &'static StyleProfile {
        match visual_type {
            VisualType::Concept => &CONCEPT_PROFILE,
            VisualType::Mnemonic => &MNEMONIC_PROFILE,
            VisualType::Rhyme => &RHYME_PROFILE,
        }
    }
}
