use chrono::{DateTime, Utc};
use common::storage::types::visual_asset::ItemKey;
use sha2::{Digest, Sha256};

const DIGEST_CHARS: usize = 16;

/// Storage key for an uploaded image: `visuals/{word}/{type}/{millis}-{digest}.png`.
///
/// The content digest keeps two uploads in the same millisecond apart.
pub fn asset_storage_key(key: &ItemKey, bytes: &[u8], at: DateTime<Utc>) -> String {
    let digest = format!("{:x}", Sha256::digest(bytes));
    let short: String = digest.chars().take(DIGEST_CHARS).collect();
    format!(
        "visuals/{}/{}/{}-{short}.png",
        sanitize_segment(&key.word_id),
        key.visual_type.as_str(),
        at.timestamp_millis()
    )
}

fn sanitize_segment(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}
