use chrono::Utc;
use common::{
    error::AppError,
    storage::types::{job::ItemStage, visual_asset::VisualAsset},
};
use state_machines::core::GuardError;
use tracing::{debug, instrument, warn};

use crate::{pacer::CallClass, utils::asset_key::asset_storage_key};

use super::{
    context::PipelineContext,
    fallback::template_draft,
    profiles::StyleProfile,
    state::{ContentDone, ContentPending, ImageDone, Succeeded, VisualMachine},
};

#[instrument(
    level = "trace",
    skip_all,
    fields(word_id = %ctx.key.word_id, visual_type = %ctx.key.visual_type)
)]
pub async fn load_word(ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
    let word = ctx
        .records
        .get_word_context(&ctx.key.word_id)
        .await?
        .ok_or_else(|| {
            AppError::Processing(format!("no word record for {}", ctx.key.word_id))
        })?;
    ctx.word = Some(word);
    Ok(())
}

#[instrument(
    level = "trace",
    skip_all,
    fields(word_id = %ctx.key.word_id, visual_type = %ctx.key.visual_type)
)]
pub async fn synthesize_content(
    machine: VisualMachine<(), ContentPending>,
    ctx: &mut PipelineContext<'_>,
) -> Result<VisualMachine<(), ContentDone>, AppError> {
    let visual_type = ctx.key.visual_type;
    let services = ctx.services;
    let invoker = ctx.invoker;
    let word = ctx.word()?;

    let outcome = ctx
        .pacer
        .paced(
            CallClass::Word,
            invoker.invoke_tracked("content", || services.synthesize_content(visual_type, word)),
        )
        .await;

    let (draft, retries, fallback_used) = match outcome {
        Ok((draft, retries)) => (draft, retries, false),
        Err(failure) => {
            warn!(
                word_id = %word.word_id,
                visual_type = %visual_type,
                attempts = failure.attempts,
                error = %failure.error,
                "content synthesis failed; using local template"
            );
            (template_draft(visual_type, word), failure.retries(), true)
        }
    };

    debug!(
        word_id = %ctx.key.word_id,
        visual_type = %visual_type,
        retries,
        fallback_used,
        prompt_chars = draft.image_prompt.chars().count(),
        "visual content ready"
    );

    ctx.add_retries(retries);
    ctx.item.fallback_used = fallback_used;
    ctx.draft = Some(draft);

    let machine = machine
        .compose()
        .map_err(|(_, guard)| map_guard_error("compose", &guard))?;
    ctx.advance(ItemStage::ContentDone).await?;
    Ok(machine)
}

#[instrument(
    level = "trace",
    skip_all,
    fields(word_id = %ctx.key.word_id, visual_type = %ctx.key.visual_type)
)]
pub async fn synthesize_image(
    machine: VisualMachine<(), ContentDone>,
    ctx: &mut PipelineContext<'_>,
) -> Result<VisualMachine<(), ImageDone>, AppError> {
    let machine = machine
        .request_image()
        .map_err(|(_, guard)| map_guard_error("request_image", &guard))?;
    ctx.advance(ItemStage::ImagePending).await?;

    let profile = StyleProfile::for_visual_type(ctx.key.visual_type);
    let services = ctx.services;
    let invoker = ctx.invoker;
    let prompt = ctx.draft()?.image_prompt.clone();

    let outcome = ctx
        .pacer
        .paced(
            CallClass::Image,
            invoker.invoke_tracked("image", || services.synthesize_image(&prompt, profile)),
        )
        .await;

    let bytes = match outcome {
        Ok((bytes, retries)) => {
            ctx.add_retries(retries);
            bytes
        }
        Err(failure) => {
            ctx.add_retries(failure.retries());
            return Err(failure.into());
        }
    };

    debug!(
        word_id = %ctx.key.word_id,
        visual_type = %ctx.key.visual_type,
        image_bytes = bytes.len(),
        retries = ctx.item.retries,
        "image synthesized"
    );
    ctx.image = Some(bytes);

    let machine = machine
        .render()
        .map_err(|(_, guard)| map_guard_error("render", &guard))?;
    ctx.advance(ItemStage::ImageDone).await?;
    Ok(machine)
}

#[instrument(
    level = "trace",
    skip_all,
    fields(word_id = %ctx.key.word_id, visual_type = %ctx.key.visual_type)
)]
pub async fn persist_asset(
    machine: VisualMachine<(), ImageDone>,
    ctx: &mut PipelineContext<'_>,
) -> Result<VisualMachine<(), Succeeded>, AppError> {
    let machine = machine
        .store()
        .map_err(|(_, guard)| map_guard_error("store", &guard))?;
    ctx.advance(ItemStage::PersistPending).await?;

    let bytes = ctx.take_image()?;
    let now = Utc::now();
    let storage_key = asset_storage_key(&ctx.key, &bytes, now);
    let services = ctx.services;

    let outcome = ctx
        .invoker
        .invoke_tracked("upload", || services.upload_asset(&storage_key, bytes.clone()))
        .await;

    let image_url = match outcome {
        Ok((url, retries)) => {
            ctx.add_retries(retries);
            url
        }
        Err(failure) => {
            ctx.add_retries(failure.retries());
            return Err(failure.into());
        }
    };

    let draft = ctx.take_draft()?;
    let asset = VisualAsset {
        word_id: ctx.key.word_id.clone(),
        visual_type: ctx.key.visual_type,
        image_url,
        storage_key,
        prompt: draft.image_prompt,
        caption_primary: draft.caption_primary,
        caption_secondary: draft.caption_secondary,
        fallback_used: ctx.item.fallback_used,
        created_at: now,
        updated_at: now,
    };
    let stored = ctx.records.upsert_visual_asset(asset).await?;

    debug!(
        word_id = %ctx.key.word_id,
        visual_type = %ctx.key.visual_type,
        image_url = %stored.image_url,
        "visual asset stored"
    );

    let machine = machine
        .commit()
        .map_err(|(_, guard)| map_guard_error("commit", &guard))?;
    ctx.item.succeed(stored)?;
    Ok(machine)
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid visual pipeline transition during {event}: {guard:?}"
    ))
}
