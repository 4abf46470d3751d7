use chrono::Utc;
use shared::{
    blocks::{counter_blocks, visible_blocks, Block, Surface},
    domain::{BlockId, MessageId, RoomId, UserRef},
    error::{ApiError, ErrorCode},
    protocol::{BlockActionEvent, InteractionOrigin, MessagePayload, ServerEvent},
    state::CounterState,
};
use storage::Storage;
use tracing::info;

/// Wire name of the registered slash command.
pub const COUNTER_COMMAND: &str = "conditionalBlockTest";
pub const COUNTER_COMMAND_DESCRIPTION: &str = "Tests conditional Blocks";

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    /// Service-account identity stamped on every message mutation. Edits
    /// are system-driven, never attributed to the clicking user.
    pub app_user: UserRef,
}

/// Slash-command entry point: mints a fresh control identifier, sends the
/// zero-counter message into the invoking room, and registers the
/// message-to-block association when the invoking surface needs it for
/// later lookups.
pub async fn execute_counter_command(
    ctx: &ApiContext,
    origin: InteractionOrigin,
    room_id: &RoomId,
) -> Result<ServerEvent, ApiError> {
    let block_id = BlockId::mint();
    let blocks = counter_blocks(0, &block_id)?;
    let blocks_json = encode_blocks(&blocks)?;

    let message_id = ctx
        .storage
        .create_message(room_id, &blocks_json)
        .await
        .map_err(transport)?;

    // The livechat surface carries a direct message reference on every
    // interaction, so only channel-originated messages need the record.
    if origin == InteractionOrigin::Channel {
        ctx.storage
            .put_association(message_id, &block_id)
            .await
            .map_err(transport)?;
    }

    info!(
        message_id = message_id.0,
        block_id = block_id.as_str(),
        room_id = room_id.as_str(),
        "counter message created"
    );

    Ok(ServerEvent::MessageCreated {
        message: MessagePayload {
            message_id,
            room_id: room_id.clone(),
            blocks,
            updated_at: Utc::now(),
        },
    })
}

/// Interaction handler: resolves the target message, recovers the counter
/// from the echoed payload, rebuilds the tree under the same control
/// identifier, and commits the mutation. Any failure surfaces to the
/// rendering surface; nothing is retried or swallowed.
pub async fn handle_block_action(
    ctx: &ApiContext,
    origin: InteractionOrigin,
    event: BlockActionEvent,
) -> Result<ServerEvent, ApiError> {
    let message_id = resolve_target_message(ctx, origin, &event).await?;

    // The clicked control's payload already carries the post-delta counter;
    // the action identifier selected that delta at render time.
    let state = CounterState::decode(event.value.as_deref())?;

    let blocks = counter_blocks(state.c, &event.block_id)?;
    let blocks_json = encode_blocks(&blocks)?;

    let updated = ctx
        .storage
        .update_message_blocks(message_id, &ctx.app_user, &blocks_json)
        .await
        .map_err(transport)?;
    if !updated {
        return Err(ApiError::new(ErrorCode::NotFound, "message not found"));
    }

    let room_id = ctx
        .storage
        .load_message(message_id)
        .await
        .map_err(transport)?
        .map(|stored| stored.room_id)
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "message not found"))?;

    info!(
        message_id = message_id.0,
        counter = state.c,
        action = ?event.action_id,
        "counter message updated"
    );

    Ok(ServerEvent::MessageUpdated {
        message: MessagePayload {
            message_id,
            room_id,
            blocks,
            updated_at: Utc::now(),
        },
    })
}

/// Loads a stored message, optionally filtered through the visibility
/// predicate the way the given rendering surface would evaluate it.
pub async fn load_message_payload(
    ctx: &ApiContext,
    message_id: MessageId,
    surface: Option<Surface>,
) -> Result<MessagePayload, ApiError> {
    let stored = ctx
        .storage
        .load_message(message_id)
        .await
        .map_err(transport)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "message not found"))?;

    let blocks: Vec<Block> = serde_json::from_str(&stored.blocks_json).map_err(|e| {
        ApiError::new(
            ErrorCode::Internal,
            format!("stored block tree is unreadable: {e}"),
        )
    })?;
    let blocks = match surface {
        Some(surface) => visible_blocks(&blocks, surface),
        None => blocks,
    };

    Ok(MessagePayload {
        message_id: stored.message_id,
        room_id: stored.room_id,
        blocks,
        updated_at: stored.updated_at,
    })
}

async fn resolve_target_message(
    ctx: &ApiContext,
    origin: InteractionOrigin,
    event: &BlockActionEvent,
) -> Result<MessageId, ApiError> {
    match origin {
        InteractionOrigin::Channel => {
            let association = ctx
                .storage
                .association_by_block_id(&event.block_id)
                .await
                .map_err(transport)?
                .ok_or_else(|| {
                    ApiError::new(
                        ErrorCode::NotFound,
                        format!(
                            "no message associated with block '{}'",
                            event.block_id.as_str()
                        ),
                    )
                })?;
            Ok(association.message_id)
        }
        InteractionOrigin::Livechat => event
            .container
            .id
            .parse::<i64>()
            .map(MessageId)
            .map_err(|_| ApiError::new(ErrorCode::Validation, "container id is not a message id")),
    }
}

fn encode_blocks(blocks: &[Block]) -> Result<String, ApiError> {
    serde_json::to_string(blocks).map_err(|e| {
        ApiError::new(
            ErrorCode::Internal,
            format!("block tree encode failed: {e}"),
        )
    })
}

fn transport(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Transport, err.to_string())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
