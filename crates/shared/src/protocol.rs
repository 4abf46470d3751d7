use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    blocks::{ActionId, Block},
    domain::{BlockId, MessageId, RoomId},
    error::ApiError,
};

/// Which rendering surface an interaction (or command invocation) came
/// from. The livechat surface carries a direct message reference on every
/// event; the channel surface needs the association lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionOrigin {
    Channel,
    Livechat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRef {
    pub id: String,
}

/// One click on an embedded control, as delivered by the interaction
/// transport. `value` is echoed back verbatim from the clicked button.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockActionEvent {
    pub block_id: BlockId,
    pub action_id: ActionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub container: ContainerRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    pub message_id: MessageId,
    pub room_id: RoomId,
    pub blocks: Vec<Block>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    MessageCreated { message: MessagePayload },
    MessageUpdated { message: MessagePayload },
    Error(ApiError),
}

/// Acknowledgment shape the rendering surface expects so it can clear a
/// pending interaction spinner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ApiError>>,
}

impl InteractionResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            errors: None,
        }
    }

    pub fn failure(error: ApiError) -> Self {
        Self {
            success: false,
            errors: Some(vec![error]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_ids_use_the_wire_names() {
        assert_eq!(
            serde_json::to_string(&ActionId::Increment).expect("json"),
            r#""increment""#
        );
        assert_eq!(
            serde_json::to_string(&ActionId::Decrement).expect("json"),
            r#""decrement""#
        );
    }

    #[test]
    fn success_ack_serializes_without_an_errors_field() {
        let ack = serde_json::to_value(InteractionResponse::ok()).expect("json");
        assert_eq!(ack, serde_json::json!({ "success": true }));
    }

    #[test]
    fn failure_ack_carries_the_error_list() {
        let response = InteractionResponse::failure(ApiError::new(
            crate::error::ErrorCode::NotFound,
            "no such message",
        ));
        let value = serde_json::to_value(response).expect("json");
        assert_eq!(value["success"], serde_json::json!(false));
        assert_eq!(value["errors"][0]["code"], serde_json::json!("not_found"));
    }

    #[test]
    fn block_action_event_accepts_a_missing_value() {
        let event: BlockActionEvent = serde_json::from_str(
            r#"{"block_id":"b-1","action_id":"increment","container":{"id":"42"}}"#,
        )
        .expect("event");
        assert!(event.value.is_none());
        assert_eq!(event.container.id, "42");
    }
}
