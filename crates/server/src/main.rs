use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use server_api::{
    execute_counter_command, handle_block_action, load_message_payload, ApiContext,
};
use shared::{
    blocks::Surface,
    domain::{MessageId, RoomId, UserRef},
    error::{ApiError, ErrorCode},
    protocol::{
        BlockActionEvent, InteractionOrigin, InteractionResponse, MessagePayload, ServerEvent,
    },
};
use storage::Storage;
use tokio::sync::broadcast;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, warn};

mod commands;
mod config;

use commands::{is_registered, registered_commands, CommandDescriptor};
use config::{load_settings, prepare_database_url};

#[derive(Clone)]
struct AppState {
    api: ApiContext,
    events: broadcast::Sender<ServerEvent>,
}

#[derive(Debug, Deserialize)]
struct CommandInvocation {
    room_id: String,
    #[serde(default = "CommandInvocation::default_origin")]
    origin: InteractionOrigin,
}

impl CommandInvocation {
    fn default_origin() -> InteractionOrigin {
        InteractionOrigin::Channel
    }
}

#[derive(Debug, Deserialize)]
struct BlockActionRequest {
    origin: InteractionOrigin,
    #[serde(flatten)]
    event: BlockActionEvent,
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    surface: Option<Surface>,
}

const MAX_BODY_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    let api = ApiContext {
        storage,
        app_user: UserRef::new(settings.app_user_id),
    };
    let (events, _) = broadcast::channel(256);

    let state = AppState { api, events };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/commands", get(list_commands))
        .route("/commands/:command", post(invoke_command))
        .route("/interactions/block_action", post(block_action))
        .route("/messages/:message_id", get(fetch_message))
        .route("/ws", get(ws_handler))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

async fn healthz(
    State(state): State<Arc<AppState>>,
) -> Result<&'static str, (StatusCode, Json<ApiError>)> {
    state.api.storage.health_check().await.map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError::new(ErrorCode::Internal, e.to_string())),
        )
    })?;
    Ok("ok")
}

async fn list_commands() -> Json<Vec<CommandDescriptor>> {
    Json(registered_commands())
}

async fn invoke_command(
    State(state): State<Arc<AppState>>,
    Path(command): Path<String>,
    Json(req): Json<CommandInvocation>,
) -> Result<Json<ServerEvent>, (StatusCode, Json<ApiError>)> {
    if !is_registered(&command) {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ApiError::new(
                ErrorCode::NotFound,
                format!("unknown command '{command}'"),
            )),
        ));
    }

    let event = execute_counter_command(&state.api, req.origin, &RoomId::new(req.room_id))
        .await
        .map_err(|e| (status_for(&e.code), Json(e)))?;
    let _ = state.events.send(event.clone());
    Ok(Json(event))
}

async fn block_action(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BlockActionRequest>,
) -> (StatusCode, Json<InteractionResponse>) {
    match handle_block_action(&state.api, req.origin, req.event).await {
        Ok(event) => {
            let _ = state.events.send(event);
            (StatusCode::OK, Json(InteractionResponse::ok()))
        }
        Err(error) => {
            warn!(code = ?error.code, message = %error.message, "block action failed");
            (
                status_for(&error.code),
                Json(InteractionResponse::failure(error)),
            )
        }
    }
}

async fn fetch_message(
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<i64>,
    Query(q): Query<MessageQuery>,
) -> Result<Json<MessagePayload>, (StatusCode, Json<ApiError>)> {
    let payload = load_message_payload(&state.api, MessageId(message_id), q.surface)
        .await
        .map_err(|e| (status_for(&e.code), Json(e)))?;
    Ok(Json(payload))
}

fn status_for(code: &ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Decode | ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Transport | ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket))
}

async fn ws_connection(state: Arc<AppState>, socket: axum::extract::ws::WebSocket) {
    use axum::extract::ws::Message;
    use futures::{SinkExt, StreamExt};

    let (mut sender, mut receiver) = socket.split();
    let mut events_rx = state.events.subscribe();

    let send_task = tokio::spawn(async move {
        while let Ok(event) = events_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(_msg)) = receiver.next().await {}

    send_task.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body, body::Body, http::Request};
    use shared::blocks::{Block, Element};
    use tower::ServiceExt;

    async fn test_app() -> (Router, ApiContext) {
        let storage = Storage::new("sqlite::memory:").await.expect("db");
        let api = ApiContext {
            storage,
            app_user: UserRef::new("counter-app"),
        };
        let (events, _) = broadcast::channel(32);
        let app = build_router(Arc::new(AppState {
            api: api.clone(),
            events,
        }));
        (app, api)
    }

    async fn json_body<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json")
    }

    fn actions_block_id(blocks: &[Block]) -> String {
        for block in blocks {
            if let Block::Conditional { blocks: inner, .. } = block {
                if let Some(Block::Actions { block_id, .. }) = inner.first() {
                    return block_id.as_str().to_string();
                }
            }
        }
        panic!("expected an actions group");
    }

    fn increment_value(blocks: &[Block]) -> String {
        for block in blocks {
            if let Block::Conditional { blocks: inner, .. } = block {
                if let Some(Block::Actions { elements, .. }) = inner.first() {
                    let Element::Button { value, .. } = &elements[0];
                    return value.clone();
                }
            }
        }
        panic!("expected an actions group");
    }

    async fn create_counter_message(app: &Router) -> MessagePayload {
        let request = Request::post(format!("/commands/{}", server_api::COUNTER_COMMAND))
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({ "room_id": "general" }).to_string(),
            ))
            .expect("request");
        let response = app.clone().oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let event: ServerEvent = json_body(response).await;
        let ServerEvent::MessageCreated { message } = event else {
            panic!("expected message created event");
        };
        message
    }

    #[tokio::test]
    async fn healthz_reports_ok_when_storage_is_ready() {
        let (app, _api) = test_app().await;
        let request = Request::get("/healthz")
            .body(Body::empty())
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let body = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        assert_eq!(body.as_ref(), b"ok");
    }

    #[tokio::test]
    async fn command_listing_exposes_the_counter_command() {
        let (app, _api) = test_app().await;
        let request = Request::get("/commands")
            .body(Body::empty())
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let descriptors: Vec<serde_json::Value> = json_body(response).await;
        assert_eq!(descriptors.len(), 1);
        assert_eq!(
            descriptors[0]["command"],
            serde_json::json!("conditionalBlockTest")
        );
    }

    #[tokio::test]
    async fn unknown_command_is_rejected_with_not_found() {
        let (app, _api) = test_app().await;
        let request = Request::post("/commands/someOtherCommand")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({ "room_id": "general" }).to_string(),
            ))
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn command_and_interaction_webhook_round_trip() {
        let (app, _api) = test_app().await;
        let message = create_counter_message(&app).await;
        let block_id = actions_block_id(&message.blocks);
        let value = increment_value(&message.blocks);
        assert_eq!(value, r#"{"c":1}"#);

        let webhook = Request::post("/interactions/block_action")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({
                    "origin": "channel",
                    "block_id": block_id,
                    "action_id": "increment",
                    "value": value,
                    "container": { "id": message.message_id.0.to_string() },
                })
                .to_string(),
            ))
            .expect("request");
        let response = app.clone().oneshot(webhook).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let ack: InteractionResponse = json_body(response).await;
        assert!(ack.success);
        assert!(ack.errors.is_none());

        let fetch = Request::get(format!("/messages/{}", message.message_id.0))
            .body(Body::empty())
            .expect("request");
        let fetch_response = app.oneshot(fetch).await.expect("response");
        assert_eq!(fetch_response.status(), StatusCode::OK);
        let payload: MessagePayload = json_body(fetch_response).await;
        assert_eq!(increment_value(&payload.blocks), r#"{"c":2}"#);
        assert_eq!(actions_block_id(&payload.blocks), block_id);
    }

    #[tokio::test]
    async fn webhook_reports_failure_for_a_malformed_payload() {
        let (app, api) = test_app().await;
        let message = create_counter_message(&app).await;
        let block_id = actions_block_id(&message.blocks);
        let before = api
            .storage
            .load_message(message.message_id)
            .await
            .expect("load")
            .expect("exists");

        let webhook = Request::post("/interactions/block_action")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({
                    "origin": "channel",
                    "block_id": block_id,
                    "action_id": "increment",
                    "value": "not-json",
                    "container": { "id": "" },
                })
                .to_string(),
            ))
            .expect("request");
        let response = app.oneshot(webhook).await.expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let ack: InteractionResponse = json_body(response).await;
        assert!(!ack.success);
        let errors = ack.errors.expect("errors");
        assert!(matches!(errors[0].code, ErrorCode::Decode));

        let after = api
            .storage
            .load_message(message.message_id)
            .await
            .expect("load")
            .expect("exists");
        assert_eq!(after.blocks_json, before.blocks_json);
    }

    #[tokio::test]
    async fn webhook_rejects_an_unknown_block_id() {
        let (app, _api) = test_app().await;

        let webhook = Request::post("/interactions/block_action")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({
                    "origin": "channel",
                    "block_id": "no-such-block",
                    "action_id": "increment",
                    "value": r#"{"c":1}"#,
                    "container": { "id": "" },
                })
                .to_string(),
            ))
            .expect("request");
        let response = app.oneshot(webhook).await.expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let ack: InteractionResponse = json_body(response).await;
        assert!(!ack.success);
    }

    #[tokio::test]
    async fn message_fetch_applies_the_surface_filter() {
        let (app, _api) = test_app().await;
        let message = create_counter_message(&app).await;

        let livechat = Request::get(format!(
            "/messages/{}?surface=livechat",
            message.message_id.0
        ))
        .body(Body::empty())
        .expect("request");
        let livechat_response = app.clone().oneshot(livechat).await.expect("response");
        assert_eq!(livechat_response.status(), StatusCode::OK);
        let livechat_payload: MessagePayload = json_body(livechat_response).await;
        assert!(livechat_payload
            .blocks
            .iter()
            .any(|b| matches!(b, Block::Actions { .. })));

        let channel = Request::get(format!(
            "/messages/{}?surface=channel",
            message.message_id.0
        ))
        .body(Body::empty())
        .expect("request");
        let channel_response = app.oneshot(channel).await.expect("response");
        assert_eq!(channel_response.status(), StatusCode::OK);
        let channel_payload: MessagePayload = json_body(channel_response).await;
        assert!(channel_payload
            .blocks
            .iter()
            .all(|b| matches!(b, Block::Section { .. })));
    }

    #[tokio::test]
    async fn fetching_a_missing_message_is_not_found() {
        let (app, _api) = test_app().await;
        let request = Request::get("/messages/424242")
            .body(Body::empty())
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
