//! RPC method handlers.

use std::sync::Arc;

use relay_coordinator::{CoordinatorError, SessionCoordinator};
use relay_core::ids::{QuestionId, SessionId};
use relay_store::StoreError;

use crate::client::{ClientId, ClientRegistry};
use crate::rpc::{self, RpcResponse};

/// Shared state available to all RPC handlers.
pub struct HandlerState {
    pub coordinator: Arc<SessionCoordinator>,
    pub registry: Arc<ClientRegistry>,
}

impl HandlerState {
    pub fn new(coordinator: Arc<SessionCoordinator>, registry: Arc<ClientRegistry>) -> Self {
        Self {
            coordinator,
            registry,
        }
    }
}

/// Dispatch an RPC method to the appropriate handler.
///
/// `client` is present for WebSocket-originated requests; subscription
/// methods require it since events stream back over the same socket.
pub async fn dispatch(
    state: &Arc<HandlerState>,
    client: Option<&ClientId>,
    method: &str,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    match method {
        // Session lifecycle
        "session.start" | "session.create" => session_start(state, params, id),
        "session.get" => session_get(state, params, id),
        "session.list" => session_list(state, id),
        "session.stop" | "session.delete" => session_stop(state, params, id).await,

        // Conversation
        "command.submit" => command_submit(state, params, id).await,
        "answer.submit" => answer_submit(state, params, id).await,
        "session.messages" => session_messages(state, params, id),
        "session.questions" => session_questions(state, params, id),

        // Real-time subscription
        "session.subscribe" => session_subscribe(state, client, params, id).await,
        "session.unsubscribe" => session_unsubscribe(state, client, params, id).await,
        "session.resync" => session_resync(state, params, id),

        // System
        "health" | "system.ping" => health(state, id),

        _ => RpcResponse::method_not_found(id, method),
    }
}

fn coordinator_error(id: Option<serde_json::Value>, e: CoordinatorError) -> RpcResponse {
    match e {
        CoordinatorError::NotFound(msg) => RpcResponse::not_found(id, msg),
        CoordinatorError::InvalidArgument(msg) => RpcResponse::invalid_params(id, msg),
        CoordinatorError::InvalidState(msg) => RpcResponse::invalid_state(id, msg),
        other => RpcResponse::internal_error(id, other.to_string()),
    }
}

fn to_json<T: serde::Serialize>(
    id: Option<serde_json::Value>,
    value: &T,
) -> RpcResponse {
    match serde_json::to_value(value) {
        Ok(json) => RpcResponse::success(id, json),
        Err(e) => RpcResponse::internal_error(id, e.to_string()),
    }
}

fn require_session_id(
    params: &serde_json::Value,
) -> Result<SessionId, String> {
    rpc::require_str(params, "session_id").map(SessionId::from_raw)
}

// ── Session lifecycle ──

fn session_start(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let repository = match rpc::require_str(params, "repository") {
        Ok(r) => r,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let task_description = rpc::optional_str(params, "task_description").map(str::to_owned);

    match state.coordinator.start_session(repository, task_description) {
        Ok(session) => to_json(id, &session),
        Err(e) => coordinator_error(id, e),
    }
}

fn session_get(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let session_id = match require_session_id(params) {
        Ok(s) => s,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };

    match state.coordinator.get_session(&session_id) {
        Ok(session) => to_json(id, &session),
        Err(e) => coordinator_error(id, e),
    }
}

fn session_list(state: &Arc<HandlerState>, id: Option<serde_json::Value>) -> RpcResponse {
    match state.coordinator.list_sessions() {
        Ok(sessions) => {
            let count = sessions.len();
            RpcResponse::success(
                id,
                serde_json::json!({
                    "sessions": sessions,
                    "count": count,
                }),
            )
        }
        Err(e) => coordinator_error(id, e),
    }
}

async fn session_stop(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let session_id = match require_session_id(params) {
        Ok(s) => s,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };

    match state.coordinator.stop_session(&session_id).await {
        Ok(()) => RpcResponse::success(id, serde_json::json!({"stopped": true})),
        Err(e) => coordinator_error(id, e),
    }
}

// ── Conversation ──

async fn command_submit(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let session_id = match require_session_id(params) {
        Ok(s) => s,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let command = match rpc::require_str(params, "command") {
        Ok(c) => c,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };

    match state.coordinator.submit_command(&session_id, command).await {
        Ok(receipt) => RpcResponse::success(
            id,
            serde_json::json!({
                "accepted": true,
                "command_id": receipt.command_id,
            }),
        ),
        Err(e) => coordinator_error(id, e),
    }
}

async fn answer_submit(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let session_id = match require_session_id(params) {
        Ok(s) => s,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let question_id = match rpc::require_str(params, "question_id") {
        Ok(q) => QuestionId::from_raw(q),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let answer = match rpc::require_str(params, "answer") {
        Ok(a) => a,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };

    match state
        .coordinator
        .submit_answer(&session_id, &question_id, answer)
        .await
    {
        Ok(receipt) => RpcResponse::success(
            id,
            serde_json::json!({
                "accepted": true,
                "command_id": receipt.command_id,
            }),
        ),
        Err(e) => coordinator_error(id, e),
    }
}

fn session_messages(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let session_id = match require_session_id(params) {
        Ok(s) => s,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };

    match state.coordinator.list_messages(&session_id) {
        Ok(messages) => {
            let count = messages.len();
            RpcResponse::success(
                id,
                serde_json::json!({
                    "messages": messages,
                    "count": count,
                }),
            )
        }
        Err(e) => coordinator_error(id, e),
    }
}

fn session_questions(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let session_id = match require_session_id(params) {
        Ok(s) => s,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };

    match state.coordinator.pending_questions(&session_id) {
        Ok(questions) => {
            let count = questions.len();
            RpcResponse::success(
                id,
                serde_json::json!({
                    "questions": questions,
                    "count": count,
                }),
            )
        }
        Err(e) => coordinator_error(id, e),
    }
}

// ── Real-time subscription ──

async fn session_subscribe(
    state: &Arc<HandlerState>,
    client: Option<&ClientId>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let Some(client_id) = client else {
        return RpcResponse::invalid_state(id, "subscriptions require a WebSocket connection");
    };
    let session_id = match require_session_id(params) {
        Ok(s) => s,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };

    // Joining an unknown session would hand out a dead membership.
    if let Err(e) = state.coordinator.get_session(&session_id) {
        return coordinator_error(id, e);
    }

    match state.registry.subscribe(client_id, &session_id).await {
        Some(subscriber_id) => RpcResponse::success(
            id,
            serde_json::json!({
                "subscribed": true,
                "subscriber_id": subscriber_id,
            }),
        ),
        None => RpcResponse::internal_error(id, "client connection is gone"),
    }
}

async fn session_unsubscribe(
    state: &Arc<HandlerState>,
    client: Option<&ClientId>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let Some(client_id) = client else {
        return RpcResponse::invalid_state(id, "subscriptions require a WebSocket connection");
    };
    let session_id = match require_session_id(params) {
        Ok(s) => s,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };

    let removed = state.registry.unsubscribe(client_id, &session_id).await;
    RpcResponse::success(id, serde_json::json!({"unsubscribed": removed}))
}

fn session_resync(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let session_id = match require_session_id(params) {
        Ok(s) => s,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };

    match state.coordinator.broadcaster().resync(&session_id) {
        Ok(snapshot) => to_json(id, &snapshot),
        Err(StoreError::NotFound(msg)) => RpcResponse::not_found(id, msg),
        Err(e) => RpcResponse::internal_error(id, e.to_string()),
    }
}

// ── System ──

fn health(state: &Arc<HandlerState>, id: Option<serde_json::Value>) -> RpcResponse {
    match state.coordinator.list_sessions() {
        Ok(sessions) => RpcResponse::success(
            id,
            serde_json::json!({
                "status": "healthy",
                "sessions": sessions.len(),
                "clients": state.registry.count(),
            }),
        ),
        Err(e) => RpcResponse::success(
            id,
            serde_json::json!({
                "status": "degraded",
                "detail": e.to_string(),
            }),
        ),
    }
}
