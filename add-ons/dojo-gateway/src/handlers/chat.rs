//! The mentor chat pipeline.
//!
//! Order of operations for one turn: identity, velocity, ownership, quota,
//! persist the user message, then open the model stream. Everything after the
//! stream opens runs in a spawned driver task that owns the send half of the
//! body channel, so a client disconnect drops the receiver without aborting
//! persistence or quota accounting.

use crate::handlers::ApiError;
use crate::quota::QuotaDecision;
use crate::store::WorkspaceStore;
use crate::AppState;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use axum::Json;
use dojo_core::{persona, protocol, ChatTurn, GatewayError, Persona, Role};
use futures_util::StreamExt;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Appended to the visible stream when the upstream model fails mid-turn.
pub const TERMINAL_MARKER: &str = "\n\n*[Connection Terminated]*";

/// Stored as the user's visible message when `isReview` is set; the actual
/// code goes to the model only.
const REVIEW_DISPLAY_TEXT: &str = "Review my code.";

const DEFAULT_LANGUAGE: &str = "javascript";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub workspace_id: String,
    pub prompt: String,
    pub persona: Persona,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
    #[serde(default)]
    pub is_review: bool,
}

pub async fn submit_turn(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let identity = crate::auth::resolve_identity(&state.store, &headers)?;
    state
        .throttle
        .check(&identity.user_id, "chat", state.config.chat_cooldown_ms)?;

    if state
        .store
        .find_owned(&req.workspace_id, &identity.user_id)?
        .is_none()
    {
        return Err(GatewayError::TenantIsolation.into());
    }

    if let QuotaDecision::Deny { unlock_at_ms } =
        state.quota.check_and_reserve(&identity.user_id)?
    {
        return Err(GatewayError::QuotaExhausted { unlock_at_ms }.into());
    }

    let (display_content, model_prompt) = if req.is_review {
        (
            REVIEW_DISPLAY_TEXT.to_string(),
            format!(
                "[SYSTEM NOTE: The user has submitted their editor code for review against \
                 the current objective. Judge it and set 'pass' accordingly.]\n\n{}",
                REVIEW_DISPLAY_TEXT
            ),
        )
    } else {
        (req.prompt.clone(), req.prompt.clone())
    };

    // The user's turn is durable before the model is ever contacted.
    state
        .store
        .append_message(&req.workspace_id, Role::User, &display_content)?;

    // System rows are UI markers (task banners), not conversation.
    let mut turns: Vec<ChatTurn> = req
        .history
        .iter()
        .filter(|t| t.role != Role::System)
        .cloned()
        .collect();
    turns.push(ChatTurn::user(format!(
        "User Message: {}\n\nCurrent Workspace Code:\n```\n{}\n```",
        model_prompt, req.code
    )));

    let instruction = persona::profile(req.persona).instruction.clone();

    let (tx, rx) = mpsc::channel::<String>(64);
    tokio::spawn(drive_turn(
        Arc::clone(&state.store),
        Arc::clone(&state.quota),
        Arc::clone(&state.model),
        tx,
        instruction,
        turns,
        req.workspace_id,
        identity.user_id,
        req.code,
    ));

    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(body)
        .map_err(|e| ApiError(GatewayError::Store(e.to_string())))
}

/// Forwards model chunks to the response channel while accumulating the raw
/// reply, then settles the turn. Send failures are ignored: the client going
/// away must not stop the side effects.
#[allow(clippy::too_many_arguments)]
async fn drive_turn(
    store: Arc<WorkspaceStore>,
    quota: Arc<crate::quota::QuotaLedger>,
    model: Arc<dojo_core::ModelClient>,
    tx: mpsc::Sender<String>,
    instruction: String,
    turns: Vec<ChatTurn>,
    workspace_id: String,
    user_id: String,
    code_buffer: String,
) {
    let mut raw_reply = String::new();

    let mut chunks = match model.stream_reply(&instruction, &turns).await {
        Ok(chunks) => chunks,
        Err(e) => {
            tracing::error!(target: "dojo::chat", workspace = %workspace_id, "Model call failed before streaming: {}", e);
            let _ = tx.send(TERMINAL_MARKER.to_string()).await;
            return;
        }
    };

    while let Some(item) = chunks.recv().await {
        match item {
            Ok(chunk) => {
                raw_reply.push_str(&chunk);
                let _ = tx.send(chunk).await;
            }
            Err(detail) => {
                tracing::error!(target: "dojo::chat", workspace = %workspace_id, "Model stream broke mid-turn: {}", detail);
                let _ = tx.send(TERMINAL_MARKER.to_string()).await;
                // Failed turns persist nothing and consume no quota.
                return;
            }
        }
    }

    if let Err(e) = finish_turn(&store, &quota, &workspace_id, &user_id, &raw_reply, &code_buffer) {
        tracing::error!(target: "dojo::chat", workspace = %workspace_id, "Failed to settle completed turn: {}", e);
    }
}

/// Post-stream settlement: persist the visible reply, commit quota, and, on a
/// passing verdict with a new objective, advance the level.
fn finish_turn(
    store: &WorkspaceStore,
    quota: &crate::quota::QuotaLedger,
    workspace_id: &str,
    user_id: &str,
    raw_reply: &str,
    code_buffer: &str,
) -> Result<(), GatewayError> {
    let decoded = protocol::decode(raw_reply);

    store
        .append_message(workspace_id, Role::Model, &decoded.visible)
        .map_err(|e| GatewayError::Store(e.to_string()))?;
    quota.commit(user_id)?;

    let Some(control) = decoded.control else {
        return Ok(());
    };
    if !control.pass {
        return Ok(());
    }
    let Some(objective) = control.new_objective.as_deref().filter(|o| !o.is_empty()) else {
        return Ok(());
    };

    // The mentor may omit the snippet; the learner's current buffer carries
    // over so progress is never blanked.
    let snapshot = control
        .new_snippet
        .as_deref()
        .filter(|s| !s.is_empty())
        .unwrap_or(code_buffer);
    let language = control
        .language
        .as_deref()
        .filter(|l| !l.is_empty())
        .unwrap_or(DEFAULT_LANGUAGE);

    let (_, level) = store
        .record_advancement(workspace_id, objective, snapshot, language)
        .map_err(|e| GatewayError::Store(e.to_string()))?;
    tracing::info!(
        target: "dojo::chat",
        workspace = %workspace_id,
        step = level.step_number,
        "Level advanced"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::QuotaLedger;
    use dojo_core::protocol::ControlBlock;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, Arc<WorkspaceStore>, QuotaLedger, String) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(WorkspaceStore::new(dir.path().join("dojo.sqlite3")).unwrap());
        store.upsert_user("user-1", "one@example.com").unwrap();
        let ws = store.create_workspace("user-1", Persona::Helios).unwrap();
        let quota = QuotaLedger::new(Arc::clone(&store), 20);
        (dir, store, quota, ws.id)
    }

    #[test]
    fn test_finish_turn_persists_reply_and_commits_quota() {
        let (_dir, store, quota, ws) = fixture();
        let raw = "Nice work so far.";
        finish_turn(&store, &quota, &ws, "user-1", raw, "let x = 1;").unwrap();

        let messages = store.list_messages(&ws).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::Model);
        assert_eq!(messages[0].content, "Nice work so far.");
        assert_eq!(store.get_quota("user-1").unwrap().unwrap().message_count, 1);
        // No control block, no advancement.
        assert!(store.list_levels(&ws).unwrap().is_empty());
    }

    #[test]
    fn test_finish_turn_advances_on_passing_verdict() {
        let (_dir, store, quota, ws) = fixture();
        let raw = protocol::encode(
            "Exactly right. On to loops.",
            &ControlBlock {
                pass: true,
                new_objective: Some("Write a for loop".into()),
                new_snippet: Some("// loop here\n".into()),
                language: Some("javascript".into()),
            },
        );
        finish_turn(&store, &quota, &ws, "user-1", &raw, "").unwrap();

        let messages = store.list_messages(&ws).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::Model);
        // The delimiter and payload never reach the visible transcript.
        assert!(!messages[0].content.contains(protocol::CONTROL_DELIMITER));
        assert_eq!(messages[1].role, Role::System);
        assert_eq!(messages[1].content, "🎯 Current Task: Write a for loop");

        let levels = store.list_levels(&ws).unwrap();
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].step_number, 0);
        assert_eq!(levels[0].task_title, "Write a for loop");
        assert_eq!(levels[0].code_snapshot, "// loop here\n");
    }

    #[test]
    fn test_finish_turn_failing_verdict_does_not_advance() {
        let (_dir, store, quota, ws) = fixture();
        let raw = protocol::encode(
            "Not quite. Look at the condition again.",
            &ControlBlock {
                pass: false,
                new_objective: Some("Should be ignored".into()),
                new_snippet: None,
                language: None,
            },
        );
        finish_turn(&store, &quota, &ws, "user-1", &raw, "let x;").unwrap();
        assert!(store.list_levels(&ws).unwrap().is_empty());
        assert_eq!(store.list_messages(&ws).unwrap().len(), 1);
    }

    #[test]
    fn test_finish_turn_pass_without_objective_does_not_advance() {
        let (_dir, store, quota, ws) = fixture();
        let raw = protocol::encode(
            "Good.",
            &ControlBlock {
                pass: true,
                new_objective: None,
                new_snippet: None,
                language: None,
            },
        );
        finish_turn(&store, &quota, &ws, "user-1", &raw, "").unwrap();
        assert!(store.list_levels(&ws).unwrap().is_empty());
    }

    #[test]
    fn test_finish_turn_falls_back_to_buffer_and_default_language() {
        let (_dir, store, quota, ws) = fixture();
        let raw = protocol::encode(
            "Onward.",
            &ControlBlock {
                pass: true,
                new_objective: Some("Refactor into a function".into()),
                new_snippet: None,
                language: None,
            },
        );
        finish_turn(&store, &quota, &ws, "user-1", &raw, "const y = 2;").unwrap();

        let levels = store.list_levels(&ws).unwrap();
        assert_eq!(levels[0].code_snapshot, "const y = 2;");
        assert_eq!(levels[0].language, "javascript");
    }

    #[test]
    fn test_malformed_control_payload_still_persists_reply() {
        let (_dir, store, quota, ws) = fixture();
        let raw = format!(
            "Some advice.{}{{ not json at all",
            protocol::CONTROL_DELIMITER
        );
        finish_turn(&store, &quota, &ws, "user-1", &raw, "").unwrap();

        let messages = store.list_messages(&ws).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "Some advice.");
        assert_eq!(store.get_quota("user-1").unwrap().unwrap().message_count, 1);
        assert!(store.list_levels(&ws).unwrap().is_empty());
    }
}
