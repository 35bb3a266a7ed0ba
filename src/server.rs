use crate::catalog::ModelCatalog;
use crate::orchestrator::{ChatOrchestrator, Turn};
use crate::policy::{AccessPolicy, PolicyError};
use crate::prompt::{self, Mode};
use crate::store::{ConversationStore, ConversationRecord, MessageRecord, ProfileRecord};
use axum::body::Body;
use axum::extract::{Form, Query, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use thiserror::Error;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

const USER_HEADER: &str = "x-user-id";
const CONVERSATION_HEADER: &str = "x-conversation-id";
const TITLE_LIMIT: usize = 30;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ConversationStore>,
    pub catalog: ModelCatalog,
    pub policy: Arc<AccessPolicy>,
    pub orchestrator: ChatOrchestrator,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index).post(chat))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not authenticated")]
    Unauthenticated,
    #[error("No prompt provided")]
    MissingPrompt,
    #[error("Conversation not found")]
    UnknownConversation,
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error("Internal error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::MissingPrompt => StatusCode::BAD_REQUEST,
            Self::UnknownConversation => StatusCode::NOT_FOUND,
            Self::Policy(PolicyError::PlanRejected { .. }) => StatusCode::FORBIDDEN,
            Self::Internal(err) => {
                error!("Request failed: {:#}", err);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

async fn health() -> &'static str {
    "ok"
}

/// The auth layer lives in front of this service; it forwards the
/// authenticated user reference in a header.
async fn authed_user(state: &AppState, headers: &HeaderMap) -> Result<ProfileRecord, ApiError> {
    let user_id = headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .ok_or(ApiError::Unauthenticated)?;
    Ok(state.store.ensure_profile(user_id).await?)
}

#[derive(Debug, Deserialize)]
struct IndexQuery {
    conversation_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ActiveConversation {
    conversation: ConversationRecord,
    messages: Vec<MessageRecord>,
}

#[derive(Debug, Serialize)]
struct IndexView {
    conversations: Vec<ConversationRecord>,
    active_conversation: Option<ActiveConversation>,
    available_models: Vec<String>,
    plan: crate::policy::PlanTier,
}

async fn index(
    State(state): State<AppState>,
    Query(query): Query<IndexQuery>,
    headers: HeaderMap,
) -> Result<Json<IndexView>, ApiError> {
    let profile = authed_user(&state, &headers).await?;

    let conversations = state.store.conversations_for(&profile.user_id).await?;

    let active_conversation = match query.conversation_id.as_deref() {
        Some(id) => match state.store.conversation(id).await? {
            Some(conversation) => {
                let messages = state.store.messages_for(&conversation.id).await?;
                Some(ActiveConversation {
                    conversation,
                    messages,
                })
            }
            None => None,
        },
        None => None,
    };

    let available_models = state.catalog.list_installed().await;

    Ok(Json(IndexView {
        conversations,
        active_conversation,
        available_models,
        plan: profile.plan,
    }))
}

#[derive(Debug, Deserialize)]
struct ChatForm {
    model: Option<String>,
    prompt: Option<String>,
    conversation_id: Option<String>,
    mode: Option<String>,
}

fn derive_title(prompt: &str) -> String {
    prompt.chars().take(TITLE_LIMIT).collect()
}

async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<ChatForm>,
) -> Result<Response, ApiError> {
    let profile = authed_user(&state, &headers).await?;

    let prompt = form
        .prompt
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or(ApiError::MissingPrompt)?;

    // The plan gate runs before anything is persisted: a rejected turn
    // leaves no trace.
    let installed = state.catalog.list_installed().await;
    let requested = form.model.as_deref().filter(|m| !m.is_empty());
    let model = state
        .policy
        .resolve_model(requested, &installed, profile.plan)?;

    let conversation = match form.conversation_id.as_deref().filter(|id| !id.is_empty()) {
        Some(id) => state
            .store
            .conversation(id)
            .await?
            .ok_or(ApiError::UnknownConversation)?,
        None => {
            let mode = Mode::parse(form.mode.as_deref().unwrap_or("normal"));
            state
                .store
                .create_conversation(&profile.user_id, &derive_title(prompt), mode)
                .await?
        }
    };

    state
        .store
        .append_message(&conversation.id, prompt, true)
        .await?;

    info!(
        "Starting {} turn on conversation {} with model {}",
        conversation.mode.as_str(),
        conversation.id,
        model
    );

    let messages = prompt::compose(conversation.mode, prompt);
    let rx = state.orchestrator.run(Turn {
        conversation_id: conversation.id.clone(),
        mode: conversation.mode,
        model,
        messages,
    });

    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>));
    let mut response = Response::new(body);
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    if let Ok(value) = HeaderValue::from_str(&conversation.id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(CONVERSATION_HEADER), value);
    }
    Ok(response)
}
