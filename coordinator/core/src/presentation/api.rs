// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP API served by the daemon over TCP and the Unix socket.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Response, Sse,
    },
    routing::{delete, get, post, put},
    Json, Router,
};
use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::application::agent_registry::RegisterAgent;
use crate::application::coordinator::Coordinator;
use crate::application::error::CoordinationError;
use crate::application::service_registry::ClaimRequest;
use crate::domain::identity::IdentityPattern;
use crate::domain::service::{RestartPolicy, ServiceFilter, ServiceStatus};

pub struct AppState {
    pub coordinator: Coordinator,
    pub started_at: Instant,
}

pub fn app(coordinator: Coordinator) -> Router {
    let state = Arc::new(AppState {
        coordinator,
        started_at: Instant::now(),
    });

    Router::new()
        .route("/health", get(health))
        // services
        .route("/claim", post(claim_service))
        .route("/release", delete(release_services))
        .route("/services", get(list_services))
        .route("/services/{id}", get(get_service))
        .route("/services/{id}/status", put(update_service_status))
        .route("/services/{id}/endpoints/{env}", put(set_endpoint))
        // locks
        .route("/locks", get(list_locks))
        .route(
            "/locks/{name}",
            post(acquire_lock)
                .put(extend_lock)
                .delete(release_lock)
                .get(check_lock),
        )
        // messages
        .route("/channels", get(list_channels))
        .route(
            "/msg/{channel}",
            post(publish_message).get(get_messages).delete(clear_channel),
        )
        .route("/msg/{channel}/subscribe", get(subscribe_channel))
        .route("/msg/{channel}/poll", get(poll_channel))
        // agents
        .route("/agents", post(register_agent).get(list_agents))
        .route("/agents/{id}", get(get_agent).delete(unregister_agent))
        .route("/agents/{id}/heartbeat", post(heartbeat_agent))
        // salvage
        .route("/salvage", get(list_salvage))
        .route("/salvage/{agent_id}/claim", post(claim_salvage))
        .route("/salvage/{agent_id}/complete", post(complete_salvage))
        .route("/salvage/{agent_id}/abandon", post(abandon_salvage))
        .route("/salvage/{agent_id}/dismiss", post(dismiss_salvage))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

type Shared = State<Arc<AppState>>;
type ApiResult<T> = Result<Json<T>, ApiError>;

// ============================================================================
// Errors
// ============================================================================

/// Error body: `{"error", "code", "field"?}`.
#[derive(Debug)]
pub struct ApiError(CoordinationError);

impl From<CoordinationError> for ApiError {
    fn from(err: CoordinationError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let field = match &rejection {
            JsonRejection::JsonDataError(err) => json_error_path(err),
            _ => None,
        };
        Self(CoordinationError::validation(
            field.map_or(Cow::Borrowed("body"), Cow::Owned),
            rejection.body_text(),
        ))
    }
}

/// Path of the field serde choked on, e.g. `ttl` or `range[1]`.
fn json_error_path(err: &(dyn std::error::Error + 'static)) -> Option<String> {
    let mut source = Some(err);
    while let Some(current) = source {
        if let Some(e) = current.downcast_ref::<serde_path_to_error::Error<serde_json::Error>>() {
            let path = e.path().to_string();
            return (path != ".").then_some(path);
        }
        source = current.source();
    }
    None
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(CoordinationError::validation("query", rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CoordinationError::Validation { .. } => StatusCode::BAD_REQUEST,
            CoordinationError::Conflict(_) => StatusCode::CONFLICT,
            CoordinationError::NotFound(_) => StatusCode::NOT_FOUND,
            CoordinationError::Forbidden(_) => StatusCode::FORBIDDEN,
            CoordinationError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let mut body = json!({
            "error": self.0.to_string(),
            "code": self.0.code(),
        });
        if let Some(field) = self.0.field() {
            body["field"] = json!(field);
        }

        (status, Json(body)).into_response()
    }
}

/// Parse a JSON body that may be omitted entirely.
fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError(CoordinationError::validation("body", e)))
}

// ============================================================================
// Health
// ============================================================================

async fn health(State(state): Shared) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
        "hub": state.coordinator.hub.stats(),
    }))
}

// ============================================================================
// Services
// ============================================================================

#[derive(Debug, Deserialize)]
struct ClaimBody {
    id: String,
    #[serde(default)]
    port: Option<u32>,
    #[serde(default)]
    range: Option<[u32; 2]>,
    #[serde(default)]
    ttl: Option<Value>,
    #[serde(default)]
    cmd: Option<String>,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    pid: Option<u32>,
    #[serde(default)]
    pair: Option<String>,
    #[serde(default)]
    restart_policy: Option<RestartPolicy>,
    #[serde(default)]
    metadata: Option<Value>,
}

async fn claim_service(
    State(state): Shared,
    body: Result<Json<ClaimBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body?;
    let outcome = state
        .coordinator
        .services
        .claim(ClaimRequest {
            id: body.id,
            port: body.port,
            range: body.range.map(|[min, max]| (min, max)),
            ttl: body.ttl,
            cmd: body.cmd,
            cwd: body.cwd,
            pid: body.pid,
            pair: body.pair,
            restart_policy: body.restart_policy,
            metadata: body.metadata,
        })
        .await?;

    let status = if outcome.existing {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(outcome)).into_response())
}

#[derive(Debug, Deserialize)]
struct ReleaseBody {
    id: String,
}

async fn release_services(
    State(state): Shared,
    body: Result<Json<ReleaseBody>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(body) = body?;
    let outcome = state.coordinator.services.release(&body.id).await?;
    Ok(Json(json!(outcome)))
}

#[derive(Debug, Deserialize)]
struct ServiceQuery {
    pattern: Option<String>,
    status: Option<String>,
    port: Option<u16>,
}

async fn list_services(
    State(state): Shared,
    query: Result<Query<ServiceQuery>, QueryRejection>,
) -> ApiResult<Value> {
    let Query(query) = query?;
    let pattern = query
        .pattern
        .as_deref()
        .map(IdentityPattern::parse)
        .transpose()
        .map_err(|e| CoordinationError::validation("pattern", e))?;
    let status = query
        .status
        .as_deref()
        .map(|s| {
            ServiceStatus::parse(s)
                .ok_or_else(|| CoordinationError::validation("status", format!("unknown status '{}'", s)))
        })
        .transpose()?;

    let services = state
        .coordinator
        .services
        .find(&ServiceFilter {
            pattern,
            status,
            port: query.port,
        })
        .await?;
    Ok(Json(json!({ "services": services })))
}

async fn get_service(State(state): Shared, Path(id): Path<String>) -> ApiResult<Value> {
    let details = state.coordinator.services.get(&id).await?;
    Ok(Json(json!(details)))
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    status: String,
    #[serde(default)]
    pid: Option<u32>,
}

async fn update_service_status(
    State(state): Shared,
    Path(id): Path<String>,
    body: Result<Json<StatusBody>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(body) = body?;
    let status = ServiceStatus::parse(&body.status).ok_or_else(|| {
        CoordinationError::validation("status", format!("unknown status '{}'", body.status))
    })?;
    let service = state
        .coordinator
        .services
        .update_status(&id, status, body.pid)
        .await?;
    Ok(Json(json!(service)))
}

#[derive(Debug, Deserialize)]
struct EndpointBody {
    url: String,
}

async fn set_endpoint(
    State(state): Shared,
    Path((id, env)): Path<(String, String)>,
    body: Result<Json<EndpointBody>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(body) = body?;
    let endpoint = state
        .coordinator
        .services
        .set_endpoint(&id, &env, &body.url)
        .await?;
    Ok(Json(json!(endpoint)))
}

// ============================================================================
// Locks
// ============================================================================

#[derive(Debug, Deserialize)]
struct AcquireBody {
    owner: String,
    #[serde(default)]
    ttl: Option<Value>,
    #[serde(default)]
    metadata: Option<Value>,
}

async fn acquire_lock(
    State(state): Shared,
    Path(name): Path<String>,
    body: Result<Json<AcquireBody>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(body) = body?;
    let lock = state
        .coordinator
        .locks
        .acquire(&name, &body.owner, body.ttl.as_ref(), body.metadata)
        .await?;
    Ok(Json(json!(lock)))
}

#[derive(Debug, Deserialize)]
struct ExtendBody {
    owner: String,
    #[serde(default)]
    ttl: Option<Value>,
}

async fn extend_lock(
    State(state): Shared,
    Path(name): Path<String>,
    body: Result<Json<ExtendBody>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(body) = body?;
    let lock = state
        .coordinator
        .locks
        .extend(&name, &body.owner, body.ttl.as_ref())
        .await?;
    Ok(Json(json!(lock)))
}

#[derive(Debug, Default, Deserialize)]
struct ReleaseLockBody {
    #[serde(default)]
    owner: String,
    #[serde(default)]
    force: bool,
}

async fn release_lock(
    State(state): Shared,
    Path(name): Path<String>,
    body: Bytes,
) -> ApiResult<Value> {
    let body: ReleaseLockBody = optional_body(&body)?;
    let lock = state
        .coordinator
        .locks
        .release(&name, &body.owner, body.force)
        .await?;
    Ok(Json(json!({ "released": true, "lock": lock })))
}

async fn check_lock(State(state): Shared, Path(name): Path<String>) -> ApiResult<Value> {
    let lock = state.coordinator.locks.check(&name).await?;
    Ok(Json(json!(lock)))
}

#[derive(Debug, Deserialize)]
struct LockQuery {
    owner: Option<String>,
}

async fn list_locks(
    State(state): Shared,
    query: Result<Query<LockQuery>, QueryRejection>,
) -> ApiResult<Value> {
    let Query(query) = query?;
    let locks = state.coordinator.locks.list(query.owner.as_deref()).await?;
    Ok(Json(json!({ "locks": locks })))
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Deserialize)]
struct PublishBody {
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    sender: Option<String>,
    #[serde(default)]
    ttl: Option<Value>,
}

async fn publish_message(
    State(state): Shared,
    Path(channel): Path<String>,
    body: Result<Json<PublishBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body?;
    let message = state
        .coordinator
        .pubsub
        .publish(&channel, body.payload, body.sender, body.ttl.as_ref())
        .await?;
    Ok((StatusCode::CREATED, Json(message)).into_response())
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<u32>,
    after: Option<i64>,
}

async fn get_messages(
    State(state): Shared,
    Path(channel): Path<String>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> ApiResult<Value> {
    let Query(query) = query?;
    let messages = state
        .coordinator
        .pubsub
        .messages(&channel, query.limit, query.after)
        .await?;
    Ok(Json(json!({ "channel": channel, "messages": messages })))
}

async fn subscribe_channel(
    State(state): Shared,
    Path(channel): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let subscription = state.coordinator.pubsub.subscribe(&channel)?;
    debug!(channel = %subscription.channel(), subscriber = %subscription.id(), "SSE stream opened");

    let stream = subscription.map(|message| {
        Event::default()
            .event("message")
            .id(message.id.to_string())
            .json_data(&message)
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[derive(Debug, Deserialize)]
struct PollQuery {
    after: Option<i64>,
    timeout: Option<u64>,
}

async fn poll_channel(
    State(state): Shared,
    Path(channel): Path<String>,
    query: Result<Query<PollQuery>, QueryRejection>,
) -> ApiResult<Value> {
    let Query(query) = query?;
    let message = state
        .coordinator
        .pubsub
        .poll(&channel, query.after, query.timeout)
        .await?;
    Ok(Json(json!({ "message": message })))
}

async fn clear_channel(State(state): Shared, Path(channel): Path<String>) -> ApiResult<Value> {
    let cleared = state.coordinator.pubsub.clear_channel(&channel).await?;
    Ok(Json(json!({ "cleared": cleared })))
}

async fn list_channels(State(state): Shared) -> ApiResult<Value> {
    let channels = state.coordinator.pubsub.channels().await?;
    Ok(Json(json!({ "channels": channels })))
}

// ============================================================================
// Agents
// ============================================================================

async fn register_agent(
    State(state): Shared,
    body: Result<Json<RegisterAgent>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body?;
    let view = state.coordinator.agents.register(body).await?;
    Ok((StatusCode::CREATED, Json(view)).into_response())
}

async fn get_agent(State(state): Shared, Path(id): Path<String>) -> ApiResult<Value> {
    let view = state.coordinator.agents.get(&id).await?;
    Ok(Json(json!(view)))
}

#[derive(Debug, Deserialize)]
struct AgentQuery {
    #[serde(default)]
    active: Option<bool>,
}

async fn list_agents(
    State(state): Shared,
    query: Result<Query<AgentQuery>, QueryRejection>,
) -> ApiResult<Value> {
    let Query(query) = query?;
    let agents = state
        .coordinator
        .agents
        .list(query.active.unwrap_or(false))
        .await?;
    Ok(Json(json!({ "agents": agents })))
}

async fn heartbeat_agent(State(state): Shared, Path(id): Path<String>) -> ApiResult<Value> {
    let view = state.coordinator.agents.heartbeat(&id).await?;
    Ok(Json(json!(view)))
}

async fn unregister_agent(State(state): Shared, Path(id): Path<String>) -> ApiResult<Value> {
    state.coordinator.agents.unregister(&id).await?;
    Ok(Json(json!({ "unregistered": id })))
}

// ============================================================================
// Salvage
// ============================================================================

#[derive(Debug, Deserialize)]
struct SalvageQuery {
    project: Option<String>,
    #[serde(default)]
    all: Option<bool>,
}

async fn list_salvage(
    State(state): Shared,
    query: Result<Query<SalvageQuery>, QueryRejection>,
) -> ApiResult<Value> {
    let Query(query) = query?;
    let entries = state
        .coordinator
        .agents
        .list_salvage(query.project.as_deref(), query.all.unwrap_or(false))
        .await?;
    Ok(Json(json!({ "salvage": entries })))
}

#[derive(Debug, Deserialize)]
struct ClaimSalvageBody {
    agent_id: String,
}

async fn claim_salvage(
    State(state): Shared,
    Path(dead): Path<String>,
    body: Result<Json<ClaimSalvageBody>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(body) = body?;
    let entry = state
        .coordinator
        .agents
        .claim_salvage(&dead, &body.agent_id)
        .await?;
    Ok(Json(json!(entry)))
}

#[derive(Debug, Default, Deserialize)]
struct ClaimerBody {
    #[serde(default)]
    agent_id: Option<String>,
}

async fn complete_salvage(
    State(state): Shared,
    Path(dead): Path<String>,
    body: Bytes,
) -> ApiResult<Value> {
    let body: ClaimerBody = optional_body(&body)?;
    let entry = state
        .coordinator
        .agents
        .complete_salvage(&dead, body.agent_id.as_deref())
        .await?;
    Ok(Json(json!(entry)))
}

async fn abandon_salvage(
    State(state): Shared,
    Path(dead): Path<String>,
    body: Bytes,
) -> ApiResult<Value> {
    let body: ClaimerBody = optional_body(&body)?;
    let entry = state
        .coordinator
        .agents
        .abandon_salvage(&dead, body.agent_id.as_deref())
        .await?;
    Ok(Json(json!(entry)))
}

async fn dismiss_salvage(State(state): Shared, Path(dead): Path<String>) -> ApiResult<Value> {
    let entry = state.coordinator.agents.dismiss_salvage(&dead).await?;
    Ok(Json(json!(entry)))
}
