use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use control_plane::{
    Policy, ReplicationSource, RequestContext, Secret, SecretPolicyRepository, SecretStatus,
    Versioned,
};
use kernel::Identity;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct AuthzBody {
    pub resource: String,
    pub action: String,
    #[serde(default)]
    pub context: RequestContext,
}

#[derive(Serialize)]
pub struct AuthzResponse {
    pub allowed: bool,
    pub reason: String,
}

#[derive(Serialize)]
pub struct SimpleResponse {
    pub ok: bool,
}

#[derive(Serialize)]
pub struct RevokeResponse {
    pub ok: bool,
    /// Whether the secret was also disabled in the local repository.
    pub disabled: bool,
}

#[derive(Serialize)]
struct ReadyBody {
    ready: bool,
    version: Option<u64>,
}

/// Admits the request through the gate and authenticates its bearer token.
/// The in-flight guard lives until the response is produced.
pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response<Body>, AppError> {
    let _in_flight = state.gate.enter()?;
    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let identity = state.kernel.authenticate(authorization.as_deref()).await?;
    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

pub async fn authorize(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<AuthzBody>,
) -> Result<Json<AuthzResponse>, AppError> {
    let decision = state
        .kernel
        .authorize(&identity, &body.resource, &body.action, body.context)?;
    Ok(Json(AuthzResponse {
        allowed: decision.allowed,
        reason: decision.reason,
    }))
}

pub async fn healthz() -> Json<SimpleResponse> {
    Json(SimpleResponse { ok: true })
}

pub async fn readyz(State(state): State<Arc<AppState>>) -> Response {
    let ready = state.cache.is_primed() && state.gate.is_accepting();
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = ReadyBody {
        ready,
        version: state.cache.version(),
    };
    (status, Json(body)).into_response()
}

pub async fn admin_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response<Body>, AppError> {
    let token = extract_bearer_token(req.headers());
    let expected = state.admin_token.as_str();
    if expected.trim().is_empty() || token.as_deref() != Some(expected) {
        return Err(AppError::unauthorized("invalid admin token"));
    }
    Ok(next.run(req).await)
}

pub async fn invalidate_cache(State(state): State<Arc<AppState>>) -> Json<SimpleResponse> {
    info!("cache invalidation requested");
    state.refresher.signal_invalidation();
    Json(SimpleResponse { ok: true })
}

/// Writes the shared revocation marker first so every node rejects the
/// secret immediately, then disables it in the repository when this node
/// owns one.
pub async fn revoke_secret(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RevokeResponse>, AppError> {
    state.kernel.revoke_secret(&id).await?;
    let Some(source) = state.local_source.clone() else {
        return Ok(Json(RevokeResponse {
            ok: true,
            disabled: false,
        }));
    };
    let disabled = tokio::task::spawn_blocking(move || -> Result<bool, AppError> {
        let Some(mut secret) = source.repository().get_secret(&id)? else {
            return Ok(false);
        };
        if secret.status != SecretStatus::Disabled {
            secret.status = SecretStatus::Disabled;
            source.upsert_secret(&secret)?;
        }
        Ok(true)
    })
    .await
    .map_err(|err| AppError::internal(err.to_string()))??;
    Ok(Json(RevokeResponse { ok: true, disabled }))
}

pub async fn replication_secrets(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Versioned<Vec<Secret>>>, AppError> {
    let source = state
        .local_source
        .as_ref()
        .ok_or_else(|| AppError::not_found("node does not own a repository"))?;
    Ok(Json(source.list_secrets().await?))
}

pub async fn replication_policies(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Versioned<Vec<Policy>>>, AppError> {
    let source = state
        .local_source
        .as_ref()
        .ok_or_else(|| AppError::not_found("node does not own a repository"))?;
    Ok(Json(source.list_policies().await?))
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    kernel::extract_bearer(headers.get(header::AUTHORIZATION)?.to_str().ok())
        .ok()
        .map(str::to_string)
}
