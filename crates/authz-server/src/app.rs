use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers::*;
use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    let admin_routes = Router::new()
        .route("/admin/cache/invalidate", post(invalidate_cache))
        .route("/admin/secrets/:id/revoke", post(revoke_secret))
        .route("/v1/replication/secrets", get(replication_secrets))
        .route("/v1/replication/policies", get(replication_policies))
        .route_layer(middleware::from_fn_with_state(state.clone(), admin_auth));

    let authz_routes = Router::new()
        .route("/v1/authz", post(authorize))
        .route_layer(middleware::from_fn_with_state(state.clone(), authenticate));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .merge(authz_routes)
        .merge(admin_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
