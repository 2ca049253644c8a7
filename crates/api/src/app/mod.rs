//! HTTP application wiring (axum router + services).
//!
//! - `services.rs`: store, executor, role policy and request timeout
//! - `routes/`: handlers, one file per area
//! - `dto.rs`: request DTOs and extraction helpers
//! - `errors.rs`: the JSON error mapping

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use shopledger_auth::{Hs256JwtValidator, JwtValidator};

use crate::config::ApiConfig;
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::AppServices;

/// Build the router from configuration (used by `main.rs`).
pub async fn build_app(config: &ApiConfig) -> anyhow::Result<Router> {
    let policy = config.load_role_policy()?;
    let services = AppServices::from_config(config, policy).await?;
    services.spawn_notification_log();
    let jwt = Arc::new(Hs256JwtValidator::new(config.jwt_secret.as_bytes()));
    Ok(router(Arc::new(services), jwt))
}

/// Assemble the router around already-built services.
pub fn router(services: Arc<AppServices>, jwt: Arc<dyn JwtValidator>) -> Router {
    let auth_state = middleware::AuthState { jwt };

    let protected = routes::router().layer(
        ServiceBuilder::new()
            .layer(axum::middleware::from_fn_with_state(
                auth_state,
                middleware::auth_middleware,
            ))
            .layer(Extension(services)),
    );

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
}
