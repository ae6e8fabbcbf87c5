mod handlers;
pub mod middleware;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::session::FeedbackService;

pub use middleware::{RateLimiter, SecurityConfig};

/// Router with security settings taken from the environment.
pub fn create_router(service: FeedbackService) -> Router {
    create_router_with_config(service, SecurityConfig::from_env())
}

pub fn create_router_with_config(service: FeedbackService, config: SecurityConfig) -> Router {
    let protected = Router::new()
        // Standards
        .route("/standards", get(handlers::list_standards))
        // Sessions
        .route("/sessions", post(handlers::create_session))
        .route(
            "/sessions/{id}",
            get(handlers::get_session).delete(handlers::reset_session),
        )
        .route("/sessions/{id}/progress", get(handlers::get_progress))
        .route("/sessions/{id}/advance", post(handlers::advance_session))
        .route("/sessions/{id}/feedback", post(handlers::submit_session_feedback))
        .route("/sessions/{id}/report", get(handlers::get_report))
        .route("/sessions/{id}/events", get(handlers::session_events))
        // Feedback
        .route("/feedback", post(handlers::submit_feedback))
        .route_layer(from_fn_with_state(config.clone(), middleware::auth_middleware));

    // Health stays reachable without credentials.
    let mut api = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected);

    if let Some(limiter) = config.rate_limiter.clone() {
        api = api.layer(from_fn_with_state(limiter, middleware::rate_limit_middleware));
    }

    Router::new()
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(config.cors_layer())
        .with_state(service)
}
