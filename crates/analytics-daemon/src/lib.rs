//! HTTP + WebSocket surface. Assembles the router, with every
//! route-group rate-limited per `AppConfig`, per the teacher's middleware
//! layering (request id, request logging, CORS).

mod auth_extractor;
mod cookies;
mod error;
mod middleware;
mod routes;
mod state;

use axum::routing::{get, post};
use axum::Router;

use analytics_ratelimit::KeyedRateLimiter;

pub use error::ApiError;
pub use state::AppState;

pub fn build_app(state: AppState) -> Router {
    let config = state.config.clone();

    let general_limiter = KeyedRateLimiter::per_minute(config.rate_limit_per_minute);
    let login_limiter = KeyedRateLimiter::per_minute(config.login_rate_limit_per_minute);
    let register_limiter = KeyedRateLimiter::per_minute(config.register_rate_limit_per_minute);

    let auth_routes = Router::new()
        .route("/register", post(routes::auth::register).layer(register_limiter.into_layer("/auth/register")))
        .route("/login", post(routes::auth::login).layer(login_limiter.into_layer("/auth/login")))
        .route("/logout", post(routes::auth::logout))
        .route("/refresh", post(routes::auth::refresh))
        .route("/me", get(routes::auth::me).patch(routes::auth::update_email))
        .route("/ws-ticket", post(routes::auth::ws_ticket));

    let project_routes = Router::new()
        .route("/", post(routes::projects::create_project).get(routes::projects::list_projects))
        .route(
            "/{project_id}",
            get(routes::projects::get_project)
                .patch(routes::projects::update_project)
                .delete(routes::projects::delete_project),
        )
        .route("/{project_id}/rotate-key", post(routes::projects::rotate_key));

    let analytics_routes = Router::new()
        .route("/{project_id}/overview", get(routes::analytics::overview))
        .route("/{project_id}/timeseries", get(routes::analytics::timeseries))
        .route("/{project_id}/top-events", get(routes::analytics::top_events))
        .route("/{project_id}/sessions", get(routes::analytics::sessions))
        .route("/{project_id}/users", get(routes::analytics::users));

    Router::new()
        .route("/health", get(routes::health::health))
        .route("/ready", get(routes::health::ready))
        .nest("/auth", auth_routes)
        .nest("/projects", project_routes)
        .nest("/analytics", analytics_routes)
        .route("/events/ingest", post(routes::ingest::ingest_events))
        .route("/ws/events/{project_id}", get(routes::ws::ws_events))
        .layer(axum::middleware::from_fn(middleware::request_logger_middleware))
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .layer(middleware::cors_layer(&config))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(general_limiter.into_layer("/"))
        .with_state(state)
}
