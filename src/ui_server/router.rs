//! Axum router for the UIServer, per spec.md §4.6.
//!
//! Grounded on the teacher's `interfaces/http/router.rs` (the CORS + trace
//! layer stack) and `interfaces/ws/notifications.rs` (the WS mount), pared
//! down to this crate's simpler Cargo.toml (no database/auth crates).

use axum::http::Method;
use axum::response::Redirect;
use axum::routing::{get, post};
use axum::{middleware, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use super::auth::basic_auth;
use super::http::ui_http_handler;
use super::ws::ui_ws_handler;
use super::UiServerState;

/// Static asset fallback: `./dist/` first, `./dist/dist/` second, 404 on
/// miss (spec.md §4.6).
fn static_assets() -> ServeDir {
    ServeDir::new("dist").fallback(ServeDir::new("dist/dist"))
}

pub fn build_router(state: UiServerState) -> Router {
    let cors = CorsLayer::new().allow_methods([Method::GET, Method::POST]).allow_origin(Any);

    let ui_routes = Router::new()
        .route("/ui/:version", get(ui_ws_handler))
        .route("/ui/:version/:procedure", post(ui_http_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), basic_auth));

    Router::new()
        .route("/", get(|| async { Redirect::to("/index.html") }))
        .merge(ui_routes)
        .fallback_service(static_assets())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
