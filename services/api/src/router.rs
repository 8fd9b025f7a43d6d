//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the game API, the reports and the OpenAPI documentation.

use crate::{
    handlers,
    models::{
        CreateGamePayload, ErrorResponse, GameView, LevelInfo, MessageView, PointsNotice, Screen,
        SessionRecordView, SubmitTurnPayload,
    },
    state::AppState,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::list_levels,
        handlers::create_game,
        handlers::get_game,
        handlers::submit_turn,
        handlers::restart_game,
        handlers::delete_game,
        handlers::list_sessions,
        handlers::export_sessions_csv,
    ),
    components(
        schemas(LevelInfo, CreateGamePayload, SubmitTurnPayload, GameView, MessageView, PointsNotice, Screen, SessionRecordView, ErrorResponse)
    ),
    tags(
        (name = "Tonality API", description = "Scored color-tonality training games and their history")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Group all routes that require AppState into their own router.
    let api_router = Router::new()
        .route("/levels", get(handlers::list_levels))
        .route("/games", post(handlers::create_game))
        .route(
            "/games/{id}",
            get(handlers::get_game).delete(handlers::delete_game),
        )
        .route("/games/{id}/turns", post(handlers::submit_turn))
        .route("/games/{id}/restart", post(handlers::restart_game))
        .route("/reports/sessions", get(handlers::list_sessions))
        .route("/reports/sessions.csv", get(handlers::export_sessions_csv))
        // Apply the state ONLY to this group of routes.
        .with_state(app_state);

    // Create the final router that merges the stateful routes
    // with the stateless routes (like Swagger UI).
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_every_route() {
        let doc = ApiDoc::openapi();
        let paths: Vec<_> = doc.paths.paths.keys().cloned().collect();
        for expected in [
            "/levels",
            "/games",
            "/games/{id}",
            "/games/{id}/turns",
            "/games/{id}/restart",
            "/reports/sessions",
            "/reports/sessions.csv",
        ] {
            assert!(paths.iter().any(|p| p == expected), "missing {expected}");
        }
    }
}
