//! Axum Handlers for the REST API
//!
//! This module contains the logic for handling HTTP requests for games and
//! session reports. It uses `utoipa` doc comments to generate OpenAPI documentation.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use std::sync::Arc;
use tonality_core::{
    dialogue::{Dialogue, DialogueError},
    session::{Level, Player},
};
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    models::{CreateGamePayload, ErrorResponse, GameView, LevelInfo, SessionRecordView, SubmitTurnPayload},
    report,
    state::AppState,
};

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Forbidden(String),
    Conflict(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
            ApiError::Forbidden(message) => {
                (StatusCode::FORBIDDEN, Json(ErrorResponse { message })).into_response()
            }
            ApiError::Conflict(message) => {
                (StatusCode::CONFLICT, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

fn dialogue_error(err: DialogueError) -> ApiError {
    match err {
        DialogueError::EmptyPlayerName => ApiError::BadRequest(err.to_string()),
        DialogueError::TurnInFlight => ApiError::Conflict(err.to_string()),
    }
}

async fn find_game(state: &AppState, id: Uuid) -> Result<Arc<Dialogue>, ApiError> {
    state
        .game(id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Game with id '{}' not found", id)))
}

async fn view(id: Uuid, dialogue: &Dialogue) -> Result<GameView, ApiError> {
    let snapshot = dialogue.snapshot().await;
    GameView::from_snapshot(id, &snapshot, Utc::now())
        .ok_or_else(|| ApiError::NotFound(format!("Game with id '{}' has not started", id)))
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let name = headers
        .get("x-admin-name")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("x-admin-name header is required".to_string()))?;
    if state.config.is_admin(name) {
        Ok(())
    } else {
        Err(ApiError::Forbidden("Reports are restricted to the administrator".to_string()))
    }
}

/// List the difficulty levels.
#[utoipa::path(
    get,
    path = "/levels",
    responses(
        (status = 200, description = "Available levels", body = [LevelInfo])
    )
)]
pub async fn list_levels() -> Json<Vec<LevelInfo>> {
    Json(Level::ALL.into_iter().map(LevelInfo::from).collect())
}

/// Start a new game and play its opening turn.
#[utoipa::path(
    post,
    path = "/games",
    request_body = CreateGamePayload,
    responses(
        (status = 201, description = "Game started", body = GameView),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn create_game(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateGamePayload>,
) -> Result<impl IntoResponse, ApiError> {
    let player = Player {
        name: payload.player_name.trim().to_string(),
        level: payload.level,
    };
    let dialogue = state.new_dialogue();
    dialogue.begin(player).await.map_err(dialogue_error)?;

    let id = Uuid::new_v4();
    state.games.write().await.insert(id, dialogue.clone());
    info!(game_id = %id, "Game registered");

    Ok((StatusCode::CREATED, Json(view(id, &dialogue).await?)))
}

/// Get the current view of a game.
#[utoipa::path(
    get,
    path = "/games/{id}",
    responses(
        (status = 200, description = "Game view", body = GameView),
        (status = 404, description = "Game not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Game ID")
    )
)]
pub async fn get_game(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<GameView>, ApiError> {
    let dialogue = find_game(&state, id).await?;
    Ok(Json(view(id, &dialogue).await?))
}

/// Submit the player's answer.
///
/// Blank answers, answers sent while another turn is in flight and answers
/// to a finished game are ignored and answered with `202 Accepted`.
#[utoipa::path(
    post,
    path = "/games/{id}/turns",
    request_body = SubmitTurnPayload,
    responses(
        (status = 200, description = "Turn played", body = GameView),
        (status = 202, description = "Turn ignored", body = GameView),
        (status = 404, description = "Game not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Game ID")
    )
)]
pub async fn submit_turn(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SubmitTurnPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let dialogue = find_game(&state, id).await?;
    let status = match dialogue.submit(&payload.text).await {
        Some(_) => StatusCode::OK,
        None => StatusCode::ACCEPTED,
    };
    Ok((status, Json(view(id, &dialogue).await?)))
}

/// Play again with the same player and level.
#[utoipa::path(
    post,
    path = "/games/{id}/restart",
    responses(
        (status = 200, description = "Game restarted", body = GameView),
        (status = 404, description = "Game not found", body = ErrorResponse),
        (status = 409, description = "A turn is in flight", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Game ID")
    )
)]
pub async fn restart_game(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<GameView>, ApiError> {
    let dialogue = find_game(&state, id).await?;
    let player = dialogue
        .player()
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Game with id '{}' has not started", id)))?;
    dialogue.begin(player).await.map_err(dialogue_error)?;
    Ok(Json(view(id, &dialogue).await?))
}

/// Leave a game. Unfinished games are discarded without being recorded.
#[utoipa::path(
    delete,
    path = "/games/{id}",
    responses(
        (status = 204, description = "Game removed"),
        (status = 404, description = "Game not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Game ID")
    )
)]
pub async fn delete_game(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state
        .games
        .write()
        .await
        .remove(&id)
        .ok_or_else(|| ApiError::NotFound(format!("Game with id '{}' not found", id)))?;
    Ok(StatusCode::NO_CONTENT)
}

/// List every recorded session, newest first.
#[utoipa::path(
    get,
    path = "/reports/sessions",
    responses(
        (status = 200, description = "Recorded sessions", body = [SessionRecordView]),
        (status = 403, description = "Not the administrator", body = ErrorResponse)
    ),
    params(
        ("x-admin-name" = String, Header, description = "Name of the report administrator")
    )
)]
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<SessionRecordView>>, ApiError> {
    require_admin(&state, &headers)?;
    let records = state.gateway.list_all().await;
    Ok(Json(records.into_iter().map(SessionRecordView::from).collect()))
}

/// Download every recorded session as CSV.
#[utoipa::path(
    get,
    path = "/reports/sessions.csv",
    responses(
        (status = 200, description = "CSV report", body = String, content_type = "text/csv"),
        (status = 403, description = "Not the administrator", body = ErrorResponse),
        (status = 404, description = "No sessions recorded yet", body = ErrorResponse)
    ),
    params(
        ("x-admin-name" = String, Header, description = "Name of the report administrator")
    )
)]
pub async fn export_sessions_csv(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers)?;
    let records = state.gateway.list_all().await;
    if records.is_empty() {
        return Err(ApiError::NotFound("No sessions recorded yet".to_string()));
    }

    let disposition = format!("attachment; filename=\"{}\"", report::file_name(Utc::now()));
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        report::render_csv(&records),
    ))
}

#[cfg(test)]
mod tests {
    use crate::{
        config::{Config, Provider},
        router::create_router,
        state::{AppState, FINISHED_GAME_RETENTION, IDLE_GAME_TTL},
    };
    use anyhow::{Result, anyhow};
    use chrono::Utc;
    use async_trait::async_trait;
    use axum::{
        Router,
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use serde_json::{Value, json};
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use tonality_core::{
        chat::{ChatBackend, ChatSession},
        persistence::{MemoryKeyValueStore, PersistenceGateway},
    };
    use tower::ServiceExt;

    /// Replays canned replies; an exhausted script behaves like a dead backend.
    struct CannedBackend(Arc<Mutex<VecDeque<String>>>);

    #[async_trait]
    impl ChatBackend for CannedBackend {
        async fn start_session(&self, _system_instruction: &str) -> Result<Box<dyn ChatSession>> {
            Ok(Box::new(CannedBackend(self.0.clone())))
        }
    }

    #[async_trait]
    impl ChatSession for CannedBackend {
        async fn send_turn(&self, _text: &str) -> Result<String> {
            self.0
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| anyhow!("connection reset"))
        }
    }

    fn reply(correct: &str, points: u32) -> String {
        format!(
            "Caso avaliado.\n```json\n{{\"correct\": {correct}, \"points\": {points}, \"options\": [\"A\", \"B\", \"C\"]}}\n```"
        )
    }

    fn config() -> Config {
        Config {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            database_url: None,
            provider: Provider::Gemini,
            api_key: "test-key".to_string(),
            chat_model: "gemini-2.5-flash".to_string(),
            log_level: tracing::Level::INFO,
            prompts_path: PathBuf::from("./prompts"),
            local_store_path: PathBuf::from("./data"),
            admin_name: Some("Thiago".to_string()),
        }
    }

    fn app(replies: Vec<String>) -> (Router, Arc<AppState>) {
        let gateway = Arc::new(PersistenceGateway::new(
            None,
            Arc::new(MemoryKeyValueStore::default()),
        ));
        let state = Arc::new(AppState::new(
            gateway,
            Arc::new(CannedBackend(Arc::new(Mutex::new(replies.into())))),
            Arc::new("Mestre das Cores".to_string()),
            Arc::new(config()),
        ));
        (create_router(state.clone()), state)
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_as_admin(uri: &str, admin: &str) -> Request<Body> {
        Request::get(uri)
            .header("x-admin-name", admin)
            .body(Body::empty())
            .unwrap()
    }

    async fn start_game(router: &Router) -> String {
        let (status, body) = send(
            router,
            post_json("/games", json!({"player_name": " Ana ", "level": "Perito"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let view: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(view["player_name"], "Ana");
        assert_eq!(view["options"], json!(["A", "B", "C"]));
        view["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_list_levels() {
        let (router, _) = app(vec![]);
        let (status, body) = send(&router, Request::get("/levels").body(Body::empty()).unwrap()).await;

        assert_eq!(status, StatusCode::OK);
        let levels: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(levels.as_array().unwrap().len(), 3);
        assert_eq!(levels[2]["points_per_answer"], 30);
    }

    #[tokio::test]
    async fn test_create_game_rejects_blank_name() {
        let (router, state) = app(vec![reply("null", 0)]);
        let (status, _) = send(
            &router,
            post_json("/games", json!({"player_name": "   ", "level": "Novato"})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(state.games.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_full_game_is_recorded_and_reported() {
        let (router, state) = app(vec![
            reply("null", 0),
            reply("true", 30),
            reply("true", 30),
            reply("true", 30),
            reply("true", 30),
        ]);
        let id = start_game(&router).await;

        let mut last = Value::Null;
        for _ in 0..4 {
            let (status, body) = send(
                &router,
                post_json(&format!("/games/{id}/turns"), json!({"text": "Lab CQ"})),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            last = serde_json::from_slice(&body).unwrap();
        }
        assert_eq!(last["score"], 120);
        assert_eq!(last["phase"], "won");
        assert_eq!(last["result"], "Vitória");
        assert_eq!(last["progress_percent"], 100);
        assert_eq!(last["points_notice"]["points"], 30);

        let dialogue = state.game(id.parse().unwrap()).await.unwrap();
        dialogue.settle_persistence().await;

        // Finished games ignore further answers.
        let (status, _) = send(
            &router,
            post_json(&format!("/games/{id}/turns"), json!({"text": "Mais uma"})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (status, body) = send(&router, get_as_admin("/reports/sessions", " thiago")).await;
        assert_eq!(status, StatusCode::OK);
        let sessions: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(sessions.as_array().unwrap().len(), 1);
        assert_eq!(sessions[0]["player_name"], "Ana");
        assert_eq!(sessions[0]["level"], "Perito");

        let (status, body) = send(&router, get_as_admin("/reports/sessions.csv", "Thiago")).await;
        assert_eq!(status, StatusCode::OK);
        let csv = String::from_utf8(body).unwrap();
        assert!(csv.starts_with("ID,Data,Nome,Nivel,Pontos,Resultado\n"));
        assert!(csv.contains(",Ana,Perito,120,Vitória"));
    }

    #[tokio::test]
    async fn test_blank_turn_is_ignored() {
        let (router, _) = app(vec![reply("null", 0)]);
        let id = start_game(&router).await;

        let (status, body) = send(
            &router,
            post_json(&format!("/games/{id}/turns"), json!({"text": "  "})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let view: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(view["transcript"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_backend_failure_shows_notice() {
        let (router, _) = app(vec![reply("null", 0)]);
        let id = start_game(&router).await;

        let (status, body) = send(
            &router,
            post_json(&format!("/games/{id}/turns"), json!({"text": "Lab COR"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let view: Value = serde_json::from_slice(&body).unwrap();
        let transcript = view["transcript"].as_array().unwrap();
        assert_eq!(
            transcript.last().unwrap()["text"],
            "Ocorreu um erro de conexão. Tente novamente."
        );
        assert_eq!(view["score"], 0);
        assert_eq!(view["phase"], "active");
    }

    #[tokio::test]
    async fn test_restart_and_delete() {
        let (router, _) = app(vec![reply("null", 0), reply("false", 0), reply("null", 0)]);
        let id = start_game(&router).await;
        send(
            &router,
            post_json(&format!("/games/{id}/turns"), json!({"text": "Produtos"})),
        )
        .await;

        let (status, body) = send(
            &router,
            Request::post(format!("/games/{id}/restart")).body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let view: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(view["mistakes"], 0);
        assert_eq!(view["transcript"].as_array().unwrap().len(), 1);

        let delete = || Request::delete(format!("/games/{id}")).body(Body::empty()).unwrap();
        assert_eq!(send(&router, delete()).await.0, StatusCode::NO_CONTENT);
        assert_eq!(send(&router, delete()).await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_game_is_not_found() {
        let (router, _) = app(vec![]);
        let uri = format!("/games/{}", uuid::Uuid::new_v4());
        let (status, _) = send(&router, Request::get(uri).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_reports_require_admin() {
        let (router, _) = app(vec![]);

        let anonymous = Request::get("/reports/sessions").body(Body::empty()).unwrap();
        assert_eq!(send(&router, anonymous).await.0, StatusCode::BAD_REQUEST);
        assert_eq!(
            send(&router, get_as_admin("/reports/sessions", "Ana")).await.0,
            StatusCode::FORBIDDEN
        );
    }

    #[tokio::test]
    async fn test_empty_history() {
        let (router, _) = app(vec![]);

        let (status, body) = send(&router, get_as_admin("/reports/sessions", "Thiago")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"[]");

        let (status, _) = send(&router, get_as_admin("/reports/sessions.csv", "Thiago")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_finished_games_are_evicted_after_retention() {
        let (router, state) = app(vec![
            reply("null", 0),
            reply("true", 100),
            reply("null", 0),
        ]);
        let finished = start_game(&router).await;
        let (status, _) = send(
            &router,
            post_json(&format!("/games/{finished}/turns"), json!({"text": "Lab CQ"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let active = start_game(&router).await;

        let dialogue = state.game(finished.parse().unwrap()).await.unwrap();
        dialogue.settle_persistence().await;
        let now = Utc::now();
        assert_eq!(state.evict_stale(now).await, 0);
        assert_eq!(state.evict_stale(now + FINISHED_GAME_RETENTION).await, 1);

        let uri = format!("/games/{finished}");
        let (status, _) = send(&router, Request::get(uri.as_str()).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let uri = format!("/games/{active}");
        let (status, _) = send(&router, Request::get(uri.as_str()).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);

        // The finished game's history entry outlives its registry slot.
        let (_, body) = send(&router, get_as_admin("/reports/sessions", "Thiago")).await;
        let sessions: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(sessions.as_array().unwrap().len(), 1);

        assert_eq!(state.evict_stale(now + IDLE_GAME_TTL).await, 1);
        assert!(state.games.read().await.is_empty());
    }
}
