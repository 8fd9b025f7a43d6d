//! API Models
//!
//! Request payloads and response views, annotated for OpenAPI generation
//! with `utoipa`. Domain types from `tonality-core` are flattened into
//! plain views here so the presentation rules (visible options, popup
//! expiry, game-over delay) live at the HTTP edge.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tonality_core::{
    dialogue::{ChatMessage, DialogueSnapshot, Role},
    persistence::SessionRecord,
    session::{GAME_OVER_DELAY, Level, MAX_MISTAKES, POINTS_NOTICE_TTL, Phase, WINNING_SCORE},
};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Serialize, ToSchema, Debug)]
pub struct LevelInfo {
    #[schema(value_type = String, example = "Investigador")]
    pub level: Level,
    pub label: String,
    pub points_per_answer: u32,
    pub description: String,
}

impl From<Level> for LevelInfo {
    fn from(level: Level) -> Self {
        Self {
            level,
            label: level.label().to_string(),
            points_per_answer: level.points_per_answer(),
            description: level.description().to_string(),
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct CreateGamePayload {
    #[schema(example = "Ana")]
    pub player_name: String,
    #[schema(value_type = String, example = "Novato")]
    pub level: Level,
}

#[derive(Deserialize, ToSchema)]
pub struct SubmitTurnPayload {
    #[schema(example = "Enviar ao Lab CQ")]
    pub text: String,
}

/// Which screen the client should show.
#[derive(Serialize, ToSchema, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Screen {
    Playing,
    GameOver,
}

#[derive(Serialize, ToSchema, Debug, Clone, PartialEq, Eq)]
pub struct MessageView {
    #[schema(example = "model")]
    pub role: String,
    pub text: String,
    pub is_evaluation: bool,
    pub options: Vec<String>,
}

impl From<&ChatMessage> for MessageView {
    fn from(message: &ChatMessage) -> Self {
        Self {
            role: match message.role {
                Role::User => "user".to_string(),
                Role::Model => "model".to_string(),
            },
            text: message.text.clone(),
            is_evaluation: message.is_evaluation,
            options: message.options.clone(),
        }
    }
}

/// The "+N pts" popup, visible until `expires_at`.
#[derive(Serialize, ToSchema, Debug, Clone, PartialEq, Eq)]
pub struct PointsNotice {
    pub points: u32,
    pub expires_at: DateTime<Utc>,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct GameView {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    pub player_name: String,
    #[schema(value_type = String, example = "Novato")]
    pub level: Level,
    pub score: u32,
    pub mistakes: u32,
    pub winning_score: u32,
    pub max_mistakes: u32,
    pub progress_percent: u32,
    #[schema(value_type = String, example = "active")]
    pub phase: Phase,
    /// "Vitória" or "Derrota" once the game is over.
    pub result: Option<String>,
    pub screen: Screen,
    pub in_flight: bool,
    pub transcript: Vec<MessageView>,
    /// Replies offered on the latest model message while no turn is in flight.
    pub options: Vec<String>,
    pub points_notice: Option<PointsNotice>,
}

fn delay(duration: std::time::Duration) -> TimeDelta {
    TimeDelta::milliseconds(duration.as_millis() as i64)
}

impl GameView {
    /// Builds the client view of a dialogue at time `now`.
    ///
    /// Returns `None` for a dialogue that never started a game.
    pub fn from_snapshot(id: Uuid, snapshot: &DialogueSnapshot, now: DateTime<Utc>) -> Option<Self> {
        let session = snapshot.session.as_ref()?;

        let options = match snapshot.transcript.last() {
            Some(last) if last.role == Role::Model && !snapshot.in_flight => last.options.clone(),
            _ => Vec::new(),
        };
        let points_notice = snapshot.last_award.and_then(|award| {
            let expires_at = award.awarded_at + delay(POINTS_NOTICE_TTL);
            (now < expires_at).then_some(PointsNotice {
                points: award.points,
                expires_at,
            })
        });
        let screen = match snapshot.finished_at {
            Some(finished_at) if now >= finished_at + delay(GAME_OVER_DELAY) => Screen::GameOver,
            _ => Screen::Playing,
        };

        Some(Self {
            id,
            player_name: session.player.name.clone(),
            level: session.player.level,
            score: session.score,
            mistakes: session.mistakes,
            winning_score: WINNING_SCORE,
            max_mistakes: MAX_MISTAKES,
            progress_percent: session.progress_percent(),
            phase: session.phase,
            result: session.result().map(|r| r.label().to_string()),
            screen,
            in_flight: snapshot.in_flight,
            transcript: snapshot.transcript.iter().map(MessageView::from).collect(),
            options,
            points_notice,
        })
    }
}

#[derive(Serialize, ToSchema, Debug)]
pub struct SessionRecordView {
    pub id: Option<i64>,
    pub created_at: Option<DateTime<Utc>>,
    pub player_name: String,
    #[schema(example = "Perito")]
    pub level: String,
    pub score: u32,
    #[schema(example = "Vitória")]
    pub result: String,
}

impl From<SessionRecord> for SessionRecordView {
    fn from(record: SessionRecord) -> Self {
        Self {
            id: record.id,
            created_at: record.created_at,
            player_name: record.player_name,
            level: record.level.to_string(),
            score: record.score,
            result: record.result,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tonality_core::dialogue::PointsAward;
    use tonality_core::session::{GameSession, Player};

    fn message(role: Role, options: &[&str]) -> ChatMessage {
        ChatMessage {
            role,
            text: "texto".to_string(),
            is_evaluation: !options.is_empty(),
            options: options.iter().map(|o| o.to_string()).collect(),
        }
    }

    fn snapshot() -> DialogueSnapshot {
        let mut session = GameSession::new(Player {
            name: "Ana".to_string(),
            level: Level::Perito,
        });
        session.score = 60;
        DialogueSnapshot {
            session: Some(session),
            transcript: vec![message(Role::Model, &["A", "B", "C"])],
            in_flight: false,
            last_award: None,
            finished_at: None,
            last_activity: None,
        }
    }

    fn at(seconds: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 17, 14, 0, seconds).unwrap()
    }

    #[test]
    fn test_view_of_active_game() {
        let view = GameView::from_snapshot(Uuid::nil(), &snapshot(), at(0)).unwrap();

        assert_eq!(view.player_name, "Ana");
        assert_eq!(view.progress_percent, 60);
        assert_eq!(view.options, vec!["A", "B", "C"]);
        assert_eq!(view.screen, Screen::Playing);
        assert_eq!(view.result, None);
        assert_eq!(view.points_notice, None);
        assert_eq!(view.transcript[0].role, "model");
    }

    #[test]
    fn test_options_hidden_while_in_flight_or_after_user_turn() {
        let mut busy = snapshot();
        busy.in_flight = true;
        assert!(GameView::from_snapshot(Uuid::nil(), &busy, at(0)).unwrap().options.is_empty());

        let mut answered = snapshot();
        answered.transcript.push(message(Role::User, &[]));
        assert!(GameView::from_snapshot(Uuid::nil(), &answered, at(0)).unwrap().options.is_empty());
    }

    #[test]
    fn test_points_notice_expires() {
        let mut awarded = snapshot();
        awarded.last_award = Some(PointsAward {
            points: 30,
            awarded_at: at(10),
        });

        let fresh = GameView::from_snapshot(Uuid::nil(), &awarded, at(11)).unwrap();
        assert_eq!(fresh.points_notice.unwrap().points, 30);

        let stale = GameView::from_snapshot(Uuid::nil(), &awarded, at(13)).unwrap();
        assert_eq!(stale.points_notice, None);
    }

    #[test]
    fn test_game_over_screen_after_delay() {
        let mut finished = snapshot();
        finished.finished_at = Some(at(20));
        if let Some(session) = finished.session.as_mut() {
            session.score = 130;
            session.phase = Phase::Won;
        }

        let early = GameView::from_snapshot(Uuid::nil(), &finished, at(21)).unwrap();
        assert_eq!(early.screen, Screen::Playing);
        assert_eq!(early.result.as_deref(), Some("Vitória"));
        assert_eq!(early.progress_percent, 100);

        let later = GameView::from_snapshot(Uuid::nil(), &finished, at(23)).unwrap();
        assert_eq!(later.screen, Screen::GameOver);
    }

    #[test]
    fn test_unstarted_dialogue_has_no_view() {
        let mut empty = snapshot();
        empty.session = None;
        assert!(GameView::from_snapshot(Uuid::nil(), &empty, at(0)).is_none());
    }

    #[test]
    fn test_level_info() {
        let info = LevelInfo::from(Level::Investigador);
        assert_eq!(info.points_per_answer, 20);
        assert_eq!(info.label, "O Investigador");
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"level\":\"Investigador\""));
    }

    #[test]
    fn test_create_game_payload_requires_known_level() {
        let ok: CreateGamePayload =
            serde_json::from_str(r#"{"player_name": "Ana", "level": "Perito"}"#).unwrap();
        assert_eq!(ok.level, Level::Perito);

        let bad: Result<CreateGamePayload, _> =
            serde_json::from_str(r#"{"player_name": "Ana", "level": "Mestre"}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_error_response_serialization() {
        let error = ErrorResponse {
            message: "Game not found".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&error).unwrap(),
            r#"{"message":"Game not found"}"#
        );
    }
}
