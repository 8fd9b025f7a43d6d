//! Dialogue Orchestration
//!
//! Drives one game: sends player turns to the chat backend, runs each reply
//! through evaluation extraction and the session state machine, and hands
//! finished sessions to the persistence gateway.
//!
//! At most one backend call is in flight per dialogue. Turns arriving while
//! one is outstanding are dropped, which keeps evaluations applied in
//! submission order.

use crate::{
    chat::{ChatBackend, ChatSession},
    evaluation::{self, Evaluation},
    persistence::{NewSessionRecord, PersistenceGateway, RecordOutcome},
    session::{GameSession, Player, TurnOutcome},
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, error, info, warn};

/// Shown when the opening turn cannot reach the backend.
pub const OPENING_FAILURE_NOTICE: &str =
    "Desculpe, tive um problema ao iniciar o treinamento. Tente novamente.";
/// Shown when a player turn cannot reach the backend.
pub const TURN_FAILURE_NOTICE: &str = "Ocorreu um erro de conexão. Tente novamente.";

/// Builds the hidden first message that introduces the player to the instructor.
pub fn opening_message(player: &Player) -> String {
    format!(
        "Olá, meu nome é {} e eu escolhi o nível {}. Vamos começar o jogo!",
        player.name, player.level
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// One entry of the visible transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
    /// Whether the reply carried an evaluation payload.
    pub is_evaluation: bool,
    pub options: Vec<String>,
}

impl ChatMessage {
    fn user(text: &str) -> Self {
        Self {
            role: Role::User,
            text: text.to_string(),
            is_evaluation: false,
            options: Vec::new(),
        }
    }

    fn model(text: String, evaluation: Option<&Evaluation>) -> Self {
        Self {
            role: Role::Model,
            text,
            is_evaluation: evaluation.is_some(),
            options: evaluation.map(|e| e.options.clone()).unwrap_or_default(),
        }
    }

    fn notice(text: &str) -> Self {
        Self::model(text.to_string(), None)
    }
}

/// Points just awarded, with the moment they were awarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PointsAward {
    pub points: u32,
    pub awarded_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DialogueError {
    #[error("Player name must not be empty")]
    EmptyPlayerName,
    #[error("A turn is already in flight")]
    TurnInFlight,
}

/// The model reply produced by a turn, and what it did to the score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReport {
    pub reply: ChatMessage,
    pub outcome: TurnOutcome,
}

/// A consistent copy of the dialogue state for readers.
#[derive(Debug, Clone, Serialize)]
pub struct DialogueSnapshot {
    pub session: Option<GameSession>,
    pub transcript: Vec<ChatMessage>,
    pub in_flight: bool,
    pub last_award: Option<PointsAward>,
    pub finished_at: Option<DateTime<Utc>>,
    /// When the transcript last changed.
    pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct DialogueState {
    session: Option<GameSession>,
    transcript: Vec<ChatMessage>,
    chat: Option<Arc<dyn ChatSession>>,
    last_award: Option<PointsAward>,
    finished_at: Option<DateTime<Utc>>,
    last_activity: Option<DateTime<Utc>>,
    pending_record: Option<JoinHandle<RecordOutcome>>,
}

impl DialogueState {
    fn push(&mut self, message: ChatMessage) {
        self.transcript.push(message);
        self.last_activity = Some(Utc::now());
    }
}

/// Holds the in-flight flag for the lifetime of one backend call.
struct TurnGuard<'a>(&'a AtomicBool);

impl<'a> TurnGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Sequences the turns of one game.
pub struct Dialogue {
    backend: Arc<dyn ChatBackend>,
    gateway: Arc<PersistenceGateway>,
    system_instruction: Arc<String>,
    in_flight: AtomicBool,
    state: Mutex<DialogueState>,
}

impl Dialogue {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        gateway: Arc<PersistenceGateway>,
        system_instruction: Arc<String>,
    ) -> Self {
        Self {
            backend,
            gateway,
            system_instruction,
            in_flight: AtomicBool::new(false),
            state: Mutex::new(DialogueState::default()),
        }
    }

    /// Starts a fresh game for `player`, discarding any previous one.
    ///
    /// Opens a new chat context, sends the opening message and applies the
    /// reply like any other turn. A backend failure leaves a notice in the
    /// transcript instead of an error.
    pub async fn begin(&self, player: Player) -> Result<TurnReport, DialogueError> {
        if player.name.trim().is_empty() {
            return Err(DialogueError::EmptyPlayerName);
        }
        let _guard = TurnGuard::acquire(&self.in_flight).ok_or(DialogueError::TurnInFlight)?;

        info!(player = %player.name, level = %player.level, "Starting game");
        let opening = opening_message(&player);
        {
            let mut state = self.state.lock().await;
            *state = DialogueState {
                session: Some(GameSession::new(player)),
                last_activity: Some(Utc::now()),
                ..Default::default()
            };
        }

        let reply = match self.open_chat().await {
            Ok(chat) => chat.send_turn(&opening).await,
            Err(e) => Err(e),
        };
        Ok(match reply {
            Ok(raw) => self.absorb(&raw).await,
            Err(e) => {
                error!(error = ?e, "Error starting game");
                self.push_notice(OPENING_FAILURE_NOTICE).await
            }
        })
    }

    /// Sends a player turn.
    ///
    /// Returns `None` without touching anything when the text is blank, a
    /// turn is already in flight, or no game is active.
    pub async fn submit(&self, text: &str) -> Option<TurnReport> {
        if text.trim().is_empty() {
            return None;
        }
        let Some(_guard) = TurnGuard::acquire(&self.in_flight) else {
            debug!("Ignoring turn submitted while another is in flight");
            return None;
        };

        let chat = {
            let mut state = self.state.lock().await;
            if !state.session.as_ref().is_some_and(GameSession::is_active) {
                debug!("Ignoring turn submitted outside an active game");
                return None;
            }
            state.push(ChatMessage::user(text));
            state.chat.clone()
        };

        let chat = match chat {
            Some(chat) => Ok(chat),
            None => self.open_chat().await,
        };
        let reply = match chat {
            Ok(chat) => chat.send_turn(text).await,
            Err(e) => Err(e),
        };

        Some(match reply {
            Ok(raw) => self.absorb(&raw).await,
            Err(e) => {
                warn!(error = ?e, "Chat backend failed during turn");
                self.push_notice(TURN_FAILURE_NOTICE).await
            }
        })
    }

    pub async fn snapshot(&self) -> DialogueSnapshot {
        let state = self.state.lock().await;
        DialogueSnapshot {
            session: state.session.clone(),
            transcript: state.transcript.clone(),
            in_flight: self.in_flight.load(Ordering::Acquire),
            last_award: state.last_award,
            finished_at: state.finished_at,
            last_activity: state.last_activity,
        }
    }

    pub async fn player(&self) -> Option<Player> {
        let state = self.state.lock().await;
        state.session.as_ref().map(|s| s.player.clone())
    }

    /// Waits for the history write triggered by the end of the game, if any.
    pub async fn settle_persistence(&self) -> Option<RecordOutcome> {
        let handle = self.state.lock().await.pending_record.take()?;
        match handle.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!(error = ?e, "Session history task failed");
                None
            }
        }
    }

    async fn open_chat(&self) -> Result<Arc<dyn ChatSession>> {
        let chat: Arc<dyn ChatSession> = Arc::from(
            self.backend
                .start_session(&self.system_instruction)
                .await?,
        );
        self.state.lock().await.chat = Some(chat.clone());
        Ok(chat)
    }

    async fn push_notice(&self, text: &str) -> TurnReport {
        let reply = ChatMessage::notice(text);
        self.state.lock().await.push(reply.clone());
        TurnReport {
            reply,
            outcome: TurnOutcome::default(),
        }
    }

    async fn absorb(&self, raw: &str) -> TurnReport {
        let extraction = evaluation::extract(raw);
        let mut state = self.state.lock().await;

        let outcome = match (&extraction.evaluation, state.session.as_mut()) {
            (Some(evaluation), Some(session)) => session.apply(evaluation),
            _ => TurnOutcome::default(),
        };
        let reply = ChatMessage::model(extraction.display_text, extraction.evaluation.as_ref());
        state.push(reply.clone());

        let now = Utc::now();
        if let Some(points) = outcome.points_awarded {
            state.last_award = Some(PointsAward {
                points,
                awarded_at: now,
            });
        }
        if let (Some(result), Some(session)) = (outcome.finished, state.session.as_ref()) {
            let record = NewSessionRecord::from_session(session, result);
            let gateway = self.gateway.clone();
            state.finished_at = Some(now);
            state.pending_record = Some(tokio::spawn(async move { gateway.record(record).await }));
        }

        TurnReport { reply, outcome }
    }
}
