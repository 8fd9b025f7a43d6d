//! Game Session State Machine
//!
//! A session starts `Active` with no score and no mistakes. Each evaluation
//! either awards points, counts a mistake, or changes nothing. Crossing
//! `WINNING_SCORE` wins the game, reaching `MAX_MISTAKES` loses it, and a
//! finished session ignores every further evaluation.

use crate::evaluation::Evaluation;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Score at which the session is won.
pub const WINNING_SCORE: u32 = 100;
/// Number of wrong answers at which the session is lost.
pub const MAX_MISTAKES: u32 = 3;
/// How long the "points awarded" popup stays visible.
pub const POINTS_NOTICE_TTL: Duration = Duration::from_millis(2500);
/// Pause between the final evaluation and the game-over screen.
pub const GAME_OVER_DELAY: Duration = Duration::from_millis(2500);

/// Difficulty tiers offered to the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Level {
    Novato,
    Investigador,
    Perito,
}

impl Level {
    pub const ALL: [Level; 3] = [Level::Novato, Level::Investigador, Level::Perito];

    /// Points the instructor is asked to award per correct answer.
    pub fn points_per_answer(self) -> u32 {
        match self {
            Level::Novato => 10,
            Level::Investigador => 20,
            Level::Perito => 30,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Level::Novato => "O Novato",
            Level::Investigador => "O Investigador",
            Level::Perito => "O Perito",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Level::Novato => "Foco em erros de aplicação e produtos.",
            Level::Investigador => "Documentação, Lotes e Selfcolor básico.",
            Level::Perito => "Decisões complexas de laboratório e Selfcolor.",
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Unknown level: '{0}'")]
pub struct UnknownLevel(pub String);

impl FromStr for Level {
    type Err = UnknownLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Level::ALL
            .into_iter()
            .find(|level| level.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownLevel(s.to_string()))
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Novato => write!(f, "Novato"),
            Level::Investigador => write!(f, "Investigador"),
            Level::Perito => write!(f, "Perito"),
        }
    }
}

/// The person playing a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub name: String,
    pub level: Level,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Active,
    Won,
    Lost,
}

/// Final outcome of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameResult {
    Win,
    Lose,
}

impl GameResult {
    /// Label written to the session history.
    pub fn label(self) -> &'static str {
        match self {
            GameResult::Win => "Vitória",
            GameResult::Lose => "Derrota",
        }
    }
}

/// What a single evaluation did to the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TurnOutcome {
    /// Points just awarded, for the transient popup.
    pub points_awarded: Option<u32>,
    pub mistake: bool,
    /// Set only on the evaluation that ended the session.
    pub finished: Option<GameResult>,
}

/// Score, mistakes and phase of one play-through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GameSession {
    pub player: Player,
    pub score: u32,
    pub mistakes: u32,
    pub phase: Phase,
}

impl GameSession {
    pub fn new(player: Player) -> Self {
        Self {
            player,
            score: 0,
            mistakes: 0,
            phase: Phase::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.phase == Phase::Active
    }

    pub fn result(&self) -> Option<GameResult> {
        match self.phase {
            Phase::Active => None,
            Phase::Won => Some(GameResult::Win),
            Phase::Lost => Some(GameResult::Lose),
        }
    }

    /// Share of the winning score reached, capped at 100.
    pub fn progress_percent(&self) -> u32 {
        (self.score.saturating_mul(100) / WINNING_SCORE).min(100)
    }

    /// Applies one evaluation and reports what changed.
    ///
    /// A single evaluation is either a scoring event or a mistake, never
    /// both, so the win check running first cannot mask a loss.
    pub fn apply(&mut self, evaluation: &Evaluation) -> TurnOutcome {
        let mut outcome = TurnOutcome::default();
        if !self.is_active() {
            return outcome;
        }

        match evaluation.correct {
            Some(true) if evaluation.points > 0 => {
                self.score = self.score.saturating_add(evaluation.points);
                outcome.points_awarded = Some(evaluation.points);
                info!(points = evaluation.points, score = self.score, "Points awarded");
            }
            Some(false) => {
                self.mistakes += 1;
                outcome.mistake = true;
                info!(mistakes = self.mistakes, "Mistake recorded");
            }
            _ => {}
        }

        if self.score >= WINNING_SCORE {
            self.phase = Phase::Won;
        } else if self.mistakes >= MAX_MISTAKES {
            self.phase = Phase::Lost;
        }

        outcome.finished = self.result();
        if let Some(result) = outcome.finished {
            info!(
                player = %self.player.name,
                score = self.score,
                mistakes = self.mistakes,
                result = result.label(),
                "Session finished"
            );
        }
        outcome
    }
}
