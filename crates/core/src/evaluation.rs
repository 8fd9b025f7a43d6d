//! Evaluation Extraction
//!
//! Every model reply is free text that should end with a fenced JSON block
//! judging the player's last answer. Models do not always comply, so the
//! payload is recovered through an ordered list of strategies. Each strategy
//! is a pure function; the first one that decodes a JSON object wins.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::LazyLock;
use tracing::debug;

/// A closing brace within this many trailing characters marks the object as
/// a control annex rather than illustrative content.
pub const TRAILING_ANNEX_WINDOW: usize = 20;

const FENCE: &str = "```";

/// An opening fence with its optional `json` tag.
static FENCE_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?i:json)?").expect("valid fence regex"));

/// The judgment embedded in a single model reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    /// `None` when the turn only presents a case and nothing was judged.
    pub correct: Option<bool>,
    pub points: u32,
    /// Short replies the player may pick for the next turn.
    pub options: Vec<String>,
    /// Advisory end-of-game hint from the model. Never drives termination.
    pub game_over: Option<bool>,
}

impl Evaluation {
    /// Normalizes a decoded JSON object into an `Evaluation`.
    ///
    /// Malformed fields degrade instead of failing: a non-boolean `correct`
    /// becomes unknown, a missing or non-numeric `points` becomes 0 and a
    /// non-list `options` becomes empty.
    pub fn from_object(object: &Map<String, Value>) -> Self {
        let correct = object.get("correct").and_then(Value::as_bool);
        let points = object.get("points").map(coerce_points).unwrap_or(0);
        let options = match object.get("options") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };
        let game_over = object
            .get("gameOver")
            .or_else(|| object.get("game_over"))
            .and_then(Value::as_bool);

        Self {
            correct,
            points,
            options,
            game_over,
        }
    }
}

fn coerce_points(value: &Value) -> u32 {
    if let Some(n) = value.as_u64() {
        return u32::try_from(n).unwrap_or(u32::MAX);
    }
    match value.as_f64() {
        Some(f) if f.is_finite() && f > 0.0 => f.min(u32::MAX as f64) as u32,
        _ => 0,
    }
}

/// Result of running a reply through the extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// Text to show the player.
    pub display_text: String,
    pub evaluation: Option<Evaluation>,
}

impl Extraction {
    fn untouched(raw: &str) -> Self {
        Self {
            display_text: raw.to_string(),
            evaluation: None,
        }
    }
}

/// A single recovery heuristic. Returns `None` when it cannot produce an evaluation.
pub type Strategy = fn(&str) -> Option<Extraction>;

/// Strategies in the order they are attempted.
pub const STRATEGIES: &[Strategy] = &[fenced_block, greedy_braces];

/// Splits a raw reply into display text and an optional evaluation.
///
/// Never fails: when no strategy succeeds the raw text is returned unchanged
/// with no evaluation.
pub fn extract(raw: &str) -> Extraction {
    STRATEGIES
        .iter()
        .find_map(|strategy| strategy(raw))
        .unwrap_or_else(|| {
            debug!("No evaluation payload found in reply");
            Extraction::untouched(raw)
        })
}

fn decode_object(candidate: &str) -> Option<Evaluation> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(object)) => Some(Evaluation::from_object(&object)),
        Ok(_) => {
            debug!("Candidate payload decoded to a non-object value");
            None
        }
        Err(e) => {
            debug!(error = %e, "Candidate payload is not valid JSON");
            None
        }
    }
}

/// Looks for a fenced code block, optionally tagged `json`, whose body is a
/// JSON object. The first such block is removed from the display text.
///
/// Every fence is tried as an opener against the next fence, so a stray
/// fence in the prose does not hide a later block.
pub fn fenced_block(raw: &str) -> Option<Extraction> {
    FENCE_OPEN.find_iter(raw).find_map(|open| {
        let body_len = raw[open.end()..].find(FENCE)?;
        let body = &raw[open.end()..open.end() + body_len];
        let evaluation = decode_object(body.trim())?;
        let block_end = open.end() + body_len + FENCE.len();

        let mut display_text = String::with_capacity(raw.len());
        display_text.push_str(&raw[..open.start()]);
        display_text.push_str(&raw[block_end..]);

        Some(Extraction {
            display_text: display_text.trim().to_string(),
            evaluation: Some(evaluation),
        })
    })
}

/// Decodes everything between the first `{` and the last `}`.
///
/// The object is hidden from the player only when it closes near the end of
/// the reply; otherwise it is treated as part of the explanation and the
/// display text is left intact.
pub fn greedy_braces(raw: &str) -> Option<Extraction> {
    let open = raw.find('{')?;
    let close = raw.rfind('}')?;
    if open >= close {
        return None;
    }

    let evaluation = decode_object(&raw[open..=close])?;
    let trailing = raw[close + 1..].chars().count();
    let display_text = if trailing < TRAILING_ANNEX_WINDOW {
        raw[..open].trim().to_string()
    } else {
        raw.to_string()
    };

    Some(Extraction {
        display_text,
        evaluation: Some(evaluation),
    })
}
