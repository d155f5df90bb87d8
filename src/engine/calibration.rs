//! Engine-strength calibration.
//!
//! Replays a game against the engine at full strength and counts how often
//! the player's move equals the engine's best move. The match rate becomes
//! the skill level used for the engine fallback, so the fallback plays
//! roughly as accurately as the player does.
//!
//! Only the player's own moves are scored: the player is the side to move
//! at the end of the partial sequence (the side whose next move is being
//! predicted). Opponent moves are replayed without querying the engine.

use std::fmt;

use log::debug;
use serde::{Deserialize, Serialize};
use shakmaty::Color;

use crate::engine::engine_trait::ChessEngine;
use crate::errors::EngineError;
use crate::rules::board_adapter::ReplayedGame;

/// Skill assumed for a player with no scored moves.
pub const DEFAULT_SKILL_LEVEL: f64 = 20.0;
/// Raw scores above this are lowered by `SKILL_OFFSET`.
pub const SKILL_OFFSET_THRESHOLD: f64 = 12.0;
pub const SKILL_OFFSET: f64 = 4.0;

/// Engine strength on a `[0, 100]` scale.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct SkillLevel(f64);

impl SkillLevel {
    pub const MIN: SkillLevel = SkillLevel(0.0);
    pub const MAX: SkillLevel = SkillLevel(100.0);
    pub const DEFAULT: SkillLevel = SkillLevel(DEFAULT_SKILL_LEVEL);

    /// Clamps into `[0, 100]`; NaN maps to the minimum.
    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            return Self::MIN;
        }
        SkillLevel(value.clamp(Self::MIN.0, Self::MAX.0))
    }

    #[inline]
    pub fn value(self) -> f64 {
        self.0
    }

    /// Calibrated skill for `matches` engine agreements out of `total`
    /// scored moves.
    pub fn from_matches(matches: u32, total: u32) -> Self {
        if total == 0 {
            return Self::DEFAULT;
        }
        let raw = f64::from(matches.min(total)) * 100.0 / f64::from(total);
        if raw > SKILL_OFFSET_THRESHOLD {
            Self::new(raw - SKILL_OFFSET)
        } else {
            Self::new(raw)
        }
    }
}

impl fmt::Display for SkillLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// Running count of scored moves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CalibrationTally {
    pub matches: u32,
    pub total: u32,
}

impl CalibrationTally {
    pub fn skill_level(self) -> SkillLevel {
        SkillLevel::from_matches(self.matches, self.total)
    }
}

/// Skill level for `player` over the whole of `game`.
pub fn estimate_skill_level<E: ChessEngine + ?Sized>(
    engine: &mut E,
    game: &ReplayedGame,
    player: Color,
) -> Result<SkillLevel, EngineError> {
    let tally = calibrate_plies(engine, game.uci_moves(), 0, player, CalibrationTally::default())?;
    Ok(tally.skill_level())
}

/// Score the player's moves among `uci_moves[start_ply..]`, adding to
/// `tally`.
///
/// Issues exactly one best-move query per scored move, with the engine at
/// full strength and positioned just before that move. Leaves the engine
/// untouched when there is nothing to score.
pub fn calibrate_plies<E: ChessEngine + ?Sized>(
    engine: &mut E,
    uci_moves: &[String],
    start_ply: usize,
    player: Color,
    mut tally: CalibrationTally,
) -> Result<CalibrationTally, EngineError> {
    let mut scored_plies = (start_ply..uci_moves.len())
        .filter(|&ply| ReplayedGame::mover_at(ply) == player)
        .peekable();
    if scored_plies.peek().is_none() {
        return Ok(tally);
    }

    engine.set_skill_level(SkillLevel::MAX)?;
    for ply in scored_plies {
        engine.set_position(&uci_moves[..ply])?;
        let best = engine.best_move()?;
        let played = &uci_moves[ply];
        let matched = best.as_deref() == Some(played.as_str());
        debug!(
            "calibration ply {ply}: played {played}, engine {}, matched {matched}",
            best.as_deref().unwrap_or("(none)")
        );

        tally.total = tally.total.saturating_add(1);
        if matched {
            tally.matches = tally.matches.saturating_add(1);
        }
    }

    Ok(tally)
}
