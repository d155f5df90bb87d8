//! Per-player memo of calibration progress.
//!
//! Successive requests for the same player usually extend the previous
//! partial sequence by a move or two. The memo keeps the tally for the
//! longest sequence scored so far and only scores the new plies when the
//! incoming sequence extends it with the same side to move. Anything else
//! (a different game, a take-back, the other colour) starts over.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use log::debug;
use shakmaty::Color;

use crate::engine::calibration::{calibrate_plies, CalibrationTally, SkillLevel};
use crate::engine::engine_trait::ChessEngine;
use crate::errors::EngineError;
use crate::rules::board_adapter::ReplayedGame;

#[derive(Debug, Clone)]
struct MemoEntry {
    player: Color,
    uci_moves: Vec<String>,
    tally: CalibrationTally,
}

#[derive(Debug, Default)]
pub struct SkillMemo {
    entries: Mutex<HashMap<String, MemoEntry>>,
}

impl SkillMemo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn forget(&self, player_id: &str) {
        self.lock().remove(player_id);
    }

    /// Skill level for `player_id` over `game`, reusing stored progress when
    /// `game` extends the last sequence seen for that player.
    ///
    /// The memo lock is not held while the engine runs.
    pub fn calibrate<E: ChessEngine + ?Sized>(
        &self,
        engine: &mut E,
        player_id: &str,
        game: &ReplayedGame,
        player: Color,
    ) -> Result<SkillLevel, EngineError> {
        let uci_moves = game.uci_moves();
        let (start_ply, tally) = match self.lock().get(player_id) {
            Some(entry) if entry.player == player && uci_moves.starts_with(&entry.uci_moves) => {
                (entry.uci_moves.len(), entry.tally)
            }
            _ => (0, CalibrationTally::default()),
        };
        debug!(
            "calibrating {player_id} from ply {start_ply} of {} ({} prior scored moves)",
            uci_moves.len(),
            tally.total
        );

        let tally = calibrate_plies(engine, uci_moves, start_ply, player, tally)?;
        self.lock().insert(
            player_id.to_owned(),
            MemoEntry {
                player,
                uci_moves: uci_moves.to_vec(),
                tally,
            },
        );
        Ok(tally.skill_level())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, MemoEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
