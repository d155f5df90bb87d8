//! Engine abstraction consumed by calibration and the fallback stage.
//!
//! The engine is stateful: position and skill persist between calls, so a
//! caller must hold exclusive access for the whole set-position /
//! set-skill / best-move exchange. `EngineSource` is how the cascade gets
//! that exclusive access, either from a single `Mutex`-guarded handle or
//! from an `EnginePool`.

use std::ops::DerefMut;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::engine::calibration::SkillLevel;
use crate::errors::EngineError;

pub trait ChessEngine: Send {
    /// Position reached from the starting position by `uci_moves`.
    fn set_position(&mut self, uci_moves: &[String]) -> Result<(), EngineError>;

    /// Strength in `[0, 100]`; `SkillLevel::MAX` is the strongest setting.
    fn set_skill_level(&mut self, skill: SkillLevel) -> Result<(), EngineError>;

    /// Best move in UCI for the current position, `None` when the side to
    /// move has no legal move.
    fn best_move(&mut self) -> Result<Option<String>, EngineError>;
}

impl<E: ChessEngine + ?Sized> ChessEngine for Box<E> {
    fn set_position(&mut self, uci_moves: &[String]) -> Result<(), EngineError> {
        (**self).set_position(uci_moves)
    }

    fn set_skill_level(&mut self, skill: SkillLevel) -> Result<(), EngineError> {
        (**self).set_skill_level(skill)
    }

    fn best_move(&mut self) -> Result<Option<String>, EngineError> {
        (**self).best_move()
    }
}

/// Grants exclusive use of one engine for the lifetime of the guard.
pub trait EngineSource: Sync {
    type Engine: ChessEngine;
    type Guard<'a>: DerefMut<Target = Self::Engine>
    where
        Self: 'a;

    fn acquire(&self) -> Self::Guard<'_>;
}

impl<E: ChessEngine> EngineSource for Mutex<E> {
    type Engine = E;
    type Guard<'a>
        = MutexGuard<'a, E>
    where
        Self: 'a;

    fn acquire(&self) -> Self::Guard<'_> {
        // Every exchange re-sends skill and position before querying, so a
        // handle poisoned mid-exchange is still usable.
        self.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
