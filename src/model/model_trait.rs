//! Boundary to the generative move predictor.

use std::collections::BTreeSet;

use crate::errors::ModelError;

/// Everything a predictor gets to see for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRequest {
    pub player_id: String,
    /// Space-joined SAN of the moves played so far.
    pub partial_sequence: String,
    /// Legal SAN moves at the current position; never empty.
    pub legal_moves: BTreeSet<String>,
    /// `(game_id, move list)` of the player's games that begin with the
    /// partial sequence.
    pub context_games: Vec<(String, String)>,
}

pub trait MovePredictor: Send + Sync {
    /// Proposed next move in SAN.
    ///
    /// The answer is a proposal only: callers check it against
    /// `request.legal_moves` before trusting it.
    fn predict_move(&self, request: &ModelRequest) -> Result<String, ModelError>;
}

impl<P: MovePredictor + ?Sized> MovePredictor for Box<P> {
    fn predict_move(&self, request: &ModelRequest) -> Result<String, ModelError> {
        (**self).predict_move(request)
    }
}
