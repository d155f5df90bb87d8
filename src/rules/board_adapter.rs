//! Board replay and notation conversion on top of `shakmaty`.
//!
//! A `ReplayedGame` is the position reached by applying a SAN move list from
//! the standard starting position. It keeps the UCI rendering of every move
//! (converted once, while replaying) so engine-facing code never has to
//! re-derive it, and it answers the three rule questions the cascade asks:
//! which moves are legal here, is this loosely written SAN one of them, and
//! how does a move translate between SAN and UCI.

use std::collections::BTreeSet;

use shakmaty::san::SanPlus;
use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, Chess, Color, Move, Position};

use crate::errors::RulesError;

#[derive(Debug, Clone)]
pub struct ReplayedGame {
    position: Chess,
    san_moves: Vec<String>,
    uci_moves: Vec<String>,
}

impl Default for ReplayedGame {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayedGame {
    /// Standard starting position, no moves played.
    pub fn new() -> Self {
        Self {
            position: Chess::default(),
            san_moves: Vec::new(),
            uci_moves: Vec::new(),
        }
    }

    /// Replay `moves` from the starting position.
    ///
    /// Fails on the first move that is not legal where it is played.
    pub fn from_san_moves<S: AsRef<str>>(moves: &[S]) -> Result<Self, RulesError> {
        let mut game = Self::new();
        for (ply, san) in moves.iter().enumerate() {
            game.push_san(san.as_ref()).map_err(|_| RulesError::IllegalMove {
                ply,
                san: san.as_ref().to_owned(),
            })?;
        }
        Ok(game)
    }

    /// Apply one SAN move to the current position.
    pub fn push_san(&mut self, san: &str) -> Result<(), RulesError> {
        let mv = self.parse_san(san)?;
        self.push_move(&mv);
        Ok(())
    }

    /// Apply one UCI move to the current position.
    pub fn push_uci(&mut self, uci: &str) -> Result<(), RulesError> {
        let mv = self.parse_uci(uci)?;
        self.push_move(&mv);
        Ok(())
    }

    #[inline]
    pub fn position(&self) -> &Chess {
        &self.position
    }

    #[inline]
    pub fn san_moves(&self) -> &[String] {
        &self.san_moves
    }

    /// UCI rendering of every replayed move, in order.
    #[inline]
    pub fn uci_moves(&self) -> &[String] {
        &self.uci_moves
    }

    #[inline]
    pub fn ply_count(&self) -> usize {
        self.san_moves.len()
    }

    #[inline]
    pub fn side_to_move(&self) -> Color {
        self.position.turn()
    }

    /// Side that made the move at zero-based `ply` of a game from the
    /// starting position.
    #[inline]
    pub fn mover_at(ply: usize) -> Color {
        if ply % 2 == 0 {
            Color::White
        } else {
            Color::Black
        }
    }

    /// Space-joined SAN history, the key format of the history table.
    pub fn joined_san(&self) -> String {
        self.san_moves.join(" ")
    }

    /// Every legal move at the current position rendered as SAN, including
    /// `+`/`#` suffixes.
    pub fn legal_moves_san(&self) -> BTreeSet<String> {
        self.position
            .legal_moves()
            .iter()
            .map(|mv| self.render_san(mv))
            .collect()
    }

    #[inline]
    pub fn has_legal_moves(&self) -> bool {
        !self.position.legal_moves().is_empty()
    }

    /// Canonical SAN for `san` if it names a legal move here.
    ///
    /// Accepts missing or superfluous check suffixes ("Bb5" for "Bb5+").
    pub fn resolve_san(&self, san: &str) -> Option<String> {
        self.parse_san(san).ok().map(|mv| self.render_san(&mv))
    }

    pub fn san_to_uci(&self, san: &str) -> Result<String, RulesError> {
        let mv = self.parse_san(san)?;
        Ok(mv.to_uci(CastlingMode::Standard).to_string())
    }

    pub fn uci_to_san(&self, uci: &str) -> Result<String, RulesError> {
        let mv = self.parse_uci(uci)?;
        Ok(self.render_san(&mv))
    }

    fn parse_san(&self, san: &str) -> Result<Move, RulesError> {
        let parsed: SanPlus = san
            .trim()
            .parse()
            .map_err(|_| RulesError::InvalidNotation(san.to_owned()))?;
        parsed
            .san
            .to_move(&self.position)
            .map_err(|_| RulesError::InvalidNotation(san.to_owned()))
    }

    fn parse_uci(&self, uci: &str) -> Result<Move, RulesError> {
        let parsed: UciMove = uci
            .trim()
            .parse()
            .map_err(|_| RulesError::InvalidNotation(uci.to_owned()))?;
        parsed
            .to_move(&self.position)
            .map_err(|_| RulesError::InvalidNotation(uci.to_owned()))
    }

    fn render_san(&self, mv: &Move) -> String {
        let mut after = self.position.clone();
        SanPlus::from_move_and_play_unchecked(&mut after, mv).to_string()
    }

    fn push_move(&mut self, mv: &Move) {
        let san = self.render_san(mv);
        let uci = mv.to_uci(CastlingMode::Standard).to_string();
        self.position.play_unchecked(mv);
        self.san_moves.push(san);
        self.uci_moves.push(uci);
    }
}

/// Split request text into SAN tokens.
///
/// Tokens are separated by whitespace or commas; move numbers such as `1.`
/// or `12...` are dropped.
pub fn parse_partial_sequence(text: &str) -> Vec<String> {
    text.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|token| !token.is_empty() && !is_move_number_token(token))
        .map(str::to_owned)
        .collect()
}

fn is_move_number_token(token: &str) -> bool {
    let digits = token.trim_end_matches('.');
    digits.len() < token.len() && !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}
