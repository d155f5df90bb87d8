//! Errors used throughout the prediction pipeline.
//!
//! Each subsystem owns one error enum so callers can match on the failure
//! kind that matters to them:
//! - `RulesError` comes from replaying or converting moves on a board.
//! - `HistoryError` comes from loading or building a player's history table.
//! - `ModelError` is produced by the model stage and is always recovered by
//!   the cascade (it advances to the engine fallback).
//! - `EngineError` is produced by the engine process; at the fallback stage
//!   it is terminal.
//! - `PredictionError` is the only error surfaced by `PredictionCascade`.

use std::io;

use thiserror::Error;

/// Failures while replaying a move list or converting notation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RulesError {
    /// Move `san` at zero-based `ply` could not be parsed or is not legal in
    /// the position reached by the preceding moves.
    #[error("illegal move '{san}' at ply {ply}")]
    IllegalMove { ply: usize, san: String },

    /// A move string is not valid SAN/UCI or does not match any legal move
    /// at the current position.
    #[error("invalid move notation: {0}")]
    InvalidNotation(String),
}

/// Failures while reading or building a `HistoryTable`.
#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("history I/O error: {0}")]
    Io(#[from] io::Error),

    /// The header row lacks a required column.
    #[error("history table is missing column '{0}'")]
    MissingColumn(&'static str),

    /// A data row could not be split into the expected fields.
    ///
    /// `line` is one-based and counts the header.
    #[error("malformed history row at line {line}: {reason}")]
    MalformedRow { line: usize, reason: String },
}

/// Failure kinds of the model stage.
///
/// None of these reach the caller of `PredictionCascade::predict`; they are
/// logged and the cascade moves on to the engine fallback.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// Transport, HTTP status, or timeout failure talking to the model.
    #[error("model unavailable: {0}")]
    Unavailable(String),

    /// The model answered but not with a single-move payload.
    #[error("malformed model response: {0}")]
    Malformed(String),

    /// The model proposed a move that is not in the legal-move set.
    #[error("model proposed illegal move '{0}'")]
    IllegalMove(String),
}

/// Failures talking to the external chess engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to start engine '{path}': {source}")]
    Spawn {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("engine pipe error: {0}")]
    Io(#[from] io::Error),

    /// No response line arrived within the configured timeout.
    #[error("engine did not answer '{command}' within {timeout_ms} ms")]
    Timeout { command: String, timeout_ms: u64 },

    /// The engine closed its stdout.
    #[error("engine process exited")]
    Exited,

    /// The engine sent something that is not valid UCI for the request.
    #[error("engine protocol error: {0}")]
    Protocol(String),

    /// The engine's best move does not apply to the current position.
    #[error("engine returned illegal move '{0}'")]
    IllegalMove(String),
}

/// Errors surfaced by a prediction request.
#[derive(Error, Debug)]
pub enum PredictionError {
    /// The partial sequence is not a legal game prefix. Reported before any
    /// strategy runs; a caller error, never retried.
    #[error("illegal partial sequence: {0}")]
    IllegalPartialSequence(#[source] RulesError),

    /// The engine fallback failed; there is no strategy below it.
    #[error("engine unavailable: {0}")]
    EngineUnavailable(#[from] EngineError),

    /// The engine reported no move, e.g. the position is checkmate or
    /// stalemate.
    #[error("no legal move available in the current position")]
    NoLegalMove,
}

impl PredictionError {
    /// `true` for errors caused by the request itself (HTTP 400 class).
    pub fn is_bad_request(&self) -> bool {
        matches!(self, PredictionError::IllegalPartialSequence(_))
    }

    /// Short machine-readable tag used in error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            PredictionError::IllegalPartialSequence(_) => "illegal_partial_sequence",
            PredictionError::EngineUnavailable(_) => "engine_unavailable",
            PredictionError::NoLegalMove => "no_legal_move",
        }
    }
}
