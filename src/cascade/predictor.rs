//! The prediction cascade: history cache, then model, then engine.
//!
//! ```text
//! START ─ replay ─┬─ illegal ──────────────────────────► Err(IllegalPartialSequence)
//!                 └► CACHE ─┬─ hit ────────────────────► Ok(cache)
//!                           └► MODEL ─┬─ legal move ───► Ok(model)
//!                                     └► ENGINE ─┬─ ok ► Ok(engine)
//!                                                └─────► Err(EngineUnavailable | NoLegalMove)
//! ```
//!
//! Every stage runs at most once per request. Cache misses and model
//! failures are expected and only move the request along; engine failures
//! end it, since nothing sits below the engine.

use log::{info, warn};

use crate::cascade::prediction::{PredictionResult, PredictionSource};
use crate::engine::calibration::{estimate_skill_level, SkillLevel};
use crate::engine::engine_trait::{ChessEngine, EngineSource};
use crate::engine::skill_memo::SkillMemo;
use crate::errors::{EngineError, ModelError, PredictionError};
use crate::history::cache_lookup::cache_search;
use crate::history::move_record::HistoryTable;
use crate::model::model_trait::{ModelRequest, MovePredictor};
use crate::rules::board_adapter::{parse_partial_sequence, ReplayedGame};

/// Default cap on the historical games quoted to the model.
pub const DEFAULT_MAX_CONTEXT_GAMES: usize = 25;

/// Answers each request from the history cache, then the model, then the
/// engine.
pub struct PredictionCascade<S: EngineSource> {
    engine: S,
    model: Option<Box<dyn MovePredictor>>,
    skill_memo: Option<SkillMemo>,
    max_context_games: usize,
}

impl<S: EngineSource> PredictionCascade<S> {
    /// Cascade with only the cache and the engine stage.
    pub fn new(engine: S) -> Self {
        Self {
            engine,
            model: None,
            skill_memo: None,
            max_context_games: DEFAULT_MAX_CONTEXT_GAMES,
        }
    }

    /// Enable the model stage with `model`.
    pub fn with_model<P: MovePredictor + 'static>(mut self, model: P) -> Self {
        self.model = Some(Box::new(model));
        self
    }

    /// Keep calibration progress per player between requests.
    pub fn with_skill_memo(mut self) -> Self {
        self.skill_memo = Some(SkillMemo::new());
        self
    }

    /// Cap on historical games quoted to the model.
    pub fn with_max_context_games(mut self, limit: usize) -> Self {
        self.max_context_games = limit;
        self
    }

    /// The engine source used for the fallback stage and calibration.
    pub fn engine(&self) -> &S {
        &self.engine
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    /// Predict the next move of `player_id` after `partial_sequence` (SAN,
    /// from the starting position), using `history` as that player's cache.
    pub fn predict<M: AsRef<str>>(
        &self,
        player_id: &str,
        history: &HistoryTable,
        partial_sequence: &[M],
    ) -> Result<PredictionResult, PredictionError> {
        let game = ReplayedGame::from_san_moves(partial_sequence)
            .map_err(PredictionError::IllegalPartialSequence)?;
        let key = game.joined_san();

        if let Some(hit) = self.cache_stage(&key, history, &game) {
            info!("{player_id} [{key}]: cache hit {}", hit.predicted_move);
            return Ok(hit);
        }

        if let Some(model) = &self.model {
            match self.model_stage(model.as_ref(), player_id, &key, history, &game) {
                Ok(Some(result)) => {
                    info!("{player_id} [{key}]: model predicted {}", result.predicted_move);
                    return Ok(result);
                }
                Ok(None) => info!("{player_id} [{key}]: no legal moves, skipping model"),
                Err(err) => warn!("{player_id} [{key}]: model failed, falling back to engine: {err}"),
            }
        }

        let result = self.engine_stage(player_id, &game)?;
        info!("{player_id} [{key}]: engine predicted {}", result.predicted_move);
        Ok(result)
    }

    /// `predict` for a whitespace- or comma-separated move list.
    pub fn predict_text(
        &self,
        player_id: &str,
        history: &HistoryTable,
        partial_sequence: &str,
    ) -> Result<PredictionResult, PredictionError> {
        self.predict(player_id, history, &parse_partial_sequence(partial_sequence))
    }

    /// Calibrated skill for the side to move at the end of `partial_sequence`,
    /// without predicting anything.
    pub fn skill_level<M: AsRef<str>>(
        &self,
        player_id: &str,
        partial_sequence: &[M],
    ) -> Result<SkillLevel, PredictionError> {
        let game = ReplayedGame::from_san_moves(partial_sequence)
            .map_err(PredictionError::IllegalPartialSequence)?;
        let mut engine = self.engine.acquire();
        Ok(self.calibrate(&mut *engine, player_id, &game)?)
    }

    fn cache_stage(
        &self,
        key: &str,
        history: &HistoryTable,
        game: &ReplayedGame,
    ) -> Option<PredictionResult> {
        let hit = cache_search(key, history)?;
        match game.resolve_san(&hit.predicted_move) {
            Some(san) => Some(PredictionResult::new(san, PredictionSource::Cache)),
            None => {
                warn!(
                    "cached move '{}' after [{key}] is not legal here; ignoring it",
                    hit.predicted_move
                );
                None
            }
        }
    }

    /// `Ok(None)` when there is nothing to ask the model about.
    fn model_stage(
        &self,
        model: &dyn MovePredictor,
        player_id: &str,
        key: &str,
        history: &HistoryTable,
        game: &ReplayedGame,
    ) -> Result<Option<PredictionResult>, ModelError> {
        let legal_moves = game.legal_moves_san();
        if legal_moves.is_empty() {
            return Ok(None);
        }

        let request = ModelRequest {
            player_id: player_id.to_owned(),
            partial_sequence: key.to_owned(),
            context_games: history.games_with_prefix(key, self.max_context_games),
            legal_moves,
        };
        let proposed = model.predict_move(&request)?;

        let san = if request.legal_moves.contains(&proposed) {
            proposed
        } else {
            game.resolve_san(&proposed)
                .filter(|san| request.legal_moves.contains(san))
                .ok_or(ModelError::IllegalMove(proposed))?
        };
        Ok(Some(PredictionResult::new(san, PredictionSource::Model)))
    }

    fn engine_stage(
        &self,
        player_id: &str,
        game: &ReplayedGame,
    ) -> Result<PredictionResult, PredictionError> {
        let mut engine = self.engine.acquire();
        let skill = self.calibrate(&mut *engine, player_id, game)?;
        info!("{player_id}: engine fallback at skill {skill}");

        engine.set_position(game.uci_moves())?;
        engine.set_skill_level(skill)?;
        let uci = engine.best_move()?.ok_or(PredictionError::NoLegalMove)?;
        let san = game
            .uci_to_san(&uci)
            .map_err(|_| EngineError::IllegalMove(uci))?;
        Ok(PredictionResult::new(san, PredictionSource::Engine))
    }

    fn calibrate(
        &self,
        engine: &mut S::Engine,
        player_id: &str,
        game: &ReplayedGame,
    ) -> Result<SkillLevel, EngineError> {
        let player = game.side_to_move();
        match &self.skill_memo {
            Some(memo) => memo.calibrate(engine, player_id, game, player),
            None => estimate_skill_level(engine, game, player),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use super::PredictionCascade;
    use crate::cascade::prediction::{PredictionResult, PredictionSource};
    use crate::engine::calibration::SkillLevel;
    use crate::engine::engine_trait::ChessEngine;
    use crate::errors::{EngineError, ModelError, PredictionError};
    use crate::history::move_record::{HistoryTable, MoveRecord};
    use crate::model::model_trait::{ModelRequest, MovePredictor};

    #[derive(Default)]
    struct FakeEngine {
        answers: VecDeque<Option<String>>,
        fail: bool,
        queries: usize,
        skills: Vec<f64>,
    }

    impl ChessEngine for FakeEngine {
        fn set_position(&mut self, _uci_moves: &[String]) -> Result<(), EngineError> {
            if self.fail {
                return Err(EngineError::Exited);
            }
            Ok(())
        }

        fn set_skill_level(&mut self, skill: SkillLevel) -> Result<(), EngineError> {
            self.skills.push(skill.value());
            Ok(())
        }

        fn best_move(&mut self) -> Result<Option<String>, EngineError> {
            self.queries += 1;
            Ok(self.answers.pop_front().flatten())
        }
    }

    struct FixedModel {
        reply: Result<String, ModelError>,
        calls: Arc<Mutex<Vec<ModelRequest>>>,
    }

    impl FixedModel {
        fn new(reply: Result<&str, ModelError>) -> (Self, Arc<Mutex<Vec<ModelRequest>>>) {
            let calls = Arc::new(Mutex::new(Vec::new()));
            let model = Self {
                reply: reply.map(str::to_owned),
                calls: Arc::clone(&calls),
            };
            (model, calls)
        }
    }

    impl MovePredictor for FixedModel {
        fn predict_move(&self, request: &ModelRequest) -> Result<String, ModelError> {
            self.calls
                .lock()
                .expect("call log should lock")
                .push(request.clone());
            self.reply.clone()
        }
    }

    fn engine(answers: &[Option<&str>]) -> Mutex<FakeEngine> {
        Mutex::new(FakeEngine {
            answers: answers.iter().map(|a| a.map(str::to_owned)).collect(),
            ..FakeEngine::default()
        })
    }

    fn ruy_lopez_history() -> HistoryTable {
        HistoryTable::from_records([
            MoveRecord::new("g1", "e4 e5 Nf3 Nc6", "Bb5"),
            MoveRecord::new("g2", "e4 e5 Nf3 Nc6", "Bb5"),
            MoveRecord::new("g3", "e4 e5 Nf3 Nc6", "Bc4"),
        ])
    }

    #[test]
    fn cache_hit_short_circuits() {
        let (model, calls) = FixedModel::new(Ok("d4"));
        let cascade = PredictionCascade::new(engine(&[])).with_model(model);

        let result = cascade
            .predict("alice", &ruy_lopez_history(), &["e4", "e5", "Nf3", "Nc6"])
            .expect("prediction should succeed");

        assert_eq!(result, PredictionResult::new("Bb5", PredictionSource::Cache));
        assert!(calls.lock().expect("call log should lock").is_empty());
        assert_eq!(cascade.engine().lock().expect("engine should lock").queries, 0);
    }

    #[test]
    fn model_answer_is_used_when_legal() {
        let (model, calls) = FixedModel::new(Ok("d4"));
        let cascade = PredictionCascade::new(engine(&[])).with_model(model);

        let result = cascade
            .predict("alice", &ruy_lopez_history(), &["e4", "e5"])
            .expect("prediction should succeed");

        assert_eq!(result, PredictionResult::new("d4", PredictionSource::Model));
        let calls = calls.lock().expect("call log should lock");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].partial_sequence, "e4 e5");
        assert_eq!(calls[0].context_games.len(), 3);
        assert!(calls[0].legal_moves.contains("Nf3"));
    }

    #[test]
    fn loosely_written_model_answer_is_canonicalised() {
        let (model, _) = FixedModel::new(Ok("Bb5"));
        let cascade = PredictionCascade::new(engine(&[])).with_model(model);

        let result = cascade
            .predict("alice", &HistoryTable::new(), &["e4", "d6"])
            .expect("prediction should succeed");
        assert_eq!(result, PredictionResult::new("Bb5+", PredictionSource::Model));
    }

    #[test]
    fn illegal_model_answer_falls_back_to_engine() {
        let (model, _) = FixedModel::new(Ok("Ke2"));
        // Black to move: calibration scores e5 first, then the fallback query.
        let cascade = PredictionCascade::new(engine(&[Some("e7e5"), Some("b8c6")]))
            .with_model(model);

        let result = cascade
            .predict("bob", &HistoryTable::new(), &["e4", "e5", "Nf3"])
            .expect("prediction should succeed");

        assert_eq!(result, PredictionResult::new("Nc6", PredictionSource::Engine));
        let engine = cascade.engine().lock().expect("engine should lock");
        assert_eq!(engine.queries, 2);
        assert_eq!(engine.skills, vec![100.0, 96.0]);
    }

    #[test]
    fn model_failure_falls_back_with_calibrated_skill() {
        let (model, _) = FixedModel::new(Err(ModelError::Unavailable("refused".to_owned())));
        // Black to move after e4: nothing of Black's to score, skill defaults to 20.
        let cascade = PredictionCascade::new(engine(&[Some("c7c5")])).with_model(model);

        let result = cascade
            .predict("carol", &HistoryTable::new(), &["e4"])
            .expect("prediction should succeed");

        assert_eq!(result, PredictionResult::new("c5", PredictionSource::Engine));
        let engine = cascade.engine().lock().expect("engine should lock");
        assert_eq!(engine.queries, 1);
        assert_eq!(engine.skills, vec![20.0]);
    }

    #[test]
    fn illegal_sequence_fails_before_any_stage() {
        let (model, calls) = FixedModel::new(Ok("e5"));
        let cascade = PredictionCascade::new(engine(&[])).with_model(model);

        let err = cascade
            .predict("dave", &ruy_lopez_history(), &["e4", "e4"])
            .expect_err("second e4 is illegal");

        assert!(err.is_bad_request());
        assert!(calls.lock().expect("call log should lock").is_empty());
        assert_eq!(cascade.engine().lock().expect("engine should lock").queries, 0);
    }

    #[test]
    fn engine_failure_is_terminal() {
        let cascade = PredictionCascade::new(Mutex::new(FakeEngine {
            fail: true,
            ..FakeEngine::default()
        }));
        let err = cascade
            .predict("erin", &HistoryTable::new(), &["e4"])
            .expect_err("engine is down");
        assert!(matches!(err, PredictionError::EngineUnavailable(EngineError::Exited)));
    }

    #[test]
    fn checkmate_yields_no_legal_move() {
        let (model, calls) = FixedModel::new(Ok("e4"));
        let cascade = PredictionCascade::new(engine(&[None])).with_model(model);

        let err = cascade
            .predict("frank", &HistoryTable::new(), &["f3", "e5", "g4", "Qh4#"])
            .expect_err("white is mated");

        assert!(matches!(err, PredictionError::NoLegalMove));
        assert!(calls.lock().expect("call log should lock").is_empty());
    }

    #[test]
    fn engine_move_that_does_not_apply_is_an_engine_error() {
        let cascade = PredictionCascade::new(engine(&[Some("e2e5")]));
        let err = cascade
            .predict("gina", &HistoryTable::new(), &Vec::<String>::new())
            .expect_err("e2e5 is not a move");
        assert!(matches!(
            err,
            PredictionError::EngineUnavailable(EngineError::IllegalMove(_))
        ));
    }

    #[test]
    fn text_input_is_split_into_moves() {
        let cascade = PredictionCascade::new(engine(&[]));
        let result = cascade
            .predict_text("alice", &ruy_lopez_history(), "1. e4 e5 2. Nf3 Nc6")
            .expect("prediction should succeed");
        assert_eq!(result.source, PredictionSource::Cache);
    }
}
