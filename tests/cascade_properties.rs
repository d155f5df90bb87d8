//! End-to-end behaviour of the prediction cascade with scripted collaborators.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rand::{rngs::StdRng, Rng, SeedableRng};
use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, Chess, Position};

use chess_persona::cascade::prediction::{PredictionResult, PredictionSource};
use chess_persona::cascade::predictor::PredictionCascade;
use chess_persona::engine::calibration::SkillLevel;
use chess_persona::engine::engine_pool::EnginePool;
use chess_persona::engine::engine_trait::ChessEngine;
use chess_persona::errors::{EngineError, ModelError, PredictionError};
use chess_persona::history::move_record::{HistoryTable, MoveRecord};
use chess_persona::history::table_io::{explode_games, history_table_from_csv_str, GameSummary};
use chess_persona::model::model_trait::{ModelRequest, MovePredictor};
use chess_persona::rules::board_adapter::ReplayedGame;

/// Plays the alphabetically first legal UCI move and records every call.
#[derive(Default)]
struct ScriptedEngine {
    position: Vec<String>,
    skills: Vec<f64>,
    best_move_calls: Arc<AtomicUsize>,
}

impl ScriptedEngine {
    fn with_counter(counter: &Arc<AtomicUsize>) -> Self {
        Self {
            best_move_calls: Arc::clone(counter),
            ..Self::default()
        }
    }
}

impl ChessEngine for ScriptedEngine {
    fn set_position(&mut self, uci_moves: &[String]) -> Result<(), EngineError> {
        self.position = uci_moves.to_vec();
        Ok(())
    }

    fn set_skill_level(&mut self, skill: SkillLevel) -> Result<(), EngineError> {
        self.skills.push(skill.value());
        Ok(())
    }

    fn best_move(&mut self) -> Result<Option<String>, EngineError> {
        self.best_move_calls.fetch_add(1, Ordering::SeqCst);
        let mut position = Chess::default();
        for uci in &self.position {
            let parsed: UciMove = uci
                .parse()
                .map_err(|_| EngineError::Protocol(format!("bad uci {uci}")))?;
            let mv = parsed
                .to_move(&position)
                .map_err(|_| EngineError::IllegalMove(uci.clone()))?;
            position.play_unchecked(&mv);
        }
        Ok(position
            .legal_moves()
            .iter()
            .map(|mv| mv.to_uci(CastlingMode::Standard).to_string())
            .min())
    }
}

/// Replies from a fixed script, cycling; counts calls.
struct ScriptedModel {
    replies: Vec<Result<String, ModelError>>,
    calls: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<ModelRequest>>>,
}

impl ScriptedModel {
    fn new(replies: Vec<Result<&str, ModelError>>, calls: &Arc<AtomicUsize>) -> Self {
        Self {
            replies: replies.into_iter().map(|r| r.map(str::to_owned)).collect(),
            calls: Arc::clone(calls),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl MovePredictor for ScriptedModel {
    fn predict_move(&self, request: &ModelRequest) -> Result<String, ModelError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .expect("request log should lock")
            .push(request.clone());
        self.replies[call % self.replies.len()].clone()
    }
}

fn random_game(rng: &mut StdRng, max_plies: usize) -> Vec<String> {
    let mut game = ReplayedGame::new();
    for _ in 0..max_plies {
        let legal: Vec<String> = game.legal_moves_san().into_iter().collect();
        if legal.is_empty() {
            break;
        }
        let pick = &legal[rng.random_range(0..legal.len())];
        game.push_san(pick).expect("a listed legal move should apply");
    }
    game.san_moves().to_vec()
}

#[test]
fn majority_vote_cache_hit() {
    let history = HistoryTable::from_records([
        MoveRecord::new("g1", "e4", "e5"),
        MoveRecord::new("g2", "e4", "e5"),
        MoveRecord::new("g3", "e4", "e5"),
        MoveRecord::new("g4", "e4", "c5"),
    ]);
    let model_calls = Arc::new(AtomicUsize::new(0));
    let engine_calls = Arc::new(AtomicUsize::new(0));
    let cascade = PredictionCascade::new(Mutex::new(ScriptedEngine::with_counter(&engine_calls)))
        .with_model(ScriptedModel::new(vec![Ok("d5")], &model_calls));

    let result = cascade
        .predict("alice", &history, &["e4"])
        .expect("prediction should succeed");

    assert_eq!(result, PredictionResult::new("e5", PredictionSource::Cache));
    assert_eq!(
        serde_json::to_string(&result).expect("result should serialise"),
        r#"{"predicted_move":"e5","source":"cache"}"#
    );
    assert_eq!(model_calls.load(Ordering::SeqCst), 0);
    assert_eq!(engine_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn empty_history_model_failure_uses_engine_at_skill_twenty() {
    let model_calls = Arc::new(AtomicUsize::new(0));
    let engine_calls = Arc::new(AtomicUsize::new(0));
    let cascade = PredictionCascade::new(Mutex::new(ScriptedEngine::with_counter(&engine_calls)))
        .with_model(ScriptedModel::new(
            vec![Err(ModelError::Unavailable("connection refused".to_owned()))],
            &model_calls,
        ));

    let result = cascade
        .predict("alice", &HistoryTable::new(), &["e4"])
        .expect("prediction should succeed");

    assert_eq!(result.source, PredictionSource::Engine);
    // Alphabetically first legal black reply in UCI is a7a5.
    assert_eq!(result.predicted_move, "a5");
    assert_eq!(model_calls.load(Ordering::SeqCst), 1);
    assert_eq!(engine_calls.load(Ordering::SeqCst), 1);
    let engine = cascade.engine().lock().expect("engine should lock");
    assert_eq!(engine.skills, vec![20.0]);
}

#[test]
fn illegal_sequence_runs_no_strategy() {
    let model_calls = Arc::new(AtomicUsize::new(0));
    let engine_calls = Arc::new(AtomicUsize::new(0));
    let history = HistoryTable::from_records([MoveRecord::new("g1", "e4", "e5")]);
    let cascade = PredictionCascade::new(Mutex::new(ScriptedEngine::with_counter(&engine_calls)))
        .with_model(ScriptedModel::new(vec![Ok("e5")], &model_calls));

    let err = cascade
        .predict("alice", &history, &["e4", "e4"])
        .expect_err("the second e4 is not legal");

    match &err {
        PredictionError::IllegalPartialSequence(rules) => {
            assert_eq!(rules.to_string(), "illegal move 'e4' at ply 1");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(err.is_bad_request());
    assert_eq!(model_calls.load(Ordering::SeqCst), 0);
    assert_eq!(engine_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn every_prediction_applies_to_its_position() {
    let mut rng = StdRng::seed_from_u64(0x5EED_0F_C4E55);
    let model_calls = Arc::new(AtomicUsize::new(0));
    let engine_calls = Arc::new(AtomicUsize::new(0));
    let model = ScriptedModel::new(
        vec![
            Ok("Nf3"),
            Ok("Qxh7"),
            Err(ModelError::Malformed("not json".to_owned())),
            Ok("e4"),
            Ok("O-O"),
        ],
        &model_calls,
    );
    let seen = Arc::clone(&model.seen);

    let games: Vec<Vec<String>> = (0..6).map(|_| random_game(&mut rng, 30)).collect();
    let summaries: Vec<GameSummary> = games
        .iter()
        .enumerate()
        .map(|(i, moves)| GameSummary {
            game_id: format!("g{i}"),
            white_player: if i % 2 == 0 { "alice" } else { "bob" }.to_owned(),
            black_player: if i % 2 == 0 { "bob" } else { "alice" }.to_owned(),
            move_list: moves.join(" "),
        })
        .collect();
    let history = explode_games(&summaries[..3], "alice");

    let pool = EnginePool::new(vec![
        ScriptedEngine::with_counter(&engine_calls),
        ScriptedEngine::with_counter(&engine_calls),
    ]);
    let cascade = PredictionCascade::new(pool).with_model(model);

    let mut sources = [0usize; 3];
    for game in &games {
        for ply in 0..game.len() {
            let prefix = &game[..ply];
            let model_before = model_calls.load(Ordering::SeqCst);
            let result = cascade
                .predict("alice", &history, prefix)
                .expect("legal prefixes always get a prediction");

            let mut replay = ReplayedGame::from_san_moves(prefix).expect("prefix should replay");
            let legal = replay.legal_moves_san();
            assert!(
                legal.contains(&result.predicted_move),
                "{:?} after {:?} is not legal",
                result,
                prefix
            );
            replay
                .push_san(&result.predicted_move)
                .expect("predicted move should apply");

            let model_after = model_calls.load(Ordering::SeqCst);
            match result.source {
                PredictionSource::Cache => {
                    sources[0] += 1;
                    assert_eq!(model_after, model_before);
                }
                PredictionSource::Model => {
                    sources[1] += 1;
                    assert_eq!(model_after, model_before + 1);
                }
                PredictionSource::Engine => {
                    sources[2] += 1;
                    assert_eq!(model_after, model_before + 1);
                }
            }
        }
    }

    assert!(sources[0] > 0 && sources[2] > 0, "sources {sources:?}");
    for request in seen.lock().expect("request log should lock").iter() {
        assert!(!request.legal_moves.is_empty());
        assert!(request.context_games.len() <= 25);
    }
}

#[test]
fn exploded_history_answers_from_cache() {
    let csv = "game_id,input_sequence,target_move\n\
               a1,,e4\n\
               a1,e4 e5,Nf3\n\
               a2,,d4\n\
               a3,,e4\n";
    let history = history_table_from_csv_str(csv).expect("table should parse");
    let engine_calls = Arc::new(AtomicUsize::new(0));
    let cascade = PredictionCascade::new(Mutex::new(ScriptedEngine::with_counter(&engine_calls)));

    let opening = cascade
        .predict_text("alice", &history, "")
        .expect("prediction should succeed");
    assert_eq!(opening, PredictionResult::new("e4", PredictionSource::Cache));

    let second = cascade
        .predict_text("alice", &history, "1. e4 e5")
        .expect("prediction should succeed");
    assert_eq!(second, PredictionResult::new("Nf3", PredictionSource::Cache));
    assert_eq!(engine_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn shared_cascade_serves_concurrent_requests() {
    let engine_calls = Arc::new(AtomicUsize::new(0));
    let cascade = Arc::new(PredictionCascade::new(EnginePool::new(vec![
        ScriptedEngine::with_counter(&engine_calls),
        ScriptedEngine::with_counter(&engine_calls),
    ])));
    let history = Arc::new(HistoryTable::new());

    let workers: Vec<_> = (0..4u64)
        .map(|seed| {
            let cascade = Arc::clone(&cascade);
            let history = Arc::clone(&history);
            std::thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed);
                for _ in 0..5 {
                    let game = random_game(&mut rng, 12);
                    match cascade.predict("alice", &history, &game) {
                        Ok(result) => assert_eq!(result.source, PredictionSource::Engine),
                        Err(PredictionError::NoLegalMove) => {}
                        Err(other) => panic!("unexpected error {other:?}"),
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker should finish");
    }
    assert!(engine_calls.load(Ordering::SeqCst) >= 20);
}
