use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use serde_json::json;

use chess_persona::cascade::predictor::PredictionCascade;
use chess_persona::config::PersonaConfig;
use chess_persona::engine::engine_pool::EnginePool;
use chess_persona::engine::uci_process::LazyUciEngine;
use chess_persona::errors::PredictionError;
use chess_persona::history::move_record::HistoryTable;
use chess_persona::history::table_io::{
    cached_players, explode_games, games_from_csv_str, history_path_for, load_history_table,
    write_history_table,
};
use chess_persona::model::ollama_client::OllamaClient;
use chess_persona::rules::board_adapter::parse_partial_sequence;

#[derive(Parser, Debug)]
#[command(
    name = "chess_persona",
    version,
    about = "Predict a player's next chess move from their history, a language model, and a calibrated engine"
)]
struct Cli {
    /// Directory holding processed/sequence_target_map_<player>.csv files
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// UCI engine executable (overrides STOCKFISH_PATH)
    #[arg(long, global = true)]
    engine: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Predict the next move of a player
    Predict {
        #[arg(long)]
        player: String,

        /// Moves played so far in SAN, e.g. "e4 e5 Nf3"
        #[arg(long, default_value = "")]
        moves: String,

        /// History table to use instead of the player's cached one
        #[arg(long)]
        history: Option<PathBuf>,

        /// Skip the language model stage
        #[arg(long)]
        no_model: bool,
    },

    /// Calibrate engine skill against the side to move
    Skill {
        #[arg(long, default_value = "")]
        moves: String,

        #[arg(long, default_value = "cli")]
        player: String,
    },

    /// Build a player's history table from a raw games export
    Explode {
        #[arg(long)]
        player: String,

        /// CSV with game_id,white_player,black_player,move_list
        #[arg(long)]
        games: PathBuf,

        /// Output path; defaults to the player's cached table
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// List players with a cached history table
    Players,
}

fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let mut config = PersonaConfig::from_env();
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if let Some(path) = cli.engine {
        config.engine.path = path;
    }

    match cli.command {
        Command::Predict {
            player,
            moves,
            history,
            no_model,
        } => {
            if no_model {
                config.model.enabled = false;
            }
            predict(&config, &player, &moves, history)
        }
        Command::Skill { moves, player } => skill(&config, &player, &moves),
        Command::Explode { player, games, out } => {
            let out = out.unwrap_or_else(|| history_path_for(&config.data_dir, &player));
            explode(&player, &games, &out)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Players => {
            for player in cached_players(&config.data_dir)
                .with_context(|| format!("listing {}", config.data_dir.display()))?
            {
                println!("{player}");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

type CliCascade = PredictionCascade<EnginePool<LazyUciEngine>>;

fn build_cascade(config: &PersonaConfig) -> Result<CliCascade> {
    let mut cascade = PredictionCascade::new(EnginePool::from_config(&config.engine))
        .with_max_context_games(config.model.max_context_games);
    if config.model.enabled {
        let client = OllamaClient::new(&config.model).context("building model client")?;
        cascade = cascade.with_model(client);
    }
    if config.calibration.memoize {
        cascade = cascade.with_skill_memo();
    }
    Ok(cascade)
}

fn predict(
    config: &PersonaConfig,
    player: &str,
    moves: &str,
    history: Option<PathBuf>,
) -> Result<ExitCode> {
    let path = history.unwrap_or_else(|| history_path_for(&config.data_dir, player));
    let table = if path.exists() {
        load_history_table(&path).with_context(|| format!("loading {}", path.display()))?
    } else {
        warn!("no history table at {}; starting without a cache", path.display());
        HistoryTable::new()
    };

    let cascade = build_cascade(config)?;
    match cascade.predict_text(player, &table, moves) {
        Ok(result) => {
            println!("{}", serde_json::to_string(&result)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => Ok(report(&err)),
    }
}

/// Print the error payload and pick the exit code: 2 for a bad request, 1
/// for a service failure.
fn report(err: &PredictionError) -> ExitCode {
    println!("{}", json!({ "error": err.kind(), "message": err.to_string() }));
    if err.is_bad_request() {
        ExitCode::from(2)
    } else {
        ExitCode::FAILURE
    }
}

fn skill(config: &PersonaConfig, player: &str, moves: &str) -> Result<ExitCode> {
    let cascade = build_cascade(config)?;
    let sequence = parse_partial_sequence(moves);
    match cascade.skill_level(player, &sequence) {
        Ok(level) => {
            println!("{}", json!({ "skill_level": level.value() }));
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => Ok(report(&err)),
    }
}

fn explode(player: &str, games: &Path, out: &Path) -> Result<()> {
    let raw = fs::read_to_string(games).with_context(|| format!("reading {}", games.display()))?;
    let summaries = games_from_csv_str(&raw).with_context(|| format!("parsing {}", games.display()))?;
    let table = explode_games(&summaries, player);
    if let Some(parent) = out.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    write_history_table(&table, out).with_context(|| format!("writing {}", out.display()))?;
    info!(
        "{} games by {player} exploded into {} records at {}",
        summaries.len(),
        table.len(),
        out.display()
    );
    println!("{}", json!({ "games": summaries.len(), "records": table.len() }));
    Ok(())
}
