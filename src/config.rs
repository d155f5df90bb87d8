//! Runtime configuration for the prediction pipeline.
//!
//! Every section has a `Default` that works against a local Stockfish and a
//! local Ollama server. `PersonaConfig::from_env` layers environment
//! variables on top of the defaults; the binary loads `.env` before calling
//! it and applies command-line flags last.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use log::warn;

/// Search limits sent with every `go` command.
///
/// When both are set the engine stops at whichever it reaches first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchLimits {
    pub depth: Option<u8>,
    pub movetime_ms: Option<u64>,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            depth: Some(15),
            movetime_ms: None,
        }
    }
}

impl SearchLimits {
    /// UCI `go` command for these limits.
    pub fn go_command(&self) -> String {
        let mut command = String::from("go");
        if let Some(depth) = self.depth {
            command.push_str(&format!(" depth {depth}"));
        }
        if let Some(movetime) = self.movetime_ms {
            command.push_str(&format!(" movetime {movetime}"));
        }
        if self.depth.is_none() && self.movetime_ms.is_none() {
            command.push_str(" depth 1");
        }
        command
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Executable of a UCI engine.
    pub path: String,
    /// Extra command-line arguments for the engine executable.
    pub args: Vec<String>,
    pub search: SearchLimits,
    /// Longest wait for any single engine response (`uciok`, `readyok`,
    /// `bestmove`).
    pub response_timeout: Duration,
    /// Number of engine processes in an `EnginePool`.
    pub pool_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path: "stockfish".to_owned(),
            args: Vec::new(),
            search: SearchLimits::default(),
            response_timeout: Duration::from_secs(30),
            pool_size: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    pub enabled: bool,
    pub base_url: String,
    pub model_name: String,
    pub timeout: Duration,
    /// Upper bound on historical games quoted in the prompt.
    pub max_context_games: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://localhost:11434".to_owned(),
            model_name: "gemma:2b".to_owned(),
            timeout: Duration::from_secs(60),
            max_context_games: 25,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CalibrationConfig {
    /// Keep per-player calibration progress between requests.
    pub memoize: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonaConfig {
    /// Root holding `processed/sequence_target_map_<player>.csv` files.
    pub data_dir: PathBuf,
    pub engine: EngineConfig,
    pub model: ModelConfig,
    pub calibration: CalibrationConfig,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            engine: EngineConfig::default(),
            model: ModelConfig::default(),
            calibration: CalibrationConfig::default(),
        }
    }
}

impl PersonaConfig {
    /// Defaults overridden by any of the recognised environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as `from_env` with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup("PERSONA_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup("STOCKFISH_PATH") {
            config.engine.path = path;
        }
        if let Some(depth) = parse_var::<u8, _>(&lookup, "PERSONA_ENGINE_DEPTH") {
            config.engine.search.depth = if depth == 0 { None } else { Some(depth) };
        }
        if let Some(movetime) = parse_var::<u64, _>(&lookup, "PERSONA_ENGINE_MOVETIME_MS") {
            config.engine.search.movetime_ms = if movetime == 0 { None } else { Some(movetime) };
        }
        if let Some(timeout) = parse_var::<u64, _>(&lookup, "PERSONA_ENGINE_TIMEOUT_MS") {
            config.engine.response_timeout = Duration::from_millis(timeout.max(1));
        }
        if let Some(size) = parse_var::<usize, _>(&lookup, "PERSONA_ENGINE_POOL_SIZE") {
            config.engine.pool_size = size.max(1);
        }
        if let Some(url) = lookup("OLLAMA_URL") {
            config.model.base_url = url.trim_end_matches('/').to_owned();
        }
        if let Some(name) = lookup("OLLAMA_MODEL") {
            config.model.model_name = name;
        }
        if let Some(timeout) = parse_var::<u64, _>(&lookup, "PERSONA_MODEL_TIMEOUT_MS") {
            config.model.timeout = Duration::from_millis(timeout.max(1));
        }
        if let Some(enabled) = lookup("PERSONA_MODEL_ENABLED") {
            config.model.enabled = parse_flag(&enabled);
        }
        if let Some(memoize) = lookup("PERSONA_MEMOIZE_SKILL") {
            config.calibration.memoize = parse_flag(&memoize);
        }

        config
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("ignoring {name}={raw:?}: not a valid number");
            None
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}
