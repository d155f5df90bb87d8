//! UCI engine running as a child process.
//!
//! Commands go to the engine's stdin; a reader thread forwards every stdout
//! line over a channel so each wait can be bounded by the configured
//! response timeout. A timeout surfaces as `EngineError::Timeout` and the
//! caller decides what a dead engine means (for the cascade: terminal).

use std::io::{BufRead, BufReader, BufWriter, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::config::{EngineConfig, SearchLimits};
use crate::engine::calibration::SkillLevel;
use crate::engine::engine_trait::ChessEngine;
use crate::errors::EngineError;

const SKILL_OPTION_NAME: &str = "Skill Level";
/// Stockfish's `Skill Level` range, used until the handshake says otherwise.
const DEFAULT_SKILL_RANGE: (i32, i32) = (0, 20);
/// Upper bound on a single wait when the configured timeout is unrepresentable.
const MAX_RESPONSE_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

/// A running UCI engine with a completed handshake. Quits the engine on drop.
pub struct UciEngineProcess {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    lines: Receiver<String>,
    search: SearchLimits,
    response_timeout: Duration,
    engine_name: Option<String>,
    skill_range: (i32, i32),
}

impl UciEngineProcess {
    /// Start the engine at `config.path` and complete the UCI handshake.
    pub fn spawn(config: &EngineConfig) -> Result<Self, EngineError> {
        let args: Vec<&str> = config.args.iter().map(String::as_str).collect();
        Self::spawn_command(&config.path, &args, config.search, config.response_timeout)
    }

    /// Start `program` with `args` and complete the UCI handshake.
    pub fn spawn_command(
        program: &str,
        args: &[&str],
        search: SearchLimits,
        response_timeout: Duration,
    ) -> Result<Self, EngineError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| EngineError::Spawn {
                path: program.to_owned(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Protocol("engine stdin unavailable".to_owned()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Protocol("engine stdout unavailable".to_owned()))?;

        let (line_tx, line_rx) = channel::<String>();
        thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else { break };
                if line_tx.send(line).is_err() {
                    break;
                }
            }
        });

        let mut engine = Self {
            child,
            stdin: BufWriter::new(stdin),
            lines: line_rx,
            search,
            response_timeout,
            engine_name: None,
            skill_range: DEFAULT_SKILL_RANGE,
        };
        engine.handshake()?;
        info!(
            "engine '{}' ready (skill range {}..={})",
            engine.engine_name.as_deref().unwrap_or(program),
            engine.skill_range.0,
            engine.skill_range.1
        );
        Ok(engine)
    }

    /// Name from the engine's `id name` line, if it sent one.
    pub fn engine_name(&self) -> Option<&str> {
        self.engine_name.as_deref()
    }

    /// `(min, max)` of the engine's `Skill Level` option.
    pub fn skill_range(&self) -> (i32, i32) {
        self.skill_range
    }

    /// Engine option value for `skill`, rounded and clamped to the
    /// advertised range.
    pub fn skill_option_value(&self, skill: SkillLevel) -> i32 {
        let (min, max) = self.skill_range;
        (skill.value().round() as i32).clamp(min, max)
    }

    fn handshake(&mut self) -> Result<(), EngineError> {
        self.send("uci")?;
        let mut name = None;
        let mut range = None;
        self.wait_for("uci", |line| {
            if let Some(id) = line.strip_prefix("id name ") {
                name = Some(id.trim().to_owned());
            } else if let Some(spin) = parse_spin_option(line, SKILL_OPTION_NAME) {
                range = Some(spin);
            }
            line == "uciok"
        })?;
        self.engine_name = name;
        if let Some(range) = range {
            self.skill_range = range;
        }
        self.sync()
    }

    fn sync(&mut self) -> Result<(), EngineError> {
        self.send("isready")?;
        self.wait_for("isready", |line| line == "readyok")?;
        Ok(())
    }

    fn send(&mut self, command: &str) -> Result<(), EngineError> {
        debug!("engine <- {command}");
        writeln!(self.stdin, "{command}")?;
        self.stdin.flush()?;
        Ok(())
    }

    /// Consume lines until `done` accepts one; return that line.
    fn wait_for<F>(&mut self, command: &str, mut done: F) -> Result<String, EngineError>
    where
        F: FnMut(&str) -> bool,
    {
        let deadline = response_deadline(Instant::now(), self.response_timeout);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.lines.recv_timeout(remaining) {
                Ok(line) => {
                    let line = line.trim();
                    debug!("engine -> {line}");
                    if done(line) {
                        return Ok(line.to_owned());
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(EngineError::Timeout {
                        command: command.to_owned(),
                        timeout_ms: u64::try_from(self.response_timeout.as_millis())
                            .unwrap_or(u64::MAX),
                    });
                }
                Err(RecvTimeoutError::Disconnected) => return Err(EngineError::Exited),
            }
        }
    }
}

/// `now + timeout`, or `now + MAX_RESPONSE_WAIT` when that instant does not
/// exist.
fn response_deadline(now: Instant, timeout: Duration) -> Instant {
    now.checked_add(timeout)
        .or_else(|| now.checked_add(MAX_RESPONSE_WAIT))
        .unwrap_or(now)
}

impl ChessEngine for UciEngineProcess {
    fn set_position(&mut self, uci_moves: &[String]) -> Result<(), EngineError> {
        if uci_moves.is_empty() {
            self.send("position startpos")
        } else {
            self.send(&format!("position startpos moves {}", uci_moves.join(" ")))
        }
    }

    fn set_skill_level(&mut self, skill: SkillLevel) -> Result<(), EngineError> {
        let value = self.skill_option_value(skill);
        self.send(&format!("setoption name {SKILL_OPTION_NAME} value {value}"))?;
        self.sync()
    }

    fn best_move(&mut self) -> Result<Option<String>, EngineError> {
        let go = self.search.go_command();
        self.send(&go)?;
        let line = self.wait_for(&go, |line| line.starts_with("bestmove"))?;
        parse_bestmove_line(&line)
    }
}

impl Drop for UciEngineProcess {
    fn drop(&mut self) {
        let _ = self.send("quit");
        for _ in 0..20 {
            if let Ok(Some(_)) = self.child.try_wait() {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Engine process started on first use.
///
/// Lets a caller hold an engine slot without paying for (or failing on) a
/// process start when every request is answered before the fallback stage.
/// A failed start is retried on the next call, and a process that stops
/// answering (I/O failure, exit, timeout) is dropped so the next call
/// starts a fresh one.
pub struct LazyUciEngine {
    config: EngineConfig,
    process: Option<UciEngineProcess>,
}

impl LazyUciEngine {
    /// Engine slot for `config`; nothing is started yet.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            process: None,
        }
    }

    /// Whether a live process is currently held.
    pub fn is_started(&self) -> bool {
        self.process.is_some()
    }

    fn process(&mut self) -> Result<&mut UciEngineProcess, EngineError> {
        if self.process.is_none() {
            self.process = Some(UciEngineProcess::spawn(&self.config)?);
        }
        self.process
            .as_mut()
            .ok_or_else(|| EngineError::Protocol("engine process missing after start".to_owned()))
    }

    /// Run `command` on the process, discarding it when the failure means it
    /// can no longer be trusted.
    fn with_process<T>(
        &mut self,
        command: impl FnOnce(&mut UciEngineProcess) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let result = command(self.process()?);
        if let Err(err) = &result {
            if matches!(
                err,
                EngineError::Io(_) | EngineError::Exited | EngineError::Timeout { .. }
            ) {
                warn!("dropping engine process after failure: {err}");
                self.process = None;
            }
        }
        result
    }
}

impl ChessEngine for LazyUciEngine {
    fn set_position(&mut self, uci_moves: &[String]) -> Result<(), EngineError> {
        self.with_process(|process| process.set_position(uci_moves))
    }

    fn set_skill_level(&mut self, skill: SkillLevel) -> Result<(), EngineError> {
        self.with_process(|process| process.set_skill_level(skill))
    }

    fn best_move(&mut self) -> Result<Option<String>, EngineError> {
        self.with_process(UciEngineProcess::best_move)
    }
}

/// Move from a `bestmove <uci> [ponder <uci>]` line; `None` for `(none)` or
/// the null move.
pub fn parse_bestmove_line(line: &str) -> Result<Option<String>, EngineError> {
    let mut tokens = line.split_whitespace();
    if tokens.next() != Some("bestmove") {
        return Err(EngineError::Protocol(format!("expected bestmove, got '{line}'")));
    }
    match tokens.next() {
        None => Err(EngineError::Protocol(format!("bestmove without a move: '{line}'"))),
        Some("(none)") | Some("0000") => Ok(None),
        Some(mv) => Ok(Some(mv.to_owned())),
    }
}

/// `(min, max)` from `option name <name> type spin ... min <a> max <b>`.
pub fn parse_spin_option(line: &str, name: &str) -> Option<(i32, i32)> {
    let rest = line.strip_prefix("option name ")?;
    let (option_name, kind) = rest.split_once(" type ")?;
    if !option_name.trim().eq_ignore_ascii_case(name) {
        return None;
    }

    let tokens: Vec<&str> = kind.split_whitespace().collect();
    if tokens.first() != Some(&"spin") {
        return None;
    }
    let value_after = |key: &str| {
        tokens
            .iter()
            .position(|t| *t == key)
            .and_then(|i| tokens.get(i + 1))
            .and_then(|v| v.parse::<i32>().ok())
    };
    let (min, max) = (value_after("min")?, value_after("max")?);
    (min <= max).then_some((min, max))
}
