//! `MovePredictor` backed by an Ollama server's `/api/generate` endpoint.
//!
//! The request asks for JSON output and the reply's `response` field is
//! expected to hold `{"move": "<san>"}`. Small models often wrap that in a
//! Markdown code fence or surround it with prose, so the parser looks for the
//! first JSON object in the text before giving up.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::ModelConfig;
use crate::errors::ModelError;
use crate::model::model_trait::{ModelRequest, MovePredictor};
use crate::model::prompt::build_prompt;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    format: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
struct MovePayload {
    #[serde(rename = "move")]
    mv: String,
}

/// Blocking client for an Ollama `/api/generate` endpoint.
pub struct OllamaClient {
    http: reqwest::blocking::Client,
    endpoint: String,
    model_name: String,
}

impl OllamaClient {
    /// Build the HTTP client with the configured timeout.
    pub fn new(config: &ModelConfig) -> Result<Self, ModelError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ModelError::Unavailable(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: format!("{}/api/generate", config.base_url.trim_end_matches('/')),
            model_name: config.model_name.clone(),
        })
    }

    /// Full URL requests are posted to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn generate(&self, prompt: &str) -> Result<String, ModelError> {
        let body = GenerateRequest {
            model: &self.model_name,
            prompt,
            stream: false,
            format: "json",
        };
        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .map_err(|e| ModelError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(ModelError::Unavailable(format!(
                "{} returned {status}: {}",
                self.endpoint,
                text.trim()
            )));
        }

        let reply: GenerateResponse = response
            .json()
            .map_err(|e| ModelError::Malformed(e.to_string()))?;
        Ok(reply.response)
    }
}

impl MovePredictor for OllamaClient {
    fn predict_move(&self, request: &ModelRequest) -> Result<String, ModelError> {
        let prompt = build_prompt(request);
        debug!(
            "asking {} for {} ({} legal moves, {} context games)",
            self.model_name,
            request.player_id,
            request.legal_moves.len(),
            request.context_games.len()
        );
        let text = self.generate(&prompt)?;
        parse_move_response(&text)
    }
}

/// Extract the move from a model reply of the form `{"move": "<san>"}`.
pub fn parse_move_response(text: &str) -> Result<String, ModelError> {
    let body = strip_code_fence(text.trim());
    let payload: MovePayload = match serde_json::from_str(body) {
        Ok(payload) => payload,
        Err(_) => {
            let object = first_json_object(body)
                .ok_or_else(|| ModelError::Malformed(truncate(text)))?;
            serde_json::from_str(object).map_err(|_| ModelError::Malformed(truncate(text)))?
        }
    };

    let mv = payload.mv.trim();
    if mv.is_empty() || mv.contains(char::is_whitespace) {
        return Err(ModelError::Malformed(truncate(text)));
    }
    Ok(mv.to_owned())
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text[start..].find('}')? + start;
    Some(&text[start..=end])
}

fn truncate(text: &str) -> String {
    const LIMIT: usize = 120;
    match text.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_owned(),
    }
}
