//! Crate root module declarations for the chess persona predictor.
//!
//! The library predicts a specific player's next move with a three-stage
//! cascade (history cache, generative model, calibrated UCI engine). The
//! modules below expose each stage plus the rules adapter, configuration and
//! error types so the binary, integration tests and benches can import
//! stable paths.

pub mod errors;
pub mod config;

pub mod rules {
    pub mod board_adapter;
}

pub mod history {
    pub mod cache_lookup;
    pub mod move_record;
    pub mod table_io;
}

pub mod model {
    pub mod model_trait;
    pub mod ollama_client;
    pub mod prompt;
}

pub mod engine {
    pub mod calibration;
    pub mod engine_pool;
    pub mod engine_trait;
    pub mod skill_memo;
    pub mod uci_process;
}

pub mod cascade {
    pub mod prediction;
    pub mod predictor;
}
