use dotenv::dotenv;
use std::env;
use std::time::Duration;

const INSTRUMENTS: &str = "INSTRUMENTS";
const WORKER_IDLE_MS: &str = "WORKER_IDLE_MS";

const DEFAULT_INSTRUMENTS: &str = "AAPL,MSFT";
const DEFAULT_WORKER_IDLE_MS: u64 = 50;

/// Runtime settings for the demo binary, read from the environment.
#[derive(Clone, Debug)]
pub struct Config {
    /// Instruments the demo submits orders for, comma separated in the
    /// environment.
    pub instruments: Vec<String>,
    /// Idle wait of the engine worker between live-flag checks.
    pub worker_idle: Duration,
}

impl Config {
    pub fn from_env() -> Config {
        // Load .env file
        dotenv().ok();

        let instruments = env::var(INSTRUMENTS)
            .unwrap_or_else(|_| DEFAULT_INSTRUMENTS.to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let worker_idle = env::var(WORKER_IDLE_MS)
            .ok()
            .and_then(|value| value.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_millis(DEFAULT_WORKER_IDLE_MS));

        Config {
            instruments,
            worker_idle,
        }
    }
}
