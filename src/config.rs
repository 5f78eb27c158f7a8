use std::env;
use std::time::Duration;

/// Runtime settings, read once from the environment at startup (a `.env`
/// file is honored via dotenv in `main`).
#[derive(Clone, Debug)]
pub struct Config {
    /// Address the inbound RPC surface listens on.
    pub listen_addr: String,
    /// Base URL of the external stats service; unset disables reporting.
    pub stats_url: Option<String>,
    /// Deadline for every outbound peer call.
    pub rpc_timeout: Duration,
    /// Period of the maintenance tick.
    pub tick_interval: Duration,
    /// Minimum spacing between game-start sweeps.
    pub start_interval: Duration,
}

impl Config {
    pub fn from_env() -> Config {
        let port = env::var("SERVER_PORT").unwrap_or_else(|_| "51075".to_string());
        Config {
            listen_addr: env::var("SERVER_ADDR").unwrap_or_else(|_| format!("0.0.0.0:{}", port)),
            stats_url: env::var("STATS_URL").ok(),
            rpc_timeout: Duration::from_millis(env_millis("RPC_TIMEOUT_MS", 200)),
            tick_interval: Duration::from_millis(env_millis("TICK_INTERVAL_MS", 1000)),
            start_interval: Duration::from_millis(env_millis("START_INTERVAL_MS", 10_000)),
        }
    }

    #[cfg(test)]
    pub fn for_tests() -> Config {
        Config {
            listen_addr: "127.0.0.1:0".to_string(),
            stats_url: None,
            rpc_timeout: Duration::from_millis(200),
            tick_interval: Duration::from_millis(50),
            start_interval: Duration::ZERO,
        }
    }
}

fn env_millis(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
