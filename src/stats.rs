use std::time::Duration;

use serde_json::json;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Fire-and-forget reporter for the external profile/statistics service.
/// Every call returns immediately; the HTTP round happens on its own task
/// and a failure is logged and dropped, never surfaced to game flow.
#[derive(Clone)]
pub struct StatsReporter {
    base_url: Option<String>,
    client: reqwest::Client,
}

impl StatsReporter {
    pub fn new(base_url: Option<String>) -> StatsReporter {
        StatsReporter {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    /// Creates a fresh profile for a newly registered name.
    pub fn report_new_profile(&self, name: &str) {
        let Some(base_url) = &self.base_url else {
            return;
        };
        let request = self
            .client
            .post(format!("{}/users/{}", base_url, name))
            .json(&json!({}))
            .timeout(REQUEST_TIMEOUT);
        let name = name.to_string();
        tokio::spawn(async move {
            match request.send().await {
                Ok(response) if !response.status().is_success() => {
                    log::warn!("profile creation for {} answered {}", name, response.status());
                }
                Err(err) => log::warn!("profile creation for {} failed: {}", name, err),
                Ok(_) => {}
            }
        });
    }

    /// Adds one finished game to a player's running totals.
    pub fn report_game_result(&self, name: &str, won: bool, ingame_secs: f64) {
        let Some(base_url) = &self.base_url else {
            return;
        };
        let request = self
            .client
            .put(format!("{}/users/add/{}", base_url, name))
            .json(&json!({
                "played": 1,
                "wins": if won { 1 } else { 0 },
                "ingame": ingame_secs,
            }))
            .timeout(REQUEST_TIMEOUT);
        let name = name.to_string();
        tokio::spawn(async move {
            match request.send().await {
                Ok(response) if !response.status().is_success() => {
                    log::warn!("stats update for {} answered {}", name, response.status());
                }
                Err(err) => log::warn!("stats update for {} failed: {}", name, err),
                Ok(_) => {}
            }
        });
    }
}
