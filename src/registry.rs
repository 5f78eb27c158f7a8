use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use rand::{seq::IteratorRandom, thread_rng};
use tokio::sync::Mutex;

use crate::config::Config;
use crate::game::game_phase::Action;
use crate::game::GameState;
use crate::peer::{PeerClient, PeerError};
use crate::stats::StatsReporter;

mod maintenance;

#[derive(Eq, Hash, PartialEq, Copy, Clone, Debug, derive_more::Display)]
pub struct GameId(pub i32);

/// One registered peer: its RPC endpoint, its display name, and the session
/// it currently sits in (if any).
pub struct ConnectedUser {
    pub addr: String,
    pub name: String,
    pub game: Option<GameId>,
    pub client: PeerClient,
}

pub enum RegisterReply {
    Ok { name: String, users: Vec<String> },
    AlreadyRegistered,
}

/// Display names handed to peers that register without one (or whose pick
/// is taken). Names released by departing peers flow back into this pool.
const DEFAULT_NAME_POOL: [&str; 7] = [
    "IronGolem1543",
    "EpicWinner",
    "DoctorWho666",
    "rpc_master",
    "CreativeName1234",
    "LordVoldemort",
    "Placeholder133",
];

/// Directory of connected peers and live games. Guarded as a whole by the
/// registry lock; outbound fan-out happens under it, bounded by the RPC
/// timeout (see DESIGN.md for the latency trade-off).
struct Directory {
    connected: HashMap<String, ConnectedUser>,
    names: HashMap<String, String>,
    unused_names: HashSet<String>,
    games: HashMap<GameId, Arc<StdMutex<GameState>>>,
    next_game_id: i32,
    guest_counter: u32,
}

impl Directory {
    fn claim_name(&mut self, requested: Option<&str>) -> String {
        if let Some(requested) = requested {
            if !self.names.contains_key(requested) {
                self.unused_names.remove(requested);
                return requested.to_string();
            }
        }
        if let Some(name) = self.unused_names.iter().choose(&mut thread_rng()).cloned() {
            self.unused_names.remove(&name);
            return name;
        }
        // The pool ran dry; fall back to a numbered guest name.
        loop {
            self.guest_counter += 1;
            let name = format!("Guest{}", self.guest_counter);
            if !self.names.contains_key(&name) {
                return name;
            }
        }
    }
}

/// The matchmaking server: owns the peer directory, the live games and the
/// maintenance tick that keeps both healthy. One instance per process under
/// normal operation, but nothing here is global, so tests run as many as
/// they like.
///
/// Lock order is directory before game state, and the removal queue has its
/// own strictly smaller lock so that flagging an eviction never needs (or
/// waits on) the directory.
pub struct SessionRegistry {
    directory: Mutex<Directory>,
    remove_queue: StdMutex<Vec<String>>,
    last_start_attempt: StdMutex<Instant>,
    stats: StatsReporter,
    config: Config,
}

impl SessionRegistry {
    pub fn new(config: Config) -> SessionRegistry {
        SessionRegistry {
            directory: Mutex::new(Directory {
                connected: HashMap::new(),
                names: HashMap::new(),
                unused_names: DEFAULT_NAME_POOL.iter().map(|s| s.to_string()).collect(),
                games: HashMap::new(),
                next_game_id: 1,
                guest_counter: 0,
            }),
            remove_queue: StdMutex::new(Vec::new()),
            last_start_attempt: StdMutex::new(Instant::now()),
            stats: StatsReporter::new(config.stats_url.clone()),
            config,
        }
    }

    /// Registers a peer under its RPC endpoint address. The reply lists
    /// everyone already known, excluding the caller itself.
    pub async fn register(&self, addr: &str, requested_name: Option<&str>) -> RegisterReply {
        let mut dir = self.directory.lock().await;
        if dir.connected.contains_key(addr) {
            return RegisterReply::AlreadyRegistered;
        }

        let name = dir.claim_name(requested_name);
        let users: Vec<String> = dir.names.keys().cloned().collect();

        dir.names.insert(name.clone(), addr.to_string());
        dir.connected.insert(
            addr.to_string(),
            ConnectedUser {
                addr: addr.to_string(),
                name: name.clone(),
                game: None,
                client: PeerClient::new(addr, self.config.rpc_timeout),
            },
        );
        drop(dir);

        log::info!("{} at {} has joined the server", name, addr);
        self.stats.report_new_profile(&name);

        RegisterReply::Ok { name, users }
    }

    /// Flags a peer for removal. Actual teardown happens on the maintenance
    /// tick, never inside the calling handler.
    pub fn leave(&self, addr: &str) {
        self.remove_queue.lock().unwrap().push(addr.to_string());
    }

    /// Validates and applies a peer's chosen action. The menu the peer saw
    /// may be stale by now (phase advanced, someone disconnected), so the
    /// action is checked against the current legal set before it lands.
    pub async fn take_action(&self, addr: &str, action: &Action) -> bool {
        let dir = self.directory.lock().await;
        let (name, game) = match dir.connected.get(addr) {
            Some(user) => match user.game.and_then(|id| dir.games.get(&id)) {
                Some(game) => (user.name.clone(), game.clone()),
                None => return false,
            },
            None => return false,
        };
        drop(dir);

        let mut game = game.lock().unwrap();
        if !game.actions(&name).contains(action) {
            return false;
        }
        game.perform_action(&name, action);
        true
    }

    /// Relays a chat line. Recipients are resolved by the sender's game;
    /// when nobody is supposed to hear it, the scope tag comes back to the
    /// sender as a notice instead.
    pub async fn relay_chat(&self, addr: &str, text: &str) -> Result<Option<String>, PeerError> {
        let dir = self.directory.lock().await;
        let (sender, game) = match dir.connected.get(addr) {
            Some(user) => (user.name.clone(), user.game.and_then(|id| dir.games.get(&id))),
            None => return Ok(Some("You are not registered".to_string())),
        };
        let game = match game {
            Some(game) => game.clone(),
            None => return Ok(Some("You are not in a game yet".to_string())),
        };

        let (recipients, tag) = game.lock().unwrap().process_message(&sender);
        if recipients.is_empty() {
            return Ok(Some(tag));
        }

        let mut failed = Vec::new();
        for recipient in &recipients {
            let user = match dir.names.get(recipient).and_then(|a| dir.connected.get(a)) {
                Some(user) => user,
                None => continue,
            };
            if !user.client.chat(&sender, &tag, text).await? {
                failed.push(user.addr.clone());
            }
        }
        drop(dir);

        if !failed.is_empty() {
            self.remove_queue.lock().unwrap().extend(failed);
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_registry() -> SessionRegistry {
        SessionRegistry::new(Config::for_tests())
    }

    #[tokio::test]
    async fn register_prefers_the_requested_name() {
        let registry = test_registry();
        match registry.register("10.0.0.1:1", Some("Alice")).await {
            RegisterReply::Ok { name, users } => {
                assert_eq!(name, "Alice");
                assert!(users.is_empty());
            }
            RegisterReply::AlreadyRegistered => panic!("fresh address was rejected"),
        }
    }

    #[tokio::test]
    async fn taken_names_fall_back_to_the_pool() {
        let registry = test_registry();
        registry.register("10.0.0.1:1", Some("Alice")).await;
        match registry.register("10.0.0.2:2", Some("Alice")).await {
            RegisterReply::Ok { name, users } => {
                assert_ne!(name, "Alice");
                assert!(DEFAULT_NAME_POOL.contains(&name.as_str()));
                // The caller itself is not in the returned roster.
                assert_eq!(users, vec!["Alice".to_string()]);
            }
            RegisterReply::AlreadyRegistered => panic!("fresh address was rejected"),
        }
    }

    #[tokio::test]
    async fn double_registration_is_rejected() {
        let registry = test_registry();
        registry.register("10.0.0.1:1", None).await;
        assert!(matches!(
            registry.register("10.0.0.1:1", None).await,
            RegisterReply::AlreadyRegistered
        ));
    }

    #[tokio::test]
    async fn pool_exhaustion_yields_guest_names() {
        let registry = test_registry();
        for i in 0..DEFAULT_NAME_POOL.len() {
            registry.register(&format!("10.0.0.1:{}", i), None).await;
        }
        match registry.register("10.0.0.9:9", None).await {
            RegisterReply::Ok { name, .. } => assert!(name.starts_with("Guest")),
            RegisterReply::AlreadyRegistered => panic!("fresh address was rejected"),
        }
    }

    #[tokio::test]
    async fn actions_from_unknown_or_idle_peers_are_rejected() {
        let registry = test_registry();
        assert!(!registry.take_action("10.9.9.9:9", &Action::Sleep).await);

        registry.register("10.0.0.1:1", Some("Alice")).await;
        // Registered but not yet matched into a game.
        assert!(!registry.take_action("10.0.0.1:1", &Action::Sleep).await);
    }
}
