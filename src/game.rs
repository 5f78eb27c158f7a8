use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use rand::{seq::SliceRandom, thread_rng};

use game_phase::*;
use player::*;

pub mod game_phase;
pub mod player;

/// One game session's phase/vote/role engine. Pure in-memory state, no I/O:
/// the registry drains `notifications` and `await_actions` and pushes them
/// over the wire on its own schedule.
///
/// All access goes through the session's lock; the registry never hands out
/// a reference to the inner state.
pub struct GameState {
    players: HashMap<String, Player>,
    started: bool,
    day: u32,
    phase: GamePhase,
    day_votes: HashMap<String, String>,
    mafia_votes: HashMap<String, String>,
    police_votes: HashMap<String, String>,
    done: HashSet<String>,
    alive_num: usize,
    // Notifications drain oldest-first, pending action offers newest-first.
    // Both orderings are observable at the peers and tests rely on them.
    notifications: VecDeque<(NotificationKind, String)>,
    await_actions: Vec<String>,
    mafia_won: bool,
    start_time: Instant,
}

impl GameState {
    pub fn new() -> GameState {
        GameState {
            players: HashMap::new(),
            started: false,
            day: 0,
            phase: GamePhase::Night,
            day_votes: HashMap::new(),
            mafia_votes: HashMap::new(),
            police_votes: HashMap::new(),
            done: HashSet::new(),
            alive_num: 0,
            notifications: VecDeque::new(),
            await_actions: Vec::new(),
            mafia_won: false,
            start_time: Instant::now(),
        }
    }

    /// Seats a player. Fails once the game has started or the roster is at
    /// the largest supported headcount; the caller then tries another
    /// session or opens a new one.
    pub fn add_player(&mut self, name: &str) -> bool {
        if self.started || self.players.len() + 1 > MAX_PLAYERS {
            return false;
        }
        self.players.insert(name.to_string(), Player::new(name));
        true
    }

    /// Whether the roster size matches a supported headcount exactly.
    pub fn is_ready(&self) -> bool {
        role_distribution(self.players.len()).is_some()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn day(&self) -> u32 {
        self.day
    }

    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    pub fn alive_count(&self) -> usize {
        self.alive_num
    }

    /// Meaningful only once the game is over.
    pub fn mafia_won(&self) -> bool {
        self.mafia_won
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn player_names(&self) -> Vec<String> {
        self.players.keys().cloned().collect()
    }

    /// Deals roles and opens the first day. No-op if already started.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        self.start_time = Instant::now();

        let distribution = role_distribution(self.players.len())
            .expect("start called with an unsupported roster size");
        let mut roles = Vec::with_capacity(self.players.len());
        for (role, count) in distribution {
            roles.extend(std::iter::repeat(*role).take(*count));
        }
        roles.shuffle(&mut thread_rng());

        for (player, role) in self.players.values_mut().zip(roles) {
            player.role = Some(role);
            player.alive = true;
        }
        self.alive_num = self.players.len();

        self.notifications.push_back((
            NotificationKind::GameStarts,
            "A new mafia game is starting!".to_string(),
        ));
        self.setup_day();
    }

    /// The action menu currently legal for `name`. Empty for unknown, dead,
    /// or pre-start players.
    pub fn actions(&self, name: &str) -> Vec<Action> {
        let mut res = Vec::new();
        if !self.started {
            return res;
        }
        let player = match self.players.get(name) {
            Some(p) => p,
            None => return res,
        };
        if !player.alive {
            return res;
        }

        match self.phase {
            GamePhase::Day => {
                res.push(Action::Sleep);
                // No lynch vote on the first day.
                if self.day > 1 {
                    for (other, state) in &self.players {
                        if other != name && state.alive {
                            res.push(Action::Vote(other.clone()));
                        }
                    }
                }
            }
            GamePhase::Night => {
                res.push(Action::Wake);
                if player.role == Some(Role::Mafia) {
                    for (other, state) in &self.players {
                        if state.role != Some(Role::Mafia) && state.alive {
                            res.push(Action::Kill(other.clone()));
                        }
                    }
                }
                if player.role == Some(Role::Policeman) {
                    // Dead players are fair game for a check.
                    for (other, state) in &self.players {
                        if state.role != Some(Role::Policeman) {
                            res.push(Action::Check(other.clone()));
                        }
                    }
                }
            }
        }
        res
    }

    /// Applies an action the server has already validated against
    /// `actions(name)`. Done signals are idempotent; vote-type actions
    /// overwrite the player's previous vote this phase and put the player
    /// back on the pending-offer stack so they may still revise it.
    pub fn perform_action(&mut self, name: &str, action: &Action) {
        match action {
            Action::Sleep | Action::Wake => {
                self.done.insert(name.to_string());
                self.check_done();
            }
            Action::Vote(target) => {
                self.day_votes.insert(name.to_string(), target.clone());
                self.await_actions.push(name.to_string());
            }
            Action::Kill(target) => {
                self.mafia_votes.insert(name.to_string(), target.clone());
                self.await_actions.push(name.to_string());
            }
            Action::Check(target) => {
                self.police_votes.insert(name.to_string(), target.clone());
                self.await_actions.push(name.to_string());
            }
        }
    }

    pub fn get_role(&self, name: &str) -> Option<Role> {
        if !self.started {
            return None;
        }
        self.players.get(name)?.role
    }

    /// Drops a player from the roster. In a started game this counts as a
    /// death for the phase-advance check, so a disconnect can close out a
    /// phase on its own.
    pub fn remove_player(&mut self, name: &str) {
        if let Some(player) = self.players.remove(name) {
            if self.started && player.alive {
                // Forget any done signal too, or the phase could wait for a
                // count the survivors can no longer reach.
                self.done.remove(name);
                self.alive_num -= 1;
                self.check_done();
            }
        }
    }

    /// Oldest queued notification, if any.
    pub fn take_notification(&mut self) -> Option<(NotificationKind, String)> {
        self.notifications.pop_front()
    }

    /// Most recently queued player owed an action offer, if any.
    pub fn take_awaiting_action(&mut self) -> Option<String> {
        self.await_actions.pop()
    }

    /// Chat fan-out scope for a message from `name`: who hears it and the
    /// tag it gets delivered with. An empty recipient list means the tag is
    /// a notice for the sender alone.
    pub fn process_message(&self, name: &str) -> (Vec<String>, String) {
        if !self.started {
            return (self.player_names(), "(pre-game chat)".to_string());
        }
        let player = match self.players.get(name) {
            Some(p) => p,
            None => return (Vec::new(), "You are not in this game".to_string()),
        };
        if !player.alive {
            return (Vec::new(), "Dead people cannot send messages".to_string());
        }
        match self.phase {
            GamePhase::Night => {
                if player.role == Some(Role::Mafia) {
                    let mafia = self
                        .players
                        .values()
                        .filter(|p| p.role == Some(Role::Mafia))
                        .map(|p| p.name.clone())
                        .collect();
                    (mafia, "(in mafia chat)".to_string())
                } else {
                    (Vec::new(), "Only mafia can message at night".to_string())
                }
            }
            GamePhase::Day => (self.player_names(), "(main chat)".to_string()),
        }
    }

    fn check_done(&mut self) {
        if self.done.len() == self.alive_num {
            match self.phase {
                GamePhase::Day => self.setup_night(),
                GamePhase::Night => self.setup_day(),
            }
        }
    }

    /// Opens a day: resolves the night's votes (except before the first
    /// day), checks for a winner, then resets the phase state and asks
    /// every living player for their next move.
    fn setup_day(&mut self) {
        if self.day != 0 {
            match Self::evaluate_vote(&self.mafia_votes) {
                Some(killed) => {
                    self.notifications.push_back((
                        NotificationKind::Voted,
                        format!("Player {} was killed by the mafia", killed),
                    ));
                    self.eliminate(&killed);
                }
                None => {
                    self.notifications.push_back((
                        NotificationKind::Voted,
                        "No one was killed by the mafia this night".to_string(),
                    ));
                }
            }

            let checked_role = Self::evaluate_vote(&self.police_votes)
                .and_then(|checked| self.players.get(&checked))
                .and_then(|p| p.role);
            match checked_role {
                Some(role) => {
                    self.notifications.push_back((
                        NotificationKind::Voted,
                        format!("The player checked by the police is a {}", role),
                    ));
                }
                None => {
                    self.notifications.push_back((
                        NotificationKind::Voted,
                        "The police failed to coordinate this night".to_string(),
                    ));
                }
            }
        }

        if self.check_over() {
            return;
        }

        self.phase = GamePhase::Day;
        self.day += 1;
        self.done.clear();
        self.day_votes.clear();
        self.notifications.push_back((
            NotificationKind::ChangeState,
            "Good morning! A new day is starting.".to_string(),
        ));
        self.enqueue_living();
    }

    /// Opens a night: resolves the lynch vote, checks for a winner, then
    /// resets the phase state and asks every living player for their move.
    fn setup_night(&mut self) {
        match Self::evaluate_vote(&self.day_votes) {
            Some(voted_out) => {
                self.notifications.push_back((
                    NotificationKind::Voted,
                    format!("Player {} was voted out", voted_out),
                ));
                self.eliminate(&voted_out);
            }
            None => {
                self.notifications.push_back((
                    NotificationKind::Voted,
                    "No one was voted out".to_string(),
                ));
            }
        }

        if self.check_over() {
            return;
        }

        self.phase = GamePhase::Night;
        self.done.clear();
        self.mafia_votes.clear();
        self.police_votes.clear();
        self.notifications.push_back((
            NotificationKind::ChangeState,
            "The day is over, night is starting.".to_string(),
        ));
        self.enqueue_living();
    }

    fn eliminate(&mut self, name: &str) {
        // The target may have disconnected since the vote was cast.
        if let Some(player) = self.players.get_mut(name) {
            if player.alive {
                player.alive = false;
                self.alive_num -= 1;
            }
        }
    }

    fn enqueue_living(&mut self) {
        for (name, player) in &self.players {
            if player.alive {
                self.await_actions.push(name.clone());
            }
        }
    }

    /// Plurality with ties broken to nobody: a count that merely reaches
    /// the current maximum clears the winner, only a strictly higher count
    /// installs a new one. No votes means no winner.
    fn evaluate_vote(votes: &HashMap<String, String>) -> Option<String> {
        let mut tally: HashMap<&str, usize> = HashMap::new();
        let mut max_votes = 0;
        let mut who: Option<&str> = None;
        for target in votes.values() {
            let count = tally.entry(target.as_str()).or_insert(0);
            *count += 1;
            if *count == max_votes {
                who = None;
            }
            if *count > max_votes {
                who = Some(target.as_str());
                max_votes = *count;
            }
        }
        who.map(|name| name.to_string())
    }

    /// Terminal check, run only at phase boundaries: no mafia alive is a
    /// civilian win, mafia at or above half the table is a mafia win.
    fn check_over(&mut self) -> bool {
        let mafia_alive = self
            .players
            .values()
            .filter(|p| p.alive && p.role == Some(Role::Mafia))
            .count();

        if mafia_alive == 0 {
            self.notifications
                .push_back((NotificationKind::GameOver, "Civilians win!".to_string()));
            self.mafia_won = false;
            return true;
        }
        if mafia_alive * 2 >= self.alive_num {
            self.notifications
                .push_back((NotificationKind::GameOver, "Mafia wins!".to_string()));
            self.mafia_won = true;
            return true;
        }
        false
    }
}

impl Default for GameState {
    fn default() -> Self {
        GameState::new()
    }
}
