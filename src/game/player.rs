use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub enum Role {
    Civilian,
    Mafia,
    Policeman,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Role::Civilian => write!(f, "Civilian"),
            Role::Mafia => write!(f, "Mafia"),
            Role::Policeman => write!(f, "Policeman"),
        }
    }
}

pub struct Player {
    pub name: String,
    pub role: Option<Role>,
    pub alive: bool,
}

impl Player {
    pub fn new(name: &str) -> Player {
        Player {
            name: name.to_string(),
            role: None,
            alive: false,
        }
    }
}

/// Largest roster size any distribution supports. Rosters may grow up to
/// this size while waiting for a start.
pub const MAX_PLAYERS: usize = 6;

/// Role multiset for a given headcount. Sizes without an entry can never
/// start a game.
pub fn role_distribution(count: usize) -> Option<&'static [(Role, usize)]> {
    match count {
        4 => Some(&[(Role::Civilian, 2), (Role::Mafia, 1), (Role::Policeman, 1)]),
        5 => Some(&[(Role::Civilian, 3), (Role::Mafia, 1), (Role::Policeman, 1)]),
        6 => Some(&[(Role::Civilian, 3), (Role::Mafia, 2), (Role::Policeman, 1)]),
        _ => None,
    }
}
