use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum GamePhase {
    Night,
    Day,
}

/// Everything a player can submit back to the server. The target-less
/// variants are the end-of-phase signals; the rest carry the name they act
/// on, so an action without its argument is unrepresentable.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(tag = "action", content = "target", rename_all = "snake_case")]
pub enum Action {
    Sleep,
    Wake,
    Vote(String),
    Kill(String),
    Check(String),
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Voted,
    ChangeState,
    GameOver,
    GameStarts,
}
