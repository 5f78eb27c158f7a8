//! Wire messages for both RPC surfaces. Everything travels as one line of
//! JSON per request and one per response, tagged by `type`.

use serde::{Deserialize, Serialize};

use crate::game::game_phase::{Action, NotificationKind};
use crate::game::player::Role;

/// Requests peers send to the session server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerRequest {
    Register {
        address: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    Leave {
        address: String,
    },
    TakeAction {
        address: String,
        #[serde(flatten)]
        action: Action,
    },
    Chat {
        address: String,
        text: String,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerResponse {
    Register {
        status: RegisterStatus,
        name: String,
        users: Vec<String>,
    },
    Leave,
    TakeAction {
        status: ActionStatus,
    },
    Chat {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        notice: Option<String>,
    },
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterStatus {
    Ok,
    AlreadyRegistered,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Ok,
    NotAllowed,
}

/// Requests the server pushes to a peer's own RPC endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerRequest {
    NotifyJoin { name: String },
    NotifyLeave { name: String },
    Ping { payload: String },
    GameNotify { kind: NotificationKind, text: String },
    GiveActionOptions { actions: Vec<Action> },
    SendRole { role: Role },
    NewGame { members: Vec<String>, game_id: i32 },
    Chat { from: String, tag: String, text: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerResponse {
    Ack,
    Pong { payload: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_carry_their_targets_on_the_wire() {
        let wire = serde_json::to_string(&Action::Vote("Bob".to_string())).unwrap();
        assert_eq!(wire, r#"{"action":"vote","target":"Bob"}"#);

        let wire = serde_json::to_string(&Action::Sleep).unwrap();
        assert_eq!(wire, r#"{"action":"sleep"}"#);
    }

    #[test]
    fn take_action_request_parses() {
        let line = r#"{"type":"take_action","address":"10.0.0.7:51076","action":"kill","target":"EpicWinner"}"#;
        let request: ServerRequest = serde_json::from_str(line).unwrap();
        match request {
            ServerRequest::TakeAction { address, action } => {
                assert_eq!(address, "10.0.0.7:51076");
                assert_eq!(action, Action::Kill("EpicWinner".to_string()));
            }
            other => panic!("parsed into the wrong variant: {:?}", other),
        }
    }

    #[test]
    fn register_without_a_name_is_valid() {
        let line = r#"{"type":"register","address":"10.0.0.7:51076"}"#;
        let request: ServerRequest = serde_json::from_str(line).unwrap();
        match request {
            ServerRequest::Register { address, name } => {
                assert_eq!(address, "10.0.0.7:51076");
                assert_eq!(name, None);
            }
            other => panic!("parsed into the wrong variant: {:?}", other),
        }
    }

    #[test]
    fn action_offer_round_trips() {
        let offer = PeerRequest::GiveActionOptions {
            actions: vec![Action::Wake, Action::Check("DoctorWho666".to_string())],
        };
        let wire = serde_json::to_string(&offer).unwrap();
        let back: PeerRequest = serde_json::from_str(&wire).unwrap();
        assert_eq!(back, offer);
    }
}
