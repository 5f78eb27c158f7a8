use std::io;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::game::game_phase::{Action, NotificationKind};
use crate::game::player::Role;
use crate::rpc::protocol::{PeerRequest, PeerResponse};

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("peer closed the connection")]
    Closed,
    #[error("malformed peer response: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unexpected peer response")]
    Unexpected,
}

impl PeerError {
    /// A slow or unreachable peer, as opposed to a peer (or server) that is
    /// actually broken. Soft failures get the peer evicted; everything else
    /// propagates.
    fn is_soft(&self) -> bool {
        match self {
            PeerError::Closed => true,
            PeerError::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}

/// Outbound RPC handle bound to one connected peer's listen address. Every
/// call is a single dial + request/response round under a fixed short
/// timeout, so a stuck peer costs at most one timeout per call and can
/// never wedge the maintenance tick.
pub struct PeerClient {
    addr: String,
    timeout: Duration,
}

const PING_PAYLOAD: &str = "mafia-server";

impl PeerClient {
    pub fn new(addr: &str, timeout: Duration) -> PeerClient {
        PeerClient {
            addr: addr.to_string(),
            timeout,
        }
    }

    /// Health check. `Ok(false)` means the peer did not answer in time.
    pub async fn ping(&self) -> Result<bool, PeerError> {
        let request = PeerRequest::Ping {
            payload: PING_PAYLOAD.to_string(),
        };
        match self.call(&request).await? {
            Some(PeerResponse::Pong { payload }) if payload == PING_PAYLOAD => Ok(true),
            Some(_) => Err(PeerError::Unexpected),
            None => Ok(false),
        }
    }

    pub async fn notify_join(&self, name: &str) -> Result<bool, PeerError> {
        self.fire(PeerRequest::NotifyJoin {
            name: name.to_string(),
        })
        .await
    }

    pub async fn notify_leave(&self, name: &str) -> Result<bool, PeerError> {
        self.fire(PeerRequest::NotifyLeave {
            name: name.to_string(),
        })
        .await
    }

    pub async fn game_notify(&self, kind: NotificationKind, text: &str) -> Result<bool, PeerError> {
        self.fire(PeerRequest::GameNotify {
            kind,
            text: text.to_string(),
        })
        .await
    }

    /// Offers the action menu. Fire-and-forget: the peer replies later with
    /// its own `TakeAction` call, at human pace, never inside this round.
    pub async fn give_action_options(&self, actions: &[Action]) -> Result<bool, PeerError> {
        self.fire(PeerRequest::GiveActionOptions {
            actions: actions.to_vec(),
        })
        .await
    }

    pub async fn send_role(&self, role: Role) -> Result<bool, PeerError> {
        self.fire(PeerRequest::SendRole { role }).await
    }

    pub async fn new_game(&self, members: &[String], game_id: i32) -> Result<bool, PeerError> {
        self.fire(PeerRequest::NewGame {
            members: members.to_vec(),
            game_id,
        })
        .await
    }

    pub async fn chat(&self, from: &str, tag: &str, text: &str) -> Result<bool, PeerError> {
        self.fire(PeerRequest::Chat {
            from: from.to_string(),
            tag: tag.to_string(),
            text: text.to_string(),
        })
        .await
    }

    async fn fire(&self, request: PeerRequest) -> Result<bool, PeerError> {
        match self.call(&request).await? {
            Some(PeerResponse::Ack) => Ok(true),
            Some(_) => Err(PeerError::Unexpected),
            None => {
                log::debug!("peer {} unreachable for {:?}", self.addr, request);
                Ok(false)
            }
        }
    }

    /// One bounded round. `Ok(None)` is the soft-failure case; any other
    /// transport problem indicates a bug on one side of the wire and is
    /// returned as an error.
    async fn call(&self, request: &PeerRequest) -> Result<Option<PeerResponse>, PeerError> {
        match timeout(self.timeout, self.round(request)).await {
            Ok(Ok(response)) => Ok(Some(response)),
            Ok(Err(err)) if err.is_soft() => Ok(None),
            Ok(Err(err)) => Err(err),
            Err(_elapsed) => Ok(None),
        }
    }

    async fn round(&self, request: &PeerRequest) -> Result<PeerResponse, PeerError> {
        let stream = TcpStream::connect(&self.addr).await?;
        let (reader, mut writer) = stream.into_split();

        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;

        let mut answer = String::new();
        let mut reader = BufReader::new(reader);
        if reader.read_line(&mut answer).await? == 0 {
            return Err(PeerError::Closed);
        }
        Ok(serde_json::from_str(&answer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn unused_addr() -> String {
        // Bind and drop to get an address nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        addr
    }

    #[tokio::test]
    async fn refused_connection_is_a_soft_failure() {
        let client = PeerClient::new(&unused_addr().await, Duration::from_millis(200));
        assert!(!client.ping().await.unwrap());
        assert!(!client.notify_join("somebody").await.unwrap());
    }

    #[tokio::test]
    async fn silent_peer_times_out_softly() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            // Accept and sit on the connection without answering.
            let _held = listener.accept().await;
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let client = PeerClient::new(&addr, Duration::from_millis(100));
        let started = std::time::Instant::now();
        assert!(!client.ping().await.unwrap());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn garbage_response_is_fatal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            use tokio::io::AsyncWriteExt;
            stream.write_all(b"this is not json\n").await.unwrap();
        });

        let client = PeerClient::new(&addr, Duration::from_millis(500));
        match client.ping().await {
            Err(PeerError::Malformed(_)) => {}
            other => panic!("expected a malformed-response error, got {:?}", other),
        }
    }
}
