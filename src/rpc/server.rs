use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::peer::PeerError;
use crate::registry::{RegisterReply, SessionRegistry};

use super::protocol::*;

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed request: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error(transparent)]
    Peer(#[from] PeerError),
}

/// Accept loop for the server's inbound RPC surface. One task per
/// connection; a connection serves any number of request/response rounds.
pub async fn serve(listener: TcpListener, registry: Arc<SessionRegistry>) -> std::io::Result<()> {
    loop {
        let (stream, addr) = listener.accept().await?;
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, registry).await {
                log::warn!("connection from {} ended with an error: {}", addr, err);
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    registry: Arc<SessionRegistry>,
) -> Result<(), ConnectionError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let request: ServerRequest = serde_json::from_str(&line)?;
        let response = dispatch(&registry, request).await?;
        let mut out = serde_json::to_string(&response)?;
        out.push('\n');
        writer.write_all(out.as_bytes()).await?;
    }
    Ok(())
}

async fn dispatch(
    registry: &SessionRegistry,
    request: ServerRequest,
) -> Result<ServerResponse, PeerError> {
    match request {
        ServerRequest::Register { address, name } => {
            let response = match registry.register(&address, name.as_deref()).await {
                RegisterReply::Ok { name, users } => ServerResponse::Register {
                    status: RegisterStatus::Ok,
                    name,
                    users,
                },
                RegisterReply::AlreadyRegistered => ServerResponse::Register {
                    status: RegisterStatus::AlreadyRegistered,
                    name: String::new(),
                    users: Vec::new(),
                },
            };
            Ok(response)
        }
        ServerRequest::Leave { address } => {
            registry.leave(&address);
            Ok(ServerResponse::Leave)
        }
        ServerRequest::TakeAction { address, action } => {
            let status = if registry.take_action(&address, &action).await {
                ActionStatus::Ok
            } else {
                ActionStatus::NotAllowed
            };
            Ok(ServerResponse::TakeAction { status })
        }
        ServerRequest::Chat { address, text } => {
            let notice = registry.relay_chat(&address, &text).await?;
            Ok(ServerResponse::Chat { notice })
        }
    }
}
