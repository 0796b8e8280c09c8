use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("message exceeds maximum frame size")]
    MessageTooLarge,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("cannot connect to latticed socket: {0}")]
    Connect(#[source] std::io::Error),

    #[error("connection to latticed lost")]
    Disconnected,

    #[error("latticed rejected the request: {0}")]
    Daemon(String),

    #[error("unexpected response payload for {request} request")]
    UnexpectedResponse { request: &'static str },

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}
