use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MuxError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("pane not found: {0}")]
    PaneNotFound(u32),

    #[error("PTY error: {0}")]
    Pty(String),

    #[error("fork error: {0}")]
    Fork(String),

    #[error("socket error: {0}")]
    Socket(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("grid serialization error: {0}")]
    Serialization(String),

    #[error("signal error: {0}")]
    Signal(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("refusing to start: already inside a {0} session")]
    Nesting(String),
}

pub type Result<T> = std::result::Result<T, MuxError>;

impl From<nix::Error> for MuxError {
    fn from(err: nix::Error) -> Self {
        match err {
            nix::Error::EPERM => MuxError::Socket(err.to_string()),
            _ => MuxError::Pty(err.to_string()),
        }
    }
}
