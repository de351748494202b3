use crate::session::PendingAction;
use alloy_primitives::TxHash;

pub type Result<T, E = GameError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("{0}")]
    Validation(String),
    #[error("invalid calldata: {0}")]
    Format(String),
    #[error("{0}")]
    Transport(String),
    #[error("transaction {tx_hash} was executed but reported failure")]
    ConfirmationFailure { tx_hash: TxHash },
    #[error("could not decode {0}")]
    Decode(String),
    #[error("{0} is still in flight")]
    ActionInFlight(PendingAction),
    #[error("wallet is not connected")]
    NotConnected,
}

impl GameError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }
}

impl From<reqwest::Error> for GameError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
