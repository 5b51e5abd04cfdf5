use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Router(#[from] chanmux_router::RouterError),

    #[error("timed out after {0:?} waiting for a response")]
    Timeout(Duration),

    #[error("connection closed before a response arrived")]
    Closed,
}

pub type Result<T> = std::result::Result<T, NetError>;
