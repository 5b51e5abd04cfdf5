use thiserror::Error;

/// Errors surfaced by channel configuration and FSM registration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    /// The channel is not covered by any configured group.
    #[error("channel {channel} is not covered by any configured group")]
    ChannelNotConfigured { channel: u8 },

    /// The channel appears in more than one group.
    #[error("channel {channel} appears in more than one group")]
    DuplicateChannel { channel: u8 },

    /// The channel already has a registered state machine.
    #[error("channel {channel} already has a registered state machine")]
    ChannelOccupied { channel: u8 },
}

pub type Result<T> = std::result::Result<T, RouterError>;
