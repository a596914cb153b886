//! Client-side failures.

use shared::{ConfigError, DesyncError, ProtocolError, Tick};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Desync(#[from] DesyncError),

    /// The server skipped a tick. The relay releases ticks strictly in
    /// order, so this means the stream lost data.
    #[error("expected confirmed tick {expected}, got {found}")]
    TickGap { expected: Tick, found: Tick },

    #[error("input for tick {tick} already sent (last sent {last_sent})")]
    TickNotIncreasing { tick: Tick, last_sent: Tick },

    #[error("session has not started")]
    NotStarted,

    #[error("invalid session start: {0}")]
    InvalidStart(#[from] ConfigError),
}
