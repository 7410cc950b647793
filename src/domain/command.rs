// Decoded control commands carried by the first byte of an inbound message.

/// Byte that pauses the simulation.
pub const PAUSE_BYTE: u8 = b'p';
/// Byte that resumes the simulation.
pub const PLAY_BYTE: u8 = b'P';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Pause,
    Play,
    // Any other leading byte; kept so new commands can be added without touching callers.
    Unknown(u8),
}

impl Command {
    /// Decodes the leading byte of `msg`.
    ///
    /// Returns `None` for an empty message. Trailing bytes are reserved and ignored.
    pub fn decode(msg: &[u8]) -> Option<Self> {
        let first = *msg.first()?;
        Some(match first {
            PAUSE_BYTE => Command::Pause,
            PLAY_BYTE => Command::Play,
            other => Command::Unknown(other),
        })
    }
}
