// Wire encodings of the game state for the two transports.
// Browsers get JSON; raw-socket clients get a compact big-endian layout.

use crate::domain::GameState;
use crate::use_cases::{EncodeError, Frame, Payload, StateEncoder};
use serde::Serialize;

/// State snapshot sent to browser clients.
#[derive(Debug, Clone, Serialize)]
pub struct StateDto<'a> {
    pub tick: u64,
    pub paused: bool,
    // One bitmask per board row.
    pub pellets: &'a [u32],
}

impl<'a> From<&'a GameState> for StateDto<'a> {
    fn from(state: &'a GameState) -> Self {
        Self {
            tick: state.tick(),
            paused: state.is_paused(),
            pellets: state.pellets().rows(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonStateEncoder;

impl StateEncoder for JsonStateEncoder {
    fn encode(&self, state: &GameState) -> Result<Frame, EncodeError> {
        let text = serde_json::to_string(&StateDto::from(state)).map_err(EncodeError::Serialization)?;
        Ok(Frame::from(text))
    }
}

/// `tick: u64 | paused: u8 | row_count: u16 | rows: u32 * row_count`, all big-endian.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryStateEncoder;

impl BinaryStateEncoder {
    pub const HEADER_LEN: usize = 8 + 1 + 2;
}

impl StateEncoder for BinaryStateEncoder {
    fn encode(&self, state: &GameState) -> Result<Frame, EncodeError> {
        let rows = state.pellets().rows();
        let row_count = u16::try_from(rows.len()).map_err(|_| EncodeError::TooManyRows(rows.len()))?;

        let mut buf = Vec::with_capacity(Self::HEADER_LEN + rows.len() * 4);
        buf.extend_from_slice(&state.tick().to_be_bytes());
        buf.push(u8::from(state.is_paused()));
        buf.extend_from_slice(&row_count.to_be_bytes());
        for row in rows {
            buf.extend_from_slice(&row.to_be_bytes());
        }
        Ok(Frame::Binary(Payload::from(buf)))
    }
}
