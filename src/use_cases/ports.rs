use crate::domain::GameState;

use super::types::Frame;

// Port for turning the game state into the frame a transport broadcasts.
pub trait StateEncoder: Send + Sync {
    fn encode(&self, state: &GameState) -> Result<Frame, EncodeError>;
}

#[derive(Debug)]
pub enum EncodeError {
    #[allow(dead_code)]
    Serialization(serde_json::Error),
    TooManyRows(usize),
}
