// Turns inbound command bytes into game state transitions.

use crate::domain::{Command, GameState};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default)]
pub struct CommandInterpreter {
    // Log every raw inbound message.
    log_commands: bool,
}

impl CommandInterpreter {
    pub fn new(log_commands: bool) -> Self {
        Self { log_commands }
    }

    /// Applies `msg` to `state`. Empty and unrecognised messages are silently ignored.
    pub fn interpret(&self, state: &mut GameState, msg: &[u8]) {
        if self.log_commands {
            info!(response = %String::from_utf8_lossy(msg), "command received");
        }

        let Some(command) = Command::decode(msg) else {
            return;
        };

        match command {
            Command::Pause => {
                info!("pausing");
                state.pause();
            }
            Command::Play => {
                info!("playing");
                state.play();
            }
            Command::Unknown(byte) => {
                debug!(byte, "ignoring unknown command");
            }
        }
    }
}
