// Domain layer: authoritative game state and the command vocabulary.

pub mod command;
pub mod state;

pub use command::Command;
pub use state::{GameState, PelletGrid};
