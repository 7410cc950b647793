// Interface adapters: wire encodings and transport handling.

pub mod http;
pub mod net;
pub mod protocol;
pub mod state;
