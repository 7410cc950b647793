// Use cases layer: pacing, command interpretation, fan-out and the tick loop.

pub mod broker;
pub mod interpreter;
pub mod orchestrator;
pub mod ports;
pub mod queue;
pub mod ticker;
pub mod types;

pub use broker::{AdmissionError, AdmissionPolicy, Broker, BrokerSettings, ClientConn};
pub use interpreter::CommandInterpreter;
pub use orchestrator::{Outlet, TickLoop, TickReport, demo_shutdown};
pub use ports::{EncodeError, StateEncoder};
pub use queue::BroadcastQueue;
pub use ticker::{HighResTicker, TickerError};
pub use types::{Frame, Payload, PushOutcome};
