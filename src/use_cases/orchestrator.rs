// Tick-driven broadcast loop and the timed demo shutdown.

use super::broker::Broker;
use super::interpreter::CommandInterpreter;
use super::ports::StateEncoder;
use super::queue::BroadcastQueue;
use super::ticker::HighResTicker;
use super::types::{Payload, PushOutcome};
use crate::domain::GameState;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{error, info};

/// One broadcast destination: a broker, its queue and the encoding it expects.
pub struct Outlet {
    pub broker: Arc<Broker>,
    pub queue: BroadcastQueue,
    pub encoder: Box<dyn StateEncoder>,
}

/// Counters reported when the tick loop ends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub frames: u64,
    pub push_attempts: u64,
    pub pushes_queued: u64,
    pub pushes_dropped: u64,
    pub commands: u64,
}

/// Owns the game state for its whole run: commands are applied and state is
/// serialized from this single task.
pub struct TickLoop {
    pub ticker: Arc<HighResTicker>,
    pub state: GameState,
    pub interpreter: CommandInterpreter,
    pub responses: mpsc::Receiver<Payload>,
    pub outlets: Vec<Outlet>,
    /// Stop after this many frames (`None` runs until every broker quits).
    pub frame_budget: Option<u64>,
}

impl TickLoop {
    /// Runs until the frame budget is spent, every broker has quit, or the ticker stops.
    ///
    /// Returns the final state alongside the counters.
    pub async fn run(mut self) -> (GameState, TickReport) {
        let mut report = TickReport::default();

        loop {
            if self.frame_budget.is_some_and(|budget| report.frames >= budget) {
                info!(frames = report.frames, "tick budget spent");
                break;
            }

            // Apply every command that arrived since the previous frame.
            while let Ok(msg) = self.responses.try_recv() {
                self.interpreter.interpret(&mut self.state, &msg);
                report.commands += 1;
            }

            self.state.advance();
            self.broadcast(&mut report);
            report.frames += 1;

            if self.outlets.iter().all(|outlet| outlet.broker.has_quit()) {
                info!(
                    lifetime_ms = self.ticker.lifetime().as_millis() as u64,
                    msg_count = report.push_attempts,
                    "all brokers quit; tick loop stopping"
                );
                break;
            }

            if !self.ticker.ready().await {
                info!("ticker stopped; tick loop stopping");
                break;
            }
        }

        (self.state, report)
    }

    fn broadcast(&self, report: &mut TickReport) {
        for outlet in &self.outlets {
            if outlet.broker.has_quit() {
                continue;
            }
            let frame = match outlet.encoder.encode(&self.state) {
                Ok(frame) => frame,
                Err(e) => {
                    error!(transport = outlet.broker.transport(), error = ?e, "failed to encode state");
                    continue;
                }
            };

            report.push_attempts += 1;
            match outlet.queue.try_push(frame) {
                PushOutcome::Queued => report.pushes_queued += 1,
                // Most recent state wins on the next frame.
                PushOutcome::Dropped | PushOutcome::Closed => report.pushes_dropped += 1,
            }
        }
    }
}

/// Quits every broker after `after`, then logs how long the server ran.
pub async fn demo_shutdown(brokers: Vec<Arc<Broker>>, ticker: Arc<HighResTicker>, after: Duration) {
    let start = Instant::now();
    tokio::time::sleep(after).await;

    for broker in &brokers {
        broker.quit();
    }

    info!(
        elapsed_ms = start.elapsed().as_millis() as u64,
        ticker_lifetime_ms = ticker.lifetime().as_millis() as u64,
        frames = ticker.frame_count(),
        "demo shutdown complete"
    );
}
