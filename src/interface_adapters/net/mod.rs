// Network adapters split by transport: browser WebSockets vs raw TCP sockets.

pub mod tcp;
pub mod ws;

pub use tcp::serve_tcp;
pub use ws::ws_handler;

use std::time::{Duration, Instant};

const LOG_THROTTLE: Duration = Duration::from_secs(2);
// Upper bound on a close handshake with a peer that may have stopped reading.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

fn should_log(last: &mut Instant) -> bool {
    if last.elapsed() >= LOG_THROTTLE {
        *last = Instant::now();
        true
    } else {
        false
    }
}

// Per-connection traffic counters, logged on disconnect.
#[derive(Debug)]
struct ConnStats {
    msgs_in: u64,
    msgs_out: u64,
    bytes_in: u64,
    bytes_out: u64,
    dropped_in: u64,
    last_drop_log: Instant,
}

impl ConnStats {
    fn new() -> Self {
        Self {
            msgs_in: 0,
            msgs_out: 0,
            bytes_in: 0,
            bytes_out: 0,
            dropped_in: 0,
            last_drop_log: Instant::now() - LOG_THROTTLE,
        }
    }
}
