use super::{CLOSE_TIMEOUT, ConnStats, should_log};
use crate::interface_adapters::http::rejection;
use crate::interface_adapters::state::AppState;
use crate::use_cases::{ClientConn, Frame, Payload, PushOutcome};

use axum::{
    extract::{
        ConnectInfo, State,
        ws::{CloseFrame, Message, WebSocketUpgrade, close_code},
    },
    response::IntoResponse,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::{net::SocketAddr, sync::Arc};
use tracing::{Instrument, debug, info, info_span, warn};

enum LoopControl {
    Continue,
    Disconnect(Option<CloseFrame>),
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    // Admission happens before the upgrade so rejected browsers get a plain HTTP error.
    let conn = match state.web_broker.admit(peer.ip()) {
        Ok(conn) => conn,
        Err(e) => {
            debug!(%peer, error = ?e, "websocket upgrade refused");
            return rejection(&e).into_response();
        }
    };

    let span = info_span!(
        "conn",
        client_id = conn.id(),
        transport = "web",
        ip = %peer.ip()
    );
    ws.on_upgrade(move |socket| handle_socket(socket, conn).instrument(span))
}

fn going_away() -> CloseFrame {
    CloseFrame {
        code: close_code::AWAY,
        reason: "server shutting down".into(),
    }
}

// Generic over the socket so the loop can be driven without an HTTP upgrade.
async fn handle_socket<S>(mut socket: S, mut conn: ClientConn)
where
    S: Sink<Message, Error = axum::Error> + Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    info!("client connected");
    let mut stats = ConnStats::new();

    let close_frame = loop {
        tokio::select! {
            // Incoming command bytes from the browser.
            incoming = socket.next() => {
                match handle_incoming(incoming, &conn, &mut stats) {
                    LoopControl::Continue => {}
                    LoopControl::Disconnect(frame) => break frame,
                }
            }

            // Outgoing state broadcast.
            outgoing = conn.next_broadcast() => {
                match outgoing {
                    Some(frame) => {
                        // A browser that stopped reading must not outlive a quit.
                        let sent = tokio::select! {
                            sent = forward_frame(&mut socket, frame, &mut stats) => sent,
                            _ = conn.quit_signal() => {
                                info!("broker quit while a send was pending");
                                break Some(going_away());
                            }
                        };
                        if let Err(e) = sent {
                            warn!(error = %e, "failed to send broadcast");
                            break None;
                        }
                    }
                    None => {
                        // The broker dropped us (quit or removal); close actively.
                        info!("broker closed connection");
                        break Some(going_away());
                    }
                }
            }
        }
    };

    let closing = async {
        if let Some(frame) = close_frame {
            let _ = socket.send(Message::Close(Some(frame))).await;
        }
        socket.close().await
    };
    match tokio::time::timeout(CLOSE_TIMEOUT, closing).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "socket close error"),
        Err(_) => debug!("close handshake timed out; dropping socket"),
    }

    // Unregister before logging so the registry count is already updated.
    drop(conn);
    debug!(
        msgs_in = stats.msgs_in,
        msgs_out = stats.msgs_out,
        bytes_in = stats.bytes_in,
        bytes_out = stats.bytes_out,
        dropped_in = stats.dropped_in,
        "connection stats"
    );
    info!("client disconnected");
}

fn handle_incoming(
    incoming: Option<Result<Message, axum::Error>>,
    conn: &ClientConn,
    stats: &mut ConnStats,
) -> LoopControl {
    match incoming {
        Some(Ok(Message::Text(text))) => {
            forward_response(conn, Payload::copy_from_slice(text.as_str().as_bytes()), stats)
        }
        Some(Ok(Message::Binary(bytes))) => forward_response(conn, bytes, stats),
        Some(Ok(Message::Ping(_) | Message::Pong(_))) => LoopControl::Continue,
        Some(Ok(Message::Close(_))) | None => {
            info!("websocket closed");
            LoopControl::Disconnect(None)
        }
        Some(Err(e)) => {
            warn!(error = %e, "websocket recv error");
            LoopControl::Disconnect(None)
        }
    }
}

fn forward_response(conn: &ClientConn, payload: Payload, stats: &mut ConnStats) -> LoopControl {
    stats.msgs_in += 1;
    stats.bytes_in += payload.len() as u64;

    match conn.respond(payload) {
        PushOutcome::Queued => LoopControl::Continue,
        PushOutcome::Dropped => {
            stats.dropped_in += 1;
            if should_log(&mut stats.last_drop_log) {
                warn!(dropped = stats.dropped_in, "broker busy; dropping client message");
            }
            LoopControl::Continue
        }
        PushOutcome::Closed => LoopControl::Disconnect(Some(going_away())),
    }
}

async fn forward_frame<S>(socket: &mut S, frame: Frame, stats: &mut ConnStats) -> Result<(), axum::Error>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    let len = frame.len();
    // JSON state arrives as text so browsers can parse it directly.
    let msg = match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Binary(bytes) => Message::Binary(bytes),
    };
    socket.send(msg).await?;
    stats.msgs_out += 1;
    stats.bytes_out += len as u64;
    Ok(())
}
