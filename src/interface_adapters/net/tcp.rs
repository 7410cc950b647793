// Raw TCP transport: every read chunk is one inbound message, broadcasts are written verbatim.

use super::{ConnStats, should_log};
use crate::use_cases::{Broker, ClientConn, Payload, PushOutcome};

use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{Instrument, debug, info, info_span, warn};

const READ_BUF_LEN: usize = 1024;

/// Accepts raw socket clients until the listener fails.
pub async fn serve_tcp(listener: TcpListener, broker: Arc<Broker>) -> std::io::Result<()> {
    let address = listener.local_addr()?;
    info!(%address, "tcp listening");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                // Per-connection accept failures (e.g. reset before accept) are not fatal.
                warn!(error = %e, "tcp accept failed");
                continue;
            }
        };

        match broker.admit(peer.ip()) {
            Ok(conn) => {
                let span = info_span!(
                    "conn",
                    client_id = conn.id(),
                    transport = "tcp",
                    ip = %peer.ip()
                );
                tokio::spawn(handle_stream(stream, conn).instrument(span));
            }
            Err(e) => {
                debug!(%peer, error = ?e, "tcp connection refused");
            }
        }
    }
}

async fn handle_stream(stream: TcpStream, mut conn: ClientConn) {
    info!("client connected");
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "failed to set nodelay");
    }

    let (mut reader, mut writer) = stream.into_split();
    let mut buf = vec![0u8; READ_BUF_LEN];
    let mut stats = ConnStats::new();

    loop {
        tokio::select! {
            read = reader.read(&mut buf) => {
                match read {
                    Ok(0) => {
                        info!("peer closed connection");
                        break;
                    }
                    Ok(n) => {
                        stats.msgs_in += 1;
                        stats.bytes_in += n as u64;
                        match conn.respond(Payload::copy_from_slice(&buf[..n])) {
                            PushOutcome::Queued => {}
                            PushOutcome::Dropped => {
                                stats.dropped_in += 1;
                                if should_log(&mut stats.last_drop_log) {
                                    warn!(dropped = stats.dropped_in, "broker busy; dropping client message");
                                }
                            }
                            PushOutcome::Closed => break,
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "tcp read error");
                        break;
                    }
                }
            }

            outgoing = conn.next_broadcast() => {
                match outgoing {
                    Some(frame) => {
                        // A peer that stopped reading must not outlive a quit.
                        let written = tokio::select! {
                            written = writer.write_all(&frame) => written,
                            _ = conn.quit_signal() => {
                                info!("broker quit while a write was pending");
                                break;
                            }
                        };
                        if let Err(e) = written {
                            warn!(error = %e, "failed to send broadcast");
                            break;
                        }
                        stats.msgs_out += 1;
                        stats.bytes_out += frame.len() as u64;
                    }
                    None => {
                        info!("broker closed connection");
                        break;
                    }
                }
            }
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!(error = %e, "socket shutdown error");
    }

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::use_cases::{AdmissionPolicy, BrokerSettings, Frame};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    #[tokio::test]
    async fn when_write_is_stalled_then_quit_still_ends_the_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        // The client never reads, so the server's socket buffers fill up.
        let _client = TcpStream::connect(addr).await.expect("connect");
        let (server_side, peer) = listener.accept().await.expect("accept");

        let (response_tx, _responses) = mpsc::channel(1);
        let (broker, queue) = Broker::new(
            BrokerSettings {
                transport: "tcp",
                policy: AdmissionPolicy::default(),
                queue_capacity: 1,
                client_queue_capacity: 1,
            },
            response_tx,
        );
        tokio::spawn(Arc::clone(&broker).run_loop());
        let conn = broker.admit(peer.ip()).expect("admit");
        let handler = tokio::spawn(handle_stream(server_side, conn));

        // Far larger than any socket buffer, so write_all cannot complete.
        let big = Frame::Binary(Payload::from(vec![0u8; 64 * 1024 * 1024]));
        assert_eq!(queue.try_push(big), PushOutcome::Queued);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!handler.is_finished(), "write should be stuck on the idle peer");

        assert!(broker.quit());
        timeout(Duration::from_secs(3), handler)
            .await
            .expect("handler exits after quit")
            .expect("task");
    }

    #[tokio::test]
    async fn when_peer_sends_bytes_then_they_reach_the_response_queue() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let mut client = TcpStream::connect(addr).await.expect("connect");
        let (server_side, peer) = listener.accept().await.expect("accept");

        let (response_tx, mut responses) = mpsc::channel(4);
        let (broker, _queue) = Broker::new(
            BrokerSettings {
                transport: "tcp",
                policy: AdmissionPolicy::default(),
                queue_capacity: 4,
                client_queue_capacity: 1,
            },
            response_tx,
        );
        tokio::spawn(Arc::clone(&broker).run_loop());
        let conn = broker.admit(peer.ip()).expect("admit");
        tokio::spawn(handle_stream(server_side, conn));

        client.write_all(b"p").await.expect("write");
        let got = timeout(Duration::from_secs(2), responses.recv())
            .await
            .expect("response in time")
            .expect("queue open");
        assert_eq!(&got[..], b"p");

        broker.quit();
    }
}
