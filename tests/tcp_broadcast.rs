mod support;

use std::time::Duration;
use sync_server::domain::state::GRID_ROWS;
use sync_server::interface_adapters::protocol::BinaryStateEncoder;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const FRAME_LEN: usize = BinaryStateEncoder::HEADER_LEN + GRID_ROWS * 4;

struct Frame {
    tick: u64,
    paused: bool,
    rows: Vec<u32>,
}

async fn read_frame(stream: &mut TcpStream) -> Frame {
    let mut buf = vec![0u8; FRAME_LEN];
    tokio::time::timeout(Duration::from_secs(3), stream.read_exact(&mut buf))
        .await
        .expect("frame should arrive in time")
        .expect("frame should be complete");

    let tick = u64::from_be_bytes(buf[0..8].try_into().expect("tick bytes"));
    let paused = buf[8] != 0;
    let row_count = u16::from_be_bytes(buf[9..11].try_into().expect("row count bytes"));
    assert_eq!(usize::from(row_count), GRID_ROWS);

    let rows = buf[BinaryStateEncoder::HEADER_LEN..]
        .chunks_exact(4)
        .map(|chunk| u32::from_be_bytes(chunk.try_into().expect("row bytes")))
        .collect();
    Frame { tick, paused, rows }
}

async fn wait_for_paused(stream: &mut TcpStream, expected: bool) -> Frame {
    for _ in 0..200 {
        let frame = read_frame(stream).await;
        if frame.paused == expected {
            return frame;
        }
    }
    panic!("paused never became {expected}");
}

#[tokio::test]
async fn test_raw_socket_client_receives_binary_frames_and_commands() {
    let server = support::ensure_server();
    let mut stream = TcpStream::connect(&server.tcp_addr)
        .await
        .expect("tcp connect should succeed");

    let first = read_frame(&mut stream).await;
    assert_eq!(first.rows.len(), GRID_ROWS);
    assert!(first.rows.iter().all(|row| row.count_ones() == 28));

    stream.write_all(b"p").await.expect("send pause");
    let paused = wait_for_paused(&mut stream, true).await;
    let later = wait_for_paused(&mut stream, true).await;
    assert_eq!(paused.tick, later.tick);

    stream.write_all(b"P").await.expect("send play");
    let resumed = wait_for_paused(&mut stream, false).await;
    let next = read_frame(&mut stream).await;
    assert!(next.tick >= resumed.tick);
}
