//! End-to-end relay behavior against loopback destinations.


use common::*;
use shadowbroker::relay::{handle_session, Transfer};
use shadowbroker::{Broker, Config};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[tokio::test]
async fn direct_connect_round_trips_bytes() {
    let dest = echo_server().await;
    let broker = start_broker(Config::default(), fixed_route("LOCAL")).await;

    let (mut s, reply) = socks_request(broker, &ipv4_connect(dest)).await;
    assert_eq!(&reply[..4], &[5, 0, 0, 1]);
    assert_eq!(bound_of(&reply).ip().to_string(), "127.0.0.1");

    let payload: Vec<u8> = (0..20_000u32).map(|i| (i * 7 % 256) as u8).collect();
    s.write_all(&payload).await.unwrap();
    let mut back = vec![0u8; payload.len()];
    s.read_exact(&mut back).await.unwrap();
    assert_eq!(back, payload);
}

#[tokio::test]
async fn domain_destination_is_dialed_directly() {
    let dest = echo_server().await;
    let broker = start_broker(Config::default(), fixed_route("DOMESTIC")).await;

    let (mut s, reply) = socks_request(broker, &domain_connect("localhost", dest.port())).await;
    // localhost may resolve to ::1 first; either way the echo must answer.
    if reply[1] == 0 {
        s.write_all(b"over domain").await.unwrap();
        let mut back = [0u8; 11];
        s.read_exact(&mut back).await.unwrap();
        assert_eq!(&back, b"over domain");
    } else {
        assert_eq!(reply[1], 5);
    }
}

#[tokio::test]
async fn non_connect_commands_never_dial() {
    let dest = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dest_addr = match dest.local_addr().unwrap() {
        std::net::SocketAddr::V4(a) => a,
        _ => unreachable!(),
    };
    let lookups = Arc::new(AtomicUsize::new(0));
    let seen = lookups.clone();
    let resolver = Arc::new(move |_: &str| {
        seen.fetch_add(1, Ordering::SeqCst);
        "LOCAL".to_string()
    });
    let broker = start_broker(Config::default(), resolver).await;

    for cmd in [2u8, 3, 0, 0xff] {
        let (mut s, reply) = socks_request(broker, &connect_frame(cmd, &dest_addr)).await;
        assert_eq!(reply, [5, 7, 0, 1, 0, 0, 0, 0, 0, 0], "cmd {cmd}");
        assert!(read_to_eof(&mut s).await.is_empty());
    }
    assert_eq!(lookups.load(Ordering::SeqCst), 0);
    assert!(
        tokio::time::timeout(Duration::from_millis(200), dest.accept())
            .await
            .is_err(),
        "no outbound dial expected"
    );
}

#[tokio::test]
async fn unreachable_destination_gets_connect_failed() {
    let gone = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dest = gone.local_addr().unwrap();
    drop(gone);
    let broker = start_broker(Config::default(), fixed_route("LOCAL")).await;

    let (mut s, reply) = socks_request(broker, &ipv4_connect(dest)).await;
    assert_eq!(reply, [5, 5, 0, 1, 0, 0, 0, 0, 0, 0]);
    assert!(read_to_eof(&mut s).await.is_empty());
}

#[tokio::test]
async fn one_session_failing_leaves_listener_serving() {
    let dest = echo_server().await;
    let broker = start_broker(Config::default(), fixed_route("LOCAL")).await;

    // Silent client.
    let silent = TcpStream::connect(broker).await.unwrap();
    drop(silent);
    // Garbage address type.
    let (_s, reply) = socks_request(broker, &[5, 1, 0, 9]).await;
    assert_eq!(reply[1], 8);

    let (mut s, reply) = socks_request(broker, &ipv4_connect(dest)).await;
    assert_eq!(reply[1], 0);
    s.write_all(b"still here").await.unwrap();
    let mut back = [0u8; 10];
    s.read_exact(&mut back).await.unwrap();
    assert_eq!(&back, b"still here");
}

#[tokio::test]
async fn client_close_mid_transfer_closes_upstream() {
    let dest = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dest_addr = dest.local_addr().unwrap();
    let broker = start_broker(Config::default(), fixed_route("LOCAL")).await;

    let (mut s, reply) = socks_request(broker, &ipv4_connect(dest_addr)).await;
    assert_eq!(reply[1], 0);
    let (mut upstream, _) = dest.accept().await.unwrap();

    s.write_all(&[0xAB; 1000]).await.unwrap();
    let mut first = [0u8; 1000];
    upstream.read_exact(&mut first).await.unwrap();
    drop(s);

    // Destination sees the relay's side of the upstream socket close.
    assert!(read_to_eof(&mut upstream).await.is_empty());
}

// Runs one session over real sockets and returns its byte counters.
async fn counted_session(to_dest: usize, from_dest: usize) -> Transfer {
    let dest = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dest_addr = dest.local_addr().unwrap();
    let front = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let front_addr = front.local_addr().unwrap();
    let broker = Broker::new(Config::default(), fixed_route("LOCAL"));

    let session = tokio::spawn(async move {
        let (stream, peer) = front.accept().await.unwrap();
        handle_session(stream, peer, &broker).await.unwrap()
    });
    let destination = tokio::spawn(async move {
        let (mut s, _) = dest.accept().await.unwrap();
        let mut got = vec![0u8; to_dest];
        s.read_exact(&mut got).await.unwrap();
        s.write_all(&vec![0x5A; from_dest]).await.unwrap();
        got.len()
    });

    let (mut s, reply) = socks_request(front_addr, &ipv4_connect(dest_addr)).await;
    assert_eq!(reply[1], 0);
    s.write_all(&vec![0xC3; to_dest]).await.unwrap();
    let mut back = vec![0u8; from_dest];
    s.read_exact(&mut back).await.unwrap();
    assert_eq!(destination.await.unwrap(), to_dest);
    // Destination task has dropped its socket; the relay ends on that EOF.
    let summary = tokio::time::timeout(WAIT, session).await.unwrap().unwrap();
    summary.transfer
}

#[tokio::test]
async fn counters_zero_byte_close() {
    assert_eq!(counted_session(0, 0).await, Transfer { sent: 0, received: 0 });
}

#[tokio::test]
async fn counters_small_transfer() {
    assert_eq!(counted_session(17, 3).await, Transfer { sent: 17, received: 3 });
}

#[tokio::test]
async fn counters_multi_chunk_transfer() {
    let t = counted_session(4096 * 5 + 1, 4096 * 3 + 7).await;
    assert_eq!(t, Transfer { sent: 4096 * 5 + 1, received: 4096 * 3 + 7 });
}
