//! Chaining through a second SOCKS5 hop.


use common::*;
use shadowbroker::config::UpstreamEntry;
use shadowbroker::Config;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// What the fake upstream saw from the broker.
#[derive(Debug)]
struct Seen {
    greeting: Vec<u8>,
    connect: Vec<u8>,
    peer: SocketAddr,
}

/// A SOCKS5 proxy that records the handshake, answers with `status`, then
/// echoes the tunnel.
async fn fake_upstream(status: u8) -> (SocketAddr, oneshot::Receiver<Seen>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let (mut s, peer) = listener.accept().await.unwrap();
        let mut greeting = vec![0u8; 3];
        s.read_exact(&mut greeting).await.unwrap();
        s.write_all(&[5, 0]).await.unwrap();

        let mut connect = vec![0u8; 4];
        s.read_exact(&mut connect).await.unwrap();
        let tail = match connect[3] {
            1 => 4 + 2,
            3 => {
                let mut len = [0u8; 1];
                s.read_exact(&mut len).await.unwrap();
                connect.push(len[0]);
                len[0] as usize + 2
            }
            other => panic!("unexpected atyp {other}"),
        };
        let start = connect.len();
        connect.resize(start + tail, 0);
        s.read_exact(&mut connect[start..]).await.unwrap();

        s.write_all(&[5, status, 0, 1, 10, 9, 8, 7, 0x1f, 0x90]).await.unwrap();
        let _ = tx.send(Seen { greeting, connect, peer });

        let (mut r, mut w) = s.split();
        let _ = tokio::io::copy(&mut r, &mut w).await;
    });
    (addr, rx)
}

fn config_with_upstream(label: &str, addr: SocketAddr) -> Config {
    let mut cfg = Config::default();
    cfg.upstreams.insert(
        label.to_string(),
        UpstreamEntry { addr: addr.ip().to_string(), port: addr.port() },
    );
    cfg
}

#[tokio::test]
async fn chained_connect_forwards_original_domain() {
    let (up, seen) = fake_upstream(0).await;
    let broker = start_broker(config_with_upstream("OVERSEA", up), fixed_route("OVERSEA")).await;

    let (mut s, reply) = socks_request(broker, &domain_connect("example.test", 8443)).await;
    assert_eq!(reply[1], 0);

    let seen = seen.await.unwrap();
    assert_eq!(seen.greeting, vec![5, 1, 0]);
    assert_eq!(seen.connect, domain_connect("example.test", 8443));
    // Bound address is the broker's end of the upstream connection, not the
    // upstream's own reply.
    assert_eq!(bound_of(&reply), seen.peer);

    s.write_all(b"through the tunnel").await.unwrap();
    let mut back = [0u8; 18];
    s.read_exact(&mut back).await.unwrap();
    assert_eq!(&back, b"through the tunnel");
}

#[tokio::test]
async fn chained_connect_forwards_original_ipv4_with_port() {
    let (up, seen) = fake_upstream(0).await;
    let broker = start_broker(config_with_upstream("US", up), fixed_route("US")).await;

    let dest: SocketAddr = "203.0.113.5:2222".parse().unwrap();
    let (_s, reply) = socks_request(broker, &ipv4_connect(dest)).await;
    assert_eq!(reply[1], 0);

    let seen = seen.await.unwrap();
    assert_eq!(seen.connect, vec![5, 1, 0, 1, 203, 0, 113, 5, 0x08, 0xae]);
    assert_ne!(&seen.connect[4..8], &[127, 0, 0, 1]);
}

#[tokio::test]
async fn upstream_failure_status_is_not_inspected_by_default() {
    let (up, seen) = fake_upstream(1).await;
    let broker = start_broker(config_with_upstream("US", up), fixed_route("US")).await;

    let (mut s, reply) = socks_request(broker, &domain_connect("example.test", 80)).await;
    assert_eq!(reply[1], 0);
    seen.await.unwrap();
    s.write_all(b"x").await.unwrap();
    let mut back = [0u8; 1];
    s.read_exact(&mut back).await.unwrap();
    assert_eq!(&back, b"x");
}

#[tokio::test]
async fn strict_upstream_reports_connect_failed() {
    let (up, seen) = fake_upstream(1).await;
    let mut cfg = config_with_upstream("US", up);
    cfg.strict_upstream = true;
    let broker = start_broker(cfg, fixed_route("US")).await;

    let (mut s, reply) = socks_request(broker, &domain_connect("example.test", 80)).await;
    seen.await.unwrap();
    assert_eq!(reply, [5, 5, 0, 1, 0, 0, 0, 0, 0, 0]);
    assert!(read_to_eof(&mut s).await.is_empty());
}

#[tokio::test]
async fn unknown_label_closes_without_reply() {
    let broker = start_broker(Config::default(), fixed_route("NOT-CONFIGURED")).await;

    let mut s = tokio::net::TcpStream::connect(broker).await.unwrap();
    s.write_all(&[5, 1, 0]).await.unwrap();
    s.write_all(&domain_connect("example.test", 443)).await.unwrap();
    // Only the method selection, then EOF: no reply frame at all.
    assert_eq!(read_to_eof(&mut s).await, vec![5, 0]);
}

#[tokio::test]
async fn unreachable_upstream_gets_connect_failed() {
    let gone = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = gone.local_addr().unwrap();
    drop(gone);
    let broker = start_broker(config_with_upstream("US", addr), fixed_route("US")).await;

    let (_s, reply) = socks_request(broker, &domain_connect("example.test", 443)).await;
    assert_eq!(reply, [5, 5, 0, 1, 0, 0, 0, 0, 0, 0]);
}
