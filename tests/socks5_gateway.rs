//! End-to-end gateway behavior over real sockets: reply codes, upstream
//! rotation, and the splice path.

#[allow(dead_code)]
mod helpers;

use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::PgPool;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use waypoint::db::DbContext;
use waypoint::proxy::gateway::Gateway;
use waypoint::proxy::pool::{ProxyPool, Upstream};
use waypoint::proxy::socks5;

/// Start the gateway on an ephemeral port, returning its address.
async fn start_gateway(pool: PgPool, upstreams: Arc<ProxyPool>) -> (SocketAddr, CancellationToken) {
    let gateway = Gateway::new(
        DbContext::new(pool),
        upstreams,
        "127.0.0.1:0".to_owned(),
    );
    let bound = gateway.bind().await.expect("bind gateway");
    let addr = bound.local_addr().expect("gateway addr");
    let cancel = CancellationToken::new();
    let run_cancel = cancel.clone();
    tokio::spawn(async move {
        let _ = bound.run(run_cancel).await;
    });
    (addr, cancel)
}

/// A compliant upstream SOCKS5 proxy that accepts CONNECT and then echoes
/// whatever the client sends.
async fn start_echo_upstream() -> Upstream {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind upstream");
    let addr = listener.local_addr().expect("upstream addr");
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                if socks5::serve_handshake(&mut stream).await.is_err() {
                    return;
                }
                let Ok(Ok(_target)) = socks5::read_connect_request(&mut stream).await else {
                    return;
                };
                if socks5::write_reply(&mut stream, socks5::Reply::Success)
                    .await
                    .is_err()
                {
                    return;
                }
                let (mut read_half, mut write_half) = stream.split();
                let _ = tokio::io::copy(&mut read_half, &mut write_half).await;
            });
        }
    });
    Upstream {
        ip: addr.ip().to_string(),
        port: addr.port(),
    }
}

/// An upstream address that refuses connections: bind, note the port, drop.
async fn dead_upstream() -> Upstream {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind dead upstream");
    let addr = listener.local_addr().expect("dead upstream addr");
    drop(listener);
    Upstream {
        ip: addr.ip().to_string(),
        port: addr.port(),
    }
}

/// Run the client side up to the reply, returning (reply code, stream).
async fn connect_through(addr: SocketAddr) -> (u8, TcpStream) {
    let mut stream = TcpStream::connect(addr).await.expect("connect gateway");

    stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await.unwrap();
    assert_eq!(choice, [0x05, 0x00], "gateway must accept no-auth");

    // CONNECT example.internal:80 as a domain address.
    let host = b"example.internal";
    let mut request = vec![0x05, 0x01, 0x00, 0x03, host.len() as u8];
    request.extend_from_slice(host);
    request.extend_from_slice(&80u16.to_be_bytes());
    stream.write_all(&request).await.unwrap();

    let mut reply = [0u8; 10];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[0], 0x05);
    assert_eq!(&reply[3..], &[0x01, 0, 0, 0, 0, 0, 0], "dummy bind addr");
    (reply[1], stream)
}

#[sqlx::test]
async fn empty_pool_replies_server_failure(pool: PgPool) {
    let upstreams = Arc::new(ProxyPool::new());
    let (addr, _cancel) = start_gateway(pool, upstreams).await;

    let (code, _stream) = connect_through(addr).await;
    assert_eq!(code, 0x01, "empty pool is a server failure");
}

#[sqlx::test]
async fn healthy_upstream_splices_traffic(pool: PgPool) {
    let upstreams = Arc::new(ProxyPool::new());
    upstreams.add_validated(start_echo_upstream().await);
    let (addr, _cancel) = start_gateway(pool, upstreams).await;

    let (code, mut stream) = connect_through(addr).await;
    assert_eq!(code, 0x00);

    stream.write_all(b"ping through the tunnel").await.unwrap();
    let mut echoed = [0u8; 23];
    stream.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"ping through the tunnel");
}

#[sqlx::test]
async fn pool_recovers_after_first_proxy_arrives(pool: PgPool) {
    let upstreams = Arc::new(ProxyPool::new());
    let (addr, _cancel) = start_gateway(pool, upstreams.clone()).await;

    let (code, _stream) = connect_through(addr).await;
    assert_eq!(code, 0x01);

    upstreams.add_validated(start_echo_upstream().await);
    let (code, _stream) = connect_through(addr).await;
    assert_eq!(code, 0x00, "same request succeeds once the pool is fed");
}

#[sqlx::test]
async fn dial_failures_rotate_to_the_next_upstream(pool: PgPool) {
    let upstreams = Arc::new(ProxyPool::new());
    upstreams.add_validated(dead_upstream().await);
    upstreams.add_validated(dead_upstream().await);
    upstreams.add_validated(start_echo_upstream().await);
    let (addr, _cancel) = start_gateway(pool, upstreams).await;

    // Two dead upstreams burn two of the three attempts; the healthy one
    // still lands within the retry budget regardless of rotation position.
    let (code, mut stream) = connect_through(addr).await;
    assert_eq!(code, 0x00);
    stream.write_all(b"ok").await.unwrap();
    let mut echoed = [0u8; 2];
    stream.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"ok");
}

#[sqlx::test]
async fn all_upstreams_dead_replies_host_unreachable(pool: PgPool) {
    let upstreams = Arc::new(ProxyPool::new());
    for _ in 0..3 {
        upstreams.add_validated(dead_upstream().await);
    }
    let (addr, _cancel) = start_gateway(pool.clone(), upstreams).await;

    let (code, _stream) = connect_through(addr).await;
    assert_eq!(code, 0x04, "exhausted retries are host-unreachable");
}

#[sqlx::test]
async fn non_connect_command_is_refused(pool: PgPool) {
    let upstreams = Arc::new(ProxyPool::new());
    upstreams.add_validated(start_echo_upstream().await);
    let (addr, _cancel) = start_gateway(pool, upstreams).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await.unwrap();

    // UDP ASSOCIATE (0x03) is outside the supported subset.
    let mut request = vec![0x05, 0x03, 0x00, 0x01, 127, 0, 0, 1];
    request.extend_from_slice(&9999u16.to_be_bytes());
    stream.write_all(&request).await.unwrap();

    let mut reply = [0u8; 10];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[1], 0x07, "command not supported");
}
