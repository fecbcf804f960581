//! The SOCKS5 gateway server.
//!
//! Accepts scraper connections, picks an upstream from the rotating pool,
//! dials it over SOCKS5, and splices the two sockets until either side
//! closes. Upstream dial failures rotate to the next distinct upstream, up
//! to three attempts, before giving up on the connection.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::db::DbContext;
use crate::proxy::pool::{ProxyPool, Upstream};
use crate::proxy::socks5::{self, Reply};

/// Distinct upstreams tried per client connection before giving up.
const MAX_DIAL_ATTEMPTS: usize = 3;

/// Per-upstream dial timeout.
const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// SOCKS5 accept loop.
pub struct Gateway {
    db: DbContext,
    pool: Arc<ProxyPool>,
    listen_addr: String,
}

impl Gateway {
    pub fn new(db: DbContext, pool: Arc<ProxyPool>, listen_addr: String) -> Self {
        Self {
            db,
            pool,
            listen_addr,
        }
    }

    /// Bind the listener without accepting yet. Split from [`Gateway::run`]
    /// so callers binding to an ephemeral port can learn the address.
    pub async fn bind(self) -> anyhow::Result<BoundGateway> {
        let listener = TcpListener::bind(&self.listen_addr).await?;
        info!(addr = %listener.local_addr()?, "SOCKS5 gateway listening");
        Ok(BoundGateway {
            db: self.db,
            pool: self.pool,
            listener,
        })
    }

    /// Bind and accept until cancelled.
    pub async fn run(self, cancel: CancellationToken) -> anyhow::Result<()> {
        self.bind().await?.run(cancel).await
    }
}

/// A gateway with its listener bound.
pub struct BoundGateway {
    db: DbContext,
    pool: Arc<ProxyPool>,
    listener: TcpListener,
}

impl BoundGateway {
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept until cancelled. Each connection is handled on its own task;
    /// in-flight splices run to completion on shutdown.
    pub async fn run(self, cancel: CancellationToken) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            trace!(%peer, "gateway connection accepted");
                            let db = self.db.clone();
                            let pool = self.pool.clone();
                            tokio::spawn(async move {
                                handle_connection(db, pool, stream).await;
                            });
                        }
                        Err(e) => warn!(error = %e, "gateway accept failed"),
                    }
                }
                _ = cancel.cancelled() => {
                    info!("SOCKS5 gateway shutting down");
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_connection(db: DbContext, pool: Arc<ProxyPool>, mut client: TcpStream) {
    if let Err(e) = socks5::serve_handshake(&mut client).await {
        trace!(error = %e, "gateway handshake failed");
        return;
    }

    let target = match socks5::read_connect_request(&mut client).await {
        Ok(Ok(target)) => target,
        Ok(Err(refusal)) => {
            let _ = socks5::write_reply(&mut client, refusal).await;
            return;
        }
        Err(e) => {
            trace!(error = %e, "gateway request parse failed");
            return;
        }
    };

    let mut tried: Vec<Upstream> = Vec::new();
    while tried.len() < MAX_DIAL_ATTEMPTS {
        let upstream = match pool.next() {
            Ok(upstream) => upstream,
            Err(_) => break,
        };
        if tried.contains(&upstream) {
            if tried.len() >= pool.size() {
                // Fewer distinct upstreams than attempts; nothing new left.
                break;
            }
            continue;
        }

        match socks5::connect_via(&upstream.addr(), &target, DIAL_TIMEOUT).await {
            Ok(mut remote) => {
                if socks5::write_reply(&mut client, Reply::Success).await.is_err() {
                    return;
                }
                debug!(upstream = %upstream, target = %target, "gateway splice established");
                if let Err(e) = db.proxies().record_use(&upstream.ip, upstream.port as i32).await {
                    warn!(error = ?e, "failed to record proxy use");
                }
                let _ = tokio::io::copy_bidirectional(&mut client, &mut remote).await;
                return;
            }
            Err(e) => {
                debug!(upstream = %upstream, error = %e, "upstream dial failed, rotating");
                if let Err(e) = db
                    .proxies()
                    .mark_failure(&upstream.ip, upstream.port as i32)
                    .await
                {
                    warn!(error = ?e, "failed to record proxy failure");
                }
                tried.push(upstream);
            }
        }
    }

    let refusal = if tried.is_empty() {
        // Never had an upstream to try.
        Reply::ServerFailure
    } else {
        Reply::HostUnreachable
    };
    let _ = socks5::write_reply(&mut client, refusal).await;
}
