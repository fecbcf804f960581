//! Minimal SOCKS5 wire protocol (RFC 1928 subset).
//!
//! The gateway only speaks the slice of the protocol the scraper fleet
//! needs: no-auth negotiation, the CONNECT command, and IPv4/domain/IPv6
//! request addresses. Replies always carry the dummy bound address
//! `0.0.0.0:0`. Both sides of the gateway live here: the server-side
//! handshake for accepted clients and the client-side dial through an
//! upstream proxy.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

pub const VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_NO_ACCEPTABLE: u8 = 0xFF;
const CMD_CONNECT: u8 = 0x01;
const ATYP_V4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_V6: u8 = 0x04;

/// SOCKS5 reply codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reply {
    Success = 0x00,
    ServerFailure = 0x01,
    NotAllowed = 0x02,
    NetworkUnreachable = 0x03,
    HostUnreachable = 0x04,
    ConnectionRefused = 0x05,
    TtlExpired = 0x06,
    CommandNotSupported = 0x07,
    AddressTypeNotSupported = 0x08,
}

/// Destination requested by a CONNECT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    Ip(SocketAddr),
    Domain(String, u16),
}

impl std::fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ip(addr) => write!(f, "{addr}"),
            Self::Domain(host, port) => write!(f, "{host}:{port}"),
        }
    }
}

fn protocol_error(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_owned())
}

/// Server side: negotiate the greeting, accepting only "no auth".
pub async fn serve_handshake<S>(stream: &mut S) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let version = stream.read_u8().await?;
    if version != VERSION {
        return Err(protocol_error("unsupported SOCKS version"));
    }
    let nmethods = stream.read_u8().await? as usize;
    let mut methods = vec![0u8; nmethods];
    stream.read_exact(&mut methods).await?;

    if !methods.contains(&METHOD_NO_AUTH) {
        stream.write_all(&[VERSION, METHOD_NO_ACCEPTABLE]).await?;
        return Err(protocol_error("client offered no supported auth method"));
    }
    stream.write_all(&[VERSION, METHOD_NO_AUTH]).await?;
    Ok(())
}

/// Server side: parse the request that follows the greeting.
///
/// Returns `Ok(Err(reply))` for protocol-level refusals (non-CONNECT
/// commands, unknown address types) so the caller can send the reply before
/// closing.
pub async fn read_connect_request<S>(stream: &mut S) -> io::Result<Result<TargetAddr, Reply>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    let [version, command, _reserved, atyp] = header;

    if version != VERSION {
        return Err(protocol_error("unsupported SOCKS version"));
    }
    if command != CMD_CONNECT {
        return Ok(Err(Reply::CommandNotSupported));
    }

    let target = match atyp {
        ATYP_V4 => {
            let mut octets = [0u8; 4];
            stream.read_exact(&mut octets).await?;
            let port = stream.read_u16().await?;
            TargetAddr::Ip(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), port))
        }
        ATYP_DOMAIN => {
            let len = stream.read_u8().await? as usize;
            let mut name = vec![0u8; len];
            stream.read_exact(&mut name).await?;
            let port = stream.read_u16().await?;
            let host = String::from_utf8(name)
                .map_err(|_| protocol_error("domain name is not valid UTF-8"))?;
            TargetAddr::Domain(host, port)
        }
        ATYP_V6 => {
            let mut octets = [0u8; 16];
            stream.read_exact(&mut octets).await?;
            let port = stream.read_u16().await?;
            TargetAddr::Ip(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port))
        }
        _ => return Ok(Err(Reply::AddressTypeNotSupported)),
    };

    Ok(Ok(target))
}

/// Server side: send a reply with the dummy bound address `0.0.0.0:0`.
pub async fn write_reply<S>(stream: &mut S, reply: Reply) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream
        .write_all(&[VERSION, reply as u8, 0x00, ATYP_V4, 0, 0, 0, 0, 0, 0])
        .await?;
    stream.flush().await
}

fn encode_target(buf: &mut Vec<u8>, target: &TargetAddr) {
    match target {
        TargetAddr::Ip(SocketAddr::V4(addr)) => {
            buf.push(ATYP_V4);
            buf.extend_from_slice(&addr.ip().octets());
            buf.extend_from_slice(&addr.port().to_be_bytes());
        }
        TargetAddr::Ip(SocketAddr::V6(addr)) => {
            buf.push(ATYP_V6);
            buf.extend_from_slice(&addr.ip().octets());
            buf.extend_from_slice(&addr.port().to_be_bytes());
        }
        TargetAddr::Domain(host, port) => {
            buf.push(ATYP_DOMAIN);
            buf.push(host.len().min(255) as u8);
            buf.extend_from_slice(&host.as_bytes()[..host.len().min(255)]);
            buf.extend_from_slice(&port.to_be_bytes());
        }
    }
}

/// Client side: dial `target` through the SOCKS5 proxy at `upstream`.
///
/// The whole exchange (TCP connect, greeting, CONNECT round-trip) is bounded
/// by `timeout`.
pub async fn connect_via(
    upstream: &str,
    target: &TargetAddr,
    timeout: Duration,
) -> io::Result<TcpStream> {
    tokio::time::timeout(timeout, async {
        let mut stream = TcpStream::connect(upstream).await?;
        handshake_via(&mut stream, target).await?;
        Ok(stream)
    })
    .await
    .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "upstream dial timed out"))?
}

async fn handshake_via<S>(stream: &mut S, target: &TargetAddr) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&[VERSION, 1, METHOD_NO_AUTH]).await?;
    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await?;
    if choice != [VERSION, METHOD_NO_AUTH] {
        return Err(protocol_error("upstream rejected no-auth"));
    }

    let mut request = vec![VERSION, CMD_CONNECT, 0x00];
    encode_target(&mut request, target);
    stream.write_all(&request).await?;

    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    let [version, code, _reserved, atyp] = header;
    if version != VERSION {
        return Err(protocol_error("upstream sent bad reply version"));
    }

    // Consume the bound address even though we never use it.
    match atyp {
        ATYP_V4 => {
            let mut skip = [0u8; 6];
            stream.read_exact(&mut skip).await?;
        }
        ATYP_V6 => {
            let mut skip = [0u8; 18];
            stream.read_exact(&mut skip).await?;
        }
        ATYP_DOMAIN => {
            let len = stream.read_u8().await? as usize;
            let mut skip = vec![0u8; len + 2];
            stream.read_exact(&mut skip).await?;
        }
        _ => return Err(protocol_error("upstream sent bad address type")),
    }

    if code != Reply::Success as u8 {
        return Err(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            format!("upstream refused connect (code {code})"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn handshake_accepts_no_auth() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let server_task = tokio::spawn(async move { serve_handshake(&mut server).await });

        client.write_all(&[VERSION, 1, METHOD_NO_AUTH]).await.unwrap();
        let mut choice = [0u8; 2];
        client.read_exact(&mut choice).await.unwrap();
        assert_eq!(choice, [VERSION, METHOD_NO_AUTH]);
        server_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn handshake_rejects_auth_only_clients() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let server_task = tokio::spawn(async move { serve_handshake(&mut server).await });

        // Client only offers username/password (0x02).
        client.write_all(&[VERSION, 1, 0x02]).await.unwrap();
        let mut choice = [0u8; 2];
        client.read_exact(&mut choice).await.unwrap();
        assert_eq!(choice, [VERSION, METHOD_NO_ACCEPTABLE]);
        assert!(server_task.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn connect_request_parses_domain() {
        let (mut client, mut server) = tokio::io::duplex(256);
        let server_task = tokio::spawn(async move { read_connect_request(&mut server).await });

        let mut req = vec![VERSION, CMD_CONNECT, 0x00];
        encode_target(&mut req, &TargetAddr::Domain("maps.example.com".into(), 443));
        client.write_all(&req).await.unwrap();

        let target = server_task.await.unwrap().unwrap().unwrap();
        assert_eq!(target, TargetAddr::Domain("maps.example.com".into(), 443));
    }

    #[tokio::test]
    async fn connect_request_parses_ipv4_and_ipv6() {
        for target in [
            TargetAddr::Ip("93.184.216.34:80".parse().unwrap()),
            TargetAddr::Ip("[2606:2800:220:1:248:1893:25c8:1946]:443".parse().unwrap()),
        ] {
            let (mut client, mut server) = tokio::io::duplex(256);
            let expected = target.clone();
            let server_task = tokio::spawn(async move { read_connect_request(&mut server).await });

            let mut req = vec![VERSION, CMD_CONNECT, 0x00];
            encode_target(&mut req, &target);
            client.write_all(&req).await.unwrap();

            let parsed = server_task.await.unwrap().unwrap().unwrap();
            assert_eq!(parsed, expected);
        }
    }

    #[tokio::test]
    async fn non_connect_commands_are_refused() {
        let (mut client, mut server) = tokio::io::duplex(256);
        let server_task = tokio::spawn(async move { read_connect_request(&mut server).await });

        // BIND (0x02) is not supported.
        let mut req = vec![VERSION, 0x02, 0x00];
        encode_target(&mut req, &TargetAddr::Domain("example.com".into(), 80));
        client.write_all(&req).await.unwrap();

        let refusal = server_task.await.unwrap().unwrap().unwrap_err();
        assert_eq!(refusal, Reply::CommandNotSupported);
    }

    #[tokio::test]
    async fn reply_wire_format_uses_dummy_bind_addr() {
        let (mut client, mut server) = tokio::io::duplex(64);
        write_reply(&mut server, Reply::ServerFailure).await.unwrap();

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[0], VERSION);
        assert_eq!(reply[1], 0x01);
        assert_eq!(&reply[3..], &[ATYP_V4, 0, 0, 0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn client_dial_succeeds_against_compliant_upstream() {
        let (mut client, mut upstream) = tokio::io::duplex(256);
        let upstream_task = tokio::spawn(async move {
            serve_handshake(&mut upstream).await.unwrap();
            let target = read_connect_request(&mut upstream).await.unwrap().unwrap();
            write_reply(&mut upstream, Reply::Success).await.unwrap();
            target
        });

        handshake_via(&mut client, &TargetAddr::Domain("example.com".into(), 80))
            .await
            .unwrap();
        let seen = upstream_task.await.unwrap();
        assert_eq!(seen, TargetAddr::Domain("example.com".into(), 80));
    }

    #[tokio::test]
    async fn client_dial_fails_on_upstream_refusal() {
        let (mut client, mut upstream) = tokio::io::duplex(256);
        tokio::spawn(async move {
            serve_handshake(&mut upstream).await.unwrap();
            let _ = read_connect_request(&mut upstream).await.unwrap();
            write_reply(&mut upstream, Reply::ConnectionRefused)
                .await
                .unwrap();
        });

        let err = handshake_via(&mut client, &TargetAddr::Domain("example.com".into(), 80))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    }
}
