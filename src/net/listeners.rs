//! Peering connections: accept loops, outbound dialing, and the per
//! connection reader/writer tasks.

use super::transport::{read_frame, write_frame, Hello, NodeMessage};
use crate::core::error::{make_error, make_error_msg, BrokerResult, ErrorCode};
use crate::core::id::NetworkInfo;
use crate::endpoint::CoreMsg;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Upper bound for one connection attempt including the handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Establish a TCP connection, optionally retrying.
///
/// A zero `retry` means a single attempt. Otherwise attempts repeat with
/// `retry` between them until one succeeds.
pub(crate) async fn connect(host: &str, port: u16, retry: Duration) -> BrokerResult<TcpStream> {
    loop {
        match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => {
                let _ = stream.set_nodelay(true);
                return Ok(stream);
            }
            Ok(Err(e)) => {
                if retry.is_zero() {
                    return Err(make_error_msg(ErrorCode::PeerUnavailable, e.to_string()));
                }
                debug!(host, port, error = %e, "connect failed, retrying");
            }
            Err(_) => {
                if retry.is_zero() {
                    return Err(make_error(ErrorCode::PeerTimeout));
                }
                debug!(host, port, "connect timed out, retrying");
            }
        }
        tokio::time::sleep(retry).await;
    }
}

/// Exchange hellos over a fresh stream. Both sides send first and read
/// second, so the exchange cannot deadlock.
pub(crate) async fn handshake<S>(stream: &mut S, ours: Hello) -> BrokerResult<Hello>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let exchange = async {
        write_frame(stream, &NodeMessage::Hello(ours)).await?;
        read_frame(stream).await
    };
    let theirs = match tokio::time::timeout(CONNECT_TIMEOUT, exchange).await {
        Ok(Ok(NodeMessage::Hello(hello))) => hello,
        Ok(Ok(_)) => {
            return Err(make_error_msg(
                ErrorCode::PeerIncompatible,
                "peer did not start with a hello",
            ))
        }
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(make_error(ErrorCode::PeerDisconnectDuringHandshake))
        }
        Ok(Err(e)) => return Err(make_error_msg(ErrorCode::PeerIncompatible, e.to_string())),
        Err(_) => return Err(make_error(ErrorCode::PeerTimeout)),
    };
    if !theirs.compatible() {
        return Err(make_error_msg(
            ErrorCode::PeerIncompatible,
            format!("magic {:#x}, version {}", theirs.magic, theirs.version),
        ));
    }
    Ok(theirs)
}

/// Spawn the reader and writer tasks for an established, handshaken
/// connection and register it with the core.
pub(crate) fn spawn_connection<S>(
    stream: S,
    theirs: Hello,
    conn_id: u64,
    info: NetworkInfo,
    core: mpsc::UnboundedSender<CoreMsg>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<NodeMessage>();
    let _ = core.send(CoreMsg::PeerUp {
        conn_id,
        node: theirs.node,
        info,
        tx,
    });

    let (mut read_half, mut write_half) = tokio::io::split(stream);

    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, NodeMessage::Bye);
            if let Err(e) = write_frame(&mut write_half, &message).await {
                debug!(conn_id, error = %e, "write failed, closing connection");
                break;
            }
            if closing {
                break;
            }
        }
        // Dropping the write half sends FIN; the remote reader sees EOF.
    });

    tokio::spawn(async move {
        let lost = loop {
            match read_frame(&mut read_half).await {
                Ok(NodeMessage::Data { message, ttl, dst }) => {
                    if core
                        .send(CoreMsg::PublishFromPeer {
                            message,
                            ttl,
                            dst,
                            from: conn_id,
                        })
                        .is_err()
                    {
                        break false;
                    }
                }
                Ok(NodeMessage::Store { message, ttl }) => {
                    if core
                        .send(CoreMsg::StoreFromPeer {
                            message,
                            ttl,
                            from: conn_id,
                        })
                        .is_err()
                    {
                        break false;
                    }
                }
                Ok(NodeMessage::Bye) => break false,
                Ok(NodeMessage::Hello(_)) => {
                    warn!(conn_id, "unexpected hello mid-connection");
                }
                Err(e) => {
                    debug!(conn_id, error = %e, "connection closed");
                    break true;
                }
            }
        };
        let _ = core.send(CoreMsg::PeerDown { conn_id, lost });
    });
}

/// Parameters shared by all connections of one endpoint.
#[derive(Clone)]
pub(crate) struct ListenerContext {
    pub hello: Hello,
    pub core: mpsc::UnboundedSender<CoreMsg>,
    #[cfg(feature = "tls")]
    pub tls: Option<super::tls::TlsContext>,
}

/// Accept loop for one bound listener.
pub(crate) async fn accept_loop(
    listener: TcpListener,
    ctx: ListenerContext,
    next_conn_id: std::sync::Arc<std::sync::atomic::AtomicU64>,
) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        let _ = stream.set_nodelay(true);
        let conn_id = next_conn_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let info = NetworkInfo::new(addr.ip().to_string(), addr.port());
        let ctx = ctx.clone();
        tokio::spawn(async move {
            #[cfg(feature = "tls")]
            if let Some(tls) = ctx.tls.clone() {
                match tls.acceptor.accept(stream).await {
                    Ok(mut stream) => match handshake(&mut stream, ctx.hello).await {
                        Ok(theirs) => {
                            info!(conn_id, peer = %info, "accepted TLS peering");
                            spawn_connection(stream, theirs, conn_id, info, ctx.core);
                        }
                        Err(e) => {
                            debug!(conn_id, error = %e, "inbound handshake failed");
                            let _ = ctx.core.send(CoreMsg::EmitError(e));
                        }
                    },
                    Err(e) => {
                        debug!(conn_id, error = %e, "TLS accept failed");
                        let _ = ctx.core.send(CoreMsg::EmitError(make_error_msg(
                            ErrorCode::PeerIncompatible,
                            e.to_string(),
                        )));
                    }
                }
                return;
            }
            let mut stream = stream;
            match handshake(&mut stream, ctx.hello).await {
                Ok(theirs) => {
                    info!(conn_id, peer = %info, "accepted peering");
                    spawn_connection(stream, theirs, conn_id, info, ctx.core);
                }
                Err(e) => {
                    debug!(conn_id, error = %e, "inbound handshake failed");
                    let _ = ctx.core.send(CoreMsg::EmitError(e));
                }
            }
        });
    }
}
