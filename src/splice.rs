//! Splice core
//!
//! Accepts client connections, optionally terminates TLS, dials the
//! backend, runs the Guacamole prelude when the listener speaks RDP, then
//! copies bytes bidirectionally while tapping both directions into a
//! session recorder.

use crate::config::{GatewayConfig, Protocol, TlsMode};
use crate::guacamole::{handshake, NegotiationSettings};
use crate::recorder::SessionRecorder;
use crate::tls;
use log::{debug, error, info, warn};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use uuid::Uuid;

/// A boxed, owned duplex connection. Used so the splice pipeline is
/// identical whether the underlying transport is a bare `TcpStream` or a
/// `tokio_rustls` TLS stream.
pub type BoxedConn = Pin<Box<dyn AsyncReadWrite + Send>>;

pub trait AsyncReadWrite: AsyncRead + AsyncWrite {}
impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}

/// Run the splice listener until the process is shut down. Bind failure is
/// fatal: the splice path is this gateway's primary purpose.
pub async fn run_listener(config: Arc<GatewayConfig>) -> io::Result<()> {
    let listener = TcpListener::bind(&config.listener.bind_addr).await?;
    info!("splice listener bound on {}", config.listener.bind_addr);

    let acceptor = match config.listener.tls {
        TlsMode::Off => None,
        TlsMode::EphemeralSelfSigned => {
            let host = config.listener.bind_addr.split(':').next().unwrap_or("0.0.0.0");
            let sans = vec![host.to_string(), "localhost".to_string()];
            Some(tls::ephemeral_acceptor(sans).map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?)
        }
    };

    loop {
        let (client_stream, peer_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("accept failed: {}", e);
                continue;
            }
        };
        debug!("accepted connection from {}", peer_addr);

        let config = config.clone();
        let acceptor = acceptor.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(client_stream, config, acceptor).await {
                warn!("session from {} ended with error: {}", peer_addr, e);
            }
        });
    }
}

async fn handle_connection(
    client_stream: TcpStream,
    config: Arc<GatewayConfig>,
    acceptor: Option<tokio_rustls::TlsAcceptor>,
) -> io::Result<()> {
    let client_conn: BoxedConn = match acceptor {
        Some(acceptor) => match acceptor.accept(client_stream).await {
            Ok(tls_stream) => Box::pin(tls_stream),
            Err(e) => {
                warn!("TLS handshake failed: {}", e);
                return Ok(());
            }
        },
        None => Box::pin(client_stream),
    };

    let backend_stream = match TcpStream::connect(&config.listener.target_addr).await {
        Ok(s) => s,
        Err(e) => {
            warn!("failed to dial backend {}: {}", config.listener.target_addr, e);
            return Ok(());
        }
    };

    let (client_conn, backend_conn): (BoxedConn, BoxedConn) = match &config.listener.protocol {
        Protocol::Vnc => (client_conn, Box::pin(backend_stream)),
        Protocol::Rdp { guacd_addr } => {
            let guacd_addr = match guacd_addr {
                Some(addr) => addr.clone(),
                None => {
                    error!("RDP listener configured without guacd_addr");
                    return Ok(());
                }
            };
            let guacd_stream = match TcpStream::connect(&guacd_addr).await {
                Ok(s) => s,
                Err(e) => {
                    warn!("failed to dial guacd {}: {}", guacd_addr, e);
                    return Ok(());
                }
            };

            let settings = NegotiationSettings {
                width: config.guacamole.width,
                height: config.guacamole.height,
                dpi: config.guacamole.dpi,
                display_name: config.guacamole.display_name.clone(),
                timezone: config.guacamole.timezone.clone(),
            };
            let handshake_timeout = config
                .listener
                .handshake_timeout_secs
                .map(tokio::time::Duration::from_secs);

            let spliced = match handshake::negotiate(
                client_conn,
                guacd_stream,
                &config.listener.target_addr,
                &settings,
                handshake_timeout,
            )
            .await
            {
                Ok(spliced) => spliced,
                Err(e) => {
                    warn!("guacd handshake failed: {}", e);
                    return Ok(());
                }
            };

            (
                prepend_leftover(spliced.client.leftover, spliced.client.inner),
                prepend_leftover(spliced.backend.leftover, Box::pin(spliced.backend.inner)),
            )
        }
    };

    let session_id = Uuid::new_v4().to_string();
    let recorder = match SessionRecorder::open(&config.listener.storage_dir, &session_id).await {
        Ok(r) => Arc::new(r),
        Err(e) => {
            warn!("failed to open recorder for session {}: {}", session_id, e);
            return Ok(());
        }
    };

    info!("session {} spliced, recording to {}", session_id, recorder.path().display());
    run_session(client_conn, backend_conn, recorder, config.listener.strict_recording).await;
    Ok(())
}

fn prepend_leftover(leftover: Vec<u8>, inner: BoxedConn) -> BoxedConn {
    if leftover.is_empty() {
        inner
    } else {
        Box::pin(crate::guacamole::LeftoverReader::new(leftover, inner))
    }
}

/// Run the two half-duplex copiers for one session. When either half
/// returns, for any reason, the sibling is aborted so its blocking read
/// unblocks instead of waiting on a peer that may never speak again; only
/// then is the recorder closed.
async fn run_session(
    client_conn: BoxedConn,
    backend_conn: BoxedConn,
    recorder: Arc<SessionRecorder>,
    strict_recording: bool,
) {
    let (client_read, client_write) = tokio::io::split(client_conn);
    let (backend_read, backend_write) = tokio::io::split(backend_conn);

    let mut forward = tokio::spawn(copy_and_tap(
        client_read,
        backend_write,
        recorder.clone(),
        "forward",
        strict_recording,
    ));
    let mut reverse = tokio::spawn(copy_and_tap(
        backend_read,
        client_write,
        recorder.clone(),
        "reverse",
        strict_recording,
    ));

    tokio::select! {
        _ = &mut forward => {
            reverse.abort();
            let _ = reverse.await;
        }
        _ = &mut reverse => {
            forward.abort();
            let _ = forward.await;
        }
    }

    if let Err(e) = recorder.close().await {
        warn!("failed to close recorder cleanly: {}", e);
    }
}

/// Read from `reader` until EOF, writing each chunk to the peer socket and
/// to the recorder. In the default (non-strict) mode a recorder write
/// failure is logged but never blocks forward progress on the peer; in
/// strict mode it tears down this half of the session.
async fn copy_and_tap<R, W>(
    mut reader: R,
    mut peer: W,
    recorder: Arc<SessionRecorder>,
    direction: &'static str,
    strict_recording: bool,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; 32 * 1024];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("{} half ended: {}", direction, e);
                break;
            }
        };

        if let Err(e) = peer.write_all(&buf[..n]).await {
            debug!("{} half peer write failed: {}", direction, e);
            return;
        }

        if let Err(e) = recorder.write(&buf[..n]).await {
            warn!("{} recorder write failed: {}", direction, e);
            if strict_recording {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::io::duplex;

    #[tokio::test]
    async fn copy_and_tap_forwards_bytes_and_records_them() {
        let dir = tempdir().unwrap();
        let recorder = Arc::new(SessionRecorder::open(dir.path(), "sess").await.unwrap());

        let (reader_side, mut test_writer) = duplex(1024);
        let (peer_side, mut test_reader) = duplex(1024);

        test_writer.write_all(b"hello world").await.unwrap();
        drop(test_writer);

        copy_and_tap(reader_side, peer_side, recorder.clone(), "forward", false).await;

        let mut out = vec![0u8; 64];
        let n = test_reader.read(&mut out).await.unwrap();
        assert_eq!(&out[..n], b"hello world");

        recorder.close().await.unwrap();
        let recorded = std::fs::read(recorder.path()).unwrap();
        assert_eq!(recorded, b"hello world");
    }

    #[tokio::test]
    async fn copy_and_tap_tolerates_recorder_close_in_non_strict_mode() {
        let dir = tempdir().unwrap();
        let recorder = Arc::new(SessionRecorder::open(dir.path(), "sess2").await.unwrap());
        recorder.close().await.unwrap();

        let (reader_side, mut test_writer) = duplex(1024);
        let (peer_side, mut test_reader) = duplex(1024);

        test_writer.write_all(b"still flows").await.unwrap();
        drop(test_writer);

        copy_and_tap(reader_side, peer_side, recorder.clone(), "forward", false).await;

        let mut out = vec![0u8; 64];
        let n = test_reader.read(&mut out).await.unwrap();
        assert_eq!(&out[..n], b"still flows");
    }
}
