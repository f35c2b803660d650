//! Per-connection lifecycle: the framer/dispatcher loop, the
//! inactivity timer, and XMODEM hand-off (spec.md §4.6).
//!
//! Admission control (the `MAX_CONNS = 2` gate) lives in
//! [`crate::server`], which only spawns a connection's `handle` future
//! once a slot has actually been acquired; this module is concerned
//! purely with what happens to one already-admitted connection.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::dispatcher::{self, DispatchOutcome};
use crate::framer::Framer;
use crate::server::Services;
use crate::xmodem;

/// Close a connection that has received no bytes for this long
/// (spec.md §4.6).
const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Drives one accepted connection to completion: reads bytes through
/// the [`Framer`], dispatches each framed command, and tears down on
/// client close, I/O error, idle timeout, or server shutdown —
/// whichever comes first. Every exit path falls through to the end of
/// this function, so the caller's admission-slot guard is always
/// dropped on return.
pub async fn handle(
    stream: TcpStream,
    addr: SocketAddr,
    services: std::sync::Arc<Services>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut framer = Framer::new();
    let mut cwd = "/".to_string();

    info!(%addr, "connection accepted");

    loop {
        let mut byte = [0u8; 1];
        let read_outcome = tokio::select! {
            biased;
            _ = shutdown.recv() => {
                info!(%addr, "connection closing: server shutdown");
                break;
            }
            result = tokio::time::timeout(IDLE_TIMEOUT, read_half.read(&mut byte)) => result,
        };

        let n = match read_outcome {
            Ok(Ok(n)) => n,
            Ok(Err(err)) => {
                warn!(%addr, %err, "connection closing: socket I/O error");
                break;
            }
            Err(_elapsed) => {
                info!(%addr, "connection closing: idle timeout");
                break;
            }
        };
        if n == 0 {
            info!(%addr, "connection closing: client closed");
            break;
        }

        let instant_prefixes = services.catalog.instant_prefixes();
        let Some(command) = framer.push_byte(byte[0], instant_prefixes) else {
            continue;
        };

        let decision = dispatcher::dispatch(
            &command,
            &mut cwd,
            &services.catalog,
            services.vfs.as_ref(),
            &services.time_anchor,
        )
        .await;

        match decision {
            DispatchOutcome::Reply(bytes) => {
                if write_half.write_all(&bytes).await.is_err() {
                    warn!(%addr, "connection closing: write failed");
                    break;
                }
            }
            DispatchOutcome::BeginUpload { path } => {
                let result =
                    xmodem::run_transfer(&mut read_half, &mut write_half, |transport| {
                        xmodem::receive_file(transport)
                    })
                    .await;
                let reply: Option<&[u8]> = match &result {
                    Ok((_metadata, outcome)) if outcome.md5_match => {
                        if services.vfs.upload_accept(&cwd, &path, outcome.bytes.clone()).await.is_err() {
                            Some(b"error:transfer failed\n")
                        } else {
                            None
                        }
                    }
                    Ok(_) => Some(b"error:md5 mismatch\n"),
                    Err(_) => Some(b"error:transfer failed\n"),
                };
                if let Some(reply) = reply {
                    if write_half.write_all(reply).await.is_err() {
                        break;
                    }
                }
            }
            DispatchOutcome::BeginDownload { path, bytes, md5 } => {
                let result =
                    xmodem::run_transfer(&mut read_half, &mut write_half, move |transport| {
                        xmodem::send_file(transport, &path, &bytes, &md5)
                    })
                    .await;
                if result.is_err() && write_half.write_all(b"error:transfer failed\n").await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = write_half.shutdown().await;
}
