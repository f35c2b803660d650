//! The thread-safe bridge between the blocking XMODEM worker thread
//! and the owning connection's socket (spec.md §4.3/§5).
//!
//! The engine itself only knows about the [`Transport`] trait; the
//! production implementation, [`ChannelTransport`], is built on
//! `async_channel` (whose `send_blocking`/`recv_blocking` work from a
//! plain OS thread with no reactor of its own) plus two small pump
//! tasks that actually touch the `TcpStream` halves on the Tokio side.

use std::collections::VecDeque;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

#[derive(Debug, Error)]
pub enum XmodemError {
    #[error("peer closed the connection")]
    PeerClosed,
    #[error("handshake failed: no response after {0} polls")]
    HandshakeFailed(u32),
    #[error("transfer aborted after {0} retransmit attempts")]
    RetriesExhausted(u32),
    #[error("peer sent cancel (CAN)")]
    Cancelled,
    #[error("md5 mismatch")]
    Md5Mismatch,
    #[error("malformed metadata block")]
    BadMetadata,
}

/// Byte-level transport the XMODEM engine drives. Implemented by
/// [`ChannelTransport`] in production and by an in-memory pair in
/// tests (see `xmodem::tests`).
pub trait Transport {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), XmodemError>;
    fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>, XmodemError>;
}

/// Production transport: reads/writes flow through `async_channel`
/// endpoints pumped by Tokio tasks, while the engine itself runs on a
/// `spawn_blocking` worker and drives this type synchronously.
pub struct ChannelTransport {
    handle: tokio::runtime::Handle,
    outbound: async_channel::Sender<Vec<u8>>,
    inbound: async_channel::Receiver<Vec<u8>>,
    buffer: VecDeque<u8>,
}

impl ChannelTransport {
    pub fn new(
        handle: tokio::runtime::Handle,
        outbound: async_channel::Sender<Vec<u8>>,
        inbound: async_channel::Receiver<Vec<u8>>,
    ) -> Self {
        Self { handle, outbound, inbound, buffer: VecDeque::new() }
    }
}

impl Transport for ChannelTransport {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), XmodemError> {
        self.outbound.send_blocking(bytes.to_vec()).map_err(|_| XmodemError::PeerClosed)
    }

    fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>, XmodemError> {
        if let Some(byte) = self.buffer.pop_front() {
            return Ok(Some(byte));
        }
        let inbound = self.inbound.clone();
        let outcome =
            self.handle.block_on(async move { tokio::time::timeout(timeout, inbound.recv()).await });
        match outcome {
            Ok(Ok(chunk)) => {
                self.buffer.extend(chunk);
                Ok(self.buffer.pop_front())
            }
            Ok(Err(_closed)) => Err(XmodemError::PeerClosed),
            Err(_elapsed) => Ok(None),
        }
    }
}

/// Drives one XMODEM transfer over `read_half`/`write_half` by running
/// `job` (the blocking engine call) on a `spawn_blocking` worker while
/// this async function pumps bytes between the worker's channel
/// endpoints and the real socket halves.
///
/// The halves are only *borrowed* for the duration of the call — once
/// `job` returns they are handed back intact so the connection's
/// line-mode command loop can keep using the same `TcpStream`
/// afterward (spec.md §4.3: "ownership transfers for the duration of
/// the transfer and returns on completion").
pub async fn run_transfer<T, F>(
    read_half: &mut OwnedReadHalf,
    write_half: &mut OwnedWriteHalf,
    job: F,
) -> Result<T, XmodemError>
where
    F: FnOnce(&mut ChannelTransport) -> Result<T, XmodemError> + Send + 'static,
    T: Send + 'static,
{
    let (to_socket_tx, to_socket_rx) = async_channel::bounded::<Vec<u8>>(4);
    let (from_socket_tx, from_socket_rx) = async_channel::bounded::<Vec<u8>>(4);
    let handle = tokio::runtime::Handle::current();
    let mut transport = ChannelTransport::new(handle, to_socket_tx, from_socket_rx);

    let worker = tokio::task::spawn_blocking(move || job(&mut transport));
    tokio::pin!(worker);

    let mut read_buf = [0u8; 4096];
    loop {
        tokio::select! {
            biased;
            joined = &mut worker => {
                return joined.map_err(|_| XmodemError::PeerClosed)?;
            }
            outgoing = to_socket_rx.recv() => {
                if let Ok(chunk) = outgoing {
                    if write_half.write_all(&chunk).await.is_err() {
                        return Err(XmodemError::PeerClosed);
                    }
                }
            }
            incoming = read_half.read(&mut read_buf) => {
                match incoming {
                    Ok(0) | Err(_) => from_socket_tx.close(),
                    Ok(n) => {
                        let _ = from_socket_tx.send(read_buf[..n].to_vec()).await;
                    }
                }
            }
        }
    }
}
