//! The XMODEM-8K file-transfer engine (spec.md §4.3).
//!
//! Runs to completion synchronously on whatever thread drives it —
//! production callers hand it a [`ChannelTransport`] and run it inside
//! `tokio::task::spawn_blocking` (see [`run_transfer`]), matching the
//! "blocking by contract" requirement of spec.md §5.

mod buffer_pool;
mod crc;
mod frame;
mod transport;

use std::time::Duration;

pub use buffer_pool::BufferPool;
pub use frame::{Block, ControlByte, FrameError, PacketMode, STX_PAYLOAD_LEN};
pub use transport::{run_transfer, ChannelTransport, Transport, XmodemError};

use frame::{pad_to, SOH_PAYLOAD_LEN};

const HANDSHAKE_POLLS: u32 = 16;
const HANDSHAKE_POLL_INTERVAL: Duration = Duration::from_secs(1);
const MAX_BLOCK_RETRIES: u32 = 10;
const MAX_EOT_RETRIES: u32 = 10;
const BODY_BYTE_TIMEOUT: Duration = Duration::from_secs(5);
const NEXT_BLOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// The metadata carried in block 0: filename and MD5 digest, the
/// fields the receiver must parse per spec.md §4.3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub filename: String,
    pub md5: String,
    pub length: Option<u64>,
}

/// The result of a completed transfer, per spec.md §4.3's "Completion
/// contract": `(ok, bytes, md5_match)`.
#[derive(Debug, Clone)]
pub struct XmodemOutcome {
    pub ok: bool,
    pub bytes: Vec<u8>,
    pub md5_match: bool,
}

fn encode_metadata_block(meta: &Metadata) -> Vec<u8> {
    let mut text = format!("{}\0md5={}\0", meta.filename, meta.md5);
    if let Some(length) = meta.length {
        text.push_str(&format!("length={}\0", length));
    }
    pad_to(text.into_bytes(), SOH_PAYLOAD_LEN)
}

fn decode_metadata_block(payload: &[u8]) -> Result<Metadata, XmodemError> {
    let trimmed_len = payload.iter().position(|&b| b == frame::PAD_BYTE).unwrap_or(payload.len());
    let text = std::str::from_utf8(&payload[..trimmed_len]).map_err(|_| XmodemError::BadMetadata)?;
    let mut fields = text.split('\0').filter(|s| !s.is_empty());
    let filename = fields.next().ok_or(XmodemError::BadMetadata)?.to_string();
    let mut md5 = None;
    let mut length = None;
    for field in fields {
        if let Some(value) = field.strip_prefix("md5=") {
            md5 = Some(value.to_string());
        } else if let Some(value) = field.strip_prefix("length=") {
            length = value.parse().ok();
        }
    }
    let md5 = md5.ok_or(XmodemError::BadMetadata)?;
    Ok(Metadata { filename, md5, length })
}

/// Sender-side handshake (spec.md §4.3): wait for the peer's first
/// byte, polling up to [`HANDSHAKE_POLLS`] times with a one-second
/// inter-poll timeout. `C` selects CRC mode, `NAK` selects checksum
/// mode; anything else (including silence) just consumes a poll.
fn sender_handshake(transport: &mut dyn Transport) -> Result<PacketMode, XmodemError> {
    for _ in 0..HANDSHAKE_POLLS {
        match transport.read_byte(HANDSHAKE_POLL_INTERVAL)? {
            Some(byte) if byte == ControlByte::C as u8 => return Ok(PacketMode::Crc),
            Some(byte) if byte == ControlByte::Nak as u8 => return Ok(PacketMode::Checksum),
            _ => continue,
        }
    }
    Err(XmodemError::HandshakeFailed(HANDSHAKE_POLLS))
}

/// Receiver-side handshake: send `C` once a second hoping for a
/// CRC-capable sender; if the peer only ever answers with `NAK`
/// (declining CRC), switch the announce byte to `NAK` and keep
/// polling under checksum mode. Returns the negotiated mode and the
/// first data-block mark byte observed (`SOH`/`STX`), already
/// consumed off the wire.
fn receiver_handshake(transport: &mut dyn Transport) -> Result<(PacketMode, u8), XmodemError> {
    let mut mode = PacketMode::Crc;
    for _ in 0..HANDSHAKE_POLLS {
        let announce = if mode == PacketMode::Crc { ControlByte::C } else { ControlByte::Nak };
        transport.write_bytes(&[announce as u8])?;
        if let Some(byte) = transport.read_byte(HANDSHAKE_POLL_INTERVAL)? {
            if byte == ControlByte::Soh as u8 || byte == ControlByte::Stx as u8 {
                return Ok((mode, byte));
            }
            if byte == ControlByte::Nak as u8 && mode == PacketMode::Crc {
                mode = PacketMode::Checksum;
            }
            // Any other stray byte (including a proposed `lz` option,
            // spec.md §4.3) is ignored — we decline silently by simply
            // not adopting it and continuing to poll.
        }
    }
    Err(XmodemError::HandshakeFailed(HANDSHAKE_POLLS))
}

fn payload_len_for_mark(mark: u8) -> usize {
    if mark == ControlByte::Stx as u8 {
        STX_PAYLOAD_LEN
    } else {
        SOH_PAYLOAD_LEN
    }
}

/// Reads the rest of a block given its already-consumed mark byte.
/// `Ok(None)` means the frame was truncated or failed its integrity
/// check — the caller NAKs and waits for a retransmit rather than
/// treating it as a hard error.
fn read_block_after_mark(
    transport: &mut dyn Transport,
    mark: u8,
    mode: PacketMode,
) -> Result<Option<Block>, XmodemError> {
    let payload_len = payload_len_for_mark(mark);
    let trailer_len = match mode {
        PacketMode::Crc => 2,
        PacketMode::Checksum => 1,
    };
    let total = 2 + payload_len + trailer_len;
    let mut body = Vec::with_capacity(total);
    for _ in 0..total {
        match transport.read_byte(BODY_BYTE_TIMEOUT)? {
            Some(byte) => body.push(byte),
            None => return Ok(None),
        }
    }
    Ok(Block::decode(&body, payload_len, mode).ok())
}

/// Sends `contents` under the path name `filename`, running the full
/// XMODEM-8K sender side: handshake, metadata block, data blocks,
/// `EOT`. This is the `download` command's engine half — the server
/// is the sender.
pub fn send_file(
    transport: &mut dyn Transport,
    filename: &str,
    contents: &[u8],
    md5: &str,
) -> Result<XmodemOutcome, XmodemError> {
    let mode = sender_handshake(transport)?;

    let metadata = Metadata { filename: filename.to_string(), md5: md5.to_string(), length: Some(contents.len() as u64) };
    send_block_with_retry(transport, 0, &encode_metadata_block(&metadata), false, mode)?;

    // Data blocks reuse a small pool of 8192-byte buffers instead of
    // allocating one `Vec` per block.
    let pool = BufferPool::new(STX_PAYLOAD_LEN, 2);
    let mut seq = 1u8;
    let mut chunks = contents.chunks(STX_PAYLOAD_LEN).peekable();
    if chunks.peek().is_none() {
        // Even an empty file gets one (empty, padded) data block so the
        // receiver has something to finalize its length against.
        let payload = fill_from_pool(&pool, &[]);
        send_block_with_retry(transport, seq, &payload, true, mode)?;
        pool.release(payload);
    }
    for chunk in chunks {
        let payload = fill_from_pool(&pool, chunk);
        send_block_with_retry(transport, seq, &payload, true, mode)?;
        pool.release(payload);
        seq = seq.wrapping_add(1);
    }

    send_eot_with_retry(transport)?;
    Ok(XmodemOutcome { ok: true, bytes: contents.to_vec(), md5_match: true })
}

/// Checks out a buffer from `pool`, copies `chunk` into it, and pads
/// the remainder with `0x1A`. The caller releases it back afterward.
fn fill_from_pool(pool: &BufferPool, chunk: &[u8]) -> Vec<u8> {
    let mut payload = pool.checkout();
    payload[..chunk.len()].copy_from_slice(chunk);
    for byte in &mut payload[chunk.len()..] {
        *byte = frame::PAD_BYTE;
    }
    payload
}

fn send_block_with_retry(
    transport: &mut dyn Transport,
    seq: u8,
    payload: &[u8],
    use_stx: bool,
    mode: PacketMode,
) -> Result<(), XmodemError> {
    let block = Block { seq, payload: payload.to_vec() };
    let frame = block.encode(use_stx, mode);
    for _ in 0..MAX_BLOCK_RETRIES {
        transport.write_bytes(&frame)?;
        match transport.read_byte(BODY_BYTE_TIMEOUT)? {
            Some(byte) if byte == ControlByte::Ack as u8 => return Ok(()),
            Some(byte) if byte == ControlByte::Can as u8 => return Err(XmodemError::Cancelled),
            _ => continue, // NAK or timeout: retransmit
        }
    }
    let _ = transport.write_bytes(&[ControlByte::Can as u8, ControlByte::Can as u8]);
    Err(XmodemError::RetriesExhausted(MAX_BLOCK_RETRIES))
}

fn send_eot_with_retry(transport: &mut dyn Transport) -> Result<(), XmodemError> {
    for _ in 0..MAX_EOT_RETRIES {
        transport.write_bytes(&[ControlByte::Eot as u8])?;
        match transport.read_byte(BODY_BYTE_TIMEOUT)? {
            Some(byte) if byte == ControlByte::Ack as u8 => return Ok(()),
            _ => continue,
        }
    }
    Err(XmodemError::RetriesExhausted(MAX_EOT_RETRIES))
}

/// Receives a file, running the full XMODEM-8K receiver side:
/// handshake, metadata block, data blocks until `EOT`. This is the
/// `upload` command's engine half — the server is the receiver. The
/// dispatcher is responsible for treating the result as successful
/// only when `outcome.md5_match` is true (spec.md §4.3).
pub fn receive_file(transport: &mut dyn Transport) -> Result<(Metadata, XmodemOutcome), XmodemError> {
    let (mode, first_mark) = receiver_handshake(transport)?;

    let metadata_block = read_block_after_mark(transport, first_mark, mode)?
        .ok_or(XmodemError::BadMetadata)?;
    let metadata = decode_metadata_block(&metadata_block.payload)?;
    transport.write_bytes(&[ControlByte::Ack as u8])?;

    let mut collected = Vec::new();
    let mut expected_seq: u8 = 1;
    let mut last_accepted_seq: u8 = 0;
    let mut consecutive_naks = 0u32;

    loop {
        let mark = match transport.read_byte(NEXT_BLOCK_TIMEOUT)? {
            Some(byte) => byte,
            None => return Err(XmodemError::RetriesExhausted(MAX_BLOCK_RETRIES)),
        };

        if mark == ControlByte::Eot as u8 {
            transport.write_bytes(&[ControlByte::Ack as u8])?;
            break;
        }
        if mark == ControlByte::Can as u8 {
            return Err(XmodemError::Cancelled);
        }
        if mark != ControlByte::Soh as u8 && mark != ControlByte::Stx as u8 {
            continue; // resync: ignore stray bytes between frames
        }

        match read_block_after_mark(transport, mark, mode)? {
            Some(block) if block.seq == expected_seq => {
                collected.extend_from_slice(&block.payload);
                transport.write_bytes(&[ControlByte::Ack as u8])?;
                last_accepted_seq = expected_seq;
                expected_seq = expected_seq.wrapping_add(1);
                consecutive_naks = 0;
            }
            Some(block) if block.seq == last_accepted_seq => {
                // Sender didn't see our previous ACK; re-acknowledge
                // without re-appending the duplicate payload.
                transport.write_bytes(&[ControlByte::Ack as u8])?;
            }
            _ => {
                consecutive_naks += 1;
                if consecutive_naks > MAX_BLOCK_RETRIES {
                    return Err(XmodemError::RetriesExhausted(MAX_BLOCK_RETRIES));
                }
                transport.write_bytes(&[ControlByte::Nak as u8])?;
            }
        }
    }

    if let Some(length) = metadata.length {
        collected.truncate(length as usize);
    }

    let digest = crate::vfs::entry::md5_hex(&collected);
    let md5_match = digest == metadata.md5;
    Ok((metadata.clone(), XmodemOutcome { ok: true, bytes: collected, md5_match }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::{self, RecvTimeoutError};

    /// An in-memory, thread-pair transport used only by tests: each
    /// side's `outbound` is the other side's `inbound`, so a sender
    /// and a receiver engine can be run on two OS threads and talk to
    /// each other without any Tokio runtime.
    struct SyncPairTransport {
        outbound: mpsc::Sender<u8>,
        inbound: mpsc::Receiver<u8>,
    }

    fn make_pair() -> (SyncPairTransport, SyncPairTransport) {
        let (a_to_b_tx, a_to_b_rx) = mpsc::channel();
        let (b_to_a_tx, b_to_a_rx) = mpsc::channel();
        (
            SyncPairTransport { outbound: a_to_b_tx, inbound: b_to_a_rx },
            SyncPairTransport { outbound: b_to_a_tx, inbound: a_to_b_rx },
        )
    }

    impl Transport for SyncPairTransport {
        fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), XmodemError> {
            for &byte in bytes {
                self.outbound.send(byte).map_err(|_| XmodemError::PeerClosed)?;
            }
            Ok(())
        }

        fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>, XmodemError> {
            match self.inbound.recv_timeout(timeout) {
                Ok(byte) => Ok(Some(byte)),
                Err(RecvTimeoutError::Timeout) => Ok(None),
                Err(RecvTimeoutError::Disconnected) => Err(XmodemError::PeerClosed),
            }
        }
    }

    #[test]
    fn metadata_round_trips_through_encode_decode() {
        let meta = Metadata { filename: "part.nc".into(), md5: "deadbeef".into(), length: Some(42) };
        let block = encode_metadata_block(&meta);
        let decoded = decode_metadata_block(&block).unwrap();
        assert_eq!(decoded, meta);
    }

    #[test]
    fn full_transfer_round_trips_bytes_and_md5() {
        let (mut sender_transport, mut receiver_transport) = make_pair();
        let contents = vec![0x42u8; 20_000];
        let md5 = crate::vfs::entry::md5_hex(&contents);
        let filename = "x.bin".to_string();

        let sender_md5 = md5.clone();
        let sender_contents = contents.clone();
        let sender = std::thread::spawn(move || {
            send_file(&mut sender_transport, &filename, &sender_contents, &sender_md5)
        });
        let receiver = std::thread::spawn(move || receive_file(&mut receiver_transport));

        let send_result = sender.join().unwrap().unwrap();
        let (metadata, recv_result) = receiver.join().unwrap().unwrap();

        assert!(send_result.ok);
        assert!(recv_result.ok);
        assert!(recv_result.md5_match);
        assert_eq!(recv_result.bytes, contents);
        assert_eq!(metadata.md5, md5);
        assert_eq!(metadata.length, Some(20_000));
    }

    #[test]
    fn corrupted_contents_fail_md5_match() {
        let (mut sender_transport, mut receiver_transport) = make_pair();
        let contents = vec![0xABu8; 500];
        // Deliberately lie about the digest.
        let wrong_md5 = crate::vfs::entry::md5_hex(b"not the real contents");
        let filename = "bad.bin".to_string();

        let sender_contents = contents.clone();
        let sender =
            std::thread::spawn(move || send_file(&mut sender_transport, &filename, &sender_contents, &wrong_md5));
        let receiver = std::thread::spawn(move || receive_file(&mut receiver_transport));

        sender.join().unwrap().unwrap();
        let (_, recv_result) = receiver.join().unwrap().unwrap();
        assert!(!recv_result.md5_match);
    }

    #[test]
    #[ignore]
    fn handshake_fails_after_all_polls_exhausted_with_silence() {
        let (_silent_peer, mut transport) = make_pair();
        // Nothing is ever written by the silent peer, so every poll
        // times out; this should take ~16 seconds of simulated
        // timeouts. Use a tiny override by constructing the transport
        // directly would require exposing the constants; instead we
        // just assert the sender eventually gives up rather than
        // hanging forever. This test is intentionally slow-bounded by
        // HANDSHAKE_POLLS * HANDSHAKE_POLL_INTERVAL and is marked
        // `#[ignore]` to keep the default test run fast.
        let err = sender_handshake(&mut transport).unwrap_err();
        assert!(matches!(err, XmodemError::HandshakeFailed(16)));
    }
}
