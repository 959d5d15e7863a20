//! Endpoint listener and per-connection protocol handling.

use std::fmt::Write as _;
use std::io;
use std::path::Path;

use exolink_proto::{Command, HEADER_LEN, Header, PAGE_SIZE};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixListener;
use tracing::{info, warn};

/// Acknowledgement byte sent after every well-formed exchange.
const ACK: [u8; 1] = [0x06];

/// Binds `endpoint` and serves connections until killed (or after one
/// connection, with `once`).
///
/// Connections are served strictly one at a time, matching the single
/// debug link a real loader exposes.
pub async fn run(endpoint: &str, once: bool) -> io::Result<()> {
    // A stale socket file from a previous run would make bind fail.
    if Path::new(endpoint).exists() {
        std::fs::remove_file(endpoint)?;
    }
    let listener = UnixListener::bind(endpoint)?;
    info!(endpoint, "listening");

    loop {
        let (stream, _addr) = listener.accept().await?;
        info!("host connected");
        match session(stream).await {
            Ok(()) => info!("session complete"),
            Err(e) => warn!(error = %e, "session aborted"),
        }
        if once {
            return Ok(());
        }
    }
}

/// Speaks the loader side of one connection: read a header, consume the
/// announced payload, acknowledge.
///
/// Protocol violations close the connection without an ACK; the host's
/// unbounded reply wait makes the resulting hang visible on its side.
async fn session(mut stream: impl AsyncRead + AsyncWrite + Unpin) -> io::Result<()> {
    let mut hdr = [0u8; HEADER_LEN];
    stream.read_exact(&mut hdr).await?;
    let header = Header::decode(&hdr)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    match header.command {
        Command::Hello => {
            info!("hello probe");
        }
        Command::UploadBegin => {
            let total = usize::from(header.meta) * PAGE_SIZE;
            let digest = consume_payload(&mut stream, total).await?;
            info!(pages = header.meta, bytes = total, digest, "image received");
        }
    }

    stream.write_all(&ACK).await?;
    stream.flush().await
}

/// Reads exactly `total` payload bytes page by page, returning the hex
/// SHA-256 of what arrived.
async fn consume_payload(
    stream: &mut (impl AsyncRead + Unpin),
    total: usize,
) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut page = vec![0u8; PAGE_SIZE];
    let mut remaining = total;
    while remaining > 0 {
        let want = remaining.min(page.len());
        stream.read_exact(&mut page[..want]).await?;
        hasher.update(&page[..want]);
        remaining -= want;
    }
    let mut out = String::new();
    for byte in hasher.finalize() {
        let _ = write!(out, "{byte:02x}");
    }
    Ok(out)
}
