// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Binds loopback, accepts connections, and runs one worker per
//! connection. Framing is a single `\n` per request/reply; there is no
//! other protocol state carried across reads.

use std::sync::Arc;

use argus_core::DispatchError;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::dispatcher::{Dispatcher, Reply};

/// Recommended bound from spec §9 Open Questions: there is no documented
/// maximum command-line length, so one is imposed here.
const MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

pub struct TcpServer {
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
}

impl TcpServer {
    pub async fn bind(addr: &str, dispatcher: Arc<Dispatcher>) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self { listener, dispatcher })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop. Returns once the listener errors out (e.g. the
    /// listening socket is closed from elsewhere) -- the caller is
    /// expected to race this against a shutdown signal.
    pub async fn serve(&self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, "accepted connection");
                    let dispatcher = Arc::clone(&self.dispatcher);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, dispatcher).await {
                            warn!(%peer, error = %e, "connection worker ended with error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "accept failed, stopping accept loop");
                    return;
                }
            }
        }
    }
}

#[derive(Debug, Error)]
enum ConnectionError {
    #[error("read error: {0}")]
    Read(#[source] std::io::Error),
    #[error("write error: {0}")]
    Write(#[source] std::io::Error),
}

/// One worker per connection: accumulate bytes until `\n`, hand the line
/// to the dispatcher, write the reply, repeat. Exits on read error,
/// zero-byte read (peer closed), or write error.
///
/// A command that blows the (otherwise undocumented, spec §9) 64 KiB
/// bound gets a `ParseError` reply rather than a dropped connection --
/// the buffer is then discarded and resynced on the next `\n`.
async fn handle_connection(
    mut stream: TcpStream,
    dispatcher: Arc<Dispatcher>,
) -> Result<(), ConnectionError> {
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = buf.drain(..=pos).collect();
            let reply = if line_bytes.len() > MAX_LINE_BYTES {
                Reply::err("unknown", DispatchError::ParseError)
            } else {
                let line = String::from_utf8_lossy(&line_bytes);
                dispatcher.dispatch(&line).await
            };
            stream
                .write_all(reply.to_line().as_bytes())
                .await
                .map_err(ConnectionError::Write)?;
            continue;
        }

        if buf.len() >= MAX_LINE_BYTES {
            let reply = Reply::err("unknown", DispatchError::ParseError);
            stream
                .write_all(reply.to_line().as_bytes())
                .await
                .map_err(ConnectionError::Write)?;
            buf.clear();
        }

        let n = stream.read(&mut chunk).await.map_err(ConnectionError::Read)?;
        if n == 0 {
            info!("peer closed connection");
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}
