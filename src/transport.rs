//! TCP transport
//!
//! Newline-delimited JSON over a socket. Each accepted socket is bridged to
//! its own broker connection; [`connect`] gives the client end.

use crate::broker::{BrokerHandle, Connection};
use crate::error::BrokerError;
use serde_json::Value;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Accept connections forever, bridging each one to the broker
pub async fn serve(listener: TcpListener, broker: BrokerHandle) -> Result<(), BrokerError> {
    let local = listener
        .local_addr()
        .map_err(|e| BrokerError::ConfigError(format!("listener has no address: {}", e)))?;
    info!(addr = %local, "Accepting broker connections");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(error = %err, "Failed to accept connection");
                continue;
            }
        };
        debug!(peer = %peer, "Connection accepted");
        let Connection { outbound, events } = broker.connect();
        tokio::spawn(async move {
            pump(stream, events, outbound).await;
            debug!(peer = %peer, "Connection closed");
        });
    }
}

/// Bind `addr` and serve
pub async fn bind_and_serve(addr: SocketAddr, broker: BrokerHandle) -> Result<(), BrokerError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| BrokerError::ConfigError(format!("Failed to bind {}: {}", addr, e)))?;
    serve(listener, broker).await
}

/// Open a client connection to a broker listening at `addr`
pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Connection, BrokerError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| BrokerError::ProtocolError(format!("Failed to connect to broker: {}", e)))?;
    let (local, remote) = Connection::pair();
    let Connection { outbound, events } = remote;
    tokio::spawn(pump(stream, events, outbound));
    Ok(local)
}

/// Copy lines from the socket into `incoming` and values from `outgoing`
/// onto the socket until either side closes
async fn pump<S>(
    stream: S,
    mut outgoing: mpsc::UnboundedReceiver<Value>,
    incoming: mpsc::UnboundedSender<Value>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Value>(&line) {
                        Ok(value) => {
                            if incoming.send(value).is_err() {
                                break;
                            }
                        }
                        Err(err) => warn!(error = %err, "Dropping invalid JSON line"),
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "Socket read failed");
                    break;
                }
            },
            value = outgoing.recv() => match value {
                Some(value) => {
                    let mut line = value.to_string();
                    line.push('\n');
                    if let Err(err) = writer.write_all(line.as_bytes()).await {
                        warn!(error = %err, "Socket write failed");
                        break;
                    }
                }
                None => break,
            },
        }
    }
    let _ = writer.shutdown().await;
}
