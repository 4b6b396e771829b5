//! Connection handlers.

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use turnstile_common_config::HandlerKind;
use turnstile_gate::GatedStream;

/// An admitted TCP connection.
pub type Connection = GatedStream<TcpStream>;

/// Serves one admitted connection until it ends.
///
/// The connection's slot is released when the stream is dropped, whether
/// the handler returns `Ok` or `Err`.
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Serve `stream`. Returns the number of bytes read from the peer.
    async fn handle(&self, stream: Connection, peer: SocketAddr) -> io::Result<u64>;
}

/// Writes back everything it reads.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

#[async_trait]
impl ConnectionHandler for EchoHandler {
    async fn handle(&self, stream: Connection, _peer: SocketAddr) -> io::Result<u64> {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let bytes = tokio::io::copy(&mut reader, &mut writer).await?;
        writer.shutdown().await?;
        Ok(bytes)
    }
}

/// Reads and throws away everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardHandler;

#[async_trait]
impl ConnectionHandler for DiscardHandler {
    async fn handle(&self, mut stream: Connection, _peer: SocketAddr) -> io::Result<u64> {
        tokio::io::copy(&mut stream, &mut tokio::io::sink()).await
    }
}

/// The handler configured by `kind`.
pub fn handler_for(kind: HandlerKind) -> Arc<dyn ConnectionHandler> {
    match kind {
        HandlerKind::Echo => Arc::new(EchoHandler),
        HandlerKind::Discard => Arc::new(DiscardHandler),
    }
}
