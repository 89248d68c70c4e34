//! The write half of a connection, shared by everything that sends to it.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::protocol::{self, Clientbound, PacketCodec, ProtocolError};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Cloneable handle to a client's transport.
///
/// Each send holds the writer for the whole buffer, so packets from
/// different tasks never interleave.
#[derive(Clone)]
pub struct Outbound {
    writer: Arc<Mutex<BoxedWriter>>,
    codec: PacketCodec,
}

impl Outbound {
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
            codec: protocol::clientbound(),
        }
    }

    pub fn codec(&self) -> &PacketCodec {
        &self.codec
    }

    pub async fn send(&self, packet: &Clientbound) -> Result<(), SendError> {
        let bytes = packet.encode(&self.codec)?;
        self.send_raw(&bytes).await?;
        Ok(())
    }

    /// Write already-encoded bytes in one piece.
    pub async fn send_raw(&self, bytes: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        writer.flush().await
    }

    pub async fn shutdown(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}
