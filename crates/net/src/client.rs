//! TCP client for talking to an Estimo server

use std::net::SocketAddr;

use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame, MAX_FRAME_SIZE};
use crate::protocol::{Action, Event};

/// Client handle: actions go out directly, events arrive through a queue
pub struct Client {
    writer: WriteHalf<TcpStream>,
    event_rx: mpsc::Receiver<Event>,
    reader_handle: JoinHandle<()>,
}

impl Client {
    /// Connect to a server
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        info!(addr = %addr, "Connecting to server");

        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = tokio::io::split(stream);

        let (event_tx, event_rx) = mpsc::channel(64);
        let reader_handle = tokio::spawn(reader_task(reader, event_tx));

        Ok(Client {
            writer,
            event_rx,
            reader_handle,
        })
    }

    /// Send an action
    pub async fn send(&mut self, action: &Action) -> Result<()> {
        write_frame(&mut self.writer, action).await
    }

    /// Send an arbitrary payload as one frame
    pub async fn send_raw(&mut self, payload: &[u8]) -> Result<()> {
        let len = u32::try_from(payload.len())
            .ok()
            .filter(|len| *len <= MAX_FRAME_SIZE)
            .ok_or_else(|| Error::Protocol("payload too large".into()))?;

        self.writer.write_all(&len.to_be_bytes()).await?;
        self.writer.write_all(payload).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Next event from the server; `None` once the connection is gone
    pub async fn next_event(&mut self) -> Option<Event> {
        self.event_rx.recv().await
    }

    /// Close the connection
    pub async fn disconnect(mut self) {
        if let Err(e) = self.writer.shutdown().await {
            debug!(error = %e, "Shutdown failed");
        }
        self.reader_handle.abort();
    }
}

/// Reader task - decodes frames into events
async fn reader_task(mut reader: ReadHalf<TcpStream>, event_tx: mpsc::Sender<Event>) {
    loop {
        match read_frame(&mut reader).await {
            Ok(payload) => match Event::from_bytes(&payload) {
                Ok(event) => {
                    if event_tx.send(event).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "Ignoring undecodable event"),
            },
            Err(Error::ConnectionClosed) => {
                debug!("Server closed connection");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Read error");
                break;
            }
        }
    }
    info!("Disconnected from server");
}
