//! TCP server for planning poker rooms
//!
//! Every connection gets an outbound queue drained by a writer task and a
//! read loop that decodes actions and hands them to the [`Coordinator`].
//! Which room a connection belongs to is tracked by the [`RoomHub`].

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::WriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use estimo_core::{ErrorKind, Storage};

use crate::broadcast::{BroadcastChannel, ConnectionId, RoomHub};
use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::protocol::{Action, Event};
use crate::session::{ConnectionSession, Coordinator};

/// Events queued per connection before it is evicted
const OUTBOUND_QUEUE: usize = 256;

/// Listener settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::from([0, 0, 0, 0]),
            port: crate::DEFAULT_PORT,
            max_connections: 256,
        }
    }
}

struct Shared<S> {
    coordinator: Coordinator<S>,
    hub: Arc<RoomHub>,
    max_connections: usize,
    next_connection: AtomicU64,
}

/// Running server handle
pub struct Server {
    addr: SocketAddr,
    hub: Arc<RoomHub>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Bind and start accepting connections
    pub async fn start<S>(config: ServerConfig, coordinator: Coordinator<S>) -> Result<Self>
    where
        S: Storage + Send + 'static,
    {
        let listener = TcpListener::bind(SocketAddr::new(config.bind, config.port)).await?;
        let bound_addr = listener.local_addr()?;

        info!(addr = %bound_addr, max_connections = config.max_connections, "Server started");

        let (shutdown_tx, _) = broadcast::channel(1);

        let hub = Arc::new(RoomHub::new());
        let shared = Arc::new(Shared {
            coordinator,
            hub: hub.clone(),
            max_connections: config.max_connections,
            next_connection: AtomicU64::new(1),
        });

        tokio::spawn(accept_loop(listener, shared, shutdown_tx.clone()));

        Ok(Server {
            addr: bound_addr,
            hub,
            shutdown_tx,
        })
    }

    /// Get the server's bound address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of open connections
    pub fn connection_count(&self) -> usize {
        self.hub.connection_count()
    }

    /// Stop accepting and close every connection
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        info!("Server shutdown initiated");
    }
}

/// Accept incoming connections
async fn accept_loop<S>(
    listener: TcpListener,
    shared: Arc<Shared<S>>,
    shutdown_tx: broadcast::Sender<()>,
) where
    S: Storage + Send + 'static,
{
    let mut shutdown_rx = shutdown_tx.subscribe();
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        if shared.hub.connection_count() >= shared.max_connections {
                            warn!(addr = %addr, "Connection refused, server full");
                            tokio::spawn(refuse(stream));
                            continue;
                        }

                        // Registered before spawning so the next check sees it
                        let id = shared.next_connection.fetch_add(1, Ordering::Relaxed);
                        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
                        shared.hub.register(id, tx);
                        debug!(addr = %addr, connection = id, "New connection");

                        let shared = shared.clone();
                        let shutdown_rx = shutdown_tx.subscribe();
                        tokio::spawn(handle_connection(stream, addr, id, rx, shared, shutdown_rx));
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Accept loop shutting down");
                break;
            }
        }
    }
}

/// Tell a surplus client why it is being dropped
async fn refuse(mut stream: TcpStream) {
    let event = Event::Error {
        kind: ErrorKind::Internal,
        message: Error::ServerFull.to_string(),
    };
    if let Err(e) = write_frame(&mut stream, &event).await {
        debug!(error = %e, "Failed to notify refused connection");
    }
}

/// Handle a single client connection
async fn handle_connection<S>(
    stream: TcpStream,
    addr: SocketAddr,
    id: ConnectionId,
    rx: mpsc::Receiver<Event>,
    shared: Arc<Shared<S>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) where
    S: Storage + Send + 'static,
{
    let (mut reader, writer) = tokio::io::split(stream);
    let mut writer_handle = tokio::spawn(writer_task(writer, rx));

    info!(addr = %addr, connection = id, "Connection opened");

    let mut session = ConnectionSession::new(id);

    let writer_done = loop {
        tokio::select! {
            result = read_frame(&mut reader) => {
                match result {
                    Ok(payload) => {
                        let shared = shared.clone();
                        let handled = tokio::task::spawn_blocking(move || {
                            handle_payload(&payload, &mut session, &shared);
                            session
                        })
                        .await;
                        match handled {
                            Ok(updated) => session = updated,
                            Err(e) => {
                                error!(connection = id, error = %e, "Action handler panicked");
                                break false;
                            }
                        }
                    }
                    Err(Error::ConnectionClosed) => {
                        debug!(connection = id, "Connection closed by peer");
                        break false;
                    }
                    Err(Error::Protocol(reason)) => {
                        warn!(connection = id, reason = %reason, "Unrecoverable frame");
                        shared.hub.send_to(id, Event::malformed(&reason));
                        break false;
                    }
                    Err(e) => {
                        warn!(connection = id, error = %e, "Read error");
                        break false;
                    }
                }
            }
            // Evicted from the hub or the socket stopped accepting writes
            _ = &mut writer_handle => {
                debug!(connection = id, "Outbound side closed");
                break true;
            }
            _ = shutdown_rx.recv() => {
                debug!(connection = id, "Closing connection for shutdown");
                break false;
            }
        }
    };

    // Dropping the queue sender lets the writer flush and exit
    shared.hub.unregister(id);
    if !writer_done {
        let _ = writer_handle.await;
    }

    info!(addr = %addr, connection = id, "Connection closed");
}

fn handle_payload<S: Storage>(
    payload: &[u8],
    session: &mut ConnectionSession,
    shared: &Shared<S>,
) {
    match Action::from_bytes(payload) {
        Ok(action) => shared.coordinator.handle(session, action, &*shared.hub),
        Err(e) => {
            debug!(connection = session.connection_id, error = %e, "Malformed action");
            shared
                .hub
                .send_to(session.connection_id, Event::malformed(e));
        }
    }
}

/// Writer task - sends queued events to the client
async fn writer_task(mut writer: WriteHalf<TcpStream>, mut rx: mpsc::Receiver<Event>) {
    while let Some(event) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &event).await {
            debug!(error = %e, "Write failed");
            break;
        }
    }
}
