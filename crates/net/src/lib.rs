//! Estimo Network Library
//!
//! Real-time session layer for planning poker rooms.
//!
//! # Architecture
//!
//! - **Protocol**: typed `Action`s in, `Event`s out, length-prefixed JSON
//! - **Coordinator**: runs each action against storage and emits events
//! - **Broadcast**: delivers events to a connection or a whole room
//! - **Server / Client**: TCP transport
//!
//! # Usage
//!
//! ```ignore
//! let coordinator = Coordinator::new(Database::open("estimo.db")?, SessionSettings::default());
//! let server = Server::start(ServerConfig::default(), coordinator).await?;
//!
//! let mut client = Client::connect(server.addr()).await?;
//! client.send(&Action::CreateRoom { name: "Sprint 1".into(), estimation_type: Default::default() }).await?;
//! while let Some(event) = client.next_event().await {
//!     match event {
//!         Event::RoomCreated { room_id, .. } => { /* join it */ }
//!         _ => {}
//!     }
//! }
//! ```

pub mod broadcast;
pub mod client;
pub mod error;
mod frame;
pub mod protocol;
pub mod server;
pub mod session;

pub use broadcast::{BroadcastChannel, ConnectionId, RoomHub};
pub use client::Client;
pub use error::{Error, Result};
pub use protocol::{Action, Event};
pub use server::{Server, ServerConfig};
pub use session::{ConnectionSession, Coordinator, SessionSettings};

/// Default port for Estimo servers
pub const DEFAULT_PORT: u16 = 7341;
