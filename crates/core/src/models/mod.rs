//! Data models for Estimo

mod participant;
mod room;
mod story;
mod vote;

pub use participant::*;
pub use room::*;
pub use story::*;
pub use vote::*;
