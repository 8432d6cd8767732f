//! Ticket classification and lifecycle engine for hotel incidence reports
//! arriving over chat.
//!
//! Free-text reports are normalized, classified into responsible teams,
//! persisted as tickets, and driven through a pending → completed/cancelled
//! lifecycle by confirmation, cancellation and feedback replies.

pub mod classifier;
pub mod config;
pub mod directory;
pub mod error;
pub mod keywords;
pub mod lifecycle;
pub mod resolver;
pub mod server;
pub mod store;
pub mod text;
pub mod transport;

pub use error::{Result, TicketError};
