//! Direct-message routing server for the Huddle collaboration suite.
//!
//! Authenticates WebSocket connections, registers each user's active
//! connections, persists messages before acknowledging them, and fans
//! pushes out to the receiver's connections plus correlation-id echoes
//! to the sender's own tabs.

pub mod auth;
pub mod config;
pub mod router;
pub mod sessions;
pub mod store;
