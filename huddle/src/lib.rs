//! Client messaging core for the Huddle collaboration suite.
//!
//! The crate owns the persistent-connection lifecycle and the message
//! delivery and reconciliation protocol: a session actor ([`session`])
//! drives a typed channel to the router ([`channel`]), tracks optimistic
//! sends until they are confirmed or failed ([`outbox`]), folds inbound
//! pushes into per-peer threads ([`reconcile`], [`thread`]), and signals
//! read state ([`receipts`]).

pub mod channel;
pub mod config;
pub mod link;
pub mod notify;
pub mod outbox;
pub mod receipts;
pub mod reconcile;
pub mod session;
pub mod thread;
