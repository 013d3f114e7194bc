//! Shared protocol definitions for the Huddle wire format.

pub mod codec;
pub mod frame;
pub mod ident;
