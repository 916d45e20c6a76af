//! These models represent the objects passed between a conversation and its backends
//!
//! A conversation is a sequence of [`message::Message`]s made of closed [`content::ContentPart`]
//! variants. Each backend speaks its own wire format; adapters convert to and from these
//! structs at the boundary, and everything an adapter streams back reaches the caller as
//! [`event::StreamEvent`]s.
pub mod attachment;
pub mod content;
pub mod event;
pub mod message;
pub mod role;
