//! # banter-core
//!
//! Foundation types for the banter realtime chat backend.
//!
//! This crate provides the shared vocabulary the server and its
//! collaborators depend on:
//!
//! - **Branded IDs**: `ConnectionId`, `UserId`, `TenantId`, `SessionId`,
//!   `MessageId` as newtypes for type safety
//! - **Chat entities**: `ChatMessage` (persisted turn) and `NewChatMessage`
//!   (insert form), with `MessageRole` distinguishing user/assistant turns
//! - **Wire frames**: `InboundFrame`/`OutboundFrame` closed enums covering
//!   the chat WebSocket protocol, plus machine-readable `ErrorCode`s

#![deny(unsafe_code)]

pub mod frames;
pub mod ids;
pub mod message;

pub use frames::{
    ChatInbound, ErrorCode, FrameDecodeError, InboundFrame, OutboundFrame, TypingInbound,
    CONNECTED_MESSAGE,
};
pub use ids::{ConnectionId, MessageId, SessionId, TenantId, UserId};
pub use message::{ChatMessage, MessageRole, NewChatMessage};
