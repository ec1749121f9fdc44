//! WebSocket support: connection state, registry, broadcast fan-out,
//! typing relay, stats, and the per-connection ingest pipeline.

pub mod broadcast;
pub mod connection;
pub mod pipeline;
pub mod registry;
pub mod stats;
pub mod typing;
