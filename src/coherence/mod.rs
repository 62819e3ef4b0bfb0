//! Directory-based MSI coherence: message vocabulary, per-node state, and the handler that drives
//! the protocol.

pub mod blocked;
pub mod context;
pub mod directory;
pub mod error;
pub mod handler;
pub mod line;
pub mod message;

#[cfg(test)]
mod unit_tests;

pub use context::NodeContext;
pub use directory::{DirStatus, DirectoryEntry};
pub use error::ProtocolError;
pub use handler::MsiHandler;
pub use line::LineStatus;
pub use message::{Addr, MemOp, Message, MsgKind, NodeId};
