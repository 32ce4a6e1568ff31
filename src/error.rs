//! Error taxonomy for the swarm engine.
//!
//! Entity and block processing never surface these to callers; they are
//! produced at the boundaries (load and message parsing, sinks, storage)
//! and inside the block's fallible inner step.

use thiserror::Error;

use crate::block::BlockId;
use crate::entity::EntityId;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("market load has no price")]
    MissingPrice,

    #[error("invalid price: {0}")]
    InvalidPrice(f64),

    #[error("unknown entity: {0}")]
    UnknownEntity(EntityId),

    #[error("unknown block: {0}")]
    UnknownBlock(BlockId),

    #[error("unknown tag: {0}")]
    UnknownTag(String),

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("publish to {channel} failed: {reason}")]
    Publish { channel: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        CoreError::Storage(e.to_string())
    }
}
