//! Core types shared by every flowforge crate.
//!
//! Holds the strongly-typed identifiers for the records the engine reads
//! and writes, plus the rootcause-backed `Result` alias used at crate
//! boundaries.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{
    CorrelationId, CredentialId, ExecutionId, NodeExecutionId, ParseIdError, UserId, WorkflowId,
};
