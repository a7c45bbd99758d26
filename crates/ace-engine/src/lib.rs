//! ACE Engine - one explicitly constructed coordination engine
//!
//! Composes the delegation, communication, and conflict stacks behind a
//! single management surface. Engines carry no global state: construct
//! as many as needed in one process (each with its own registries),
//! which is exactly what tests do.

pub mod config;
pub mod engine;

pub use config::{
    CommsSection, ConflictSection, DelegationSection, EngineConfig,
};
pub use engine::{CoordinationEngine, EngineStatus};
