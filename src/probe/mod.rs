//! Probe module.
//!
//! This module provides the probing core:
//! - Candidate sources (ping-test site, DoH, plain DNS, static table)
//! - The concurrent probe engine
//! - Best-candidate selection
//! - Core data types

pub mod engine;
pub mod selector;
pub mod source;
pub mod types;

pub use engine::{ProbeEngine, ProbeTarget};
pub use selector::select_best;
pub use source::{
    CandidateSource, CompositeSource, DohSource, PingSiteSource, ResolverSource, StaticSource,
};
pub use types::*;
