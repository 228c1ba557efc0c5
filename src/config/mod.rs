//! Configuration module.
//!
//! This module provides the run settings and the functionality for loading
//! them from various sources.

pub mod loader;
pub mod settings;

pub use loader::ConfigLoader;
pub use settings::{
    DomainSettings, FallbackPolicy, LatencyMethod, PingSiteSettings, ProbeSettings, Settings,
    SourceKind, StaticEntry,
};
