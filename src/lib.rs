//! hostpin - pin the fastest GitHub addresses in the hosts file.
//!
//! This crate provides both a library API and a CLI tool for:
//! - Collecting candidate addresses per domain (ping-test site, DoH, plain DNS, static table)
//! - Measuring connect latency and pinned download throughput, concurrently
//! - Selecting the best address under a latency ceiling and throughput floor
//! - Updating the hosts file without disturbing unrelated lines
//! - Flushing the OS DNS cache
//!
//! # Library Usage
//!
//! ```ignore
//! use hostpin::{ConfigLoader, HostsFile, Optimizer, UpdateOptions};
//!
//! let settings = ConfigLoader::load(None)?;
//! let domains = settings.domain_names();
//! let hosts = HostsFile::new(settings.hosts_path());
//! let optimizer = Optimizer::from_settings(settings, None)?;
//!
//! let outcomes = optimizer.optimize_all(&domains).await;
//! hosts.update(&hostpin::optimizer::mapping(&outcomes), UpdateOptions::default())?;
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Show what is pinned now (default)
//! hostpin
//!
//! # Probe, select and pin every configured domain
//! sudo hostpin run --backup --report report.json
//!
//! # Probe one domain without touching anything
//! hostpin probe raw.githubusercontent.com --sort
//! hostpin probe github.com --ip 140.82.112.3#us --ip 20.205.243.166#sg
//!
//! # Export the effective settings
//! hostpin config --output hostpin.json
//! ```

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod hosts;
pub mod optimizer;
pub mod probe;
pub mod report;

// Re-export commonly used types
pub use cache::{platform_invalidator, CacheInvalidator};
pub use cli::{Cli, Commands, OutputFormat};
pub use config::{ConfigLoader, Settings};
pub use error::{Error, Result};
pub use hosts::{HostsFile, UpdateOptions};
pub use optimizer::{DomainOutcome, Optimizer};
pub use probe::{
    select_best, Candidate, CandidateSource, ProbeEngine, ProbeResult, ProbeSummary, ProbeTarget,
    SelectionOutcome, Thresholds,
};
pub use report::Report;
