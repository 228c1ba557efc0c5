//! Run report.
//!
//! A JSON record of what a run decided, written for observability:
//! when it ran, where it ran from, and which address each domain got.

use crate::error::Result;
use crate::optimizer::DomainOutcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Address written for a domain that got neither a chosen nor a fallback address.
pub const NO_ADDRESS: &str = "none";

/// Timeout of the geolocation lookup.
const GEO_TIMEOUT_SECS: u64 = 10;

/// Where the run happened, as seen by an IP geolocation service.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegionInfo {
    /// Public IP of this machine
    pub ip: String,
    pub country: String,
    pub region: String,
    pub city: String,
}

impl std::fmt::Display for RegionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}, {}, {})", self.ip, self.city, self.region, self.country)
    }
}

/// Response body of the geolocation service. `region` there is a short
/// code; the full name is `regionName`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeoResponse {
    #[serde(default)]
    query: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    region_name: String,
    #[serde(default)]
    city: String,
}

impl From<GeoResponse> for RegionInfo {
    fn from(r: GeoResponse) -> Self {
        Self {
            ip: r.query,
            country: r.country,
            region: r.region_name,
            city: r.city,
        }
    }
}

/// Look up the region of this machine.
///
/// Failures are logged and yield `None`.
pub async fn lookup_region(url: &str) -> Option<RegionInfo> {
    let fetch = async {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(GEO_TIMEOUT_SECS))
            .build()?;
        client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<GeoResponse>()
            .await
    };

    match fetch.await {
        Ok(response) => Some(response.into()),
        Err(e) => {
            tracing::warn!("region lookup via {url} failed: {e}");
            None
        }
    }
}

/// Per-domain line of the report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportEntry {
    pub domain: String,
    /// Pinned address, or [`NO_ADDRESS`]
    pub address: String,
    pub source: Option<String>,
    pub region: Option<String>,
    pub latency_ms: Option<f64>,
    pub throughput_bps: Option<f64>,
    /// Whether the address came from the fallback policy
    pub fallback: bool,
    /// Number of candidates probed
    pub candidates: usize,
}

impl ReportEntry {
    #[must_use]
    pub fn from_outcome(outcome: &DomainOutcome) -> Self {
        let chosen = outcome.selection.chosen.as_ref();
        let metrics = outcome.selection.metrics.as_ref();
        Self {
            domain: outcome.domain.clone(),
            address: outcome
                .applied
                .map_or_else(|| NO_ADDRESS.to_string(), |a| a.to_string()),
            source: chosen.map(|c| c.source.clone()),
            region: chosen.and_then(|c| c.region.clone()),
            latency_ms: metrics.and_then(|m| m.latency_ms),
            throughput_bps: metrics.and_then(|m| m.throughput_bps),
            fallback: outcome.fallback,
            candidates: outcome.candidates.len(),
        }
    }
}

/// Report of a whole run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Report {
    pub timestamp: DateTime<Utc>,
    pub region: Option<RegionInfo>,
    pub entries: Vec<ReportEntry>,
}

impl Report {
    #[must_use]
    pub fn new(region: Option<RegionInfo>, outcomes: &[DomainOutcome]) -> Self {
        Self {
            timestamp: Utc::now(),
            region,
            entries: outcomes.iter().map(ReportEntry::from_outcome).collect(),
        }
    }

    /// Write the report as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
