//! Probe types and data structures.
//!
//! This module provides the core types used for candidate representation,
//! probe results, validity thresholds and selection outcomes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Bytes per KiB, used when rendering throughput.
pub const KIB: f64 = 1024.0;

/// A single IP address being evaluated for a domain.
///
/// Candidates are produced by a [`CandidateSource`](super::CandidateSource)
/// and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Candidate {
    /// Address to pin the domain to
    pub address: IpAddr,
    /// Which source produced the candidate (e.g. "static", "doh", "dns:223.5.5.5")
    pub source: String,
    /// Region label reported by the source, if any
    #[serde(default)]
    pub region: Option<String>,
}

impl Candidate {
    /// Create a new candidate without a region label.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let candidate = Candidate::new("140.82.112.3".parse()?, "static");
    /// ```
    pub fn new(address: IpAddr, source: impl Into<String>) -> Self {
        Self {
            address,
            source: source.into(),
            region: None,
        }
    }

    /// Attach a region label.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.region {
            Some(region) => write!(f, "{} ({}, {})", self.address, self.source, region),
            None => write!(f, "{} ({})", self.address, self.source),
        }
    }
}

/// Result of probing one candidate.
///
/// Exactly one is produced per probed candidate. An unreachable
/// candidate has no latency; a throughput that was not measured or
/// failed to measure is absent and counts as zero during selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeResult {
    /// The candidate that was probed
    pub candidate: Candidate,
    /// Connect latency in milliseconds (None if unreachable)
    pub latency_ms: Option<f64>,
    /// Download throughput in bytes per second (None if not measured)
    pub throughput_bps: Option<f64>,
    /// Why the candidate was unreachable or throughput is missing
    #[serde(default)]
    pub error: Option<String>,
}

impl ProbeResult {
    /// Create a reachable result.
    #[must_use]
    pub fn reachable(candidate: Candidate, latency_ms: f64, throughput_bps: Option<f64>) -> Self {
        Self {
            candidate,
            latency_ms: Some(latency_ms),
            throughput_bps,
            error: None,
        }
    }

    /// Create an unreachable result.
    pub fn unreachable(candidate: Candidate, error: impl Into<String>) -> Self {
        Self {
            candidate,
            latency_ms: None,
            throughput_bps: None,
            error: Some(error.into()),
        }
    }

    /// Whether a latency was recorded.
    #[must_use]
    pub fn is_reachable(&self) -> bool {
        self.latency_ms.is_some()
    }

    /// Throughput in KiB/s, if measured.
    #[must_use]
    pub fn throughput_kibps(&self) -> Option<f64> {
        self.throughput_bps.map(|bps| bps / KIB)
    }
}

/// Latency ceiling and throughput floor a candidate must clear.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Thresholds {
    /// Exclusive upper bound on latency in milliseconds
    pub max_latency_ms: f64,
    /// Exclusive lower bound on throughput in bytes per second
    /// (`None` disables the throughput gate)
    pub min_throughput_bps: Option<f64>,
}

impl Thresholds {
    /// Default latency ceiling.
    pub const DEFAULT_MAX_LATENCY_MS: f64 = 500.0;

    /// Default throughput floor (100 KiB/s).
    pub const DEFAULT_MIN_THROUGHPUT_BPS: f64 = 100.0 * KIB;

    #[must_use]
    pub fn new(max_latency_ms: f64, min_throughput_bps: f64) -> Self {
        Self {
            max_latency_ms,
            min_throughput_bps: Some(min_throughput_bps),
        }
    }

    /// Thresholds that only gate on latency.
    #[must_use]
    pub fn latency_only(max_latency_ms: f64) -> Self {
        Self {
            max_latency_ms,
            min_throughput_bps: None,
        }
    }

    /// Whether an (averaged) latency/throughput pair clears both bounds.
    #[must_use]
    pub fn accepts(&self, latency_ms: f64, throughput_bps: f64) -> bool {
        latency_ms < self.max_latency_ms
            && self
                .min_throughput_bps
                .map_or(true, |floor| throughput_bps > floor)
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_LATENCY_MS, Self::DEFAULT_MIN_THROUGHPUT_BPS)
    }
}

/// Outcome of reducing a batch of probe results.
///
/// No chosen candidate is a valid terminal state, not an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SelectionOutcome {
    /// The winning candidate, if any cleared the thresholds
    pub chosen: Option<Candidate>,
    /// Averaged metrics for the winning address
    pub metrics: Option<ProbeResult>,
    /// Number of distinct reachable addresses considered
    pub considered: usize,
    /// Number of those that cleared the thresholds
    pub valid: usize,
}

impl SelectionOutcome {
    /// An outcome with nothing chosen.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chosen.is_none()
    }

    /// Convert into the chosen candidate, or `SelectionEmpty` for `domain`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SelectionEmpty`](crate::Error::SelectionEmpty) when nothing was chosen.
    pub fn into_result(self, domain: &str) -> crate::Result<(Candidate, ProbeResult)> {
        match (self.chosen, self.metrics) {
            (Some(chosen), Some(metrics)) => Ok((chosen, metrics)),
            _ => Err(crate::Error::SelectionEmpty {
                domain: domain.to_string(),
            }),
        }
    }
}

/// Aggregated statistics over a batch of probe results.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProbeSummary {
    /// Total number of candidates probed
    pub total: usize,
    /// Number of reachable candidates
    pub reachable: usize,
    /// Number of unreachable candidates
    pub unreachable: usize,
    /// Number of reachable candidates with a measured throughput
    pub measured: usize,
    /// Average latency in milliseconds
    pub avg_latency: Option<f64>,
    /// Minimum latency in milliseconds
    pub min_latency: Option<f64>,
    /// Maximum latency in milliseconds
    pub max_latency: Option<f64>,
}

impl ProbeSummary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a probe result to the summary.
    pub fn add_result(&mut self, result: &ProbeResult) {
        self.total += 1;
        let Some(latency) = result.latency_ms else {
            self.unreachable += 1;
            return;
        };

        self.reachable += 1;
        if result.throughput_bps.is_some() {
            self.measured += 1;
        }
        self.avg_latency = Some(
            self.avg_latency
                .map(|a| a.mul_add((self.reachable - 1) as f64, latency) / self.reachable as f64)
                .unwrap_or(latency),
        );
        self.min_latency = Some(self.min_latency.map(|m| m.min(latency)).unwrap_or(latency));
        self.max_latency = Some(self.max_latency.map(|m| m.max(latency)).unwrap_or(latency));
    }

    /// Summarize a slice of results.
    #[must_use]
    pub fn from_results(results: &[ProbeResult]) -> Self {
        let mut summary = Self::new();
        for result in results {
            summary.add_result(result);
        }
        summary
    }

    /// Reachable share as a percentage.
    #[must_use]
    pub fn reachable_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.reachable as f64 / self.total as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(ip: &str) -> Candidate {
        Candidate::new(ip.parse().unwrap(), "test")
    }

    #[test]
    fn test_candidate_serializes_address_as_literal() {
        let c = candidate("140.82.112.3").with_region("上海");
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["address"], "140.82.112.3");
        assert_eq!(json["region"], "上海");
        assert_eq!(c.to_string(), "140.82.112.3 (test, 上海)");
    }

    #[test]
    fn test_probe_result_constructors() {
        let ok = ProbeResult::reachable(candidate("1.2.3.4"), 12.5, Some(2048.0));
        assert!(ok.is_reachable());
        assert_eq!(ok.throughput_kibps(), Some(2.0));
        assert!(ok.error.is_none());

        let failed = ProbeResult::unreachable(candidate("1.2.3.4"), "connection refused");
        assert!(!failed.is_reachable());
        assert!(failed.throughput_bps.is_none());
        assert_eq!(failed.error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_thresholds_bounds_are_exclusive() {
        let t = Thresholds::new(500.0, 100.0);
        assert!(t.accepts(499.9, 100.1));
        assert!(!t.accepts(500.0, 1000.0));
        assert!(!t.accepts(10.0, 100.0));

        let latency_only = Thresholds::latency_only(500.0);
        assert!(latency_only.accepts(10.0, 0.0));
    }

    #[test]
    fn test_empty_outcome_into_result() {
        let err = SelectionOutcome::empty().into_result("github.com").unwrap_err();
        assert!(matches!(err, crate::Error::SelectionEmpty { .. }));
    }

    #[test]
    fn test_probe_summary() {
        let results = vec![
            ProbeResult::reachable(candidate("1.1.1.1"), 10.0, Some(1.0)),
            ProbeResult::reachable(candidate("2.2.2.2"), 20.0, None),
            ProbeResult::unreachable(candidate("3.3.3.3"), "timeout"),
        ];
        let summary = ProbeSummary::from_results(&results);

        assert_eq!(summary.total, 3);
        assert_eq!(summary.reachable, 2);
        assert_eq!(summary.unreachable, 1);
        assert_eq!(summary.measured, 1);
        assert_eq!(summary.avg_latency, Some(15.0));
        assert_eq!(summary.min_latency, Some(10.0));
        assert_eq!(summary.max_latency, Some(20.0));
    }
}
