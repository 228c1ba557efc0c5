//! Best-candidate selection.
//!
//! Reduces a batch of probe results to a single winner. Results are grouped
//! by address (an address probed more than once is averaged), gated on the
//! validity thresholds, and the lowest average latency wins. Ties go to the
//! address seen first in the input, which is the dispatch order of the
//! probe engine and never the completion order.

use crate::probe::types::{ProbeResult, SelectionOutcome, Thresholds};
use std::collections::HashMap;
use std::net::IpAddr;

/// Per-address accumulator.
struct AddressGroup<'a> {
    first: &'a ProbeResult,
    latency_sum: f64,
    throughput_sum: f64,
    samples: usize,
    measured: usize,
}

impl AddressGroup<'_> {
    fn avg_latency(&self) -> f64 {
        self.latency_sum / self.samples as f64
    }

    fn avg_throughput(&self) -> f64 {
        self.throughput_sum / self.samples as f64
    }
}

/// Pick the best candidate from `results` under `thresholds`.
///
/// Empty or fully unreachable input yields an empty outcome, never an error.
///
/// # Example
///
/// ```ignore
/// let outcome = select_best(&results, &Thresholds::default());
/// if let Some(chosen) = outcome.chosen {
///     println!("pin to {}", chosen.address);
/// }
/// ```
#[must_use]
pub fn select_best(results: &[ProbeResult], thresholds: &Thresholds) -> SelectionOutcome {
    let mut order: Vec<IpAddr> = Vec::new();
    let mut groups: HashMap<IpAddr, AddressGroup<'_>> = HashMap::new();

    for result in results {
        let Some(latency) = result.latency_ms else {
            continue;
        };
        if latency >= thresholds.max_latency_ms {
            continue;
        }

        let address = result.candidate.address;
        let group = groups.entry(address).or_insert_with(|| {
            order.push(address);
            AddressGroup {
                first: result,
                latency_sum: 0.0,
                throughput_sum: 0.0,
                samples: 0,
                measured: 0,
            }
        });
        group.latency_sum += latency;
        group.throughput_sum += result.throughput_bps.unwrap_or(0.0);
        group.samples += 1;
        if result.throughput_bps.is_some() {
            group.measured += 1;
        }
    }

    let considered = order.len();
    let mut valid = 0;
    let mut best: Option<&AddressGroup<'_>> = None;

    for address in &order {
        let group = &groups[address];
        if !thresholds.accepts(group.avg_latency(), group.avg_throughput()) {
            tracing::debug!(
                "{address} rejected: {:.1} ms, {:.1} KiB/s",
                group.avg_latency(),
                group.avg_throughput() / 1024.0
            );
            continue;
        }
        valid += 1;

        // Strict comparison keeps the earlier address on ties.
        if best.map_or(true, |b| group.avg_latency() < b.avg_latency()) {
            best = Some(group);
        }
    }

    let Some(best) = best else {
        return SelectionOutcome {
            considered,
            valid,
            ..SelectionOutcome::empty()
        };
    };

    let throughput = (best.measured > 0).then(|| best.avg_throughput());
    let metrics = ProbeResult::reachable(best.first.candidate.clone(), best.avg_latency(), throughput);

    SelectionOutcome {
        chosen: Some(best.first.candidate.clone()),
        metrics: Some(metrics),
        considered,
        valid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::types::{Candidate, KIB};

    fn result(ip: &str, latency_ms: Option<f64>, throughput_kib: Option<f64>) -> ProbeResult {
        let candidate = Candidate::new(ip.parse().unwrap(), "test");
        match latency_ms {
            Some(latency) => ProbeResult::reachable(candidate, latency, throughput_kib.map(|t| t * KIB)),
            None => ProbeResult::unreachable(candidate, "timeout"),
        }
    }

    fn chosen(outcome: &SelectionOutcome) -> Option<String> {
        outcome.chosen.as_ref().map(|c| c.address.to_string())
    }

    #[test]
    fn test_lower_latency_wins_when_both_valid() {
        let results = vec![
            result("1.2.3.4", Some(50.0), Some(500.0)),
            result("5.6.7.8", Some(30.0), Some(200.0)),
        ];
        let outcome = select_best(&results, &Thresholds::default());
        assert_eq!(chosen(&outcome).as_deref(), Some("5.6.7.8"));
        assert_eq!(outcome.valid, 2);
    }

    #[test]
    fn test_throughput_floor_excludes_faster_candidate() {
        let results = vec![
            result("1.2.3.4", Some(50.0), Some(500.0)),
            result("5.6.7.8", Some(30.0), Some(50.0)),
        ];
        let outcome = select_best(&results, &Thresholds::default());
        assert_eq!(chosen(&outcome).as_deref(), Some("1.2.3.4"));
        assert_eq!(outcome.considered, 2);
        assert_eq!(outcome.valid, 1);
    }

    #[test]
    fn test_empty_input_is_not_an_error() {
        let outcome = select_best(&[], &Thresholds::default());
        assert!(outcome.is_empty());
        assert!(outcome.metrics.is_none());
        assert_eq!(outcome.considered, 0);
    }

    #[test]
    fn test_all_unreachable() {
        let results = vec![result("1.1.1.1", None, None), result("2.2.2.2", None, None)];
        let outcome = select_best(&results, &Thresholds::default());
        assert!(outcome.is_empty());
        assert_eq!(outcome.considered, 0);
    }

    #[test]
    fn test_latency_ceiling() {
        let results = vec![result("1.1.1.1", Some(500.0), Some(1000.0))];
        assert!(select_best(&results, &Thresholds::default()).is_empty());
    }

    #[test]
    fn test_unmeasured_throughput_counts_as_zero() {
        let results = vec![result("1.1.1.1", Some(10.0), None)];
        assert!(select_best(&results, &Thresholds::default()).is_empty());

        let outcome = select_best(&results, &Thresholds::latency_only(500.0));
        assert_eq!(chosen(&outcome).as_deref(), Some("1.1.1.1"));
        assert_eq!(outcome.metrics.unwrap().throughput_bps, None);
    }

    #[test]
    fn test_ties_go_to_first_in_input_order() {
        let results = vec![
            result("9.9.9.9", Some(20.0), Some(500.0)),
            result("1.1.1.1", Some(20.0), Some(500.0)),
        ];
        let outcome = select_best(&results, &Thresholds::default());
        assert_eq!(chosen(&outcome).as_deref(), Some("9.9.9.9"));

        let reversed: Vec<_> = results.into_iter().rev().collect();
        let outcome = select_best(&reversed, &Thresholds::default());
        assert_eq!(chosen(&outcome).as_deref(), Some("1.1.1.1"));
    }

    #[test]
    fn test_repeated_probes_are_averaged() {
        let results = vec![
            result("1.1.1.1", Some(10.0), Some(400.0)),
            result("2.2.2.2", Some(25.0), Some(400.0)),
            result("1.1.1.1", Some(50.0), Some(200.0)),
        ];
        let outcome = select_best(&results, &Thresholds::default());
        assert_eq!(chosen(&outcome).as_deref(), Some("2.2.2.2"));
        assert_eq!(outcome.considered, 2);

        let results = vec![
            result("1.1.1.1", Some(10.0), Some(400.0)),
            result("1.1.1.1", Some(20.0), Some(200.0)),
        ];
        let metrics = select_best(&results, &Thresholds::default()).metrics.unwrap();
        assert_eq!(metrics.latency_ms, Some(15.0));
        assert_eq!(metrics.throughput_bps, Some(300.0 * KIB));
    }

    #[test]
    fn test_chosen_latency_is_minimal_among_valid() {
        let latencies = [120.0, 35.0, 80.0, 35.5, 410.0, 15.0, 600.0];
        let throughputs = [300.0, 150.0, 90.0, 1000.0, 120.0, 20.0, 500.0];
        let results: Vec<_> = latencies
            .iter()
            .zip(throughputs)
            .enumerate()
            .map(|(i, (l, t))| result(&format!("10.0.0.{}", i + 1), Some(*l), Some(t)))
            .collect();

        let thresholds = Thresholds::default();
        let outcome = select_best(&results, &thresholds);
        let best = outcome.metrics.as_ref().unwrap().latency_ms.unwrap();

        for r in &results {
            let (l, t) = (r.latency_ms.unwrap(), r.throughput_bps.unwrap());
            if thresholds.accepts(l, t) {
                assert!(best <= l);
            }
        }
        assert_eq!(chosen(&outcome).as_deref(), Some("10.0.0.2"));
    }
}
