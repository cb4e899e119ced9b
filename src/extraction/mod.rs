pub mod covariates;
pub mod domain;
pub mod parameters;
pub mod pipeline;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::time::Instant;

/// A change of a covariate value, already converted to the definition's
/// unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovariateEvent {
    pub id: String,
    pub time: Instant,
    pub value: f64,
}

impl CovariateEvent {
    pub fn new<S: Into<String>>(id: S, time: Instant, value: f64) -> Self {
        Self {
            id: id.into(),
            time,
            value,
        }
    }
}

/// Chronologically ordered covariate changes.
pub type CovariateSeries = Vec<CovariateEvent>;

/// A covariate value snapshotted into a parameter set event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovariateValue {
    pub id: String,
    pub value: f64,
}

/// A parameter bound to a concrete value at the instant of the enclosing
/// set event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterEvent {
    pub id: String,
    pub value: f64,
}

/// The parameters changing at one instant, with the covariate values used
/// to compute them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSetEvent {
    pub time: Instant,
    pub parameters: Vec<ParameterEvent>,
    pub covariates: Vec<CovariateValue>,
}

/// Chronologically ordered parameter set events. In the delta form each
/// event carries only the parameters that changed; see
/// [`parameters::ParametersExtractor::build_full_set`] for the expanded
/// form.
pub type ParameterSetSeries = Vec<ParameterSetEvent>;

/// Group a covariate series into per-instant buckets over `[start, end]`,
/// shared by the domain evaluator and the parameters extractor.
///
/// Events past `end` are discarded. Values before `start` are folded onto
/// `start`, keeping the latest pre-`start` value per id; a value measured
/// exactly at `start` wins over any folded one. Every bucket is sorted by
/// id. Fails on a duplicate (id, instant) pair and on a covariate that
/// first appears after the initial bucket.
pub(crate) fn bucket_covariates(
    series: &CovariateSeries,
    start: Instant,
    end: Instant,
) -> CoreResult<BTreeMap<Instant, Vec<(String, f64)>>> {
    if start > end {
        return Err(CoreError::InvalidInput(format!(
            "invalid observation window: {} is past {}",
            start, end
        )));
    }

    let mut buckets: BTreeMap<Instant, Vec<(String, f64)>> = BTreeMap::new();
    for event in series {
        if event.time <= end {
            buckets
                .entry(event.time)
                .or_default()
                .push((event.id.clone(), event.value));
        }
    }

    // Even with no covariate in play, downstream consumers need an instant
    // at which to compute.
    if buckets.is_empty() {
        buckets.insert(start, Vec::new());
    }

    let first = buckets.keys().next().copied();
    if first.is_some_and(|first| first < start) {
        // Latest pre-start value per id, in ascending time order.
        let mut carried: BTreeMap<String, f64> = BTreeMap::new();
        let before: Vec<Instant> = buckets
            .range(..start)
            .map(|(&instant, _)| instant)
            .collect();
        for instant in &before {
            if let Some(values) = buckets.remove(instant) {
                for (id, value) in values {
                    carried.insert(id, value);
                }
            }
        }
        let start_bucket = buckets.entry(start).or_default();
        for (id, value) in carried {
            // A value measured exactly at start is more recent than any
            // carried one.
            if !start_bucket.iter().any(|(present, _)| *present == id) {
                start_bucket.push((id, value));
            }
        }
    }

    let mut known: Vec<String> = Vec::new();
    for (index, (instant, bucket)) in buckets.iter_mut().enumerate() {
        bucket.sort_by(|a, b| a.0.cmp(&b.0));
        for pair in bucket.windows(2) {
            if pair[0].0 == pair[1].0 {
                return Err(CoreError::InvalidInput(format!(
                    "duplicate values for covariate '{}' at {}",
                    pair[0].0, instant
                )));
            }
        }
        if index == 0 {
            known = bucket.iter().map(|(id, _)| id.clone()).collect();
        } else if let Some((id, _)) = bucket.iter().find(|(id, _)| !known.contains(id)) {
            return Err(CoreError::InvalidInput(format!(
                "covariate '{}' appears at {} without an initial value",
                id, instant
            )));
        }
    }

    Ok(buckets)
}
