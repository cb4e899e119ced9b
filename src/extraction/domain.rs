use std::collections::BTreeMap;

use log::{info, warn};

use super::covariates::CovariateExtractor;
use super::{bucket_covariates, CovariateSeries};
use crate::error::CoreResult;
use crate::model::{ConstraintType, CovariateDefinition, DrugModel, DrugModelDomain};
use crate::operation::{Operation, OperationInput};
use crate::time::Instant;
use crate::treatment::DrugTreatment;

/// Verdict of a constraint evaluation. The variants are ordered so that
/// the lattice join of two verdicts is simply their maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Compatibility {
    /// Every constraint is met.
    Compatible,
    /// Some soft constraint is violated.
    PartiallyCompatible,
    /// Some hard constraint is violated.
    Incompatible,
    /// A check operation failed to evaluate.
    ComputationError,
}

impl Compatibility {
    pub fn join(self, other: Compatibility) -> Compatibility {
        self.max(other)
    }
}

/// Which predicate an evaluation refers to: a domain constraint (by index
/// in the domain's list) or a covariate definition's validation operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintSource {
    Domain(usize),
    CovariateValidation(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintEvaluation {
    pub source: ConstraintSource,
    pub constraint_type: ConstraintType,
    pub result: Compatibility,
}

/// Per-constraint verdicts plus their join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainEvaluation {
    pub global: Compatibility,
    pub constraints: Vec<ConstraintEvaluation>,
}

/// Checks the compatibility of a patient's covariates with a drug model's
/// admissibility domain.
pub struct DomainConstraintsEvaluator;

impl DomainConstraintsEvaluator {
    /// Evaluate every domain constraint over an extracted covariate series.
    /// Each constraint is re-checked at every event instant against the
    /// rolling covariate values; a covariate the constraint reads that has
    /// not been seen yet falls back to its definition's population value.
    pub fn evaluate_series(
        domain: &DrugModelDomain,
        definitions: &[CovariateDefinition],
        series: &CovariateSeries,
        start: Instant,
        end: Instant,
    ) -> CoreResult<DomainEvaluation> {
        let buckets = bucket_covariates(series, start, end)?;
        let defaults = population_defaults(definitions)?;

        let mut constraints = Vec::with_capacity(domain.constraints.len());
        let mut global = Compatibility::Compatible;
        for (index, constraint) in domain.constraints.iter().enumerate() {
            // Each evaluation works on its own operation instance.
            let operation = constraint.check.clone();
            let result =
                evaluate_predicate(&operation, constraint.constraint_type, &buckets, &defaults);
            global = global.join(result);
            constraints.push(ConstraintEvaluation {
                source: ConstraintSource::Domain(index),
                constraint_type: constraint.constraint_type,
                result,
            });
        }

        Ok(DomainEvaluation {
            global,
            constraints,
        })
    }

    /// Evaluate a drug model against a full treatment: extract the
    /// covariate series first, then check the domain constraints, the
    /// per-covariate validation predicates, and the presence of every
    /// covariate a mandatory-hard constraint requires.
    pub fn evaluate_treatment(
        model: &DrugModel,
        treatment: &DrugTreatment,
        start: Instant,
        end: Instant,
    ) -> CoreResult<DomainEvaluation> {
        let mut extractor =
            CovariateExtractor::new(&model.covariates, &treatment.covariates, start, end)?;
        if let Some(treatment_start) = treatment.treatment_start() {
            extractor = extractor.with_treatment_start(treatment_start);
        }
        let series = extractor.extract()?;
        Self::evaluate_extracted(model, treatment, &series, start, end)
    }

    /// Treatment-level evaluation over an already extracted series: domain
    /// constraints, per-covariate validation predicates, and the
    /// mandatory-hard presence rule.
    pub fn evaluate_extracted(
        model: &DrugModel,
        treatment: &DrugTreatment,
        series: &CovariateSeries,
        start: Instant,
        end: Instant,
    ) -> CoreResult<DomainEvaluation> {
        let mut evaluation =
            Self::evaluate_series(&model.domain, &model.covariates, series, start, end)?;

        // Covariate validation predicates act as implicit hard constraints.
        let buckets = bucket_covariates(series, start, end)?;
        let defaults = population_defaults(&model.covariates)?;
        for definition in &model.covariates {
            if let Some(validation) = &definition.validation {
                let result =
                    evaluate_predicate(validation, ConstraintType::Hard, &buckets, &defaults);
                evaluation.global = evaluation.global.join(result);
                evaluation.constraints.push(ConstraintEvaluation {
                    source: ConstraintSource::CovariateValidation(definition.id.clone()),
                    constraint_type: ConstraintType::Hard,
                    result,
                });
            }
        }

        // A mandatory-hard constraint requires its covariates to be present
        // in the treatment itself; age requirements are satisfied by a
        // birthdate variate.
        for (index, constraint) in model.domain.constraints.iter().enumerate() {
            if constraint.constraint_type != ConstraintType::MandatoryHard {
                continue;
            }
            let missing = constraint.required_covariate_ids.iter().any(|required| {
                let satisfied_by_birthdate = required.eq_ignore_ascii_case("age")
                    && treatment.covariates.iter().any(|v| v.is_birthdate());
                let present = treatment
                    .covariates
                    .iter()
                    .any(|variate| variate.id == *required);
                !present && !satisfied_by_birthdate
            });
            if missing {
                warn!(
                    "mandatory constraint {} misses a required covariate in the treatment",
                    index
                );
                evaluation.global = evaluation.global.join(Compatibility::Incompatible);
                if let Some(entry) = evaluation
                    .constraints
                    .iter_mut()
                    .find(|entry| entry.source == ConstraintSource::Domain(index))
                {
                    entry.result = entry.result.join(Compatibility::Incompatible);
                }
            }
        }

        info!("domain evaluation verdict: {:?}", evaluation.global);
        Ok(evaluation)
    }
}

/// Population (definition default) value per covariate id, the fallback
/// for constraint inputs the series has not provided yet.
fn population_defaults(
    definitions: &[CovariateDefinition],
) -> CoreResult<BTreeMap<String, f64>> {
    let mut defaults = BTreeMap::new();
    for definition in definitions {
        defaults.insert(definition.id.clone(), definition.default_numeric_value()?);
    }
    Ok(defaults)
}

/// Walk the timed buckets with a rolling value map and fold the verdicts
/// of one predicate. Inputs the predicate declares but the rolling map has
/// not seen are filled from `defaults`; an evaluation failure yields
/// `ComputationError` but does not stop the walk.
fn evaluate_predicate(
    operation: &Operation,
    constraint_type: ConstraintType,
    buckets: &BTreeMap<Instant, Vec<(String, f64)>>,
    defaults: &BTreeMap<String, f64>,
) -> Compatibility {
    let mut rolling: BTreeMap<String, f64> = BTreeMap::new();
    let mut result = Compatibility::Compatible;

    for bucket in buckets.values() {
        for (id, value) in bucket {
            rolling.insert(id.clone(), *value);
        }
        let mut inputs: Vec<OperationInput> = rolling
            .iter()
            .map(|(id, value)| OperationInput::new(id.clone(), *value))
            .collect();
        for spec in operation.inputs() {
            if !rolling.contains_key(&spec.name) {
                if let Some(&default) = defaults.get(&spec.name) {
                    inputs.push(OperationInput::new(spec.name.clone(), default));
                }
            }
        }
        match operation.evaluate(&inputs) {
            Err(_) => {
                result = result.join(Compatibility::ComputationError);
            }
            Ok(value) if value == 0.0 => {
                let verdict = match constraint_type {
                    ConstraintType::Soft => Compatibility::PartiallyCompatible,
                    ConstraintType::Hard | ConstraintType::MandatoryHard => {
                        Compatibility::Incompatible
                    }
                };
                result = result.join(verdict);
            }
            Ok(_) => {}
        }
    }
    result
}
