use log::info;

use super::covariates::CovariateExtractor;
use super::domain::{DomainConstraintsEvaluator, DomainEvaluation};
use super::parameters::ParametersExtractor;
use super::{CovariateSeries, ParameterSetSeries};
use crate::error::{CoreError, CoreResult};
use crate::model::{CovariateCategory, DrugModel};
use crate::time::Instant;
use crate::treatment::DrugTreatment;

/// Everything the downstream simulators consume for one observation
/// window.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub covariates: CovariateSeries,
    pub domain: DomainEvaluation,
    /// Delta form: each event carries the parameters changing at its
    /// instant.
    pub parameters: ParameterSetSeries,
}

impl PipelineOutput {
    /// The parameter series with every parameter restated at every event.
    pub fn full_parameters(&self) -> ParameterSetSeries {
        ParametersExtractor::build_full_set(&self.parameters)
    }
}

/// Wires the covariate extraction, the domain evaluation, and the
/// parameters extraction over one drug model and one treatment.
pub struct ExtractionPipeline<'a> {
    model: &'a DrugModel,
    treatment: &'a DrugTreatment,
}

impl<'a> ExtractionPipeline<'a> {
    pub fn new(model: &'a DrugModel, treatment: &'a DrugTreatment) -> CoreResult<Self> {
        model.validate()?;
        Ok(Self { model, treatment })
    }

    /// Run the full extraction over `[start, end]` for one analyte group.
    /// The domain verdict is carried in the output rather than
    /// short-circuiting: deciding whether to simulate an incompatible
    /// model is the caller's call.
    pub fn run(
        &self,
        analyte_group_id: &str,
        start: Instant,
        end: Instant,
    ) -> CoreResult<PipelineOutput> {
        let group = self.model.analyte_group(analyte_group_id).ok_or_else(|| {
            CoreError::InvalidInput(format!("unknown analyte group '{}'", analyte_group_id))
        })?;
        info!(
            "running extraction pipeline for '{}' / '{}'",
            self.model.drug_id, analyte_group_id
        );

        // Models may use the administered dose as a covariate; synthesize
        // its variates from the intake series.
        let mut variates = self.treatment.covariates.clone();
        for definition in &self.model.covariates {
            if definition.category == CovariateCategory::Dose {
                variates.extend(CovariateExtractor::extract_dose_variates(
                    &self.treatment.intakes,
                    definition,
                )?);
            }
        }

        let mut extractor =
            CovariateExtractor::new(&self.model.covariates, &variates, start, end)?;
        if let Some(treatment_start) = self.treatment.treatment_start() {
            extractor = extractor.with_treatment_start(treatment_start);
        }
        let covariates = extractor.extract()?;

        let domain = DomainConstraintsEvaluator::evaluate_extracted(
            self.model,
            self.treatment,
            &covariates,
            start,
            end,
        )?;

        let parameters =
            ParametersExtractor::new(&covariates, &group.parameters, start, end)?.extract()?;

        info!(
            "pipeline produced {} covariate events, {} parameter set events, verdict {:?}",
            covariates.len(),
            parameters.len(),
            domain.global
        );
        Ok(PipelineOutput {
            covariates,
            domain,
            parameters,
        })
    }

    /// Population-only parameters for one analyte group, for callers with
    /// no patient context.
    pub fn population_parameters(
        &self,
        analyte_group_id: &str,
    ) -> CoreResult<ParameterSetSeries> {
        let group = self.model.analyte_group(analyte_group_id).ok_or_else(|| {
            CoreError::InvalidInput(format!("unknown analyte group '{}'", analyte_group_id))
        })?;
        Ok(ParametersExtractor::extract_population(&group.parameters))
    }
}
