//! Computational core of a pharmacokinetic decision-support engine.
//!
//! Given a drug model, a patient's treatment history, and an observation
//! window, the crate produces the time-ordered series a PK simulator
//! consumes: the covariate trajectory, the drug-model admissibility
//! verdict, and the parameter set events.
//!
//! The pieces compose as
//! `CovariateExtractor -> DomainConstraintsEvaluator -> ParametersExtractor`,
//! all driven by the shared [`graph::OperableGraphManager`];
//! [`extraction::pipeline::ExtractionPipeline`] wires them for the common
//! case.

pub mod error;
pub mod extraction;
pub mod graph;
pub mod model;
pub mod operation;
pub mod time;
pub mod treatment;
pub mod units;

pub use crate::error::{CoreError, CoreResult};
pub use crate::extraction::covariates::CovariateExtractor;
pub use crate::extraction::domain::{
    Compatibility, ConstraintEvaluation, ConstraintSource, DomainConstraintsEvaluator,
    DomainEvaluation,
};
pub use crate::extraction::parameters::ParametersExtractor;
pub use crate::extraction::pipeline::{ExtractionPipeline, PipelineOutput};
pub use crate::extraction::{
    CovariateEvent, CovariateSeries, CovariateValue, ParameterEvent, ParameterSetEvent,
    ParameterSetSeries,
};
pub use crate::graph::OperableGraphManager;
pub use crate::model::{
    AnalyteGroup, Constraint, ConstraintType, CovariateCategory, CovariateDefinition, DataType,
    DrugModel, DrugModelDomain, Interpolation, LocalizedText, ParameterDefinition,
};
pub use crate::operation::{InputSpec, InputType, Operation, OperationInput};
pub use crate::time::{CalendarDuration, Instant};
pub use crate::treatment::{DrugTreatment, IntakeEvent, PatientCovariate, Sample, Target};
pub use crate::units::Unit;
