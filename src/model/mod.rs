use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::operation::Operation;
use crate::time::{to_seconds, CalendarDuration, Instant};
use crate::units::Unit;

/// Type of the data carried by a covariate value string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Bool,
    Int,
    Double,
    Date,
}

impl DataType {
    /// Parse a value string into the numeric representation used throughout
    /// the pipeline. Dates become epoch seconds; booleans become 0/1.
    pub fn parse_value(&self, text: &str) -> CoreResult<f64> {
        let trimmed = text.trim();
        let invalid = || {
            CoreError::InvalidInput(format!("cannot parse '{}' as {:?} value", text, self))
        };
        match self {
            DataType::Bool => match trimmed.to_lowercase().as_str() {
                "0" | "false" => Ok(0.0),
                "1" | "true" => Ok(1.0),
                _ => Err(invalid()),
            },
            DataType::Int => trimmed
                .parse::<i64>()
                .map(|v| v as f64)
                .map_err(|_| invalid()),
            DataType::Double => match trimmed.parse::<f64>() {
                Ok(v) if v.is_finite() => Ok(v),
                _ => Err(invalid()),
            },
            DataType::Date => parse_date(trimmed)
                .map(|t| to_seconds(t) as f64)
                .ok_or_else(invalid),
        }
    }
}

/// Parse a civil date-time in `YYYY-MM-DDTHH:MM:SS` form (a space instead
/// of the `T` is accepted).
pub fn parse_date(text: &str) -> Option<Instant> {
    Instant::parse_from_str(text, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| Instant::parse_from_str(text, "%Y-%m-%d %H:%M:%S"))
        .ok()
}

/// Role of a covariate. Age and time-from-start categories have their
/// values derived from the calendar rather than measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CovariateCategory {
    Standard,
    AgeInDays,
    AgeInWeeks,
    AgeInMonths,
    AgeInYears,
    TimeFromStartInHours,
    TimeFromStartInDays,
    TimeFromStartInWeeks,
    TimeFromStartInMonths,
    TimeFromStartInYears,
    Sex,
    Dose,
}

impl CovariateCategory {
    pub fn is_age(&self) -> bool {
        matches!(
            self,
            CovariateCategory::AgeInDays
                | CovariateCategory::AgeInWeeks
                | CovariateCategory::AgeInMonths
                | CovariateCategory::AgeInYears
        )
    }

    pub fn is_time_from_start(&self) -> bool {
        matches!(
            self,
            CovariateCategory::TimeFromStartInHours
                | CovariateCategory::TimeFromStartInDays
                | CovariateCategory::TimeFromStartInWeeks
                | CovariateCategory::TimeFromStartInMonths
                | CovariateCategory::TimeFromStartInYears
        )
    }

    /// Natural refresh cadence of a derived category: the instant spacing
    /// at which its value ticks by one granular unit.
    pub fn cadence(&self) -> Option<CalendarDuration> {
        match self {
            CovariateCategory::AgeInDays | CovariateCategory::TimeFromStartInDays => {
                Some(CalendarDuration::Days(1))
            }
            CovariateCategory::AgeInWeeks | CovariateCategory::TimeFromStartInWeeks => {
                Some(CalendarDuration::Weeks(1))
            }
            CovariateCategory::AgeInMonths | CovariateCategory::TimeFromStartInMonths => {
                Some(CalendarDuration::Months(1))
            }
            CovariateCategory::AgeInYears | CovariateCategory::TimeFromStartInYears => {
                Some(CalendarDuration::Years(1))
            }
            CovariateCategory::TimeFromStartInHours => Some(CalendarDuration::Hours(1)),
            CovariateCategory::Standard | CovariateCategory::Sex | CovariateCategory::Dose => None,
        }
    }
}

/// How values between two observations are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    /// Step function: hold the earlier observation.
    Direct,
    /// Straight line through the two observations.
    Linear,
}

/// Immutable table of translations keyed by language tag. Lookups fall
/// back to `"en"`, then to any available entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalizedText(BTreeMap<String, String>);

impl LocalizedText {
    pub fn new<S: Into<String>>(english: S) -> Self {
        let mut table = BTreeMap::new();
        table.insert("en".to_string(), english.into());
        LocalizedText(table)
    }

    pub fn with<L: Into<String>, S: Into<String>>(mut self, lang: L, text: S) -> Self {
        self.0.insert(lang.into(), text.into());
        self
    }

    pub fn get(&self, lang: &str) -> &str {
        self.0
            .get(lang)
            .or_else(|| self.0.get("en"))
            .or_else(|| self.0.values().next())
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Static definition of a covariate in the drug model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovariateDefinition {
    pub id: String,
    #[serde(default)]
    pub name: LocalizedText,
    #[serde(default)]
    pub description: LocalizedText,
    pub category: CovariateCategory,
    pub data_type: DataType,
    pub interpolation: Interpolation,
    #[serde(default)]
    pub unit: Unit,
    /// Default value as a string, parsed according to `data_type`.
    pub default_value: String,
    #[serde(default)]
    pub refresh_period: Option<CalendarDuration>,
    /// Present when the covariate is computed from other covariates.
    #[serde(default)]
    pub operation: Option<Operation>,
    /// Admissibility predicate over this covariate's value (0/1).
    #[serde(default)]
    pub validation: Option<Operation>,
}

impl CovariateDefinition {
    pub fn new<I: Into<String>, V: Into<String>>(
        id: I,
        default_value: V,
        category: CovariateCategory,
        data_type: DataType,
        interpolation: Interpolation,
    ) -> Self {
        let id = id.into();
        Self {
            name: LocalizedText::new(id.clone()),
            description: LocalizedText::default(),
            id,
            category,
            data_type,
            interpolation,
            unit: Unit::default(),
            default_value: default_value.into(),
            refresh_period: None,
            operation: None,
            validation: None,
        }
    }

    pub fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = unit;
        self
    }

    pub fn with_refresh_period(mut self, period: CalendarDuration) -> Self {
        self.refresh_period = Some(period);
        self
    }

    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operation = Some(operation);
        self
    }

    pub fn with_validation(mut self, validation: Operation) -> Self {
        self.validation = Some(validation);
        self
    }

    pub fn with_name(mut self, name: LocalizedText) -> Self {
        self.name = name;
        self
    }

    pub fn with_description(mut self, description: LocalizedText) -> Self {
        self.description = description;
        self
    }

    pub fn is_computed(&self) -> bool {
        self.operation.is_some()
    }

    /// Default value parsed per the declared data type.
    pub fn default_numeric_value(&self) -> CoreResult<f64> {
        self.data_type.parse_value(&self.default_value)
    }
}

/// Definition of a parameter consumed by the downstream simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    pub id: String,
    /// Population (typical) value.
    pub value: f64,
    /// Whether inter-individual variability applies to this parameter.
    #[serde(default)]
    pub variability: bool,
    /// Present when the parameter is computed from covariates.
    #[serde(default)]
    pub operation: Option<Operation>,
}

impl ParameterDefinition {
    pub fn new<S: Into<String>>(id: S, value: f64) -> Self {
        Self {
            id: id.into(),
            value,
            variability: false,
            operation: None,
        }
    }

    pub fn with_variability(mut self, variability: bool) -> Self {
        self.variability = variability;
        self
    }

    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operation = Some(operation);
        self
    }

    pub fn is_computed(&self) -> bool {
        self.operation.is_some()
    }
}

/// Parameter definitions for one analyte/formulation pairing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyteGroup {
    pub id: String,
    pub parameters: Vec<ParameterDefinition>,
}

/// Severity of a domain constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintType {
    /// Violation only degrades the verdict to partially compatible.
    Soft,
    Hard,
    /// Hard, and the required covariates must be present in the treatment.
    MandatoryHard,
}

/// Admissibility predicate of the drug model over covariate values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub constraint_type: ConstraintType,
    #[serde(default)]
    pub description: LocalizedText,
    pub required_covariate_ids: Vec<String>,
    /// Check operation returning 0 (violated) or 1 (satisfied).
    pub check: Operation,
}

impl Constraint {
    pub fn new(
        constraint_type: ConstraintType,
        required_covariate_ids: Vec<String>,
        check: Operation,
    ) -> Self {
        Self {
            constraint_type,
            description: LocalizedText::default(),
            required_covariate_ids,
            check,
        }
    }
}

/// The admissibility domain of a drug model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrugModelDomain {
    #[serde(default)]
    pub description: LocalizedText,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
}

/// The read-only drug-model bundle the pipeline consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrugModel {
    pub drug_id: String,
    pub covariates: Vec<CovariateDefinition>,
    pub analyte_groups: Vec<AnalyteGroup>,
    #[serde(default)]
    pub domain: DrugModelDomain,
    #[serde(default)]
    pub time_to_steady_state: Option<CalendarDuration>,
}

impl DrugModel {
    /// Parse a model bundle from JSON and validate it.
    pub fn from_json(text: &str) -> CoreResult<DrugModel> {
        let model: DrugModel = serde_json::from_str(text)?;
        model.validate()?;
        Ok(model)
    }

    /// Enforce the structural invariants of the bundle.
    pub fn validate(&self) -> CoreResult<()> {
        if self.drug_id.trim().is_empty() {
            return Err(CoreError::InvalidInput("drug model has no id".to_string()));
        }

        let mut seen_ids = HashSet::new();
        let mut seen_categories = HashSet::new();
        for covariate in &self.covariates {
            if covariate.id.trim().is_empty() {
                return Err(CoreError::InvalidInput(
                    "a covariate definition has no id".to_string(),
                ));
            }
            if !seen_ids.insert(covariate.id.as_str()) {
                return Err(CoreError::InvalidInput(format!(
                    "duplicate covariate definition '{}'",
                    covariate.id
                )));
            }
            let derived = covariate.category.is_age() || covariate.category.is_time_from_start();
            if derived {
                // One covariate per age/time category.
                if !seen_categories.insert(covariate.category) {
                    return Err(CoreError::InvalidInput(format!(
                        "more than one covariate with category {:?}",
                        covariate.category
                    )));
                }
                if covariate.default_numeric_value()? < 0.0 {
                    return Err(CoreError::InvalidInput(format!(
                        "covariate '{}' has a negative age/time default",
                        covariate.id
                    )));
                }
                if covariate.refresh_period.is_some() {
                    return Err(CoreError::InvalidInput(format!(
                        "covariate '{}' is calendar-derived and cannot set a refresh period",
                        covariate.id
                    )));
                }
            }
            if covariate.category != CovariateCategory::Standard && covariate.operation.is_some() {
                return Err(CoreError::InvalidInput(format!(
                    "covariate '{}' of category {:?} cannot be computed",
                    covariate.id, covariate.category
                )));
            }
            // Default must parse whatever the category.
            covariate.default_numeric_value()?;
        }

        for group in &self.analyte_groups {
            if group.id.trim().is_empty() {
                return Err(CoreError::InvalidInput(
                    "an analyte group has no id".to_string(),
                ));
            }
            let mut seen_parameters = HashSet::new();
            for parameter in &group.parameters {
                if parameter.id.trim().is_empty() {
                    return Err(CoreError::InvalidInput(format!(
                        "a parameter in analyte group '{}' has no id",
                        group.id
                    )));
                }
                if !seen_parameters.insert(parameter.id.as_str()) {
                    return Err(CoreError::InvalidInput(format!(
                        "duplicate parameter '{}' in analyte group '{}'",
                        parameter.id, group.id
                    )));
                }
            }
        }

        for constraint in &self.domain.constraints {
            if constraint.required_covariate_ids.is_empty() {
                return Err(CoreError::InvalidInput(
                    "a domain constraint names no required covariate".to_string(),
                ));
            }
            if constraint
                .required_covariate_ids
                .iter()
                .any(|id| id.trim().is_empty())
            {
                return Err(CoreError::InvalidInput(
                    "a domain constraint has an empty required covariate id".to_string(),
                ));
            }
        }

        Ok(())
    }

    pub fn analyte_group(&self, id: &str) -> Option<&AnalyteGroup> {
        self.analyte_groups.iter().find(|group| group.id == id)
    }
}
