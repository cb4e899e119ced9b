use serde::{Deserialize, Serialize};

use crate::model::DataType;
use crate::time::Instant;
use crate::units::Unit;

/// Standard id of the patient variate carrying the birth date.
pub const BIRTHDATE_ID: &str = "birthdate";

/// A measured observation of a covariate at a specific instant. The value
/// is kept as a string because it can be of any data type (the date type in
/// particular needs it).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientCovariate {
    pub id: String,
    pub value: String,
    pub data_type: DataType,
    #[serde(default)]
    pub unit: Unit,
    pub event_time: Instant,
}

impl PatientCovariate {
    pub fn new<I: Into<String>, V: Into<String>>(
        id: I,
        value: V,
        data_type: DataType,
        unit: Unit,
        event_time: Instant,
    ) -> Self {
        Self {
            id: id.into(),
            value: value.into(),
            data_type,
            unit,
            event_time,
        }
    }

    /// True when this variate carries the patient's birth date.
    pub fn is_birthdate(&self) -> bool {
        self.id.eq_ignore_ascii_case(BIRTHDATE_ID) && self.data_type == DataType::Date
    }
}

/// One administration from the intake extractor's output series. Consumed
/// as-is: the core only reads times and amounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntakeEvent {
    pub time: Instant,
    pub amount: f64,
    #[serde(default)]
    pub unit: Unit,
}

/// A measured blood concentration, consumed by the sample extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub time: Instant,
    pub analyte_id: String,
    pub value: f64,
    #[serde(default)]
    pub unit: Unit,
}

/// A patient-specific therapeutic target, consumed by the target extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub analyte_id: String,
    pub min: f64,
    pub best: f64,
    pub max: f64,
    #[serde(default)]
    pub unit: Unit,
}

/// The read-only treatment history of one patient.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrugTreatment {
    #[serde(default)]
    pub intakes: Vec<IntakeEvent>,
    #[serde(default)]
    pub covariates: Vec<PatientCovariate>,
    #[serde(default)]
    pub samples: Vec<Sample>,
    #[serde(default)]
    pub targets: Vec<Target>,
}

impl DrugTreatment {
    /// The treatment start, i.e. the earliest intake instant.
    pub fn treatment_start(&self) -> Option<Instant> {
        self.intakes.iter().map(|intake| intake.time).min()
    }

    /// The birth date, when a birthdate variate is present.
    pub fn birthdate(&self) -> Option<Instant> {
        self.covariates
            .iter()
            .find(|variate| variate.is_birthdate())
            .and_then(|variate| crate::model::parse_date(variate.value.trim()))
    }
}
