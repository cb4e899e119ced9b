use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, CoreResult};

/// A free-form symbolic unit token, e.g. `"kg"`, `"ug/l"`, `"mg*h/l"`.
/// The empty string and `"-"` denote a dimensionless quantity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Unit(String);

impl Unit {
    pub fn new<S: Into<String>>(token: S) -> Self {
        Unit(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_dimensionless(&self) -> bool {
        matches!(normalize(&self.0).as_str(), "" | "-")
    }
}

impl From<&str> for Unit {
    fn from(token: &str) -> Self {
        Unit(token.to_string())
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dimension {
    Mass,
    Length,
    Time,
    Volume,
    Concentration,
    MolarConcentration,
    Flow,
    ConcentrationTime,
}

/// Lowercase the token, strip spaces, and fold the multiplication dot and
/// micro sign into their ASCII spellings.
fn normalize(token: &str) -> String {
    token
        .trim()
        .to_lowercase()
        .replace(' ', "")
        .replace('\u{00b7}', "*")
        .replace('\u{00b5}', "u")
        .replace('\u{03bc}', "u")
}

/// Map a normalized token onto its dimension class and the factor to that
/// class' canonical unit (g, m, s, l, g/l, mol/l, l/h, g*h/l).
fn lookup(token: &str) -> Option<(Dimension, f64)> {
    use Dimension::*;
    let entry = match token {
        // Mass, canonical g.
        "ug" => (Mass, 1e-6),
        "mg" => (Mass, 1e-3),
        "g" => (Mass, 1.0),
        "kg" => (Mass, 1e3),
        // Length, canonical m.
        "mm" => (Length, 1e-3),
        "cm" => (Length, 1e-2),
        "dm" => (Length, 0.1),
        "m" => (Length, 1.0),
        // Time, canonical s.
        "s" => (Time, 1.0),
        "min" => (Time, 60.0),
        "h" => (Time, 3_600.0),
        "d" | "day" | "days" => (Time, 86_400.0),
        "w" | "week" | "weeks" => (Time, 604_800.0),
        // Volume, canonical l.
        "ml" => (Volume, 1e-3),
        "cl" => (Volume, 1e-2),
        "dl" => (Volume, 0.1),
        "l" => (Volume, 1.0),
        // Mass concentration, canonical g/l.
        "g/l" | "mg/ml" => (Concentration, 1.0),
        "mg/l" | "ug/ml" => (Concentration, 1e-3),
        "ug/l" | "ng/ml" => (Concentration, 1e-6),
        "ng/l" => (Concentration, 1e-9),
        "g/ml" => (Concentration, 1e3),
        "g/dl" => (Concentration, 10.0),
        "mg/dl" => (Concentration, 1e-2),
        "ug/dl" => (Concentration, 1e-5),
        // Molar concentration, canonical mol/l.
        "mol/l" | "mmol/ml" => (MolarConcentration, 1.0),
        "mmol/l" | "umol/ml" => (MolarConcentration, 1e-3),
        "umol/l" | "nmol/ml" => (MolarConcentration, 1e-6),
        "nmol/l" => (MolarConcentration, 1e-9),
        // Flow, canonical l/h.
        "l/h" => (Flow, 1.0),
        "dl/h" => (Flow, 0.1),
        "ml/h" => (Flow, 1e-3),
        "l/min" => (Flow, 60.0),
        "ml/min" => (Flow, 0.06),
        "l/s" => (Flow, 3_600.0),
        "ml/s" => (Flow, 3.6),
        // Area under the curve (concentration·time), canonical g*h/l.
        "g*h/l" | "h*g/l" => (ConcentrationTime, 1.0),
        "mg*h/l" | "h*mg/l" => (ConcentrationTime, 1e-3),
        "ug*h/l" | "h*ug/l" => (ConcentrationTime, 1e-6),
        "ng*h/l" | "h*ng/l" => (ConcentrationTime, 1e-9),
        "g*min/l" | "min*g/l" => (ConcentrationTime, 1.0 / 60.0),
        "mg*min/l" | "min*mg/l" => (ConcentrationTime, 1e-3 / 60.0),
        "ug*min/l" | "min*ug/l" => (ConcentrationTime, 1e-6 / 60.0),
        _ => return None,
    };
    Some(entry)
}

/// Convert `value` from one unit to a commensurable one. Identity when the
/// normalized tokens match or both sides are dimensionless; any other
/// combination of unknown or incommensurable tokens is a `UnitMismatch`.
pub fn convert(value: f64, from: &Unit, to: &Unit) -> CoreResult<f64> {
    let nf = normalize(from.as_str());
    let nt = normalize(to.as_str());
    if nf == nt {
        return Ok(value);
    }

    let from_dimless = matches!(nf.as_str(), "" | "-");
    let to_dimless = matches!(nt.as_str(), "" | "-");
    if from_dimless && to_dimless {
        return Ok(value);
    }

    let mismatch = || CoreError::UnitMismatch {
        from: from.as_str().to_string(),
        to: to.as_str().to_string(),
    };

    if from_dimless || to_dimless {
        return Err(mismatch());
    }

    match (lookup(&nf), lookup(&nt)) {
        (Some((df, ff)), Some((dt, ft))) if df == dt => Ok(value * ff / ft),
        _ => Err(mismatch()),
    }
}
