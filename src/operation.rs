pub mod expr;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Scalar type of a declared formula input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Bool,
    Int,
    Double,
}

/// A named input an operation declares it consumes. The declared list is
/// what the graph manager uses to discover dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSpec {
    pub name: String,
    pub input_type: InputType,
}

impl InputSpec {
    pub fn new<S: Into<String>>(name: S, input_type: InputType) -> Self {
        Self {
            name: name.into(),
            input_type,
        }
    }
}

/// A concrete value bound to an input name at evaluation time.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationInput {
    pub name: String,
    pub value: f64,
}

impl OperationInput {
    pub fn new<S: Into<String>>(name: S, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// A pure function of its declared inputs: either a numeric constant (the
/// form population values take) or a scripted expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Constant(f64),
    Expression {
        formula: String,
        inputs: Vec<InputSpec>,
    },
}

impl Operation {
    pub fn constant(value: f64) -> Self {
        Operation::Constant(value)
    }

    pub fn expression<S: Into<String>>(formula: S, inputs: Vec<InputSpec>) -> Self {
        Operation::Expression {
            formula: formula.into(),
            inputs,
        }
    }

    /// The declared inputs, in declaration order. Empty for constants.
    pub fn inputs(&self) -> &[InputSpec] {
        match self {
            Operation::Constant(_) => &[],
            Operation::Expression { inputs, .. } => inputs,
        }
    }

    /// Evaluate against concrete values. Re-entrant: no state survives the
    /// call. Fails when a declared input is absent from `values`, when the
    /// formula is malformed or references an unprovided name, or when the
    /// result is not finite.
    pub fn evaluate(&self, values: &[OperationInput]) -> CoreResult<f64> {
        match self {
            Operation::Constant(value) => Ok(*value),
            Operation::Expression { formula, inputs } => {
                let mut vars: HashMap<String, f64> = HashMap::with_capacity(values.len());
                for input in values {
                    vars.insert(input.name.clone(), input.value);
                }
                for spec in inputs {
                    if !vars.contains_key(&spec.name) {
                        return Err(CoreError::Evaluation(format!(
                            "declared input '{}' was not provided to formula '{}'",
                            spec.name, formula
                        )));
                    }
                }
                let result = expr::evaluate(&expr::parse(formula)?, &vars)?;
                if !result.is_finite() {
                    return Err(CoreError::Evaluation(format!(
                        "formula '{}' produced a non-finite result",
                        formula
                    )));
                }
                Ok(result)
            }
        }
    }
}
