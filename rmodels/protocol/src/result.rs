use serde::{Deserialize, Serialize};

use crate::{
    error::ProtocolError,
    qap,
    rexp::{RValue, Rexp},
};

/// Value produced by one evaluation, classified once at the boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ProtocolResult {
    /// `NULL` or an assignment with no visible value.
    Null,
    /// Single integer.
    Integer(i64),
    /// Single double.
    Double(f64),
    /// Single string.
    Text(String),
    /// Numeric vector or matrix, flattened in engine order.
    NumericVector(Vec<f64>),
    /// Any other shape, described for diagnostics.
    Unrecognized(String),
}

impl ProtocolResult {
    /// Classifies a decoded expression, turning `try-error` values into
    /// [`ProtocolError::Remote`].
    pub fn from_rexp(rexp: &Rexp) -> Result<Self, ProtocolError> {
        if rexp.inherits("try-error") {
            let message = rexp
                .strings()
                .first()
                .cloned()
                .flatten()
                .unwrap_or_else(|| "evaluation failed".to_string());
            return Err(ProtocolError::Remote(message.trim_end().to_string()));
        }
        let shaped = rexp.attribute("dim").is_some();
        let result = match &rexp.value {
            RValue::Null => Self::Null,
            RValue::Int(values) if values.len() == 1 && !shaped => {
                if values[0] == qap::NA_INTEGER {
                    Self::Double(f64::NAN)
                } else {
                    Self::Integer(i64::from(values[0]))
                }
            }
            RValue::Int(values) => Self::NumericVector(
                values
                    .iter()
                    .map(|value| {
                        if *value == qap::NA_INTEGER {
                            f64::NAN
                        } else {
                            f64::from(*value)
                        }
                    })
                    .collect(),
            ),
            RValue::Double(values) if values.len() == 1 && !shaped => Self::Double(values[0]),
            RValue::Double(values) => Self::NumericVector(values.clone()),
            RValue::Str(values) if values.len() == 1 && values[0].is_some() => {
                Self::Text(values[0].clone().unwrap_or_default())
            }
            _ => Self::Unrecognized(rexp.shape()),
        };
        Ok(result)
    }

    /// Numbers of a numeric result; scalars become one-element vectors.
    pub fn into_numbers(self) -> Result<Vec<f64>, ProtocolError> {
        match self {
            Self::NumericVector(values) => Ok(values),
            Self::Double(value) => Ok(vec![value]),
            #[allow(clippy::cast_precision_loss)]
            Self::Integer(value) => Ok(vec![value as f64]),
            other => Err(ProtocolError::UnexpectedResult {
                expected: "numeric",
                actual: other.describe(),
            }),
        }
    }

    /// Text of a string result.
    pub fn into_text(self) -> Result<String, ProtocolError> {
        match self {
            Self::Text(text) => Ok(text),
            other => Err(ProtocolError::UnexpectedResult {
                expected: "text",
                actual: other.describe(),
            }),
        }
    }

    /// Short description of the variant.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Integer(value) => format!("integer {value}"),
            Self::Double(value) => format!("double {value}"),
            Self::Text(_) => "text".to_string(),
            Self::NumericVector(values) => format!("numeric vector of {}", values.len()),
            Self::Unrecognized(shape) => shape.clone(),
        }
    }
}
