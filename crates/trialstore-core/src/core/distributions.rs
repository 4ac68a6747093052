// crates/trialstore-core/src/core/distributions.rs
// ============================================================================
// Module: Trialstore Distributions
// Description: Sampling distributions and parameter value codec.
// Purpose: Convert parameters between typed and numeric forms and check that
//          repeated uses of one parameter name agree on their value space.
// Dependencies: serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! A [`Distribution`] describes the value space a parameter was sampled from.
//! Storage keeps every parameter in an internal numeric form (a float, or the
//! index of a categorical choice) next to the JSON form of its distribution;
//! readers turn the pair back into a typed [`ParamValue`].
//!
//! The JSON form is `{"name": "<Kind>Distribution", "attributes": {...}}` so
//! that rows written by other clients of the same schema stay readable.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Distribution construction and codec errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DistributionError {
    /// Distribution bounds or choices are invalid.
    #[error("invalid distribution: {0}")]
    Invalid(String),
    /// Two distributions cannot share one parameter name.
    #[error("incompatible distribution: {0}")]
    Incompatible(String),
    /// A value is outside the distribution's value space.
    #[error("value outside distribution: {0}")]
    OutOfDomain(String),
    /// Distribution JSON could not be encoded or decoded.
    #[error("distribution json error: {0}")]
    Json(String),
}

// ============================================================================
// SECTION: Parameter Values
// ============================================================================

/// Typed (external) parameter value, also used for categorical choices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Null choice.
    None,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// String value.
    Str(String),
}

impl ParamValue {
    /// Returns the value as a float when it is numeric.
    #[must_use]
    #[allow(clippy::cast_precision_loss, reason = "Integer parameters are sampled as floats.")]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(value) => Some(*value as f64),
            Self::Float(value) => Some(*value),
            Self::None | Self::Bool(_) | Self::Str(_) => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(value) => value.fmt(f),
            Self::Int(value) => value.fmt(f),
            Self::Float(value) => value.fmt(f),
            Self::Str(value) => value.fmt(f),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

// ============================================================================
// SECTION: Distributions
// ============================================================================

/// Sampling distribution of a single parameter.
///
/// # Invariants
/// - Instances built through the constructors or [`json_to_distribution`]
///   satisfy [`Distribution::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "attributes")]
pub enum Distribution {
    /// Continuous uniform over `[low, high)`.
    #[serde(rename = "UniformDistribution")]
    Uniform {
        /// Lower bound (inclusive).
        low: f64,
        /// Upper bound (exclusive unless equal to `low`).
        high: f64,
    },
    /// Log-uniform over `[low, high)`.
    #[serde(rename = "LogUniformDistribution")]
    LogUniform {
        /// Lower bound (inclusive, positive).
        low: f64,
        /// Upper bound.
        high: f64,
    },
    /// Uniform over `low, low + q, ..., high`.
    #[serde(rename = "DiscreteUniformDistribution")]
    DiscreteUniform {
        /// Lower bound (inclusive).
        low: f64,
        /// Upper bound (inclusive).
        high: f64,
        /// Discretization step.
        q: f64,
    },
    /// Integer uniform over `low, low + step, ..., high`.
    #[serde(rename = "IntUniformDistribution")]
    IntUniform {
        /// Lower bound (inclusive).
        low: i64,
        /// Upper bound (inclusive).
        high: i64,
        /// Step between admissible values.
        step: i64,
    },
    /// Integer log-uniform over `[low, high]`.
    #[serde(rename = "IntLogUniformDistribution")]
    IntLogUniform {
        /// Lower bound (inclusive, positive).
        low: i64,
        /// Upper bound (inclusive).
        high: i64,
        /// Step between admissible values.
        step: i64,
    },
    /// Choice among a fixed list of values; stored as the choice index.
    #[serde(rename = "CategoricalDistribution")]
    Categorical {
        /// Admissible choices in index order.
        choices: Vec<ParamValue>,
    },
}

impl Distribution {
    /// Builds a validated uniform distribution.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::Invalid`] when `low > high`.
    pub fn uniform(low: f64, high: f64) -> Result<Self, DistributionError> {
        let distribution = Self::Uniform {
            low,
            high,
        };
        distribution.validate()?;
        Ok(distribution)
    }

    /// Builds a validated log-uniform distribution.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::Invalid`] when bounds are not positive or
    /// `low > high`.
    pub fn log_uniform(low: f64, high: f64) -> Result<Self, DistributionError> {
        let distribution = Self::LogUniform {
            low,
            high,
        };
        distribution.validate()?;
        Ok(distribution)
    }

    /// Builds a validated discrete uniform distribution.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::Invalid`] for inverted bounds or a
    /// non-positive `q`.
    pub fn discrete_uniform(low: f64, high: f64, q: f64) -> Result<Self, DistributionError> {
        let distribution = Self::DiscreteUniform {
            low,
            high,
            q,
        };
        distribution.validate()?;
        Ok(distribution)
    }

    /// Builds a validated integer uniform distribution.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::Invalid`] for inverted bounds or a
    /// non-positive step.
    pub fn int_uniform(low: i64, high: i64, step: i64) -> Result<Self, DistributionError> {
        let distribution = Self::IntUniform {
            low,
            high,
            step,
        };
        distribution.validate()?;
        Ok(distribution)
    }

    /// Builds a validated integer log-uniform distribution.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::Invalid`] for non-positive or inverted
    /// bounds, or a non-positive step.
    pub fn int_log_uniform(low: i64, high: i64, step: i64) -> Result<Self, DistributionError> {
        let distribution = Self::IntLogUniform {
            low,
            high,
            step,
        };
        distribution.validate()?;
        Ok(distribution)
    }

    /// Builds a validated categorical distribution.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::Invalid`] when `choices` is empty.
    pub fn categorical(choices: Vec<ParamValue>) -> Result<Self, DistributionError> {
        let distribution = Self::Categorical {
            choices,
        };
        distribution.validate()?;
        Ok(distribution)
    }

    /// Returns the stable kind name used in the JSON form.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Uniform {
                ..
            } => "UniformDistribution",
            Self::LogUniform {
                ..
            } => "LogUniformDistribution",
            Self::DiscreteUniform {
                ..
            } => "DiscreteUniformDistribution",
            Self::IntUniform {
                ..
            } => "IntUniformDistribution",
            Self::IntLogUniform {
                ..
            } => "IntLogUniformDistribution",
            Self::Categorical {
                ..
            } => "CategoricalDistribution",
        }
    }

    /// Validates bounds, steps, and choices.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::Invalid`] describing the first violation.
    pub fn validate(&self) -> Result<(), DistributionError> {
        match self {
            Self::Uniform {
                low,
                high,
            } => ensure_float_bounds(self.kind_name(), *low, *high),
            Self::LogUniform {
                low,
                high,
            } => {
                ensure_float_bounds(self.kind_name(), *low, *high)?;
                if *low <= 0.0 {
                    return Err(DistributionError::Invalid(format!(
                        "{} requires low > 0 (low={low})",
                        self.kind_name()
                    )));
                }
                Ok(())
            }
            Self::DiscreteUniform {
                low,
                high,
                q,
            } => {
                ensure_float_bounds(self.kind_name(), *low, *high)?;
                if !q.is_finite() || *q <= 0.0 {
                    return Err(DistributionError::Invalid(format!(
                        "{} requires q > 0 (q={q})",
                        self.kind_name()
                    )));
                }
                Ok(())
            }
            Self::IntUniform {
                low,
                high,
                step,
            } => ensure_int_bounds(self.kind_name(), *low, *high, *step),
            Self::IntLogUniform {
                low,
                high,
                step,
            } => {
                ensure_int_bounds(self.kind_name(), *low, *high, *step)?;
                if *low < 1 {
                    return Err(DistributionError::Invalid(format!(
                        "{} requires low >= 1 (low={low})",
                        self.kind_name()
                    )));
                }
                Ok(())
            }
            Self::Categorical {
                choices,
            } => {
                if choices.is_empty() {
                    return Err(DistributionError::Invalid(
                        "CategoricalDistribution requires at least one choice".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Converts a typed value into its stored numeric form.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::OutOfDomain`] when the value type does not
    /// fit the distribution or the value is not a categorical choice.
    pub fn to_internal_repr(&self, value: &ParamValue) -> Result<f64, DistributionError> {
        match self {
            Self::Uniform {
                ..
            }
            | Self::LogUniform {
                ..
            }
            | Self::DiscreteUniform {
                ..
            } => value.as_f64().ok_or_else(|| {
                DistributionError::OutOfDomain(format!(
                    "{} expects a numeric value, got {value}",
                    self.kind_name()
                ))
            }),
            Self::IntUniform {
                ..
            }
            | Self::IntLogUniform {
                ..
            } => match value {
                ParamValue::Int(_) => value.as_f64().ok_or_else(|| {
                    DistributionError::OutOfDomain(format!("{} expects an integer", self.kind_name()))
                }),
                ParamValue::Float(number) if number.is_finite() && number.fract() == 0.0 => {
                    Ok(*number)
                }
                _ => Err(DistributionError::OutOfDomain(format!(
                    "{} expects an integer value, got {value}",
                    self.kind_name()
                ))),
            },
            Self::Categorical {
                choices,
            } => {
                let index = choices.iter().position(|choice| choice == value).ok_or_else(|| {
                    DistributionError::OutOfDomain(format!("{value} is not among the choices"))
                })?;
                index_to_f64(index)
            }
        }
    }

    /// Converts a stored numeric form back into a typed value.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::OutOfDomain`] when the stored value is not
    /// a valid integer or categorical index.
    #[allow(
        clippy::cast_possible_truncation,
        reason = "Integral values are checked against the i64 range before casting."
    )]
    pub fn to_external_repr(&self, internal: f64) -> Result<ParamValue, DistributionError> {
        match self {
            Self::Uniform {
                ..
            }
            | Self::LogUniform {
                ..
            }
            | Self::DiscreteUniform {
                ..
            } => Ok(ParamValue::Float(internal)),
            Self::IntUniform {
                ..
            }
            | Self::IntLogUniform {
                ..
            } => {
                if !is_integral(internal) {
                    return Err(DistributionError::OutOfDomain(format!(
                        "{internal} is not an integer value for {}",
                        self.kind_name()
                    )));
                }
                Ok(ParamValue::Int(internal as i64))
            }
            Self::Categorical {
                choices,
            } => {
                let index = categorical_index(internal, choices.len()).ok_or_else(|| {
                    DistributionError::OutOfDomain(format!(
                        "{internal} is not a valid index into {} choices",
                        choices.len()
                    ))
                })?;
                choices.get(index).cloned().ok_or_else(|| {
                    DistributionError::OutOfDomain(format!("choice index {index} out of range"))
                })
            }
        }
    }

    /// Returns true when the internal value lies in the value space.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        reason = "Integer bounds are compared in float space after an integrality check."
    )]
    pub fn contains(&self, internal: f64) -> bool {
        match self {
            Self::Uniform {
                low,
                high,
            }
            | Self::LogUniform {
                low,
                high,
            } => {
                if (low - high).abs() < f64::EPSILON {
                    (internal - low).abs() < f64::EPSILON
                } else {
                    *low <= internal && internal < *high
                }
            }
            Self::DiscreteUniform {
                low,
                high,
                ..
            } => *low <= internal && internal <= *high,
            Self::IntUniform {
                low,
                high,
                step,
            } => {
                if !is_integral(internal) {
                    return false;
                }
                let value = internal as i64;
                *low <= value
                    && value <= *high
                    && int_span(*low, value) % i128::from(*step) == 0
            }
            Self::IntLogUniform {
                low,
                high,
                ..
            } => is_integral(internal) && (*low as f64) <= internal && internal <= (*high as f64),
            Self::Categorical {
                choices,
            } => categorical_index(internal, choices.len()).is_some(),
        }
    }

    /// Returns true when the value space has exactly one element.
    #[must_use]
    pub fn is_single(&self) -> bool {
        match self {
            Self::Uniform {
                low,
                high,
            }
            | Self::LogUniform {
                low,
                high,
            } => (low - high).abs() < f64::EPSILON,
            Self::DiscreteUniform {
                low,
                high,
                q,
            } => high - low < *q,
            Self::IntUniform {
                low,
                high,
                step,
            }
            | Self::IntLogUniform {
                low,
                high,
                step,
            } => int_span(*low, *high) < i128::from(*step),
            Self::Categorical {
                choices,
            } => choices.len() == 1,
        }
    }
}

// ============================================================================
// SECTION: Compatibility and JSON
// ============================================================================

/// Checks that `new` may replace or join `old` under one parameter name.
///
/// Distributions of different kinds never mix. Categorical distributions must
/// also agree on their exact choices; other kinds may change bounds.
///
/// # Errors
///
/// Returns [`DistributionError::Incompatible`] when the pair cannot share a
/// parameter name.
pub fn check_distribution_compatibility(
    old: &Distribution,
    new: &Distribution,
) -> Result<(), DistributionError> {
    if std::mem::discriminant(old) != std::mem::discriminant(new) {
        return Err(DistributionError::Incompatible(format!(
            "cannot set a different distribution kind to the same parameter name ({} -> {})",
            old.kind_name(),
            new.kind_name()
        )));
    }
    if let (
        Distribution::Categorical {
            choices: old_choices,
        },
        Distribution::Categorical {
            choices: new_choices,
        },
    ) = (old, new)
        && old_choices != new_choices
    {
        return Err(DistributionError::Incompatible(
            "CategoricalDistribution does not support dynamic value space".to_string(),
        ));
    }
    Ok(())
}

/// Serializes a distribution into its stored JSON form.
///
/// # Errors
///
/// Returns [`DistributionError::Json`] when serialization fails.
pub fn distribution_to_json(distribution: &Distribution) -> Result<String, DistributionError> {
    serde_json::to_string(distribution).map_err(|err| DistributionError::Json(err.to_string()))
}

/// Parses and validates a stored distribution JSON form.
///
/// # Errors
///
/// Returns [`DistributionError::Json`] for malformed JSON and
/// [`DistributionError::Invalid`] when the decoded distribution is invalid.
pub fn json_to_distribution(json: &str) -> Result<Distribution, DistributionError> {
    let distribution: Distribution =
        serde_json::from_str(json).map_err(|err| DistributionError::Json(err.to_string()))?;
    distribution.validate()?;
    Ok(distribution)
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Ensures float bounds are finite and ordered.
fn ensure_float_bounds(kind: &str, low: f64, high: f64) -> Result<(), DistributionError> {
    if !low.is_finite() || !high.is_finite() {
        return Err(DistributionError::Invalid(format!("{kind} bounds must be finite")));
    }
    if low > high {
        return Err(DistributionError::Invalid(format!(
            "{kind} requires low <= high (low={low}, high={high})"
        )));
    }
    Ok(())
}

/// Returns `high - low` without overflowing at the ends of the `i64` range.
fn int_span(low: i64, high: i64) -> i128 {
    i128::from(high) - i128::from(low)
}

/// Ensures integer bounds are ordered and the step is positive.
fn ensure_int_bounds(kind: &str, low: i64, high: i64, step: i64) -> Result<(), DistributionError> {
    if low > high {
        return Err(DistributionError::Invalid(format!(
            "{kind} requires low <= high (low={low}, high={high})"
        )));
    }
    if step <= 0 {
        return Err(DistributionError::Invalid(format!("{kind} requires step > 0 (step={step})")));
    }
    Ok(())
}

/// Returns true for finite floats without a fractional part within i64 range.
#[allow(clippy::cast_precision_loss, reason = "Range check against i64 bounds in float space.")]
fn is_integral(value: f64) -> bool {
    value.is_finite()
        && value.fract() == 0.0
        && value >= i64::MIN as f64
        && value <= i64::MAX as f64
}

/// Converts a stored categorical index into a bounds-checked `usize`.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "Index is checked for integrality and sign before casting."
)]
fn categorical_index(internal: f64, len: usize) -> Option<usize> {
    if !is_integral(internal) || internal < 0.0 {
        return None;
    }
    let index = internal as u64;
    let index = usize::try_from(index).ok()?;
    (index < len).then_some(index)
}

/// Converts a categorical index into its stored float form.
fn index_to_f64(index: usize) -> Result<f64, DistributionError> {
    let index = u32::try_from(index)
        .map_err(|_| DistributionError::OutOfDomain("categorical index too large".to_string()))?;
    Ok(f64::from(index))
}
