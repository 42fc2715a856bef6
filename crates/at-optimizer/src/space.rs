//! Parameter space definitions and unit-cube normalization.

use rand::Rng;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

use at_types::{AtResult, DimensionSpec, ParameterError};

/// A single tunable dimension.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dimension {
    /// Human-readable parameter name (e.g. "temperature").
    pub name: String,
    pub min: f64,
    pub max: f64,
    /// Integer-valued dimensions round on denormalize.
    pub integer: bool,
}

impl Dimension {
    fn span(&self) -> f64 {
        self.max - self.min
    }

    fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// A concrete assignment for every dimension of a [`ParameterSpace`], in
/// dimension order. Only the space can build one, so a `ParamSet` always
/// matches its schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(into = "BTreeMap<String, f64>")]
pub struct ParamSet {
    entries: Vec<(String, f64)>,
}

impl ParamSet {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), *v))
    }

    pub fn values(&self) -> Vec<f64> {
        self.entries.iter().map(|(_, v)| *v).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_map(&self) -> BTreeMap<String, f64> {
        self.entries.iter().cloned().collect()
    }
}

impl From<ParamSet> for BTreeMap<String, f64> {
    fn from(params: ParamSet) -> Self {
        params.entries.into_iter().collect()
    }
}

impl std::fmt::Display for ParamSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .entries
            .iter()
            .map(|(n, v)| format!("{n}={v:.4}"))
            .collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

/// Ordered, immutable list of dimensions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterSpace {
    dimensions: Vec<Dimension>,
}

impl ParameterSpace {
    /// Validate and build a space: at least one dimension, finite bounds
    /// with `min < max`, unique names.
    pub fn new(dimensions: Vec<Dimension>) -> AtResult<Self> {
        if dimensions.is_empty() {
            return Err(ParameterError::EmptySpace.into());
        }
        let mut seen = HashSet::new();
        for dim in &dimensions {
            let fractional = dim.integer && (dim.min.fract() != 0.0 || dim.max.fract() != 0.0);
            if !dim.min.is_finite() || !dim.max.is_finite() || dim.min >= dim.max || fractional {
                return Err(ParameterError::InvalidBounds {
                    name: dim.name.clone(),
                    min: dim.min,
                    max: dim.max,
                }
                .into());
            }
            if !seen.insert(dim.name.as_str()) {
                return Err(ParameterError::DuplicateParameter {
                    name: dim.name.clone(),
                }
                .into());
            }
        }
        Ok(Self { dimensions })
    }

    pub fn builder() -> SpaceBuilder {
        SpaceBuilder::default()
    }

    pub fn from_specs(specs: &[DimensionSpec]) -> AtResult<Self> {
        Self::new(
            specs
                .iter()
                .map(|s| Dimension {
                    name: s.name.clone(),
                    min: s.min,
                    max: s.max,
                    integer: s.integer,
                })
                .collect(),
        )
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.dimensions.iter().map(|d| d.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    /// Build a parameter set from named values. Every dimension must be
    /// supplied exactly once and lie inside its bounds.
    pub fn params(&self, values: &[(&str, f64)]) -> AtResult<ParamSet> {
        for (name, _) in values {
            if !self.dimensions.iter().any(|d| d.name == *name) {
                return Err(ParameterError::UnknownParameter {
                    name: name.to_string(),
                }
                .into());
            }
        }
        let mut entries = Vec::with_capacity(self.dimensions.len());
        for dim in &self.dimensions {
            let value = values
                .iter()
                .find(|(n, _)| *n == dim.name)
                .map(|(_, v)| *v)
                .ok_or_else(|| ParameterError::MissingParameter {
                    name: dim.name.clone(),
                })?;
            Self::check_bounds(dim, value)?;
            entries.push((dim.name.clone(), value));
        }
        Ok(ParamSet { entries })
    }

    /// Map a parameter set into `[0, 1]^d`. Values outside their bounds are
    /// rejected, never clamped.
    pub fn normalize(&self, params: &ParamSet) -> AtResult<Vec<f64>> {
        if params.len() != self.dimensions.len() {
            return Err(ParameterError::DimensionMismatch {
                expected: self.dimensions.len(),
                actual: params.len(),
            }
            .into());
        }
        self.dimensions
            .iter()
            .map(|dim| {
                let value = params
                    .get(&dim.name)
                    .ok_or_else(|| ParameterError::MissingParameter {
                        name: dim.name.clone(),
                    })?;
                Self::check_bounds(dim, value)?;
                Ok((value - dim.min) / dim.span())
            })
            .collect()
    }

    /// Map a unit-cube vector back to named values. Coordinates are clipped
    /// to `[0, 1]` first; integer dimensions are rounded.
    pub fn denormalize(&self, unit: &[f64]) -> AtResult<ParamSet> {
        if unit.len() != self.dimensions.len() {
            return Err(ParameterError::DimensionMismatch {
                expected: self.dimensions.len(),
                actual: unit.len(),
            }
            .into());
        }
        let entries = self
            .dimensions
            .iter()
            .zip(unit)
            .map(|(dim, &u)| {
                let u = if u.is_nan() { 0.0 } else { u.clamp(0.0, 1.0) };
                let mut value = dim.min + u * dim.span();
                if dim.integer {
                    value = value.round();
                }
                (dim.name.clone(), value.clamp(dim.min, dim.max))
            })
            .collect();
        Ok(ParamSet { entries })
    }

    /// Uniform random point in the unit cube.
    pub fn random_unit<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f64> {
        (0..self.dimensions.len()).map(|_| rng.random::<f64>()).collect()
    }

    /// Uniform random parameter set.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ParamSet {
        let entries = self
            .dimensions
            .iter()
            .map(|dim| {
                let value = if dim.integer {
                    rng.random_range(dim.min.ceil() as i64..=dim.max.floor() as i64) as f64
                } else {
                    rng.random_range(dim.min..=dim.max)
                };
                (dim.name.clone(), value)
            })
            .collect();
        ParamSet { entries }
    }

    fn check_bounds(dim: &Dimension, value: f64) -> AtResult<()> {
        if dim.contains(value) {
            Ok(())
        } else {
            Err(ParameterError::OutOfBounds {
                name: dim.name.clone(),
                value,
                min: dim.min,
                max: dim.max,
            }
            .into())
        }
    }
}

/// Chained builder for [`ParameterSpace`].
#[derive(Debug, Clone, Default)]
pub struct SpaceBuilder {
    dimensions: Vec<Dimension>,
}

impl SpaceBuilder {
    pub fn float(mut self, name: impl Into<String>, min: f64, max: f64) -> Self {
        self.dimensions.push(Dimension {
            name: name.into(),
            min,
            max,
            integer: false,
        });
        self
    }

    pub fn int(mut self, name: impl Into<String>, min: i64, max: i64) -> Self {
        self.dimensions.push(Dimension {
            name: name.into(),
            min: min as f64,
            max: max as f64,
            integer: true,
        });
        self
    }

    pub fn build(self) -> AtResult<ParameterSpace> {
        ParameterSpace::new(self.dimensions)
    }
}
