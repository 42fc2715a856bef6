//! # at-optimizer
//!
//! Search machinery for autotune: a typed parameter space normalized to the
//! unit cube, a Gaussian-process surrogate, acquisition functions with a
//! multi-start local optimizer, the adaptive controller that ties them
//! together, and bisection primitives for ordinal settings.

mod acquisition;
mod bisection;
mod controller;
mod local_search;
mod space;
mod surrogate;

pub use acquisition::{AcquisitionEvaluator, MIN_STD};
pub use bisection::{DescendingCandidates, SearchRange};
pub use controller::{
    AdaptiveOptimizer, HistoryEntry, Observation, OptimizationResult, OptimizerState, Phase,
};
pub use local_search::AcquisitionOptimizer;
pub use space::{Dimension, ParamSet, ParameterSpace, SpaceBuilder};
pub use surrogate::{GaussianProcess, KernelHyperparameters, Prediction, MIN_OBSERVATIONS};
