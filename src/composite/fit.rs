//! Sum-to-one template mixing fit
//!
//! Finds coefficients `c` minimising the mean squared voxel error
//!
//! ```text
//! f(c) = mean_v ( Σ_i c_i T_i[v] - y[v] )²     subject to  Σ_i c_i = 1
//! ```
//!
//! The objective is the quadratic form `cᵀGc - 2bᵀc + ȳ²` with
//! `G = TᵀT / M`, `b = Tᵀy / M` and `ȳ² = yᵀy / M`, accumulated once over
//! the voxels, so solver iterations cost O(N²) regardless of volume size.
//! Coefficients are unbounded and may be negative.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RpopError};
use crate::solvers::{self, LinearEquality, SmoothObjective, SqpOptions};
use crate::volume::Volume;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitOptions {
    /// Starting coefficients; uniform `1/N` when unset
    pub initial_guess: Option<Vec<f64>>,
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            initial_guess: None,
            tolerance: 1e-6,
            max_iterations: 100,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CompositeFit {
    /// One coefficient per template, in template order
    pub coefficients: Vec<f64>,
    /// Mean squared reconstruction error at `coefficients`
    pub objective: f64,
    pub iterations: usize,
}

/// Second-order statistics of the templates against the target
#[derive(Clone, Debug)]
pub struct GramSystem {
    gram: DMatrix<f64>,
    cross: DVector<f64>,
    target_power: f64,
}

impl GramSystem {
    /// One pass over all voxels; every volume must share the target's grid.
    pub fn accumulate(templates: &[Volume], target: &Volume) -> Result<Self> {
        if templates.is_empty() {
            return Err(RpopError::EmptyTemplateSet);
        }
        for template in templates {
            target.ensure_same_shape(template)?;
        }

        let n = templates.len();
        let m = target.len();
        let mut gram = DMatrix::<f64>::zeros(n, n);
        let mut cross = DVector::<f64>::zeros(n);
        let y = target.data();
        let target_power: f64 = y.iter().map(|v| v * v).sum();

        for i in 0..n {
            let ti = templates[i].data();
            cross[i] = ti.iter().zip(y).map(|(a, b)| a * b).sum();
            for j in i..n {
                let tj = templates[j].data();
                let g: f64 = ti.iter().zip(tj).map(|(a, b)| a * b).sum();
                gram[(i, j)] = g;
                gram[(j, i)] = g;
            }
        }

        let scale = if m > 0 { 1.0 / m as f64 } else { 0.0 };
        Ok(Self {
            gram: gram * scale,
            cross: cross * scale,
            target_power: target_power * scale,
        })
    }

    pub fn len(&self) -> usize {
        self.cross.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cross.is_empty()
    }
}

impl SmoothObjective for GramSystem {
    fn dim(&self) -> usize {
        self.cross.len()
    }

    fn value(&self, c: &DVector<f64>) -> f64 {
        c.dot(&(&self.gram * c)) - 2.0 * self.cross.dot(c) + self.target_power
    }

    fn gradient(&self, c: &DVector<f64>) -> DVector<f64> {
        (&self.gram * c - &self.cross) * 2.0
    }

    fn hessian(&self, _c: &DVector<f64>) -> DMatrix<f64> {
        &self.gram * 2.0
    }
}

/// Fit sum-to-one mixing coefficients of `templates` against `target`.
///
/// Returns `FitDidNotConverge` carrying the best iterate when the solver
/// stops short of its tolerance; callers decide whether that is fatal.
pub fn fit_composite(templates: &[Volume], target: &Volume, options: &FitOptions) -> Result<CompositeFit> {
    let system = GramSystem::accumulate(templates, target)?;
    let n = system.len();

    let x0 = match &options.initial_guess {
        Some(guess) if guess.len() != n => {
            return Err(RpopError::CoefficientMismatch {
                coefficients: guess.len(),
                templates: n,
            })
        }
        Some(guess) => DVector::from_column_slice(guess),
        None => DVector::from_element(n, 1.0 / n as f64),
    };

    let sqp = SqpOptions {
        tolerance: options.tolerance,
        max_iterations: options.max_iterations,
    };
    let outcome = solvers::minimize(&system, &LinearEquality::sum_to_one(n), x0, &sqp);
    // Cancellation in the quadratic form can dip just below zero on exact fits
    let objective = outcome.objective.max(0.0);

    if !outcome.converged {
        return Err(RpopError::FitDidNotConverge {
            best: outcome.x.iter().copied().collect(),
            objective,
            iterations: outcome.iterations,
        });
    }

    tracing::debug!(
        templates = n,
        iterations = outcome.iterations,
        mse = objective,
        "composite fit converged"
    );
    Ok(CompositeFit {
        coefficients: outcome.x.iter().copied().collect(),
        objective,
        iterations: outcome.iterations,
    })
}
