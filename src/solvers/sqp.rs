//! Sequential quadratic programming with one linear equality constraint
//!
//! Minimises a smooth objective `f(x)` subject to `aᵀx = b`, with no bounds
//! on individual components. The start is projected onto the constraint
//! plane once, after which every step stays inside it: with `Z` an
//! orthonormal basis of the null space of `aᵀ`, each iteration solves the
//! reduced Newton system
//!
//! ```text
//! (Zᵀ H Z) w = -Zᵀ g,        d = Z w
//! ```
//!
//! through an SVD pseudo-inverse, so a rank-deficient Hessian (collinear
//! columns in a least-squares objective) still yields a well-defined
//! minimum-norm step. The reduced system carries only Hessian entries, so
//! its truncation threshold is measured on a single scale and the
//! constraint is never part of what gets truncated. Steps are globalised
//! with a backtracking line search on `f` itself.
//!
//! Only local optimality is claimed.

use nalgebra::{DMatrix, DVector};

/// Smooth objective with first and second derivatives
pub trait SmoothObjective {
    fn dim(&self) -> usize;
    fn value(&self, x: &DVector<f64>) -> f64;
    fn gradient(&self, x: &DVector<f64>) -> DVector<f64>;
    fn hessian(&self, x: &DVector<f64>) -> DMatrix<f64>;
}

/// Linear equality `aᵀx = b`
#[derive(Clone, Debug)]
pub struct LinearEquality {
    pub a: DVector<f64>,
    pub b: f64,
}

impl LinearEquality {
    /// `Σ x_i = 1`
    pub fn sum_to_one(n: usize) -> Self {
        Self { a: DVector::from_element(n, 1.0), b: 1.0 }
    }

    pub fn residual(&self, x: &DVector<f64>) -> f64 {
        self.a.dot(x) - self.b
    }

    /// Closest point to `x` on the constraint plane. Points already on it
    /// are returned untouched.
    pub fn project(&self, x: DVector<f64>) -> DVector<f64> {
        let r = self.residual(&x);
        let aa = self.a.dot(&self.a);
        if r == 0.0 || aa == 0.0 {
            return x;
        }
        x - &self.a * (r / aa)
    }

    /// Orthonormal basis of `{d : aᵀd = 0}`, one column per free direction.
    ///
    /// Built from the Householder reflector that maps `a` onto the first
    /// axis; its remaining columns are orthogonal to `a`.
    pub fn null_space(&self) -> DMatrix<f64> {
        let n = self.a.len();
        let norm = self.a.norm();
        if norm == 0.0 {
            return DMatrix::identity(n, n);
        }
        let mut v = self.a.clone();
        v[0] += if self.a[0] >= 0.0 { norm } else { -norm };
        let vv = v.dot(&v);
        let mut reflector = DMatrix::<f64>::identity(n, n);
        reflector -= (&v * v.transpose()) * (2.0 / vv);
        reflector.columns(1, n - 1).into_owned()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SqpOptions {
    /// Tolerance on the constraint violation and on the relative
    /// objective decrease / reduced gradient / Newton decrement
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for SqpOptions {
    fn default() -> Self {
        Self { tolerance: 1e-6, max_iterations: 100 }
    }
}

#[derive(Clone, Debug)]
pub struct SqpOutcome {
    /// Final iterate when converged, otherwise the lowest-objective
    /// iterate; feasible in both cases
    pub x: DVector<f64>,
    pub objective: f64,
    pub iterations: usize,
    pub converged: bool,
}

const ARMIJO: f64 = 1e-4;
const MIN_STEP: f64 = 1e-10;

/// Reduced Newton direction in full coordinates, falling back to steepest
/// descent within the plane when the Newton direction does not descend.
fn reduced_step(hessian: &DMatrix<f64>, gradient: &DVector<f64>, basis: &DMatrix<f64>) -> DVector<f64> {
    let reduced_gradient = basis.transpose() * gradient;
    let reduced_hessian = basis.transpose() * hessian * basis;

    // Cutoff relative to the full Hessian so a reduced block made of
    // round-off is treated as zero rather than inverted
    let svd = reduced_hessian.svd(true, true);
    let eps = hessian.norm() * basis.ncols() as f64 * f64::EPSILON;
    let newton = svd
        .solve(&(-&reduced_gradient), eps)
        .ok()
        .filter(|w| w.iter().all(|v| v.is_finite()))
        .map(|w| basis * w);

    match newton {
        Some(d) if gradient.dot(&d) < 0.0 => d,
        _ => -(basis * reduced_gradient),
    }
}

/// Stationarity within the plane: small reduced gradient, small Newton
/// decrement, or a negligible last decrease.
fn is_stationary(f: f64, slope: f64, reduced_gradient: f64, last_decrease: f64, tol: f64) -> bool {
    let scale = tol * (1.0 + f.abs());
    reduced_gradient <= scale || -0.5 * slope <= scale || last_decrease <= scale
}

/// Minimise `objective` subject to `constraint`, starting from `x0`.
pub fn minimize<O: SmoothObjective>(
    objective: &O,
    constraint: &LinearEquality,
    x0: DVector<f64>,
    options: &SqpOptions,
) -> SqpOutcome {
    let tol = options.tolerance;
    let mut x = constraint.project(x0);
    let mut f = objective.value(&x);
    let feasible = |x: &DVector<f64>| constraint.residual(x).abs() <= tol;

    let basis = constraint.null_space();
    if basis.ncols() == 0 {
        // The constraint alone pins the point
        let converged = feasible(&x);
        return SqpOutcome { x, objective: f, iterations: 0, converged };
    }

    let mut best = (x.clone(), f);
    let mut last_decrease = f64::INFINITY;
    let mut steps = 0;

    for iter in 0..options.max_iterations {
        let g = objective.gradient(&x);
        let h = objective.hessian(&x);
        let d = reduced_step(&h, &g, &basis);
        let slope = g.dot(&d);
        let reduced_gradient = (basis.transpose() * &g).norm();

        if feasible(&x) && is_stationary(f, slope, reduced_gradient, last_decrease, tol) {
            tracing::debug!(iterations = iter, objective = f, "sqp converged");
            return SqpOutcome { x, objective: f, iterations: iter, converged: true };
        }
        if slope.is_nan() || slope >= 0.0 {
            tracing::debug!(iteration = iter, "sqp: no descent direction");
            break;
        }

        let mut alpha = 1.0;
        let accepted = loop {
            let trial = &x + &d * alpha;
            let f_trial = objective.value(&trial);
            if f_trial.is_finite() && f_trial <= f + ARMIJO * alpha * slope {
                break Some((trial, f_trial));
            }
            alpha *= 0.5;
            if alpha < MIN_STEP {
                break None;
            }
        };

        let Some((x_new, f_new)) = accepted else {
            tracing::debug!(iteration = iter, "sqp: line search failed");
            break;
        };

        tracing::debug!(
            iteration = iter,
            objective = f_new,
            step = alpha,
            violation = constraint.residual(&x_new).abs(),
            "sqp step"
        );

        steps += 1;
        last_decrease = f - f_new;
        x = x_new;
        f = f_new;
        if f < best.1 && feasible(&x) {
            best = (x.clone(), f);
        }
    }

    // Final check so a last accepted step that met tolerance still counts
    let g = objective.gradient(&x);
    let d = reduced_step(&objective.hessian(&x), &g, &basis);
    let reduced_gradient = (basis.transpose() * &g).norm();
    if feasible(&x) && is_stationary(f, g.dot(&d), reduced_gradient, last_decrease, tol) {
        return SqpOutcome { x, objective: f, iterations: steps, converged: true };
    }

    SqpOutcome {
        x: best.0,
        objective: best.1,
        iterations: steps,
        converged: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// f(x) = Σ w_i (x_i - t_i)²
    struct WeightedDistance {
        w: Vec<f64>,
        t: Vec<f64>,
    }

    impl SmoothObjective for WeightedDistance {
        fn dim(&self) -> usize {
            self.w.len()
        }
        fn value(&self, x: &DVector<f64>) -> f64 {
            (0..self.dim()).map(|i| self.w[i] * (x[i] - self.t[i]).powi(2)).sum()
        }
        fn gradient(&self, x: &DVector<f64>) -> DVector<f64> {
            DVector::from_fn(self.dim(), |i, _| 2.0 * self.w[i] * (x[i] - self.t[i]))
        }
        fn hessian(&self, _x: &DVector<f64>) -> DMatrix<f64> {
            DMatrix::from_fn(self.dim(), self.dim(), |i, j| if i == j { 2.0 * self.w[i] } else { 0.0 })
        }
    }

    /// Non-quadratic objective: f(x) = (x0 - 2)^4 + (x1 + 1)^2
    struct Quartic;

    impl SmoothObjective for Quartic {
        fn dim(&self) -> usize {
            2
        }
        fn value(&self, x: &DVector<f64>) -> f64 {
            (x[0] - 2.0).powi(4) + (x[1] + 1.0).powi(2)
        }
        fn gradient(&self, x: &DVector<f64>) -> DVector<f64> {
            DVector::from_vec(vec![4.0 * (x[0] - 2.0).powi(3), 2.0 * (x[1] + 1.0)])
        }
        fn hessian(&self, x: &DVector<f64>) -> DMatrix<f64> {
            DMatrix::from_row_slice(2, 2, &[12.0 * (x[0] - 2.0).powi(2), 0.0, 0.0, 2.0])
        }
    }

    #[test]
    fn test_projection_onto_simplex_plane() {
        // Closest point to t on Σx = 1 with unit weights: t - (Σt - 1)/n
        let obj = WeightedDistance { w: vec![1.0; 3], t: vec![1.0, 2.0, 3.0] };
        let out = minimize(
            &obj,
            &LinearEquality::sum_to_one(3),
            DVector::from_element(3, 1.0 / 3.0),
            &SqpOptions::default(),
        );
        assert!(out.converged);
        assert_abs_diff_eq!(out.x[0], -2.0 / 3.0, epsilon = 1e-9);
        assert_abs_diff_eq!(out.x[1], 1.0 / 3.0, epsilon = 1e-9);
        assert_abs_diff_eq!(out.x[2], 4.0 / 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_infeasible_start_is_pulled_onto_constraint() {
        let obj = WeightedDistance { w: vec![1.0, 4.0], t: vec![0.0, 0.0] };
        let out = minimize(
            &obj,
            &LinearEquality::sum_to_one(2),
            DVector::from_vec(vec![5.0, -3.0]),
            &SqpOptions::default(),
        );
        assert!(out.converged);
        // Minimiser of x0² + 4 x1² on x0 + x1 = 1 is (0.8, 0.2)
        assert_abs_diff_eq!(out.x[0], 0.8, epsilon = 1e-9);
        assert_abs_diff_eq!(out.x[1], 0.2, epsilon = 1e-9);
    }

    #[test]
    fn test_singular_hessian_is_resolved_by_constraint() {
        // Zero weight on the last coordinate: it is free along the plane
        let obj = WeightedDistance { w: vec![1.0, 1.0, 0.0], t: vec![0.5, 0.5, 0.0] };
        let out = minimize(
            &obj,
            &LinearEquality::sum_to_one(3),
            DVector::from_element(3, 1.0 / 3.0),
            &SqpOptions::default(),
        );
        assert!(out.converged);
        assert_abs_diff_eq!(out.x.sum(), 1.0, epsilon = 1e-9);
        assert!(out.objective < 1e-12, "objective {}", out.objective);
    }

    #[test]
    fn test_non_quadratic_objective() {
        let out = minimize(
            &Quartic,
            &LinearEquality::sum_to_one(2),
            DVector::from_vec(vec![0.5, 0.5]),
            &SqpOptions { tolerance: 1e-10, max_iterations: 200 },
        );
        assert!(out.converged);
        assert_abs_diff_eq!(out.x.sum(), 1.0, epsilon = 1e-9);
        // Stationarity: gradients equal along the plane
        let g = Quartic.gradient(&out.x);
        assert!((g[0] - g[1]).abs() < 1e-3, "gradient {:?}", g);
    }

    #[test]
    fn test_iteration_cap_reports_not_converged() {
        let out = minimize(
            &Quartic,
            &LinearEquality::sum_to_one(2),
            DVector::from_vec(vec![10.0, -9.0]),
            &SqpOptions { tolerance: 1e-14, max_iterations: 1 },
        );
        assert!(!out.converged);
        assert!(out.objective <= Quartic.value(&DVector::from_vec(vec![10.0, -9.0])));
    }

    #[test]
    fn test_null_space_is_orthonormal_and_orthogonal_to_constraint() {
        for a in [vec![1.0; 4], vec![-2.0, 0.5, 3.0]] {
            let constraint = LinearEquality { a: DVector::from_vec(a.clone()), b: 1.0 };
            let z = constraint.null_space();
            assert_eq!(z.shape(), (a.len(), a.len() - 1));
            let gram = z.transpose() * &z;
            for i in 0..z.ncols() {
                assert_abs_diff_eq!(constraint.a.dot(&z.column(i)), 0.0, epsilon = 1e-12);
                for j in 0..z.ncols() {
                    assert_abs_diff_eq!(gram[(i, j)], if i == j { 1.0 } else { 0.0 }, epsilon = 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_badly_scaled_hessian_keeps_constraint() {
        // Curvature around 1e8 against a unit constraint row
        let t = vec![0.9, 0.2, -0.1];
        let unit = WeightedDistance { w: vec![1.0, 2.0, 3.0], t: t.clone() };
        let scaled = WeightedDistance { w: vec![1e8, 2e8, 3e8], t };
        let start = DVector::from_element(3, 1.0 / 3.0);

        let a = minimize(&unit, &LinearEquality::sum_to_one(3), start.clone(), &SqpOptions::default());
        let b = minimize(&scaled, &LinearEquality::sum_to_one(3), start, &SqpOptions::default());
        assert!(a.converged && b.converged);
        assert_abs_diff_eq!(b.x.sum(), 1.0, epsilon = 1e-12);
        for i in 0..3 {
            assert_abs_diff_eq!(a.x[i], b.x[i], epsilon = 1e-9);
        }
    }

    #[test]
    fn test_unconverged_outcome_is_feasible() {
        let out = minimize(
            &WeightedDistance { w: vec![1e8, 1.0, 1e-8], t: vec![4.0, -7.0, 2.0] },
            &LinearEquality::sum_to_one(3),
            DVector::from_vec(vec![3.0, 1.0, -2.5]),
            &SqpOptions { tolerance: 1e-14, max_iterations: 0 },
        );
        assert!(!out.converged);
        assert_abs_diff_eq!(out.x.sum(), 1.0, epsilon = 1e-12);
    }
}
