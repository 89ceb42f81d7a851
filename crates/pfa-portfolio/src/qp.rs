//! Dense quadratic programming.
//!
//! Primal active-set method for small convex problems
//!
//! ```text
//!   minimise   ½ xᵀ G x + cᵀ x
//!   subject to aᵢ·x  = bᵢ   (equalities)
//!              aⱼ·x >= bⱼ   (inequalities)
//! ```
//!
//! `G` must be symmetric positive definite (callers add a ridge). The method
//! starts from a feasible point and keeps every iterate feasible, so a result
//! always satisfies the constraints to within [`FEASIBILITY_TOL`].

// ─── Tolerances ──────────────────────────────────────────────────────────────

/// Constraint residual accepted for the starting point.
pub const FEASIBILITY_TOL: f64 = 1e-8;

/// A search direction with max-norm below this (relative to the iterate) is
/// treated as zero.
const STEP_TOL: f64 = 1e-12;

/// Multipliers above `-MULTIPLIER_TOL` count as non-negative.
const MULTIPLIER_TOL: f64 = 1e-10;

/// Pivot magnitude (relative to the largest entry) below which the KKT
/// matrix is singular.
const PIVOT_TOL: f64 = 1e-13;

// ─── Error ───────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub enum QpError {
    /// Hessian, linear term or a constraint row has the wrong length.
    DimensionMismatch,
    /// A problem entry or the starting point is NaN/inf.
    NonFinite,
    /// The starting point violates a constraint.
    InfeasibleStart { residual: f64 },
    /// The KKT system of the working set could not be solved.
    SingularKkt,
    /// No optimum within the iteration budget.
    IterationLimit { iterations: usize },
}

impl std::fmt::Display for QpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DimensionMismatch => write!(f, "qp dimension mismatch"),
            Self::NonFinite => write!(f, "qp input contains NaN/inf"),
            Self::InfeasibleStart { residual } => {
                write!(f, "qp starting point infeasible (residual {residual:e})")
            }
            Self::SingularKkt => write!(f, "qp KKT system is singular"),
            Self::IterationLimit { iterations } => {
                write!(f, "qp did not converge within {iterations} iterations")
            }
        }
    }
}

impl std::error::Error for QpError {}

// ─── Problem ─────────────────────────────────────────────────────────────────

/// One linear constraint row `a·x (=|>=) b`.
#[derive(Clone, Debug, PartialEq)]
pub struct LinearConstraint {
    pub a: Vec<f64>,
    pub b: f64,
}

impl LinearConstraint {
    pub fn new(a: Vec<f64>, b: f64) -> Self {
        Self { a, b }
    }

    /// `x_i >= lo`.
    pub fn lower_bound(n: usize, i: usize, lo: f64) -> Self {
        let mut a = vec![0.0; n];
        a[i] = 1.0;
        Self { a, b: lo }
    }

    /// `x_i <= hi`, written as `-x_i >= -hi`.
    pub fn upper_bound(n: usize, i: usize, hi: f64) -> Self {
        let mut a = vec![0.0; n];
        a[i] = -1.0;
        Self { a, b: -hi }
    }

    fn residual(&self, x: &[f64]) -> f64 {
        dot(&self.a, x) - self.b
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct QpProblem {
    pub hessian: Vec<Vec<f64>>,
    pub linear: Vec<f64>,
    pub equalities: Vec<LinearConstraint>,
    pub inequalities: Vec<LinearConstraint>,
}

impl QpProblem {
    pub fn dim(&self) -> usize {
        self.linear.len()
    }

    pub fn objective(&self, x: &[f64]) -> f64 {
        0.5 * dot(x, &mat_vec(&self.hessian, x)) + dot(&self.linear, x)
    }

    fn validate(&self, x0: &[f64]) -> Result<(), QpError> {
        let n = self.dim();
        if x0.len() != n
            || self.hessian.len() != n
            || self.hessian.iter().any(|r| r.len() != n)
            || self
                .equalities
                .iter()
                .chain(&self.inequalities)
                .any(|c| c.a.len() != n)
        {
            return Err(QpError::DimensionMismatch);
        }
        let finite = self.hessian.iter().flatten().all(|v| v.is_finite())
            && self.linear.iter().all(|v| v.is_finite())
            && x0.iter().all(|v| v.is_finite())
            && self
                .equalities
                .iter()
                .chain(&self.inequalities)
                .all(|c| c.b.is_finite() && c.a.iter().all(|v| v.is_finite()));
        if !finite {
            return Err(QpError::NonFinite);
        }
        for c in &self.equalities {
            let r = c.residual(x0).abs();
            if r > FEASIBILITY_TOL {
                return Err(QpError::InfeasibleStart { residual: r });
            }
        }
        for c in &self.inequalities {
            let r = c.residual(x0);
            if r < -FEASIBILITY_TOL {
                return Err(QpError::InfeasibleStart { residual: -r });
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct QpSolution {
    pub x: Vec<f64>,
    pub objective: f64,
    pub iterations: usize,
}

// ─── Solver ──────────────────────────────────────────────────────────────────

/// Solve `problem` from the feasible point `x0`.
///
/// The working set starts with the equalities only; inequalities join one at
/// a time when they block a step, which keeps the working-set rows linearly
/// independent. An inequality leaves when its multiplier is negative.
pub fn solve(problem: &QpProblem, x0: &[f64]) -> Result<QpSolution, QpError> {
    problem.validate(x0)?;

    let n = problem.dim();
    let m_ineq = problem.inequalities.len();
    let max_iter = 100 + 10 * (n + m_ineq);

    let mut x = x0.to_vec();
    let mut working: Vec<usize> = Vec::new();

    for iter in 0..max_iter {
        let rows: Vec<&LinearConstraint> = problem
            .equalities
            .iter()
            .chain(working.iter().map(|&j| &problem.inequalities[j]))
            .collect();

        let mut grad = mat_vec(&problem.hessian, &x);
        for (g, c) in grad.iter_mut().zip(&problem.linear) {
            *g += c;
        }

        let (p, lambda) = solve_kkt(&problem.hessian, &rows, &grad)?;

        if max_abs(&p) <= STEP_TOL * max_abs(&x).max(1.0) {
            // Stationary on the working set: check inequality multipliers.
            let n_eq = problem.equalities.len();
            let worst = (0..working.len())
                .map(|k| (k, lambda[n_eq + k]))
                .filter(|(_, l)| *l < -MULTIPLIER_TOL)
                .min_by(|a, b| a.1.total_cmp(&b.1));
            match worst {
                None => {
                    return Ok(QpSolution {
                        objective: problem.objective(&x),
                        x,
                        iterations: iter + 1,
                    });
                }
                Some((k, _)) => {
                    working.remove(k);
                }
            }
            continue;
        }

        // Longest feasible step along p, capped at 1.
        let mut alpha = 1.0;
        let mut blocking: Option<usize> = None;
        for (j, c) in problem.inequalities.iter().enumerate() {
            if working.contains(&j) {
                continue;
            }
            let ap = dot(&c.a, &p);
            if ap < -STEP_TOL {
                let step = (-c.residual(&x) / ap).max(0.0);
                if step < alpha {
                    alpha = step;
                    blocking = Some(j);
                }
            }
        }

        for (xi, pi) in x.iter_mut().zip(&p) {
            *xi += alpha * pi;
        }
        if let Some(j) = blocking {
            working.push(j);
        }
    }

    Err(QpError::IterationLimit {
        iterations: max_iter,
    })
}

/// Solve the equality-constrained step
///
/// ```text
///   [ G  -Aᵀ ] [ p ]   [ -g ]
///   [ A   0  ] [ λ ] = [  0 ]
/// ```
///
/// returning the step `p` and the multipliers `λ` (one per row of `A`).
fn solve_kkt(
    g: &[Vec<f64>],
    rows: &[&LinearConstraint],
    grad: &[f64],
) -> Result<(Vec<f64>, Vec<f64>), QpError> {
    let n = grad.len();
    let k = rows.len();
    let dim = n + k;

    let mut m = vec![vec![0.0; dim]; dim];
    let mut rhs = vec![0.0; dim];
    for i in 0..n {
        m[i][..n].copy_from_slice(&g[i]);
        rhs[i] = -grad[i];
    }
    for (r, c) in rows.iter().enumerate() {
        for i in 0..n {
            m[i][n + r] = -c.a[i];
            m[n + r][i] = c.a[i];
        }
    }

    let sol = gaussian_solve(m, rhs).ok_or(QpError::SingularKkt)?;
    Ok((sol[..n].to_vec(), sol[n..].to_vec()))
}

// ─── Linear algebra helpers ──────────────────────────────────────────────────

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn mat_vec(m: &[Vec<f64>], v: &[f64]) -> Vec<f64> {
    m.iter().map(|row| dot(row, v)).collect()
}

fn max_abs(v: &[f64]) -> f64 {
    v.iter().fold(0.0, |acc, x| acc.max(x.abs()))
}

/// Gaussian elimination with partial pivoting. `None` if singular.
#[allow(clippy::needless_range_loop)]
pub fn gaussian_solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    let scale = a
        .iter()
        .flatten()
        .fold(0.0_f64, |acc, v| acc.max(v.abs()))
        .max(1.0);

    for col in 0..n {
        let mut piv = col;
        for row in (col + 1)..n {
            if a[row][col].abs() > a[piv][col].abs() {
                piv = row;
            }
        }
        if a[piv][col].abs() < PIVOT_TOL * scale {
            return None;
        }
        a.swap(col, piv);
        b.swap(col, piv);

        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let mut acc = b[row];
        for k in (row + 1)..n {
            acc -= a[row][k] * x[k];
        }
        x[row] = acc / a[row][row];
    }
    if x.iter().all(|v| v.is_finite()) {
        Some(x)
    } else {
        None
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
