//! Weighted/prioritized least-squares composition over the generalized
//! velocity, solved as a QP with Clarabel.
//!
//! Low-priority tasks stack into the quadratic cost
//! `sum_i w_i ||A_i v - b_i||^2`; high-priority rows become hard equality
//! (ZeroConeT) or inequality (NonnegativeConeT) constraints.

use clarabel::algebra::CscMatrix;
use clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus,
    SupportedConeT::{NonnegativeConeT, ZeroConeT},
};
use nalgebra::{DMatrix, DVector};

use motus_core::error::IkError;

/// Tikhonov damping added to the cost diagonal so the QP stays strictly
/// convex when tasks leave directions of the velocity unconstrained.
const DAMPING: f64 = 1e-9;

/// One assembled solve over a fixed-size generalized velocity.
pub struct QpBuilder {
    nvars: usize,
    costs: Vec<(DMatrix<f64>, DVector<f64>, f64)>,
    equalities: Vec<(DMatrix<f64>, DVector<f64>)>,
    inequalities: Vec<(DMatrix<f64>, DVector<f64>)>,
}

impl QpBuilder {
    #[must_use]
    pub fn new(nvars: usize) -> Self {
        Self {
            nvars,
            costs: Vec::new(),
            equalities: Vec::new(),
            inequalities: Vec::new(),
        }
    }

    /// Add a weighted task block `w ||A v - b||^2` to the cost.
    pub fn add_cost(&mut self, a: DMatrix<f64>, b: DVector<f64>, weight: f64) {
        debug_assert_eq!(a.ncols(), self.nvars);
        debug_assert_eq!(a.nrows(), b.len());
        if weight > 0.0 {
            self.costs.push((a, b, weight));
        }
    }

    /// Add hard equality rows `A v = b`.
    pub fn add_equality(&mut self, a: DMatrix<f64>, b: DVector<f64>) {
        debug_assert_eq!(a.ncols(), self.nvars);
        self.equalities.push((a, b));
    }

    /// Add hard inequality rows `A v <= b`.
    pub fn add_inequality(&mut self, a: DMatrix<f64>, b: DVector<f64>) {
        debug_assert_eq!(a.ncols(), self.nvars);
        self.inequalities.push((a, b));
    }

    /// Solve for the generalized velocity.
    pub fn solve(&self) -> Result<DVector<f64>, IkError> {
        let n = self.nvars;

        // Cost: P = 2 (sum w A^T A + damping I), q = -2 sum w A^T b.
        // The constant factor cancels in the minimizer; keep P = sum + damping.
        let mut p = DMatrix::zeros(n, n);
        let mut q = DVector::zeros(n);
        for (a, b, w) in &self.costs {
            p += *w * a.transpose() * a;
            q -= *w * a.transpose() * b;
        }
        for i in 0..n {
            p[(i, i)] += DAMPING;
        }

        let n_eq: usize = self.equalities.iter().map(|(a, _)| a.nrows()).sum();
        let n_ineq: usize = self.inequalities.iter().map(|(a, _)| a.nrows()).sum();

        let mut a_all = DMatrix::zeros(n_eq + n_ineq, n);
        let mut b_all = DVector::zeros(n_eq + n_ineq);
        let mut row = 0;
        for (a, b) in self.equalities.iter().chain(self.inequalities.iter()) {
            a_all.view_mut((row, 0), (a.nrows(), n)).copy_from(a);
            b_all.rows_mut(row, b.len()).copy_from(b);
            row += a.nrows();
        }

        let p_csc = dmatrix_to_csc_upper_tri(&p);
        let a_csc = dmatrix_to_csc(&a_all);
        let cones = vec![ZeroConeT(n_eq), NonnegativeConeT(n_ineq)];

        let settings = DefaultSettingsBuilder::default()
            .verbose(false)
            .tol_gap_abs(1e-9)
            .tol_gap_rel(1e-9)
            .tol_feas(1e-9)
            .build()
            .map_err(|_| IkError::NotConverged)?;

        let q_slice: Vec<f64> = q.iter().copied().collect();
        let b_slice: Vec<f64> = b_all.iter().copied().collect();

        let mut solver = DefaultSolver::new(&p_csc, &q_slice, &a_csc, &b_slice, &cones, settings)
            .map_err(|_| IkError::NotConverged)?;
        solver.solve();

        let converged = matches!(
            solver.solution.status,
            SolverStatus::Solved | SolverStatus::AlmostSolved
        );
        if !converged {
            return Err(IkError::NotConverged);
        }

        let velocity = DVector::from_iterator(n, solver.solution.x.iter().copied());
        if velocity.iter().any(|v| !v.is_finite()) {
            return Err(IkError::InvalidOutput);
        }
        Ok(velocity)
    }
}

/// Pack every nonzero of a dense matrix into Clarabel's CSC layout.
fn dmatrix_to_csc(m: &DMatrix<f64>) -> CscMatrix<f64> {
    let (nrows, ncols) = m.shape();
    let mut colptr = vec![0usize; ncols + 1];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();

    for j in 0..ncols {
        for i in 0..nrows {
            let v = m[(i, j)];
            if v.abs() > 1e-15 {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr[j + 1] = rowval.len();
    }

    CscMatrix::new(nrows, ncols, colptr, rowval, nzval)
}

/// CSC packing of the upper triangle only; Clarabel expects the cost matrix
/// in this form and reconstructs the symmetric part itself.
fn dmatrix_to_csc_upper_tri(m: &DMatrix<f64>) -> CscMatrix<f64> {
    let (nrows, ncols) = m.shape();
    let mut colptr = vec![0usize; ncols + 1];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();

    for j in 0..ncols {
        for i in 0..=j.min(nrows - 1) {
            let v = m[(i, j)];
            if v.abs() > 1e-15 {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr[j + 1] = rowval.len();
    }

    CscMatrix::new(nrows, ncols, colptr, rowval, nzval)
}
