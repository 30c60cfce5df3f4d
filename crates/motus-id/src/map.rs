//! Linear-Gaussian MAP estimation over a fixed unknown vector.
//!
//! The posterior combines independent measurement blocks
//! `y_k = A_k x + noise(C_k)` with a diagonal regularization prior
//! `x ~ N(mu, sigma I)`. With every covariance strictly positive the normal
//! matrix is symmetric positive definite, so the posterior mean comes out of
//! one Cholesky factorization.

use nalgebra::{Cholesky, DMatrix, DVector};

use motus_core::error::IdError;

/// One measurement block `y = A x` with per-row noise covariance.
#[derive(Debug, Clone)]
pub struct MeasurementBlock {
    pub jacobian: DMatrix<f64>,
    pub value: DVector<f64>,
    /// Diagonal covariance, one entry per row.
    pub covariance: DVector<f64>,
}

impl MeasurementBlock {
    #[must_use]
    pub fn new(jacobian: DMatrix<f64>, value: DVector<f64>, covariance: DVector<f64>) -> Self {
        Self {
            jacobian,
            value,
            covariance,
        }
    }
}

/// Posterior-mean solver with a fixed prior, reused every cycle.
#[derive(Debug, Clone)]
pub struct MapSolver {
    nvars: usize,
    prior_mean: DVector<f64>,
    prior_precision: f64,
}

impl MapSolver {
    /// Fix the unknown-vector size and the regularization prior.
    ///
    /// Well-posedness is checked here: a non-positive prior covariance can
    /// never produce an SPD normal matrix.
    pub fn new(nvars: usize, prior_mean: f64, prior_covariance: f64) -> Result<Self, IdError> {
        if !(prior_covariance > 0.0 && prior_covariance.is_finite()) {
            return Err(IdError::IllPosed(format!(
                "prior covariance must be strictly positive, got {prior_covariance}"
            )));
        }
        Ok(Self {
            nvars,
            prior_mean: DVector::from_element(nvars, prior_mean),
            prior_precision: 1.0 / prior_covariance,
        })
    }

    #[must_use]
    pub const fn nvars(&self) -> usize {
        self.nvars
    }

    /// Posterior mean of the unknown vector given the cycle's measurements.
    pub fn solve(&self, blocks: &[MeasurementBlock]) -> Result<DVector<f64>, IdError> {
        let n = self.nvars;
        let mut normal = DMatrix::from_diagonal_element(n, n, self.prior_precision);
        let mut rhs = self.prior_precision * &self.prior_mean;

        for block in blocks {
            let rows = block.jacobian.nrows();
            if block.jacobian.ncols() != n
                || block.value.len() != rows
                || block.covariance.len() != rows
            {
                return Err(IdError::IllPosed(format!(
                    "measurement block shape mismatch: {rows} rows over {} unknowns",
                    block.jacobian.ncols()
                )));
            }
            if block.covariance.iter().any(|&c| !(c > 0.0 && c.is_finite())) {
                return Err(IdError::IllPosed(
                    "measurement covariance entries must be strictly positive".into(),
                ));
            }

            // A^T C^-1 A and A^T C^-1 y with C diagonal: scale rows once.
            let mut weighted = block.jacobian.clone();
            let mut value = block.value.clone();
            for i in 0..rows {
                let precision = 1.0 / block.covariance[i];
                weighted.row_mut(i).scale_mut(precision);
                value[i] *= precision;
            }
            normal += block.jacobian.transpose() * &weighted;
            rhs += block.jacobian.transpose() * value;
        }

        let posterior = Cholesky::new(normal)
            .ok_or(IdError::SolveFailed)?
            .solve(&rhs);
        if posterior.iter().any(|v| !v.is_finite()) {
            return Err(IdError::SolveFailed);
        }
        Ok(posterior)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn posterior_blends_prior_and_measurement_by_precision() {
        // prior N(0, 1), measurement y = x with noise 1: mean = y/2.
        let solver = MapSolver::new(1, 0.0, 1.0).unwrap();
        let block = MeasurementBlock::new(
            DMatrix::identity(1, 1),
            DVector::from_element(1, 4.0),
            DVector::from_element(1, 1.0),
        );
        let x = solver.solve(&[block]).unwrap();
        assert_relative_eq!(x[0], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn tight_measurement_dominates_loose_prior() {
        let solver = MapSolver::new(1, 0.0, 1e6).unwrap();
        let block = MeasurementBlock::new(
            DMatrix::identity(1, 1),
            DVector::from_element(1, 10.0),
            DVector::from_element(1, 1e-6),
        );
        let x = solver.solve(&[block]).unwrap();
        assert_relative_eq!(x[0], 10.0, epsilon = 1e-6);
    }

    #[test]
    fn underdetermined_unknowns_fall_back_to_prior() {
        // Two unknowns, one measurement row on their sum.
        let solver = MapSolver::new(2, 1.0, 1e-2).unwrap();
        let block = MeasurementBlock::new(
            DMatrix::from_row_slice(1, 2, &[1.0, 1.0]),
            DVector::from_element(1, 2.0),
            DVector::from_element(1, 1e3),
        );
        let x = solver.solve(&[block]).unwrap();
        // loose measurement, tight prior at 1: both stay near 1
        assert_relative_eq!(x[0], 1.0, epsilon = 1e-3);
        assert_relative_eq!(x[1], 1.0, epsilon = 1e-3);
    }

    #[test]
    fn invalid_covariances_are_rejected() {
        assert!(matches!(
            MapSolver::new(3, 0.0, 0.0),
            Err(IdError::IllPosed(_))
        ));

        let solver = MapSolver::new(1, 0.0, 1.0).unwrap();
        let block = MeasurementBlock::new(
            DMatrix::identity(1, 1),
            DVector::from_element(1, 1.0),
            DVector::from_element(1, -1.0),
        );
        assert!(matches!(
            solver.solve(&[block]),
            Err(IdError::IllPosed(_))
        ));
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let solver = MapSolver::new(2, 0.0, 1.0).unwrap();
        let block = MeasurementBlock::new(
            DMatrix::identity(3, 3),
            DVector::zeros(3),
            DVector::from_element(3, 1.0),
        );
        assert!(matches!(
            solver.solve(&[block]),
            Err(IdError::IllPosed(_))
        ));
    }
}
